use super::{ensure_open, ByteSource, ReadOutcome};
use crate::errors::Result;

/// Seeded pseudo-random bytes.
///
/// Every byte is drawn from the generator in stream order, so the n-th byte
/// only depends on the seed and n, never on how the caller chunks reads.
pub struct RandomSource {
    seed: u64,
    rng: fastrand::Rng,
    len: Option<u64>,
    position: u64,
    closed: bool,
}

impl RandomSource {
    /// Unbounded stream.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: fastrand::Rng::with_seed(seed),
            len: None,
            position: 0,
            closed: false,
        }
    }

    pub fn with_len(seed: u64, len: u64) -> Self {
        Self {
            len: Some(len),
            ..Self::new(seed)
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of bytes produced so far.
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl ByteSource for RandomSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        ensure_open(self.closed)?;
        if buf.is_empty() {
            return Ok(ReadOutcome::Bytes(0));
        }
        let want = match self.len {
            Some(len) if self.position >= len => {
                return Ok(ReadOutcome::EndOfStream)
            }
            Some(len) => buf.len().min((len - self.position) as usize),
            None => buf.len(),
        };
        for byte in &mut buf[..want] {
            *byte = self.rng.u8(..);
        }
        self.position += want as u64;
        Ok(ReadOutcome::Bytes(want))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn fixed_len(&self) -> Option<u64> {
        self.len
    }
}
