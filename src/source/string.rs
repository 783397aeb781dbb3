use super::{ensure_open, ByteSource, ReadOutcome};
use crate::errors::Result;

/// A fixed byte string that can be replayed.
///
/// `mark` remembers the current position, `reset` goes back to it (or to
/// the start when nothing was marked) and `rewind` always goes to the start.
#[derive(Debug, Clone)]
pub struct StringSource {
    data: Vec<u8>,
    position: usize,
    mark: Option<usize>,
    closed: bool,
}

impl StringSource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            position: 0,
            mark: None,
            closed: false,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn mark(&mut self) {
        self.mark = Some(self.position);
    }

    pub fn reset(&mut self) -> Result<()> {
        ensure_open(self.closed)?;
        self.position = self.mark.unwrap_or(0);
        Ok(())
    }

    pub fn rewind(&mut self) -> Result<()> {
        ensure_open(self.closed)?;
        self.position = 0;
        self.mark = None;
        Ok(())
    }
}

impl From<&str> for StringSource {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl ByteSource for StringSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        ensure_open(self.closed)?;
        if buf.is_empty() {
            return Ok(ReadOutcome::Bytes(0));
        }
        let rest = &self.data[self.position..];
        if rest.is_empty() {
            return Ok(ReadOutcome::EndOfStream);
        }
        let n = buf.len().min(rest.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.position += n;
        Ok(ReadOutcome::Bytes(n))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn fixed_len(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}
