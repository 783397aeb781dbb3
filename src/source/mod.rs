//! Byte producers consumed by the hashing engine.
//!
//! [`ByteSource`] is the open extension point. The sources shipped with the
//! crate are also reachable through the closed [`SourceKind`] enum, which is
//! what content collaborators normally hand over.

mod fault;
mod fill;
mod random;
mod sink;
mod string;
mod throttle;

pub use fault::{Fault, FaultHandle, FaultInjector};
pub use fill::FillSource;
pub use random::RandomSource;
pub use sink::{ByteSink, VecSink};
pub use string::StringSource;
pub use throttle::ThrottledSource;

use crate::errors::{HashError, Result};

/// Result of a single [`ByteSource::read`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were written to the front of the buffer.
    Bytes(usize),
    EndOfStream,
}

/// A finite or unbounded sequence of bytes.
///
/// Reads after [`ByteSource::close`] must fail with
/// [`HashError::SourceClosed`]. When [`ByteSource::fixed_len`] is set it is
/// authoritative: no read yields bytes past it.
pub trait ByteSource: Send {
    /// Reads up to `buf.len()` bytes. An empty buffer yields `Bytes(0)`.
    ///
    /// `Bytes(0)` for a non-empty buffer means nothing is available right
    /// now. The hasher then ends its step early, even below the one-byte
    /// floor of a forced step, and reads again on the next one.
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome>;

    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Total length of the stream, `None` when unbounded or unknown.
    fn fixed_len(&self) -> Option<u64> {
        None
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        (**self).read(buf)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }

    fn fixed_len(&self) -> Option<u64> {
        (**self).fixed_len()
    }
}

/// The built-in sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    PseudoRandom { seed: u64, len: Option<u64> },
    FixedFill { byte: u8, count: u64 },
    StringBacked(Vec<u8>),
}

impl SourceKind {
    pub fn into_source(self) -> Box<dyn ByteSource> {
        match self {
            SourceKind::PseudoRandom { seed, len: Some(len) } => {
                Box::new(RandomSource::with_len(seed, len))
            }
            SourceKind::PseudoRandom { seed, len: None } => {
                Box::new(RandomSource::new(seed))
            }
            SourceKind::FixedFill { byte, count } => {
                Box::new(FillSource::new(byte, count))
            }
            SourceKind::StringBacked(data) => Box::new(StringSource::new(data)),
        }
    }
}

pub(crate) fn ensure_open(closed: bool) -> Result<()> {
    if closed {
        Err(HashError::SourceClosed)
    } else {
        Ok(())
    }
}

/// Reads `source` to the end in chunks of `chunk` bytes.
pub fn read_to_end(
    source: &mut dyn ByteSource,
    chunk: usize,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk.max(1)];
    loop {
        match source.read(&mut buf)? {
            ReadOutcome::Bytes(0) => break,
            ReadOutcome::Bytes(n) => out.extend_from_slice(&buf[..n]),
            ReadOutcome::EndOfStream => break,
        }
    }
    Ok(out)
}
