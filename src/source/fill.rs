use super::{ensure_open, ByteSource, ReadOutcome};
use crate::errors::Result;

/// `count` copies of one byte value.
#[derive(Debug, Clone)]
pub struct FillSource {
    byte: u8,
    len: u64,
    remaining: u64,
    closed: bool,
}

impl FillSource {
    pub fn new(byte: u8, count: u64) -> Self {
        Self {
            byte,
            len: count,
            remaining: count,
            closed: false,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl ByteSource for FillSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        ensure_open(self.closed)?;
        if buf.is_empty() {
            return Ok(ReadOutcome::Bytes(0));
        }
        if self.remaining == 0 {
            return Ok(ReadOutcome::EndOfStream);
        }
        let n = buf.len().min(self.remaining as usize);
        buf[..n].fill(self.byte);
        self.remaining -= n as u64;
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
        Some(self.len)
    }
}
