use std::thread;
use std::time::Duration;

use super::{ByteSource, ReadOutcome};
use crate::errors::Result;
use crate::KILOBYTE;

/// Sleeps in proportion to the bytes the wrapped source delivers.
///
/// Simulates slow content so that time-budgeted scheduling can be
/// exercised deterministically enough for tests.
pub struct ThrottledSource<S> {
    inner: S,
    per_kib: Duration,
}

impl<S: ByteSource> ThrottledSource<S> {
    pub fn new(inner: S, per_kib: Duration) -> Self {
        Self { inner, per_kib }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: ByteSource> ByteSource for ThrottledSource<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        let outcome = self.inner.read(buf)?;
        if let ReadOutcome::Bytes(n) = outcome {
            if n > 0 && !self.per_kib.is_zero() {
                thread::sleep(self.per_kib.mul_f64(n as f64 / KILOBYTE as f64));
            }
        }
        Ok(outcome)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn fixed_len(&self) -> Option<u64> {
        self.inner.fixed_len()
    }
}
