use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ByteSink, ByteSource, ReadOutcome};
use crate::errors::{HashError, Result};

/// A failure that can be armed on a [`FaultInjector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Surfaces as [`HashError::Io`].
    Io(io::ErrorKind, String),
    /// Unchecked failure: the call panics with this message.
    Panic(String),
}

impl Fault {
    pub fn io(kind: io::ErrorKind, msg: impl Into<String>) -> Self {
        Fault::Io(kind, msg.into())
    }

    pub fn panic(msg: impl Into<String>) -> Self {
        Fault::Panic(msg.into())
    }

    fn fire(self, op: &str) -> HashError {
        match self {
            Fault::Io(kind, msg) => {
                log::debug!("fault: injected {:?} on {}: {}", kind, op, msg);
                io::Error::new(kind, msg).into()
            }
            Fault::Panic(msg) => {
                log::debug!("fault: injected panic on {}: {}", op, msg);
                panic!("{}", msg)
            }
        }
    }
}

#[derive(Debug, Default)]
struct Armed {
    read: Option<Fault>,
    write: Option<Fault>,
    close: Option<Fault>,
}

/// Shared arming state of a [`FaultInjector`].
///
/// The injector usually ends up owned by a hasher, so tests keep a handle
/// to arm it later.
#[derive(Debug, Clone, Default)]
pub struct FaultHandle {
    armed: Arc<Mutex<Armed>>,
}

impl FaultHandle {
    fn lock(&self) -> MutexGuard<'_, Armed> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn arm_read_failure(&self, fault: Fault) {
        self.lock().read = Some(fault);
    }

    pub fn arm_write_failure(&self, fault: Fault) {
        self.lock().write = Some(fault);
    }

    pub fn arm_close_failure(&self, fault: Fault) {
        self.lock().close = Some(fault);
    }

    /// Clears every armed failure.
    pub fn disarm(&self) {
        *self.lock() = Armed::default();
    }

    pub fn is_armed(&self) -> bool {
        let armed = self.lock();
        armed.read.is_some() || armed.write.is_some() || armed.close.is_some()
    }

    // The guard is released before the fault fires, a panicking fault must
    // not poison the arming state.
    fn take_read(&self) -> Option<Fault> {
        self.lock().read.take()
    }

    fn take_write(&self) -> Option<Fault> {
        self.lock().write.take()
    }

    fn take_close(&self) -> Option<Fault> {
        self.lock().close.take()
    }
}

/// Decorator raising one-shot failures on read, write or close.
///
/// An armed failure fires on the next matching call and is then cleared.
/// All other calls go straight to the wrapped resource.
#[derive(Debug)]
pub struct FaultInjector<T> {
    inner: T,
    faults: FaultHandle,
}

impl<T> FaultInjector<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            faults: FaultHandle::default(),
        }
    }

    pub fn handle(&self) -> FaultHandle {
        self.faults.clone()
    }

    pub fn arm_read_failure(&self, fault: Fault) {
        self.faults.arm_read_failure(fault)
    }

    pub fn arm_write_failure(&self, fault: Fault) {
        self.faults.arm_write_failure(fault)
    }

    pub fn arm_close_failure(&self, fault: Fault) {
        self.faults.arm_close_failure(fault)
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: ByteSource> ByteSource for FaultInjector<T> {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        if let Some(fault) = self.faults.take_read() {
            return Err(fault.fire("read"));
        }
        self.inner.read(buf)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(fault) = self.faults.take_close() {
            return Err(fault.fire("close"));
        }
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn fixed_len(&self) -> Option<u64> {
        self.inner.fixed_len()
    }
}

impl<T: ByteSink> ByteSink for FaultInjector<T> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if let Some(fault) = self.faults.take_write() {
            return Err(fault.fire("write"));
        }
        self.inner.write(buf)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(fault) = self.faults.take_close() {
            return Err(fault.fire("close"));
        }
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
