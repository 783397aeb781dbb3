use super::ensure_open;
use crate::errors::Result;

/// Write-side counterpart of [`super::ByteSource`].
///
/// A hasher can tee the bytes it digests into a sink, so content is hashed
/// and copied in one pass.
pub trait ByteSink: Send {
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;

    fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            if n == 0 {
                return Err(std::io::Error::from(
                    std::io::ErrorKind::WriteZero,
                )
                .into());
            }
            buf = &buf[n..];
        }
        Ok(())
    }
}

impl<S: ByteSink + ?Sized> ByteSink for Box<S> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
}

/// In-memory sink.
#[derive(Debug, Default, Clone)]
pub struct VecSink {
    data: Vec<u8>,
    closed: bool,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl ByteSink for VecSink {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        ensure_open(self.closed)?;
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
