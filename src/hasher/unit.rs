use std::fmt;

use crate::errors::Result;
use crate::source::ByteSource;

/// One named piece of content to digest.
pub struct ContentUnit {
    name: String,
    source: Box<dyn ByteSource>,
}

impl ContentUnit {
    pub fn new(
        name: impl Into<String>,
        source: impl ByteSource + 'static,
    ) -> Self {
        Self::boxed(name, Box::new(source))
    }

    pub fn boxed(name: impl Into<String>, source: Box<dyn ByteSource>) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fixed_len(&self) -> Option<u64> {
        self.source.fixed_len()
    }

    pub(crate) fn source_mut(&mut self) -> &mut dyn ByteSource {
        self.source.as_mut()
    }

    /// Closes the source and hands back the name for the hash block.
    pub(crate) fn close(mut self) -> (String, Result<()>) {
        let closed = self.source.close();
        (self.name, closed)
    }
}

impl fmt::Debug for ContentUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentUnit")
            .field("name", &self.name)
            .field("len", &self.source.fixed_len())
            .field("closed", &self.source.is_closed())
            .finish()
    }
}
