use crate::digest::to_hex;

/// Digests of one content unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashBlock {
    pub name: String,
    /// Content bytes read from the unit's source.
    pub content_bytes: u64,
    /// Bytes fed to all digesters together: the nonces, then the optional
    /// name and the content once per digester.
    pub bytes_hashed: u64,
    /// One digest per digester, in declaration order.
    pub digests: Vec<Vec<u8>>,
    /// The byte budget ran out before the unit's end of stream.
    pub truncated: bool,
}

impl HashBlock {
    pub fn hex_digests(&self) -> Vec<String> {
        self.digests.iter().map(|d| to_hex(d)).collect()
    }
}

/// Receives every [`HashBlock`] as soon as its unit is done.
pub trait BlockListener: Send {
    fn block_done(&mut self, block: &HashBlock);
}

impl<F> BlockListener for F
where
    F: FnMut(&HashBlock) + Send,
{
    fn block_done(&mut self, block: &HashBlock) {
        self(block)
    }
}
