use std::any::Any;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HashError>;

#[derive(Error, Debug)]
pub enum HashError {
    #[error("Stream closed")]
    SourceClosed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Contract violation: {0}")]
    Contract(String),
    #[error("Deadline passed before hashing finished")]
    Timeout,
    #[error("Hashing aborted")]
    Aborted,
    #[error("Hash step panicked: {0}")]
    Panicked(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HashError {
    pub fn contract(msg: impl Into<String>) -> Self {
        Self::Contract(msg.into())
    }

    /// True for the errors a source raises when it is read after `close()`.
    pub fn is_closed_stream(&self) -> bool {
        matches!(self, Self::SourceClosed)
    }
}

impl From<serde_json::Error> for HashError {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(e.to_string())
    }
}

/// Renders the payload of a caught panic for logs and outcomes.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
