//! Error types for davrelay-tpc.
//!
//! Failures the requesting client should see are not errors here: they are
//! answered through the [`ClientChannel`](crate::ClientChannel) as status
//! codes or `failure:` chunks. A [`TpcError`] escaping the handler means the
//! client channel itself is gone.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TpcError {
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("invalid checksum configuration: {0}")]
    Digest(#[from] davrelay_digest::DigestError),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("failed to respond to client: {0}")]
    Client(#[source] io::Error),

    #[error("local file I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("network error: {0}")]
    Network(String),
}

impl TpcError {
    /// The response channel to the requesting client was closed.
    pub fn client_gone() -> Self {
        TpcError::Client(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "client response channel closed",
        ))
    }
}

pub type Result<T> = std::result::Result<T, TpcError>;
