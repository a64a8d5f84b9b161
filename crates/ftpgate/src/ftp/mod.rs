//! FTP collaborators: sessions used to walk a server and the transfer engine used to stream
//! files.
//!
//! The gateway only talks to these traits. [`SuppaFtp`] implements both on top of `suppaftp`;
//! [`memory::MemoryFtp`] is an in-process server used by tests and local experiments.

pub mod memory;
mod suppa;

use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::host::HostCredentials;

pub use suppa::SuppaFtp;

#[derive(Debug, thiserror::Error)]
pub enum FtpError {
    #[error("connect to {address}: {message}")]
    Connect { address: String, message: String },
    #[error("login rejected: {0}")]
    Login(String),
    #[error("list {path:?}: {message}")]
    List { path: String, message: String },
    #[error("retrieve {path:?}: {message}")]
    Retrieve { path: String, message: String },
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl FtpError {
    /// The control connection can no longer be trusted for further commands.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, FtpError::Connect { .. } | FtpError::Timeout(_))
    }
}

/// Opens sessions against the server named by a host key.
#[async_trait::async_trait]
pub trait FtpConnector: Send + Sync {
    /// Connect and log in.
    async fn connect(&self, credentials: &HostCredentials) -> Result<Box<dyn FtpSession>, FtpError>;
}

#[async_trait::async_trait]
pub trait FtpSession: Send {
    /// Raw `LIST` lines for `path`. The empty path lists the login directory.
    async fn list(&mut self, path: &str) -> Result<Vec<String>, FtpError>;

    /// Close the session. Failures are not interesting at this point and are only logged.
    async fn quit(self: Box<Self>);
}

/// A single file retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub credentials: HostCredentials,
    pub path: String,
    /// Byte offset to start at (`REST`).
    pub offset: u64,
    /// Number of bytes to deliver; `None` reads to the end of the file.
    pub len: Option<u64>,
}

/// Body bytes of an open transfer. Dropping the stream cancels the transfer and releases its
/// connections.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[async_trait::async_trait]
pub trait TransferEngine: Send + Sync {
    /// Start a transfer. Errors here happen before any byte is produced.
    async fn open(&self, request: TransferRequest) -> Result<ByteStream, FtpError>;
}
