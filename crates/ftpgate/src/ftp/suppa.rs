use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::Bytes;
use suppaftp::tokio::AsyncFtpStream;
use suppaftp::types::FileType;
use tokio::io::AsyncReadExt;

use super::{ByteStream, FtpConnector, FtpError, FtpSession, TransferEngine, TransferRequest};
use crate::host::{mask_host, HostCredentials};

const CHUNK_SIZE: usize = 64 * 1024;

/// `suppaftp`-backed connector and transfer engine.
///
/// Every control-connection operation and every data read is bounded by `op_timeout`.
#[derive(Debug, Clone)]
pub struct SuppaFtp {
    op_timeout: Duration,
}

impl SuppaFtp {
    pub fn new(op_timeout: Duration) -> Self {
        Self { op_timeout }
    }

    async fn open_stream(&self, credentials: &HostCredentials) -> Result<AsyncFtpStream, FtpError> {
        let address = credentials.address();
        let mut stream = bounded(self.op_timeout, AsyncFtpStream::connect(address.as_str()))
            .await?
            .map_err(|err| FtpError::Connect {
                address: mask_host(&address),
                message: err.to_string(),
            })?;

        let (user, password) = credentials.login();
        bounded(self.op_timeout, stream.login(user, password))
            .await?
            .map_err(|err| FtpError::Login(err.to_string()))?;

        Ok(stream)
    }
}

async fn bounded<T>(dur: Duration, fut: impl Future<Output = T>) -> Result<T, FtpError> {
    tokio::time::timeout(dur, fut)
        .await
        .map_err(|_| FtpError::Timeout(dur))
}

struct SuppaSession {
    stream: AsyncFtpStream,
    op_timeout: Duration,
}

#[async_trait::async_trait]
impl FtpConnector for SuppaFtp {
    async fn connect(&self, credentials: &HostCredentials) -> Result<Box<dyn FtpSession>, FtpError> {
        let stream = self.open_stream(credentials).await?;
        Ok(Box::new(SuppaSession {
            stream,
            op_timeout: self.op_timeout,
        }))
    }
}

#[async_trait::async_trait]
impl FtpSession for SuppaSession {
    async fn list(&mut self, path: &str) -> Result<Vec<String>, FtpError> {
        let target = (!path.is_empty()).then_some(path);
        bounded(self.op_timeout, self.stream.list(target))
            .await?
            .map_err(|err| FtpError::List {
                path: path.to_owned(),
                message: err.to_string(),
            })
    }

    async fn quit(mut self: Box<Self>) {
        match bounded(self.op_timeout, self.stream.quit()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::debug!(error = %err, "ftp quit failed"),
            Err(err) => tracing::debug!(error = %err, "ftp quit timed out"),
        }
    }
}

#[async_trait::async_trait]
impl TransferEngine for SuppaFtp {
    async fn open(&self, request: TransferRequest) -> Result<ByteStream, FtpError> {
        let retrieve_error = |message: String| FtpError::Retrieve {
            path: request.path.clone(),
            message,
        };

        let mut ftp = self.open_stream(&request.credentials).await?;
        bounded(self.op_timeout, ftp.transfer_type(FileType::Binary))
            .await?
            .map_err(|err| retrieve_error(err.to_string()))?;

        if request.offset > 0 {
            let offset = usize::try_from(request.offset)
                .map_err(|_| retrieve_error("offset out of range".to_owned()))?;
            bounded(self.op_timeout, ftp.resume_transfer(offset))
                .await?
                .map_err(|err| retrieve_error(err.to_string()))?;
        }

        let mut data = bounded(self.op_timeout, ftp.retr_as_stream(request.path.as_str()))
            .await?
            .map_err(|err| retrieve_error(err.to_string()))?;

        let op_timeout = self.op_timeout;
        let mut remaining = request.len;
        let path = request.path;

        // The control and data connections live inside the stream, so dropping the response
        // body (client gone) closes both.
        Ok(Box::pin(async_stream::stream! {
            let mut reached_eof = false;
            loop {
                let want = match remaining {
                    Some(0) => break,
                    Some(n) => n.min(CHUNK_SIZE as u64) as usize,
                    None => CHUNK_SIZE,
                };
                let mut chunk = vec![0u8; want];
                let read = match tokio::time::timeout(op_timeout, data.read(&mut chunk)).await {
                    Ok(read) => read,
                    Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "ftp data read timed out")),
                };
                let n = match read {
                    Ok(n) => n,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };
                if n == 0 {
                    reached_eof = true;
                    break;
                }
                chunk.truncate(n);
                if let Some(left) = remaining.as_mut() {
                    *left -= n as u64;
                }
                yield Ok(Bytes::from(chunk));
            }

            if reached_eof {
                // A full read ends with the server's transfer-complete reply.
                match tokio::time::timeout(op_timeout, ftp.finalize_retr_stream(data)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        yield Err(io::Error::new(io::ErrorKind::Other, format!("retrieve {path:?}: {err}")));
                        return;
                    }
                    Err(_) => {
                        yield Err(io::Error::new(io::ErrorKind::TimedOut, "ftp transfer completion timed out"));
                        return;
                    }
                }
            } else {
                // Range satisfied before EOF; closing the data connection aborts the rest.
                drop(data);
            }

            let _ = tokio::time::timeout(op_timeout, ftp.quit()).await;
        }))
    }
}
