//! In-process FTP server.
//!
//! Serves a fixed set of directories and files through the same traits as the real client,
//! rendering Unix-style `LIST` lines so listings go through the regular parser. Clones share
//! state, which lets tests hand one clone to the gateway and inspect counters on another.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream;

use super::{ByteStream, FtpConnector, FtpError, FtpSession, TransferEngine, TransferRequest};
use crate::host::HostCredentials;

const CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Default)]
struct Server {
    directories: BTreeSet<String>,
    files: BTreeMap<String, Bytes>,
    broken: HashSet<String>,
    login: Option<(String, String)>,
    unreachable: bool,
    failing_transfers: bool,
    connect_delay: Option<Duration>,
    list_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct Shared {
    server: Mutex<Server>,
    connects: AtomicUsize,
    lists: AtomicUsize,
    transfers: AtomicUsize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryFtp {
    shared: Arc<Shared>,
}

impl MemoryFtp {
    pub fn new() -> Self {
        Self::default()
    }

    fn server(&self) -> MutexGuard<'_, Server> {
        self.shared
            .server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a directory (and its ancestors). Paths are absolute, e.g. `/pub/docs`.
    pub fn with_dir(self, path: &str) -> Self {
        {
            let mut server = self.server();
            let mut current = String::new();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                current.push('/');
                current.push_str(segment);
                server.directories.insert(current.clone());
            }
        }
        self
    }

    /// Add a file, creating its parent directories.
    pub fn with_file(self, path: &str, contents: impl Into<Bytes>) -> Self {
        let parent = parent_of(path).to_owned();
        let this = self.with_dir(&parent);
        this.server().files.insert(path.to_owned(), contents.into());
        this
    }

    /// Listing this directory fails; the rest of the server keeps working.
    pub fn with_broken_dir(self, path: &str) -> Self {
        let this = self.with_dir(path);
        this.server().broken.insert(path.to_owned());
        this
    }

    /// Require these credentials instead of accepting any login.
    pub fn with_login(self, user: &str, password: &str) -> Self {
        self.server().login = Some((user.to_owned(), password.to_owned()));
        self
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.server().connect_delay = Some(delay);
        self
    }

    pub fn with_list_delay(self, delay: Duration) -> Self {
        self.server().list_delay = Some(delay);
        self
    }

    /// Every connection attempt is refused.
    pub fn unreachable(self) -> Self {
        self.set_unreachable(true);
        self
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.server().unreachable = unreachable;
    }

    /// Retrievals are rejected after login.
    pub fn with_failing_transfers(self) -> Self {
        self.server().failing_transfers = true;
        self
    }

    /// Connections opened so far, for walks and transfers alike.
    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn list_count(&self) -> usize {
        self.shared.lists.load(Ordering::SeqCst)
    }

    /// Retrievals requested so far, successful or not.
    pub fn transfer_count(&self) -> usize {
        self.shared.transfers.load(Ordering::SeqCst)
    }

    async fn login(&self, credentials: &HostCredentials) -> Result<(), FtpError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        let (delay, unreachable, expected) = {
            let server = self.server();
            (server.connect_delay, server.unreachable, server.login.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if unreachable {
            return Err(FtpError::Connect {
                address: credentials.address(),
                message: "connection refused".to_owned(),
            });
        }
        if let Some((user, password)) = expected {
            if credentials.login() != (user.as_str(), password.as_str()) {
                return Err(FtpError::Login("530 Login incorrect.".to_owned()));
            }
        }
        Ok(())
    }

    fn render_listing(&self, path: &str) -> Result<Vec<String>, FtpError> {
        let dir = if path.is_empty() { "/" } else { path };
        let server = self.server();
        let list_error = |message: &str| FtpError::List {
            path: path.to_owned(),
            message: message.to_owned(),
        };
        if server.broken.contains(dir) {
            return Err(list_error("550 Permission denied."));
        }
        if dir != "/" && !server.directories.contains(dir) {
            return Err(list_error("550 No such file or directory."));
        }

        let mut lines = vec![
            "drwxr-xr-x    2 ftp      ftp          4096 Jan 15  2024 .".to_owned(),
            "drwxr-xr-x    2 ftp      ftp          4096 Jan 15  2024 ..".to_owned(),
        ];
        for child in server.directories.iter().filter(|d| parent_of(d) == dir) {
            lines.push(format!(
                "drwxr-xr-x    2 ftp      ftp          4096 Jan 15  2024 {}",
                name_of(child)
            ));
        }
        for (child, contents) in server.files.iter().filter(|(f, _)| parent_of(f) == dir) {
            lines.push(format!(
                "-rw-r--r--    1 ftp      ftp      {:>8} Jan 15  2024 {}",
                contents.len(),
                name_of(child)
            ));
        }
        Ok(lines)
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

struct MemorySession {
    ftp: MemoryFtp,
}

#[async_trait::async_trait]
impl FtpConnector for MemoryFtp {
    async fn connect(&self, credentials: &HostCredentials) -> Result<Box<dyn FtpSession>, FtpError> {
        self.login(credentials).await?;
        Ok(Box::new(MemorySession { ftp: self.clone() }))
    }
}

#[async_trait::async_trait]
impl FtpSession for MemorySession {
    async fn list(&mut self, path: &str) -> Result<Vec<String>, FtpError> {
        self.ftp.shared.lists.fetch_add(1, Ordering::SeqCst);
        let delay = self.ftp.server().list_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.ftp.render_listing(path)
    }

    async fn quit(self: Box<Self>) {}
}

#[async_trait::async_trait]
impl TransferEngine for MemoryFtp {
    async fn open(&self, request: TransferRequest) -> Result<ByteStream, FtpError> {
        self.login(&request.credentials).await?;
        self.shared.transfers.fetch_add(1, Ordering::SeqCst);

        let retrieve_error = |message: &str| FtpError::Retrieve {
            path: request.path.clone(),
            message: message.to_owned(),
        };
        let contents = {
            let server = self.server();
            if server.failing_transfers {
                return Err(retrieve_error("451 Requested action aborted."));
            }
            server
                .files
                .get(&request.path)
                .cloned()
                .ok_or_else(|| retrieve_error("550 No such file."))?
        };

        let total = contents.len() as u64;
        let start = request.offset.min(total);
        let end = match request.len {
            Some(len) => start.saturating_add(len).min(total),
            None => total,
        };
        let mut body = contents.slice(start as usize..end as usize);

        let mut chunks = Vec::new();
        while !body.is_empty() {
            let n = body.len().min(CHUNK_SIZE);
            chunks.push(Ok::<_, io::Error>(body.split_to(n)));
        }
        Ok(Box::pin(stream::iter(chunks)))
    }
}
