//! Walks an FTP server into a [`Directory`] tree.

use std::time::Duration;

use time::OffsetDateTime;

use crate::ftp::{FtpError, FtpSession};
use crate::listing::{parse_list_line, EntryKind};
use crate::tree::Directory;

pub const DEFAULT_MAX_DEPTH: usize = 32;
pub const DEFAULT_MAX_NODES: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkLimits {
    /// Directories this many levels below the root are recorded but not listed.
    pub max_depth: usize,
    /// Total number of nodes (files and directories, root excluded) a tree may hold.
    pub max_nodes: usize,
    /// Upper bound for each `LIST`.
    pub op_timeout: Duration,
}

impl Default for WalkLimits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_nodes: DEFAULT_MAX_NODES,
            op_timeout: Duration::from_secs(30),
        }
    }
}

/// A directory whose children are being collected, stored flat so the walk needs no recursion.
struct Slot {
    dir: Directory,
    depth: usize,
    /// Index of the parent slot and position within the parent's `subdirectories`.
    parent: Option<(usize, usize)>,
}

/// Walk the server behind `session`, starting at its login directory.
///
/// Only a failure to list the root is an error. Any other listing failure marks that
/// directory `incomplete` and the walk continues with its siblings; when the failure means the
/// connection itself is gone, every directory still waiting to be listed is marked instead.
pub async fn build_tree(
    session: &mut dyn FtpSession,
    limits: &WalkLimits,
) -> Result<Directory, FtpError> {
    let mut slots = vec![Slot {
        dir: Directory::root(),
        depth: 0,
        parent: None,
    }];
    let mut stack = vec![0usize];
    let mut nodes = 0usize;
    let mut connection_lost = false;

    while let Some(idx) = stack.pop() {
        if connection_lost || slots[idx].depth >= limits.max_depth {
            slots[idx].dir.incomplete = true;
            continue;
        }
        if nodes >= limits.max_nodes {
            slots[idx].dir.incomplete = true;
            continue;
        }

        let path = slots[idx].dir.path.clone();
        let lines = match list_bounded(session, &path, limits.op_timeout).await {
            Ok(lines) => lines,
            Err(err) if idx == 0 => return Err(err),
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "directory listing failed");
                connection_lost = err.is_connection_lost();
                slots[idx].dir.incomplete = true;
                continue;
            }
        };

        let now = OffsetDateTime::now_utc();
        let mut children = Vec::new();
        for entry in lines.iter().filter_map(|line| parse_list_line(line, now)) {
            if entry.is_self_or_parent() {
                continue;
            }
            if nodes >= limits.max_nodes {
                slots[idx].dir.incomplete = true;
                break;
            }
            nodes += 1;

            let dir = &mut slots[idx].dir;
            match entry.kind {
                EntryKind::Directory => {
                    dir.push_directory(&entry.name, entry.size);
                    children.push(dir.subdirectories.len() - 1);
                }
                EntryKind::File | EntryKind::Symlink => {
                    dir.push_file(&entry.name, entry.size, entry.modified);
                }
            }
        }
        slots[idx].dir.last_updated = Some(now);

        let depth = slots[idx].depth + 1;
        // Reversed so the stack visits children in listing order.
        for position in children.into_iter().rev() {
            let child = std::mem::take(&mut slots[idx].dir.subdirectories[position]);
            slots.push(Slot {
                dir: child,
                depth,
                parent: Some((idx, position)),
            });
            stack.push(slots.len() - 1);
        }
    }

    // Children always come after their parent, so folding back to front finishes every
    // subtree before it is moved into place.
    while slots.len() > 1 {
        let Some(slot) = slots.pop() else { break };
        if let Some((parent, position)) = slot.parent {
            slots[parent].dir.subdirectories[position] = slot.dir;
        }
    }
    Ok(slots.pop().map(|slot| slot.dir).unwrap_or_default())
}

async fn list_bounded(
    session: &mut dyn FtpSession,
    path: &str,
    op_timeout: Duration,
) -> Result<Vec<String>, FtpError> {
    tokio::time::timeout(op_timeout, session.list(path))
        .await
        .map_err(|_| FtpError::Timeout(op_timeout))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::memory::MemoryFtp;
    use crate::ftp::FtpConnector;
    use crate::host::HostCredentials;

    async fn walk(ftp: &MemoryFtp, limits: WalkLimits) -> Result<Directory, FtpError> {
        let mut session = ftp
            .connect(&HostCredentials::parse("ftp.example.org"))
            .await
            .unwrap();
        build_tree(session.as_mut(), &limits).await
    }

    fn names(dir: &Directory) -> (Vec<&str>, Vec<&str>) {
        (
            dir.subdirectories.iter().map(|d| d.name.as_str()).collect(),
            dir.files.iter().map(|f| f.name.as_str()).collect(),
        )
    }

    #[tokio::test]
    async fn builds_nested_tree() {
        let ftp = MemoryFtp::new()
            .with_file("/readme.txt", "hi")
            .with_file("/pub/a/deep.bin", vec![0u8; 10])
            .with_file("/pub/b.txt", "bbb")
            .with_dir("/empty");
        let root = walk(&ftp, WalkLimits::default()).await.unwrap();

        assert_eq!(root.path, "");
        assert_eq!(names(&root), (vec!["empty", "pub"], vec!["readme.txt"]));
        let public = &root.subdirectories[1];
        assert_eq!(public.path, "/pub");
        assert_eq!(names(public), (vec!["a"], vec!["b.txt"]));
        let deep = &public.subdirectories[0].files[0];
        assert_eq!(deep.path, "/pub/a/deep.bin");
        assert_eq!(deep.size, Some(10));

        assert!(root.last_updated.is_some());
        assert!(public.subdirectories[0].last_updated.is_some());
        assert!(!root.incomplete && !public.incomplete);
        assert_eq!(root.descendant_count(), 6);
    }

    #[tokio::test]
    async fn failing_subdirectory_is_marked_and_siblings_survive() {
        let ftp = MemoryFtp::new()
            .with_file("/ok/file.txt", "x")
            .with_broken_dir("/locked")
            .with_file("/zeta.txt", "z");
        let root = walk(&ftp, WalkLimits::default()).await.unwrap();

        let locked = root.subdirectories.iter().find(|d| d.name == "locked").unwrap();
        assert!(locked.incomplete);
        assert!(locked.is_empty());
        assert!(locked.last_updated.is_none());

        let ok = root.subdirectories.iter().find(|d| d.name == "ok").unwrap();
        assert!(!ok.incomplete);
        assert_eq!(ok.files.len(), 1);
        assert_eq!(root.files[0].name, "zeta.txt");
    }

    #[tokio::test]
    async fn root_listing_failure_is_an_error() {
        let ftp = MemoryFtp::new().with_broken_dir("/");
        assert!(walk(&ftp, WalkLimits::default()).await.is_err());
    }

    #[tokio::test]
    async fn depth_limit_stops_descent() {
        let ftp = MemoryFtp::new().with_file("/a/b/c/d.txt", "d");
        let limits = WalkLimits {
            max_depth: 2,
            ..WalkLimits::default()
        };
        let root = walk(&ftp, limits).await.unwrap();

        let b = &root.subdirectories[0].subdirectories[0];
        assert_eq!(b.path, "/a/b");
        assert!(b.incomplete);
        assert!(b.is_empty());
        assert!(!root.subdirectories[0].incomplete);
    }

    #[tokio::test]
    async fn node_limit_truncates() {
        let mut ftp = MemoryFtp::new();
        for i in 0..10 {
            ftp = ftp.with_file(&format!("/d/f{i}"), "x");
        }
        let limits = WalkLimits {
            max_nodes: 5,
            ..WalkLimits::default()
        };
        let root = walk(&ftp, limits).await.unwrap();

        assert_eq!(root.descendant_count(), 5);
        assert!(root.subdirectories[0].incomplete);
    }

    #[tokio::test(start_paused = true)]
    async fn root_listing_timeout_is_an_error() {
        let ftp = MemoryFtp::new()
            .with_dir("/a")
            .with_list_delay(Duration::from_secs(60));
        let limits = WalkLimits {
            op_timeout: Duration::from_secs(1),
            ..WalkLimits::default()
        };
        assert!(matches!(
            walk(&ftp, limits).await,
            Err(FtpError::Timeout(_))
        ));
    }

    /// Lists the root, then loses the connection on the first subdirectory.
    struct DroppingSession {
        listed: Vec<String>,
    }

    #[async_trait::async_trait]
    impl FtpSession for DroppingSession {
        async fn list(&mut self, path: &str) -> Result<Vec<String>, FtpError> {
            self.listed.push(path.to_owned());
            if path.is_empty() {
                Ok(vec![
                    "drwxr-xr-x 2 ftp ftp 0 Jan 15 2024 a".to_owned(),
                    "drwxr-xr-x 2 ftp ftp 0 Jan 15 2024 b".to_owned(),
                ])
            } else {
                Err(FtpError::Timeout(Duration::from_secs(1)))
            }
        }

        async fn quit(self: Box<Self>) {}
    }

    #[tokio::test]
    async fn lost_connection_marks_the_rest_incomplete() {
        let mut session = DroppingSession { listed: Vec::new() };
        let root = build_tree(&mut session, &WalkLimits::default()).await.unwrap();

        assert_eq!(session.listed, vec!["", "/a"]);
        assert!(!root.incomplete);
        assert!(root.subdirectories.iter().all(|d| d.incomplete));
    }
}
