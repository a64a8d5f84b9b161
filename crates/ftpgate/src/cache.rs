//! Per-host cache of directory trees.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::builder::{build_tree, WalkLimits};
use crate::ftp::{FtpConnector, FtpError};
use crate::host::{mask_host_key, HostCredentials};
use crate::metrics::{CacheOutcome, Metrics};
use crate::tree::Directory;

pub const DEFAULT_TREE_TTL: Duration = Duration::from_secs(600);

#[derive(Clone)]
struct CacheEntry {
    tree: Arc<Directory>,
    built_at: Instant,
}

enum Lookup {
    Fresh(Arc<Directory>),
    Expired,
    Unpopulated,
}

/// Serializes rebuilds of one host and tells waiters whether an attempt finished while they
/// were queued.
#[derive(Default)]
struct RebuildGate {
    lock: tokio::sync::Mutex<()>,
    attempts: AtomicU64,
}

/// Holds a host's gate for one `get_tree` call and forgets it once nobody else needs it, even
/// when the call is dropped mid-build.
struct GateLease<'a> {
    rebuilds: &'a Mutex<HashMap<String, Arc<RebuildGate>>>,
    host_key: &'a str,
    gate: Arc<RebuildGate>,
}

impl Drop for GateLease<'_> {
    fn drop(&mut self) {
        let mut rebuilds = self.rebuilds.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference is ours, the other is the map's.
        let ours = rebuilds
            .get(self.host_key)
            .is_some_and(|gate| Arc::ptr_eq(gate, &self.gate));
        if ours && Arc::strong_count(&self.gate) == 2 {
            rebuilds.remove(self.host_key);
        }
    }
}

/// Trees keyed by the raw host key, each served for `ttl` after it was built.
///
/// Entries are replaced wholesale by a successful rebuild and are never touched by a failed one.
/// At most one rebuild per host key runs at a time. Callers that queued behind a rebuild take
/// its outcome: the new tree, or an empty root when it failed.
pub struct TreeCache {
    connector: Arc<dyn FtpConnector>,
    limits: WalkLimits,
    ttl: Duration,
    metrics: Arc<Metrics>,
    entries: Mutex<HashMap<String, CacheEntry>>,
    rebuilds: Mutex<HashMap<String, Arc<RebuildGate>>>,
}

impl TreeCache {
    pub fn new(
        connector: Arc<dyn FtpConnector>,
        limits: WalkLimits,
        ttl: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            connector,
            limits,
            ttl,
            metrics,
            entries: Mutex::new(HashMap::new()),
            rebuilds: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The tree for `host_key`, from cache when fresh, otherwise freshly built.
    ///
    /// Never fails: when the server cannot be walked the result is an empty root and the
    /// previous cache entry, if any, is left as it was.
    pub async fn get_tree(&self, host_key: &str) -> Arc<Directory> {
        let started = Instant::now();
        let host = mask_host_key(host_key);

        let outcome = match self.lookup(host_key) {
            Lookup::Fresh(tree) => {
                self.record(CacheOutcome::Hit, &host, started, false);
                return tree;
            }
            Lookup::Expired => CacheOutcome::MissExpired,
            Lookup::Unpopulated => CacheOutcome::MissUnpopulated,
        };

        let lease = self.rebuild_gate(host_key);
        let seen = lease.gate.attempts.load(Ordering::Acquire);
        let _rebuilding = lease.gate.lock.lock().await;

        // Whoever held the gate before us may have just rebuilt this host.
        if let Lookup::Fresh(tree) = self.lookup(host_key) {
            self.record(CacheOutcome::Hit, &host, started, true);
            return tree;
        }
        if lease.gate.attempts.load(Ordering::Acquire) != seen {
            self.record(CacheOutcome::BuildFailed, &host, started, true);
            return Arc::new(Directory::root());
        }

        let tree = self.rebuild(host_key, &host, started, outcome).await;
        lease.gate.attempts.fetch_add(1, Ordering::Release);
        tree
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, host_key: &str) -> Lookup {
        match self.entries().get(host_key) {
            Some(entry) if entry.built_at.elapsed() < self.ttl => Lookup::Fresh(entry.tree.clone()),
            Some(_) => Lookup::Expired,
            None => Lookup::Unpopulated,
        }
    }

    async fn rebuild(
        &self,
        host_key: &str,
        host: &str,
        started: Instant,
        outcome: CacheOutcome,
    ) -> Arc<Directory> {
        let build_started = Instant::now();
        let result = self.build(host_key).await;
        let build_time = build_started.elapsed();
        self.metrics.observe_tree_build(result.is_ok(), build_time);

        match result {
            Ok(tree) => {
                let tree = Arc::new(tree);
                let built_at = Instant::now();
                self.entries().insert(
                    host_key.to_owned(),
                    CacheEntry {
                        tree: tree.clone(),
                        built_at,
                    },
                );
                tracing::info!(
                    host = %host,
                    nodes = tree.descendant_count(),
                    incomplete = tree.incomplete,
                    build_ms = build_time.as_millis() as u64,
                    "tree rebuilt"
                );
                self.record(outcome, host, started, false);
                tree
            }
            Err(err) => {
                tracing::warn!(host = %host, error = %err, "tree build failed");
                self.record(CacheOutcome::BuildFailed, host, started, false);
                Arc::new(Directory::root())
            }
        }
    }

    async fn build(&self, host_key: &str) -> Result<Directory, FtpError> {
        let credentials = HostCredentials::parse(host_key);
        if credentials.host.trim().is_empty() {
            return Err(FtpError::Connect {
                address: credentials.address(),
                message: "no host given".to_owned(),
            });
        }
        let op_timeout = self.limits.op_timeout;
        let mut session = tokio::time::timeout(op_timeout, self.connector.connect(&credentials))
            .await
            .map_err(|_| FtpError::Timeout(op_timeout))??;
        let tree = build_tree(session.as_mut(), &self.limits).await;
        session.quit().await;
        tree
    }

    fn record(&self, outcome: CacheOutcome, host: &str, started: Instant, coalesced: bool) {
        self.metrics.inc_cache_lookup(outcome);
        tracing::debug!(
            host = %host,
            outcome = outcome.as_str(),
            coalesced,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tree cache lookup"
        );
    }

    fn rebuild_gate<'a>(&'a self, host_key: &'a str) -> GateLease<'a> {
        let gate = self
            .rebuilds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(host_key.to_owned())
            .or_default()
            .clone();
        GateLease {
            rebuilds: &self.rebuilds,
            host_key,
            gate,
        }
    }

    #[cfg(test)]
    fn pending_gates(&self) -> usize {
        self.rebuilds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
