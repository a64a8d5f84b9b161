use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_GRANT_TTL: Duration = Duration::from_secs(30 * 60);

/// Remembers which client IPs may download, and since when.
///
/// A grant is valid for `ttl` after it was last refreshed. Expired grants are dropped the next
/// time they are checked; there is no background sweep.
#[derive(Debug)]
pub struct DownloadAuthorizer {
    ttl: Duration,
    grants: Mutex<HashMap<IpAddr, Instant>>,
}

impl DownloadAuthorizer {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            grants: Mutex::new(HashMap::new()),
        }
    }

    fn grants(&self) -> MutexGuard<'_, HashMap<IpAddr, Instant>> {
        self.grants.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Grant (or refresh) download permission for `ip`.
    pub fn grant(&self, ip: IpAddr) {
        self.grants().insert(ip, Instant::now());
    }

    pub fn check(&self, ip: IpAddr) -> bool {
        let mut grants = self.grants();
        match grants.get(&ip) {
            Some(granted_at) if granted_at.elapsed() < self.ttl => true,
            Some(_) => {
                grants.remove(&ip);
                false
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.grants().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DownloadAuthorizer {
    fn default() -> Self {
        Self::new(DEFAULT_GRANT_TTL)
    }
}
