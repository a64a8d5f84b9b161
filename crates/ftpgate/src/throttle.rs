use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_MAX_RATE: u64 = 20 * 1024 * 1024;

/// Paces a byte stream so its average rate since the first byte never exceeds the cap.
#[derive(Debug)]
pub struct RateLimiter {
    bytes_per_sec: u64,
    started: Option<Instant>,
    sent: u64,
}

impl RateLimiter {
    /// `bytes_per_sec == 0` disables pacing.
    pub fn new(bytes_per_sec: u64) -> Self {
        Self {
            bytes_per_sec,
            started: None,
            sent: 0,
        }
    }

    /// Account for `len` bytes about to be forwarded and wait until forwarding them keeps the
    /// average at or below the cap.
    pub async fn consume(&mut self, len: usize) {
        if self.bytes_per_sec == 0 {
            return;
        }
        let started = *self.started.get_or_insert_with(Instant::now);
        self.sent = self.sent.saturating_add(len as u64);

        let earliest = started + self.budget_time(self.sent);
        if earliest > Instant::now() {
            tokio::time::sleep_until(earliest).await;
        }
    }

    /// Time it takes to send `bytes` at exactly the cap.
    fn budget_time(&self, bytes: u64) -> Duration {
        let nanos = u128::from(bytes) * 1_000_000_000 / u128::from(self.bytes_per_sec);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}
