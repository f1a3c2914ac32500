use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Prune stale windows once the table grows past this many clients.
const PRUNE_THRESHOLD: usize = 10_000;

/// Per-client admission limiter using a fixed window.
pub struct AdmissionRateLimiter {
    /// ip -> (count, window_start)
    entries: DashMap<IpAddr, (u32, Instant)>,
    limit: u32,
    window: Duration,
}

impl AdmissionRateLimiter {
    pub fn new(limit: u32, window_secs: u64) -> Self {
        Self {
            entries: DashMap::new(),
            limit,
            window: Duration::from_secs(window_secs),
        }
    }

    /// Check if an admission is allowed. Returns Ok(()) or Err with retry-after seconds.
    /// A limit of zero disables limiting.
    pub fn check(&self, ip: IpAddr) -> Result<(), u64> {
        if self.limit == 0 {
            return Ok(());
        }

        if self.entries.len() > PRUNE_THRESHOLD {
            self.cleanup(self.window);
        }

        let now = Instant::now();
        let mut entry = self.entries.entry(ip).or_insert((0, now));
        let (count, start) = entry.value_mut();

        if now.duration_since(*start) > self.window {
            *count = 1;
            *start = now;
            return Ok(());
        }

        if *count >= self.limit {
            let elapsed = now.duration_since(*start).as_secs();
            return Err(self.window.as_secs().saturating_sub(elapsed).max(1));
        }

        *count += 1;
        Ok(())
    }

    pub fn tracked_clients(&self) -> usize {
        self.entries.len()
    }

    /// Remove entries whose window started more than `max_age` ago.
    pub fn cleanup(&self, max_age: Duration) {
        let now = Instant::now();
        self.entries.retain(|_, (_, start)| now.duration_since(*start) < max_age);
    }
}
