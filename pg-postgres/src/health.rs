//! A minimal per-pool health checker: periodic `SELECT 1`, counters for how
//! many checks ran/passed/failed, and a bounded exponential backoff that
//! lengthens the interval on failure and snaps back to the configured
//! interval on the first success after.
//!
//! This is deliberately dumber than the replica-aware probing in
//! `pg-router`'s health loop (no RTT, no replication lag) — it's meant to
//! be usable standalone against any [`Pool`], router or no router.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::pool::Pool;

#[derive(Debug, Clone, Copy)]
pub struct PoolHealthConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub max_backoff: Duration,
}

impl Default for PoolHealthConfig {
    fn default() -> Self {
        PoolHealthConfig {
            enabled: true,
            interval: Duration::from_secs(1),
            max_backoff: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Default)]
pub struct PoolHealthStats {
    pub iterations: AtomicU64,
    pub ok_checks: AtomicU64,
    pub failed_checks: AtomicU64,
}

impl PoolHealthStats {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.iterations.load(Ordering::Relaxed),
            self.ok_checks.load(Ordering::Relaxed),
            self.failed_checks.load(Ordering::Relaxed),
        )
    }
}

/// Runs a `SELECT 1` against `pool` on a loop, doubling the sleep interval
/// (capped at `config.max_backoff`) after each failure and resetting to
/// `config.interval` after a success.
pub struct PoolHealthChecker {
    pool: Pool,
    config: PoolHealthConfig,
    enabled: AtomicBool,
    stats: PoolHealthStats,
}

impl PoolHealthChecker {
    pub fn new(pool: Pool, config: PoolHealthConfig) -> Self {
        PoolHealthChecker {
            pool,
            enabled: AtomicBool::new(config.enabled),
            config,
            stats: PoolHealthStats::default(),
        }
    }

    pub fn stats(&self) -> &PoolHealthStats {
        &self.stats
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Run forever. Intended to be spawned as a background task; drop the
    /// `JoinHandle` (or abort it) to stop.
    pub async fn run(&self) -> ! {
        let mut next_sleep = self.config.interval;

        loop {
            if !self.enabled.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            self.stats.iterations.fetch_add(1, Ordering::Relaxed);

            match self.pool.acquire().await {
                Ok(mut conn) => match conn.ping().await {
                    Ok(()) => {
                        self.stats.ok_checks.fetch_add(1, Ordering::Relaxed);
                        next_sleep = self.config.interval;
                    }
                    Err(_) => {
                        self.stats.failed_checks.fetch_add(1, Ordering::Relaxed);
                        next_sleep = (next_sleep * 2).min(self.config.max_backoff);
                    }
                },
                Err(_) => {
                    self.stats.failed_checks.fetch_add(1, Ordering::Relaxed);
                    next_sleep = (next_sleep * 2).min(self.config.max_backoff);
                }
            }

            tokio::time::sleep(next_sleep).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_snapshot_starts_at_zero() {
        let stats = PoolHealthStats::default();
        assert_eq!(stats.snapshot(), (0, 0, 0));
    }
}
