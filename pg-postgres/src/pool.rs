//! A fixed-capacity connection pool: a lock-free idle queue backing an
//! async counting semaphore for back-pressure, with bounded retry on
//! connect failure and CAS-guarded growth of the live connection count.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use event_listener::Event;

use crate::connection::PgConnection;
use crate::options::PgConnectOptions;

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_retries: u32,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            max_connections: 10,
            min_connections: 0,
            connect_retries: 20,
        }
    }
}

/// A simple async counting semaphore: `acquire` waits for a permit to be
/// available, `release` returns one and wakes a waiter. Built on
/// `event-listener` rather than a channel so releasing never allocates.
struct Semaphore {
    permits: AtomicU32,
    event: Event,
}

impl Semaphore {
    fn new(permits: u32) -> Self {
        Semaphore {
            permits: AtomicU32::new(permits),
            event: Event::new(),
        }
    }

    async fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }

            let listener = self.event.listen();

            if self.try_acquire() {
                return;
            }

            listener.await;
        }
    }

    fn try_acquire(&self) -> bool {
        loop {
            let current = self.permits.load(Ordering::Acquire);
            if current == 0 {
                return false;
            }
            if self
                .permits
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn release(&self) {
        self.permits.fetch_add(1, Ordering::AcqRel);
        self.event.notify(1);
    }
}

#[derive(Debug, Default)]
struct RawHealthStats {
    connects_succeeded: AtomicU64,
    connects_failed: AtomicU64,
    connections_marked_dead: AtomicU64,
}

/// A point-in-time snapshot of [`Pool`]'s connection lifecycle counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthStats {
    pub connects_succeeded: u64,
    pub connects_failed: u64,
    pub connections_marked_dead: u64,
    pub live_connections: u32,
    pub idle_connections: u32,
}

struct PoolInner {
    options: PoolOptions,
    connect_options: PgConnectOptions,
    idle: ArrayQueue<PgConnection>,
    live_count: AtomicU32,
    semaphore: Semaphore,
    stats: RawHealthStats,
}

#[derive(Clone)]
pub struct Pool(Arc<PoolInner>);

impl Pool {
    pub fn new(connect_options: PgConnectOptions, options: PoolOptions) -> Self {
        let cap = usize::try_from(options.max_connections.max(1)).unwrap_or(usize::MAX);
        Pool(Arc::new(PoolInner {
            semaphore: Semaphore::new(options.max_connections.max(1)),
            idle: ArrayQueue::new(cap),
            live_count: AtomicU32::new(0),
            options,
            connect_options,
            stats: RawHealthStats::default(),
        }))
    }

    pub fn stats(&self) -> HealthStats {
        HealthStats {
            connects_succeeded: self.0.stats.connects_succeeded.load(Ordering::Relaxed),
            connects_failed: self.0.stats.connects_failed.load(Ordering::Relaxed),
            connections_marked_dead: self.0.stats.connections_marked_dead.load(Ordering::Relaxed),
            live_connections: self.0.live_count.load(Ordering::Relaxed),
            idle_connections: u32::try_from(self.0.idle.len()).unwrap_or(u32::MAX),
        }
    }

    /// Wait for a permit, hand back an idle connection if one's available,
    /// otherwise open a fresh one (retried up to `connect_retries` times).
    pub async fn acquire(&self) -> crate::Result<PooledConnection> {
        self.0.semaphore.acquire().await;

        if let Some(conn) = self.0.idle.pop() {
            return Ok(PooledConnection {
                pool: self.clone(),
                conn: Some(conn),
            });
        }

        match self.connect_new().await {
            Ok(conn) => Ok(PooledConnection {
                pool: self.clone(),
                conn: Some(conn),
            }),
            Err(e) => {
                // Give the permit back; we never got to spend it on a
                // connection the caller can use.
                self.0.semaphore.release();
                Err(e)
            }
        }
    }

    async fn connect_new(&self) -> crate::Result<PgConnection> {
        if !self.reserve_slot() {
            return Err(crate::Error::TooManyConnections);
        }

        let attempts = self.0.options.connect_retries.max(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            match PgConnection::connect(&self.0.connect_options).await {
                Ok(conn) => {
                    self.0.stats.connects_succeeded.fetch_add(1, Ordering::Relaxed);
                    return Ok(conn);
                }
                Err(e) => {
                    self.0.stats.connects_failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(attempt, error = %e, "pool connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        self.0.live_count.fetch_sub(1, Ordering::AcqRel);
        Err(last_err.unwrap_or(crate::Error::TooManyConnections))
    }

    fn reserve_slot(&self) -> bool {
        loop {
            let current = self.0.live_count.load(Ordering::Acquire);
            if current >= self.0.options.max_connections {
                return false;
            }
            if self
                .0
                .live_count
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn release(&self, conn: PgConnection) {
        if conn.is_dead() || conn.in_transaction() {
            self.0.stats.connections_marked_dead.fetch_add(1, Ordering::Relaxed);
            self.0.live_count.fetch_sub(1, Ordering::AcqRel);
            drop(conn);
            self.0.semaphore.release();
            return;
        }

        let mut conn = conn;
        conn.shrink_buffers();

        if let Err(dropped) = self.0.idle.push(conn) {
            drop(dropped);
            self.0.live_count.fetch_sub(1, Ordering::AcqRel);
        }

        self.0.semaphore.release();
    }

    /// Drop every currently idle connection, sending `Terminate` on each.
    /// Connections checked out at the time of the call close when they're
    /// next released or dropped.
    pub async fn close(&self) {
        while let Some(conn) = self.0.idle.pop() {
            self.0.live_count.fetch_sub(1, Ordering::AcqRel);
            let _ = conn.close().await;
        }
    }
}

/// An RAII handle to a checked-out connection; releases it back to the
/// pool (or discards it, if dead) on drop.
pub struct PooledConnection {
    pool: Pool,
    conn: Option<PgConnection>,
}

impl std::ops::Deref for PooledConnection {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        self.conn.as_ref().expect("connection taken before drop")
    }
}

impl std::ops::DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut PgConnection {
        self.conn.as_mut().expect("connection taken before drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn semaphore_blocks_past_capacity_and_wakes_on_release() {
        let sem = Semaphore::new(1);
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        sem.release();
        assert!(sem.try_acquire());
    }
}
