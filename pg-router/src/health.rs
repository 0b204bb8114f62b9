//! The health probe loop: periodically pings every usable node, measures
//! RTT, and (for replicas) samples replication lag, feeding the results
//! into each node's [`NodeStats`] and circuit breaker.

use std::time::{Duration, Instant};

use crate::node::NodeRole;
use crate::router::Router;

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct HealthCheckOptions {
    pub interval: Duration,
    /// A replica whose replay lag exceeds this is marked unhealthy even if
    /// it's otherwise reachable.
    pub lag_threshold_ms: u64,
}

impl Default for HealthCheckOptions {
    fn default() -> Self {
        HealthCheckOptions {
            interval: Duration::from_secs(5),
            lag_threshold_ms: 10_000,
        }
    }
}

/// Runs forever, probing every usable node once per `options.interval`.
/// Intended to be spawned as a background task alongside the [`Router`] it
/// updates; cancel by dropping the task (e.g. via `JoinHandle::abort`).
pub async fn run_health_loop(router: &Router, options: HealthCheckOptions) -> ! {
    let mut ticker = tokio::time::interval(options.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        probe_all_nodes(router, &options).await;
    }
}

/// Probe every node once. Exposed separately from [`run_health_loop`] so
/// callers (and tests) can drive a single tick without waiting on the
/// interval.
pub async fn probe_all_nodes(router: &Router, options: &HealthCheckOptions) {
    let node_count = router.nodes_lock().read().await.len();

    for index in 0..node_count {
        let role = {
            let nodes = router.nodes_lock().read().await;
            if index >= nodes.len() {
                continue;
            }
            nodes[index].role
        };
        if !role.is_routable_role() {
            continue;
        }

        let pool = {
            let mut nodes = router.nodes_lock().write().await;
            if index >= nodes.len() {
                continue;
            }
            nodes[index].ensure_pool()
        };

        let outcome = probe_one(&pool, role).await;

        let mut nodes = router.nodes_lock().write().await;
        if index >= nodes.len() {
            continue;
        }
        let node = &mut nodes[index];
        let now = Instant::now();

        match outcome {
            Ok(mut stats) => {
                if role == NodeRole::Primary && stats.replay_lag_ms > 0 {
                    // A primary reporting nonzero replay lag has become a
                    // replica out from under us (failover happened
                    // elsewhere); don't route writes to it.
                    stats.healthy = false;
                }
                if role.is_replica() && stats.replay_lag_ms > options.lag_threshold_ms {
                    stats.healthy = false;
                }
                node.stats = stats;
                node.circuit_breaker.on_probe_success(now);
            }
            Err(_) => {
                node.stats.healthy = false;
                node.circuit_breaker.on_probe_failure(now);
            }
        }
    }
}

async fn probe_one(
    pool: &pg_postgres::Pool,
    role: NodeRole,
) -> pg_postgres::Result<crate::node::NodeStats> {
    let mut conn = pool.acquire().await?;

    let started = Instant::now();
    conn.exec_simple("SELECT 1").await?;
    let rtt = started.elapsed();

    let mut replay_lag_ms = 0u64;
    let mut lsn_lag = 0u64;

    if role.is_replica() {
        let result = conn
            .exec_simple(
                "SELECT \
                    COALESCE(EXTRACT(MILLISECONDS FROM (now() - pg_last_xact_replay_timestamp())), 0), \
                    COALESCE(pg_wal_lsn_diff(pg_last_wal_receive_lsn(), pg_last_wal_replay_lsn()), 0)",
            )
            .await?;
        if let Some(row) = result.rows.first() {
            replay_lag_ms = row
                .try_get::<f64>(0)
                .ok()
                .map(|ms| {
                    // Clamped to a non-negative, already-rounded value; the
                    // only information a truncating cast can lose here is a
                    // magnitude far beyond any real replication lag.
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    {
                        ms.max(0.0).round() as u64
                    }
                })
                .unwrap_or(0);
            lsn_lag = row
                .try_get::<i64>(1)
                .ok()
                .and_then(|v| u64::try_from(v).ok())
                .unwrap_or(0);
        }
    } else {
        // A non-replica reports its own replication lag as zero; the
        // "primary became a replica" check above only fires on a genuine
        // nonzero reading from `pg_last_xact_replay_timestamp()`.
        let result = conn
            .exec_simple("SELECT pg_last_xact_replay_timestamp() IS NOT NULL")
            .await?;
        if let Some(row) = result.rows.first() {
            if row.try_get::<bool>(0).unwrap_or(false) {
                replay_lag_ms = 1;
            }
        }
    }

    let stats_conn_count = pool.stats();

    Ok(crate::node::NodeStats {
        healthy: true,
        rtt,
        replay_lag_ms,
        lsn_lag,
        open_conns: stats_conn_count.live_connections,
        busy_conns: stats_conn_count
            .live_connections
            .saturating_sub(stats_conn_count.idle_connections),
    })
}
