//! The replica-aware router: picks a [`Pool`] for a request given its
//! [`RouteHint`], replica health, and circuit-breaker state.

use std::time::Instant;

use pg_postgres::transaction::{IsolationLevel, TransactionOptions};
use pg_postgres::Pool;
use tokio::sync::RwLock;

use crate::hint::{Consistency, QueryKind, RouteHint};
use crate::node::{Node, NodeRole};

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("no usable node available for this request")]
    NoUsableNode,
}

/// Holds the routing topology (a primary plus zero or more replicas) and
/// decides which node's pool serves a given request.
///
/// Node stats and circuit-breaker state are written only by
/// [`crate::health::run_health_loop`]; `route`/`route_for_tx` only read
/// them. Staleness between a write and a subsequent read is tolerated —
/// the circuit breaker is built to ride out transient mis-classification,
/// and a routing decision based on a few-hundred-millisecond-old RTT
/// sample is never wrong enough to matter.
pub struct Router {
    nodes: RwLock<Vec<Node>>,
    /// Indices into `nodes`, in the order primary-pick and any-usable
    /// fallback scan them. Either an explicit `primary_failover` name list
    /// or, absent that, nodes ranked by [`NodeRole::failover_rank`].
    failover_order: Vec<usize>,
}

impl Router {
    /// Build a router with the default failover order: nodes ranked
    /// primary, then sync replicas, then async replicas (ties keep their
    /// original relative order).
    pub fn new(nodes: Vec<Node>) -> Self {
        let mut order: Vec<usize> = (0..nodes.len()).collect();
        order.sort_by_key(|&i| nodes[i].role.failover_rank());
        Router {
            nodes: RwLock::new(nodes),
            failover_order: order,
        }
    }

    /// Build a router with an explicit primary-failover order given by node
    /// name. Names not found in `nodes` are skipped; nodes not named here
    /// are appended afterward in their default rank order, so every node
    /// is still reachable as a fallback.
    pub fn with_failover_order(nodes: Vec<Node>, primary_failover: &[String]) -> Self {
        let mut order = Vec::with_capacity(nodes.len());
        for name in primary_failover {
            if let Some(i) = nodes.iter().position(|n| &n.name == name) {
                order.push(i);
            }
        }
        let mut rest: Vec<usize> = (0..nodes.len()).filter(|i| !order.contains(i)).collect();
        rest.sort_by_key(|&i| nodes[i].role.failover_rank());
        order.extend(rest);

        Router {
            nodes: RwLock::new(nodes),
            failover_order: order,
        }
    }

    pub(crate) fn nodes_lock(&self) -> &RwLock<Vec<Node>> {
        &self.nodes
    }

    /// Route directly to a named node, bypassing the hint-based decision
    /// table. Fails if the node doesn't exist, isn't in a routable role, or
    /// its circuit breaker is open.
    pub async fn pin(&self, node_name: &str) -> Result<Pool, RouterError> {
        let now = Instant::now();
        let mut nodes = self.nodes.write().await;
        nodes
            .iter_mut()
            .find(|n| n.name == node_name && n.is_usable(now))
            .map(|n| n.ensure_pool())
            .ok_or(RouterError::NoUsableNode)
    }

    /// Route a plain query by its [`RouteHint`]. See the module docs for the
    /// decision table this implements.
    pub async fn route(&self, hint: &RouteHint) -> Result<Pool, RouterError> {
        let now = Instant::now();
        let mut nodes = self.nodes.write().await;

        if hint.forces_primary() {
            if let Some(pool) = pool_for_role(&mut nodes[..], NodeRole::Primary, now) {
                return Ok(pool);
            }
            return self.any_usable_pool(&mut nodes[..], now);
        }

        if matches!(hint.kind, QueryKind::Read | QueryKind::LongRead)
            && matches!(hint.consistency, Consistency::BoundedStaleness | Consistency::Eventual)
        {
            if let Some(pool) = best_replica_pool(&mut nodes[..], hint, now) {
                return Ok(pool);
            }
            if let Some(pool) = pool_for_role(&mut nodes[..], NodeRole::Primary, now) {
                return Ok(pool);
            }
            return self.any_usable_pool(&mut nodes[..], now);
        }

        self.any_usable_pool(&mut nodes[..], now)
    }

    /// Walk `failover_order`, returning the pool of the first usable node.
    /// This is the fallback path for both `route` and `route_for_tx` once
    /// role- and staleness-aware selection has failed to find a candidate.
    fn pool_in_failover_order(&self, nodes: &mut [Node], now: Instant) -> Option<Pool> {
        self.failover_order
            .iter()
            .find(|&&i| nodes[i].is_usable(now))
            .map(|&i| nodes[i].ensure_pool())
    }

    /// Route a transaction by its [`TransactionOptions`]. `Serializable`
    /// always forces the primary; a deferrable read-only transaction
    /// prefers the synchronous replica with the least lag (it's the
    /// closest thing to a read-consistent snapshot without paying for the
    /// primary); everything else falls back to the hint's own consistency.
    pub async fn route_for_tx(
        &self,
        opts: &TransactionOptions,
        hint: &RouteHint,
    ) -> Result<Pool, RouterError> {
        if opts.isolation == Some(IsolationLevel::Serializable) {
            let now = Instant::now();
            let mut nodes = self.nodes.write().await;
            if let Some(pool) = pool_for_role(&mut nodes[..], NodeRole::Primary, now) {
                return Ok(pool);
            }
            return self.any_usable_pool(&mut nodes[..], now);
        }

        if opts.read_only && opts.deferrable {
            let now = Instant::now();
            let mut nodes = self.nodes.write().await;
            if let Some(pool) = least_lag_sync_replica_pool(&mut nodes[..], now) {
                return Ok(pool);
            }
            if let Some(pool) = pool_for_role(&mut nodes[..], NodeRole::Primary, now) {
                return Ok(pool);
            }
            return self.any_usable_pool(&mut nodes[..], now);
        }

        self.route(hint).await
    }

    fn any_usable_pool(
        &self,
        nodes: &mut [Node],
        now: Instant,
    ) -> Result<Pool, RouterError> {
        self.pool_in_failover_order(nodes, now)
            .ok_or(RouterError::NoUsableNode)
    }
}

fn pool_for_role(nodes: &mut [Node], role: NodeRole, now: Instant) -> Option<Pool> {
    nodes
        .iter_mut()
        .find(|n| n.role == role && n.is_usable(now) && n.stats.healthy)
        .map(|n| n.ensure_pool())
}

/// Filter replicas eligible under the hint's consistency, then tie-break by
/// lower RTT, then higher weight.
fn best_replica_pool(nodes: &mut [Node], hint: &RouteHint, now: Instant) -> Option<Pool> {
    let best_index = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.role.is_replica() && n.is_usable(now) && n.stats.healthy)
        .filter(|(_, n)| eligible_under_staleness(n, hint))
        .max_by(|(_, a), (_, b)| {
            // Lower RTT wins, so compare in reverse; ties broken by higher weight.
            b.stats
                .rtt
                .cmp(&a.stats.rtt)
                .then(a.weight.cmp(&b.weight))
        })
        .map(|(i, _)| i)?;

    Some(nodes[best_index].ensure_pool())
}

fn eligible_under_staleness(node: &Node, hint: &RouteHint) -> bool {
    if hint.consistency != Consistency::BoundedStaleness {
        return true;
    }
    if node.stats.replay_lag_ms > hint.staleness.max_ms {
        return false;
    }
    if hint.staleness.max_lsn_lag > 0 && node.stats.lsn_lag > hint.staleness.max_lsn_lag {
        return false;
    }
    true
}

fn least_lag_sync_replica_pool(nodes: &mut [Node], now: Instant) -> Option<Pool> {
    let best_index = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.role == NodeRole::SyncReplica && n.is_usable(now) && n.stats.healthy)
        .min_by_key(|(_, n)| n.stats.replay_lag_ms)
        .map(|(i, _)| i)?;

    Some(nodes[best_index].ensure_pool())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{CircuitBreaker, CircuitBreakerConfig, CircuitState, NodeStats};
    use pg_postgres::PgConnectOptions;
    use std::time::Duration;

    fn node(name: &str, role: NodeRole, healthy: bool, rtt_ms: u64) -> Node {
        let mut n = Node::new(name, role, PgConnectOptions::default());
        n.stats = NodeStats {
            healthy,
            rtt: Duration::from_millis(rtt_ms),
            ..Default::default()
        };
        n
    }

    #[tokio::test]
    async fn write_hint_routes_to_primary() {
        let router = Router::new(vec![
            node("primary", NodeRole::Primary, true, 1),
            node("replica1", NodeRole::AsyncReplica, true, 1),
        ]);
        let pool = router.route(&RouteHint::write()).await;
        assert!(pool.is_ok());
    }

    #[tokio::test]
    async fn eventual_read_prefers_lower_rtt_replica() {
        let nodes = {
            let mut nodes = self::test_nodes();
            nodes[1].stats.rtt = Duration::from_millis(50);
            nodes[2].stats.rtt = Duration::from_millis(5);
            nodes
        };
        let router = Router::new(nodes);
        let pool = router.route(&RouteHint::read()).await.unwrap();
        // Both replica pools are newly constructed Arcs; comparing identity
        // isn't meaningful here directly, so assert via stats snapshot
        // instead by re-deriving which node would win.
        let guard = router.nodes_lock().read().await;
        let winner = guard
            .iter()
            .filter(|n| n.role.is_replica())
            .min_by_key(|n| n.stats.rtt)
            .unwrap();
        assert_eq!(winner.name, "replica_fast");
        drop(pool);
    }

    #[tokio::test]
    async fn bounded_staleness_excludes_lagging_replica() {
        let mut nodes = test_nodes();
        nodes[1].stats.replay_lag_ms = 500; // replica_slow (kept name below)
        nodes[2].stats.replay_lag_ms = 50;
        let router = Router::new(nodes);
        let hint = RouteHint::bounded_staleness(150);
        let _pool = router.route(&hint).await.unwrap();
        let guard = router.nodes_lock().read().await;
        let eligible: Vec<_> = guard
            .iter()
            .filter(|n| n.role.is_replica() && eligible_under_staleness(n, &hint))
            .map(|n| n.name.clone())
            .collect();
        assert_eq!(eligible, vec!["replica_fast"]);
    }

    #[tokio::test]
    async fn open_circuit_breaker_excludes_node_from_routing() {
        let mut nodes = test_nodes();
        nodes[0].circuit_breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
        nodes[0].circuit_breaker.on_probe_failure(Instant::now());
        assert_eq!(nodes[0].circuit_breaker.state(), CircuitState::Open);
        let router = Router::new(nodes);
        // Primary is open, no fallback replica satisfies forces_primary, so
        // the write hint must fall back to "any usable pool" (a replica).
        let pool = router.route(&RouteHint::write()).await;
        assert!(pool.is_ok());
    }

    fn test_nodes() -> Vec<Node> {
        vec![
            node("primary", NodeRole::Primary, true, 1),
            node("replica_slow", NodeRole::AsyncReplica, true, 50),
            node("replica_fast", NodeRole::AsyncReplica, true, 5),
        ]
    }

    #[tokio::test]
    async fn pin_targets_named_node_directly() {
        let router = Router::new(test_nodes());
        let pool = router.pin("replica_slow").await;
        assert!(pool.is_ok());
        assert!(router.pin("no-such-node").await.is_err());
    }

    #[tokio::test]
    async fn pin_rejects_node_with_open_circuit_breaker() {
        let mut nodes = test_nodes();
        nodes[1].circuit_breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
        nodes[1].circuit_breaker.on_probe_failure(Instant::now());
        let router = Router::new(nodes);
        assert!(router.pin("replica_slow").await.is_err());
    }

    #[tokio::test]
    async fn explicit_failover_order_is_honored_over_role_rank() {
        // Named order puts replica_slow ahead of the primary; with the
        // primary's circuit open, the fallback path should reach for
        // replica_slow first, not replica_fast.
        let mut nodes = test_nodes();
        nodes[0].circuit_breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
        nodes[0].circuit_breaker.on_probe_failure(Instant::now());
        let router = Router::with_failover_order(
            nodes,
            &["replica_slow".to_string(), "primary".to_string()],
        );
        assert_eq!(router.failover_order[0], 1); // replica_slow's index
        let pool = router.route(&RouteHint::write()).await;
        assert!(pool.is_ok());
    }
}
