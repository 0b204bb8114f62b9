//! A single backend in the routing topology: its role, its lazily-built
//! pool, the health stats the probe loop keeps current, and its circuit
//! breaker.

use std::time::{Duration, Instant};

use pg_postgres::{Pool, PgConnectOptions, PoolOptions};

/// Where a node sits in replication. `Archive` and `Maintenance` nodes are
/// never eligible for routing at all; `Analytics` is a replica that's
/// excluded from the default failover ordering (it's never promoted) but
/// still eligible as an ordinary read replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Primary,
    SyncReplica,
    AsyncReplica,
    Analytics,
    Archive,
    Maintenance,
}

impl NodeRole {
    pub fn is_replica(&self) -> bool {
        matches!(
            self,
            NodeRole::SyncReplica | NodeRole::AsyncReplica | NodeRole::Analytics
        )
    }

    /// Whether a node in this role is ever eligible for routing, regardless
    /// of its current health or circuit-breaker state.
    pub fn is_routable_role(&self) -> bool {
        !matches!(self, NodeRole::Archive | NodeRole::Maintenance)
    }

    /// Rank used to build the default failover order when no explicit
    /// ordering is configured: primaries first, then sync replicas, then
    /// async replicas. `Analytics`/`Archive`/`Maintenance` sort last and
    /// play no part in primary failover.
    pub fn failover_rank(&self) -> u8 {
        match self {
            NodeRole::Primary => 0,
            NodeRole::SyncReplica => 1,
            NodeRole::AsyncReplica => 2,
            NodeRole::Analytics | NodeRole::Archive | NodeRole::Maintenance => 3,
        }
    }
}

/// The circuit breaker's three states. A node in `Open` is excluded from
/// routing regardless of its health stats until `cb_until` passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct CircuitBreakerConfig {
    pub quiet_ms: u64,
    pub backoff_ms: u64,
    pub max_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            quiet_ms: 2_000,
            backoff_ms: 5_000,
            max_ms: 60_000,
        }
    }
}

/// Per-node failure detector. `record_success`/`record_failure` are called
/// only from the health probe loop; `is_open` is read (racily but safely —
/// see the module-level concurrency note in `router.rs`) from routing calls.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    until: Instant,
    current_backoff_ms: u64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            current_backoff_ms: config.backoff_ms,
            config,
            state: CircuitState::Closed,
            until: Instant::now(),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether this node is currently ineligible for routing: `Open` and
    /// its quiet period hasn't elapsed yet.
    pub fn is_open(&self, now: Instant) -> bool {
        self.state == CircuitState::Open && now < self.until
    }

    pub fn on_probe_success(&mut self, now: Instant) {
        match self.state {
            CircuitState::Open if now >= self.until => {
                self.state = CircuitState::HalfOpen;
                self.until = now + Duration::from_millis(self.config.backoff_ms);
            }
            CircuitState::HalfOpen if now >= self.until => {
                self.state = CircuitState::Closed;
                self.current_backoff_ms = self.config.backoff_ms;
            }
            _ => {}
        }
    }

    pub fn on_probe_failure(&mut self, now: Instant) {
        match self.state {
            CircuitState::Closed => {
                self.state = CircuitState::Open;
                self.current_backoff_ms = self.config.backoff_ms;
                self.until = now + Duration::from_millis(self.config.quiet_ms);
            }
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.until = now + Duration::from_millis(self.current_backoff_ms);
            }
            CircuitState::Open => {
                self.current_backoff_ms =
                    (self.current_backoff_ms * 2).min(self.config.max_ms);
                self.until = now + Duration::from_millis(self.current_backoff_ms);
            }
        }
    }
}

/// Health stats refreshed by the probe loop: reachability, round-trip
/// latency, and (for replicas) replication lag.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeStats {
    pub healthy: bool,
    pub rtt: Duration,
    pub replay_lag_ms: u64,
    pub lsn_lag: u64,
    pub open_conns: u32,
    pub busy_conns: u32,
}

/// One backend in the routing topology.
pub struct Node {
    pub name: String,
    pub role: NodeRole,
    pub weight: u32,
    pub connect_options: PgConnectOptions,
    pub pool_options: PoolOptions,
    pool: Option<Pool>,
    pub stats: NodeStats,
    pub circuit_breaker: CircuitBreaker,
}

impl Node {
    pub fn new(name: impl Into<String>, role: NodeRole, connect_options: PgConnectOptions) -> Self {
        Node {
            name: name.into(),
            role,
            weight: 1,
            connect_options,
            pool_options: PoolOptions::default(),
            pool: None,
            stats: NodeStats::default(),
            circuit_breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_pool_options(mut self, pool_options: PoolOptions) -> Self {
        self.pool_options = pool_options;
        self
    }

    pub fn pool(&self) -> Option<&Pool> {
        self.pool.as_ref()
    }

    /// Lazily construct this node's pool the first time it's needed.
    /// Constructing a `Pool` never itself connects (connections are opened
    /// on demand by `acquire`), so this can't fail.
    pub fn ensure_pool(&mut self) -> Pool {
        self.pool
            .get_or_insert_with(|| Pool::new(self.connect_options.clone(), self.pool_options.clone()))
            .clone()
    }

    /// Whether this node is currently a candidate for routing at all: its
    /// role permits it and the circuit breaker isn't open.
    pub fn is_usable(&self, now: Instant) -> bool {
        self.role.is_routable_role() && !self.circuit_breaker.is_open(now)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("stats", &self.stats)
            .field("cb_state", &self.circuit_breaker.state())
            .finish()
    }
}
