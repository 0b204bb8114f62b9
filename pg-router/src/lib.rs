//! Replica-aware query router for `pg-postgres`: spreads reads across
//! healthy replicas within a staleness budget, sends writes to the
//! primary, and keeps each node's health and circuit-breaker state current
//! via a background probe loop.
//!
//! This crate only decides *which* [`pg_postgres::Pool`] a request should
//! use; it doesn't wrap queries or own any connections itself.

pub mod health;
pub mod hint;
pub mod node;
pub mod router;

pub use health::{run_health_loop, HealthCheckOptions};
pub use hint::{Consistency, QueryKind, RouteHint, StalenessBudget};
pub use node::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Node, NodeRole, NodeStats};
pub use router::{Router, RouterError};
