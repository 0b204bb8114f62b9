//! Asynchronous PostgreSQL client: wire protocol v3, a single-connection
//! driver, a bounded connection pool, a row decoder, and a transaction
//! façade with savepoint-scoped subtransactions.
//!
//! `pg-postgres` speaks to exactly one backend at a time; spreading work
//! across a primary and its replicas, health probing, and circuit breaking
//! live one layer up in `pg-router`.

pub mod connection;
pub mod encode;
pub mod error;
pub mod health;
pub mod ident;
pub mod message;
pub mod options;
pub mod pool;
pub mod row;
mod sasl;
pub mod transaction;

pub use connection::{
    NotificationMultiplexer, ParamValue, PgConnection, PgListener, PgNotification, QueryResult,
};
pub use error::{Error, PgDatabaseError, PgErrorCode, PgErrorDetail, PgSqlStateClass, Result};
pub use health::{PoolHealthChecker, PoolHealthConfig, PoolHealthStats};
pub use options::PgConnectOptions;
pub use pool::{Pool, PoolOptions, PooledConnection};
pub use row::PgRow;
pub use transaction::{IsolationLevel, Subtransaction, Transaction, TransactionOptions};
