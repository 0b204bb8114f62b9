mod establish;
mod executor;
mod stream;

pub mod copy;
pub mod cursor;
pub mod notify;

pub use executor::{ParamValue, QueryResult};
pub use notify::{NotificationMultiplexer, PgListener, PgNotification};
pub use stream::parse_server_version;

use crate::message::{TransactionStatus, Terminate};
use crate::options::PgConnectOptions;
use stream::PgStream;

/// A single logical connection to a PostgreSQL backend.
///
/// Owns exactly one socket and exactly one session's worth of server-side
/// state (transaction status, backend key data, negotiated parameters).
/// Nothing here is shared across tasks; [`crate::pool::Pool`] is what hands
/// connections out and takes them back.
pub struct PgConnection {
    stream: PgStream,
    process_id: u32,
    secret_key: u32,
    transaction_status: TransactionStatus,
    transaction_depth: usize,
    dead: bool,
}

impl PgConnection {
    pub async fn connect(options: &PgConnectOptions) -> crate::Result<Self> {
        match options.connect_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, establish::establish(options)).await {
                Ok(result) => result,
                Err(_) => Err(crate::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "timed out connecting to postgres",
                ))),
            },
            None => establish::establish(options).await,
        }
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn secret_key(&self) -> u32 {
        self.secret_key
    }

    pub fn server_version_num(&self) -> Option<u32> {
        self.stream.server_version_num
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.stream.parameters.get(name).map(String::as_str)
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_status == TransactionStatus::Transaction
            || self.transaction_status == TransactionStatus::Error
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    pub(crate) fn transaction_depth(&self) -> usize {
        self.transaction_depth
    }

    pub(crate) fn set_transaction_depth(&mut self, depth: usize) {
        self.transaction_depth = depth;
    }

    /// Whether a prior operation left this connection's session state
    /// untrustworthy. Callers (the pool, the router) must not reuse a dead
    /// connection; it should be dropped instead of released.
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub(crate) fn mark_dead(&mut self) {
        self.dead = true;
    }

    pub(crate) fn set_transaction_status(&mut self, status: TransactionStatus) {
        self.transaction_status = status;
    }

    pub(crate) fn stream_mut(&mut self) -> &mut PgStream {
        &mut self.stream
    }

    /// A quick, allocation-free round trip used by the pool's health
    /// checker and by idle-connection validation before handing a
    /// connection back out.
    pub async fn ping(&mut self) -> crate::Result<()> {
        self.exec_simple("SELECT 1").await?;
        Ok(())
    }

    /// Send `Terminate` and let the socket close on drop. Use this for a
    /// graceful, server-acknowledged shutdown; prefer [`PgConnection::close_hard`]
    /// when the connection is already known to be in a bad state.
    pub async fn close(mut self) -> crate::Result<()> {
        self.stream.send(&Terminate).await?;
        Ok(())
    }

    /// Drop the socket immediately without sending `Terminate`. Used when
    /// the connection is dead and a graceful shutdown isn't worth the
    /// extra round trip (or isn't safe, e.g. mid-COPY).
    pub fn close_hard(self) {
        drop(self);
    }

    pub fn shrink_buffers(&mut self) {
        self.stream.shrink_buffers();
    }
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection")
            .field("process_id", &self.process_id)
            .field("transaction_status", &self.transaction_status)
            .field("dead", &self.dead)
            .finish()
    }
}
