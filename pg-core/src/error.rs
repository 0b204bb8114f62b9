use std::io;

/// Transport-level failures: anything below the protocol's own error frames.
///
/// Protocol-level errors (a server `ErrorResponse`, a malformed row) are not
/// represented here; they belong to the driver crate that knows the wire
/// format. This type only covers the socket/codec layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("error communicating with the server: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(Box<dyn std::error::Error + Send + Sync>),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("invalid connection string: {0}")]
    InvalidConnectString(String),
}

impl Error {
    pub fn tls(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Tls(Box::new(e))
    }
}
