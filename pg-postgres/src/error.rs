use std::borrow::Cow;
use std::fmt;

/// Coarse outcome classification for every fallible operation in this crate.
///
/// Mirrors the small, closed set of failure modes a caller needs to branch
/// on (is this worth retrying? is the connection still usable?) without
/// having to pattern-match on SQLSTATE strings for the common cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgErrorCode {
    Ok,
    InvalidFuture,
    ConnectionClosed,
    SocketReadFailed,
    ProtocolCorrupt,
    ParserTruncatedField,
    ParserTruncatedRow,
    ParserTruncatedHeader,
    ServerError,
    AuthFailed,
    AwaitCanceled,
    TooManyConnections,
    Unknown,
}

impl fmt::Display for PgErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PgErrorCode::Ok => "OK",
            PgErrorCode::InvalidFuture => "InvalidFuture",
            PgErrorCode::ConnectionClosed => "ConnectionClosed",
            PgErrorCode::SocketReadFailed => "SocketReadFailed",
            PgErrorCode::ProtocolCorrupt => "ProtocolCorrupt",
            PgErrorCode::ParserTruncatedField => "ParserTruncatedField",
            PgErrorCode::ParserTruncatedRow => "ParserTruncatedRow",
            PgErrorCode::ParserTruncatedHeader => "ParserTruncatedHeader",
            PgErrorCode::ServerError => "ServerError",
            PgErrorCode::AuthFailed => "AuthFailed",
            PgErrorCode::AwaitCanceled => "AwaitCanceled",
            PgErrorCode::TooManyConnections => "TooManyConnections",
            PgErrorCode::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// A coarse bucket for a server `SQLSTATE`, used for quick branching
/// (retry-worthy vs. not) without parsing the five-character code at every
/// call site. See [`classify_sqlstate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgSqlStateClass {
    None,
    ConnectionError,
    SyntaxError,
    UndefinedObject,
    ConstraintViolation,
    UniqueViolation,
    CheckViolation,
    NotNullViolation,
    ForeignKeyViolation,
    Deadlock,
    SerializationFailure,
    PrivilegeError,
    DataException,
    TransactionState,
    InternalError,
    Other,
}

/// Classify a five-character `SQLSTATE` into a [`PgSqlStateClass`].
///
/// The specific constraint-violation codes (`23505`/`23502`/`23503`/`23514`)
/// are checked before the generic `23*` class so that callers that only care
/// about "was this a unique-violation" don't have to re-derive it from the
/// raw code.
pub fn classify_sqlstate(code: &str) -> PgSqlStateClass {
    if code.len() < 2 {
        return PgSqlStateClass::Other;
    }

    match code {
        "23505" => return PgSqlStateClass::UniqueViolation,
        "23502" => return PgSqlStateClass::NotNullViolation,
        "23503" => return PgSqlStateClass::ForeignKeyViolation,
        "23514" => return PgSqlStateClass::CheckViolation,
        "40001" => return PgSqlStateClass::SerializationFailure,
        "40P01" => return PgSqlStateClass::Deadlock,
        "42P01" => return PgSqlStateClass::UndefinedObject,
        "42501" => return PgSqlStateClass::PrivilegeError,
        _ => {}
    }

    match &code[..2] {
        "08" => PgSqlStateClass::ConnectionError,
        "23" => PgSqlStateClass::ConstraintViolation,
        "42" => PgSqlStateClass::SyntaxError,
        "22" => PgSqlStateClass::DataException,
        "25" | "40" => PgSqlStateClass::TransactionState,
        "28" => PgSqlStateClass::PrivilegeError,
        "XX" => PgSqlStateClass::InternalError,
        _ => PgSqlStateClass::Other,
    }
}

/// Structured fields pulled out of a server `ErrorResponse`/`NoticeResponse`.
#[derive(Debug, Clone, Default)]
pub struct PgErrorDetail {
    pub severity: String,
    pub sqlstate: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub category: PgSqlStateClass,
}

impl Default for PgSqlStateClass {
    fn default() -> Self {
        PgSqlStateClass::None
    }
}

/// A decoded Postgres `ErrorResponse`.
#[derive(Debug, Clone)]
pub struct PgDatabaseError {
    pub detail: PgErrorDetail,
}

impl PgDatabaseError {
    pub fn from_fields(fields: Vec<(u8, String)>) -> Self {
        let mut detail = PgErrorDetail::default();
        for (code, value) in fields {
            match code {
                b'S' => detail.severity = value,
                b'C' => {
                    detail.category = classify_sqlstate(&value);
                    detail.sqlstate = value;
                }
                b'M' => detail.message = value,
                b'D' => detail.detail = Some(value),
                b'H' => detail.hint = Some(value),
                _ => {}
            }
        }
        PgDatabaseError { detail }
    }

    pub fn code(&self) -> Option<Cow<'_, str>> {
        if self.detail.sqlstate.is_empty() {
            None
        } else {
            Some(Cow::Borrowed(self.detail.sqlstate.as_str()))
        }
    }

    pub fn message(&self) -> &str {
        &self.detail.message
    }
}

impl fmt::Display for PgDatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {}",
            self.detail.severity, self.detail.sqlstate, self.detail.message
        )
    }
}

impl std::error::Error for PgDatabaseError {}

const FATAL_PHRASES: &[&str] = &[
    "another command is already in progress",
    "could not receive data from server",
    "server closed the connection unexpectedly",
];

/// Whether a failure on this connection must be treated as fatal: the
/// session state is no longer trustworthy and the connection must be
/// dropped rather than reused.
pub fn is_fatal_connection_error(err: &Error) -> bool {
    match err {
        Error::Io(_) | Error::Core(pg_core::Error::ConnectionClosed) => true,
        Error::Core(pg_core::Error::Io(_)) => true,
        Error::Database(db) => FATAL_PHRASES.iter().any(|p| db.message().contains(p)),
        _ => false,
    }
}

/// The crate-wide error type. Every public fallible operation returns
/// `Result<T, Error>`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] pg_core::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Database(#[from] PgDatabaseError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("pool exhausted: too many connections (cap reached, retries exhausted)")]
    TooManyConnections,

    #[error("operation was cancelled")]
    Cancelled,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Configuration(String),
}

impl Error {
    pub fn code(&self) -> PgErrorCode {
        match self {
            Error::Core(pg_core::Error::ConnectionClosed) => PgErrorCode::ConnectionClosed,
            Error::Core(pg_core::Error::Io(_)) => PgErrorCode::SocketReadFailed,
            Error::Io(_) => PgErrorCode::SocketReadFailed,
            Error::ConnectionClosed => PgErrorCode::ConnectionClosed,
            Error::Protocol(_) => PgErrorCode::ProtocolCorrupt,
            Error::Database(_) => PgErrorCode::ServerError,
            Error::AuthFailed(_) => PgErrorCode::AuthFailed,
            Error::Cancelled => PgErrorCode::AwaitCanceled,
            Error::TooManyConnections => PgErrorCode::TooManyConnections,
            _ => PgErrorCode::Unknown,
        }
    }

    pub fn is_fatal_connection_error(&self) -> bool {
        is_fatal_connection_error(self)
    }
}

#[macro_export]
macro_rules! err_protocol {
    ($($args:tt)*) => {
        $crate::error::Error::Protocol(format!($($args)*))
    };
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_specific_constraint_codes_before_generic() {
        assert_eq!(classify_sqlstate("23505"), PgSqlStateClass::UniqueViolation);
        assert_eq!(classify_sqlstate("23999"), PgSqlStateClass::ConstraintViolation);
        assert_eq!(classify_sqlstate("40001"), PgSqlStateClass::SerializationFailure);
        assert_eq!(classify_sqlstate("40P01"), PgSqlStateClass::Deadlock);
        assert_eq!(classify_sqlstate("40000"), PgSqlStateClass::TransactionState);
        assert_eq!(classify_sqlstate("08006"), PgSqlStateClass::ConnectionError);
        assert_eq!(classify_sqlstate("42P01"), PgSqlStateClass::UndefinedObject);
        assert_eq!(classify_sqlstate("42601"), PgSqlStateClass::SyntaxError);
        assert_eq!(classify_sqlstate("XX000"), PgSqlStateClass::InternalError);
        assert_eq!(classify_sqlstate("zz"), PgSqlStateClass::Other);
    }

    #[test]
    fn detects_fatal_phrases_in_database_errors() {
        let err = Error::Database(PgDatabaseError::from_fields(vec![
            (b'S', "FATAL".into()),
            (b'C', "08006".into()),
            (
                b'M',
                "server closed the connection unexpectedly".into(),
            ),
        ]));
        assert!(err.is_fatal_connection_error());
    }
}
