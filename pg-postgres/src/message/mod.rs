//! Typed encode/decode for PostgreSQL wire protocol v3 messages.
//!
//! Frontend messages implement [`FrontendMessage`] and know how to serialize
//! themselves (header included); backend messages implement
//! [`BackendMessage`] and are decoded on demand from a [`ReceivedMessage`]
//! once the caller knows, from `format`, which type to expect.

mod backend;
pub(crate) mod codec;
mod format;
mod frontend;

pub use backend::{
    Authentication, BackendKeyData, BackendMessage, BindComplete, CloseComplete, CommandComplete,
    CopyData as BackendCopyData, CopyDone as BackendCopyDone, CopyInResponse, CopyOutResponse,
    CopyResponseData, DataRow, EmptyQueryResponse, FieldDescription, Md5PasswordBody, NoData,
    Notice, Notification, ParameterDescription, ParameterStatus, ParseComplete, PortalSuspended,
    ReadyForQuery, ReceivedMessage, RowDescription, SaslBody, TransactionStatus,
};
pub use codec::PostgresCodec;
pub use format::BackendMessageFormat;
pub use frontend::{
    Bind, Close, CopyData, CopyDone, CopyFail, Describe, Execute, FrontendMessage, Parse,
    Password, PgArgument, Query, Startup, Sync, Terminate,
};
