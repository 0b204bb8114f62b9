/// The leading type byte of a backend message, turned into an enum so match
/// arms read as names instead of byte literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMessageFormat {
    Authentication,
    BackendKeyData,
    ParameterStatus,
    ReadyForQuery,
    RowDescription,
    DataRow,
    CommandComplete,
    ErrorResponse,
    NoticeResponse,
    NotificationResponse,
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    PortalSuspended,
    ParameterDescription,
    EmptyQueryResponse,
    CopyInResponse,
    CopyOutResponse,
    CopyBothResponse,
    CopyData,
    CopyDone,
}

impl BackendMessageFormat {
    pub fn from_u8(b: u8) -> pg_core::Result<Self> {
        use BackendMessageFormat::*;
        Ok(match b {
            b'R' => Authentication,
            b'K' => BackendKeyData,
            b'S' => ParameterStatus,
            b'Z' => ReadyForQuery,
            b'T' => RowDescription,
            b'D' => DataRow,
            b'C' => CommandComplete,
            b'E' => ErrorResponse,
            b'N' => NoticeResponse,
            b'A' => NotificationResponse,
            b'1' => ParseComplete,
            b'2' => BindComplete,
            b'3' => CloseComplete,
            b'n' => NoData,
            b's' => PortalSuspended,
            b't' => ParameterDescription,
            b'I' => EmptyQueryResponse,
            b'G' => CopyInResponse,
            b'H' => CopyOutResponse,
            b'W' => CopyBothResponse,
            b'd' => CopyData,
            b'c' => CopyDone,
            other => {
                return Err(pg_core::err_protocol!(
                    "unknown backend message format: {:?}",
                    other as char
                ))
            }
        })
    }
}
