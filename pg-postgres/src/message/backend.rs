use bytes::{Buf, Bytes};

use super::codec::{get_bytes, get_cstr};
use super::format::BackendMessageFormat;
use crate::error::PgDatabaseError;

/// A message read off the wire, still in its raw, un-typed form.
///
/// Call [`ReceivedMessage::decode`] to interpret `contents` as a specific
/// [`BackendMessage`] once the caller knows (from `format`) which one to
/// expect.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub format: BackendMessageFormat,
    pub contents: Bytes,
}

impl ReceivedMessage {
    pub fn decode<T: BackendMessage>(&self) -> crate::Result<T> {
        if self.format != T::FORMAT {
            return Err(crate::err_protocol!(
                "expected {:?}, got {:?}",
                T::FORMAT,
                self.format
            ));
        }
        T::decode_body(self.contents.clone())
    }
}

pub trait BackendMessage: Sized {
    const FORMAT: BackendMessageFormat;

    fn decode_body(buf: Bytes) -> crate::Result<Self>;
}

#[derive(Debug, Clone)]
pub enum Authentication {
    Ok,
    CleartextPassword,
    Md5Password(Md5PasswordBody),
    Sasl(SaslBody),
    SaslContinue(Bytes),
    SaslFinal(Bytes),
}

#[derive(Debug, Clone)]
pub struct Md5PasswordBody {
    pub salt: [u8; 4],
}

#[derive(Debug, Clone)]
pub struct SaslBody {
    pub mechanisms: Vec<String>,
}

impl BackendMessage for Authentication {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::Authentication;

    fn decode_body(mut buf: Bytes) -> crate::Result<Self> {
        let variant = buf.get_i32();
        Ok(match variant {
            0 => Authentication::Ok,
            3 => Authentication::CleartextPassword,
            5 => {
                let mut salt = [0u8; 4];
                salt.copy_from_slice(&get_bytes(&mut buf, 4)?);
                Authentication::Md5Password(Md5PasswordBody { salt })
            }
            10 => {
                let mut mechanisms = Vec::new();
                loop {
                    let m = get_cstr(&mut buf)?;
                    if m.is_empty() {
                        break;
                    }
                    mechanisms.push(m);
                }
                Authentication::Sasl(SaslBody { mechanisms })
            }
            11 => Authentication::SaslContinue(buf),
            12 => Authentication::SaslFinal(buf),
            other => {
                return Err(crate::err_protocol!(
                    "unsupported authentication variant: {other}"
                ))
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct BackendKeyData {
    pub process_id: u32,
    pub secret_key: u32,
}

impl BackendMessage for BackendKeyData {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::BackendKeyData;

    fn decode_body(mut buf: Bytes) -> crate::Result<Self> {
        Ok(BackendKeyData {
            process_id: buf.get_u32(),
            secret_key: buf.get_u32(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ParameterStatus {
    pub name: String,
    pub value: String,
}

impl BackendMessage for ParameterStatus {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::ParameterStatus;

    fn decode_body(mut buf: Bytes) -> crate::Result<Self> {
        Ok(ParameterStatus {
            name: get_cstr(&mut buf)?,
            value: get_cstr(&mut buf)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Idle,
    Transaction,
    Error,
}

#[derive(Debug, Clone)]
pub struct ReadyForQuery {
    pub transaction_status: TransactionStatus,
}

impl BackendMessage for ReadyForQuery {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::ReadyForQuery;

    fn decode_body(mut buf: Bytes) -> crate::Result<Self> {
        let status = buf.get_u8();
        let transaction_status = match status {
            b'I' => TransactionStatus::Idle,
            b'T' => TransactionStatus::Transaction,
            b'E' => TransactionStatus::Error,
            other => {
                return Err(crate::err_protocol!(
                    "unexpected transaction status: {:?}",
                    other as char
                ))
            }
        };
        Ok(ReadyForQuery { transaction_status })
    }
}

#[derive(Debug, Clone)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: u32,
    pub column_attr: u16,
    pub type_oid: u32,
    pub type_len: i16,
    pub type_modifier: i32,
    pub format: i16,
}

#[derive(Debug, Clone)]
pub struct RowDescription {
    pub fields: Vec<FieldDescription>,
}

impl BackendMessage for RowDescription {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::RowDescription;

    fn decode_body(mut buf: Bytes) -> crate::Result<Self> {
        let count = buf.get_i16();
        let mut fields = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
        for _ in 0..count {
            fields.push(FieldDescription {
                name: get_cstr(&mut buf)?,
                table_oid: buf.get_u32(),
                column_attr: buf.get_u16(),
                type_oid: buf.get_u32(),
                type_len: buf.get_i16(),
                type_modifier: buf.get_i32(),
                format: buf.get_i16(),
            });
        }
        Ok(RowDescription { fields })
    }
}

#[derive(Debug, Clone)]
pub struct DataRow {
    pub values: Vec<Option<Bytes>>,
}

impl BackendMessage for DataRow {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::DataRow;

    fn decode_body(mut buf: Bytes) -> crate::Result<Self> {
        let count = buf.get_i16();
        let mut values = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
        for _ in 0..count {
            let len = buf.get_i32();
            if len < 0 {
                values.push(None);
            } else {
                values.push(Some(get_bytes(&mut buf, usize::try_from(len).unwrap_or(0))?));
            }
        }
        Ok(DataRow { values })
    }
}

#[derive(Debug, Clone)]
pub struct CommandComplete {
    pub tag: String,
}

impl CommandComplete {
    /// Parse the trailing row count off a command tag, e.g. `INSERT 0 3` or
    /// `UPDATE 5`. Tags with no trailing count (`BEGIN`, `CREATE TABLE`)
    /// yield `0`.
    pub fn rows_affected(&self) -> u64 {
        self.tag
            .rsplit(' ')
            .next()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0)
    }
}

impl BackendMessage for CommandComplete {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::CommandComplete;

    fn decode_body(mut buf: Bytes) -> crate::Result<Self> {
        Ok(CommandComplete {
            tag: get_cstr(&mut buf)?,
        })
    }
}

fn parse_fields(mut buf: Bytes) -> crate::Result<Vec<(u8, String)>> {
    let mut fields = Vec::new();
    loop {
        let code = buf.get_u8();
        if code == 0 {
            break;
        }
        fields.push((code, get_cstr(&mut buf)?));
    }
    Ok(fields)
}

impl BackendMessage for PgDatabaseError {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::ErrorResponse;

    fn decode_body(buf: Bytes) -> crate::Result<Self> {
        Ok(PgDatabaseError::from_fields(parse_fields(buf)?))
    }
}

/// A `NoticeResponse` carries the same field grammar as an `ErrorResponse`
/// but is informational (e.g. a `NOTICE` raised by `RAISE` in PL/pgSQL).
#[derive(Debug, Clone)]
pub struct Notice {
    pub error: PgDatabaseError,
}

impl BackendMessage for Notice {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::NoticeResponse;

    fn decode_body(buf: Bytes) -> crate::Result<Self> {
        Ok(Notice {
            error: PgDatabaseError::from_fields(parse_fields(buf)?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub process_id: u32,
    pub channel: String,
    pub payload: String,
}

impl BackendMessage for Notification {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::NotificationResponse;

    fn decode_body(mut buf: Bytes) -> crate::Result<Self> {
        Ok(Notification {
            process_id: buf.get_u32(),
            channel: get_cstr(&mut buf)?,
            payload: get_cstr(&mut buf)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ParseComplete;

impl BackendMessage for ParseComplete {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::ParseComplete;
    fn decode_body(_buf: Bytes) -> crate::Result<Self> {
        Ok(ParseComplete)
    }
}

#[derive(Debug, Clone)]
pub struct BindComplete;

impl BackendMessage for BindComplete {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::BindComplete;
    fn decode_body(_buf: Bytes) -> crate::Result<Self> {
        Ok(BindComplete)
    }
}

#[derive(Debug, Clone)]
pub struct CloseComplete;

impl BackendMessage for CloseComplete {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::CloseComplete;
    fn decode_body(_buf: Bytes) -> crate::Result<Self> {
        Ok(CloseComplete)
    }
}

#[derive(Debug, Clone)]
pub struct NoData;

impl BackendMessage for NoData {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::NoData;
    fn decode_body(_buf: Bytes) -> crate::Result<Self> {
        Ok(NoData)
    }
}

#[derive(Debug, Clone)]
pub struct EmptyQueryResponse;

impl BackendMessage for EmptyQueryResponse {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::EmptyQueryResponse;
    fn decode_body(_buf: Bytes) -> crate::Result<Self> {
        Ok(EmptyQueryResponse)
    }
}

#[derive(Debug, Clone)]
pub struct PortalSuspended;

impl BackendMessage for PortalSuspended {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::PortalSuspended;
    fn decode_body(_buf: Bytes) -> crate::Result<Self> {
        Ok(PortalSuspended)
    }
}

#[derive(Debug, Clone)]
pub struct ParameterDescription {
    pub types: Vec<u32>,
}

impl BackendMessage for ParameterDescription {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::ParameterDescription;

    fn decode_body(mut buf: Bytes) -> crate::Result<Self> {
        let count = buf.get_i16();
        let mut types = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
        for _ in 0..count {
            types.push(buf.get_u32());
        }
        Ok(ParameterDescription { types })
    }
}

#[derive(Debug, Clone)]
pub struct CopyResponseData {
    pub format: i8,
    pub num_columns: i16,
    pub format_codes: Vec<i16>,
}

fn decode_copy_response(mut buf: Bytes) -> crate::Result<CopyResponseData> {
    let format = buf.get_i8();
    let num_columns = buf.get_i16();
    let mut format_codes = Vec::with_capacity(usize::try_from(num_columns).unwrap_or(0));
    for _ in 0..num_columns {
        format_codes.push(buf.get_i16());
    }
    Ok(CopyResponseData {
        format,
        num_columns,
        format_codes,
    })
}

#[derive(Debug, Clone)]
pub struct CopyInResponse(pub CopyResponseData);

impl BackendMessage for CopyInResponse {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::CopyInResponse;
    fn decode_body(buf: Bytes) -> crate::Result<Self> {
        Ok(CopyInResponse(decode_copy_response(buf)?))
    }
}

#[derive(Debug, Clone)]
pub struct CopyOutResponse(pub CopyResponseData);

impl BackendMessage for CopyOutResponse {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::CopyOutResponse;
    fn decode_body(buf: Bytes) -> crate::Result<Self> {
        Ok(CopyOutResponse(decode_copy_response(buf)?))
    }
}

#[derive(Debug, Clone)]
pub struct CopyData(pub Bytes);

impl BackendMessage for CopyData {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::CopyData;
    fn decode_body(buf: Bytes) -> crate::Result<Self> {
        Ok(CopyData(buf))
    }
}

#[derive(Debug, Clone)]
pub struct CopyDone;

impl BackendMessage for CopyDone {
    const FORMAT: BackendMessageFormat = BackendMessageFormat::CopyDone;
    fn decode_body(_buf: Bytes) -> crate::Result<Self> {
        Ok(CopyDone)
    }
}
