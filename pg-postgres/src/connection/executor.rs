use std::sync::Arc;

use crate::encode::Encode;
use crate::message::{
    Bind, BackendMessageFormat, CommandComplete, DataRow, Describe, Execute, Parse, PgArgument,
    Query, ReadyForQuery, RowDescription, Sync as SyncMessage,
};
use crate::row::{columns_from_fields, ColumnInfo, PgRow};

use super::PgConnection;

/// The outcome of any query: the decoded rows (empty for DDL/DML with no
/// `RETURNING`), the server's own row count from `CommandComplete`, and the
/// raw command tag (`"INSERT 0 3"`, `"BEGIN"`, ...).
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub rows: Vec<PgRow>,
    pub rows_affected: u64,
    pub command_tag: String,
}

impl QueryResult {
    /// Decode every row via [`crate::row::FromRow`], name-matching first and
    /// falling back to positional decoding per row. Stops at the first row
    /// that fails to decode.
    pub fn rows_as<T: crate::row::FromRow>(&self) -> crate::Result<Vec<T>> {
        crate::row::decode_rows(&self.rows)
    }
}

/// Type-erased [`Encode`] value, so `exec_params` can take a heterogeneous
/// parameter list.
pub trait ParamValue {
    fn oid(&self) -> u32;
    fn encode_text(&self) -> Option<String>;
}

impl<T: Encode> ParamValue for T {
    fn oid(&self) -> u32 {
        T::OID
    }

    fn encode_text(&self) -> Option<String> {
        Encode::encode_text(self)
    }
}

impl PgConnection {
    /// Run `sql` over the simple query protocol. Supports multiple
    /// semicolon-separated statements in one round trip, with no parameter
    /// binding; the server interprets all literals in `sql` itself.
    pub async fn exec_simple(&mut self, sql: &str) -> crate::Result<QueryResult> {
        let result = self.exec_simple_inner(sql).await;
        self.mark_dead_if_fatal(&result);
        result
    }

    async fn exec_simple_inner(&mut self, sql: &str) -> crate::Result<QueryResult> {
        let query = Query(sql);
        self.stream_mut().send(&query).await?;
        self.drain_simple_query().await
    }

    /// Drains everything the server sends back for a simple-query exchange,
    /// including the trailing `ReadyForQuery` that follows an `ErrorResponse`.
    /// A non-fatal server error (bad SQL, a constraint violation) still ends
    /// the exchange cleanly; we can't stop at the `ErrorResponse` itself or
    /// the next command on this connection would read the stale RFQ frame
    /// as its own response.
    async fn drain_simple_query(&mut self) -> crate::Result<QueryResult> {
        let mut columns: Arc<[ColumnInfo]> = Arc::from(Vec::<ColumnInfo>::new());
        let mut rows = Vec::new();
        let mut rows_affected = 0u64;
        let mut command_tag = String::new();
        let mut pending_error: Option<crate::error::PgDatabaseError> = None;

        loop {
            let message = self.stream_mut().recv_message_raw().await?;
            match message.format {
                BackendMessageFormat::RowDescription => {
                    let desc: RowDescription = message.decode()?;
                    columns = columns_from_fields(&desc.fields);
                }
                BackendMessageFormat::DataRow => {
                    let data: DataRow = message.decode()?;
                    rows.push(PgRow::from_data_row(columns.clone(), data));
                }
                BackendMessageFormat::CommandComplete => {
                    let cc: CommandComplete = message.decode()?;
                    rows_affected += cc.rows_affected();
                    command_tag = cc.tag;
                }
                BackendMessageFormat::EmptyQueryResponse => {}
                BackendMessageFormat::ErrorResponse => {
                    pending_error = Some(message.decode()?);
                }
                BackendMessageFormat::ReadyForQuery => {
                    let ready: ReadyForQuery = message.decode()?;
                    self.set_transaction_status(ready.transaction_status);
                    break;
                }
                other => {
                    return Err(pg_core::err_protocol!(
                        "unexpected message in simple query response: {:?}",
                        other
                    )
                    .into())
                }
            }
        }

        if let Some(err) = pending_error {
            return Err(err.into());
        }

        Ok(QueryResult {
            rows,
            rows_affected,
            command_tag,
        })
    }

    /// Run `sql` over the extended query protocol with `params` bound as
    /// text-format values. Always uses an unnamed statement and portal and
    /// batches Parse/Bind/Describe/Execute/Sync into a single write: no
    /// statement is ever cached across calls.
    pub async fn exec_params(
        &mut self,
        sql: &str,
        params: &[&dyn ParamValue],
    ) -> crate::Result<QueryResult> {
        let result = self.exec_params_inner(sql, params).await;
        self.mark_dead_if_fatal(&result);
        result
    }

    async fn exec_params_inner(
        &mut self,
        sql: &str,
        params: &[&dyn ParamValue],
    ) -> crate::Result<QueryResult> {
        let param_types: Vec<u32> = params.iter().map(|p| p.oid()).collect();
        let texts: Vec<Option<String>> = params.iter().map(|p| p.encode_text()).collect();
        let args: Vec<PgArgument> = texts
            .iter()
            .map(|t| match t {
                Some(s) => PgArgument::Text(s.as_str()),
                None => PgArgument::Null,
            })
            .collect();

        let mut buf = Vec::new();
        self.stream_mut().write(
            &Parse {
                statement: "",
                query: sql,
                param_types: &param_types,
            },
            &mut buf,
        )?;
        self.stream_mut().write(
            &Bind {
                portal: "",
                statement: "",
                params: &args,
            },
            &mut buf,
        )?;
        self.stream_mut()
            .write(&Describe::Portal(""), &mut buf)?;
        self.stream_mut()
            .write(&Execute { portal: "", limit: 0 }, &mut buf)?;
        self.stream_mut().write(&SyncMessage, &mut buf)?;
        self.stream_mut().send_raw(buf).await?;

        let mut columns: Arc<[ColumnInfo]> = Arc::from(Vec::<ColumnInfo>::new());
        let mut rows = Vec::new();
        let mut rows_affected = 0u64;
        let mut command_tag = String::new();
        let mut pending_error: Option<crate::error::PgDatabaseError> = None;

        // An error at any stage (Parse, Bind, Describe, Execute) makes the
        // server skip straight to processing Sync, so we can't bail out via
        // `?` on the first error we see — we keep reading until the
        // ReadyForQuery that Sync always produces, then surface the error.
        loop {
            let message = self.stream_mut().recv_message_raw().await?;
            match message.format {
                BackendMessageFormat::ParseComplete
                | BackendMessageFormat::BindComplete
                | BackendMessageFormat::NoData => {}
                BackendMessageFormat::RowDescription => {
                    let desc: RowDescription = message.decode()?;
                    columns = columns_from_fields(&desc.fields);
                }
                BackendMessageFormat::DataRow => {
                    let data: DataRow = message.decode()?;
                    rows.push(PgRow::from_data_row(columns.clone(), data));
                }
                BackendMessageFormat::CommandComplete => {
                    let cc: CommandComplete = message.decode()?;
                    rows_affected = cc.rows_affected();
                    command_tag = cc.tag;
                }
                BackendMessageFormat::EmptyQueryResponse => {}
                BackendMessageFormat::PortalSuspended => {}
                BackendMessageFormat::ErrorResponse => {
                    pending_error = Some(message.decode()?);
                }
                BackendMessageFormat::ReadyForQuery => {
                    let ready: ReadyForQuery = message.decode()?;
                    self.set_transaction_status(ready.transaction_status);
                    break;
                }
                other => {
                    return Err(pg_core::err_protocol!(
                        "unexpected message in extended query response: {:?}",
                        other
                    )
                    .into())
                }
            }
        }

        if let Some(err) = pending_error {
            return Err(err.into());
        }

        Ok(QueryResult {
            rows,
            rows_affected,
            command_tag,
        })
    }

    fn mark_dead_if_fatal<T>(&mut self, result: &crate::Result<T>) {
        if let Err(err) = result {
            if err.is_fatal_connection_error() {
                self.mark_dead();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_value_forwards_oid_and_text() {
        let value: i32 = 42;
        let param: &dyn ParamValue = &value;
        assert_eq!(param.oid(), 23);
        assert_eq!(param.encode_text(), Some("42".to_string()));
    }

    #[test]
    fn null_param_has_no_text() {
        let value: Option<i32> = None;
        let param: &dyn ParamValue = &value;
        assert_eq!(param.encode_text(), None);
    }
}
