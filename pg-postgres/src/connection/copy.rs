//! `COPY ... FROM STDIN` / `COPY ... TO STDOUT` streaming.

use bytes::Bytes;

use crate::message::{
    BackendCopyData, BackendCopyDone, BackendMessageFormat, CommandComplete,
    CopyData as FrontendCopyData, CopyDone as FrontendCopyDone, CopyFail, CopyInResponse,
    CopyOutResponse, Query, ReadyForQuery,
};

use super::PgConnection;

/// `int32` frame length field minus the 4-byte length itself and the 1-byte
/// format tag, leaving headroom so a single `CopyData` chunk never needs
/// the server to reassemble it.
pub const PG_COPY_MAX_DATA_LEN: usize = 0x3fff_ffff - 1 - 4;

/// A `COPY ... FROM STDIN` in progress. Every chunk passed to [`send`] is
/// split on [`PG_COPY_MAX_DATA_LEN`] boundaries; call [`finish`] to commit or
/// [`abort`] to cancel with a server-visible reason.
///
/// [`send`]: PgCopyIn::send
/// [`finish`]: PgCopyIn::finish
/// [`abort`]: PgCopyIn::abort
pub struct PgCopyIn<'a> {
    conn: &'a mut PgConnection,
    response: CopyInResponse,
    finished: bool,
}

impl PgConnection {
    pub async fn copy_in_start(&mut self, copy_statement: &str) -> crate::Result<PgCopyIn<'_>> {
        self.stream_mut().send(&Query(copy_statement)).await?;
        let message = self.stream_mut().recv_message().await?;
        let response: CopyInResponse = message.decode()?;
        Ok(PgCopyIn {
            conn: self,
            response,
            finished: false,
        })
    }

    pub async fn copy_out_start(&mut self, copy_statement: &str) -> crate::Result<PgCopyOut<'_>> {
        self.stream_mut().send(&Query(copy_statement)).await?;
        let message = self.stream_mut().recv_message().await?;
        let response: CopyOutResponse = message.decode()?;
        Ok(PgCopyOut {
            conn: self,
            response,
            done: false,
        })
    }
}

impl PgCopyIn<'_> {
    pub fn is_textual(&self) -> bool {
        self.response.0.format == 0
    }

    pub fn num_columns(&self) -> usize {
        usize::try_from(self.response.0.num_columns).unwrap_or(0)
    }

    pub async fn send(&mut self, data: &[u8]) -> crate::Result<()> {
        for chunk in data.chunks(PG_COPY_MAX_DATA_LEN) {
            self.conn.stream_mut().send(&FrontendCopyData(chunk)).await?;
        }
        Ok(())
    }

    pub async fn finish(mut self) -> crate::Result<u64> {
        self.conn.stream_mut().send(&FrontendCopyDone).await?;
        let cc: CommandComplete = self.conn.stream_mut().recv_expect().await?;
        let ready: ReadyForQuery = self.conn.stream_mut().recv_expect().await?;
        self.conn.set_transaction_status(ready.transaction_status);
        self.finished = true;
        Ok(cc.rows_affected())
    }

    /// Cancel the COPY, surfacing `reason` to the server (and, typically,
    /// to whatever issued the `COPY` statement). The server always answers
    /// a `CopyFail` with an `ErrorResponse` (SQLSTATE `57014`); that specific
    /// error is swallowed here since it's the expected acknowledgement, not
    /// a real failure.
    pub async fn abort(mut self, reason: impl Into<String>) -> crate::Result<()> {
        self.conn
            .stream_mut()
            .send(&CopyFail::new(reason))
            .await?;

        match self.conn.stream_mut().recv_message().await {
            Err(crate::Error::Database(db)) if db.detail.sqlstate == "57014" => {}
            Err(e) => return Err(e),
            Ok(_) => {}
        }

        let ready: ReadyForQuery = self.conn.stream_mut().recv_expect().await?;
        self.conn.set_transaction_status(ready.transaction_status);
        self.finished = true;
        Ok(())
    }
}

impl Drop for PgCopyIn<'_> {
    fn drop(&mut self) {
        // Can't await a CopyFail round trip from Drop; the connection's
        // session state (mid-COPY) is no longer trustworthy, so mark it
        // dead rather than let the pool hand out a half-finished COPY.
        if !self.finished {
            self.conn.mark_dead();
        }
    }
}

pub struct PgCopyOut<'a> {
    conn: &'a mut PgConnection,
    response: CopyOutResponse,
    done: bool,
}

impl PgCopyOut<'_> {
    pub fn is_textual(&self) -> bool {
        self.response.0.format == 0
    }

    pub fn num_columns(&self) -> usize {
        usize::try_from(self.response.0.num_columns).unwrap_or(0)
    }

    /// Read the next chunk of the server's output, or `None` once the COPY
    /// has finished (at which point the connection is ready for the next
    /// statement).
    pub async fn next_chunk(&mut self) -> crate::Result<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }

        let message = self.conn.stream_mut().recv_message().await?;
        match message.format {
            BackendMessageFormat::CopyData => {
                let data: BackendCopyData = message.decode()?;
                Ok(Some(data.0))
            }
            BackendMessageFormat::CopyDone => {
                let _: BackendCopyDone = message.decode()?;
                let _: CommandComplete = self.conn.stream_mut().recv_expect().await?;
                let ready: ReadyForQuery = self.conn.stream_mut().recv_expect().await?;
                self.conn.set_transaction_status(ready.transaction_status);
                self.done = true;
                Ok(None)
            }
            other => Err(pg_core::err_protocol!(
                "unexpected message during COPY OUT: {:?}",
                other
            )
            .into()),
        }
    }
}
