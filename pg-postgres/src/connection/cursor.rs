//! Server-side cursors (`DECLARE` / `FETCH` / `CLOSE`), always `NO SCROLL`.
//!
//! A cursor only lives for the duration of a transaction, so `declare`
//! opens one (via `BEGIN`) on the caller's behalf and `close` closes the
//! cursor and commits it; there's no standalone cursor outside a
//! transaction in this façade.

use crate::ident::quote_ident;
use crate::row::PgRow;

use super::PgConnection;

pub struct PgCursor<'a> {
    conn: &'a mut PgConnection,
    name: String,
    exhausted: bool,
    closed: bool,
}

impl PgConnection {
    /// Begin a transaction, declare a forward-only cursor over `query`
    /// bound to `name`. [`PgCursor::close`] closes the cursor and commits
    /// the transaction that was opened here.
    pub async fn cursor_declare(&mut self, name: &str, query: &str) -> crate::Result<PgCursor<'_>> {
        self.exec_simple("BEGIN").await?;
        self.set_transaction_depth(1);

        let ident = quote_ident(name);
        let sql = format!("DECLARE {ident} NO SCROLL CURSOR FOR {query}");
        if let Err(e) = self.exec_simple(&sql).await {
            self.mark_dead();
            return Err(e);
        }

        Ok(PgCursor {
            conn: self,
            name: ident,
            exhausted: false,
            closed: false,
        })
    }
}

impl PgCursor<'_> {
    /// Fetch up to `count` rows. The second element of the tuple is `true`
    /// once fewer than `count` rows came back, meaning the cursor is
    /// exhausted and further calls will return an empty batch.
    pub async fn fetch(&mut self, count: u32) -> crate::Result<(Vec<PgRow>, bool)> {
        if self.exhausted {
            return Ok((Vec::new(), true));
        }

        let sql = format!("FETCH {count} FROM {}", self.name);
        let result = self.conn.exec_simple(&sql).await?;
        let done = (result.rows.len() as u64) < u64::from(count);
        if done {
            self.exhausted = true;
        }
        Ok((result.rows, done))
    }

    /// Close the cursor and commit the transaction opened by
    /// [`PgConnection::cursor_declare`].
    pub async fn close(mut self) -> crate::Result<()> {
        let close_sql = format!("CLOSE {}", self.name);
        self.conn.exec_simple(&close_sql).await?;
        self.conn.exec_simple("COMMIT").await?;
        self.conn.set_transaction_depth(0);
        self.closed = true;
        Ok(())
    }
}

impl Drop for PgCursor<'_> {
    fn drop(&mut self) {
        // The caller abandoned the cursor without closing it; the
        // transaction it opened is still active on the connection with no
        // way to roll it back from here, so treat the session as unusable.
        if !self.closed {
            self.conn.mark_dead();
        }
    }
}
