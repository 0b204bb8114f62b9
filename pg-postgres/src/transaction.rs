//! Transaction façade: `BEGIN`/`COMMIT`/`ROLLBACK` with isolation/read-only/
//! deferrable options, an "emulated autocommit" fast path for read-only
//! non-deferrable transactions, and nested `SAVEPOINT`-based subtransactions.

use crate::connection::{ParamValue, PgConnection, QueryResult};
use crate::ident::quote_ident;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionOptions {
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
    pub deferrable: bool,
}

impl TransactionOptions {
    pub fn read_only() -> Self {
        TransactionOptions {
            read_only: true,
            ..Default::default()
        }
    }

    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    pub fn deferrable(mut self) -> Self {
        self.deferrable = true;
        self
    }

    /// A read-only, non-deferrable transaction never needs a real
    /// `BEGIN`/`COMMIT` pair: every statement in it already runs in its own
    /// implicit, internally-consistent snapshot, so the façade can skip the
    /// round trip entirely.
    fn can_emulate(&self) -> bool {
        self.read_only && !self.deferrable
    }
}

fn build_begin_sql(opts: &TransactionOptions) -> String {
    let mut sql = String::from("BEGIN");
    if let Some(level) = opts.isolation {
        sql.push_str(" ISOLATION LEVEL ");
        sql.push_str(match level {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        });
    }
    sql.push_str(if opts.read_only {
        " READ ONLY"
    } else {
        " READ WRITE"
    });
    if opts.deferrable {
        sql.push_str(" DEFERRABLE");
    }
    sql
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
    RolledBack,
}

impl PgConnection {
    pub async fn begin(&mut self) -> crate::Result<Transaction<'_>> {
        self.begin_with(TransactionOptions::default()).await
    }

    pub async fn begin_with(&mut self, opts: TransactionOptions) -> crate::Result<Transaction<'_>> {
        let emulated = opts.can_emulate();
        if !emulated {
            let sql = build_begin_sql(&opts);
            // No `Transaction` exists yet to mark the connection dead via
            // `Drop` if `BEGIN` fails, so do it here directly: the session's
            // transaction state is ambiguous either way (in or out of a
            // block, depending on exactly when the failure happened).
            if let Err(err) = self.exec_simple(&sql).await {
                self.mark_dead();
                return Err(err);
            }
            self.set_transaction_depth(1);
        }
        Ok(Transaction {
            conn: self,
            state: TxState::Active,
            emulated,
            savepoint_seq: 0,
        })
    }
}

/// Exactly one of `commit`/`rollback`/`abort` moves a transaction to a
/// terminal state; dropping it while still active marks the underlying
/// connection dead, since there's no way to issue the matching `ROLLBACK`
/// from a synchronous `Drop`.
pub struct Transaction<'a> {
    conn: &'a mut PgConnection,
    state: TxState,
    emulated: bool,
    savepoint_seq: u32,
}

impl<'a> Transaction<'a> {
    pub async fn query(&mut self, sql: &str) -> crate::Result<QueryResult> {
        self.ensure_active()?;
        let result = self.conn.exec_simple(sql).await;
        self.observe(result)
    }

    pub async fn query_params(
        &mut self,
        sql: &str,
        params: &[&dyn ParamValue],
    ) -> crate::Result<QueryResult> {
        self.ensure_active()?;
        let result = self.conn.exec_params(sql, params).await;
        self.observe(result)
    }

    /// On a non-fatal error (e.g. a deferred-constraint violation surfacing
    /// only at `COMMIT`), the connection already rolled the transaction back
    /// itself and is fine to reuse; only a fatal connection error leaves the
    /// session unrecoverable. Either way the transaction ends up rolled back,
    /// not committed, so `state` always moves to a terminal value here —
    /// never leave it `Active`, or `Drop` will kill a perfectly good
    /// connection underneath a non-fatal error.
    pub async fn commit(mut self) -> crate::Result<()> {
        self.ensure_active()?;
        if self.emulated {
            self.state = TxState::Committed;
            return Ok(());
        }
        let result = self.conn.exec_simple("COMMIT").await;
        self.conn.set_transaction_depth(0);
        match result {
            Ok(_) => {
                self.state = TxState::Committed;
                Ok(())
            }
            Err(err) => {
                self.state = TxState::RolledBack;
                Err(err)
            }
        }
    }

    pub async fn rollback(mut self) -> crate::Result<()> {
        self.ensure_active()?;
        if self.emulated {
            self.state = TxState::RolledBack;
            return Ok(());
        }
        let result = self.conn.exec_simple("ROLLBACK").await;
        self.conn.set_transaction_depth(0);
        self.state = TxState::RolledBack;
        result.map(|_| ())
    }

    /// Same as [`rollback`][Self::rollback]; provided for callers that want
    /// to make an unconditional abort read distinctly from a "normal"
    /// rollback at the call site.
    pub async fn abort(self) -> crate::Result<()> {
        self.rollback().await
    }

    pub async fn savepoint(&mut self) -> crate::Result<Subtransaction<'_, 'a>> {
        self.ensure_active()?;
        self.savepoint_seq += 1;
        let name = format!("savepoint_{}", self.savepoint_seq);
        self.conn
            .exec_simple(&format!("SAVEPOINT {}", quote_ident(&name)))
            .await?;
        Ok(Subtransaction {
            parent: self,
            name,
            state: TxState::Active,
        })
    }

    fn ensure_active(&self) -> crate::Result<()> {
        if self.state != TxState::Active {
            return Err(crate::Error::InvalidArgument(
                "transaction has already been committed or rolled back".into(),
            ));
        }
        Ok(())
    }

    fn observe<T>(&mut self, result: crate::Result<T>) -> crate::Result<T> {
        if let Err(err) = &result {
            if err.is_fatal_connection_error() {
                self.conn.mark_dead();
                self.state = TxState::RolledBack;
            }
        }
        result
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TxState::Active && !self.emulated {
            self.conn.mark_dead();
        }
    }
}

/// A `SAVEPOINT`-scoped nested transaction. A fatal error inside a
/// subtransaction invalidates its parent too, since the connection's
/// session state (and thus every savepoint above it) is no longer
/// trustworthy.
pub struct Subtransaction<'p, 'a> {
    parent: &'p mut Transaction<'a>,
    name: String,
    state: TxState,
}

impl Subtransaction<'_, '_> {
    pub async fn query(&mut self, sql: &str) -> crate::Result<QueryResult> {
        self.ensure_active()?;
        let result = self.parent.conn.exec_simple(sql).await;
        self.observe(result)
    }

    pub async fn query_params(
        &mut self,
        sql: &str,
        params: &[&dyn ParamValue],
    ) -> crate::Result<QueryResult> {
        self.ensure_active()?;
        let result = self.parent.conn.exec_params(sql, params).await;
        self.observe(result)
    }

    pub async fn release(mut self) -> crate::Result<()> {
        self.ensure_active()?;
        let sql = format!("RELEASE SAVEPOINT {}", quote_ident(&self.name));
        let result = self.parent.conn.exec_simple(&sql).await;
        match result {
            Ok(_) => {
                self.state = TxState::Committed;
                Ok(())
            }
            Err(err) => {
                self.state = TxState::RolledBack;
                if err.is_fatal_connection_error() {
                    self.parent.state = TxState::RolledBack;
                }
                Err(err)
            }
        }
    }

    pub async fn rollback(mut self) -> crate::Result<()> {
        self.ensure_active()?;
        let sql = format!("ROLLBACK TO SAVEPOINT {}", quote_ident(&self.name));
        let result = self.parent.conn.exec_simple(&sql).await;
        self.state = TxState::RolledBack;
        if let Err(err) = &result {
            if err.is_fatal_connection_error() {
                self.parent.state = TxState::RolledBack;
            }
        }
        result.map(|_| ())
    }

    fn ensure_active(&self) -> crate::Result<()> {
        if self.state != TxState::Active {
            return Err(crate::Error::InvalidArgument(
                "subtransaction has already been released or rolled back".into(),
            ));
        }
        Ok(())
    }

    fn observe<T>(&mut self, result: crate::Result<T>) -> crate::Result<T> {
        if let Err(err) = &result {
            if err.is_fatal_connection_error() {
                self.parent.conn.mark_dead();
                self.state = TxState::RolledBack;
                self.parent.state = TxState::RolledBack;
            }
        }
        result
    }
}

impl Drop for Subtransaction<'_, '_> {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            self.parent.conn.mark_dead();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_begin_has_no_modifiers() {
        assert_eq!(build_begin_sql(&TransactionOptions::default()), "BEGIN READ WRITE");
    }

    #[test]
    fn read_only_deferrable_is_not_emulated() {
        let opts = TransactionOptions::read_only().deferrable();
        assert!(!opts.can_emulate());
        assert_eq!(build_begin_sql(&opts), "BEGIN READ ONLY DEFERRABLE");
    }

    #[test]
    fn read_only_non_deferrable_is_emulated() {
        let opts = TransactionOptions::read_only();
        assert!(opts.can_emulate());
    }

    #[test]
    fn isolation_level_is_rendered_before_access_mode() {
        let opts = TransactionOptions::default().isolation(IsolationLevel::Serializable);
        assert_eq!(
            build_begin_sql(&opts),
            "BEGIN ISOLATION LEVEL SERIALIZABLE READ WRITE"
        );
    }
}
