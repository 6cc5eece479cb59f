//! Transaction control.
//!
//! [`Transaction`] handles borrow their connection for their lifetime.
//! Nested handles generate savepoints named `__pg_savepoint_<depth>__`;
//! committing a nested handle releases its savepoint, rolling back rolls
//! back to and releases it.
//!
//! The closure form [`Connection::tx`] commits on normal exit and rolls
//! back on error exit. If the block failed on the server, the commit is
//! refused and a distinct state error is raised instead of letting the
//! server's implicit rollback pass silently.

use crate::connection::Connection;
use crate::error::{Error, Result};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    /// READ COMMITTED
    ReadCommitted,
    /// REPEATABLE READ
    RepeatableRead,
    /// SERIALIZABLE
    Serializable,
}

impl Isolation {
    fn sql(self) -> &'static str {
        match self {
            Isolation::ReadCommitted => "READ COMMITTED",
            Isolation::RepeatableRead => "REPEATABLE READ",
            Isolation::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options for starting a transaction block.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionConfig {
    /// Isolation level; server default when unset
    pub isolation: Option<Isolation>,
    /// READ ONLY / READ WRITE
    pub read_only: Option<bool>,
    /// DEFERRABLE / NOT DEFERRABLE
    pub deferrable: Option<bool>,
}

impl TransactionConfig {
    fn begin_sql(&self) -> String {
        let mut sql = String::from("BEGIN");
        if let Some(isolation) = self.isolation {
            sql.push_str(" ISOLATION LEVEL ");
            sql.push_str(isolation.sql());
        }
        if let Some(read_only) = self.read_only {
            sql.push_str(if read_only { " READ ONLY" } else { " READ WRITE" });
        }
        if let Some(deferrable) = self.deferrable {
            sql.push_str(if deferrable {
                " DEFERRABLE"
            } else {
                " NOT DEFERRABLE"
            });
        }
        sql
    }
}

fn savepoint_name(depth: u32) -> String {
    format!("__pg_savepoint_{}__", depth)
}

impl Connection {
    /// Begin a transaction block (or a savepoint when one is already open).
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        self.transaction_with(TransactionConfig::default())
    }

    /// Begin with explicit isolation/access options. Options only apply to
    /// the outermost block; savepoints ignore them.
    pub fn transaction_with(&mut self, config: TransactionConfig) -> Result<Transaction<'_>> {
        let depth = self.begin_block(&config)?;
        Ok(Transaction {
            conn: self,
            depth,
            done: false,
        })
    }

    fn begin_block(&mut self, config: &TransactionConfig) -> Result<u32> {
        if self.txn_depth == 0 {
            self.simple_query(&config.begin_sql())?;
            self.txn_depth = 1;
            Ok(0)
        } else {
            let depth = self.txn_depth;
            self.simple_query(&format!("SAVEPOINT {}", savepoint_name(depth)))?;
            self.txn_depth += 1;
            Ok(depth)
        }
    }

    /// Run `f` inside a transaction scope: begin on entry, commit on normal
    /// exit, roll back on error exit.
    ///
    /// If the server reports a failed block on normal exit, the commit is
    /// refused: the block is rolled back and a state error is returned.
    pub fn tx<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let depth = self.begin_block(&TransactionConfig::default())?;
        match f(self) {
            Ok(value) => {
                commit_at(self, depth)?;
                Ok(value)
            }
            Err(err) => {
                let _ = rollback_at(self, depth);
                Err(err)
            }
        }
    }
}

fn commit_at(conn: &mut Connection, depth: u32) -> Result<()> {
    if depth == 0 {
        if conn.in_failed_block() {
            conn.simple_query("ROLLBACK")?;
            conn.txn_depth = 0;
            return Err(Error::State(
                "transaction block failed; commit refused and block rolled back".into(),
            ));
        }
        conn.simple_query("COMMIT")?;
        conn.txn_depth = 0;
        Ok(())
    } else {
        if conn.in_failed_block() {
            return Err(Error::State(
                "transaction block failed; release refused, roll back the savepoint".into(),
            ));
        }
        conn.simple_query(&format!("RELEASE SAVEPOINT {}", savepoint_name(depth)))?;
        conn.txn_depth = depth;
        Ok(())
    }
}

fn rollback_at(conn: &mut Connection, depth: u32) -> Result<()> {
    if depth == 0 {
        conn.simple_query("ROLLBACK")?;
        conn.txn_depth = 0;
    } else {
        let name = savepoint_name(depth);
        conn.simple_query(&format!(
            "ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0}",
            name
        ))?;
        conn.txn_depth = depth;
    }
    Ok(())
}

/// An open transaction block or savepoint scope.
///
/// Dropping an unfinished handle rolls its scope back, best-effort.
pub struct Transaction<'c> {
    conn: &'c mut Connection,
    depth: u32,
    done: bool,
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("depth", &self.depth)
            .field("done", &self.done)
            .finish()
    }
}

impl<'c> Transaction<'c> {
    /// The connection, for running statements inside the scope.
    pub fn conn(&mut self) -> &mut Connection {
        self.conn
    }

    /// Nesting depth: 0 for the outermost block, savepoint depth otherwise.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Open a nested scope backed by a savepoint.
    pub fn savepoint(&mut self) -> Result<Transaction<'_>> {
        let depth = self.conn.txn_depth;
        self.conn
            .simple_query(&format!("SAVEPOINT {}", savepoint_name(depth)))?;
        self.conn.txn_depth += 1;
        Ok(Transaction {
            conn: &mut *self.conn,
            depth,
            done: false,
        })
    }

    /// Commit (outermost) or release the savepoint (nested).
    ///
    /// Inside a failed block the commit is refused with a state error; the
    /// outermost handle rolls the block back first.
    pub fn commit(mut self) -> Result<()> {
        self.done = true;
        commit_at(self.conn, self.depth)
    }

    /// Roll back this scope.
    pub fn rollback(mut self) -> Result<()> {
        self.done = true;
        rollback_at(self.conn, self.depth)
    }

}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.done || self.conn.is_closed() {
            return;
        }
        if let Err(e) = rollback_at(self.conn, self.depth) {
            tracing::warn!("rollback on drop failed: {}", e);
        }
    }
}
