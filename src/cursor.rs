//! Scrollable WITH HOLD cursors.
//!
//! A [`Cursor`] wraps a server-side `DECLARE ... SCROLL CURSOR WITH HOLD`
//! and moves over it with `FETCH`/`MOVE`. Because it is declared WITH HOLD,
//! the cursor outlives its creating transaction.
//!
//! The [`Direction`] flag sets the presentation order of fetched slices:
//! forward presents rows in ascending cursor order, backward in descending
//! order, so a reversed-order query with a backward cursor yields the same
//! slice contents as the forward original for the same seek/read pair.

use std::sync::Arc;

use crate::connection::{Connection, quote_ident};
use crate::error::{Error, Result};
use crate::row::{Column, Row};
use crate::value::Value;

/// Scan direction for cursor reads, and presentation order of the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending cursor order
    #[default]
    Forward,
    /// Descending cursor order
    Backward,
}

impl Direction {
    fn keyword(self) -> &'static str {
        match self {
            Direction::Forward => "FORWARD",
            Direction::Backward => "BACKWARD",
        }
    }
}

/// Origin for [`Cursor::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Offset from before the first row
    Absolute,
    /// Offset from the current position
    Relative,
    /// Offset back from after the last row
    FromEnd,
}

/// A scrollable WITH HOLD cursor.
#[derive(Debug)]
pub struct Cursor {
    conn_id: u64,
    name: String,
    direction: Direction,
    columns: Option<Arc<[Column]>>,
    exhausted: bool,
    closed: bool,
}

impl Cursor {
    /// Declare a cursor for `sql` with the given arguments bound.
    pub(crate) fn declare(conn: &mut Connection, sql: &str, args: &[Value]) -> Result<Self> {
        let name = conn.next_portal_name();
        let declare_sql = format!(
            "DECLARE {} SCROLL CURSOR WITH HOLD FOR {}",
            quote_ident(&name),
            sql
        );
        conn.query_once(&declare_sql, args)?;

        Ok(Self {
            conn_id: conn.id(),
            name,
            direction: Direction::Forward,
            columns: None,
            exhausted: false,
            closed: false,
        })
    }

    /// Server-side cursor name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Presentation direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Flip the presentation direction.
    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    /// Column metadata, known after the first fetch.
    pub fn columns(&self) -> Option<&[Column]> {
        self.columns.as_deref()
    }

    fn check(&self, conn: &Connection) -> Result<()> {
        if self.closed {
            return Err(Error::State("cursor is closed".into()));
        }
        if conn.id() != self.conn_id {
            return Err(Error::State("cursor used with a different connection".into()));
        }
        Ok(())
    }

    /// Fetch up to `count` rows scanning toward `dir` from the current
    /// position. Rows are presented in the cursor's direction order:
    /// forward cursors present ascending cursor order regardless of scan
    /// direction, backward cursors descending.
    pub fn read(&mut self, conn: &mut Connection, count: u64, dir: Direction) -> Result<Vec<Row>> {
        self.check(conn)?;

        let sql = format!(
            "FETCH {} {} FROM {}",
            dir.keyword(),
            count,
            quote_ident(&self.name)
        );
        let outcome = conn.query_once(&sql, &[])?;
        if self.columns.is_none() {
            self.columns = Some(Arc::clone(&outcome.columns));
        }

        let mut rows = outcome.rows;
        if (rows.len() as u64) < count && dir == self.direction {
            self.exhausted = true;
        } else if !rows.is_empty() {
            self.exhausted = false;
        }

        // FETCH returns rows in scan order; re-order into the cursor's
        // presentation order when the two disagree.
        let scan_descending = dir == Direction::Backward;
        let present_descending = self.direction == Direction::Backward;
        if scan_descending != present_descending {
            rows.reverse();
        }
        Ok(rows)
    }

    /// Reposition the cursor. Returns the number of rows passed over.
    ///
    /// - `Absolute`: `position` rows after the start
    /// - `Relative`: `position` rows from here (may be negative)
    /// - `FromEnd`: `position` rows before the end
    pub fn seek(&mut self, conn: &mut Connection, position: i64, whence: Whence) -> Result<u64> {
        self.check(conn)?;

        let name = quote_ident(&self.name);
        let moved = match whence {
            Whence::Absolute => {
                if position < 0 {
                    return Err(Error::InvalidUsage(
                        "absolute seek position must be non-negative".into(),
                    ));
                }
                self.move_by(conn, &format!("MOVE ABSOLUTE {} FROM {}", position, name))?
            }
            Whence::Relative => {
                if position >= 0 {
                    self.move_by(conn, &format!("MOVE FORWARD {} FROM {}", position, name))?
                } else {
                    self.move_by(conn, &format!("MOVE BACKWARD {} FROM {}", -position, name))?
                }
            }
            Whence::FromEnd => {
                if position < 0 {
                    return Err(Error::InvalidUsage(
                        "from-end seek position must be non-negative".into(),
                    ));
                }
                let moved = self.move_by(conn, &format!("MOVE FORWARD ALL FROM {}", name))?;
                if position > 0 {
                    self.move_by(conn, &format!("MOVE BACKWARD {} FROM {}", position, name))?;
                }
                moved
            }
        };
        self.exhausted = false;
        Ok(moved)
    }

    fn move_by(&mut self, conn: &mut Connection, sql: &str) -> Result<u64> {
        let outcome = conn.query_once(sql, &[])?;
        let tag = outcome.tag.unwrap_or_default();
        Ok(tag
            .rsplit(' ')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0))
    }

    /// Iterate rows in the cursor's direction, fetching in batches.
    pub fn iter<'a>(&'a mut self, conn: &'a mut Connection) -> CursorIter<'a> {
        CursorIter {
            cursor: self,
            conn,
            pending: Vec::new(),
            done: false,
        }
    }

    /// Close the cursor on the server. Idempotent.
    pub fn close(&mut self, conn: &mut Connection) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if conn.id() != self.conn_id || conn.is_closed() || conn.in_failed_block() {
            // Reclaimed by session teardown instead.
            self.closed = true;
            return Ok(());
        }
        conn.query_once(&format!("CLOSE {}", quote_ident(&self.name)), &[])?;
        self.closed = true;
        Ok(())
    }
}

/// Batched iterator over a cursor.
pub struct CursorIter<'a> {
    cursor: &'a mut Cursor,
    conn: &'a mut Connection,
    pending: Vec<Row>,
    done: bool,
}

impl CursorIter<'_> {
    const BATCH: u64 = 64;
}

impl Iterator for CursorIter<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending.is_empty() && !self.done {
            let dir = self.cursor.direction;
            match self.cursor.read(self.conn, Self::BATCH, dir) {
                Ok(rows) => {
                    if (rows.len() as u64) < Self::BATCH {
                        self.done = true;
                    }
                    self.pending = rows;
                    self.pending.reverse();
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        self.pending.pop().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_keywords() {
        assert_eq!(Direction::Forward.keyword(), "FORWARD");
        assert_eq!(Direction::Backward.keyword(), "BACKWARD");
    }
}
