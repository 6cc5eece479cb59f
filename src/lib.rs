//! A synchronous PostgreSQL client runtime speaking wire protocol v3.0.
//!
//! # Features
//!
//! - **Byte-accurate protocol layer**: incremental framing, per-message
//!   codecs, and binary/text value packing compatible with the server
//! - **Demand-driven state machine**: startup/auth (password, MD5,
//!   SCRAM-SHA-256), simple and extended queries, COPY, cancellation
//! - **Lazy type registry**: unknown OIDs resolve through `pg_type`,
//!   with array/composite/domain recursion and per-statement text fallback
//! - **Session services**: prepared statements, streaming rows, scrollable
//!   WITH HOLD cursors, transactions with savepoints, LISTEN/NOTIFY, and
//!   connection-to-connection COPY transfer
//!
//! # Example
//!
//! ```no_run
//! use pgconduit::{Connection, Value};
//!
//! fn main() -> pgconduit::Result<()> {
//!     let mut conn = Connection::connect("pq://postgres:secret@localhost/mydb")?;
//!
//!     let stmt = conn.prepare("SELECT $1::int4 + 1")?;
//!     let rows = stmt.query(&mut conn, &[Value::from(41)])?;
//!     println!("answer: {:?}", rows[0].get(0));
//!
//!     conn.close()?;
//!     Ok(())
//! }
//! ```

// private
mod transport;
mod wire;

// pub
pub mod catalog;
pub mod connection;
pub mod conversion;
pub mod copy;
pub mod cursor;
pub mod error;
pub mod notify;
pub mod opts;
pub mod protocol;
pub mod registry;
pub mod row;
pub mod statement;
pub mod transaction;
pub mod value;

pub use connection::{
    CancelToken, Connection, CopyReader, CopyWriter, ExecOutcome, Notification, QueryResult,
};
pub use copy::{CopyManager, CopySink, CopySource, CopyStats, FnSink, IterSource};
pub use cursor::{Cursor, Direction, Whence};
pub use error::{CopyFault, Error, Result, ServerError};
pub use notify::{NotificationManager, NotifyEvent};
pub use opts::{IntoOpts, Opts, SslMode};
pub use protocol::types::{FormatCode, Oid, TransactionStatus};
pub use registry::{TypeEntry, TypeRegistry, UserCodec};
pub use row::{Column, Row};
pub use statement::{First, Statement};
pub use transaction::{Isolation, Transaction, TransactionConfig};
pub use value::{Array, Composite, Inet, Interval, Numeric, Value};
