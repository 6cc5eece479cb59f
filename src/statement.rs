//! Prepared statements and streaming row access.
//!
//! A [`Statement`] is a named server-side parse product. Parameter and
//! result types are resolved at prepare time; when either side lacks a
//! binary codec for a type, that parameter or column falls back to text
//! format for this statement.
//!
//! Handles are usable only with their owning connection, which is passed
//! explicitly to every operation.

use std::sync::Arc;

use crate::connection::{Connection, ExecOutcome, columns_from_description};
use crate::error::{Error, Result};
use crate::protocol::backend::{
    CommandComplete, ErrorResponse, ParameterDescription, RowDescription, msg_type,
};
use crate::protocol::frontend::{
    write_bind, write_close_portal, write_close_statement, write_describe_statement,
    write_execute, write_flush, write_parse, write_sync,
};
use crate::protocol::types::{FormatCode, Oid};
use crate::row::{Column, Row};
use crate::value::Value;

/// Default rows per `Execute` for the streaming paths.
const STREAM_CHUNK_ROWS: u32 = 256;
/// Parameter sets pipelined per network round trip in the bulk-load paths.
const LOAD_BATCH: usize = 256;

/// Result of [`Statement::first`].
#[derive(Debug, Clone, PartialEq)]
pub enum First {
    /// Single-column single-row result collapsed to the value
    Value(Value),
    /// First row of a multi-column result
    Row(Row),
    /// Row-less command: tag and affected-row count
    Command {
        /// Command tag, e.g. `UPDATE 3`
        tag: String,
        /// Row count parsed from the tag
        rows: Option<u64>,
    },
}

/// A prepared statement.
#[derive(Debug, Clone)]
pub struct Statement {
    conn_id: u64,
    name: String,
    sql: String,
    param_oids: Vec<Oid>,
    param_formats: Vec<FormatCode>,
    columns: Arc<[Column]>,
    returns_rows: bool,
    closed: bool,
}

impl Connection {
    /// Parse `sql` as a named prepared statement and resolve its parameter
    /// and result types.
    pub fn prepare(&mut self, sql: &str) -> Result<Statement> {
        self.ensure_ready(Some(sql))?;
        let name = self.next_statement_name();

        {
            let queue = self.wire().queue();
            write_parse(queue, &name, sql, &[]);
            write_describe_statement(queue, &name);
            write_sync(queue);
        }
        self.wire().flush()?;

        let mut param_oids: Vec<Oid> = Vec::new();
        let mut described: Option<Vec<Column>> = None;
        let mut failure: Option<Error> = None;

        loop {
            let frame = self.dispatch_frame()?;
            match frame.kind {
                msg_type::PARSE_COMPLETE | msg_type::NO_DATA => {}
                msg_type::PARAMETER_DESCRIPTION => {
                    param_oids = ParameterDescription::parse(&frame.body)?.oids().to_vec();
                }
                msg_type::ROW_DESCRIPTION => {
                    let desc = RowDescription::parse(&frame.body)?;
                    described = Some(columns_from_description(&desc));
                }
                msg_type::ERROR_RESPONSE => {
                    let error = ErrorResponse::parse(&frame.body)?;
                    failure.get_or_insert(error.into_error());
                }
                msg_type::READY_FOR_QUERY => {
                    self.finish_ready(&frame)?;
                    break;
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message during prepare: '{}'",
                        other as char
                    )));
                }
            }
        }
        if let Some(error) = failure {
            return Err(error);
        }

        for &oid in &param_oids {
            self.resolve_type(oid)?;
        }
        let param_formats = param_oids
            .iter()
            .map(|&oid| {
                if self.registry.has_binary(oid) {
                    FormatCode::Binary
                } else {
                    FormatCode::Text
                }
            })
            .collect();

        let returns_rows = described.is_some();
        let mut columns = described.unwrap_or_default();
        for column in &mut columns {
            self.resolve_type(column.type_oid)?;
            column.format = if self.registry.has_binary(column.type_oid) {
                FormatCode::Binary
            } else {
                FormatCode::Text
            };
        }

        Ok(Statement {
            conn_id: self.id(),
            name,
            sql: sql.to_string(),
            param_oids,
            param_formats,
            columns: columns.into(),
            returns_rows,
            closed: false,
        })
    }

    pub(crate) fn finish_ready(&mut self, frame: &crate::protocol::framer::Frame) -> Result<()> {
        debug_assert_eq!(frame.kind, msg_type::READY_FOR_QUERY);
        self.apply_ready(frame)
    }
}

impl Statement {
    /// Statement text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Declared parameter type OIDs.
    pub fn param_oids(&self) -> &[Oid] {
        &self.param_oids
    }

    /// Result column metadata; empty when the statement returns no rows.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// True when the statement produces a row set.
    pub fn returns_rows(&self) -> bool {
        self.returns_rows
    }

    /// Server-side statement name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, conn: &Connection) -> Result<()> {
        if self.closed {
            return Err(Error::State("statement is closed".into()));
        }
        if conn.id() != self.conn_id {
            return Err(Error::State(
                "statement used with a different connection".into(),
            ));
        }
        Ok(())
    }

    fn encode_params(&self, conn: &Connection, args: &[Value]) -> Result<Vec<Option<Vec<u8>>>> {
        if args.len() != self.param_oids.len() {
            return Err(Error::InvalidUsage(format!(
                "statement takes {} parameter(s), got {}",
                self.param_oids.len(),
                args.len()
            )));
        }

        let env = conn.codec_env();
        let mut encoded = Vec::with_capacity(args.len());
        for (index, (value, (&oid, &format))) in args
            .iter()
            .zip(self.param_oids.iter().zip(&self.param_formats))
            .enumerate()
        {
            let type_name = conn
                .registry
                .get(oid)
                .map(|e| e.name.clone())
                .unwrap_or_else(|| format!("oid {}", oid));
            let bytes = conn
                .registry
                .encode(oid, env, format, value)
                .map_err(|e| Error::Parameter {
                    index,
                    type_name,
                    reason: e.to_string(),
                })?;
            encoded.push(bytes);
        }
        Ok(encoded)
    }

    fn result_formats(&self) -> Vec<FormatCode> {
        self.columns.iter().map(|c| c.format).collect()
    }

    /// Bind to the unnamed portal, execute to completion, and return every
    /// row. The portal is closed (by Sync) before this returns.
    pub fn query(&self, conn: &mut Connection, args: &[Value]) -> Result<Vec<Row>> {
        Ok(self.run(conn, args)?.rows)
    }

    /// Execute and collapse the result: a 1x1 row set yields the bare
    /// value, a wider row set its first row, and a row-less command its tag
    /// and count. `None` when a row-returning statement yields no rows.
    pub fn first(&self, conn: &mut Connection, args: &[Value]) -> Result<Option<First>> {
        let outcome = self.run(conn, args)?;
        if self.returns_rows {
            let mut rows = outcome.rows;
            if rows.is_empty() {
                return Ok(None);
            }
            let row = rows.swap_remove(0);
            if row.len() == 1 && rows.is_empty() {
                let mut values = row.into_values();
                return Ok(Some(First::Value(values.swap_remove(0))));
            }
            return Ok(Some(First::Row(row)));
        }
        let tag = outcome.tag.unwrap_or_default();
        let rows = CommandComplete { tag: &tag }.rows_affected();
        Ok(Some(First::Command { tag, rows }))
    }

    fn run(&self, conn: &mut Connection, args: &[Value]) -> Result<ExecOutcome> {
        self.check(conn)?;
        conn.ensure_ready(Some(&self.sql))?;
        let encoded = self.encode_params(conn, args)?;

        {
            let queue = conn.wire().queue();
            write_bind(
                queue,
                "",
                &self.name,
                &self.param_formats,
                &encoded,
                &self.result_formats(),
            );
            write_execute(queue, "", 0);
            write_sync(queue);
        }
        conn.wire().flush()?;

        conn.read_execution(Some(Arc::clone(&self.columns)))
    }

    /// Stream rows lazily. Each pull may advance the wire; rows arrive in
    /// batches of `Execute(max_rows)` behind the scenes. Dropping the
    /// stream closes the underlying portal.
    pub fn rows<'c>(&self, conn: &'c mut Connection, args: &[Value]) -> Result<RowStream<'c>> {
        self.open_stream(conn, args, STREAM_CHUNK_ROWS)
    }

    /// Like [`Statement::rows`], but yields only the first column of each
    /// row.
    pub fn column<'c>(&self, conn: &'c mut Connection, args: &[Value]) -> Result<ColumnStream<'c>> {
        Ok(ColumnStream {
            inner: self.open_stream(conn, args, STREAM_CHUNK_ROWS)?,
        })
    }

    /// Stream row batches; each batch is one server `DataRow` group (one
    /// `Execute` round trip). The streaming-optimal path.
    pub fn chunks<'c>(
        &self,
        conn: &'c mut Connection,
        args: &[Value],
        chunk_rows: u32,
    ) -> Result<ChunkStream<'c>> {
        let chunk = if chunk_rows == 0 {
            STREAM_CHUNK_ROWS
        } else {
            chunk_rows
        };
        Ok(ChunkStream {
            inner: self.open_stream(conn, args, chunk)?,
        })
    }

    fn open_stream<'c>(
        &self,
        conn: &'c mut Connection,
        args: &[Value],
        chunk_rows: u32,
    ) -> Result<RowStream<'c>> {
        self.check(conn)?;
        conn.ensure_ready(Some(&self.sql))?;
        if !self.returns_rows {
            return Err(Error::State("statement returns no rows".into()));
        }
        let encoded = self.encode_params(conn, args)?;
        let portal = conn.next_portal_name();

        {
            let queue = conn.wire().queue();
            write_bind(
                queue,
                &portal,
                &self.name,
                &self.param_formats,
                &encoded,
                &self.result_formats(),
            );
            write_flush(queue);
        }
        conn.wire().flush()?;

        // Only BindComplete (or an error) answers a flushed Bind.
        loop {
            let frame = conn.dispatch_frame()?;
            match frame.kind {
                msg_type::BIND_COMPLETE => break,
                msg_type::ERROR_RESPONSE => {
                    let error = ErrorResponse::parse(&frame.body)?;
                    write_sync(conn.wire().queue());
                    conn.wire().flush()?;
                    conn.drain_to_ready()?;
                    return Err(error.into_error());
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message after Bind: '{}'",
                        other as char
                    )));
                }
            }
        }

        Ok(RowStream {
            conn,
            columns: Arc::clone(&self.columns),
            portal,
            chunk_rows,
            pending: Vec::new(),
            exhausted: false,
            closed: false,
        })
    }

    /// Run the statement once per argument set, pipelining [`LOAD_BATCH`]
    /// sets per round trip. Any error aborts the remainder. For
    /// `COPY ... FROM STDIN` statements each item is instead a pre-formatted
    /// COPY line (text or bytea).
    pub fn load_rows<I>(&self, conn: &mut Connection, rows: I) -> Result<u64>
    where
        I: IntoIterator<Item = Vec<Value>>,
    {
        self.check(conn)?;

        if is_copy_in(&self.sql) {
            return self.load_copy(conn, rows);
        }

        conn.ensure_ready(Some(&self.sql))?;
        let mut total = 0u64;
        let mut batch = Vec::with_capacity(LOAD_BATCH);
        for args in rows {
            batch.push(args);
            if batch.len() == LOAD_BATCH {
                total += self.run_batch(conn, &batch)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            total += self.run_batch(conn, &batch)?;
        }
        Ok(total)
    }

    /// Like [`Statement::load_rows`], but takes pre-grouped chunks and
    /// pipelines each chunk before reading acknowledgements. The bulk path.
    pub fn load_chunks<I, C>(&self, conn: &mut Connection, chunks: I) -> Result<u64>
    where
        I: IntoIterator<Item = C>,
        C: IntoIterator<Item = Vec<Value>>,
    {
        self.check(conn)?;

        if is_copy_in(&self.sql) {
            return self.load_copy(conn, chunks.into_iter().flatten());
        }

        conn.ensure_ready(Some(&self.sql))?;
        let mut total = 0u64;
        for chunk in chunks {
            let chunk: Vec<Vec<Value>> = chunk.into_iter().collect();
            if !chunk.is_empty() {
                total += self.run_batch(conn, &chunk)?;
            }
        }
        Ok(total)
    }

    fn load_copy<I>(&self, conn: &mut Connection, lines: I) -> Result<u64>
    where
        I: IntoIterator<Item = Vec<Value>>,
    {
        let mut writer = conn.copy_in(&self.sql)?;
        let mut batch: Vec<Vec<u8>> = Vec::with_capacity(LOAD_BATCH);
        for line in lines {
            for value in line {
                match value {
                    Value::Text(s) => batch.push(s.into_bytes()),
                    Value::Bytea(b) => batch.push(b),
                    other => {
                        // Abort upstream before surfacing the bad input.
                        let _ = writer.fail("unencodable COPY line");
                        return Err(Error::Parameter {
                            index: 0,
                            type_name: "copy line".into(),
                            reason: format!("expected text or bytea, got {}", other.type_name()),
                        });
                    }
                }
            }
            if batch.len() >= LOAD_BATCH {
                writer.send_batch(&batch)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            writer.send_batch(&batch)?;
        }
        Ok(writer.finish()?.unwrap_or(0))
    }

    fn run_batch(&self, conn: &mut Connection, batch: &[Vec<Value>]) -> Result<u64> {
        // Encode everything first so a bad value aborts before any bytes
        // are written.
        let mut encoded_sets = Vec::with_capacity(batch.len());
        for args in batch {
            encoded_sets.push(self.encode_params(conn, args)?);
        }

        {
            let queue = conn.wire().queue();
            for encoded in &encoded_sets {
                write_bind(
                    queue,
                    "",
                    &self.name,
                    &self.param_formats,
                    encoded,
                    &self.result_formats(),
                );
                write_execute(queue, "", 0);
            }
            write_sync(queue);
        }
        conn.wire().flush()?;

        let mut total = 0u64;
        let mut failure: Option<Error> = None;
        loop {
            let frame = conn.dispatch_frame()?;
            match frame.kind {
                msg_type::BIND_COMPLETE
                | msg_type::NO_DATA
                | msg_type::ROW_DESCRIPTION
                | msg_type::DATA_ROW
                | msg_type::EMPTY_QUERY_RESPONSE => {}
                msg_type::COMMAND_COMPLETE => {
                    let complete = CommandComplete::parse(&frame.body)?;
                    total += complete.rows_affected().unwrap_or(0);
                }
                msg_type::ERROR_RESPONSE => {
                    let error = ErrorResponse::parse(&frame.body)?;
                    failure.get_or_insert(error.into_error());
                }
                msg_type::READY_FOR_QUERY => {
                    conn.finish_ready(&frame)?;
                    break;
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message in batch: '{}'",
                        other as char
                    )));
                }
            }
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(total),
        }
    }

    /// Declare a scrollable WITH HOLD cursor running this statement.
    pub fn declare(&self, conn: &mut Connection, args: &[Value]) -> Result<crate::cursor::Cursor> {
        self.check(conn)?;
        crate::cursor::Cursor::declare(conn, &self.sql, args)
    }

    /// Close the statement on the server. Idempotent; after closing, the
    /// handle refuses further use.
    pub fn close(&mut self, conn: &mut Connection) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if conn.id() != self.conn_id || conn.is_closed() || conn.in_failed_block() {
            // Server-side object is reclaimed by session teardown.
            self.closed = true;
            return Ok(());
        }
        {
            let queue = conn.wire().queue();
            write_close_statement(queue, &self.name);
            write_sync(queue);
        }
        conn.wire().flush()?;
        conn.drain_to_ready()?;
        self.closed = true;
        Ok(())
    }
}

fn is_copy_in(sql: &str) -> bool {
    let upper = sql.trim_start().to_ascii_uppercase();
    upper.starts_with("COPY") && upper.contains("FROM STDIN")
}

/// Lazy row stream over a named portal.
///
/// Single-pass and non-restartable; finite unless the query is not. Dropping
/// the stream closes the portal.
pub struct RowStream<'c> {
    conn: &'c mut Connection,
    columns: Arc<[Column]>,
    portal: String,
    chunk_rows: u32,
    pending: Vec<Row>,
    exhausted: bool,
    closed: bool,
}

impl RowStream<'_> {
    /// Column metadata for the streamed rows.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Fetch the next server batch. Empty result means exhaustion.
    fn fetch_chunk(&mut self) -> Result<Vec<Row>> {
        if self.exhausted {
            return Ok(Vec::new());
        }

        {
            let queue = self.conn.wire().queue();
            write_execute(queue, &self.portal, self.chunk_rows);
            write_flush(queue);
        }
        self.conn.wire().flush()?;

        let mut rows = Vec::new();
        loop {
            let frame = self.conn.dispatch_frame()?;
            match frame.kind {
                msg_type::DATA_ROW => {
                    let row = crate::protocol::backend::DataRow::parse(&frame.body)?;
                    let raw: Vec<Option<Vec<u8>>> =
                        row.iter().map(|c| c.map(<[u8]>::to_vec)).collect();
                    rows.push(self.conn.decode_row(&self.columns, raw)?);
                }
                msg_type::PORTAL_SUSPENDED => break,
                msg_type::COMMAND_COMPLETE | msg_type::EMPTY_QUERY_RESPONSE => {
                    self.exhausted = true;
                    self.finish()?;
                    break;
                }
                msg_type::ERROR_RESPONSE => {
                    let error = ErrorResponse::parse(&frame.body)?;
                    self.exhausted = true;
                    self.closed = true;
                    write_sync(self.conn.wire().queue());
                    self.conn.wire().flush()?;
                    self.conn.drain_to_ready()?;
                    return Err(error.into_error());
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message in row stream: '{}'",
                        other as char
                    )));
                }
            }
        }
        Ok(rows)
    }

    /// Close the portal and sync the connection.
    fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        {
            let queue = self.conn.wire().queue();
            write_close_portal(queue, &self.portal);
            write_sync(queue);
        }
        self.conn.wire().flush()?;
        self.conn.drain_to_ready()
    }
}

impl Iterator for RowStream<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending.is_empty() {
            match self.fetch_chunk() {
                Ok(rows) if rows.is_empty() => return None,
                Ok(mut rows) => {
                    rows.reverse();
                    self.pending = rows;
                }
                Err(e) => return Some(Err(e)),
            }
        }
        self.pending.pop().map(Ok)
    }
}

impl Drop for RowStream<'_> {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.finish();
        }
    }
}

/// Lazy stream over the first column of each row.
pub struct ColumnStream<'c> {
    inner: RowStream<'c>,
}

impl Iterator for ColumnStream<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok(row) => {
                let mut values = row.into_values();
                if values.is_empty() {
                    Some(Err(Error::Decode("row has no columns".into())))
                } else {
                    Some(Ok(values.swap_remove(0)))
                }
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Lazy stream of row batches, one per server round trip.
pub struct ChunkStream<'c> {
    inner: RowStream<'c>,
}

impl Iterator for ChunkStream<'_> {
    type Item = Result<Vec<Row>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.fetch_chunk() {
            Ok(rows) if rows.is_empty() => None,
            Ok(rows) => Some(Ok(rows)),
            Err(e) => Some(Err(e)),
        }
    }
}
