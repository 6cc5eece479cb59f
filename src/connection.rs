//! Connection state machine.
//!
//! Drives startup and authentication, simple and extended queries, COPY in
//! and out, cancellation, and termination over one [`WireStream`].
//!
//! Exactly one operation is in flight at a time; every public call reads
//! until `ReadyForQuery` (or a terminal error) before returning, and
//! asynchronous messages (notices, notifications, parameter changes) are
//! drained from the frame queue wherever they appear.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::conversion::CodecEnv;
use crate::error::{Error, Result, ServerError};
use crate::opts::{Opts, SslMode};
use crate::protocol::backend::{
    self, AuthenticationMessage, BackendKeyData, CommandComplete, CopyInResponse, CopyOutResponse,
    ErrorResponse, NoticeResponse, NotificationResponse, ParameterDescription, ParameterStatus,
    ReadyForQuery, RowDescription, msg_type,
};
use crate::protocol::codec::{Outgoing, concat_messages};
use crate::protocol::framer::{CopyEvent, Frame};
use crate::protocol::frontend::{
    auth::{ScramClient, md5_password},
    msg_type as frontend_msg, write_cancel_request, write_copy_data, write_copy_done,
    write_copy_fail, write_password, write_query, write_sasl_initial_response,
    write_sasl_response, write_startup, write_terminate,
};
use crate::protocol::types::{FormatCode, Oid, TransactionStatus, oid};
use crate::registry::{TypeEntry, TypeKind, TypeRegistry};
use crate::row::{Column, Row};
use crate::transport::Transport;
use crate::value::Value;
use crate::wire::WireStream;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// An asynchronous notification received via `LISTEN`/`NOTIFY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Channel name
    pub channel: String,
    /// Payload string
    pub payload: String,
    /// PID of the notifying backend
    pub pid: u32,
}

/// A notice callback. Returning `true` marks the notice handled and stops
/// the chain.
pub type NoticeHook = Box<dyn FnMut(&ServerError) -> bool + Send>;

/// Result of one statement inside a simple query.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Column metadata (empty for row-less commands)
    pub columns: Arc<[Column]>,
    /// Decoded rows
    pub rows: Vec<Row>,
    /// Command tag, e.g. `SELECT 2`
    pub tag: String,
    /// Row count parsed from the tag
    pub rows_affected: Option<u64>,
}

/// Result of one extended-query execution.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    /// Column metadata (empty for row-less commands)
    pub columns: Arc<[Column]>,
    /// Decoded rows
    pub rows: Vec<Row>,
    /// Command tag, absent when the portal suspended
    pub tag: Option<String>,
    /// True when `Execute` stopped at its row limit with rows remaining
    pub suspended: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Ready,
    CopyIn,
    CopyOut,
    Terminated,
}

/// A single PostgreSQL session.
pub struct Connection {
    id: u64,
    wire: WireStream,
    opts: Opts,
    used_tls: bool,
    env: CodecEnv,
    params: HashMap<String, String>,
    backend: Option<(u32, u32)>,
    txn_status: TransactionStatus,
    pub(crate) txn_depth: u32,
    state: ConnState,
    notifies: VecDeque<Notification>,
    notice_hooks: Vec<NoticeHook>,
    pub(crate) registry: TypeRegistry,
    stmt_counter: u64,
    portal_counter: u64,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("txn_status", &self.txn_status)
            .finish()
    }
}

impl Connection {
    /// Connect and run startup/authentication to the first `ReadyForQuery`.
    ///
    /// Accepts an [`Opts`] or a `pq://` URI. With `sslmode=allow`, a server
    /// that rejects the unencrypted attempt is retried once over TLS.
    pub fn connect<O: crate::opts::IntoOpts>(opts: O) -> Result<Self> {
        let opts = opts.into_opts()?;

        match Self::connect_once(&opts, false) {
            Ok(conn) => Ok(conn),
            Err(err)
                if opts.ssl_mode == SslMode::Allow
                    && matches!(err, Error::Server(_) | Error::Auth(_)) =>
            {
                tracing::debug!("retrying with TLS after rejected plain connection");
                Self::connect_once(&opts, true)
            }
            Err(err) => Err(err),
        }
    }

    fn connect_once(opts: &Opts, force_ssl: bool) -> Result<Self> {
        let transport = Transport::connect(opts, force_ssl)?;
        #[cfg(feature = "tls")]
        let used_tls = matches!(transport, Transport::Tls(_));
        #[cfg(not(feature = "tls"))]
        let used_tls = false;

        let mut conn = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            wire: WireStream::new(transport),
            opts: opts.clone(),
            used_tls,
            env: CodecEnv::default(),
            params: HashMap::new(),
            backend: None,
            txn_status: TransactionStatus::Idle,
            txn_depth: 0,
            state: ConnState::Ready,
            notifies: VecDeque::new(),
            notice_hooks: Vec::new(),
            registry: TypeRegistry::new(),
            stmt_counter: 0,
            portal_counter: 0,
        };
        conn.startup()?;
        tracing::debug!(id = conn.id, "connection ready");
        Ok(conn)
    }

    fn startup(&mut self) -> Result<()> {
        let mut settings: Vec<(&str, &str)> =
            vec![("user", &self.opts.user), ("client_encoding", "UTF8")];
        if let Some(db) = &self.opts.database {
            settings.push(("database", db));
        }
        for (name, value) in &self.opts.settings {
            settings.push((name, value));
        }
        write_startup(self.wire.queue(), &settings);
        self.wire.flush()?;

        let mut scram: Option<ScramClient> = None;

        loop {
            let frame = self.wire.next_frame()?;
            match frame.kind {
                msg_type::AUTHENTICATION => {
                    self.handle_auth(&frame.body, &mut scram)?;
                }
                msg_type::PARAMETER_STATUS => {
                    let param = ParameterStatus::parse(&frame.body)?;
                    self.apply_parameter(param.name, param.value);
                }
                msg_type::BACKEND_KEY_DATA => {
                    let key = BackendKeyData::parse(&frame.body)?;
                    self.backend = Some((key.process_id(), key.secret()));
                }
                msg_type::NOTICE_RESPONSE => {
                    let notice = NoticeResponse::parse(&frame.body)?;
                    self.deliver_notice(&notice.fields);
                }
                msg_type::ERROR_RESPONSE => {
                    let error = ErrorResponse::parse(&frame.body)?;
                    return Err(error.into_error());
                }
                msg_type::READY_FOR_QUERY => {
                    self.apply_ready(&frame)?;
                    return Ok(());
                }
                msg_type::NEGOTIATE_PROTOCOL_VERSION => {
                    return Err(Error::Protocol(
                        "server rejected protocol 3.0 options".into(),
                    ));
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message during startup: '{}'",
                        other as char
                    )));
                }
            }
        }
    }

    fn handle_auth(&mut self, body: &[u8], scram: &mut Option<ScramClient>) -> Result<()> {
        let auth = AuthenticationMessage::parse(body)?;
        match auth {
            AuthenticationMessage::Ok => Ok(()),
            AuthenticationMessage::CleartextPassword => {
                let password = self.require_password()?;
                write_password(self.wire.queue(), &password);
                self.wire.flush()
            }
            AuthenticationMessage::Md5Password { salt } => {
                let password = self.require_password()?;
                let hashed = md5_password(&self.opts.user, &password, &salt);
                write_password(self.wire.queue(), &hashed);
                self.wire.flush()
            }
            AuthenticationMessage::Sasl { mechanisms } => {
                if !mechanisms.contains(&"SCRAM-SHA-256") {
                    return Err(Error::Auth(format!(
                        "no supported SASL mechanism; server offers {:?}",
                        mechanisms
                    )));
                }
                let password = self.require_password()?;
                let client = ScramClient::new(&password);
                let first = client.client_first_message();
                write_sasl_initial_response(self.wire.queue(), "SCRAM-SHA-256", first.as_bytes());
                *scram = Some(client);
                self.wire.flush()
            }
            AuthenticationMessage::SaslContinue { data } => {
                let client = scram
                    .as_mut()
                    .ok_or_else(|| Error::Protocol("SASL continue before SASL start".into()))?;
                let server_first = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("invalid server-first-message: {}", e)))?;
                let client_final = client.process_server_first(server_first).map_err(Error::Auth)?;
                write_sasl_response(self.wire.queue(), client_final.as_bytes());
                self.wire.flush()
            }
            AuthenticationMessage::SaslFinal { data } => {
                let client = scram
                    .as_ref()
                    .ok_or_else(|| Error::Protocol("SASL final before SASL start".into()))?;
                let server_final = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("invalid server-final-message: {}", e)))?;
                client.verify_server_final(server_final).map_err(Error::Auth)
            }
            other => Err(Error::Auth(format!(
                "unsupported authentication method: {:?}",
                other
            ))),
        }
    }

    fn require_password(&self) -> Result<String> {
        self.opts
            .password
            .clone()
            .ok_or_else(|| Error::Auth("password required but not provided".into()))
    }

    // === session state ===

    /// Driver-side connection id, used for ownership checks.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Value of a server parameter mirrored from `ParameterStatus`.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Server version string.
    pub fn server_version(&self) -> Option<&str> {
        self.parameter("server_version")
    }

    /// Backend process id, once startup delivered it.
    pub fn backend_pid(&self) -> Option<u32> {
        self.backend.map(|(pid, _)| pid)
    }

    /// Current transaction status as last reported by the server.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.txn_status
    }

    /// True while the session is inside a failed transaction block.
    pub fn in_failed_block(&self) -> bool {
        self.txn_status.is_failed()
    }

    pub(crate) fn codec_env(&self) -> &CodecEnv {
        &self.env
    }

    /// Append a notice hook to the connection's chain. Hooks run in order;
    /// the first returning `true` stops propagation. Unhandled notices go
    /// to the tracing sink.
    pub fn push_notice_hook(&mut self, hook: NoticeHook) {
        self.notice_hooks.push(hook);
    }

    /// Remove the most recently pushed notice hook.
    pub fn pop_notice_hook(&mut self) {
        self.notice_hooks.pop();
    }

    /// Register a user codec for a type OID.
    pub fn register_codec(&mut self, type_oid: Oid, codec: Arc<dyn crate::registry::UserCodec>) {
        self.registry.register(type_oid, codec);
    }

    /// Register a user codec by type name, attached once the name resolves.
    pub fn register_codec_by_name(&mut self, name: &str, codec: Arc<dyn crate::registry::UserCodec>) {
        self.registry.register_by_name(name, codec);
    }

    fn apply_parameter(&mut self, name: &str, value: &str) {
        match name {
            "client_encoding" => self.env.client_encoding = value.to_string(),
            "integer_datetimes" => self.env.integer_datetimes = value == "on",
            "DateStyle" => self.env.date_style = value.to_string(),
            "standard_conforming_strings" => {
                self.env.standard_conforming_strings = value == "on";
            }
            "server_version" => self.env.server_version = value.to_string(),
            _ => {}
        }
        self.params.insert(name.to_string(), value.to_string());
    }

    fn deliver_notice(&mut self, notice: &ServerError) {
        for hook in &mut self.notice_hooks {
            if hook(notice) {
                return;
            }
        }
        tracing::info!(code = notice.sqlstate(), "notice: {}", notice.message());
    }

    /// Handle an asynchronous frame. Returns true when the frame was
    /// consumed.
    fn consume_async(&mut self, frame: &Frame) -> Result<bool> {
        match frame.kind {
            msg_type::NOTIFICATION_RESPONSE => {
                let n = NotificationResponse::parse(&frame.body)?;
                self.notifies.push_back(Notification {
                    channel: n.channel.to_string(),
                    payload: n.payload.to_string(),
                    pid: n.pid,
                });
                Ok(true)
            }
            msg_type::NOTICE_RESPONSE => {
                let notice = NoticeResponse::parse(&frame.body)?;
                self.deliver_notice(&notice.fields);
                Ok(true)
            }
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(&frame.body)?;
                self.apply_parameter(param.name, param.value);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Read the next foreground frame, draining async messages.
    pub(crate) fn dispatch_frame(&mut self) -> Result<Frame> {
        loop {
            let frame = self.wire.next_frame()?;
            if !self.consume_async(&frame)? {
                return Ok(frame);
            }
        }
    }

    pub(crate) fn apply_ready(&mut self, frame: &Frame) -> Result<()> {
        let ready = ReadyForQuery::parse(&frame.body)?;
        self.txn_status = ready
            .transaction_status()
            .ok_or_else(|| Error::Protocol("invalid transaction status byte".into()))?;
        if !self.txn_status.in_transaction() {
            self.txn_depth = 0;
        }
        Ok(())
    }

    /// After an `ErrorResponse`, read to `ReadyForQuery` so the connection
    /// is usable again.
    pub(crate) fn drain_to_ready(&mut self) -> Result<()> {
        loop {
            let frame = self.dispatch_frame()?;
            if frame.kind == msg_type::READY_FOR_QUERY {
                self.apply_ready(&frame)?;
                return Ok(());
            }
        }
    }

    /// Gate a new operation: the connection must be ready, and inside a
    /// failed transaction block only rollback commands are accepted. The
    /// failed-block refusal is local; no bytes are sent.
    pub(crate) fn ensure_ready(&mut self, sql: Option<&str>) -> Result<()> {
        match self.state {
            ConnState::Terminated => {
                return Err(Error::State("connection is closed".into()));
            }
            ConnState::CopyIn | ConnState::CopyOut => {
                return Err(Error::State("a COPY transfer is in progress".into()));
            }
            ConnState::Ready => {}
        }

        // Operations without SQL (notification polls) send nothing and are
        // always allowed.
        if self.txn_status.is_failed()
            && let Some(sql) = sql
        {
            let head = sql.trim_start().to_ascii_uppercase();
            if !(head.starts_with("ROLLBACK") || head.starts_with("ABORT")) {
                return Err(Error::in_failed_block());
            }
        }
        Ok(())
    }

    pub(crate) fn wire(&mut self) -> &mut WireStream {
        &mut self.wire
    }

    pub(crate) fn next_statement_name(&mut self) -> String {
        self.stmt_counter += 1;
        format!("_pgc_s_{}", self.stmt_counter)
    }

    pub(crate) fn next_portal_name(&mut self) -> String {
        self.portal_counter += 1;
        format!("_pgc_p_{}", self.portal_counter)
    }

    // === simple query ===

    /// Run one simple `Query` message. The SQL may contain multiple
    /// statements; each produces a [`QueryResult`] in order.
    pub fn simple_query(&mut self, sql: &str) -> Result<Vec<QueryResult>> {
        self.ensure_ready(Some(sql))?;

        write_query(self.wire.queue(), sql);
        self.wire.flush()?;

        struct RawGroup {
            columns: Vec<Column>,
            rows: Vec<Vec<Option<Vec<u8>>>>,
            tag: String,
            rows_affected: Option<u64>,
        }

        let mut groups: Vec<RawGroup> = Vec::new();
        let mut current: Option<RawGroup> = None;
        let mut failure: Option<Error> = None;

        loop {
            let frame = self.dispatch_frame()?;
            match frame.kind {
                msg_type::ROW_DESCRIPTION => {
                    let desc = RowDescription::parse(&frame.body)?;
                    current = Some(RawGroup {
                        columns: columns_from_description(&desc),
                        rows: Vec::new(),
                        tag: String::new(),
                        rows_affected: None,
                    });
                }
                msg_type::DATA_ROW => {
                    let row = backend::DataRow::parse(&frame.body)?;
                    if let Some(group) = current.as_mut() {
                        group
                            .rows
                            .push(row.iter().map(|c| c.map(<[u8]>::to_vec)).collect());
                    }
                }
                msg_type::COMMAND_COMPLETE => {
                    let complete = CommandComplete::parse(&frame.body)?;
                    let mut group = current.take().unwrap_or(RawGroup {
                        columns: Vec::new(),
                        rows: Vec::new(),
                        tag: String::new(),
                        rows_affected: None,
                    });
                    group.tag = complete.tag.to_string();
                    group.rows_affected = complete.rows_affected();
                    groups.push(group);
                }
                msg_type::EMPTY_QUERY_RESPONSE => {
                    current = None;
                }
                msg_type::ERROR_RESPONSE => {
                    let error = ErrorResponse::parse(&frame.body)?;
                    failure.get_or_insert(error.into_error());
                    current = None;
                }
                msg_type::COPY_IN_RESPONSE => {
                    // Not reachable through this API; refuse and recover.
                    CopyInResponse::parse(&frame.body)?;
                    write_copy_fail(self.wire.queue(), "COPY requires the copy API");
                    self.wire.flush()?;
                    failure.get_or_insert(Error::State(
                        "COPY FROM STDIN requires Connection::copy_in".into(),
                    ));
                }
                msg_type::COPY_OUT_RESPONSE | msg_type::COPY_BOTH_RESPONSE => {
                    CopyOutResponse::parse(&frame.body)?;
                    // Drain the unwanted data stream.
                    loop {
                        let frame = self.dispatch_frame()?;
                        if matches!(frame.kind, msg_type::COPY_DONE | msg_type::ERROR_RESPONSE) {
                            break;
                        }
                    }
                    failure.get_or_insert(Error::State(
                        "COPY TO STDOUT requires Connection::copy_out".into(),
                    ));
                }
                msg_type::COPY_DONE | msg_type::COPY_DATA => {}
                msg_type::READY_FOR_QUERY => {
                    self.apply_ready(&frame)?;
                    break;
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message in simple query: '{}'",
                        other as char
                    )));
                }
            }
        }

        if let Some(error) = failure {
            return Err(error);
        }

        // Decode after ReadyForQuery so type resolution may issue catalog
        // queries of its own.
        let mut results = Vec::with_capacity(groups.len());
        for group in groups {
            for column in &group.columns {
                self.resolve_type(column.type_oid)?;
            }
            let columns: Arc<[Column]> = group.columns.into();
            let mut rows = Vec::with_capacity(group.rows.len());
            for raw in group.rows {
                rows.push(self.decode_row(&columns, raw)?);
            }
            results.push(QueryResult {
                columns,
                rows,
                tag: group.tag,
                rows_affected: group.rows_affected,
            });
        }
        Ok(results)
    }

    /// Shorthand: run a simple query and return the total affected-row
    /// count, if any statement reported one.
    pub fn execute(&mut self, sql: &str) -> Result<Option<u64>> {
        let results = self.simple_query(sql)?;
        Ok(results.into_iter().filter_map(|r| r.rows_affected).last())
    }

    pub(crate) fn decode_row(&self, columns: &Arc<[Column]>, raw: Vec<Option<Vec<u8>>>) -> Result<Row> {
        if raw.len() != columns.len() {
            return Err(Error::Protocol(format!(
                "row has {} column(s), description has {}",
                raw.len(),
                columns.len()
            )));
        }
        let mut values = Vec::with_capacity(raw.len());
        for (column, cell) in columns.iter().zip(raw) {
            let value = self
                .registry
                .decode(column.type_oid, &self.env, column.format, cell.as_deref())
                .map_err(|e| {
                    Error::Decode(format!("column \"{}\": {}", column.name, e))
                })?;
            values.push(value);
        }
        Ok(Row::new(Arc::clone(columns), values))
    }

    // === extended query (single-shot) ===

    /// Parse, bind, and execute `sql` in one round trip using the unnamed
    /// statement and portal. Results arrive in text format, so any type can
    /// be decoded. Used for internal queries (catalog lookups, cursor
    /// traffic) and one-off parameterized statements.
    pub fn query_once(&mut self, sql: &str, params: &[Value]) -> Result<ExecOutcome> {
        self.ensure_ready(Some(sql))?;

        let param_oids: Vec<Oid> = params.iter().map(Value::natural_oid).collect();
        let mut encoded = Vec::with_capacity(params.len());
        let mut formats = Vec::with_capacity(params.len());
        for (index, (value, &type_oid)) in params.iter().zip(&param_oids).enumerate() {
            let format = if type_oid != 0 && self.registry.has_binary(type_oid) {
                FormatCode::Binary
            } else {
                FormatCode::Text
            };
            formats.push(format);
            let bytes = self
                .registry
                .encode(type_oid, &self.env, format, value)
                .map_err(|e| Error::Parameter {
                    index,
                    type_name: value.type_name().into(),
                    reason: e.to_string(),
                })?;
            encoded.push(bytes);
        }

        {
            use crate::protocol::frontend::{
                write_bind, write_describe_portal, write_execute, write_parse, write_sync,
            };
            let queue = self.wire.queue();
            write_parse(queue, "", sql, &param_oids);
            write_bind(queue, "", "", &formats, &encoded, &[FormatCode::Text]);
            write_describe_portal(queue, "");
            write_execute(queue, "", 0);
            write_sync(queue);
        }
        self.wire.flush()?;

        self.read_execution(None)
    }

    /// Read an extended-query reply cycle to `ReadyForQuery`.
    ///
    /// `columns` supplies pre-resolved metadata when the caller described
    /// the statement earlier; otherwise the in-band `RowDescription` is
    /// used (and decoded in text format).
    pub(crate) fn read_execution(&mut self, columns: Option<Arc<[Column]>>) -> Result<ExecOutcome> {
        let mut described: Option<Vec<Column>> = None;
        let mut raw_rows: Vec<Vec<Option<Vec<u8>>>> = Vec::new();
        let mut tag: Option<String> = None;
        let mut rows_suspended = false;
        let mut failure: Option<Error> = None;

        loop {
            let frame = self.dispatch_frame()?;
            match frame.kind {
                msg_type::PARSE_COMPLETE
                | msg_type::BIND_COMPLETE
                | msg_type::CLOSE_COMPLETE
                | msg_type::NO_DATA => {}
                msg_type::PARAMETER_DESCRIPTION => {
                    ParameterDescription::parse(&frame.body)?;
                }
                msg_type::ROW_DESCRIPTION => {
                    let desc = RowDescription::parse(&frame.body)?;
                    described = Some(columns_from_description(&desc));
                }
                msg_type::DATA_ROW => {
                    let row = backend::DataRow::parse(&frame.body)?;
                    raw_rows.push(row.iter().map(|c| c.map(<[u8]>::to_vec)).collect());
                }
                msg_type::COMMAND_COMPLETE => {
                    let complete = CommandComplete::parse(&frame.body)?;
                    tag = Some(complete.tag.to_string());
                }
                msg_type::EMPTY_QUERY_RESPONSE => {
                    tag = Some(String::new());
                }
                msg_type::PORTAL_SUSPENDED => {
                    rows_suspended = true;
                }
                msg_type::ERROR_RESPONSE => {
                    let error = ErrorResponse::parse(&frame.body)?;
                    failure.get_or_insert(error.into_error());
                }
                msg_type::READY_FOR_QUERY => {
                    self.apply_ready(&frame)?;
                    break;
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message in extended query: '{}'",
                        other as char
                    )));
                }
            }
        }

        if let Some(error) = failure {
            return Err(error);
        }

        let columns: Arc<[Column]> = match (columns, described) {
            (Some(cols), _) => cols,
            (None, Some(cols)) => {
                for column in &cols {
                    self.resolve_type(column.type_oid)?;
                }
                cols.into()
            }
            (None, None) => Vec::new().into(),
        };

        let mut rows = Vec::with_capacity(raw_rows.len());
        for raw in raw_rows {
            rows.push(self.decode_row(&columns, raw)?);
        }

        Ok(ExecOutcome {
            columns,
            rows,
            tag,
            suspended: rows_suspended,
        })
    }

    // === type resolution ===

    /// Make sure the registry can pack/unpack `type_oid`, issuing catalog
    /// lookups for unknown OIDs (arrays, composites, and domains recurse).
    /// Must only be called between operations.
    pub(crate) fn resolve_type(&mut self, type_oid: Oid) -> Result<()> {
        if type_oid == 0 || !self.registry.needs_resolution(type_oid) {
            return Ok(());
        }

        let mut pending = vec![type_oid];
        let mut steps = 0;
        while let Some(current) = pending.pop() {
            steps += 1;
            if steps > 1_000 {
                return Err(Error::Protocol(format!(
                    "type resolution for oid {} did not converge",
                    type_oid
                )));
            }
            if current == 0 || !self.registry.needs_resolution(current) {
                continue;
            }

            let info = crate::catalog::lookup_type(self, current)?;
            let entry = if info.typtype == "d" {
                let base = crate::catalog::lookup_basetype_recursive(self, current)?;
                pending.push(base);
                TypeEntry {
                    oid: current,
                    namespace: info.namespace,
                    name: info.name,
                    kind: TypeKind::Domain { base },
                    has_binary: true,
                }
            } else if info.typtype == "c" || info.typrelid != 0 {
                let attrs = crate::catalog::lookup_composite(self, info.typrelid)?;
                for attr in &attrs {
                    pending.push(attr.type_oid);
                }
                TypeEntry {
                    oid: current,
                    namespace: info.namespace,
                    name: info.name,
                    kind: TypeKind::Composite { attrs },
                    has_binary: true,
                }
            } else if info.typelem != 0 && info.typlen == -1 {
                pending.push(info.typelem);
                TypeEntry {
                    oid: current,
                    namespace: info.namespace,
                    name: info.name,
                    kind: TypeKind::Array {
                        elem: info.typelem,
                    },
                    has_binary: info.elem_has_binary_recv && info.elem_has_binary_send,
                }
            } else {
                // A scalar the driver has no codec for: text fallback.
                TypeEntry {
                    oid: current,
                    namespace: info.namespace,
                    name: info.name,
                    kind: TypeKind::Base(crate::conversion::BaseKind::Unknown),
                    has_binary: false,
                }
            };
            self.registry.insert(entry);
        }
        Ok(())
    }

    // === COPY ===

    /// Start `COPY ... TO STDOUT` and return a reader over the data stream.
    pub fn copy_out(&mut self, sql: &str) -> Result<CopyReader<'_>> {
        self.ensure_ready(Some(sql))?;
        write_query(self.wire.queue(), sql);
        self.wire.flush()?;

        loop {
            let frame = self.dispatch_frame()?;
            match frame.kind {
                msg_type::COPY_OUT_RESPONSE => {
                    CopyOutResponse::parse(&frame.body)?;
                    break;
                }
                msg_type::ERROR_RESPONSE => {
                    let error = ErrorResponse::parse(&frame.body)?;
                    self.drain_to_ready()?;
                    return Err(error.into_error());
                }
                other => {
                    self.drain_to_ready()?;
                    return Err(Error::State(format!(
                        "statement did not start COPY OUT (got '{}')",
                        other as char
                    )));
                }
            }
        }

        self.state = ConnState::CopyOut;
        Ok(CopyReader {
            conn: self,
            finished: false,
            rows: None,
        })
    }

    /// Start `COPY ... FROM STDIN` and return a writer for the data stream.
    pub fn copy_in(&mut self, sql: &str) -> Result<CopyWriter<'_>> {
        self.ensure_ready(Some(sql))?;
        write_query(self.wire.queue(), sql);
        self.wire.flush()?;

        loop {
            let frame = self.dispatch_frame()?;
            match frame.kind {
                msg_type::COPY_IN_RESPONSE => {
                    CopyInResponse::parse(&frame.body)?;
                    break;
                }
                msg_type::ERROR_RESPONSE => {
                    let error = ErrorResponse::parse(&frame.body)?;
                    self.drain_to_ready()?;
                    return Err(error.into_error());
                }
                other => {
                    self.drain_to_ready()?;
                    return Err(Error::State(format!(
                        "statement did not start COPY IN (got '{}')",
                        other as char
                    )));
                }
            }
        }

        self.state = ConnState::CopyIn;
        Ok(CopyWriter {
            conn: self,
            finished: false,
        })
    }

    // === notifications ===

    /// Notifications received so far, drained.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifies.drain(..).collect()
    }

    /// True when notifications are queued.
    pub fn has_notifications(&self) -> bool {
        !self.notifies.is_empty()
    }

    /// Wait up to `timeout` for asynchronous traffic and return any
    /// notifications that arrived (including previously queued ones). A
    /// timed-out poll leaves the connection usable.
    pub fn poll_notifies(&mut self, timeout: Duration) -> Result<Vec<Notification>> {
        self.ensure_ready(None)?;

        // First drain whatever is already buffered.
        loop {
            match self.wire.buffered_frame()? {
                Some(frame) => self.expect_async(frame)?,
                None => break,
            }
        }

        if self.notifies.is_empty() {
            if let Some(frame) = self.wire.poll_frame(timeout)? {
                self.expect_async(frame)?;
                // The read may have buffered more complete frames.
                loop {
                    match self.wire.buffered_frame()? {
                        Some(frame) => self.expect_async(frame)?,
                        None => break,
                    }
                }
            }
        }

        Ok(self.take_notifications())
    }

    fn expect_async(&mut self, frame: Frame) -> Result<()> {
        if self.consume_async(&frame)? {
            return Ok(());
        }
        if frame.kind == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(&frame.body)?;
            return Err(error.into_error());
        }
        Err(Error::Protocol(format!(
            "unexpected message while idle: '{}'",
            frame.kind as char
        )))
    }

    /// Start listening on a channel.
    pub fn listen(&mut self, channel: &str) -> Result<()> {
        self.simple_query(&format!("LISTEN {}", quote_ident(channel)))?;
        Ok(())
    }

    /// Stop listening on a channel.
    pub fn unlisten(&mut self, channel: &str) -> Result<()> {
        self.simple_query(&format!("UNLISTEN {}", quote_ident(channel)))?;
        Ok(())
    }

    // === cancel / termination ===

    /// Token for out-of-band query cancellation.
    pub fn cancel_token(&self) -> Option<CancelToken> {
        self.backend.map(|(pid, secret)| CancelToken {
            opts: self.opts.clone(),
            force_ssl: self.used_tls,
            pid,
            secret,
        })
    }

    /// Close cleanly: best-effort `Terminate`, then drop the transport.
    /// Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.state == ConnState::Terminated {
            return Ok(());
        }
        write_terminate(self.wire.queue());
        let _ = self.wire.flush();
        self.wire.close();
        self.state = ConnState::Terminated;
        tracing::debug!(id = self.id, "connection closed");
        Ok(())
    }

    /// True once the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Terminated
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Out-of-band cancellation handle. Opens a fresh transport, sends
/// `CancelRequest`, and closes. Best-effort; the server sends no reply.
#[derive(Debug, Clone)]
pub struct CancelToken {
    opts: Opts,
    force_ssl: bool,
    pid: u32,
    secret: u32,
}

impl CancelToken {
    /// Ask the server to interrupt the query running on the original
    /// connection. The original connection will see an error response
    /// followed by `ReadyForQuery`.
    pub fn cancel(&self) -> Result<()> {
        let mut transport = Transport::connect(&self.opts, self.force_ssl)?;
        let mut buf = Vec::with_capacity(16);
        write_cancel_request(&mut buf, self.pid, self.secret);
        transport.send(&buf)?;
        transport.close();
        Ok(())
    }
}

/// Pull side of a `COPY ... TO STDOUT` transfer.
pub struct CopyReader<'c> {
    conn: &'c mut Connection,
    finished: bool,
    rows: Option<u64>,
}

impl CopyReader<'_> {
    /// Next data chunk, or `None` once the server sent `CopyDone` and the
    /// command completed.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }
        loop {
            match self.conn.wire.next_copy_event(msg_type::COPY_DATA)? {
                CopyEvent::Data(chunk) => return Ok(Some(chunk)),
                CopyEvent::Final(frame) => {
                    if self.conn.consume_async(&frame)? {
                        continue;
                    }
                    match frame.kind {
                        msg_type::COPY_DONE => {
                            self.finish_tail()?;
                            return Ok(None);
                        }
                        msg_type::ERROR_RESPONSE => {
                            let error = ErrorResponse::parse(&frame.body)?;
                            self.conn.state = ConnState::Ready;
                            self.finished = true;
                            self.conn.drain_to_ready()?;
                            return Err(error.into_error());
                        }
                        other => {
                            return Err(Error::Protocol(format!(
                                "unexpected message in COPY OUT: '{}'",
                                other as char
                            )));
                        }
                    }
                }
            }
        }
    }

    fn finish_tail(&mut self) -> Result<()> {
        self.conn.state = ConnState::Ready;
        self.finished = true;
        loop {
            let frame = self.conn.dispatch_frame()?;
            match frame.kind {
                msg_type::COMMAND_COMPLETE => {
                    let complete = CommandComplete::parse(&frame.body)?;
                    self.rows = complete.rows_affected();
                }
                msg_type::ERROR_RESPONSE => {
                    let error = ErrorResponse::parse(&frame.body)?;
                    self.conn.drain_to_ready()?;
                    return Err(error.into_error());
                }
                msg_type::READY_FOR_QUERY => {
                    self.conn.apply_ready(&frame)?;
                    return Ok(());
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message after COPY OUT: '{}'",
                        other as char
                    )));
                }
            }
        }
    }

    /// Rows reported by the final command tag, when finished.
    pub fn rows_copied(&self) -> Option<u64> {
        self.rows
    }

    /// True once the stream has been fully consumed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for CopyReader<'_> {
    fn drop(&mut self) {
        // The server terminates COPY OUT on its own schedule; consume the
        // remainder so the connection lands on ReadyForQuery.
        while !self.finished {
            match self.next_chunk() {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => break,
            }
        }
    }
}

/// Push side of a `COPY ... FROM STDIN` transfer.
pub struct CopyWriter<'c> {
    conn: &'c mut Connection,
    finished: bool,
}

impl CopyWriter<'_> {
    /// Send one `CopyData` chunk.
    pub fn send(&mut self, chunk: &[u8]) -> Result<()> {
        if self.finished {
            return Err(Error::State("COPY IN already finished".into()));
        }
        write_copy_data(self.conn.wire.queue(), chunk);
        self.conn.wire.flush()
    }

    /// Queue one `CopyData` chunk without flushing; pair with
    /// [`CopyWriter::flush`].
    pub fn send_buffered(&mut self, chunk: &[u8]) -> Result<()> {
        if self.finished {
            return Err(Error::State("COPY IN already finished".into()));
        }
        write_copy_data(self.conn.wire.queue(), chunk);
        Ok(())
    }

    /// Frame and send many pre-serialized chunks in one write.
    pub fn send_batch<C: AsRef<[u8]>>(&mut self, chunks: &[C]) -> Result<()> {
        if self.finished {
            return Err(Error::State("COPY IN already finished".into()));
        }
        let items: Vec<Outgoing<'_>> = chunks
            .iter()
            .map(|c| Outgoing::Body {
                kind: frontend_msg::COPY_DATA,
                body: c.as_ref(),
            })
            .collect();
        concat_messages(self.conn.wire.queue(), &items);
        self.conn.wire.flush()
    }

    /// Flush queued chunks.
    pub fn flush(&mut self) -> Result<()> {
        self.conn.wire.flush()
    }

    /// Send `CopyDone` and read the command result. Returns the row count
    /// from the command tag.
    pub fn finish(mut self) -> Result<Option<u64>> {
        self.finish_mut()
    }

    pub(crate) fn finish_mut(&mut self) -> Result<Option<u64>> {
        if self.finished {
            return Err(Error::State("COPY IN already finished".into()));
        }
        write_copy_done(self.conn.wire.queue());
        self.conn.wire.flush()?;
        self.finished = true;
        self.conn.state = ConnState::Ready;

        let mut rows = None;
        let mut failure: Option<Error> = None;
        loop {
            let frame = self.conn.dispatch_frame()?;
            match frame.kind {
                msg_type::COMMAND_COMPLETE => {
                    let complete = CommandComplete::parse(&frame.body)?;
                    rows = complete.rows_affected();
                }
                msg_type::ERROR_RESPONSE => {
                    let error = ErrorResponse::parse(&frame.body)?;
                    failure.get_or_insert(error.into_error());
                }
                msg_type::READY_FOR_QUERY => {
                    self.conn.apply_ready(&frame)?;
                    break;
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message after COPY IN: '{}'",
                        other as char
                    )));
                }
            }
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(rows),
        }
    }

    /// Abort the transfer with `CopyFail`. The server responds with an
    /// error, which is read and returned as `Ok` here since the failure was
    /// requested.
    pub fn fail(mut self, reason: &str) -> Result<()> {
        self.fail_mut(reason)
    }

    pub(crate) fn fail_mut(&mut self, reason: &str) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        write_copy_fail(self.conn.wire.queue(), reason);
        self.conn.wire.flush()?;
        self.finished = true;
        self.conn.state = ConnState::Ready;

        loop {
            let frame = self.conn.dispatch_frame()?;
            match frame.kind {
                msg_type::ERROR_RESPONSE => {
                    ErrorResponse::parse(&frame.body)?;
                }
                msg_type::READY_FOR_QUERY => {
                    self.conn.apply_ready(&frame)?;
                    return Ok(());
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message after CopyFail: '{}'",
                        other as char
                    )));
                }
            }
        }
    }
}

impl Drop for CopyWriter<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Abandoned writer: abort the transfer so the connection recovers.
        write_copy_fail(self.conn.wire.queue(), "copy writer dropped");
        if self.conn.wire.flush().is_err() {
            return;
        }
        self.finished = true;
        self.conn.state = ConnState::Ready;
        let _ = self.conn.drain_to_ready();
    }
}

pub(crate) fn columns_from_description(desc: &RowDescription<'_>) -> Vec<Column> {
    desc.fields()
        .iter()
        .map(|f| Column {
            name: f.name.to_string(),
            type_oid: f.type_oid(),
            format: f.format(),
        })
        .collect()
}

/// Quote an identifier for interpolation into generated SQL.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl Value {
    /// The parameter type OID this value naturally binds as; 0 lets the
    /// server infer from context.
    pub(crate) fn natural_oid(&self) -> Oid {
        match self {
            Value::Null => 0,
            Value::Bool(_) => oid::BOOL,
            Value::Int2(_) => oid::INT2,
            Value::Int4(_) => oid::INT4,
            Value::Int8(_) => oid::INT8,
            Value::Float4(_) => oid::FLOAT4,
            Value::Float8(_) => oid::FLOAT8,
            Value::Numeric(_) => oid::NUMERIC,
            Value::Text(_) => oid::TEXT,
            Value::Bytea(_) => oid::BYTEA,
            Value::Oid(_) => oid::OID,
            Value::Date(_) => oid::DATE,
            Value::Time(_) => oid::TIME,
            Value::TimeTz(_) => oid::TIMETZ,
            Value::Timestamp(_) => oid::TIMESTAMP,
            Value::TimestampTz(_) => oid::TIMESTAMPTZ,
            Value::Interval(_) => oid::INTERVAL,
            Value::Inet(i) => {
                if i.is_cidr {
                    oid::CIDR
                } else {
                    oid::INET
                }
            }
            Value::Array(a) => match a.elem_oid {
                oid::BOOL => oid::BOOL_ARRAY,
                oid::BYTEA => oid::BYTEA_ARRAY,
                oid::NAME => oid::NAME_ARRAY,
                oid::INT2 => oid::INT2_ARRAY,
                oid::INT4 => oid::INT4_ARRAY,
                oid::TEXT => oid::TEXT_ARRAY,
                oid::INT8 => oid::INT8_ARRAY,
                oid::FLOAT4 => oid::FLOAT4_ARRAY,
                oid::FLOAT8 => oid::FLOAT8_ARRAY,
                oid::NUMERIC => oid::NUMERIC_ARRAY,
                oid::TIMESTAMP => oid::TIMESTAMP_ARRAY,
                _ => 0,
            },
            Value::Composite(_) => oid::RECORD,
            #[cfg(feature = "with-uuid")]
            Value::Uuid(_) => oid::UUID,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_helpers() {
        assert_eq!(quote_ident("chan"), "\"chan\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn natural_oids() {
        assert_eq!(Value::Int4(1).natural_oid(), oid::INT4);
        assert_eq!(Value::Null.natural_oid(), 0);
        assert_eq!(
            Value::Array(crate::value::Array::from_values(oid::INT4, vec![]))
                .natural_oid(),
            oid::INT4_ARRAY
        );
    }
}
