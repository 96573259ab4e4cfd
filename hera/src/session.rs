//! Protocol session.
//!
//! [`Session`] sequences one operation at a time over a [`Transport`]: it
//! buffers the request frames, flushes them, and consumes exactly the
//! responses the operation expects. Row fetching is a small state machine,
//! see [`State`].
use bytes::Bytes;
use std::{
    fmt,
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    Result,
    common::{logging, span, verbose},
    connection::Config,
    encode::Encoded,
    errcode::{self, ServerError},
    error::{ClientError, Error, ErrorKind, TimeoutError},
    ext::PayloadExt,
    protocol::{
        BindType, Frame, Opcode, ProtocolError,
        opcode::{client, request, response, server},
    },
    row::{ColumnMeta, Row},
    shard,
    telemetry::{self, EventScope, EventSink, NoopSink, Sink},
    transport::{Transport, TransportExt},
};

/// Correlation id sent when the caller set none.
pub const CORRELATION_NOT_SET: &str = "NotSet";

/// `calLogOption` value which disables telemetry.
pub const TELEMETRY_DISABLED: &str = "0";

/// Fetch state of the current statement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum State {
    /// No statement is producing rows.
    #[default]
    Initial,
    /// The server paused after a fetch round, more rows need a `FETCH`.
    FetchCommandNeeded,
    /// A `FETCH` was sent and its rows were not read yet.
    FetchCommandSent,
    /// Rows are being read.
    FetchInProgress,
    /// Every row was read.
    FetchDone,
}

/// Informational connection metadata, attached to errors and telemetry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionMeta {
    pub local_address: Option<String>,
    /// Logical server name, the `host` property.
    pub server_logical_name: Option<String>,
    /// Proxy host, as reported by the server info.
    pub db_host: Option<String>,
    pub session_id: Option<String>,
    pub is_utf8: bool,
}

impl ConnectionMeta {
    /// Derive the proxy host name from the `CLIENT_INFO` response.
    ///
    /// The name is the text before the first `:`, an underscore, and the text
    /// after `Host=`, each part defaulting to `unknown`.
    pub fn server_name(info: &str) -> String {
        let prefix = info.split_once(':').map_or("unknown", |(p, _)| p);
        let host = info.split_once("Host=").map_or("unknown", |(_, h)| h);
        format!("{prefix}_{host}")
    }
}

impl fmt::Display for ConnectionMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = [
            ("server", &self.db_host),
            ("local", &self.local_address),
            ("session", &self.session_id),
        ];
        let mut first = true;
        for (key, value) in fields {
            let Some(value) = value else { continue };
            f.write_str(if first { " [" } else { ", " })?;
            write!(f, "{key}={value}")?;
            first = false;
        }
        if !first {
            f.write_str("]")?;
        }
        Ok(())
    }
}

/// Process identity reported with `CLIENT_INFO`.
#[derive(Clone, Debug)]
pub struct ClientInfo {
    pub pid: u32,
    pub host: String,
    pub exec: String,
    pub pool_name: String,
    pub pool_stack: String,
}

impl ClientInfo {
    pub fn current(pool_name: &str) -> ClientInfo {
        let exec = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| String::from("unknown"));
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| String::from("unknown"));
        ClientInfo {
            pid: std::process::id(),
            host,
            exec,
            pool_name: pool_name.to_owned(),
            pool_stack: String::new(),
        }
    }

    /// `CLIENT_INFO` payload.
    pub fn payload(&self, command: &str, name: &str) -> String {
        let mut payload = format!(
            "PID: {},HOST: {}, EXEC: {}, Poolname: {}, Command: {command}, {}",
            self.pid, self.host, self.exec, self.pool_name, self.pool_stack,
        );
        if !name.is_empty() {
            payload.push_str(", Name: ");
            payload.push_str(name);
        }
        payload
    }
}

/// One protocol session over a [`Transport`].
pub struct Session<T> {
    io: T,
    state: State,
    rows: u64,
    columns: usize,
    column_meta: Option<Arc<[ColumnMeta]>>,
    column_names: bool,
    column_info: bool,
    batch: bool,
    read_only: bool,
    min_fetch_size: u32,
    response_timeout: Duration,
    statement_timeout: Option<Duration>,
    correlation_id: Option<String>,
    client_info: ClientInfo,
    meta: ConnectionMeta,
    sink: Sink,
    telemetry: bool,
    statement_id: u32,
    byte_count: usize,
}

impl<T> Session<T> {
    pub fn new(io: T, config: &Config) -> Session<T> {
        Session {
            io,
            state: State::Initial,
            rows: 0,
            columns: 0,
            column_meta: None,
            column_names: config.column_names,
            column_info: config.column_info,
            batch: config.batch,
            read_only: false,
            min_fetch_size: config.min_fetch_size,
            response_timeout: config.response_timeout,
            statement_timeout: None,
            correlation_id: None,
            client_info: ClientInfo::current(&config.pool_name),
            meta: ConnectionMeta {
                server_logical_name: Some(config.server_name.clone()),
                ..Default::default()
            },
            sink: Arc::new(NoopSink),
            telemetry: config.cal_log_option != TELEMETRY_DISABLED,
            statement_id: 0,
            byte_count: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Row count reported by the last execute.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Column count of the current statement.
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Column metadata read by the last execute, if requested.
    pub fn column_meta(&self) -> Option<&Arc<[ColumnMeta]>> {
        self.column_meta.as_ref()
    }

    /// Use metadata learned by an earlier execution of the same statement.
    pub fn set_column_meta(&mut self, meta: Option<Arc<[ColumnMeta]>>) {
        self.column_meta = meta;
    }

    pub fn meta(&self) -> &ConnectionMeta {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut ConnectionMeta {
        &mut self.meta
    }

    pub fn set_sink(&mut self, sink: Sink) {
        self.sink = sink;
    }

    /// Correlation id sent ahead of each prepare.
    pub fn set_correlation_id(&mut self, id: Option<String>) {
        self.correlation_id = id;
    }

    /// Response deadline of the next operations, `None` restores the configured one.
    pub fn set_statement_timeout(&mut self, timeout: Option<Duration>) {
        self.statement_timeout = timeout;
    }

    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout
    }

    /// Refuse DML execution.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Raise a non zero fetch size to the configured minimum.
    pub fn fetch_size(&self, rows: u32) -> u32 {
        match rows {
            0 => 0,
            n => n.max(self.min_fetch_size),
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.io
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.io
    }

    pub fn into_inner(self) -> T {
        self.io
    }
}

impl<T: Transport> Session<T> {
    // ===== Responses =====

    /// Read the next response, skipping `STILL_EXECUTING`.
    ///
    /// The deadline is measured from the start of this call.
    fn read_response(&mut self) -> Result<Frame> {
        let deadline = self.statement_timeout.unwrap_or(self.response_timeout);
        let start = Instant::now();
        loop {
            let frame = self.io.recv()?;
            verbose!("(B) {frame:?}");
            if frame.opcode() != response::STILL_EXECUTING {
                return Ok(frame);
            }
            logging!(info, "still executing ...");
            let waited = start.elapsed();
            if waited > deadline {
                return Err(TimeoutError { waited, deadline }.into());
            }
        }
    }

    /// Turn an error response into a classified [`ServerError`].
    fn check_error(&self, frame: Frame) -> Error {
        let error = ServerError::from_response(frame.opcode(), frame.payload(), &self.meta);
        Error::from(error)
    }

    /// Read a `VALUE`, any other non error response leaves the stream out of step.
    fn read_value(&mut self, context: &'static str) -> Result<Bytes> {
        let frame = self.read_response()?;
        match frame.opcode() {
            response::VALUE => Ok(frame.into_payload()),
            response::SQL_ERROR | response::ERROR | response::MARKDOWN => {
                Err(self.check_error(frame))
            }
            op => Err(ProtocolError::unexpected(context, op, frame.into_payload()).into()),
        }
    }

    fn read_number<N: FromStr>(&mut self, context: &'static str) -> Result<N> {
        let value = self.read_value(context)?;
        value
            .parse_decimal()
            .ok_or_else(|| ProtocolError::invalid_number(context, value).into())
    }

    /// Require `want`, an error response becomes a [`ServerError`] and any
    /// other response a [`ClientError`].
    fn expect(&mut self, want: Opcode, context: &str) -> Result<Frame> {
        let frame = self.read_response()?;
        match frame.opcode() {
            op if op == want => Ok(frame),
            response::SQL_ERROR | response::ERROR | response::MARKDOWN => {
                Err(self.check_error(frame))
            }
            op => Err(ClientError::new(format!("{context}: Error {op}")).into()),
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.io.flush().map_err(Into::into)
    }

    // ===== Telemetry =====

    fn scope(&self, kind: &str) -> Box<dyn EventScope> {
        let name = self.statement_id.to_string();
        let mut scope = match self.telemetry {
            true => self.sink.transaction(kind, &name),
            false => NoopSink.transaction(kind, &name),
        };
        if let Some(host) = &self.meta.server_logical_name {
            scope.add_data("HOST", host);
        }
        scope
    }

    fn complete<R>(mut scope: Box<dyn EventScope>, result: &Result<R>) {
        if let Err(err) = result {
            if let Some(status) = failure_status(err) {
                scope.set_status(&status);
                scope.add_data("ExceptionMsg", err.to_string().trim_end());
            }
        }
        scope.completed();
    }

    // ===== Statement =====

    /// Queue the correlation id and the statement text.
    ///
    /// No response is read, the server answers along with the execute.
    pub fn prepare(&mut self, sql: &str) -> Result<()> {
        // a paused cursor is closed by the server on the next prepare
        if self.state != State::FetchCommandNeeded {
            self.ensure_idle("prepare")?;
        }
        logging!(debug, "prepare: {sql}");
        let correlation = self.correlation_id.as_deref().unwrap_or(CORRELATION_NOT_SET);
        self.io.send(client::CAL_CORRELATION_ID, format!("CorrId={correlation}").as_bytes());
        self.io.send(request::PREPARE_V2, sql.as_bytes());
        self.statement_id = shard::hash(sql.as_bytes());
        self.state = State::Initial;
        self.columns = 0;
        self.column_meta = None;
        Ok(())
    }

    /// A new statement may only start when the server has no pending responses
    /// and no open cursor.
    fn ensure_idle(&self, operation: &'static str) -> Result<()> {
        match self.state {
            State::Initial | State::FetchDone => Ok(()),
            state => Err(ClientError::new(format!("{operation} while {state:?}")).into()),
        }
    }

    /// Queue one input parameter.
    ///
    /// `BIND_TYPE` is omitted for [`BindType::String`].
    pub fn bind(&mut self, name: &str, value: &Encoded) {
        verbose!("(F) bind {name} = {value:?}");
        self.io.send(request::BIND_NAME, name.as_bytes());
        if value.bind_type() != BindType::String {
            self.io.send_int(request::BIND_TYPE, value.bind_type().value());
        }
        self.io.send(request::BIND_VALUE, value.value());
    }

    /// Queue one output parameter.
    pub fn bind_out(&mut self, name: &str) {
        self.io.send(request::BIND_OUT_NAME, name.as_bytes());
    }

    /// Queue an array parameter, one value per batch row.
    pub fn bind_array(
        &mut self,
        name: &str,
        max_size: usize,
        bind_type: BindType,
        values: &[Encoded],
    ) -> Result<()> {
        if !self.batch {
            return Err(ClientError::new("batch is not enabled, set hera.enable.batch").into());
        }
        self.io.send(request::BIND_NAME, name.as_bytes());
        if bind_type != BindType::String {
            self.io.send_int(request::BIND_TYPE, bind_type.value());
        }
        self.io.send_int(request::ARRAY_LENGTH, values.len());
        self.io.send_int(request::ARRAY_MAX_VALUESZ, max_size);
        for value in values {
            self.io.send(request::BIND_VALUE, value.value());
        }
        Ok(())
    }

    /// Queue a `SHARD_KEY` hint for the next execute.
    pub fn shard_key(&mut self, payload: &[u8]) {
        self.io.send(request::SHARD_KEY, payload);
    }

    fn read_counts(&mut self) -> Result<()> {
        self.columns = self.read_number("column count")?;
        self.rows = self.read_number("row count")?;
        logging!(debug, "execute returned cols={}, rows={}", self.columns, self.rows);
        Ok(())
    }

    /// Read column metadata, if it was requested.
    fn iterate_columns(&mut self) -> Result<Option<Arc<[ColumnMeta]>>> {
        if !self.column_names && !self.column_info {
            return Ok(None);
        }

        self.columns = self.read_number("column count")?;
        let mut columns = Vec::with_capacity(self.columns);
        for _ in 0..self.columns {
            let name = String::from_utf8(self.read_value("column name")?.into())
                .map_err(|e| e.utf8_error())?;
            let meta = match self.column_info {
                true => ColumnMeta::with_info(
                    name,
                    self.read_number("column type")?,
                    self.read_number("column width")?,
                    self.read_number("column precision")?,
                    self.read_number("column scale")?,
                ),
                false => ColumnMeta::new(name),
            };
            columns.push(meta);
        }
        Ok(Some(columns.into()))
    }

    /// Execute a statement whose type is not known yet.
    ///
    /// Returns `true` if the statement produces rows, in which case the first
    /// `FETCH` is already sent. Otherwise the statement is committed when
    /// `auto_commit` is set.
    pub fn execute(&mut self, max_rows: u32, auto_commit: bool) -> Result<bool> {
        span!("execute");
        self.ensure_idle("execute")?;
        let scope = self.scope(telemetry::EXEC);
        let result = self.execute_inner(max_rows, auto_commit);
        if result.is_err() {
            self.state = State::Initial;
        }
        Self::complete(scope, &result);
        result
    }

    fn execute_inner(&mut self, max_rows: u32, auto_commit: bool) -> Result<bool> {
        self.io.send_empty(request::EXECUTE);
        self.flush()?;
        self.read_counts()?;

        if self.columns > 0 {
            if self.column_info {
                self.io.send_empty(request::COLS_INFO);
                self.flush()?;
            } else if self.column_names {
                self.io.send_empty(request::COLS);
                self.flush()?;
            }
            self.state = State::FetchCommandSent;
            let rows = self.fetch_size(max_rows);
            self.io.send_int(request::FETCH, rows);
            self.flush()?;
            self.column_meta = self.iterate_columns()?;
            return Ok(true);
        }

        if auto_commit {
            self.io.send_empty(request::COMMIT);
            self.flush()?;
            self.expect(response::OK, "commit")?;
        }
        self.state = State::Initial;
        Ok(false)
    }

    /// Execute a statement known to produce rows.
    ///
    /// The execute, the metadata request and the first `FETCH` are sent in
    /// one flush. Returns the column metadata when `want_meta` is set.
    pub fn exec_query(&mut self, max_rows: u32, want_meta: bool) -> Result<Option<Arc<[ColumnMeta]>>> {
        span!("exec_query");
        self.ensure_idle("exec_query")?;
        let scope = self.scope(telemetry::EXEC);
        let result = self.exec_query_inner(max_rows, want_meta);
        if result.is_err() {
            self.state = State::Initial;
        }
        Self::complete(scope, &result);
        result
    }

    fn exec_query_inner(&mut self, max_rows: u32, want_meta: bool) -> Result<Option<Arc<[ColumnMeta]>>> {
        self.io.send_empty(request::EXECUTE);
        if want_meta {
            if self.column_info {
                self.io.send_empty(request::COLS_INFO);
            } else if self.column_names {
                self.io.send_empty(request::COLS);
            }
        }
        self.state = State::FetchCommandSent;
        let rows = self.fetch_size(max_rows);
        self.io.send_int(request::FETCH, rows);
        self.flush()?;
        self.read_counts()?;

        let meta = match want_meta {
            true => self.iterate_columns()?,
            false => None,
        };
        self.column_meta = meta.clone();
        Ok(meta)
    }

    /// Execute a statement known to produce no rows, returns the row count.
    ///
    /// With `auto_commit` the `COMMIT` is pipelined with the execute, and its
    /// response is read even when the execute failed with a server error.
    pub fn exec_dml(&mut self, auto_commit: bool) -> Result<u64> {
        span!("exec_dml");
        self.ensure_idle("exec_dml")?;
        if self.read_only {
            return Err(ClientError::new("DML operation called on read only connection").into());
        }

        let scope = self.scope(telemetry::EXEC);
        self.io.send_empty(request::EXECUTE);
        if auto_commit {
            self.io.send_empty(request::COMMIT);
        }

        let result = self.flush().and_then(|_| self.read_counts());
        let drain_commit = auto_commit
            && !matches!(
                result.as_ref().map_err(Error::kind),
                Err(ErrorKind::Io(_) | ErrorKind::Timeout(_) | ErrorKind::Protocol(_))
            );

        let result = match drain_commit {
            true => merge(result, self.expect(response::OK, "commit").map(drop)),
            false => result,
        };
        self.state = State::Initial;

        let result = result.map(|_| self.rows);
        Self::complete(scope, &result);
        result
    }

    // ===== Fetch =====

    /// Fetch the next round of rows.
    ///
    /// Returns an empty set without any io once every row was read.
    pub fn fetch(&mut self, max_rows: u32) -> Result<Vec<Row>> {
        span!("fetch");
        match self.state {
            State::FetchDone => return Ok(Vec::new()),
            State::Initial => {
                return Err(ClientError::new("fetch called before execute").into());
            }
            State::FetchInProgress => {
                return Err(ClientError::new("fetch called while fetch in progress").into());
            }
            State::FetchCommandNeeded => {
                let rows = self.fetch_size(max_rows);
                self.io.send_int(request::FETCH, rows);
                self.flush()?;
                self.state = State::FetchCommandSent;
            }
            State::FetchCommandSent => {}
        }

        let mut scope = self.scope(telemetry::FETCH);
        let result = self.load_results(usize::MAX);
        if let Ok(rows) = &result {
            scope.add_data("bytes", &self.byte_count.to_string());
            scope.add_data("rows", &rows.len().to_string());
        }
        Self::complete(scope, &result);
        result
    }

    /// Read the output parameters of the last execute.
    pub fn fetch_out_bind_vars(&mut self, count: usize) -> Result<Vec<Row>> {
        let rows = self.read_number("out bind row count")?;
        self.columns = count;
        self.column_meta = None;
        self.load_results(rows)
    }

    /// Read rows until `limit`, `NO_MORE_DATA` or `OK`.
    fn load_results(&mut self, limit: usize) -> Result<Vec<Row>> {
        if self.columns == 0 && limit > 0 {
            return Err(ClientError::new("the number of column is incorrect: 0").into());
        }

        self.state = State::FetchInProgress;
        self.byte_count = 0;
        let meta = self.column_meta.clone().unwrap_or_else(|| Arc::from(Vec::new()));
        let mut rows = Vec::new();

        while rows.len() < limit {
            let mut values = Vec::with_capacity(self.columns);
            while values.len() < self.columns {
                let frame = match self.read_response() {
                    Ok(frame) => frame,
                    Err(err) => {
                        self.state = State::Initial;
                        return Err(err);
                    }
                };
                match frame.opcode() {
                    op @ (response::NO_MORE_DATA | response::OK) => {
                        if !values.is_empty() {
                            let got = values.len();
                            self.state = State::Initial;
                            return Err(ProtocolError::MalformedRow { expected: self.columns, got }.into());
                        }
                        self.state = match op {
                            response::OK => State::FetchCommandNeeded,
                            _ => State::FetchDone,
                        };
                        return Ok(rows);
                    }
                    response::VALUE => {
                        self.byte_count += frame.payload().len();
                        values.push(frame.into_payload());
                    }
                    _ => {
                        self.state = State::Initial;
                        return Err(self.check_error(frame));
                    }
                }
            }
            rows.push(Row::new(meta.clone(), values));
        }

        self.state = State::FetchDone;
        Ok(rows)
    }

    /// Read and discard the remaining rows of the current statement.
    pub fn drain(&mut self) -> Result<()> {
        while matches!(self.state, State::FetchCommandSent | State::FetchCommandNeeded) {
            self.fetch(0)?;
        }
        Ok(())
    }

    // ===== Transaction =====

    pub fn commit(&mut self) -> Result<()> {
        self.io.send_empty(request::COMMIT);
        self.flush()?;
        self.expect(response::OK, "commit")?;
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.io.send_empty(request::ROLLBACK);
        self.flush()?;
        self.expect(response::OK, "rollback")?;
        Ok(())
    }

    // ===== Sharding =====

    /// Ask the number of shards behind the proxy.
    pub fn get_num_shards(&mut self) -> Result<u32> {
        self.io.send_empty(request::GET_NUM_SHARDS);
        self.flush()?;
        let frame = self.read_response()?;
        match frame.opcode() {
            response::VALUE | response::OK => {}
            response::SQL_ERROR | response::ERROR | response::MARKDOWN => {
                return Err(self.check_error(frame));
            }
            op => {
                return Err(ClientError::new(format!("get_num_shards: Error {op}")).into());
            }
        }
        let payload = frame.into_payload();
        payload
            .parse_decimal()
            .ok_or_else(|| ProtocolError::invalid_number("shard count", payload).into())
    }

    /// Pin the following statements to a shard, `-1` unpins.
    pub fn set_shard(&mut self, shard_id: i32) -> Result<()> {
        self.io.send_int(request::SET_SHARD_ID, shard_id);
        self.flush()?;
        let frame = self.read_response()?;
        match frame.opcode() {
            response::OK => Ok(()),
            response::SQL_ERROR | response::ERROR | response::MARKDOWN => {
                Err(self.check_error(frame))
            }
            op => Err(ClientError::new(format!(
                "set_shard({shard_id}) error code: {op}: {}",
                String::from_utf8_lossy(frame.payload())
            ))
            .into()),
        }
    }

    // ===== Connection =====

    /// Probe the connection.
    ///
    /// A non zero `timeout` bounds the wait for the answer, the previous read
    /// timeout is restored afterwards.
    pub fn ping(&mut self, timeout: Duration) -> Result<()> {
        self.io.send_empty(server::PING_COMMAND);
        self.flush()?;

        let frame = match timeout.is_zero() {
            true => self.io.recv(),
            false => {
                let previous = self.io.set_read_timeout(Some(timeout))?;
                let frame = self.io.recv();
                self.io.set_read_timeout(previous)?;
                frame
            }
        }?;

        match frame.opcode() {
            server::ALIVE => Ok(()),
            op => Err(ClientError::new(format!("ping: Error {op}")).into()),
        }
    }

    /// Report the client identity, returns the server info.
    pub fn send_client_info(&mut self, command: &str, name: &str) -> Result<String> {
        let payload = self.client_info.payload(command, name);
        self.io.send(request::CLIENT_INFO, payload.as_bytes());
        self.flush()?;
        let frame = self.expect(response::OK, "client info")?;
        Ok(String::from_utf8_lossy(frame.payload()).into_owned())
    }

    /// Discard frames that were queued but not flushed.
    pub fn reset(&mut self) {
        self.io.reset();
    }
}

impl<T> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("rows", &self.rows)
            .field("columns", &self.columns)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Keep the first error, chaining a second server error after a first one.
fn merge(first: Result<()>, second: Result<()>) -> Result<()> {
    match (first, second) {
        (Ok(()), second) => second,
        (Err(first), Ok(())) => Err(first),
        (Err(first), Err(second)) => match (first.into_kind(), second.into_kind()) {
            (ErrorKind::Server(a), ErrorKind::Server(b)) => Err(a.chained(b).into()),
            (first, _) => Err(first.into()),
        },
    }
}

/// Telemetry status of a failure, `None` when it is not worth reporting.
fn failure_status(err: &Error) -> Option<String> {
    let (name, code) = match err.kind() {
        ErrorKind::Server(e) if !errcode::should_log(e) => return None,
        ErrorKind::Server(e) => ("ServerError", e.vendor_code()),
        ErrorKind::Timeout(_) => ("TimeoutError", 0),
        ErrorKind::Io(_) => ("IoError", 0),
        ErrorKind::Protocol(_) => ("ProtocolError", 0),
        ErrorKind::Client(_) => ("ClientError", 0),
        _ => ("Error", 0),
    };
    Some(format!("{name}.{code}"))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        Encode,
        io::{
            FramedIo,
            mock::{Scripted, Stalled},
        },
        telemetry::test::RecordSink,
    };

    fn config() -> Config {
        Config::new("localhost", 10101)
    }

    fn session_with(config: &Config, frames: &[(Opcode, &str)]) -> Session<FramedIo<Scripted>> {
        Session::new(FramedIo::new(Scripted::new(frames)), config)
    }

    fn session(frames: &[(Opcode, &str)]) -> Session<FramedIo<Scripted>> {
        session_with(&config(), frames)
    }

    fn sent(session: &Session<FramedIo<Scripted>>) -> String {
        session.get_ref().get_ref().sent().to_owned()
    }

    const V: Opcode = response::VALUE;

    #[test]
    fn prepare_queues_correlation_id() {
        let mut s = session(&[]);
        s.prepare("select 1 from dual").unwrap();
        s.get_mut().flush().unwrap();
        assert_eq!(sent(&s), "49:0 18:2006 CorrId=NotSet,21:25 select 1 from dual,,");

        let mut s = session(&[]);
        s.set_correlation_id(Some("abc".into()));
        s.prepare("x").unwrap();
        s.get_mut().flush().unwrap();
        assert!(sent(&s).contains("CorrId=abc"));
    }

    #[test]
    fn bind_frames() {
        let mut s = session(&[]);
        s.bind("id", &7i32.encode());
        s.bind("raw", &vec![1u8].encode());
        s.bind_out("out");
        s.get_mut().flush().unwrap();
        let out = sent(&s);
        assert!(out.contains("4:2 id,3:3 7,"));
        assert!(!out.contains("10 0,"));
        assert!(out.contains("5:2 raw,4:10 3,3:3 \x01,"));
        assert!(out.contains("6:13 out,"));
    }

    #[test]
    fn bind_array_requires_batch() {
        let mut s = session(&[]);
        let values = [1i32.encode(), 22i32.encode()];
        assert!(s.bind_array("id", 2, BindType::String, &values).is_err());

        let mut config = config();
        config.set("hera.enable.batch", "true").unwrap();
        let mut s = session_with(&config, &[]);
        s.bind_array("id", 2, BindType::String, &values).unwrap();
        s.get_mut().flush().unwrap();
        assert!(sent(&s).contains("4:2 id,4:23 2,4:24 2,3:3 1,4:3 22,"));
    }

    #[test]
    fn execute_query_then_fetch_all() {
        let mut s = session(&[
            (V, "2"), (V, "0"),
            (V, "2"),
            (V, "ID"), (V, "1"), (V, "10"), (V, "0"), (V, "0"),
            (V, "NAME"), (V, "2"), (V, "20"), (V, "0"), (V, "0"),
            (V, "1"), (V, "a"),
            (V, "2"), (V, "b"),
            (response::NO_MORE_DATA, ""),
        ]);
        s.prepare("select id, name from t").unwrap();
        assert!(s.execute(0, false).unwrap());
        assert_eq!(s.state(), State::FetchCommandSent);

        let meta = s.column_meta().unwrap().clone();
        assert_eq!(meta[1].name(), "NAME");
        assert_eq!(meta[1].width(), Some(20));

        let rows = s.fetch(0).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].try_get::<_, String>("name").unwrap(), "b");
        assert_eq!(s.state(), State::FetchDone);

        assert!(s.fetch(0).unwrap().is_empty());
        assert!(sent(&s).contains("2:22,3:7 0,"));
    }

    #[test]
    fn fetch_rounds_across_ok() {
        let mut config = config();
        config.set("hera.support.column_info", "false").unwrap();
        let mut s = session_with(&config, &[
            (V, "1"), (V, "0"),
            (V, "1"), (V, "X"),
            (V, "1"), (V, "2"),
            (response::OK, ""),
            (V, "3"),
            (response::NO_MORE_DATA, ""),
        ]);
        s.prepare("select x from t").unwrap();
        assert!(s.execute(2, false).unwrap());
        assert!(sent(&s).contains("1:6,3:7 2,"));

        assert_eq!(s.fetch(2).unwrap().len(), 2);
        assert_eq!(s.state(), State::FetchCommandNeeded);
        assert_eq!(s.fetch(2).unwrap().len(), 1);
        assert_eq!(s.state(), State::FetchDone);
        assert!(sent(&s).ends_with("3:7 2,"));
    }

    #[test]
    fn fetch_before_execute_is_client_error() {
        let mut s = session(&[]);
        let err = s.fetch(0).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Client(_)));
    }

    #[test]
    fn short_row_is_malformed() {
        let mut config = config();
        config.set("hera.support.column_info", "false").unwrap();
        config.set("hera.support.column_names", "false").unwrap();
        let mut s = session_with(&config, &[
            (V, "2"), (V, "0"),
            (V, "1"),
            (response::NO_MORE_DATA, ""),
        ]);
        s.prepare("select a, b from t").unwrap();
        assert!(s.execute(0, false).unwrap());
        let err = s.fetch(0).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Protocol(ProtocolError::MalformedRow { expected: 2, got: 1 })));
        assert!(err.is_fatal());
        assert_eq!(s.state(), State::Initial);
    }

    #[test]
    fn unexpected_count_response() {
        let mut s = session(&[(response::OK, "")]);
        s.prepare("update t set a = 1").unwrap();
        let err = s.execute(0, false).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Protocol(ProtocolError::Unexpected { context: "column count", opcode: response::OK, .. })
        ));
        assert!(err.is_fatal());
        assert_eq!(s.state(), State::Initial);
    }

    #[test]
    fn execute_refused_over_paused_cursor() {
        let mut config = config();
        config.set("hera.support.column_info", "false").unwrap();
        let mut s = session_with(&config, &[
            (V, "1"), (V, "0"),
            (V, "1"), (V, "X"),
            (V, "1"), (V, "2"),
            (response::OK, ""),
        ]);
        s.prepare("select x from t").unwrap();
        assert!(s.execute(2, false).unwrap());
        assert_eq!(s.fetch(2).unwrap().len(), 2);
        assert_eq!(s.state(), State::FetchCommandNeeded);

        let before = sent(&s).len();
        for err in [
            s.execute(0, false).unwrap_err(),
            s.exec_query(0, false).unwrap_err(),
            s.exec_dml(false).unwrap_err(),
        ] {
            assert!(matches!(err.kind(), ErrorKind::Client(_)));
        }
        assert_eq!(sent(&s).len(), before);
        assert_eq!(s.state(), State::FetchCommandNeeded);

        s.prepare("select y from t").unwrap();
        assert_eq!(s.state(), State::Initial);
    }

    #[test]
    fn execute_dml_with_commit() {
        let mut s = session(&[(V, "0"), (V, "3"), (response::OK, "")]);
        s.prepare("update t set a = 1").unwrap();
        assert!(!s.execute(0, true).unwrap());
        assert_eq!(s.rows(), 3);
        assert_eq!(s.state(), State::Initial);
        assert!(sent(&s).ends_with("1:8,"));
    }

    #[test]
    fn execute_commit_refused() {
        let mut s = session(&[(V, "0"), (V, "1"), (response::NO_MORE_DATA, "")]);
        s.prepare("update t set a = 1").unwrap();
        let err = s.execute(0, true).unwrap_err();
        assert_eq!(err.kind().to_string(), "commit: Error 6");
    }

    #[test]
    fn execute_sql_error_is_classified() {
        let mut s = session(&[(response::SQL_ERROR, "ORA-00942: table or view does not exist")]);
        s.prepare("select * from missing").unwrap();
        let err = s.execute(0, false).unwrap_err();
        let server = err.as_server().unwrap();
        assert_eq!(server.vendor_code(), 942);
        assert_eq!(server.sqlstate(), "42000");
        assert!(!err.is_fatal());
        assert_eq!(s.state(), State::Initial);
    }

    #[test]
    fn exec_query_pipelines() {
        let mut config = config();
        config.set("hera.support.column_info", "false").unwrap();
        let mut s = session_with(&config, &[
            (V, "1"), (V, "0"),
            (V, "1"), (V, "N"),
            (V, "9"),
            (response::NO_MORE_DATA, ""),
        ]);
        s.prepare("select n from t").unwrap();
        let meta = s.exec_query(0, true).unwrap().unwrap();
        assert_eq!(meta[0].name(), "N");
        assert!(sent(&s).contains("1:4,1:6,3:7 0,"));
        let rows = s.fetch(0).unwrap();
        assert_eq!(rows[0].try_get::<_, i32>(0).unwrap(), 9);
    }

    #[test]
    fn exec_dml_drains_commit_after_error() {
        let mut s = session(&[
            (response::SQL_ERROR, "ORA-00001: unique constraint violated"),
            (response::OK, ""),
            (V, "0"), (V, "1"), (response::OK, ""),
        ]);
        s.prepare("insert into t values (1)").unwrap();
        let err = s.exec_dml(true).unwrap_err();
        assert_eq!(err.as_server().unwrap().vendor_code(), 1);
        assert!(sent(&s).contains("1:4,1:8,"));

        s.prepare("insert into t values (2)").unwrap();
        assert_eq!(s.exec_dml(true).unwrap(), 1);
    }

    #[test]
    fn exec_dml_refused_when_read_only() {
        let mut s = session(&[]);
        s.set_read_only(true);
        assert!(matches!(s.exec_dml(false).unwrap_err().kind(), ErrorKind::Client(_)));
    }

    #[test]
    fn out_bind_vars() {
        let mut s = session(&[(V, "1"), (V, "a"), (V, "b")]);
        let rows = s.fetch_out_bind_vars(2).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 2);
        assert_eq!(s.state(), State::FetchDone);
    }

    #[test]
    fn commit_and_rollback() {
        let mut s = session(&[(response::OK, ""), (V, "x"), (response::ERROR, "gone")]);
        s.commit().unwrap();
        assert_eq!(s.rollback().unwrap_err().kind().to_string(), "rollback: Error 3");
        assert!(s.commit().unwrap_err().as_server().is_some());
    }

    #[test]
    fn shard_operations() {
        let mut s = session(&[(V, "8"), (response::OK, "4"), (response::OK, ""), (response::ERROR, "bad")]);
        assert_eq!(s.get_num_shards().unwrap(), 8);
        assert_eq!(s.get_num_shards().unwrap(), 4);
        s.set_shard(3).unwrap();
        assert!(s.set_shard(-1).is_err());
        s.shard_key(b"id=1");
        s.get_mut().flush().unwrap();
        let out = sent(&s);
        assert!(out.contains("2:28,"));
        assert!(out.contains("4:29 3,"));
        assert!(out.contains("5:29 -1,"));
        assert!(out.ends_with("7:27 id=1,"));
    }

    #[test]
    fn ping_restores_timeout() {
        let mut s = session(&[(server::ALIVE, ""), (response::OK, "")]);
        s.ping(Duration::from_millis(100)).unwrap();
        let timeouts = s.get_ref().get_ref().timeouts.borrow().clone();
        assert_eq!(timeouts, vec![Some(Duration::from_millis(100)), Some(Duration::from_secs(60))]);
        assert!(sent(&s).starts_with("4:1008,"));
        assert!(s.ping(Duration::ZERO).is_err());
    }

    #[test]
    fn client_info() {
        let mut s = session(&[(response::OK, "hera-proxy:xyz Host=box1")]);
        let info = s.send_client_info("init", "").unwrap();
        assert_eq!(ConnectionMeta::server_name(&info), "hera-proxy_box1");
        let out = sent(&s);
        assert!(out.contains(":11 PID: "));
        assert!(out.contains("Command: init, "));
        assert!(!out.contains("Name:"));
        assert_eq!(ConnectionMeta::server_name("nothing"), "unknown_unknown");
    }

    #[test]
    fn reset_discards_queued() {
        let mut s = session(&[]);
        s.bind("a", &1i32.encode());
        s.reset();
        s.get_mut().flush().unwrap();
        assert_eq!(sent(&s), "");
    }

    #[test]
    fn still_executing_is_skipped() {
        let mut s = session(&[
            (response::STILL_EXECUTING, ""),
            (response::STILL_EXECUTING, ""),
            (response::OK, ""),
        ]);
        s.commit().unwrap();
    }

    #[test]
    fn still_executing_times_out() {
        let mut config = config();
        config.set("hera.response.timeout.ms", "30").unwrap();
        let mut s = Session::new(FramedIo::new(Stalled::new()), &config);

        let started = Instant::now();
        let err = s.commit().unwrap_err();
        let ErrorKind::Timeout(timeout) = err.kind() else {
            panic!("expected timeout, got {err}");
        };
        assert_eq!(timeout.deadline, Duration::from_millis(30));
        assert!(timeout.waited > timeout.deadline);
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(err.is_fatal());
    }

    #[test]
    fn statement_timeout_overrides() {
        let mut s = Session::new(FramedIo::new(Stalled::new()), &config());
        s.set_statement_timeout(Some(Duration::from_millis(5)));
        let err = s.rollback().unwrap_err();
        let ErrorKind::Timeout(timeout) = err.kind() else {
            panic!("expected timeout, got {err}");
        };
        assert_eq!(timeout.deadline, Duration::from_millis(5));
    }

    #[test]
    fn telemetry_scopes() {
        let sink = RecordSink::default();
        let events = sink.0.clone();
        let mut s = session(&[
            (V, "0"), (V, "1"),
            (response::SQL_ERROR, "ORA-00904: invalid identifier"),
            (response::SQL_ERROR, "ORA-20001: custom"),
        ]);
        s.set_sink(Arc::new(sink));
        s.prepare("update t set a = 1").unwrap();
        s.execute(0, false).unwrap();
        s.prepare("update t set b = 1").unwrap();
        s.execute(0, false).unwrap_err();
        s.prepare("begin p; end;").unwrap();
        s.execute(0, false).unwrap_err();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert!(events[0].starts_with("EXEC ") && events[0].ends_with(" 0"));
        assert!(events[1].ends_with(" ServerError.904"));
        assert!(events[2].ends_with(" 0"));
    }
}
