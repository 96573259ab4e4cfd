//! The [`Connection`] type.
use std::{
    fmt,
    io::{Read, Write},
    sync::Arc,
    time::Duration,
};

use crate::{
    Result,
    common::logging,
    encode::Encoded,
    errcode::{self, BatchOutcome},
    error::{ClientError, Error, ErrorKind},
    io::FramedIo,
    net::{ReadTimeout, Socket},
    protocol::BindType,
    registry::{MarkdownBudget, Registry},
    row::{Row, RowNotFound},
    session::{ConnectionMeta, Session, State},
    shard::ShardRouter,
    statement::{CacheEntry, Features, StatementCache, StatementType},
    telemetry::Sink,
};

mod config;

pub use config::{Config, DataSource, ParseError};

/// Shard hint key which pins an explicit shard id.
pub const SHARD_ID_HINT: &str = "shardid";

/// Command reported with the `CLIENT_INFO` sent at connect.
const CLIENT_INFO_INIT: &str = "init";

/// A single connection to the proxy.
///
/// Statements are prepared through the shared [`StatementCache`], executed
/// with the statement type learned on their first execution, and their rows
/// are fetched in rounds. A connection which saw a fatal error is broken and
/// refuses any further operation.
///
/// # Example
///
/// ```no_run
/// # fn app() -> hera::Result<()> {
/// let mut conn = hera::Connection::connect_env()?;
///
/// let (id, name) = hera::query::<_, _, (i64, String)>("select id, name from account where id = ?", &mut conn)
///     .bind(42)
///     .fetch_one()?;
/// # Ok(())
/// # }
/// ```
pub struct Connection<IO = Socket> {
    session: Session<FramedIo<IO>>,
    config: Config,
    features: Features,
    cache: Arc<StatementCache>,
    markdown: Option<Arc<MarkdownBudget>>,
    router: ShardRouter,
    auto_commit: bool,
    broken: bool,
}

impl Connection<Socket> {
    /// Connect using configuration from environment variable.
    ///
    /// See [`Config::from_env`] for more details.
    pub fn connect_env() -> Result<Connection> {
        Self::connect(Config::from_env()?)
    }

    /// Connect with a statement cache private to this connection.
    pub fn connect(config: Config) -> Result<Connection> {
        let cache = Arc::new(StatementCache::new(config.statement_cache_size));
        let socket = Socket::connect(&config)?;
        Self::established(Connection::with_cache(socket, config, cache))
    }

    /// Connect sharing the endpoint statement cache and markdown budget of `registry`.
    pub fn connect_with(config: Config, registry: &Registry) -> Result<Connection> {
        let socket = Socket::connect(&config)?;
        Self::established(Connection::with_registry(socket, config, registry))
    }

    fn established(mut conn: Connection) -> Result<Connection> {
        let local = conn.get_ref().local_addr().ok();
        conn.session.meta_mut().local_address = local.map(|addr| addr.to_string());
        conn.handshake()?;
        Ok(conn)
    }

    /// Shutdown the socket.
    pub fn close(self) -> Result<()> {
        self.session.into_inner().into_inner().shutdown()?;
        Ok(())
    }
}

impl<IO> Connection<IO>
where
    IO: Read + Write + ReadTimeout,
{
    /// Wrap an established stream, without handshake.
    pub fn from_io(io: IO, config: Config) -> Connection<IO> {
        let cache = Arc::new(StatementCache::new(config.statement_cache_size));
        Self::with_cache(io, config, cache)
    }

    /// Wrap an established stream, sharing endpoint state of `registry`.
    pub fn with_registry(io: IO, config: Config, registry: &Registry) -> Connection<IO> {
        let endpoint = config.endpoint();
        let cache = registry.statement_cache(&endpoint, config.statement_cache_size);
        let mut conn = Self::with_cache(io, config, cache);
        conn.markdown = Some(registry.markdown(&endpoint));
        conn
    }

    fn with_cache(io: IO, config: Config, cache: Arc<StatementCache>) -> Connection<IO> {
        Connection {
            session: Session::new(FramedIo::new(io), &config),
            features: Features::from_config(&config),
            router: ShardRouter::new(config.sharding),
            config,
            cache,
            markdown: None,
            auto_commit: true,
            broken: false,
        }
    }

    /// Report the client identity and learn the proxy host name.
    pub fn handshake(&mut self) -> Result<()> {
        let result = self.session.send_client_info(CLIENT_INFO_INIT, "");
        let info = self.track(result)?;
        let server = ConnectionMeta::server_name(&info);
        logging!(debug, "connected to {server}");
        self.session.meta_mut().db_host = Some(server);
        Ok(())
    }

    // ===== Accessors =====

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn meta(&self) -> &ConnectionMeta {
        self.session.meta()
    }

    pub fn statement_cache(&self) -> &Arc<StatementCache> {
        &self.cache
    }

    /// Returns `true` if a fatal error was seen, the connection must be discarded.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    /// Commit after every DML statement, the default.
    pub fn set_auto_commit(&mut self, auto_commit: bool) {
        self.auto_commit = auto_commit;
    }

    /// Refuse DML statements.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.session.set_read_only(read_only);
    }

    pub fn set_correlation_id(&mut self, id: Option<String>) {
        self.session.set_correlation_id(id);
    }

    pub fn set_sink(&mut self, sink: Sink) {
        self.session.set_sink(sink);
    }

    /// Row count reported by the last execution.
    pub fn rows_affected(&self) -> u64 {
        self.session.rows()
    }

    pub fn get_ref(&self) -> &IO {
        self.session.get_ref().get_ref()
    }

    pub fn get_mut(&mut self) -> &mut IO {
        self.session.get_mut().get_mut()
    }

    // ===== Error tracking =====

    /// Apply the disposition of a failed operation.
    fn track<R>(&mut self, result: Result<R>) -> Result<R> {
        let err = match result {
            Ok(ok) => return Ok(ok),
            Err(err) => err,
        };

        let disposition = err.disposition();
        if disposition.discard_connection && !self.broken {
            logging!(error, "connection to {} discarded: {err}", self.config.endpoint());
            self.broken = true;
        }
        if disposition.count_markdown {
            if let Some(budget) = &self.markdown {
                if budget.record() {
                    logging!(warn, "endpoint {} marked down", self.config.endpoint());
                }
            }
        }
        if disposition.report_markdown {
            logging!(warn, "endpoint {} reported markdown: {err}", self.config.endpoint());
        }
        Err(err)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        match self.broken {
            true => Err(ClientError::new("connection is broken").into()),
            false => Ok(()),
        }
    }

    // ===== Statement =====

    /// Prepare `sql`, discarding the remaining rows of the previous statement.
    pub fn prepare(&mut self, sql: &str) -> Result<Arc<CacheEntry>> {
        self.ensure_open()?;
        let result = self.session.drain();
        self.track(result)?;

        let entry = self.cache.get_entry(sql, self.features);
        self.session.set_statement_timeout(entry.timeout(&self.config.query_timeouts));
        let result = self.session.prepare(entry.rewritten());
        self.track(result)?;
        Ok(entry)
    }

    /// Queue the parameters of a prepared statement, and its shard key.
    pub fn bind(&mut self, entry: &CacheEntry, mut params: Vec<Encoded>) -> Result<()> {
        if params.len() > entry.param_count() {
            self.session.reset();
            return Err(ClientError::new(format!(
                "Illegal number of bind parameters: {} for {} placeholder(s)",
                params.len(),
                entry.param_count()
            ))
            .into());
        }

        let shard_key = match self.router.resolve(entry.sharding(), &mut params) {
            Ok(shard_key) => shard_key,
            Err(err) => {
                self.session.reset();
                return Err(err.into());
            }
        };

        for (i, value) in params.iter().enumerate() {
            self.session.bind(&entry.actual_param_name(i + 1), value);
        }
        if let Some(payload) = shard_key {
            self.session.shard_key(&payload);
        }
        Ok(())
    }

    /// Execute a prepared and bound statement.
    ///
    /// Returns `true` if the statement produces rows.
    pub fn run(&mut self, entry: &CacheEntry, fetch_size: u32) -> Result<bool> {
        let result = self.run_inner(entry, fetch_size);
        let has_rows = self.track(result)?;
        if let Some(budget) = &self.markdown {
            budget.reset();
        }
        Ok(has_rows)
    }

    fn run_inner(&mut self, entry: &CacheEntry, fetch_size: u32) -> Result<bool> {
        match entry.statement_type() {
            StatementType::Dml => {
                self.session.exec_dml(self.auto_commit)?;
                Ok(false)
            }
            StatementType::NonDml => {
                let cached = entry.columns();
                match self.session.exec_query(fetch_size, cached.is_none())? {
                    Some(columns) => entry.set_columns(columns),
                    None => self.session.set_column_meta(cached),
                }
                Ok(true)
            }
            StatementType::Unknown => {
                let has_rows = self.session.execute(fetch_size, self.auto_commit)?;
                match has_rows {
                    true => {
                        entry.set_statement_type(StatementType::NonDml);
                        if let Some(columns) = self.session.column_meta() {
                            entry.set_columns(columns.clone());
                        }
                    }
                    false => entry.set_statement_type(StatementType::Dml),
                }
                Ok(has_rows)
            }
        }
    }

    /// Fetch the next round of rows of the running statement.
    ///
    /// Returns an empty set once every row was read.
    pub fn fetch(&mut self, fetch_size: u32) -> Result<Vec<Row>> {
        self.ensure_open()?;
        let result = self.session.fetch(fetch_size);
        self.track(result)
    }

    /// Returns `true` if the running statement has rows left to fetch.
    pub fn has_pending_rows(&self) -> bool {
        matches!(self.session.state(), State::FetchCommandSent | State::FetchCommandNeeded)
    }

    /// Prepare, bind and run `sql`, returning the affected row count.
    ///
    /// Rows produced by the statement are discarded.
    pub fn execute(&mut self, sql: &str, params: Vec<Encoded>) -> Result<u64> {
        let entry = self.prepare(sql)?;
        self.bind(&entry, params)?;
        if self.run(&entry, 0)? {
            let result = self.session.drain();
            self.track(result)?;
        }
        Ok(self.session.rows())
    }

    /// Execute `sql` once per element of `rows` with array binds.
    ///
    /// Every row must have one value per placeholder. When the server rejects
    /// some rows of a multi row batch, [`BatchError::outcomes`] tells which.
    pub fn execute_batch(&mut self, sql: &str, rows: Vec<Vec<Encoded>>) -> Result<Vec<BatchOutcome>, BatchError> {
        if !self.config.batch {
            return Err(BatchError::new(ClientError::new("batch is not enabled, set hera.enable.batch")));
        }
        let batch_size = rows.len();
        if batch_size == 0 {
            return Ok(Vec::new());
        }

        let entry = self.prepare(sql).map_err(BatchError::new)?;
        let count = entry.param_count();
        let mut columns: Vec<Vec<Encoded>> = (0..count).map(|_| Vec::with_capacity(batch_size)).collect();
        for row in rows {
            if row.len() != count {
                self.session.reset();
                return Err(BatchError::new(ClientError::new(format!(
                    "batch row has {} value(s) for {count} placeholder(s)",
                    row.len()
                ))));
            }
            for (column, value) in columns.iter_mut().zip(row) {
                column.push(value);
            }
        }

        for (i, values) in columns.iter().enumerate() {
            let max_size = values.iter().map(|v| v.value().len()).max().unwrap_or(0);
            let bind_type = values.first().map_or(BindType::String, Encoded::bind_type);
            let name = entry.actual_param_name(i + 1);
            let result = self.session.bind_array(&name, max_size, bind_type, values);
            self.track(result).map_err(BatchError::new)?;
        }

        let result = self.session.exec_dml(self.auto_commit);
        match self.track(result) {
            Ok(_) => Ok(vec![BatchOutcome::SuccessNoInfo; batch_size]),
            Err(error) => {
                let outcomes = match error.as_server() {
                    Some(server) if batch_size > 1 => errcode::array_counts(server.message(), batch_size),
                    _ => vec![BatchOutcome::Failed; batch_size],
                };
                Err(BatchError { outcomes, error })
            }
        }
    }

    /// Execute a stored procedure call with output parameters.
    ///
    /// Placeholders at the 1 based `outputs` positions are bound as output,
    /// the others take the `inputs` in order. Returns the output values as
    /// one row.
    pub fn call(&mut self, sql: &str, inputs: Vec<Encoded>, outputs: &[usize]) -> Result<Row> {
        let entry = self.prepare(sql)?;
        let mut inputs = inputs.into_iter();
        for i in 1..=entry.param_count() {
            let name = entry.actual_param_name(i);
            match outputs.contains(&i) {
                true => self.session.bind_out(&name),
                false => match inputs.next() {
                    Some(value) => self.session.bind(&name, &value),
                    None => self.session.bind(&name, &Encoded::null()),
                },
            }
        }

        let result = self.session.execute(0, false);
        self.track(result)?;
        let result = self.session.fetch_out_bind_vars(outputs.len());
        let mut rows = self.track(result)?;
        if self.auto_commit {
            let result = self.session.commit();
            self.track(result)?;
        }
        rows.pop().ok_or_else(|| RowNotFound.into())
    }

    // ===== Transaction =====

    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        let result = self.session.drain().and_then(|_| self.session.commit());
        self.track(result)
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        let result = self.session.drain().and_then(|_| self.session.rollback());
        self.track(result)
    }

    // ===== Sharding =====

    /// Number of shards behind the proxy, `1` when sharding is disabled.
    ///
    /// Asked once, then cached for the connection lifetime.
    pub fn get_num_shards(&mut self) -> Result<u32> {
        if !self.router.is_enabled() {
            return Ok(1);
        }
        if let Some(n) = self.router.num_shards() {
            return Ok(n);
        }
        self.ensure_open()?;
        let result = self.session.get_num_shards();
        let n = self.track(result)?;
        self.router.set_num_shards(n);
        Ok(n)
    }

    /// Route the following statements.
    ///
    /// [`SHARD_ID_HINT`] pins a shard id until [`reset_shard_hints`][Self::reset_shard_hints].
    /// Any other key sets a one shot `key=value` shard key for the next statement.
    pub fn set_shard_hint(&mut self, key: &str, value: &str) -> Result<()> {
        if !self.router.is_enabled() {
            return Err(ClientError::new("sharding is not enabled, set hera.enable.sharding").into());
        }
        if key != SHARD_ID_HINT {
            self.router.set_shard_key(key, value);
            return Ok(());
        }

        let Ok(shard_id) = value.trim().parse::<u32>() else {
            return Err(ClientError::new(format!("invalid shard id {value:?}")).into());
        };
        let Ok(wire_id) = i32::try_from(shard_id) else {
            return Err(ClientError::new(format!("shard id {shard_id} out of range")).into());
        };
        self.ensure_open()?;
        let result = self.session.set_shard(wire_id);
        self.track(result)?;
        self.router.set_shard_id(Some(shard_id));
        Ok(())
    }

    /// Unpin the shard id and drop any pending shard key.
    pub fn reset_shard_hints(&mut self) -> Result<()> {
        if self.router.shard_id().is_some() {
            self.ensure_open()?;
            let result = self.session.set_shard(-1);
            self.track(result)?;
        }
        self.router.reset();
        Ok(())
    }

    // ===== Health =====

    /// Probe the connection, see [`Session::ping`].
    pub fn ping(&mut self, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        let result = self.session.ping(timeout);
        self.track(result)
    }

    /// Returns `true` if the connection answers a ping within `timeout`.
    pub fn is_valid(&mut self, timeout: Duration) -> bool {
        self.ping(timeout).is_ok()
    }
}

impl<IO> fmt::Debug for Connection<IO> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.config.endpoint())
            .field("session", &self.session)
            .field("auto_commit", &self.auto_commit)
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

/// An error from [`Connection::execute_batch`], with per row outcomes.
pub struct BatchError {
    pub outcomes: Vec<BatchOutcome>,
    pub error: Error,
}

impl BatchError {
    fn new(error: impl Into<Error>) -> BatchError {
        BatchError { outcomes: Vec::new(), error: error.into() }
    }

    pub fn kind(&self) -> &ErrorKind {
        self.error.kind()
    }
}

impl From<BatchError> for Error {
    fn from(value: BatchError) -> Self {
        value.error
    }
}

impl std::error::Error for BatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl fmt::Debug for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        Encode,
        io::mock::Scripted,
        protocol::{Opcode, opcode::response},
    };

    const V: Opcode = response::VALUE;
    const OK: Opcode = response::OK;

    fn config() -> Config {
        let mut config = Config::new("localhost", 10101);
        config.set("hera.support.column_info", "false").unwrap();
        config
    }

    fn connect(config: Config, frames: &[(Opcode, &str)]) -> Connection<Scripted> {
        Connection::from_io(Scripted::new(frames), config)
    }

    fn params(values: impl IntoIterator<Item = Encoded>) -> Vec<Encoded> {
        values.into_iter().collect()
    }

    #[test]
    fn handshake_learns_server() {
        let mut conn = connect(config(), &[(OK, "hera-occ:a Host=db-7")]);
        conn.handshake().unwrap();
        assert_eq!(conn.meta().db_host.as_deref(), Some("hera-occ_db-7"));
        assert!(conn.get_ref().sent().contains("Command: init, "));
    }

    #[test]
    fn dml_type_is_learned() {
        let mut conn = connect(config(), &[
            (V, "0"), (V, "1"), (OK, ""),
            (V, "0"), (V, "2"), (OK, ""),
        ]);
        let sql = "update account set name = ? where id = ?";
        assert_eq!(conn.execute(sql, params(["x".encode(), 1i32.encode()])).unwrap(), 1);
        let entry = conn.statement_cache().get_entry(sql, Features::from_config(conn.config()));
        assert_eq!(entry.statement_type(), StatementType::Dml);

        let before = conn.get_ref().sent().len();
        assert_eq!(conn.execute(sql, params(["y".encode(), 2i32.encode()])).unwrap(), 2);
        let second = &conn.get_ref().sent()[before..];
        assert!(second.contains("6:2 name,3:3 y,"));
        assert!(second.ends_with("1:4,1:8,,"));
    }

    #[test]
    fn query_reuses_column_meta() {
        let mut conn = connect(config(), &[
            (V, "1"), (V, "0"), (V, "1"), (V, "NAME"), (V, "alice"), (response::NO_MORE_DATA, ""),
            (V, "1"), (V, "0"), (V, "bob"), (response::NO_MORE_DATA, ""),
        ]);
        let sql = "select name from account where id = ?";
        for (id, name) in [(1i32, "alice"), (2, "bob")] {
            let entry = conn.prepare(sql).unwrap();
            conn.bind(&entry, params([id.encode()])).unwrap();
            assert!(conn.run(&entry, 0).unwrap());
            let rows = conn.fetch(0).unwrap();
            assert_eq!(rows[0].try_get::<_, String>("name").unwrap(), name);
            assert_eq!(entry.statement_type(), StatementType::NonDml);
        }
        let sent = conn.get_ref().sent();
        assert_eq!(sent.matches("1:6,").count(), 1);
        assert!(!conn.has_pending_rows());
    }

    #[test]
    fn query_timeouts_stay_per_connection() {
        let registry = Registry::new();
        let mut with_hint = config();
        with_hint.set("hera.query.report.readTimeout", "100").unwrap();
        let mut a = Connection::with_registry(Scripted::new(&[]), with_hint, &registry);
        let mut b = Connection::with_registry(Scripted::new(&[]), config(), &registry);

        let sql = "/* report */ select 1 from dual";
        a.prepare(sql).unwrap();
        b.prepare(sql).unwrap();
        assert!(Arc::ptr_eq(a.statement_cache(), b.statement_cache()));
        assert_eq!(a.statement_cache().len(), 1);
        assert_eq!(a.session.statement_timeout(), Some(Duration::from_millis(100)));
        assert_eq!(b.session.statement_timeout(), None);
    }

    #[test]
    fn too_many_params() {
        let mut conn = connect(config(), &[]);
        let entry = conn.prepare("select 1 from dual where a = ?").unwrap();
        let err = conn.bind(&entry, params([1i32.encode(), 2i32.encode()])).unwrap_err();
        assert!(err.kind().to_string().starts_with("Illegal number of bind parameters"));
        assert!(!conn.is_broken());
    }

    #[test]
    fn fatal_error_breaks_connection() {
        let mut conn = connect(config(), &[
            (V, "2"), (V, "0"), (V, "2"), (V, "A"), (V, "B"),
            (V, "x"), (response::NO_MORE_DATA, ""),
        ]);
        let entry = conn.prepare("select a, b from t").unwrap();
        assert!(conn.run(&entry, 0).unwrap());
        let err = conn.fetch(0).unwrap_err();
        assert!(err.is_fatal());
        assert!(conn.is_broken());
        assert!(conn.prepare("select 1 from dual").is_err());
    }

    #[test]
    fn markdown_is_counted() {
        let registry = Registry::new().with_markdown_threshold(1);
        let frames = [(response::SQL_ERROR, "ORA-01017: invalid username/password; logon denied"), (OK, "")];
        let mut conn = Connection::with_registry(Scripted::new(&frames), config(), &registry);
        let err = conn.execute("update t set a = 1", Vec::new()).unwrap_err();
        assert!(err.disposition().count_markdown);
        assert!(registry.markdown("localhost:10101").is_marked_down());
    }

    #[test]
    fn shard_hints() {
        let mut config = config();
        config.set("hera.enable.sharding", "true").unwrap();
        let mut conn = connect(config, &[
            (V, "0"), (V, "1"), (OK, ""),
            (OK, ""),
            (OK, ""),
        ]);

        conn.set_shard_hint("account_id", "5").unwrap();
        conn.execute("update account set a = 1 where account_id = ?", params([5i32.encode()])).unwrap();
        assert!(conn.get_ref().sent().contains("15:27 account_id=5,"));

        conn.set_shard_hint(SHARD_ID_HINT, "3").unwrap();
        let entry = conn.prepare("/* HERASK=account_id(1),ScuttleId(2) */ select * from t where account_id = ?").unwrap();
        let err = conn.bind(&entry, params([5i32.encode()])).unwrap_err();
        assert_eq!(err.kind().to_string(), "the shard hint was not reset");

        conn.reset_shard_hints().unwrap();
        assert!(conn.get_ref().sent().ends_with("5:29 -1,"));
        assert!(conn.set_shard_hint(SHARD_ID_HINT, "x").is_err());
    }

    #[test]
    fn num_shards_is_cached() {
        let mut conn = connect(config(), &[]);
        assert_eq!(conn.get_num_shards().unwrap(), 1);

        let mut config = config();
        config.set("hera.enable.sharding", "true").unwrap();
        let mut conn = connect(config, &[(V, "16")]);
        assert_eq!(conn.get_num_shards().unwrap(), 16);
        assert_eq!(conn.get_num_shards().unwrap(), 16);
        assert!(conn.set_shard_hint("shardid", "1").is_err());
    }

    #[test]
    fn batch_outcomes() {
        let sql = "insert into account (id, name) values (?, ?)";
        let rows = || vec![vec![1i32.encode(), "a".encode()], vec![2i32.encode(), "b".encode()]];

        let mut conn = connect(config(), &[]);
        assert!(conn.execute_batch(sql, rows()).is_err());

        let mut config = config();
        config.set("hera.enable.batch", "true").unwrap();
        let mut conn = connect(config, &[
            (V, "0"), (V, "2"), (OK, ""),
            (response::SQL_ERROR, "24381 2 1 1 ORA-00001: unique constraint violated"), (OK, ""),
        ]);
        let outcomes = conn.execute_batch(sql, rows()).unwrap();
        assert_eq!(outcomes, vec![BatchOutcome::SuccessNoInfo; 2]);
        let sent = conn.get_ref().sent();
        assert!(sent.contains("4:2 id,4:23 2,4:24 1,3:3 1,3:3 2,"));
        assert!(sent.contains("6:2 name,4:23 2,4:24 1,3:3 a,3:3 b,"));

        let err = conn.execute_batch(sql, rows()).unwrap_err();
        assert_eq!(err.outcomes, vec![BatchOutcome::SuccessNoInfo, BatchOutcome::Failed]);
        assert!(err.error.as_server().is_some());

        let err = conn.execute_batch(sql, vec![vec![1i32.encode()]]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Client(_)));
    }

    #[test]
    fn call_with_out_binds() {
        let mut conn = connect(config(), &[(V, "0"), (V, "0"), (V, "1"), (V, "42"), (OK, "")]);
        let row = conn.call("{call pkg.answer(?, ?)}", params([7i32.encode()]), &[2]).unwrap();
        assert_eq!(row.try_get::<_, i32>(0).unwrap(), 42);
        let sent = conn.get_ref().sent();
        assert!(sent.contains("CALL pkg.answer(:p1, :p2);"));
        assert!(sent.contains("4:2 p1,3:3 7,5:13 p2,"));
    }

    #[test]
    fn ping_and_read_only() {
        let mut conn = connect(config(), &[(crate::protocol::opcode::server::ALIVE, "")]);
        assert!(conn.is_valid(Duration::from_millis(50)));
        conn.set_read_only(true);
        let entry = conn.prepare("delete from t").unwrap();
        entry.set_statement_type(StatementType::Dml);
        conn.bind(&entry, Vec::new()).unwrap();
        assert!(conn.run(&entry, 0).is_err());
        assert!(!conn.is_broken());
    }
}
