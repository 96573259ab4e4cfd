//! Statement cache.
//!
//! Parsing a statement (escape rewrite, placeholder numbering, named binding,
//! comment hints) is done once per distinct SQL text and feature set. Entries
//! also remember what the server told about the statement on its first
//! execution: whether it returns rows, and its column metadata.
use lru::LruCache;
use std::{
    borrow::Cow,
    collections::HashMap,
    num::NonZeroUsize,
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use crate::{
    common::logging,
    connection::{Config, DataSource},
    row::ColumnMeta,
};

pub mod binding;
pub mod parse;

pub use parse::{DISABLE_CACHE_MARKER, ShardingInfo};

/// Connection features that change how a statement is rewritten.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Features {
    pub escape: bool,
    pub sharding: bool,
    pub named_binding: bool,
    pub datasource: DataSource,
}

impl Features {
    pub fn from_config(config: &Config) -> Features {
        Features {
            escape: config.escape,
            sharding: config.sharding,
            named_binding: config.named_binding,
            datasource: config.datasource,
        }
    }
}

/// Whether a statement returns rows, learned on first execution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum StatementType {
    #[default]
    Unknown = 0,
    Dml = 1,
    NonDml = 2,
}

impl StatementType {
    fn from_u8(value: u8) -> StatementType {
        match value {
            1 => Self::Dml,
            2 => Self::NonDml,
            _ => Self::Unknown,
        }
    }
}

/// Parsed statement.
#[derive(Debug)]
pub struct CacheEntry {
    sql: String,
    rewritten: String,
    param_count: usize,
    names: HashMap<usize, String>,
    sharding: Option<ShardingInfo>,
    cache_eligible: bool,
    comments: String,
    kind: AtomicU8,
    columns: RwLock<Option<Arc<[ColumnMeta]>>>,
}

impl CacheEntry {
    /// Parse `sql` with the given connection features.
    pub fn parse(sql: &str, features: Features) -> CacheEntry {
        let escaped = match features.escape {
            true => parse::escape(sql, features.datasource),
            false => Cow::Borrowed(sql),
        };
        let sharding = match features.sharding {
            true => parse::sharding_hint(&escaped),
            false => None,
        };
        let scanned = parse::scan(&escaped);
        let names = match features.named_binding {
            true => binding::analyze(&scanned.sql),
            false => HashMap::new(),
        };

        CacheEntry {
            sql: sql.to_owned(),
            rewritten: binding::rename(&scanned.sql, &names),
            param_count: scanned.param_count,
            names,
            sharding,
            cache_eligible: !scanned.comments.contains(DISABLE_CACHE_MARKER),
            comments: scanned.comments,
            kind: AtomicU8::new(StatementType::Unknown as u8),
            columns: RwLock::new(None),
        }
    }

    /// SQL text as given by the caller.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// SQL text sent with `PREPARE_V2`.
    pub fn rewritten(&self) -> &str {
        &self.rewritten
    }

    pub fn param_count(&self) -> usize {
        self.param_count
    }

    /// Bind name of the 1 based parameter position `index`.
    ///
    /// Falls back to the positional `p<index>`.
    pub fn actual_param_name(&self, index: usize) -> Cow<'_, str> {
        match self.names.get(&index) {
            Some(name) => Cow::Borrowed(name.trim()),
            None => Cow::Owned(format!("p{index}")),
        }
    }

    pub fn sharding(&self) -> Option<&ShardingInfo> {
        self.sharding.as_ref()
    }

    pub fn is_cache_eligible(&self) -> bool {
        self.cache_eligible
    }

    /// Per query response timeout named by a comment hint.
    ///
    /// Resolved against the timeouts of the calling connection, as entries
    /// are shared between connections of one endpoint.
    pub fn timeout(&self, timeouts: &HashMap<String, Duration>) -> Option<Duration> {
        parse::timeout_hint(&self.comments, timeouts)
    }

    pub fn statement_type(&self) -> StatementType {
        StatementType::from_u8(self.kind.load(Ordering::Acquire))
    }

    /// Record the learned statement type.
    ///
    /// Every writer learns the same value from the server, the last write wins.
    pub fn set_statement_type(&self, kind: StatementType) {
        self.kind.store(kind as u8, Ordering::Release);
    }

    /// Column metadata, once learned.
    pub fn columns(&self) -> Option<Arc<[ColumnMeta]>> {
        self.columns.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_columns(&self, columns: Arc<[ColumnMeta]>) {
        *self.columns.write().unwrap_or_else(PoisonError::into_inner) = Some(columns);
    }

    /// 1 based position of a column, case insensitive.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let columns = self.columns()?;
        columns
            .iter()
            .position(|c| c.name().eq_ignore_ascii_case(name))
            .map(|i| i + 1)
    }
}

type Key = (String, Features);

/// Bounded least recently used cache of [`CacheEntry`].
///
/// Shared by every connection to the same endpoint.
#[derive(Debug)]
pub struct StatementCache {
    entries: Mutex<LruCache<Key, Arc<CacheEntry>>>,
}

impl StatementCache {
    /// Create a cache holding at most `capacity` entries, at least one.
    pub fn new(capacity: usize) -> StatementCache {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        StatementCache { entries: Mutex::new(LruCache::new(capacity)) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<Key, Arc<CacheEntry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lookup or parse a statement.
    ///
    /// Statements carrying the [`DISABLE_CACHE_MARKER`] comment are parsed on
    /// every call and never stored.
    pub fn get_entry(&self, sql: &str, features: Features) -> Arc<CacheEntry> {
        let key = (sql.trim().to_owned(), features);

        if let Some(entry) = self.lock().get(&key) {
            return entry.clone();
        }

        logging!(debug, "statement cache miss: {}", key.0);
        let entry = Arc::new(CacheEntry::parse(&key.0, features));
        if !entry.is_cache_eligible() {
            return entry;
        }

        if let Some((evicted, _)) = self.lock().push(key.clone(), entry.clone()) {
            if evicted != key {
                logging!(debug, "statement cache evicted: {}", evicted.0);
            }
        }
        entry
    }

    /// Returns `true` if the statement is cached, without touching recency.
    pub fn contains(&self, sql: &str, features: Features) -> bool {
        self.lock().contains(&(sql.trim().to_owned(), features))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn features() -> Features {
        Features { escape: true, sharding: true, named_binding: true, datasource: DataSource::Hera }
    }

    #[test]
    fn entry_rewrite() {
        let entry = CacheEntry::parse("select name from t where id = ? and age > ?", features());
        assert_eq!(entry.rewritten(), "select name from t where id = :id and age > :p2");
        assert_eq!(entry.param_count(), 2);
        assert_eq!(entry.actual_param_name(1), "id");
        assert_eq!(entry.actual_param_name(2), "p2");
        assert_eq!(entry.statement_type(), StatementType::Unknown);
        assert!(entry.is_cache_eligible());
    }

    #[test]
    fn entry_without_named_binding() {
        let features = Features { named_binding: false, ..features() };
        let entry = CacheEntry::parse("select * from t where id = ?", features);
        assert_eq!(entry.rewritten(), "select * from t where id = :p1");
        assert_eq!(entry.actual_param_name(1), "p1");
    }

    #[test]
    fn entry_escape() {
        let features = Features { datasource: DataSource::Oracle, ..features() };
        let entry = CacheEntry::parse("{call pkg.proc(?)}", features);
        assert_eq!(entry.rewritten(), "BEGIN pkg.proc(:p1); END;");

        let features = Features { escape: false, ..features };
        let entry = CacheEntry::parse("{call pkg.proc(?)}", features);
        assert_eq!(entry.rewritten(), "{call pkg.proc(:p1)}");
    }

    #[test]
    fn entry_hints() {
        let mut timeouts = HashMap::new();
        timeouts.insert("report".to_owned(), Duration::from_secs(30));

        let sql = "/* report */ /* HERASK=id(1),ScuttleId(2) */ select * from t where id = ?";
        let entry = CacheEntry::parse(sql, features());
        assert_eq!(entry.timeout(&timeouts), Some(Duration::from_secs(30)));
        assert_eq!(entry.timeout(&HashMap::new()), None);
        assert_eq!(entry.sharding().map(|s| s.key.as_str()), Some("id"));

        let features = Features { sharding: false, ..features() };
        let entry = CacheEntry::parse(sql, features);
        assert_eq!(entry.sharding(), None);
    }

    #[test]
    fn learned_state() {
        let entry = CacheEntry::parse("select a, b from t", features());
        assert_eq!(entry.column_index("a"), None);

        entry.set_statement_type(StatementType::NonDml);
        entry.set_columns(vec![ColumnMeta::new("A"), ColumnMeta::new("B")].into());
        assert_eq!(entry.statement_type(), StatementType::NonDml);
        assert_eq!(entry.column_index("b"), Some(2));
        assert_eq!(entry.column_index("A"), Some(1));
        assert_eq!(entry.column_index("c"), None);
    }

    #[test]
    fn cache_idempotent() {
        let cache = StatementCache::new(4);
        let a = cache.get_entry("select * from t where id = ?", features());
        let b = cache.get_entry("select * from t where id = ? ", features());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.rewritten(), b.rewritten());
        assert_eq!(cache.len(), 1);

        let other = Features { named_binding: false, ..features() };
        let c = cache.get_entry("select * from t where id = ?", other);
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn cache_disabled_marker() {
        let cache = StatementCache::new(4);
        let sql = "/* DisableStmtCache */ select 1 from dual";
        let a = cache.get_entry(sql, features());
        let b = cache.get_entry(sql, features());
        assert!(!a.is_cache_eligible());
        assert!(!b.is_cache_eligible());
        assert_eq!(a.rewritten(), b.rewritten());
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_lru_eviction() {
        let cache = StatementCache::new(2);
        cache.get_entry("select 1", features());
        cache.get_entry("select 2", features());
        cache.get_entry("select 3", features());
        assert!(!cache.contains("select 1", features()));
        assert!(cache.contains("select 2", features()));
        assert!(cache.contains("select 3", features()));

        cache.get_entry("select 2", features());
        cache.get_entry("select 4", features());
        assert!(cache.contains("select 2", features()));
        assert!(!cache.contains("select 3", features()));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.capacity(), 2);
    }
}
