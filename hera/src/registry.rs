//! Driver and endpoint registry.
//!
//! A [`Registry`] is constructed once by the application and passed to
//! whatever opens connections. It maps url prefixes to [`Driver`]s, and holds
//! the state shared by every connection to the same endpoint: the statement
//! cache and the markdown budget.
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicU32, Ordering},
    },
};

use crate::{
    Result,
    common::logging,
    connection::{Config, Connection},
    error::ClientError,
    statement::StatementCache,
};

/// Failures counted before an endpoint is reported as marked down.
pub const DEFAULT_MARKDOWN_THRESHOLD: u32 = 3;

/// Something that can open connections for a url.
pub trait Driver: Send + Sync {
    /// Returns `true` if this driver understands `url`.
    fn accepts(&self, url: &str) -> bool;

    /// Open a connection, sharing endpoint state through `registry`.
    fn connect(&self, url: &str, registry: &Registry) -> Result<Connection>;
}

/// Driver for `hera://` and `jdbc:hera:` urls.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeraDriver;

impl HeraDriver {
    pub const PREFIXES: [&'static str; 2] = ["hera://", "jdbc:hera:"];
}

impl Driver for HeraDriver {
    fn accepts(&self, url: &str) -> bool {
        Self::PREFIXES.iter().any(|p| url.starts_with(p))
    }

    fn connect(&self, url: &str, registry: &Registry) -> Result<Connection> {
        let config = Config::parse(url)?;
        Connection::connect_with(config, registry)
    }
}

/// Endpoint failure counter.
///
/// Failures classified as markdown are recorded, any success resets it.
#[derive(Debug)]
pub struct MarkdownBudget {
    failures: AtomicU32,
    threshold: u32,
}

impl MarkdownBudget {
    pub fn new(threshold: u32) -> MarkdownBudget {
        MarkdownBudget { failures: AtomicU32::new(0), threshold: threshold.max(1) }
    }

    /// Count one failure, returns `true` if the endpoint should be marked down.
    pub fn record(&self) -> bool {
        self.failures.fetch_add(1, Ordering::AcqRel) + 1 >= self.threshold
    }

    pub fn reset(&self) {
        self.failures.store(0, Ordering::Release);
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn is_marked_down(&self) -> bool {
        self.failures() >= self.threshold
    }
}

/// Explicit driver registry, see the [module level docs][self].
pub struct Registry {
    drivers: RwLock<Vec<(String, Arc<dyn Driver>)>>,
    caches: Mutex<HashMap<String, Arc<StatementCache>>>,
    markdowns: Mutex<HashMap<String, Arc<MarkdownBudget>>>,
    markdown_threshold: u32,
}

impl Registry {
    /// Create registry with [`HeraDriver`] registered.
    pub fn new() -> Registry {
        let registry = Registry::empty();
        for prefix in HeraDriver::PREFIXES {
            registry.register(prefix, HeraDriver);
        }
        registry
    }

    /// Create registry without any driver.
    pub fn empty() -> Registry {
        Registry {
            drivers: RwLock::new(Vec::new()),
            caches: Mutex::new(HashMap::new()),
            markdowns: Mutex::new(HashMap::new()),
            markdown_threshold: DEFAULT_MARKDOWN_THRESHOLD,
        }
    }

    /// Failures before [`MarkdownBudget::record`] reports a markdown.
    pub fn with_markdown_threshold(mut self, threshold: u32) -> Registry {
        self.markdown_threshold = threshold;
        self
    }

    /// Register `driver` for urls starting with `prefix`.
    ///
    /// Later registrations take precedence.
    pub fn register(&self, prefix: impl Into<String>, driver: impl Driver + 'static) {
        let mut drivers = self.drivers.write().unwrap_or_else(PoisonError::into_inner);
        drivers.insert(0, (prefix.into(), Arc::new(driver)));
    }

    /// Lookup the driver of `url`.
    pub fn driver_for(&self, url: &str) -> Option<Arc<dyn Driver>> {
        let drivers = self.drivers.read().unwrap_or_else(PoisonError::into_inner);
        drivers
            .iter()
            .find(|(prefix, driver)| url.starts_with(prefix.as_str()) && driver.accepts(url))
            .map(|(_, driver)| driver.clone())
    }

    /// Open a connection through the driver of `url`.
    pub fn connect(&self, url: &str) -> Result<Connection> {
        let Some(driver) = self.driver_for(url) else {
            return Err(ClientError::new(format!("no driver registered for {url:?}")).into());
        };
        driver.connect(url, self)
    }

    /// Statement cache shared by every connection to `endpoint`.
    ///
    /// `capacity` only applies when the cache is created.
    pub fn statement_cache(&self, endpoint: &str, capacity: usize) -> Arc<StatementCache> {
        let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
        caches
            .entry(endpoint.to_owned())
            .or_insert_with(|| {
                logging!(debug, "statement cache created for {endpoint}, capacity {capacity}");
                Arc::new(StatementCache::new(capacity))
            })
            .clone()
    }

    /// Markdown budget of `endpoint`.
    pub fn markdown(&self, endpoint: &str) -> Arc<MarkdownBudget> {
        let mut markdowns = self.markdowns.lock().unwrap_or_else(PoisonError::into_inner);
        markdowns
            .entry(endpoint.to_owned())
            .or_insert_with(|| Arc::new(MarkdownBudget::new(self.markdown_threshold)))
            .clone()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let drivers = self.drivers.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Registry")
            .field("drivers", &drivers.iter().map(|(p, _)| p).collect::<Vec<_>>())
            .field("markdown_threshold", &self.markdown_threshold)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ErrorKind;

    struct Refuse;

    impl Driver for Refuse {
        fn accepts(&self, _: &str) -> bool {
            true
        }

        fn connect(&self, _: &str, _: &Registry) -> Result<Connection> {
            Err(ClientError::new("refused").into())
        }
    }

    #[test]
    fn driver_lookup() {
        let registry = Registry::new();
        assert!(registry.driver_for("hera://localhost:10101").is_some());
        assert!(registry.driver_for("jdbc:hera:1:localhost:10101").is_some());
        assert!(registry.driver_for("postgres://localhost").is_none());

        let err = registry.connect("mysql://localhost").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Client(_)));

        registry.register("hera://", Refuse);
        let err = registry.connect("hera://localhost:10101").unwrap_err();
        assert_eq!(err.kind().to_string(), "refused");
        assert!(Registry::empty().driver_for("hera://localhost:1").is_none());
    }

    #[test]
    fn shared_statement_cache() {
        let registry = Registry::new();
        let a = registry.statement_cache("db:10101", 8);
        let b = registry.statement_cache("db:10101", 100);
        let c = registry.statement_cache("other:10101", 8);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(b.capacity(), 8);
    }

    #[test]
    fn markdown_budget() {
        let registry = Registry::new().with_markdown_threshold(2);
        let budget = registry.markdown("db:10101");
        assert!(Arc::ptr_eq(&budget, &registry.markdown("db:10101")));

        assert!(!budget.record());
        assert!(!budget.is_marked_down());
        assert!(budget.record());
        assert!(budget.is_marked_down());
        budget.reset();
        assert_eq!(budget.failures(), 0);
        assert!(!registry.markdown("other:1").is_marked_down());
    }
}
