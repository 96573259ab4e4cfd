//! Telemetry event sink.
//!
//! The driver reports one transaction per execute and fetch round through an
//! [`EventSink`]. Emitting the events somewhere is up to the sink.
use std::{fmt, sync::Arc, time::Instant};

use crate::common::logging;

/// Status of a successful scope.
pub const STATUS_OK: &str = "0";

/// Transaction kind of statement execution.
pub const EXEC: &str = "EXEC";

/// Transaction kind of a fetch round.
pub const FETCH: &str = "FETCH";

/// Receiver of telemetry events.
pub trait EventSink: Send + Sync {
    /// Open a transaction scope.
    fn transaction(&self, kind: &str, name: &str) -> Box<dyn EventScope>;

    /// Returns `false` if scopes are discarded anyway.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// An open transaction scope.
pub trait EventScope {
    fn add_data(&mut self, key: &str, value: &str);

    /// Set the status, defaults to [`STATUS_OK`].
    fn set_status(&mut self, status: &str);

    /// Close the scope.
    fn completed(self: Box<Self>);
}

/// Shared sink handle.
pub type Sink = Arc<dyn EventSink>;

/// Sink which drop every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn transaction(&self, _: &str, _: &str) -> Box<dyn EventScope> {
        Box::new(NoopScope)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

struct NoopScope;

impl EventScope for NoopScope {
    fn add_data(&mut self, _: &str, _: &str) { }

    fn set_status(&mut self, _: &str) { }

    fn completed(self: Box<Self>) { }
}

/// Sink which writes every completed scope through `log`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn transaction(&self, kind: &str, name: &str) -> Box<dyn EventScope> {
        Box::new(LogScope {
            kind: kind.to_owned(),
            name: name.to_owned(),
            status: STATUS_OK.to_owned(),
            data: Vec::new(),
            started: Instant::now(),
        })
    }
}

struct LogScope {
    kind: String,
    name: String,
    status: String,
    data: Vec<(String, String)>,
    started: Instant,
}

impl EventScope for LogScope {
    fn add_data(&mut self, key: &str, value: &str) {
        self.data.push((key.to_owned(), value.to_owned()));
    }

    fn set_status(&mut self, status: &str) {
        self.status = status.to_owned();
    }

    fn completed(self: Box<Self>) {
        let elapsed = self.started.elapsed();
        match self.status == STATUS_OK {
            true => {
                logging!(debug, "{self} {}ms", elapsed.as_millis());
            }
            false => {
                logging!(warn, "{self} {}ms", elapsed.as_millis());
            }
        }
    }
}

impl fmt::Display for LogScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} status={}", self.kind, self.name, self.status)?;
        for (key, value) in &self.data {
            write!(f, " {key}={value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::Mutex;

    use super::*;

    /// Sink which records completed scopes as `kind name status`.
    #[derive(Default)]
    pub(crate) struct RecordSink(pub Arc<Mutex<Vec<String>>>);

    struct RecordScope {
        line: String,
        status: String,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl EventSink for RecordSink {
        fn transaction(&self, kind: &str, name: &str) -> Box<dyn EventScope> {
            Box::new(RecordScope {
                line: format!("{kind} {name}"),
                status: STATUS_OK.to_owned(),
                events: self.0.clone(),
            })
        }
    }

    impl EventScope for RecordScope {
        fn add_data(&mut self, _: &str, _: &str) { }

        fn set_status(&mut self, status: &str) {
            self.status = status.to_owned();
        }

        fn completed(self: Box<Self>) {
            let line = format!("{} {}", self.line, self.status);
            self.events.lock().unwrap().push(line);
        }
    }

    #[test]
    fn log_scope_display() {
        let scope = LogScope {
            kind: EXEC.into(),
            name: "select".into(),
            status: STATUS_OK.into(),
            data: vec![("rows".into(), "3".into())],
            started: Instant::now(),
        };
        assert_eq!(scope.to_string(), "EXEC select status=0 rows=3");
        Box::new(scope).completed();
    }

    #[test]
    fn noop_is_disabled() {
        assert!(!NoopSink.is_enabled());
        let mut scope = NoopSink.transaction(FETCH, "x");
        scope.set_status("1");
        scope.completed();
    }
}
