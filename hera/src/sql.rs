//! Sql string operation.
use std::borrow::Cow;

use crate::statement::DISABLE_CACHE_MARKER;

/// Type that represent sql string.
pub trait Sql {
    /// Returns sql string.
    fn sql(&self) -> &str;

    /// Return `true` if current statement should be cached.
    fn persistent(&self) -> bool;

    /// Sql string as sent to the statement cache.
    ///
    /// Non persistent statements are marked with [`DISABLE_CACHE_MARKER`].
    fn statement(&self) -> Cow<'_, str> {
        match self.persistent() {
            true => Cow::Borrowed(self.sql()),
            false => Cow::Owned(format!("/* {DISABLE_CACHE_MARKER} */ {}", self.sql())),
        }
    }
}

impl Sql for &str {
    fn sql(&self) -> &str {
        self
    }

    fn persistent(&self) -> bool {
        true
    }
}

impl Sql for String {
    fn sql(&self) -> &str {
        self
    }

    fn persistent(&self) -> bool {
        true
    }
}

/// Non persistent query string.
#[derive(Debug)]
pub struct SqlOnce<'sql>(&'sql str);

impl Sql for SqlOnce<'_> {
    fn sql(&self) -> &str {
        self.0
    }

    fn persistent(&self) -> bool {
        false
    }
}

/// Extension trait for easier query persistence config.
pub trait SqlExt<'a> {
    /// Disable statement caching.
    fn once(self) -> SqlOnce<'a>;
}

impl<'a> SqlExt<'a> for &'a str {
    fn once(self) -> SqlOnce<'a> {
        SqlOnce(self)
    }
}

impl<'a> SqlExt<'a> for SqlOnce<'a> {
    fn once(self) -> SqlOnce<'a> {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn once_marks_statement() {
        assert_eq!("select 1".statement(), "select 1");
        assert_eq!("select 1".once().statement(), "/* DisableStmtCache */ select 1");
        assert!(!"select 1".once().once().persistent());
    }
}
