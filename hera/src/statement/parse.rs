//! SQL text rewrite.
use regex::Regex;
use std::{borrow::Cow, collections::HashMap, sync::LazyLock, time::Duration};

use crate::connection::DataSource;

static CALL_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*\{\s*call\s*(.*)\s*\}\s*").expect("constant pattern")
});

static SHARD_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^.*/\* HERASK=(.+)\(([\d,]+)\),ScuttleId\(([\d,]+)\) \*/.*$")
        .expect("constant pattern")
});

/// Marker comment which opt a statement out of the statement cache.
pub const DISABLE_CACHE_MARKER: &str = "DisableStmtCache";

/// Shard key hint of a statement.
///
/// Declared with a `/* HERASK=<key>(<pos,...>),ScuttleId(<pos,...>) */`
/// comment, positions are 1 based parameter positions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShardingInfo {
    pub key: String,
    pub key_positions: Vec<usize>,
    pub scuttle_positions: Vec<usize>,
}

/// Result of [`scan`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Scanned {
    /// Statement with every `?` replaced by `:p<n>`.
    pub sql: String,
    /// Every `/* ... */` comment, concatenated.
    pub comments: String,
    pub param_count: usize,
}

/// Rewrite a `{ call proc(...) }` escape to the datasource dialect.
pub fn escape(sql: &str, datasource: DataSource) -> Cow<'_, str> {
    let Some(captures) = CALL_ESCAPE.captures(sql) else {
        return Cow::Borrowed(sql);
    };
    let call = captures.get(1).map_or("", |m| m.as_str());
    match datasource {
        DataSource::Oracle => Cow::Owned(format!("BEGIN {call}; END;")),
        _ => Cow::Owned(format!("CALL {call};")),
    }
}

/// Parse the shard key hint comment.
pub fn sharding_hint(sql: &str) -> Option<ShardingInfo> {
    if !sql.contains("HERASK=") {
        return None;
    }
    let captures = SHARD_HINT.captures(sql)?;
    Some(ShardingInfo {
        key: captures[1].to_owned(),
        key_positions: positions(&captures[2]),
        scuttle_positions: positions(&captures[3]),
    })
}

fn positions(list: &str) -> Vec<usize> {
    list.split(',').filter_map(|p| p.parse().ok()).collect()
}

/// Collect comments and number the `?` placeholders.
///
/// Comments are copied as is, a `?` inside a comment is not a placeholder.
/// An unterminated `/*` is kept and scanning resumes right after it.
pub fn scan(sql: &str) -> Scanned {
    let mut out = Scanned { sql: String::with_capacity(sql.len() + 8), ..Default::default() };
    let mut rest = sql;

    while !rest.is_empty() {
        if let Some(body) = rest.strip_prefix("/*") {
            match body.find("*/") {
                Some(end) => {
                    let comment = &rest[..end + 4];
                    out.sql.push_str(comment);
                    out.comments.push_str(comment);
                    rest = &rest[end + 4..];
                }
                None => {
                    out.sql.push_str("/*");
                    rest = body;
                }
            }
            continue;
        }

        let mut chars = rest.chars();
        let Some(ch) = chars.next() else { break };
        if ch == '?' {
            out.param_count += 1;
            out.sql.push_str(":p");
            out.sql.push_str(itoa::Buffer::new().format(out.param_count));
        } else {
            out.sql.push(ch);
        }
        rest = chars.as_str();
    }

    out
}

/// Find a per query timeout named by a `/* name */` comment.
///
/// When several names match, the longest timeout wins.
pub fn timeout_hint(comments: &str, timeouts: &HashMap<String, Duration>) -> Option<Duration> {
    if comments.is_empty() {
        return None;
    }
    timeouts
        .iter()
        .filter(|(name, _)| {
            [
                format!("/* {name} */"),
                format!("/* {name}*/"),
                format!("/*{name} */"),
                format!("/*{name}*/"),
            ]
            .iter()
            .any(|tag| comments.contains(tag.as_str()))
        })
        .map(|(_, timeout)| *timeout)
        .max()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn escape_call() {
        let sql = "{call pkg.proc(?, ?)}";
        assert_eq!(escape(sql, DataSource::Oracle), "BEGIN pkg.proc(?, ?); END;");
        assert_eq!(escape(sql, DataSource::Hera), "CALL pkg.proc(?, ?);");
        assert_eq!(escape(sql, DataSource::MySql), "CALL pkg.proc(?, ?);");
        assert!(matches!(escape("select 1 from dual", DataSource::Oracle), Cow::Borrowed(_)));
    }

    #[test]
    fn scan_placeholders() {
        let s = scan("select * from t where a = ? and b = ?");
        assert_eq!(s.sql, "select * from t where a = :p1 and b = :p2");
        assert_eq!(s.param_count, 2);
        assert_eq!(s.comments, "");
    }

    #[test]
    fn scan_keeps_comments() {
        let s = scan("/* q1 ? */ select ? from t /* x */");
        assert_eq!(s.sql, "/* q1 ? */ select :p1 from t /* x */");
        assert_eq!(s.comments, "/* q1 ? *//* x */");
        assert_eq!(s.param_count, 1);
    }

    #[test]
    fn scan_unterminated_comment() {
        let s = scan("select ? /* open ?");
        assert_eq!(s.sql, "select :p1 /* open :p2");
        assert_eq!(s.param_count, 2);
        assert_eq!(s.comments, "");
    }

    #[test]
    fn scan_non_ascii() {
        let s = scan("select 'é' from t where a = ?");
        assert_eq!(s.sql, "select 'é' from t where a = :p1");
    }

    #[test]
    fn shard_hint() {
        let sql = "/* HERASK=accountid(1),ScuttleId(3) */ select * from t where id = ?";
        let info = sharding_hint(sql).unwrap();
        assert_eq!(info.key, "accountid");
        assert_eq!(info.key_positions, vec![1]);
        assert_eq!(info.scuttle_positions, vec![3]);

        let info = sharding_hint("/* HERASK=id(1,2),ScuttleId(3,4) */\nselect 1").unwrap();
        assert_eq!(info.key_positions, vec![1, 2]);
        assert_eq!(info.scuttle_positions, vec![3, 4]);

        assert_eq!(sharding_hint("select 1"), None);
        assert_eq!(sharding_hint("/* HERASK=id */ select 1"), None);
    }

    #[test]
    fn timeout_comment() {
        let mut timeouts = HashMap::new();
        timeouts.insert("slow".to_owned(), Duration::from_secs(5));
        timeouts.insert("slower".to_owned(), Duration::from_secs(9));

        assert_eq!(timeout_hint("/* slow */", &timeouts), Some(Duration::from_secs(5)));
        assert_eq!(timeout_hint("/*slow*/", &timeouts), Some(Duration::from_secs(5)));
        assert_eq!(timeout_hint("/* slower*/", &timeouts), Some(Duration::from_secs(9)));
        assert_eq!(timeout_hint("/* fast */", &timeouts), None);
        assert_eq!(timeout_hint("", &timeouts), None);
    }
}
