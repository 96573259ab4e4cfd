//! Named parameter binding.
//!
//! Positional `:pN` placeholders are mapped to the column they are compared
//! with or inserted into, so the proxy sees `where id = :id` instead of
//! `where id = :p1`. Only the shapes a shard key can appear in are analyzed:
//! `col = :pN`, `insert (...) values (...)`, `col between :pA and :pB` and
//! `col in (:pA, ...)`. Unrecognized placeholders keep their positional name.
use regex::{Captures, Regex};
use std::{collections::HashMap, sync::LazyLock};

use crate::common::verbose;

/// Longest bind name the proxy accepts.
pub const MAX_BIND_NAME_LEN: usize = 30;

const RESERVED: &[&str] = &["rowid"];

const FUNCTIONS: &[&str] = &[
    "substrb", "substrc", "substr2", "substr4", "substr", "round", "cast", "to_char",
    "to_number", "abs", "max", "min", "avg", "sum",
];

macro_rules! pattern {
    ($name:ident = $re:literal) => {
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($re).expect("constant pattern"));
    };
}

pattern!(KV = r"\s*[\da-z.d_-]+\s*=\s*:p\d+");
pattern!(INSERT = r"insert\s*(into){0,1}\s*.*\s*\((.*),{0,}\)\s*values\s*\(\s*(.*)[:p\d+,{0,}\s*]+(.*)\)*");
pattern!(INSERT_SPLIT = r"\)\s*values\s*\(");
pattern!(BETWEEN = r"[\s\(][\da-z.d_-]+\s*between\s*:p\d+\s*and\s*:p\d+\s*");
pattern!(IN = r"\s*[\da-z.d_-]+\s*in\s*\(\s*(:p\d+\s*,{0,1}\s*)+\)*");
pattern!(IN_SPLIT = r"\s+in\s+\(");
pattern!(POSITION = r":p\d+");
pattern!(PLACEHOLDER = r":p(\d+)");

/// Positional parameter name to actual name, in discovery order.
#[derive(Debug, Default)]
struct Mappings(Vec<(String, String)>);

impl Mappings {
    fn contains_name(&self, name: &str) -> bool {
        self.0.iter().any(|(_, n)| n == name)
    }

    fn put(&mut self, key: &str, name: String) {
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = name,
            None => self.0.push((key.to_owned(), name)),
        }
    }

    /// Add `position -> name`, suffixing the name with 2, 3, ... when taken.
    fn add(&mut self, position: &str, name: &str) {
        let name = normalize_name(name);
        let position = position.trim();

        if !is_valid_name(&name) || !POSITION.is_match(position) {
            return;
        }

        let name = if self.contains_name(&name) {
            let mut suffix = 2;
            while self.contains_name(&format!("{name}{suffix}")) {
                suffix += 1;
            }
            format!("{name}{suffix}")
        } else {
            name
        };

        if name.len() <= MAX_BIND_NAME_LEN {
            self.put(&position[1..], name);
        }
    }
}

/// Split like `String::split` but drop trailing empty pieces.
fn split_trimmed<'a>(pieces: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut pieces: Vec<_> = pieces.collect();
    while pieces.last().is_some_and(|p| p.is_empty()) {
        pieces.pop();
    }
    pieces
}

fn strip_parens(s: &str) -> String {
    s.chars().filter(|c| *c != '(' && *c != ')').collect()
}

/// Remove parenthesis and table alias.
fn normalize_name(raw: &str) -> String {
    let raw = strip_parens(raw);
    let parts = split_trimmed(raw.trim().split('.'));
    match parts.as_slice() {
        [_, column] => column.to_string(),
        [first, ..] => first.to_string(),
        [] => String::new(),
    }
}

fn mapping_key(key: &str) -> &str {
    let key = key.trim();
    key.strip_suffix(')').unwrap_or(key).trim()
}

fn is_valid_name(name: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return false;
    };
    if RESERVED.contains(&name) || first.is_ascii_digit() {
        return false;
    }
    if name.contains(' ') || name.contains(',') {
        return false;
    }
    name.find(":p") == name.rfind(":p")
}

/// Byte offsets of the first `(` and its matching `)`.
fn paren_span(v: &str) -> Option<(usize, usize)> {
    let open = v.find('(')?;
    let mut depth = 0usize;
    for (i, b) in v.bytes().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return (i > open).then_some((open, i));
                }
            }
            _ => {}
        }
    }
    None
}

/// Collapse function calls around insert values into a single token.
fn collapse_functions(values: &str) -> String {
    let mut result = values.to_owned();
    let mut i = 0;

    while let Some(func) = FUNCTIONS.get(i) {
        let Some(at) = result.find(func) else {
            i += 1;
            continue;
        };
        let rest = &result[at..];
        let Some((open, close)) = paren_span(rest) else {
            break;
        };
        if open == 0 {
            break;
        }
        result = format!("{}functionbindingblock{}", &result[..at], &rest[close + 1..]);
    }

    strip_parens(&result)
}

fn parse_kv(sql: &str, mappings: &mut Mappings) {
    for token in KV.find_iter(sql) {
        let kv = split_trimmed(token.as_str().split('='));
        let [name, position] = kv.as_slice() else {
            continue;
        };
        mappings.add(position, name);
    }
}

fn parse_insert(sql: &str, mappings: &mut Mappings) {
    for token in INSERT.find_iter(sql) {
        let token = token.as_str();
        let kv = split_trimmed(INSERT_SPLIT.split(token));
        let [columns, values] = kv.as_slice() else {
            continue;
        };

        let columns = columns.trim();
        if !columns.starts_with("insert") {
            continue;
        }
        let columns = columns.find('(').map_or(columns, |at| &columns[at + 1..]);
        let columns = split_trimmed(columns.trim().split(','));

        let values = format!("({}", values.trim());
        let Some((open, close)) = paren_span(&values) else {
            verbose!("unmatched parenthesis in insert values: {values}");
            break;
        };
        let values = &values[open + 1..close];

        let mut tokens: Vec<String> =
            POSITION.find_iter(values).map(|m| m.as_str().to_owned()).collect();
        if tokens.is_empty() {
            continue;
        }

        if columns.len() > tokens.len() {
            let collapsed = collapse_functions(values);
            let positions = split_trimmed(collapsed.split(','));
            if positions.len() != columns.len() {
                continue;
            }
            tokens = positions.into_iter().map(str::to_owned).collect();
        }

        for (column, value) in columns.iter().zip(&tokens) {
            let value = value.trim();
            if !value.starts_with(":p") {
                continue;
            }
            let key = mapping_key(value);
            if is_valid_name(key) {
                mappings.add(key, column);
            }
        }
    }
}

fn parse_between(sql: &str, mappings: &mut Mappings) {
    for token in BETWEEN.find_iter(sql) {
        let kv = split_trimmed(token.as_str().split(" between "));
        let [name, range] = kv.as_slice() else {
            continue;
        };
        let name = normalize_name(name);
        let positions = split_trimmed(range.split(" and "));
        let [low, high] = positions.as_slice() else {
            continue;
        };
        mappings.add(mapping_key(low), &name);
        mappings.add(mapping_key(high), &name);
    }
}

fn parse_in(sql: &str, mappings: &mut Mappings) {
    for token in IN.find_iter(sql) {
        let kv = split_trimmed(IN_SPLIT.split(token.as_str()));
        let [name, list] = kv.as_slice() else {
            continue;
        };
        let name = normalize_name(name);
        if name.eq_ignore_ascii_case("not") {
            continue;
        }
        let list = strip_parens(list);
        for position in list.trim().split(',') {
            if position.trim().starts_with(":p") {
                mappings.add(position, &name);
            }
        }
    }
}

/// Returns `false` for PL/SQL blocks and `{call}` escapes.
fn is_supported(sql: &str) -> bool {
    let plsql = sql.contains("begin") && sql.contains("end") && sql.contains(';');
    let call = sql.contains("call ") && sql.contains('{') && sql.contains('}');
    !plsql && !call
}

/// Map 1 based parameter positions to bind names.
pub fn analyze(sql: &str) -> HashMap<usize, String> {
    let sql = sql.trim().to_lowercase();
    if sql.is_empty() || !is_supported(&sql) {
        return HashMap::new();
    }

    let mut mappings = Mappings::default();
    parse_kv(&sql, &mut mappings);
    parse_insert(&sql, &mut mappings);
    parse_between(&sql, &mut mappings);
    parse_in(&sql, &mut mappings);

    mappings
        .0
        .into_iter()
        .filter_map(|(key, name)| Some((key.strip_prefix('p')?.parse().ok()?, name)))
        .collect()
}

/// Replace every `:pN` with `:<name>` where `N` has a name.
pub fn rename(sql: &str, names: &HashMap<usize, String>) -> String {
    if names.is_empty() {
        return sql.to_owned();
    }
    PLACEHOLDER
        .replace_all(sql, |caps: &Captures| {
            let name = caps[1].parse::<usize>().ok().and_then(|i| names.get(&i));
            match name {
                Some(name) => format!(":{}", name.trim()),
                None => caps[0].to_owned(),
            }
        })
        .into_owned()
}
