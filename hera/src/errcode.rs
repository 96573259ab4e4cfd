//! Server error classification.
//!
//! Every error response is turned into a [`ServerError`] carrying the vendor
//! code and sqlstate extracted from its message, and a set of [`Category`]
//! looked up from static tables. The categories drive what callers do next,
//! see [`Disposition`].
use std::{
    collections::HashMap,
    fmt,
    ops::{BitOr, BitOrAssign, RangeInclusive},
    sync::OnceLock,
};

use crate::{
    protocol::{Opcode, opcode::response},
    session::ConnectionMeta,
};

/// Sqlstate used when the message carries no known vendor code.
pub const DEFAULT_SQLSTATE: &str = "99999";

/// Vendor codes reserved for application raised PL/SQL errors.
pub const CUSTOM_PLSQL: RangeInclusive<u32> = 20000..=20999;

/// Error category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Category {
    /// The connection must be discarded.
    StaleConnection = 1 << 0,
    /// Counts toward the endpoint markdown budget.
    Markdown = 1 << 1,
    ServerSide = 1 << 2,
    /// Eligible for retry on a fresh connection.
    ResourceAllocation = 1 << 3,
    /// Bind values are safe to log.
    BadUserData = 1 << 4,
    /// Not reported to telemetry.
    Ignorable = 1 << 5,
    PasswordWrong = 1 << 6,
    /// Report markdown without discarding the connection.
    ReportOnlyMarkdown = 1 << 7,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Self::StaleConnection,
        Self::Markdown,
        Self::ServerSide,
        Self::ResourceAllocation,
        Self::BadUserData,
        Self::Ignorable,
        Self::PasswordWrong,
        Self::ReportOnlyMarkdown,
    ];
}

/// Set of [`Category`].
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Categories(u8);

impl Categories {
    pub const EMPTY: Categories = Categories(0);

    pub const fn contains(self, category: Category) -> bool {
        self.0 & category as u8 != 0
    }

    pub fn insert(&mut self, category: Category) {
        self.0 |= category as u8;
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Category> {
        Category::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl From<Category> for Categories {
    fn from(category: Category) -> Self {
        Categories(category as u8)
    }
}

impl FromIterator<Category> for Categories {
    fn from_iter<T: IntoIterator<Item = Category>>(iter: T) -> Self {
        iter.into_iter().fold(Categories::EMPTY, |acc, c| acc | c)
    }
}

impl<C: Into<Categories>> BitOr<C> for Categories {
    type Output = Categories;

    fn bitor(self, rhs: C) -> Categories {
        Categories(self.0 | rhs.into().0)
    }
}

impl<C: Into<Categories>> BitOr<C> for Category {
    type Output = Categories;

    fn bitor(self, rhs: C) -> Categories {
        Categories::from(self) | rhs
    }
}

impl<C: Into<Categories>> BitOrAssign<C> for Categories {
    fn bitor_assign(&mut self, rhs: C) {
        self.0 |= rhs.into().0;
    }
}

impl fmt::Debug for Categories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

// ===== Tables =====

const STALE_CODES: &[u32] = &[
    28, 1003, 1012, 1014, 1033, 1034, 1035, 1089, 1090, 1092, 2068, 3113, 3114, 12541, 12560,
    12571, 17002, 17008, 17009, 17410, 17401, 25408, 17430, 1475, 23326,
];

/// Matched as a message substring, or as the exact sqlstate.
const STALE_MESSAGES: &[&str] = &[
    "Connection reset by peer",
    "55032",
    "08001",
    "08003",
    "40003",
    "S1000",
    "08S01",
    "08006",
    "OALL8 is in an inconsistent state.",
    "OCC error: OCC-100: backlog timeout",
    "OCC error: OCC-102: backlog eviction",
    "OCC error: OCC-103: request rejected, database down",
    "OCC error: OCC-104: saturation soft sql eviction",
    crate::protocol::UNEXPECTED_EOF,
];

const MARKDOWN_CODES: &[u32] = &[1017, 12535, 12545];

/// Markdown only when the lowercased message contains the substring.
const MARKDOWN_SUBSTRINGS: &[(u32, &str)] = &[(4031, "large pool")];

const CODE_TABLE: &[(Category, &[u32])] = &[
    (Category::StaleConnection, STALE_CODES),
    (Category::Markdown, MARKDOWN_CODES),
    (Category::ServerSide, &[1536, 1552]),
    (Category::ResourceAllocation, &[20, 1000]),
    (Category::BadUserData, &[1, 1401, 12899, 1438]),
    (Category::PasswordWrong, &[1017]),
    (Category::Ignorable, &[1, 54]),
    (Category::ReportOnlyMarkdown, &[1031]),
];

fn code_table() -> &'static HashMap<u32, Categories> {
    static TABLE: OnceLock<HashMap<u32, Categories>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut map = HashMap::<u32, Categories>::new();
        for (category, codes) in CODE_TABLE {
            for code in *codes {
                *map.entry(*code).or_default() |= *category;
            }
        }
        map
    })
}

/// Vendor code ranges to sqlstate, later entries override earlier ones.
const SQLSTATES: &[(&str, &[RangeInclusive<u32>])] = &[
    ("00000", &[0..=0]),
    ("07008", &[2126..=2126]),
    ("08003", &[2121..=2121]),
    ("0A000", &[3000..=3099]),
    ("21000", &[1427..=1427, 2112..=2112]),
    ("22008", &[1800..=1899]),
    ("22024", &[1479..=1480]),
    ("22025", &[1424..=1424]),
    ("23000", &[1..=1, 2290..=2299]),
    ("40000", &[2091..=2092]),
    ("60000", &[370..=429, 600..=899, 6430..=6449, 7200..=7999, 9700..=9999]),
    ("61000", &[18..=35, 50..=68, 2376..=2399, 4020..=4039]),
    ("62000", &[100..=120, 440..=569]),
    ("63000", &[150..=159, 2128..=2128, 2700..=2899, 3100..=3199, 6200..=6249]),
    ("64000", &[200..=369, 1100..=1250]),
    ("65000", &[6500..=6599]),
    ("66000", &[6000..=6149, 6250..=6429, 6600..=6999, 12100..=12299, 12500..=12599]),
    ("67000", &[430..=439]),
    ("69000", &[570..=599, 7000..=7199]),
    ("90000", &[10000..=10999]),
    ("72000", &[
        1000..=1099, 1400..=1489, 1495..=1499, 1500..=1699, 2400..=2419, 2425..=2449,
        4060..=4069, 8000..=8190, 12000..=12019, 12300..=12499, 12700..=21999,
    ]),
    ("82100", &[2100..=2100]),
    ("82101", &[2101..=2101]),
    ("82102", &[2102..=2102]),
    ("82103", &[2103..=2103]),
    ("82104", &[2104..=2104]),
    ("82105", &[2105..=2105]),
    ("82106", &[2106..=2106]),
    ("82107", &[2107..=2107]),
    ("82108", &[2108..=2108]),
    ("82109", &[2109..=2109]),
    ("82110", &[2110..=2110]),
    ("82111", &[2111..=2111]),
    ("82112", &[2113..=2113]),
    ("82113", &[2115..=2115]),
    ("82114", &[2116..=2116]),
    ("82115", &[2119..=2119]),
    ("82116", &[2120..=2120]),
    ("82117", &[2122..=2122]),
    ("82118", &[2123..=2123]),
    ("82119", &[2125..=2125]),
    ("82120", &[2127..=2127]),
    ("82121", &[2129..=2129]),
    ("82122", &[2130..=2130]),
    ("02000", &[1095..=1095, 1403..=1403]),
    ("22001", &[1401..=1401, 1406..=1406]),
    ("22002", &[1405..=1405, 2124..=2124]),
    ("22003", &[1426..=1426, 1438..=1438, 1455..=1455, 1457..=1457]),
    ("22012", &[1476..=1476]),
    ("22019", &[911..=911, 1425..=1425]),
    ("22022", &[1411..=1411]),
    ("22023", &[1025..=1025, 1488..=1488, 4000..=4019]),
    ("24000", &[
        1001..=1003, 1410..=1410, 8006..=8006, 2114..=2114, 2117..=2118, 2122..=2122,
    ]),
    ("42000", &[
        22..=22, 251..=251, 900..=999, 1031..=1031, 1490..=1493, 1700..=1799, 1900..=2099,
        2140..=2289, 2420..=2424, 2450..=2499, 3276..=3299, 4040..=4059, 4070..=4099,
    ]),
    ("44000", &[1402..=1402]),
];

fn sqlstate_table() -> &'static HashMap<u32, &'static str> {
    static TABLE: OnceLock<HashMap<u32, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut map = HashMap::new();
        for (state, ranges) in SQLSTATES {
            for code in ranges.iter().cloned().flatten() {
                map.insert(code, *state);
            }
        }
        map
    })
}

// ===== Lookup =====

/// Returns the sqlstate of a vendor code, [`DEFAULT_SQLSTATE`] if unknown.
pub fn sqlstate(code: u32) -> &'static str {
    sqlstate_table().get(&code).copied().unwrap_or(DEFAULT_SQLSTATE)
}

/// Extract the vendor code from an `ORA-xxxxx` or `SQL-xxxxx` marker in `message`.
pub fn vendor_code(message: &str) -> Option<u32> {
    let marker = ["ORA-", "SQL-"].into_iter().find_map(|prefix| {
        let at = message.find(prefix)?;
        message.get(at..at + 9)
    })?;
    marker[4..].parse().ok()
}

/// Returns sqlstate and vendor code of an error message, `("99999", 0)` if it carries none.
pub fn sqlstate_and_vendor_code(message: &str) -> (&'static str, u32) {
    match vendor_code(message) {
        Some(code) => (sqlstate(code), code),
        None => (DEFAULT_SQLSTATE, 0),
    }
}

/// Classify a single error by its vendor code and message.
pub fn classify(code: u32, message: &str) -> Categories {
    let mut categories = code_table().get(&code).copied().unwrap_or_default();

    if MARKDOWN_SUBSTRINGS.iter().any(|(c, _)| *c == code) {
        let lower = message.to_lowercase();
        if MARKDOWN_SUBSTRINGS.iter().any(|(c, s)| *c == code && lower.contains(s)) {
            categories |= Category::Markdown;
        }
    }

    if STALE_MESSAGES.iter().any(|s| message.contains(s)) {
        categories |= Category::StaleConnection;
    }

    categories
}

fn classify_state(sqlstate: &str) -> Categories {
    match STALE_MESSAGES.contains(&sqlstate) {
        true => Category::StaleConnection.into(),
        false => Categories::EMPTY,
    }
}

pub fn is_custom_plsql(code: u32) -> bool {
    CUSTOM_PLSQL.contains(&code)
}

/// Returns `false` if any error in the chain is a custom PL/SQL error or ignorable.
pub fn should_log(error: &ServerError) -> bool {
    error.chain().all(|e| {
        !is_custom_plsql(e.vendor_code) && !e.categories.contains(Category::Ignorable)
    })
}

/// What a caller should do about an error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Disposition {
    /// Close the connection instead of reusing it.
    pub discard_connection: bool,
    /// Count toward the endpoint markdown budget.
    pub count_markdown: bool,
    /// Report a markdown signal only.
    pub report_markdown: bool,
    /// Retry on a fresh connection.
    pub retry: bool,
    pub log_bind_values: bool,
    pub suppress_telemetry: bool,
}

impl From<Categories> for Disposition {
    fn from(c: Categories) -> Self {
        Self {
            discard_connection: c.contains(Category::StaleConnection),
            count_markdown: c.contains(Category::Markdown),
            report_markdown: c.contains(Category::ReportOnlyMarkdown),
            retry: c.contains(Category::ResourceAllocation),
            log_bind_values: c.contains(Category::BadUserData),
            suppress_telemetry: c.contains(Category::Ignorable),
        }
    }
}

// ===== Server error =====

/// Which error response the server sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerErrorKind {
    /// `SQL_ERROR`, raised by the database.
    Sql,
    /// `ERROR`, raised by the proxy.
    Proxy,
    /// `MARKDOWN`, the proxy is marked down.
    Markdown,
    /// Any other opcode where a value was expected.
    Unknown,
}

/// An error reported by the server.
#[derive(Clone)]
pub struct ServerError {
    kind: ServerErrorKind,
    opcode: Opcode,
    message: String,
    vendor_code: u32,
    sqlstate: &'static str,
    categories: Categories,
    meta: ConnectionMeta,
    next: Option<Box<ServerError>>,
}

impl ServerError {
    /// Build and classify an error from a response frame.
    pub fn from_response(opcode: Opcode, payload: &[u8], meta: &ConnectionMeta) -> ServerError {
        let message = String::from_utf8_lossy(payload).into_owned();
        let (sqlstate, code) = sqlstate_and_vendor_code(&message);
        let kind = match opcode {
            response::SQL_ERROR => ServerErrorKind::Sql,
            response::ERROR => ServerErrorKind::Proxy,
            response::MARKDOWN => ServerErrorKind::Markdown,
            _ => ServerErrorKind::Unknown,
        };
        // only database errors carry a vendor code
        let vendor_code = match kind {
            ServerErrorKind::Sql => code,
            _ => 0,
        };
        let categories = classify(vendor_code, &message) | classify_state(sqlstate);

        ServerError {
            kind,
            opcode,
            message,
            vendor_code,
            sqlstate,
            categories,
            meta: meta.clone(),
            next: None,
        }
    }

    /// Append `next` at the end of this error chain.
    pub fn chained(mut self, next: ServerError) -> ServerError {
        let mut tail = &mut self.next;
        while let Some(e) = tail {
            tail = &mut e.next;
        }
        *tail = Some(Box::new(next));
        self
    }

    pub fn kind(&self) -> ServerErrorKind {
        self.kind
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Vendor code, `0` if the message carries none.
    pub fn vendor_code(&self) -> u32 {
        self.vendor_code
    }

    pub fn sqlstate(&self) -> &'static str {
        self.sqlstate
    }

    /// Categories of this error alone.
    pub fn categories(&self) -> Categories {
        self.categories
    }

    /// Categories aggregated over the chain.
    pub fn chain_categories(&self) -> Categories {
        self.chain().fold(Categories::EMPTY, |acc, e| acc | e.categories)
    }

    pub fn disposition(&self) -> Disposition {
        Disposition::from(self.chain_categories())
    }

    pub fn meta(&self) -> &ConnectionMeta {
        &self.meta
    }

    pub fn next(&self) -> Option<&ServerError> {
        self.next.as_deref()
    }

    /// Iterate this error followed by its chained causes.
    pub fn chain(&self) -> impl Iterator<Item = &ServerError> {
        std::iter::successors(Some(self), |e| e.next())
    }
}

impl std::error::Error for ServerError { }

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = &self.message;
        match self.kind {
            ServerErrorKind::Sql => write!(f, "SQL error: {msg}")?,
            ServerErrorKind::Proxy => write!(f, "Hera error: {msg}{}", self.meta)?,
            ServerErrorKind::Markdown => write!(f, "Hera markdown: {msg}")?,
            ServerErrorKind::Unknown => write!(f, "Unknown error: cmd={}, data={msg}", self.opcode)?,
        }
        if let Some(next) = &self.next {
            write!(f, "; {next}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

// ===== Batch =====

/// Outcome of one row of an array bind execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Row executed, affected count unknown.
    SuccessNoInfo,
    Failed,
}

/// Decode per row outcomes from an array bind error message.
///
/// The message reads `<code> <n> <offset> <code> ... <text>`, where `n` is
/// twice the number of failed rows and each pair names the zero based offset
/// of a failed row. A message that does not follow this layout marks every
/// row as failed.
pub fn array_counts(message: &str, rows: usize) -> Vec<BatchOutcome> {
    parse_array_counts(message, rows)
        .unwrap_or_else(|| vec![BatchOutcome::Failed; rows])
}

fn parse_array_counts(message: &str, rows: usize) -> Option<Vec<BatchOutcome>> {
    let mut outcomes = vec![BatchOutcome::SuccessNoInfo; rows];
    let mut tokens = message.split(' ').skip(1);
    let pairs = tokens.next()?.parse::<usize>().ok()? / 2;

    for _ in 0..pairs {
        let offset = tokens.next()?.parse::<usize>().ok()?;
        let _code = tokens.next()?;
        *outcomes.get_mut(offset)? = BatchOutcome::Failed;
    }

    Some(outcomes)
}
