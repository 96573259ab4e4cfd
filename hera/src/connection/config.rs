//! Driver configuration.
use std::{borrow::Cow, collections::HashMap, env::var, fmt, path::PathBuf, str::FromStr, time::Duration};

const SCHEME: &str = "hera://";
const JDBC_PREFIX: &str = "jdbc:hera:";
const QUERY_PREFIX: &str = "hera.query.";
const QUERY_SUFFIX: &str = ".readTimeout";
const ENV_PREFIX: &str = "HERA_PROP_";

/// Every fixed property name, the per query timeouts aside.
const PROPERTIES: &[&str] = &[
    "hera.server.ip",
    "hera.server.port",
    "hera.connection.retries",
    "hera.connection.retry_delay.ms",
    "hera.connection.timeout.msecs",
    "hera.socket.timeout",
    "hera.socket.sendbuffer",
    "hera.socket.receivebuffer",
    "hera.socket.tcpnodelay",
    "hera.response.timeout.ms",
    "hera.support.column_names",
    "hera.support.column_info",
    "hera.min_fetch_size",
    "hera.enable.escape",
    "hera.enable.sharding",
    "hera.enable.batch",
    "hera.enable.param_name_binding",
    "hera.datasource.type",
    "hera.statement_cache.size",
    "hera.tls",
    "hera.tls.ca_file",
    "hera.pool.name",
    "host",
    "calLogOption",
];

/// Database type behind the proxy.
///
/// Decides how `{ call ... }` escapes are rewritten.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DataSource {
    #[default]
    Hera,
    Oracle,
    MySql,
}

impl FromStr for DataSource {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            s if s.eq_ignore_ascii_case("hera") => Ok(Self::Hera),
            s if s.eq_ignore_ascii_case("oracle") => Ok(Self::Oracle),
            s if s.eq_ignore_ascii_case("mysql") => Ok(Self::MySql),
            s => Err(ParseError::new(format!("unknown datasource type {s:?}"))),
        }
    }
}

/// Hera connection config.
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) retries: u32,
    pub(crate) retry_delay: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) socket_timeout: Option<Duration>,
    pub(crate) send_buffer: u32,
    pub(crate) receive_buffer: u32,
    pub(crate) tcp_nodelay: bool,
    pub(crate) response_timeout: Duration,
    pub(crate) column_names: bool,
    pub(crate) column_info: bool,
    pub(crate) min_fetch_size: u32,
    pub(crate) escape: bool,
    pub(crate) sharding: bool,
    pub(crate) batch: bool,
    pub(crate) named_binding: bool,
    pub(crate) datasource: DataSource,
    pub(crate) statement_cache_size: usize,
    pub(crate) query_timeouts: HashMap<String, Duration>,
    pub(crate) tls: bool,
    pub(crate) tls_ca_file: Option<PathBuf>,
    pub(crate) server_name: String,
    pub(crate) cal_log_option: String,
    pub(crate) pool_name: String,
}

impl Config {
    /// Create config for `host:port` with every other property at its default.
    pub fn new(host: impl Into<String>, port: u16) -> Config {
        Self {
            host: host.into(),
            port,
            retries: 1,
            retry_delay: Duration::ZERO,
            connect_timeout: Duration::from_millis(7000),
            socket_timeout: Some(Duration::from_millis(60000)),
            send_buffer: 0,
            receive_buffer: 0,
            tcp_nodelay: true,
            response_timeout: Duration::from_millis(60000),
            column_names: true,
            column_info: true,
            min_fetch_size: 2,
            escape: true,
            sharding: false,
            batch: false,
            named_binding: true,
            datasource: DataSource::Hera,
            statement_cache_size: 1000,
            query_timeouts: HashMap::new(),
            tls: false,
            tls_ca_file: None,
            server_name: "unknown".into(),
            cal_log_option: "-1".into(),
            pool_name: "unknown".into(),
        }
    }

    /// Retrieve configuration from environment variable.
    ///
    /// It reads:
    /// - `HERA_HOST`
    /// - `HERA_PORT`
    /// - `HERA_PROP_<KEY>`, where `KEY` is a property name with `.` written as
    ///   `_` and `_` written as `__`, matched case insensitively
    ///
    /// Additionally, it also read `HERA_URL` to provide missing value from
    /// previous variables before fallback to `localhost:10101`.
    pub fn from_env() -> Result<Config, ParseError> {
        let url = var("HERA_URL").ok().map(|url| Config::parse(&url)).transpose()?;

        let host = match (var("HERA_HOST"), url.as_ref()) {
            (Ok(ok), _) => ok,
            (Err(_), Some(e)) => e.host.clone(),
            (Err(_), None) => "localhost".into(),
        };
        let port = match (var("HERA_PORT"), url.as_ref()) {
            (Ok(ok), _) => parse_port(&ok)?,
            (Err(_), Some(e)) => e.port,
            (Err(_), None) => 10101,
        };

        let mut config = match url {
            Some(mut url) => {
                url.host = host;
                url.port = port;
                url
            }
            None => Config::new(host, port),
        };

        config.set_env(std::env::vars())?;
        Ok(config)
    }

    fn set_env<I>(&mut self, vars: I) -> Result<(), ParseError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(key) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            self.set(&env_property(key), &value)?;
        }
        Ok(())
    }

    /// Parse config from url.
    ///
    /// Accepts `hera://host:port[?key=value&...]` and `jdbc:hera:1:host:port`.
    pub fn parse(url: &str) -> Result<Config, ParseError> {
        if let Some(read) = url.strip_prefix(JDBC_PREFIX) {
            return Self::parse_jdbc(read);
        }

        let Some(mut read) = url.strip_prefix(SCHEME) else {
            return Err(ParseError::new("unknown scheme"));
        };

        macro_rules! eat {
            ($delim:literal,$id:tt) => {{
                let Some(idx) = read.find($delim) else {
                    return Err(ParseError::new(concat!(stringify!($id), " missing")))
                };
                let capture = &read[..idx];
                read = &read[idx + 1..];
                capture
            }};
        }

        let host = eat!(':', port);
        let (port, query) = match read.split_once('?') {
            Some((port, query)) => (port, Some(query)),
            None => (read.trim_end_matches('/'), None),
        };

        let mut config = Config::new(host, parse_port(port)?);
        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(ParseError::new(format!("property without value: {pair:?}")));
            };
            config.set(key, value)?;
        }

        Ok(config)
    }

    fn parse_jdbc(read: &str) -> Result<Config, ParseError> {
        let mut parts = read.split(':');
        let (Some(_version), Some(host), Some(port)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ParseError::new("incomplete url"));
        };
        Ok(Config::new(host, parse_port(port)?))
    }

    /// Build config from a property map.
    ///
    /// `hera.server.ip` and `hera.server.port` are required.
    pub fn from_properties<'a, I>(props: I) -> Result<Config, ParseError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let props: Vec<_> = props.into_iter().collect();
        let find = |key: &str| props.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);

        let Some(host) = find("hera.server.ip") else {
            return Err(ParseError::new("hera.server.ip missing"));
        };
        let Some(port) = find("hera.server.port") else {
            return Err(ParseError::new("hera.server.port missing"));
        };

        let mut config = Config::new(host, parse_port(port)?);
        for (key, value) in props {
            config.set(key, value)?;
        }
        Ok(config)
    }

    /// Set one property.
    ///
    /// Numeric values are checked against their bounds. Unknown `hera.` keys
    /// are rejected, other unknown keys are ignored.
    pub fn set(&mut self, key: &str, value: &str) -> Result<&mut Self, ParseError> {
        let ms = |min, max| int(key, value, min, max).map(Duration::from_millis);

        match key {
            "hera.server.ip" => self.host = value.into(),
            "hera.server.port" => self.port = parse_port(value)?,
            "hera.connection.retries" => self.retries = int(key, value, 0, 10)? as u32,
            "hera.connection.retry_delay.ms" => self.retry_delay = ms(0, 60_000)?,
            "hera.connection.timeout.msecs" => self.connect_timeout = ms(0, 3_600_000)?,
            "hera.socket.timeout" => {
                let timeout = ms(0, 3_600_000)?;
                self.socket_timeout = (!timeout.is_zero()).then_some(timeout);
            }
            "hera.socket.sendbuffer" => self.send_buffer = int(key, value, 0, 65536)? as u32,
            "hera.socket.receivebuffer" => self.receive_buffer = int(key, value, 0, 65536)? as u32,
            "hera.socket.tcpnodelay" => self.tcp_nodelay = boolean(key, value)?,
            "hera.response.timeout.ms" => self.response_timeout = ms(1, 3_600_000)?,
            "hera.support.column_names" => self.column_names = boolean(key, value)?,
            "hera.support.column_info" => self.column_info = boolean(key, value)?,
            "hera.min_fetch_size" => self.min_fetch_size = int(key, value, 0, i32::MAX as u64)? as u32,
            "hera.enable.escape" => self.escape = boolean(key, value)?,
            "hera.enable.sharding" => self.sharding = boolean(key, value)?,
            "hera.enable.batch" => self.batch = boolean(key, value)?,
            "hera.enable.param_name_binding" => self.named_binding = boolean(key, value)?,
            "hera.datasource.type" => self.datasource = value.parse()?,
            "hera.statement_cache.size" => {
                self.statement_cache_size = int(key, value, 1, 1_000_000)? as usize
            }
            "hera.tls" => self.tls = boolean(key, value)?,
            "hera.tls.ca_file" => self.tls_ca_file = Some(value.into()),
            "hera.pool.name" => self.pool_name = value.into(),
            "host" => self.server_name = value.into(),
            "calLogOption" => self.cal_log_option = value.into(),
            _ => {
                if let Some(name) = key
                    .strip_prefix(QUERY_PREFIX)
                    .and_then(|k| k.strip_suffix(QUERY_SUFFIX))
                {
                    self.query_timeouts.insert(name.into(), ms(1, 3_600_000)?);
                } else if key.starts_with("hera.") {
                    return Err(ParseError::new(format!("unknown property {key:?}")));
                }
            }
        }

        Ok(self)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns `host:port`, used as the endpoint identity.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    pub fn statement_cache_size(&self) -> usize {
        self.statement_cache_size
    }

    pub fn datasource(&self) -> DataSource {
        self.datasource
    }

    /// Returns the per-query timeout configured for a `/* name */` hint.
    pub fn query_timeout(&self, name: &str) -> Option<Duration> {
        self.query_timeouts.get(name).copied()
    }

    pub fn sharding(&self) -> bool {
        self.sharding
    }

    pub fn min_fetch_size(&self) -> u32 {
        self.min_fetch_size
    }
}

impl FromStr for Config {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Decode the property name of a `HERA_PROP_` variable.
fn env_property(key: &str) -> String {
    let decoded = key
        .split("__")
        .map(|part| part.replace('_', "."))
        .collect::<Vec<_>>()
        .join("_");

    if let Some(known) = PROPERTIES.iter().find(|p| p.eq_ignore_ascii_case(&decoded)) {
        return (*known).to_owned();
    }

    let lower = decoded.to_ascii_lowercase();
    if lower.starts_with(QUERY_PREFIX) && lower.ends_with(&QUERY_SUFFIX.to_ascii_lowercase()) {
        let name = &decoded[QUERY_PREFIX.len()..decoded.len() - QUERY_SUFFIX.len()];
        if !name.is_empty() {
            return format!("{QUERY_PREFIX}{name}{QUERY_SUFFIX}");
        }
    }
    decoded
}

fn parse_port(value: &str) -> Result<u16, ParseError> {
    match value.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ParseError::new(format!("invalid port {value:?}"))),
    }
}

fn int(key: &str, value: &str, min: u64, max: u64) -> Result<u64, ParseError> {
    let Ok(n) = value.trim().parse::<u64>() else {
        return Err(ParseError::new(format!("{key}: invalid integer {value:?}")));
    };
    if !(min..=max).contains(&n) {
        return Err(ParseError::new(format!("{key}: {n} is out of range {min}..={max}")));
    }
    Ok(n)
}

fn boolean(key: &str, value: &str) -> Result<bool, ParseError> {
    match value.trim() {
        v if v.eq_ignore_ascii_case("true") => Ok(true),
        v if v.eq_ignore_ascii_case("false") => Ok(false),
        _ => Err(ParseError::new(format!("{key}: invalid boolean {value:?}"))),
    }
}

/// Error when parsing config.
pub struct ParseError {
    pub(crate) reason: Cow<'static,str>,
}

impl ParseError {
    pub(crate) fn new(reason: impl Into<Cow<'static, str>>) -> Self {
        Self { reason: reason.into() }
    }
}

impl std::error::Error for ParseError { }

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            return f.write_str(&self.reason)
        }
        write!(f, "invalid config: {}", self.reason)
    }
}

impl fmt::Debug for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_url() {
        let config = Config::parse("hera://10.0.0.1:10101").unwrap();
        assert_eq!(config.host(), "10.0.0.1");
        assert_eq!(config.port(), 10101);
        assert_eq!(config.response_timeout(), Duration::from_secs(60));
        assert_eq!(config.statement_cache_size(), 1000);
        assert!(config.column_info);
        assert!(!config.sharding());
    }

    #[test]
    fn parse_url_properties() {
        let config: Config = "hera://db:11111?hera.enable.sharding=true&hera.datasource.type=ORACLE&hera.socket.timeout=0"
            .parse()
            .unwrap();
        assert!(config.sharding());
        assert_eq!(config.datasource(), DataSource::Oracle);
        assert_eq!(config.socket_timeout, None);
    }

    #[test]
    fn parse_jdbc_url() {
        let config = Config::parse("jdbc:hera:1:127.0.0.1:10102").unwrap();
        assert_eq!(config.endpoint(), "127.0.0.1:10102");
        assert!(Config::parse("jdbc:hera:1:127.0.0.1").is_err());
    }

    #[test]
    fn parse_url_errors() {
        assert!(Config::parse("postgres://localhost:5432").is_err());
        assert!(Config::parse("hera://localhost").is_err());
        assert!(Config::parse("hera://localhost:0").is_err());
        assert!(Config::parse("hera://localhost:99999").is_err());
        assert!(Config::parse("hera://localhost:1?hera.tls").is_err());
    }

    #[test]
    fn bounds_are_checked() {
        let mut config = Config::new("localhost", 10101);
        assert!(config.set("hera.connection.retries", "11").is_err());
        assert!(config.set("hera.connection.retries", "-1").is_err());
        assert!(config.set("hera.response.timeout.ms", "0").is_err());
        assert!(config.set("hera.statement_cache.size", "0").is_err());
        assert!(config.set("hera.socket.tcpnodelay", "yes").is_err());
        assert!(config.set("hera.datasource.type", "postgres").is_err());

        config.set("hera.connection.retries", "10").unwrap();
        config.set("hera.response.timeout.ms", "250").unwrap();
        assert_eq!(config.retries, 10);
        assert_eq!(config.response_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn query_timeout_map() {
        let mut config = Config::new("localhost", 10101);
        config.set("hera.query.findUser.readTimeout", "1500").unwrap();
        config.set("unrelated.key", "whatever").unwrap();
        assert_eq!(config.query_timeout("findUser"), Some(Duration::from_millis(1500)));
        assert_eq!(config.query_timeout("other"), None);
        assert!(config.set("hera.query.slow.readTimeout", "0").is_err());
        assert!(config.set("hera.enable.shard", "true").is_err());
    }

    #[test]
    fn env_properties() {
        let vars = [
            ("HERA_PROP_HERA_ENABLE_PARAM__NAME__BINDING", "false"),
            ("HERA_PROP_HERA_STATEMENT__CACHE_SIZE", "5"),
            ("HERA_PROP_HERA_CONNECTION_RETRY__DELAY_MS", "20"),
            ("HERA_PROP_HERA_SUPPORT_COLUMN__INFO", "false"),
            ("HERA_PROP_CALLOGOPTION", "0"),
            ("HERA_PROP_hera_query_findUser_readTimeout", "1500"),
            ("HERA_HOST", "ignored"),
        ];
        let mut config = Config::new("localhost", 10101);
        config
            .set_env(vars.iter().map(|(k, v)| (k.to_string(), v.to_string())))
            .unwrap();
        assert!(!config.named_binding);
        assert_eq!(config.statement_cache_size(), 5);
        assert_eq!(config.retry_delay, Duration::from_millis(20));
        assert!(!config.column_info);
        assert_eq!(config.cal_log_option, "0");
        assert_eq!(config.query_timeout("findUser"), Some(Duration::from_millis(1500)));

        let unknown = [("HERA_PROP_HERA_ENABLE_PARAM_NAME_BINDING".to_owned(), "false".to_owned())];
        assert!(config.set_env(unknown).is_err());
    }

    #[test]
    fn from_properties() {
        let config = Config::from_properties([
            ("hera.server.ip", "proxy"),
            ("hera.server.port", "10101"),
            ("hera.enable.batch", "TRUE"),
            ("host", "ocx-proxy"),
        ])
        .unwrap();
        assert_eq!(config.host(), "proxy");
        assert!(config.batch);
        assert_eq!(config.server_name, "ocx-proxy");

        assert!(Config::from_properties([("hera.server.ip", "proxy")]).is_err());
    }
}
