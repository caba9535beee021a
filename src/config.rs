//! Process configuration, read from `SLOTBOOK_*` environment variables.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    TlsIncomplete,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: '{value}'"),
            ConfigError::TlsIncomplete => {
                write!(f, "both SLOTBOOK_TLS_CERT and SLOTBOOK_TLS_KEY must be set, or neither")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "slotbook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError> {
    match value {
        None => Ok(None),
        Some(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: v }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables take the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        let max_connections = parse("SLOTBOOK_MAX_CONNECTIONS", get("SLOTBOOK_MAX_CONNECTIONS"))?
            .unwrap_or(defaults.max_connections);
        if max_connections == 0 {
            return Err(ConfigError::Invalid { var: "SLOTBOOK_MAX_CONNECTIONS", value: "0".into() });
        }
        let tls_cert = get("SLOTBOOK_TLS_CERT");
        let tls_key = get("SLOTBOOK_TLS_KEY");
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError::TlsIncomplete);
        }

        Ok(Self {
            port: parse("SLOTBOOK_PORT", get("SLOTBOOK_PORT"))?.unwrap_or(defaults.port),
            bind: get("SLOTBOOK_BIND").unwrap_or(defaults.bind),
            data_dir: get("SLOTBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: get("SLOTBOOK_PASSWORD").unwrap_or(defaults.password),
            max_connections,
            compact_threshold: parse("SLOTBOOK_COMPACT_THRESHOLD", get("SLOTBOOK_COMPACT_THRESHOLD"))?
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parse("SLOTBOOK_METRICS_PORT", get("SLOTBOOK_METRICS_PORT"))?,
            tls_cert,
            tls_key,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotbook.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
