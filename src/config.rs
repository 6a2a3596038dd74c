use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::DEFAULT_LOCK_TIMEOUT;

/// Server settings, read once at startup from `SALONES_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    /// Login name that is always treated as an Administrator.
    pub admin_user: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub lock_timeout: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "salones".into(),
            admin_user: "admin".into(),
            max_connections: 256,
            compact_threshold: 1000,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparsable numbers fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parsed(&lookup, "SALONES_PORT").unwrap_or(defaults.port),
            bind: lookup("SALONES_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("SALONES_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: lookup("SALONES_PASSWORD").unwrap_or(defaults.password),
            admin_user: lookup("SALONES_ADMIN_USER").unwrap_or(defaults.admin_user),
            max_connections: parsed(&lookup, "SALONES_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "SALONES_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            lock_timeout: parsed(&lookup, "SALONES_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            metrics_port: parsed(&lookup, "SALONES_METRICS_PORT"),
            tls_cert: lookup("SALONES_TLS_CERT"),
            tls_key: lookup("SALONES_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
