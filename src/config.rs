use std::path::PathBuf;
use std::str::FromStr;

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

/// Runtime settings, read from `SLOTKEEPER_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// JSON seed for the identity directory. This file is the only source
    /// of identities; the line protocol has no registration operation.
    pub directory: Option<PathBuf>,
    pub max_connections: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub notifications: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Missing or unparsable values take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            bind: lookup("SLOTKEEPER_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "SLOTKEEPER_PORT").unwrap_or(7878),
            data_dir: lookup("SLOTKEEPER_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            directory: lookup("SLOTKEEPER_DIRECTORY").map(PathBuf::from),
            max_connections: parsed(&lookup, "SLOTKEEPER_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&lookup, "SLOTKEEPER_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: parsed(&lookup, "SLOTKEEPER_METRICS_PORT"),
            notifications: parsed(&lookup, "SLOTKEEPER_NOTIFICATIONS").unwrap_or(true),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}
