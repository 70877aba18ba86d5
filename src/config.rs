//! Collector configuration.
//!
//! Read from an optional JSON file (`OTELSCOPE_CONFIG` env var, default
//! `otelscope.json` in the working directory). The eviction task re-reads
//! the file every tick, so age limits can be changed without a restart.

use crate::error::CollectorError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "OTELSCOPE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "otelscope.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectorConfig {
    /// Traces whose start is older than this are evicted. Absent disables
    /// trace eviction.
    pub max_span_age_secs: Option<u64>,

    /// Sum/Gauge data points older than this are evicted. Absent disables
    /// metric eviction.
    pub max_metric_age_secs: Option<u64>,

    /// OTLP/gRPC collection port.
    pub grpc_port: u16,

    /// OTLP/HTTP collection port.
    pub http_port: u16,

    /// Query API / trace file port.
    pub api_port: u16,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_span_age_secs: None,
            max_metric_age_secs: None,
            grpc_port: 4317,
            http_port: 4318,
            api_port: 8347,
        }
    }
}

impl CollectorConfig {
    /// Resolves the config file path from the environment.
    pub fn path() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Loads the config file. A missing file yields the defaults; an
    /// unreadable or malformed file is an error the caller decides how to
    /// handle (fatal at startup, swallowed per eviction tick).
    pub fn load(path: &Path) -> Result<Self, CollectorError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn max_span_age(&self) -> Option<Duration> {
        self.max_span_age_secs.map(Duration::from_secs)
    }

    pub fn max_metric_age(&self) -> Option<Duration> {
        self.max_metric_age_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_eviction() {
        let config = CollectorConfig::default();
        assert_eq!(config.max_span_age(), None);
        assert_eq!(config.max_metric_age(), None);
        assert_eq!(config.grpc_port, 4317);
        assert_eq!(config.http_port, 4318);
        assert_eq!(config.api_port, 8347);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = CollectorConfig::load(Path::new("/definitely/not/here.json")).unwrap();
        assert_eq!(config.grpc_port, 4317);
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let config: CollectorConfig =
            serde_json::from_str(r#"{ "maxSpanAgeSecs": 60, "apiPort": 9000 }"#).unwrap();
        assert_eq!(config.max_span_age(), Some(Duration::from_secs(60)));
        assert_eq!(config.api_port, 9000);
        assert_eq!(config.http_port, 4318);
    }
}
