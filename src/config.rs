//! Agent configuration: deserialized from a JSON file on disk, plus the shared
//! HTTP client and interval settings every component reads from.

use crate::parsers::ParserKind;
use crate::topology::ControllerTarget;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Arc;
use std::time::Duration;

/// One statically-configured ingress controller target. In a full deployment
/// these would be discovered from cluster topology; this agent also accepts a
/// static list for environments with no topology watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub name: String,
    pub parser: String,
    pub urls: Vec<String>,
}

impl ControllerConfig {
    pub fn to_target(&self) -> Result<ControllerTarget> {
        Ok(ControllerTarget {
            name: self.name.clone(),
            parser: ParserKind::from_str(&self.parser).map_err(anyhow::Error::from)?,
            urls: self.urls.clone(),
        })
    }
}

/// Parsed JSON configuration (deserializable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(rename = "backendUrl")]
    pub backend_url: String,

    #[serde(rename = "backendToken")]
    pub backend_token: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_scrape_interval_secs")]
    pub scrape_interval_secs: u64,

    #[serde(default = "default_send_interval_secs")]
    pub send_interval_secs: u64,

    #[serde(default = "default_refresh_interval_secs")]
    pub rule_refresh_interval_secs: u64,

    #[serde(default = "default_scheduler_interval_secs")]
    pub rule_scheduler_interval_secs: u64,

    #[serde(default = "default_timeout_ms")]
    pub backend_timeout_ms: u64,

    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    #[serde(default)]
    pub controllers: Vec<ControllerConfig>,
}

/// Runtime configuration shared across tasks. Wraps the parsed file plus a
/// shared reqwest::Client connection pool.
#[derive(Debug, Clone)]
pub struct Config {
    inner: Arc<ConfigInner>,
}

#[derive(Debug)]
struct ConfigInner {
    file: ConfigFile,
    http_client: reqwest::Client,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).context(format!("failed to read config file: {path}"))?;
        let file: ConfigFile = serde_json::from_str(&content).context("failed to parse config JSON")?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(file.backend_timeout_ms))
            .pool_max_idle_per_host(file.pool_max_idle_per_host)
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()?;

        Ok(Config {
            inner: Arc::new(ConfigInner { file, http_client }),
        })
    }

    pub fn http_client(&self) -> reqwest::Client {
        self.inner.http_client.clone()
    }

    pub fn backend_url(&self) -> &str {
        &self.inner.file.backend_url
    }

    pub fn backend_token(&self) -> &str {
        &self.inner.file.backend_token
    }

    pub fn host(&self) -> &str {
        &self.inner.file.host
    }

    pub fn port(&self) -> u16 {
        self.inner.file.port
    }

    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.inner.file.scrape_interval_secs)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_secs(self.inner.file.send_interval_secs)
    }

    pub fn rule_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.inner.file.rule_refresh_interval_secs)
    }

    pub fn rule_scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.inner.file.rule_scheduler_interval_secs)
    }

    pub fn controller_targets(&self) -> Result<Vec<ControllerTarget>> {
        self.inner.file.controllers.iter().map(ControllerConfig::to_target).collect()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9100
}

fn default_scrape_interval_secs() -> u64 {
    60
}

fn default_send_interval_secs() -> u64 {
    60
}

fn default_refresh_interval_secs() -> u64 {
    60
}

fn default_scheduler_interval_secs() -> u64 {
    30
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_pool_max_idle_per_host() -> usize {
    32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"backendUrl": "https://backend.internal", "backendToken": "tok"}}"#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.backend_url(), "https://backend.internal");
        assert_eq!(config.port(), 9100);
        assert_eq!(config.scrape_interval(), Duration::from_secs(60));
    }

    #[test]
    fn parses_controller_list() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "backendUrl": "https://backend.internal",
                "backendToken": "tok",
                "controllers": [{{"name": "ingress-nginx", "parser": "nginx", "urls": ["http://ingress:10254/metrics"]}}]
            }}"#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        let targets = config.controller_targets().unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name, "ingress-nginx");
    }

    #[test]
    fn rejects_unknown_parser_kind() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "backendUrl": "https://backend.internal",
                "backendToken": "tok",
                "controllers": [{{"name": "x", "parser": "bogus", "urls": []}}]
            }}"#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert!(config.controller_targets().is_err());
    }
}
