//! Agent configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/offload/agent.toml`
//! - Windows: `%APPDATA%/offload/agent.toml`
//!
//! `OFFLOAD_CONFIG` (or `--config`) points at another file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use offload_connectivity::ProbeConfig;
use offload_protocol::{DEFAULT_CHUNK_SIZE, MAX_RETRIES};
use offload_queue::ProcessorConfig;
use offload_transfer::HttpClientConfig;
use serde::{Deserialize, Serialize};

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the remote store.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Sent as `Authorization: Bearer <token>` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,

    /// Queue file. Defaults to `offload/queue.json` in the config dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_path: Option<PathBuf>,

    /// Completion records. Defaults to `offload/records.json` in the config dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_path: Option<PathBuf>,

    /// Host probed for reachability. Defaults to the endpoint host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_host: Option<String>,

    /// Port probed for reachability. Defaults to the endpoint port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_port: Option<u16>,

    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Automatic attempts per item.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_inter_item_delay")]
    pub inter_item_delay_ms: u64,

    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8080".into()
}

fn default_probe_interval() -> u64 {
    15
}

fn default_probe_timeout() -> u64 {
    3
}

fn default_max_retries() -> u32 {
    MAX_RETRIES
}

fn default_inter_item_delay() -> u64 {
    1000
}

fn default_attempt_timeout() -> u64 {
    60
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            bearer_token: None,
            queue_path: None,
            records_path: None,
            probe_host: None,
            probe_port: None,
            probe_interval_secs: default_probe_interval(),
            probe_timeout_secs: default_probe_timeout(),
            max_retries: default_max_retries(),
            inter_item_delay_ms: default_inter_item_delay(),
            attempt_timeout_secs: default_attempt_timeout(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or from the platform default
    /// location. A missing file is created with defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
            tracing::debug!(path = %path.display(), "configuration loaded");
            Ok(config)
        } else {
            let config = Config::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // The file may hold a bearer token.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn queue_path(&self) -> anyhow::Result<PathBuf> {
        match &self.queue_path {
            Some(p) => Ok(p.clone()),
            None => offload_store::default_queue_path()
                .context("no config directory; set queue_path explicitly"),
        }
    }

    pub fn records_path(&self) -> anyhow::Result<PathBuf> {
        match &self.records_path {
            Some(p) => Ok(p.clone()),
            None => offload_store::config_dir()
                .map(|d| d.join("offload").join("records.json"))
                .context("no config directory; set records_path explicitly"),
        }
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            max_retries: self.max_retries,
            inter_item_delay: Duration::from_millis(self.inter_item_delay_ms),
        }
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            endpoint: self.endpoint.clone(),
            bearer_token: self.bearer_token.clone(),
            timeout: Duration::from_secs(self.attempt_timeout_secs),
            chunk_size: self.chunk_size,
        }
    }

    /// Probe target: explicit settings first, then the endpoint's host and port.
    pub fn probe_config(&self) -> anyhow::Result<ProbeConfig> {
        let url = reqwest::Url::parse(&self.endpoint)
            .with_context(|| format!("invalid endpoint {:?}", self.endpoint))?;

        let host = match &self.probe_host {
            Some(h) => h.clone(),
            None => url
                .host_str()
                .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
                .context("endpoint has no host")?,
        };
        let port = match self.probe_port {
            Some(p) => p,
            None => url
                .port_or_known_default()
                .context("endpoint has no port")?,
        };

        Ok(ProbeConfig {
            host,
            port,
            interval: Duration::from_secs(self.probe_interval_secs),
            timeout: Duration::from_secs(self.probe_timeout_secs),
        })
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    offload_store::config_dir()
        .map(|d| d.join("offload").join("agent.toml"))
        .context("cannot determine config directory")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.endpoint, "http://127.0.0.1:8080");
        assert!(config.bearer_token.is_none());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.inter_item_delay_ms, 1000);
        assert_eq!(config.attempt_timeout_secs, 60);
        assert_eq!(config.chunk_size, 256 * 1024);
    }

    #[test]
    fn toml_roundtrip() {
        let config = Config {
            endpoint: "https://media.example.com".into(),
            bearer_token: Some("secret".into()),
            queue_path: Some("/var/lib/offload/queue.json".into()),
            max_retries: 5,
            ..Config::default()
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let parsed: Config = toml::from_str(r#"endpoint = "https://x.example""#).unwrap();
        assert_eq!(parsed.endpoint, "https://x.example");
        assert_eq!(parsed.probe_interval_secs, 15);
        assert_eq!(parsed.max_retries, 3);
        assert!(parsed.queue_path.is_none());
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub").join("agent.toml");

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let reloaded = Config::load(Some(&path)).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "max_retries = \"three\"").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn probe_target_defaults_to_endpoint() {
        let config = Config {
            endpoint: "https://media.example.com/api".into(),
            ..Config::default()
        };
        let probe = config.probe_config().unwrap();
        assert_eq!(probe.host, "media.example.com");
        assert_eq!(probe.port, 443);
        assert_eq!(probe.interval, Duration::from_secs(15));
    }

    #[test]
    fn explicit_probe_target_wins() {
        let config = Config {
            endpoint: "http://10.0.0.5:9000".into(),
            probe_host: Some("1.1.1.1".into()),
            probe_port: Some(53),
            ..Config::default()
        };
        let probe = config.probe_config().unwrap();
        assert_eq!(probe.host, "1.1.1.1");
        assert_eq!(probe.port, 53);
    }

    #[test]
    fn derived_runtime_settings() {
        let config = Config {
            inter_item_delay_ms: 250,
            attempt_timeout_secs: 5,
            ..Config::default()
        };
        assert_eq!(
            config.processor_config().inter_item_delay,
            Duration::from_millis(250)
        );
        assert_eq!(config.http_config().timeout, Duration::from_secs(5));
    }

    #[test]
    fn explicit_paths_are_used() {
        let config = Config {
            queue_path: Some("/tmp/q.json".into()),
            records_path: Some("/tmp/r.json".into()),
            ..Config::default()
        };
        assert_eq!(config.queue_path().unwrap(), PathBuf::from("/tmp/q.json"));
        assert_eq!(config.records_path().unwrap(), PathBuf::from("/tmp/r.json"));
    }
}
