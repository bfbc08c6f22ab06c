//! Configuration for the tracker sync subsystem.
//!
//! Values come from, in increasing precedence:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. `AGENTSYNC_*` environment variables (a `.env` file is loaded first)

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_WORKERS: usize = 4;
const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;
const DEFAULT_SOURCE: &str = "project";

/// Webhook listener settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Address to accept tracker callbacks on. No listener when unset.
    pub bind_addr: Option<SocketAddr>,
    /// Callback URL registered with the tracker, if it differs from the
    /// bind address (e.g. behind a proxy).
    pub public_url: Option<String>,
}

impl WebhookConfig {
    /// URL the tracker should call back.
    pub fn callback_url(&self) -> Option<String> {
        self.public_url
            .clone()
            .or_else(|| self.bind_addr.map(|addr| format!("http://{}/webhook", addr)))
    }
}

/// Settings consumed by [`crate::project::ProjectSyncManager`].
pub struct SyncConfig {
    /// Master switch for the sync subsystem.
    pub enabled: bool,
    /// Match unassigned tracker tasks to agents automatically.
    pub auto_assign: bool,
    /// Seconds between poll cycles. Must be at least 1.
    pub poll_interval_secs: u64,
    /// Tracker API base URL.
    pub base_url: String,
    /// Bearer token for the tracker API.
    pub api_key: SecretString,
    /// Source tag stamped on mirrored tasks.
    pub source: String,
    pub webhook: WebhookConfig,
    /// Execution worker count.
    pub workers: usize,
    /// Pending executions the dispatcher will queue before rejecting.
    pub queue_capacity: usize,
    /// How long `stop()` waits for in-flight work.
    pub shutdown_grace_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_assign: false,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            base_url: String::new(),
            api_key: SecretString::from(String::new()),
            source: DEFAULT_SOURCE.to_string(),
            webhook: WebhookConfig::default(),
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
        }
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("enabled", &self.enabled)
            .field("auto_assign", &self.auto_assign)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("source", &self.source)
            .field("webhook", &self.webhook)
            .field("workers", &self.workers)
            .field("queue_capacity", &self.queue_capacity)
            .field("shutdown_grace_secs", &self.shutdown_grace_secs)
            .finish()
    }
}

/// On-disk shape; every field optional so files can be partial.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    enabled: Option<bool>,
    auto_assign: Option<bool>,
    poll_interval_secs: Option<u64>,
    base_url: Option<String>,
    api_key: Option<String>,
    source: Option<String>,
    workers: Option<usize>,
    queue_capacity: Option<usize>,
    shutdown_grace_secs: Option<u64>,
    #[serde(default)]
    webhook: FileWebhookConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileWebhookConfig {
    bind_addr: Option<SocketAddr>,
    public_url: Option<String>,
}

impl SyncConfig {
    /// Load defaults, then `path` (if given), then the environment, and
    /// validate the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let mut config = Self::default();
        if let Some(path) = path {
            config.apply_file(path)?;
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on top of the current values.
    pub fn apply_toml(&mut self, source: &str, contents: &str) -> Result<(), ConfigError> {
        let file: FileConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: source.to_string(),
            message: e.to_string(),
        })?;

        if let Some(v) = file.enabled {
            self.enabled = v;
        }
        if let Some(v) = file.auto_assign {
            self.auto_assign = v;
        }
        if let Some(v) = file.poll_interval_secs {
            self.poll_interval_secs = v;
        }
        if let Some(v) = file.base_url {
            self.base_url = v;
        }
        if let Some(v) = file.api_key {
            self.api_key = SecretString::from(v);
        }
        if let Some(v) = file.source {
            self.source = v;
        }
        if let Some(v) = file.workers {
            self.workers = v;
        }
        if let Some(v) = file.queue_capacity {
            self.queue_capacity = v;
        }
        if let Some(v) = file.shutdown_grace_secs {
            self.shutdown_grace_secs = v;
        }
        if let Some(v) = file.webhook.bind_addr {
            self.webhook.bind_addr = Some(v);
        }
        if let Some(v) = file.webhook.public_url {
            self.webhook.public_url = Some(v);
        }
        Ok(())
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        self.apply_toml(&path.display().to_string(), &contents)
    }

    /// Apply `AGENTSYNC_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("AGENTSYNC_ENABLED") {
            self.enabled = parse_bool("AGENTSYNC_ENABLED", &v)?;
        }
        if let Some(v) = lookup("AGENTSYNC_AUTO_ASSIGN") {
            self.auto_assign = parse_bool("AGENTSYNC_AUTO_ASSIGN", &v)?;
        }
        if let Some(v) = lookup("AGENTSYNC_POLL_INTERVAL_SECS") {
            self.poll_interval_secs = parse_num("AGENTSYNC_POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("AGENTSYNC_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = lookup("AGENTSYNC_API_KEY") {
            self.api_key = SecretString::from(v);
        }
        if let Some(v) = lookup("AGENTSYNC_SOURCE") {
            self.source = v;
        }
        if let Some(v) = lookup("AGENTSYNC_WORKERS") {
            self.workers = parse_num("AGENTSYNC_WORKERS", &v)?;
        }
        if let Some(v) = lookup("AGENTSYNC_QUEUE_CAPACITY") {
            self.queue_capacity = parse_num("AGENTSYNC_QUEUE_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("AGENTSYNC_SHUTDOWN_GRACE_SECS") {
            self.shutdown_grace_secs = parse_num("AGENTSYNC_SHUTDOWN_GRACE_SECS", &v)?;
        }
        if let Some(v) = lookup("AGENTSYNC_WEBHOOK_BIND") {
            self.webhook.bind_addr = Some(parse_num("AGENTSYNC_WEBHOOK_BIND", &v)?);
        }
        if let Some(v) = lookup("AGENTSYNC_WEBHOOK_URL") {
            self.webhook.public_url = Some(v);
        }
        Ok(())
    }

    /// Check that an enabled configuration can actually reach the tracker.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "queue_capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "poll_interval_secs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if !self.enabled {
            return Ok(());
        }

        if self.base_url.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "base_url".to_string(),
                hint: "Set AGENTSYNC_BASE_URL or base_url in the config file".to_string(),
            });
        }
        let url = url::Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidValue {
            key: "base_url".to_string(),
            message: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                key: "base_url".to_string(),
                message: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        if self.api_key.expose_secret().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "api_key".to_string(),
                hint: "Set AGENTSYNC_API_KEY or api_key in the config file".to_string(),
            });
        }
        Ok(())
    }

    /// Enabled with credentials present.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.base_url.is_empty() && !self.api_key.expose_secret().is_empty()
    }

    /// Time between poll cycles. Unvalidated zero is clamped so the ticker
    /// never spins.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}

fn parse_num<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert!(!config.enabled);
        assert!(!config.auto_assign);
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
        assert!(!config.is_active());
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let config = SyncConfig {
            poll_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "poll_interval_secs"
        ));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));

        let mut config = SyncConfig::default();
        config
            .apply_env(env(&[("AGENTSYNC_POLL_INTERVAL_SECS", "0")]))
            .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SyncConfig::default();
        config
            .apply_env(env(&[
                ("AGENTSYNC_ENABLED", "true"),
                ("AGENTSYNC_AUTO_ASSIGN", "yes"),
                ("AGENTSYNC_POLL_INTERVAL_SECS", "5"),
                ("AGENTSYNC_BASE_URL", "https://tracker.example.com/"),
                ("AGENTSYNC_API_KEY", "secret-token"),
                ("AGENTSYNC_WEBHOOK_BIND", "127.0.0.1:8082"),
            ]))
            .unwrap();

        assert!(config.enabled);
        assert!(config.auto_assign);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.api_key.expose_secret(), "secret-token");
        assert_eq!(
            config.webhook.callback_url().as_deref(),
            Some("http://127.0.0.1:8082/webhook")
        );
        assert!(config.validate().is_ok());
        assert!(config.is_active());
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = SyncConfig::default();
        let err = config
            .apply_env(env(&[("AGENTSYNC_ENABLED", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "AGENTSYNC_ENABLED"));
    }

    #[test]
    fn test_enabled_requires_credentials() {
        let mut config = SyncConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired { ref key, .. }) if key == "base_url"
        ));

        config.base_url = "ftp://tracker".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "base_url"
        ));

        config.base_url = "https://tracker.example.com".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired { ref key, .. }) if key == "api_key"
        ));
    }

    #[test]
    fn test_toml_file_then_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
enabled = true
auto_assign = true
base_url = "https://tracker.example.com"
api_key = "from-file"
workers = 2

[webhook]
public_url = "https://hooks.example.com/webhook"
"#
        )
        .unwrap();

        let mut config = SyncConfig::default();
        config.apply_file(file.path()).unwrap();
        config
            .apply_env(env(&[("AGENTSYNC_API_KEY", "from-env")]))
            .unwrap();

        assert!(config.enabled);
        assert_eq!(config.workers, 2);
        assert_eq!(config.api_key.expose_secret(), "from-env");
        assert_eq!(
            config.webhook.callback_url().as_deref(),
            Some("https://hooks.example.com/webhook")
        );
    }

    #[test]
    fn test_unknown_toml_key_is_rejected() {
        let mut config = SyncConfig::default();
        let err = config.apply_toml("inline", "polling = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = SyncConfig {
            api_key: SecretString::from("hunter2".to_string()),
            ..Default::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
