//! Server configuration.
//!
//! Configuration can be loaded from:
//! - The file named by `TEAMQ_CONFIG`
//! - `teamq.toml`, `/etc/teamq/teamq.toml` or `~/.config/teamq/teamq.toml`
//! - Environment variables (`TEAMQ_HOST`, `TEAMQ_PORT`) for the defaults

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use teamq_core::auth::DEFAULT_TOKEN_FIELD;
use teamq_core::{AuthConfig, BrokerConfig, RoutingMode};
use teamq_protocol::codec::DEFAULT_MAX_FRAME_SIZE;
use teamq_transport::TcpConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "TEAMQ_CONFIG";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Routing configuration.
    #[serde(default)]
    pub broker: BrokerSection,

    /// Identity service configuration.
    #[serde(default)]
    pub auth: AuthSection,

    /// Worker registration configuration.
    #[serde(default)]
    pub workers: WorkersSection,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Routing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerSection {
    /// `"workers"` or `"pubsub"`.
    #[serde(default)]
    pub mode: RoutingMode,
}

/// Identity service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    /// Require connections to authenticate.
    #[serde(default)]
    pub enabled: bool,

    /// URL the token is POSTed to.
    #[serde(default)]
    pub endpoint: String,

    /// Form field carrying the token.
    #[serde(default = "default_token_field")]
    pub token_field: String,

    /// Request timeout in milliseconds.
    #[serde(default = "default_auth_timeout")]
    pub timeout_ms: u64,
}

/// Worker registration configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkersSection {
    /// Keys accepted by `$tea.worker.register`.
    #[serde(default)]
    pub keys: Vec<String>,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum line length in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("TEAMQ_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("TEAMQ_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000)
}

fn default_true() -> bool {
    true
}

fn default_token_field() -> String {
    DEFAULT_TOKEN_FIELD.to_string()
}

fn default_auth_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            broker: BrokerSection::default(),
            auth: AuthSection::default(),
            workers: WorkersSection::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            token_field: default_token_field(),
            timeout_ms: default_auth_timeout(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if
    /// the resulting configuration is invalid.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(shellexpand::tilde(&path).as_ref());
        }

        let config_paths = [
            "teamq.toml",
            "/etc/teamq/teamq.toml",
            "~/.config/teamq/teamq.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Check settings that cannot be expressed in the schema.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.auth.enabled && self.auth.endpoint.trim().is_empty() {
            bail!("auth.enabled requires auth.endpoint");
        }
        if self.auth.token_field.is_empty() {
            bail!("auth.token_field must not be empty");
        }
        if self.limits.max_message_size == 0 {
            bail!("limits.max_message_size must be positive");
        }
        if self.broker.mode == RoutingMode::Workers && self.workers.keys.is_empty() {
            tracing::warn!("No worker keys configured; worker registration will always fail");
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Transport settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind address is invalid.
    pub fn tcp_config(&self) -> Result<TcpConfig> {
        Ok(TcpConfig {
            bind_addr: self.bind_addr()?,
            max_message_size: self.limits.max_message_size,
        })
    }

    /// Broker engine settings.
    #[must_use]
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            mode: self.broker.mode,
            auth_enabled: self.auth.enabled,
            worker_keys: self.workers.keys.iter().cloned().collect::<HashSet<_>>(),
        }
    }

    /// Identity service settings, if authentication is enabled.
    #[must_use]
    pub fn auth_config(&self) -> Option<AuthConfig> {
        self.auth.enabled.then(|| AuthConfig {
            endpoint: self.auth.endpoint.clone(),
            token_field: self.auth.token_field.clone(),
            timeout: Duration::from_millis(self.auth.timeout_ms),
        })
    }
}
