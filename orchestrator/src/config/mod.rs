//! Configuration module for the Shellcast orchestrator
//!
//! Supports configuration via:
//! - YAML/TOML config files
//! - Environment variables (with SHELLCAST_ prefix)
//! - A `.env` file in the working directory

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for the JSON log file
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Execution environment settings
    #[serde(default)]
    pub environment: EnvironmentConfig,

    /// Pub/sub and output log backend
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Session expiry policy
    #[serde(default)]
    pub sessions: SessionPolicy,
}

/// How session environments are built and run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Image repository name; the tag is derived from the build arguments
    #[serde(default = "default_image_name")]
    pub image_name: String,

    /// Directory holding the Dockerfile used to build the image
    #[serde(default = "default_build_context")]
    pub build_context: PathBuf,

    /// Container CLI binary (docker or podman). Detected when unset.
    #[serde(default)]
    pub runtime_binary: Option<String>,

    /// Default interactive process of every environment
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Shell used to run each command as `<exec_shell> -c <command>`
    #[serde(default = "default_exec_shell")]
    pub exec_shell: String,

    /// Run at most one command at a time per environment
    #[serde(default = "default_true")]
    pub serialize_commands: bool,

    /// Remove all bound containers when the orchestrator stops
    #[serde(default)]
    pub remove_on_shutdown: bool,
}

/// Which broker carries published output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// In-process channels; history is lost on restart
    Memory,
    /// Redis PUBLISH/SUBSCRIBE with APPEND for the output log
    Redis,
}

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_kind")]
    pub kind: BrokerKind,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

/// Session and environment expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPolicy {
    /// Expire sessions idle for longer than this. Unset means never.
    #[serde(default)]
    pub idle_timeout_seconds: Option<u64>,

    /// How often the idle sweeper runs
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_image_name() -> String {
    "automated-terminal".to_string()
}

fn default_build_context() -> PathBuf {
    PathBuf::from("./Terminal.dockerfile")
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

fn default_exec_shell() -> String {
    "sh".to_string()
}

fn default_true() -> bool {
    true
}

fn default_broker_kind() -> BrokerKind {
    BrokerKind::Redis
}

fn default_redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            image_name: default_image_name(),
            build_context: default_build_context(),
            runtime_binary: None,
            shell: default_shell(),
            exec_shell: default_exec_shell(),
            serialize_commands: true,
            remove_on_shutdown: false,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: default_broker_kind(),
            redis_url: default_redis_url(),
        }
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: None,
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            environment: EnvironmentConfig::default(),
            broker: BrokerConfig::default(),
            sessions: SessionPolicy::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config/shellcast").required(false))
            .add_source(config::File::with_name("/etc/shellcast/config").required(false))
            .add_source(
                config::Environment::with_prefix("SHELLCAST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        if self.environment.image_name.trim().is_empty() {
            anyhow::bail!("Environment image name cannot be empty");
        }

        // Registry hosts may carry a port, the repository itself may not carry a tag
        let repository = self
            .environment
            .image_name
            .rsplit('/')
            .next()
            .unwrap_or_default();
        if repository.contains(':') || self.environment.image_name.contains('@') {
            anyhow::bail!("Environment image name must not carry a tag or digest");
        }

        if self.broker.kind == BrokerKind::Redis
            && !(self.broker.redis_url.starts_with("redis://")
                || self.broker.redis_url.starts_with("rediss://"))
        {
            anyhow::bail!("Redis URL must use the redis:// or rediss:// scheme");
        }

        if self.sessions.idle_timeout_seconds == Some(0) {
            anyhow::bail!("Session idle timeout cannot be 0");
        }

        if self.sessions.sweep_interval_seconds == 0 {
            anyhow::bail!("Session sweep interval cannot be 0");
        }

        Ok(())
    }

    /// Idle timeout as a chrono duration, if expiry is enabled
    pub fn idle_timeout(&self) -> Option<chrono::Duration> {
        self.sessions
            .idle_timeout_seconds
            .and_then(|secs| i64::try_from(secs).ok())
            .map(chrono::Duration::seconds)
    }
}
