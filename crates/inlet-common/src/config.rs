//! Configuration for Inlet

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "INLET_CONFIG";

/// Prefix for environment overrides, e.g. `INLET__SMTP__PORT=2525`
pub const ENV_PREFIX: &str = "INLET";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Blob storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// SMTP front door configuration
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Ingestion worker configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Inbound domain (MX) configuration
    #[serde(default)]
    pub inbound: InboundConfig,

    /// Notification configuration
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_hostname() -> String {
    "localhost".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database backend: "postgres" or "memory"
    #[serde(default = "default_db_backend")]
    pub backend: String,

    /// Database URL (for postgres)
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_db_backend(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

fn default_db_backend() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

/// Blob storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend: "fs", "memory" or "inline" (no blob store)
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Base path for local filesystem storage
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
        }
    }
}

fn default_storage_backend() -> String {
    "fs".to_string()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/inlet/blobs")
}

/// How the SMTP front door hands accepted messages downstream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpDeliveryMode {
    /// Enqueue an ingest job and let the worker process it
    #[default]
    Queue,
    /// Decode and ingest while the client waits
    Direct,
}

/// SMTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Enable the SMTP listener
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Hostname for SMTP banner
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Bind host
    #[serde(default = "default_bind_host")]
    pub host: String,

    /// SMTP port (inbound)
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Maximum message size in bytes; larger DATA payloads are truncated
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum concurrent connections
    #[serde(default = "default_smtp_max_connections")]
    pub max_connections: usize,

    /// Per-command read timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Downstream delivery mode
    #[serde(default)]
    pub delivery: SmtpDeliveryMode,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hostname: default_hostname(),
            host: default_bind_host(),
            port: default_smtp_port(),
            max_message_size: default_max_message_size(),
            max_connections: default_smtp_max_connections(),
            connection_timeout_secs: default_connection_timeout(),
            delivery: SmtpDeliveryMode::default(),
        }
    }
}

impl SmtpConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs.max(1))
    }
}

fn default_true() -> bool {
    true
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_smtp_port() -> u16 {
    25
}

fn default_max_message_size() -> usize {
    10 * 1024 * 1024 // 10 MiB
}

fn default_smtp_max_connections() -> usize {
    100
}

fn default_connection_timeout() -> u64 {
    30
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable the HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bind host
    #[serde(default = "default_bind_host")]
    pub host: String,

    /// API port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Bearer token for the inbound ingest endpoint; unset disables it
    pub inbound_token: Option<String>,

    /// Maximum accepted request body in bytes
    #[serde(default = "default_api_max_body")]
    pub max_body_bytes: usize,

    /// Maximum requests served concurrently
    #[serde(default = "default_api_max_concurrency")]
    pub max_concurrent_requests: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_bind_host(),
            port: default_api_port(),
            inbound_token: None,
            max_body_bytes: default_api_max_body(),
            max_concurrent_requests: default_api_max_concurrency(),
        }
    }
}

impl ApiConfig {
    /// The configured ingest token, treating blank values as unset
    pub fn inbound_token(&self) -> Option<&str> {
        self.inbound_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

fn default_api_port() -> u16 {
    8080
}

fn default_api_max_body() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_api_max_concurrency() -> usize {
    256
}

/// Ingestion worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Run workers in this process
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Number of identical polling loops
    #[serde(default = "default_worker_concurrency")]
    pub concurrency: usize,

    /// Idle poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// First retry delay in milliseconds
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Retry delay cap in milliseconds
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Attempts before a job is failed for good
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,

    /// Decoded parts larger than this are skipped
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: default_worker_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            max_attempts: default_max_attempts(),
            max_attachment_bytes: default_max_attachment_bytes(),
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }
}

fn default_worker_concurrency() -> usize {
    1
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_retry_base_delay_ms() -> u64 {
    5_000
}

fn default_max_retry_delay_ms() -> u64 {
    10 * 60 * 1000
}

fn default_max_attempts() -> i32 {
    5
}

fn default_max_attachment_bytes() -> usize {
    5 * 1024 * 1024 // 5 MiB
}

/// Inbound domain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundConfig {
    /// Hostname customer domains must publish as their MX
    #[serde(default = "default_mx_target")]
    pub mx_target: String,

    /// Seconds between MX re-verification sweeps; 0 disables the sweep
    #[serde(default)]
    pub mx_recheck_interval_secs: u64,

    /// Configs checked per sweep
    #[serde(default = "default_mx_recheck_batch")]
    pub mx_recheck_batch: i64,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            mx_target: default_mx_target(),
            mx_recheck_interval_secs: 0,
            mx_recheck_batch: default_mx_recheck_batch(),
        }
    }
}

fn default_mx_target() -> String {
    "mx.localhost".to_string()
}

fn default_mx_recheck_batch() -> i64 {
    100
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Webhook receiving a signed POST per accepted email; unset disables it
    pub webhook_url: Option<String>,

    /// HMAC-SHA256 secret for the webhook signature
    pub webhook_secret: Option<String>,

    /// Request timeout in milliseconds
    #[serde(default = "default_notify_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_secret: None,
            timeout_ms: default_notify_timeout_ms(),
        }
    }
}

impl NotifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

fn default_notify_timeout_ms() -> u64 {
    5_000
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from the first file found and apply environment
    /// overrides on top.
    pub fn load() -> crate::Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                [
                    PathBuf::from("./inlet.toml"),
                    PathBuf::from("./config.toml"),
                    PathBuf::from("/etc/inlet/config.toml"),
                ]
                .into_iter()
                .find(|path| path.exists())
            });

        Self::load_layered(path.as_deref())
    }

    fn load_layered(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(::config::File::new(
                &path.to_string_lossy(),
                ::config::FileFormat::Toml,
            ));
        }

        builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|layered| layered.try_deserialize::<Config>())
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let smtp = SmtpConfig::default();
        assert_eq!(smtp.port, 25);
        assert_eq!(smtp.max_message_size, 10 * 1024 * 1024);
        assert_eq!(smtp.delivery, SmtpDeliveryMode::Queue);

        let worker = WorkerConfig::default();
        assert_eq!(worker.poll_interval(), Duration::from_millis(500));
        assert_eq!(worker.retry_base_delay(), Duration::from_secs(5));
        assert_eq!(worker.max_retry_delay(), Duration::from_secs(600));
        assert_eq!(worker.max_attempts, 5);
        assert_eq!(worker.max_attachment_bytes, 5 * 1024 * 1024);

        let api = ApiConfig::default();
        assert_eq!(api.max_body_bytes, 1024 * 1024);
        assert_eq!(api.inbound_token(), None);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[database]
backend = "postgres"
url = "postgres://localhost/inlet"

[storage]
backend = "fs"
path = "/data/blobs"

[smtp]
port = 2525
delivery = "direct"

[api]
inbound_token = "s3cret"

[worker]
concurrency = 4
retry_base_delay_ms = 1000

[inbound]
mx_target = "mx.inlet.example"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database.backend, "postgres");
        assert_eq!(config.smtp.port, 2525);
        assert_eq!(config.smtp.delivery, SmtpDeliveryMode::Direct);
        assert_eq!(config.api.inbound_token(), Some("s3cret"));
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.worker.retry_base_delay(), Duration::from_secs(1));
        assert_eq!(config.worker.max_attempts, 5);
        assert_eq!(config.inbound.mx_target, "mx.inlet.example");
    }

    #[test]
    fn test_blank_token_is_unset() {
        let api = ApiConfig {
            inbound_token: Some("   ".to_string()),
            ..ApiConfig::default()
        };
        assert_eq!(api.inbound_token(), None);
    }

    #[test]
    fn test_from_file_and_layered_load() {
        let dir = std::env::temp_dir().join(format!("inlet-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("inlet.toml");
        std::fs::write(
            &path,
            "[database]\nbackend = \"memory\"\n\n[smtp]\nport = 2526\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.database.backend, "memory");
        assert_eq!(config.smtp.port, 2526);

        let layered = Config::load_layered(Some(&path)).unwrap();
        assert_eq!(layered.database.backend, "memory");
        assert_eq!(layered.smtp.port, 2526);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
