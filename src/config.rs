//! Configuration types for tg-cloud-export

use crate::classifier::ChannelRule;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use utoipa::ToSchema;

/// Messaging-platform credentials
///
/// Consumed by the platform adapter that implements
/// [`ChannelSource`](crate::platform::ChannelSource); the core never talks to
/// the platform directly.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct PlatformConfig {
    /// Application id issued by the platform
    #[serde(default)]
    pub api_id: Option<i64>,

    /// Application hash issued by the platform
    #[serde(default)]
    pub api_hash: Option<String>,

    /// Serialized login session
    #[serde(default)]
    pub session_string: Option<String>,
}

/// Bulk-export behavior (staging, limits, batching)
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ExportConfig {
    /// Local staging directory for downloaded attachments (default: "./Downloads")
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Maximum declared attachment size in bytes (default: 100 MiB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Treat a missing declared size as 0 and allow the attachment (default: true)
    ///
    /// When false, attachments without a declared size are skipped as
    /// `exceeds-max-size`.
    #[serde(default = "default_true")]
    pub allow_missing_size: bool,

    /// Maximum message pipelines in flight at once (default: 5)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Messages per checkpointed batch (default: 5)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum history messages visited per export run (default: 100)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Pause inserted after each committed full batch (default: 1 second)
    #[serde(default = "default_batch_pause", with = "duration_serde")]
    pub batch_pause: Duration,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            max_file_size: default_max_file_size(),
            allow_missing_size: true,
            max_concurrency: default_max_concurrency(),
            batch_size: default_batch_size(),
            history_limit: default_history_limit(),
            batch_pause: default_batch_pause(),
        }
    }
}

/// Retry policy for a single message pipeline
///
/// Throttle signals and ordinary failures are handled separately: a throttle
/// always waits for the platform-mandated duration and retries, by default
/// without limit; ordinary failures are retried `max_attempts` times with
/// exponential backoff (default: 0, i.e. fail immediately).
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RetryConfig {
    /// Maximum throttle retries for one message (None = unbounded, the default)
    #[serde(default)]
    pub throttle_retry_limit: Option<u32>,

    /// Extra wait added on top of the platform-mandated throttle wait (default: 0)
    #[serde(default, with = "duration_serde")]
    pub throttle_padding: Duration,

    /// Maximum retry attempts for transient non-throttle failures (default: 0)
    #[serde(default)]
    pub max_attempts: u32,

    /// Initial delay before first transient retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between transient retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to transient delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            throttle_retry_limit: None,
            throttle_padding: Duration::ZERO,
            max_attempts: 0,
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Upload collaborator configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadConfig {
    /// Program invoked as `<command> <args...> <local_path> <remote_label>`
    #[serde(default)]
    pub command: Option<PathBuf>,

    /// Arguments placed before the local path and remote label
    #[serde(default)]
    pub args: Vec<String>,

    /// Upload service endpoint, used instead of `command` when set
    #[serde(default)]
    pub service_url: Option<String>,

    /// Maximum time a single upload may take (default: 30 minutes)
    #[serde(default = "default_upload_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Provider name written to processed records (default: "terabox")
    #[serde(default = "default_cloud_provider")]
    pub cloud_provider: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: vec![],
            service_url: None,
            timeout: default_upload_timeout(),
            cloud_provider: default_cloud_provider(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PersistenceConfig {
    /// Database path (default: "./tg-cloud-export.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address to bind to (default: 0.0.0.0:8000)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Optional API key for authentication
    #[serde(default)]
    pub api_key: Option<String>,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            api_key: None,
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

/// Main configuration for [`Exporter`](crate::Exporter)
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Platform credentials
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Channel rules, evaluated in order; the first match wins
    #[serde(default)]
    pub channels: Vec<ChannelRule>,

    /// Bulk-export settings
    #[serde(default)]
    pub export: ExportConfig,

    /// Per-message retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Upload collaborator
    #[serde(default)]
    pub upload: UploadConfig,

    /// Persistent store
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Trigger API
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Build a config from the process environment, loading `.env` first if present.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `API_ID`, `API_HASH`, `SESSION_STRING` | `platform` |
    /// | `BASE_PATH` + `SAVE_DIR` | `export.staging_dir` |
    /// | `MAX_FILE_SIZE` | `export.max_file_size` |
    /// | `MAX_CONCURRENCY` | `export.max_concurrency` (and default batch size) |
    /// | `EXPORT_BATCH_SIZE` | `export.batch_size` |
    /// | `EXPORT_LIMIT` | `export.history_limit` |
    /// | `EXPORT_BATCH_PAUSE` | `export.batch_pause` (seconds) |
    /// | `UPLOAD_COMMAND`, `UPLOAD_ARGS`, `UPLOAD_URL`, `CLOUD_PLUGIN` | `upload` |
    /// | `DATABASE_PATH`, else `MONGO_DB` as `./<name>.db` | `persistence.database_path` |
    /// | `BIND_ADDRESS`, `API_KEY` | `api` |
    /// | `CHANNELS_CONFIG` | `channels` (JSON array) |
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
            Err(e) if e.not_found() => {}
            Err(e) => {
                return Err(Error::Config {
                    message: format!("failed to read .env file: {}", e),
                    key: None,
                });
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (used by [`Config::from_env`])
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        config.platform.api_id = parse_var(&lookup, "API_ID")?;
        config.platform.api_hash = lookup("API_HASH");
        config.platform.session_string = lookup("SESSION_STRING");

        let save_dir = lookup("SAVE_DIR").unwrap_or_else(|| "Downloads".to_string());
        config.export.staging_dir = match lookup("BASE_PATH") {
            Some(base) => expand_home(&base, lookup("HOME")).join(save_dir),
            None => PathBuf::from(save_dir),
        };
        if let Some(size) = parse_var(&lookup, "MAX_FILE_SIZE")? {
            config.export.max_file_size = size;
        }
        if let Some(concurrency) = parse_var(&lookup, "MAX_CONCURRENCY")? {
            config.export.max_concurrency = concurrency;
            config.export.batch_size = concurrency;
        }
        if let Some(batch_size) = parse_var(&lookup, "EXPORT_BATCH_SIZE")? {
            config.export.batch_size = batch_size;
        }
        if let Some(limit) = parse_var(&lookup, "EXPORT_LIMIT")? {
            config.export.history_limit = limit;
        }
        if let Some(secs) = parse_var::<_, u64>(&lookup, "EXPORT_BATCH_PAUSE")? {
            config.export.batch_pause = Duration::from_secs(secs);
        }

        config.upload.command = lookup("UPLOAD_COMMAND").map(PathBuf::from);
        if let Some(args) = lookup("UPLOAD_ARGS") {
            config.upload.args = args.split_whitespace().map(str::to_string).collect();
        }
        config.upload.service_url = lookup("UPLOAD_URL");
        if let Some(provider) = lookup("CLOUD_PLUGIN").filter(|p| !p.is_empty()) {
            config.upload.cloud_provider = provider;
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.persistence.database_path = PathBuf::from(path);
        } else if let Some(name) = lookup("MONGO_DB").filter(|n| !n.is_empty()) {
            config.persistence.database_path = PathBuf::from(format!("./{}.db", name));
        }

        if let Some(addr) = parse_var(&lookup, "BIND_ADDRESS")? {
            config.api.bind_address = addr;
        }
        config.api.api_key = lookup("API_KEY").filter(|k| !k.is_empty());

        if let Some(json) = lookup("CHANNELS_CONFIG") {
            config.channels = serde_json::from_str(&json).map_err(|e| Error::Config {
                message: format!("CHANNELS_CONFIG is not a valid rule list: {}", e),
                key: Some("CHANNELS_CONFIG".to_string()),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the batch runner cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.export.max_concurrency == 0 {
            return Err(Error::Config {
                message: "max_concurrency must be at least 1".to_string(),
                key: Some("max_concurrency".to_string()),
            });
        }
        if self.export.batch_size == 0 {
            return Err(Error::Config {
                message: "batch_size must be at least 1".to_string(),
                key: Some("batch_size".to_string()),
            });
        }
        if self.export.history_limit == 0 {
            return Err(Error::Config {
                message: "history_limit must be at least 1".to_string(),
                key: Some("history_limit".to_string()),
            });
        }
        Ok(())
    }

    /// Copy of this config with secrets replaced, safe to log or serve
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let redact = |v: &mut Option<String>| {
            if v.is_some() {
                *v = Some("***".to_string());
            }
        };
        redact(&mut copy.platform.api_hash);
        redact(&mut copy.platform.session_string);
        redact(&mut copy.api.api_key);
        copy
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|e| Error::Config {
            message: format!("{} has invalid value '{}': {}", key, raw, e),
            key: Some(key.to_string()),
        }),
    }
}

fn expand_home(path: &str, home: Option<String>) -> PathBuf {
    match (path.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

fn default_true() -> bool {
    true
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("./Downloads")
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024
}

fn default_max_concurrency() -> usize {
    5
}

fn default_batch_size() -> usize {
    5
}

fn default_history_limit() -> usize {
    100
}

fn default_batch_pause() -> Duration {
    Duration::from_secs(1)
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_upload_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_cloud_provider() -> String {
    "terabox".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./tg-cloud-export.db")
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
