//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Expose Prometheus metrics on /metrics (default: true).
    /// The endpoint is unauthenticated; restrict it at the network level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Object storage configuration, used for the read-through cache and for
/// storage-backed blockstores.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// Falls back to the default AWS credential chain when unset.
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`). Required for MinIO.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/cache"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.is_empty() {
                    return Err("s3 config requires a non-empty bucket".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// External immutable blockstore configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BlockstoreConfig {
    /// Blocks kept in an object store under `blocks/<cid>`.
    Storage {
        storage: StorageConfig,
    },
    /// Read-only HTTP gateway serving `GET {url}/blocks/{cid}`.
    Gateway {
        url: String,
        #[serde(default = "default_gateway_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_gateway_timeout_secs() -> u64 {
    30
}

impl Default for BlockstoreConfig {
    fn default() -> Self {
        Self::Storage {
            storage: StorageConfig::Filesystem {
                path: PathBuf::from("./data/blocks"),
            },
        }
    }
}

impl BlockstoreConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            BlockstoreConfig::Storage { storage } => storage.validate(),
            BlockstoreConfig::Gateway { url, timeout_secs } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(format!("blockstore gateway url must be http(s): {url}"));
                }
                if *timeout_secs == 0 {
                    return Err("blockstore.timeout_secs cannot be 0".to_string());
                }
                Ok(())
            }
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

/// Node store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (testing and small deployments).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds. Advisory only: slow queries are logged,
        /// never cancelled.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over the individual fields.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        /// Prefer ARCHIVIST_METADATA__PASSWORD over storing this in a file.
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds; enforced by the server.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(60_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(60)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/nodes.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                max_connections,
                ..
            } => {
                if *max_connections == 0 {
                    return Err("postgres max_connections cannot be 0".to_string());
                }
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    (Some(_), _, _) => Ok(()),
                    (None, Some(_), Some(_)) => Ok(()),
                    (None, None, _) => Err(
                        "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                    ),
                    (None, Some(_), None) => Err(
                        "postgres config requires 'database' when using individual fields"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

/// Archival tracking configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchivalConfig {
    /// Run the periodic archival sweep (default: true).
    #[serde(default = "default_sweep_enabled")]
    pub sweep_enabled: bool,
    /// Seconds between sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Objects fetched per sweep page.
    #[serde(default = "default_sweep_batch_limit")]
    pub sweep_batch_limit: u32,
    /// Upper bound on a single cache warm-up before the task is retried.
    #[serde(default = "default_cache_warm_timeout_secs")]
    pub cache_warm_timeout_secs: u64,
}

fn default_sweep_enabled() -> bool {
    true
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_sweep_batch_limit() -> u32 {
    1000
}

fn default_cache_warm_timeout_secs() -> u64 {
    300
}

impl Default for ArchivalConfig {
    fn default() -> Self {
        Self {
            sweep_enabled: default_sweep_enabled(),
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_batch_limit: default_sweep_batch_limit(),
            cache_warm_timeout_secs: default_cache_warm_timeout_secs(),
        }
    }
}

impl ArchivalConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn cache_warm_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_warm_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sweep_enabled && self.sweep_interval_secs == 0 {
            return Err("archival.sweep_interval_secs cannot be 0 when the sweep is enabled"
                .to_string());
        }
        if self.sweep_batch_limit == 0 {
            return Err("archival.sweep_batch_limit cannot be 0".to_string());
        }
        if self.cache_warm_timeout_secs == 0 {
            return Err("archival.cache_warm_timeout_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Task dispatcher configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Delivery attempts per task before it is dropped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Maximum handlers running at once.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Delay before the first redelivery, in milliseconds.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Ceiling for the redelivery delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    crate::DEFAULT_MAX_RETRIES
}

fn default_workers() -> usize {
    8
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            workers: default_workers(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl TaskConfig {
    /// Redelivery delay after the given number of failed attempts (1-based).
    ///
    /// Doubles from `base_backoff_ms` and saturates at `max_backoff_ms`, so the
    /// sequence is non-decreasing.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(32);
        let delay = self
            .base_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries == 0 {
            return Err("tasks.max_retries must be at least 1".to_string());
        }
        if self.workers == 0 {
            return Err("tasks.workers must be at least 1".to_string());
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(format!(
                "tasks.base_backoff_ms {} exceeds tasks.max_backoff_ms {}",
                self.base_backoff_ms, self.max_backoff_ms
            ));
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Node store.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Read-through cache warmed before local payload is pruned.
    #[serde(default)]
    pub cache: StorageConfig,
    /// External blockstore queried when local payload is gone.
    #[serde(default)]
    pub blockstore: BlockstoreConfig,
    #[serde(default)]
    pub archival: ArchivalConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
}

impl AppConfig {
    /// Create a test configuration.
    ///
    /// **For testing only.** Short backoff, no background sweep.
    pub fn for_testing() -> Self {
        Self {
            archival: ArchivalConfig {
                sweep_enabled: false,
                cache_warm_timeout_secs: 5,
                ..ArchivalConfig::default()
            },
            tasks: TaskConfig {
                workers: 4,
                base_backoff_ms: 10,
                max_backoff_ms: 50,
                ..TaskConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate every section, prefixing errors with the section name.
    pub fn validate(&self) -> Result<(), String> {
        self.metadata
            .validate()
            .map_err(|e| format!("metadata: {e}"))?;
        self.cache.validate().map_err(|e| format!("cache: {e}"))?;
        self.blockstore
            .validate()
            .map_err(|e| format!("blockstore: {e}"))?;
        self.archival.validate()?;
        self.tasks.validate()?;
        Ok(())
    }
}
