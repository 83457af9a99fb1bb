//! Configuration loading and types for picvault.
//!
//! Configuration is read from an optional YAML file, then overlaid with
//! environment variables (`PORT`, `AWS_REGION`, `AWS_BUCKET_NAME`,
//! `MONGODB_URL` and friends).
//! The resulting [`Config`] is built once at startup and handed to the
//! backend constructors; handlers never read the environment themselves.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Object storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Metadata store settings.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics + health probe).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Largest accepted image file in bytes (default 10 MiB).  The request
    /// body may exceed it by the multipart framing allowance.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Directory the upload handler spools incoming files into.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,

    /// Directory served for any path no API route matches.
    #[serde(default)]
    pub static_dir: Option<String>,

    /// Send `Access-Control-Allow-Origin: *` on every response.
    #[serde(default = "default_true")]
    pub cors_allow_any_origin: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
            upload_dir: default_upload_dir(),
            static_dir: None,
            cors_allow_any_origin: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
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

/// Observability settings.
///
/// Controls Prometheus metrics collection and the `/health` probe.
/// Both are enabled by default.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Enable the `/health` probe (pings the metadata store).
    #[serde(default = "default_true")]
    pub health_check: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            health_check: true,
        }
    }
}

/// Object storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `aws` or `memory`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Lifetime of every signed read URL, in seconds (at most 7 days).
    #[serde(default = "default_presign_expiry")]
    pub presign_expiry_secs: u64,

    /// Prefix of every derived storage key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// AWS S3 configuration.
    #[serde(default)]
    pub aws: AwsStorageConfig,

    /// In-memory backend configuration.
    #[serde(default)]
    pub memory: MemoryStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            presign_expiry_secs: default_presign_expiry(),
            key_prefix: default_key_prefix(),
            aws: AwsStorageConfig::default(),
            memory: MemoryStorageConfig::default(),
        }
    }
}

/// AWS S3 configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AwsStorageConfig {
    /// Bucket that receives uploads.
    #[serde(default)]
    pub bucket: String,
    /// AWS region.
    #[serde(default)]
    pub region: String,
    /// Access key id.
    #[serde(default)]
    pub access_key_id: String,
    /// Secret access key.
    #[serde(default)]
    pub secret_access_key: String,
    /// Custom S3-compatible endpoint (e.g. MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: String,
    /// Force path-style URL addressing.
    #[serde(default)]
    pub use_path_style: bool,
    /// Bucket the resize job writes `resized_*` variants into.
    #[serde(default)]
    pub compressed_bucket: String,
}

/// In-memory storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryStorageConfig {
    /// Base URL embedded in signed URLs: this server's public origin
    /// followed by `/objects`.
    #[serde(default = "default_memory_base_url")]
    pub base_url: String,
    /// Bucket name embedded in signed URLs.
    #[serde(default = "default_memory_bucket")]
    pub bucket: String,
    /// HMAC key used to sign URLs.
    #[serde(default = "default_memory_secret")]
    pub signing_secret: String,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        Self {
            base_url: default_memory_base_url(),
            bucket: default_memory_bucket(),
            signing_secret: default_memory_secret(),
        }
    }
}

/// Metadata store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Backend type: `mongodb`, `sqlite` or `memory`.
    #[serde(default = "default_metadata_engine")]
    pub engine: String,

    /// MongoDB-specific configuration.
    #[serde(default)]
    pub mongodb: MongoConfig,

    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            engine: default_metadata_engine(),
            mongodb: MongoConfig::default(),
            sqlite: SqliteConfig::default(),
        }
    }
}

/// MongoDB connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    /// Connection string.
    #[serde(default)]
    pub url: String,
    /// Database name, used when the URL does not name one.
    #[serde(default = "default_mongo_database")]
    pub database: String,
    /// Collection holding file records.
    #[serde(default = "default_mongo_collection")]
    pub collection: String,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            database: default_mongo_database(),
            collection: default_mongo_collection(),
        }
    }
}

/// SQLite-specific metadata configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_metadata_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_upload_dir() -> String {
    "./uploads".to_string()
}

fn default_storage_backend() -> String {
    "aws".to_string()
}

fn default_presign_expiry() -> u64 {
    3600
}

fn default_key_prefix() -> String {
    "images/".to_string()
}

fn default_memory_base_url() -> String {
    "http://localhost:3000/objects".to_string()
}

fn default_memory_bucket() -> String {
    "picvault".to_string()
}

fn default_memory_secret() -> String {
    "picvault-dev-secret".to_string()
}

fn default_metadata_engine() -> String {
    "mongodb".to_string()
}

fn default_mongo_database() -> String {
    "picvault".to_string()
}

fn default_mongo_collection() -> String {
    "files".to_string()
}

fn default_metadata_path() -> String {
    "./data/metadata.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

/// Longest lifetime S3 accepts for a presigned URL (7 days).
pub const MAX_PRESIGN_EXPIRY_SECS: u64 = 7 * 24 * 60 * 60;

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

/// Load the YAML file when it exists (defaults otherwise), then apply
/// environment overrides from the process environment.
pub fn load_with_env<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let mut config = if path.as_ref().exists() {
        load_config(path)?
    } else {
        Config::default()
    };
    config.apply_env(|name| std::env::var(name).ok());
    Ok(config)
}

/// Startup log line saying whether `path` will be read or defaults apply.
pub fn describe_source<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();
    if path.exists() {
        format!("Loaded configuration from {}", path.display())
    } else {
        format!("No configuration file at {}, using defaults", path.display())
    }
}

impl Config {
    /// Overlay values from environment variables.
    ///
    /// `lookup` abstracts the environment so tests can feed a map.
    /// Empty values are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(port) = get("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(v) = get("AWS_REGION") {
            self.storage.aws.region = v;
        }
        if let Some(v) = get("AWS_ACCESS_KEY_ID") {
            self.storage.aws.access_key_id = v;
        }
        if let Some(v) = get("AWS_SECRET_ACCESS_KEY") {
            self.storage.aws.secret_access_key = v;
        }
        if let Some(v) = get("AWS_BUCKET_NAME") {
            self.storage.aws.bucket = v;
        }
        if let Some(v) = get("AWS_COMPRESSED_BUCKET_NAME") {
            self.storage.aws.compressed_bucket = v;
        }
        if let Some(v) = get("AWS_ENDPOINT_URL") {
            self.storage.aws.endpoint_url = v;
        }
        if let Some(v) = get("MONGODB_URL") {
            self.metadata.mongodb.url = v;
        }
    }

    /// Names of required settings that are unset for the selected backends.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.storage.backend == "aws" {
            let aws = &self.storage.aws;
            let required = [
                ("AWS_ACCESS_KEY_ID", &aws.access_key_id),
                ("AWS_SECRET_ACCESS_KEY", &aws.secret_access_key),
                ("AWS_REGION", &aws.region),
                ("AWS_BUCKET_NAME", &aws.bucket),
            ];
            missing.extend(
                required
                    .iter()
                    .filter(|(_, value)| value.trim().is_empty())
                    .map(|(name, _)| *name),
            );
        }
        if self.metadata.engine == "mongodb" && self.metadata.mongodb.url.trim().is_empty() {
            missing.push("MONGODB_URL");
        }
        missing
    }

    /// Whether each deployment setting has a value, for startup logs and
    /// `picvault-admin check-config`. Values themselves are never exposed.
    pub fn presence(&self) -> Vec<(&'static str, bool)> {
        let aws = &self.storage.aws;
        let set = |v: &str| !v.trim().is_empty();
        vec![
            ("AWS_REGION", set(&aws.region)),
            ("AWS_ACCESS_KEY_ID", set(&aws.access_key_id)),
            ("AWS_SECRET_ACCESS_KEY", set(&aws.secret_access_key)),
            ("AWS_BUCKET_NAME", set(&aws.bucket)),
            ("AWS_COMPRESSED_BUCKET_NAME", set(&aws.compressed_bucket)),
            ("AWS_ENDPOINT_URL", set(&aws.endpoint_url)),
            ("MONGODB_URL", set(&self.metadata.mongodb.url)),
        ]
    }

    /// Fail when a required setting is missing or a backend name is unknown.
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.storage.backend.as_str() {
            "aws" | "memory" => {}
            other => anyhow::bail!("unknown storage.backend '{other}' (expected aws or memory)"),
        }
        match self.metadata.engine.as_str() {
            "mongodb" | "sqlite" | "memory" => {}
            other => anyhow::bail!(
                "unknown metadata.engine '{other}' (expected mongodb, sqlite or memory)"
            ),
        }
        if !(1..=MAX_PRESIGN_EXPIRY_SECS).contains(&self.storage.presign_expiry_secs) {
            anyhow::bail!(
                "storage.presign_expiry_secs must be between 1 and {MAX_PRESIGN_EXPIRY_SECS}, got {}",
                self.storage.presign_expiry_secs
            );
        }

        let missing = self.missing_required();
        if !missing.is_empty() {
            anyhow::bail!(
                "Missing required configuration values: {}",
                missing.join(", ")
            );
        }
        Ok(())
    }
}
