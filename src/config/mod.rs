use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Complete application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the embedded database lives
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("credflow")
}

fn default_database_file() -> String {
    "credflow.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: default_database_file(),
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }
}

/// Argon2id parameters used when the vault is first configured.
/// Opening always uses the parameters stored alongside the key material.
#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
    #[serde(default = "default_salt_length")]
    pub salt_length: u32,
    #[serde(default = "default_key_length")]
    pub key_length: u32,
}

fn default_memory_kib() -> u32 {
    64 * 1024
}

fn default_iterations() -> u32 {
    3
}

fn default_parallelism() -> u32 {
    2
}

fn default_salt_length() -> u32 {
    16
}

fn default_key_length() -> u32 {
    32
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
            salt_length: default_salt_length(),
            key_length: default_key_length(),
        }
    }
}

/// AWS endpoint overrides (tests, corporate proxies)
#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    /// Replaces `https://oidc.{region}.amazonaws.com`
    #[serde(default)]
    pub oidc_endpoint: Option<String>,
    /// Replaces `https://portal.sso.{region}.amazonaws.com`
    #[serde(default)]
    pub portal_endpoint: Option<String>,
    /// Prefix of the friendly name used when registering OIDC clients
    #[serde(default = "default_client_name_prefix")]
    pub client_name_prefix: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_client_name_prefix() -> String {
    "credflow".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            oidc_endpoint: None,
            portal_endpoint: None,
            client_name_prefix: default_client_name_prefix(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// In-memory account cache
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_max_entries() -> usize {
    256
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "credflow=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl AppConfig {
    /// Applies `CREDFLOW_*` environment overrides on top of the file values.
    pub fn apply_env(mut self) -> Self {
        if let Ok(v) = std::env::var("CREDFLOW_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CREDFLOW_OIDC_ENDPOINT") {
            self.aws.oidc_endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("CREDFLOW_PORTAL_ENDPOINT") {
            self.aws.portal_endpoint = Some(v);
        }
        self
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: AppConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Loads `path` if it exists, otherwise returns defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(p) if p.exists() => load_config(p),
        _ => Ok(AppConfig::default()),
    }
}
