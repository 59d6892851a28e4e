// crates/detox-config/src/config.rs
// ============================================================================
// Module: Detox Configuration
// Description: Configuration loading and validation for the Detox monitor.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: detox-core, detox-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! The file is located by explicit path, then the `DETOX_CONFIG` environment
//! variable, then `detox.toml` in the working directory. Every section has
//! defaults, so an empty file is a valid loopback-only configuration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use detox_core::CycleOperation;
use detox_core::PartitionId;
use detox_core::ResolutionDefaults;
use detox_store_sqlite::SqliteStoreConfig;
use detox_store_sqlite::SqliteStoreMode;
use detox_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "detox.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "DETOX_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Upper bound on the request body limit.
pub(crate) const MAX_BODY_BYTES_LIMIT: usize = 16 * 1024 * 1024;
/// Upper bound on the read connection pool.
pub(crate) const MAX_READ_POOL_SIZE: usize = 64;
/// Partition reported when a request names none (Physics).
pub(crate) const DEFAULT_PARTITION_ID: u64 = 10;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Top-level Detox configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DetoxConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Snapshot store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Report defaults.
    #[serde(default)]
    pub report: ReportConfig,
}

impl DetoxConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.store.validate()?;
        self.report.validate()?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket address to bind.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Permits binding to non-loopback addresses. Authentication is expected
    /// from a fronting proxy when enabled.
    #[serde(default)]
    pub allow_non_loopback: bool,
    /// Audit logging configuration.
    #[serde(default)]
    pub audit: ServerAuditConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
            allow_non_loopback: false,
            audit: ServerAuditConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Returns the parsed bind address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the address does not parse.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let bind = self.bind.trim();
        if bind.is_empty() {
            return Err(ConfigError::Invalid("server.bind must be non-empty".to_string()));
        }
        bind.parse().map_err(|_| ConfigError::Invalid("invalid bind address".to_string()))
    }

    /// Validates server configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_body_bytes must be greater than zero".to_string(),
            ));
        }
        if self.max_body_bytes > MAX_BODY_BYTES_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_body_bytes exceeds limit of {MAX_BODY_BYTES_LIMIT}"
            )));
        }
        let addr = self.bind_addr()?;
        if !addr.ip().is_loopback() && !self.allow_non_loopback {
            return Err(ConfigError::Invalid(
                "non-loopback bind disallowed without server.allow_non_loopback".to_string(),
            ));
        }
        self.audit.validate()
    }
}

/// Audit logging configuration for HTTP requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerAuditConfig {
    /// Enable structured audit logging.
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    /// Optional audit log path (JSON lines); stderr when absent.
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for ServerAuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            path: None,
        }
    }
}

impl ServerAuditConfig {
    /// Validates audit configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.path {
            validate_path_string("server.audit.path", path)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Snapshot store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// `SQLite` database path.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_store_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Number of read connections.
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            busy_timeout_ms: default_store_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            read_pool_size: default_read_pool_size(),
        }
    }
}

impl StoreConfig {
    /// Returns the `SQLite` store configuration.
    #[must_use]
    pub fn sqlite(&self) -> SqliteStoreConfig {
        SqliteStoreConfig {
            path: self.path.clone(),
            busy_timeout_ms: self.busy_timeout_ms,
            journal_mode: self.journal_mode,
            sync_mode: self.sync_mode,
            read_pool_size: self.read_pool_size,
        }
    }

    /// Validates store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_path_string("store.path", &self.path.to_string_lossy())?;
        if self.read_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "store.read_pool_size must be greater than zero".to_string(),
            ));
        }
        if self.read_pool_size > MAX_READ_POOL_SIZE {
            return Err(ConfigError::Invalid(format!(
                "store.read_pool_size exceeds limit of {MAX_READ_POOL_SIZE}"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Report
// ============================================================================

/// Report defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReportConfig {
    /// Partition used when a request resolves none.
    #[serde(default = "default_partition_id")]
    pub default_partition_id: u64,
    /// Cycle operation the monitor reports on.
    #[serde(default)]
    pub operation: CycleOperation,
    /// Optional HTML shell template; the embedded page is used otherwise.
    #[serde(default)]
    pub page_template: Option<PathBuf>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            default_partition_id: default_partition_id(),
            operation: CycleOperation::default(),
            page_template: None,
        }
    }
}

impl ReportConfig {
    /// Returns the cycle resolution defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the default partition is zero.
    pub fn resolution_defaults(&self) -> Result<ResolutionDefaults, ConfigError> {
        let partition_id = PartitionId::from_raw(self.default_partition_id).ok_or_else(|| {
            ConfigError::Invalid("report.default_partition_id must be greater than zero".to_string())
        })?;
        Ok(ResolutionDefaults {
            partition_id,
            operation: self.operation,
        })
    }

    /// Validates report configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        self.resolution_defaults()?;
        if let Some(template) = &self.page_template {
            validate_path_string("report.page_template", &template.to_string_lossy())?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Returns the default bind address.
fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// Returns the default request body limit.
const fn default_max_body_bytes() -> usize {
    64 * 1024
}

/// Returns the default audit enablement.
const fn default_audit_enabled() -> bool {
    true
}

/// Returns the default store path.
fn default_store_path() -> PathBuf {
    PathBuf::from("detox.sqlite")
}

/// Returns the default store busy timeout.
const fn default_store_busy_timeout_ms() -> u64 {
    5_000
}

/// Returns the default read pool size.
const fn default_read_pool_size() -> usize {
    4
}

/// Returns the default partition identifier.
const fn default_partition_id() -> u64 {
    DEFAULT_PARTITION_ID
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        if component.as_os_str().to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions use unwrap for clarity.")]

    use super::MAX_PATH_COMPONENT_LENGTH;
    use super::validate_path_string;

    #[test]
    fn validate_path_string_rejects_whitespace_only() {
        let result = validate_path_string("store.path", "   ");
        assert!(result.unwrap_err().to_string().contains("store.path must be non-empty"));
    }

    #[test]
    fn validate_path_string_rejects_component_too_long() {
        let long_component = "a".repeat(MAX_PATH_COMPONENT_LENGTH + 1);
        let result = validate_path_string("store.path", &format!("data/{long_component}"));
        assert!(result.unwrap_err().to_string().contains("path component too long"));
    }

    #[test]
    fn validate_path_string_accepts_relative_path() {
        assert!(validate_path_string("store.path", "./var/detox.sqlite").is_ok());
    }
}
