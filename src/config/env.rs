// src/config/env.rs
// Environment-based configuration - single source of truth for all env vars

use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Default retention window in days.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;
/// Default interval between retention sweeps in hours.
pub const DEFAULT_CLEANUP_INTERVAL_HOURS: u32 = 24;
/// Default session TTL in seconds (24h).
pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 86_400;

/// Retention policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Entries older than this many days are swept (CONTEXT_DNA_RETENTION_DAYS)
    pub retention_days: u32,
    /// Hours between sweeps (CONTEXT_DNA_CLEANUP_INTERVAL_HOURS)
    pub cleanup_interval_hours: u32,
    /// Whether the scheduled sweep runs at all
    pub enabled: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: DEFAULT_RETENTION_DAYS,
            cleanup_interval_hours: DEFAULT_CLEANUP_INTERVAL_HOURS,
            enabled: true,
        }
    }
}

impl RetentionConfig {
    fn from_env() -> Self {
        Self {
            retention_days: parse_env("CONTEXT_DNA_RETENTION_DAYS")
                .unwrap_or(DEFAULT_RETENTION_DAYS),
            cleanup_interval_hours: parse_env("CONTEXT_DNA_CLEANUP_INTERVAL_HOURS")
                .unwrap_or(DEFAULT_CLEANUP_INTERVAL_HOURS),
            enabled: true,
        }
    }

    /// Retention cutoff relative to `now` in epoch millis.
    pub fn cutoff_millis(&self, now: i64) -> i64 {
        now - i64::from(self.retention_days) * 86_400_000
    }
}

/// Session cache connection settings (SESSION_CACHE_* variables)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub host: Option<String>,
    pub port: u16,
    pub password: Option<String>,
    pub database: u32,
    /// Session TTL in seconds (SESSION_TTL_SECONDS)
    pub session_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 6379,
            password: None,
            database: 0,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
        }
    }
}

impl CacheConfig {
    fn from_env() -> Self {
        Self {
            host: read_var("SESSION_CACHE_HOST"),
            port: parse_env("SESSION_CACHE_PORT").unwrap_or(6379),
            password: read_var("SESSION_CACHE_PASSWORD"),
            database: parse_env("SESSION_CACHE_DB").unwrap_or(0),
            session_ttl_seconds: parse_env("SESSION_TTL_SECONDS")
                .unwrap_or(DEFAULT_SESSION_TTL_SECONDS),
        }
    }

    /// Whether a cache host is configured at all.
    ///
    /// Without one the in-process store backend is used instead.
    pub fn is_configured(&self) -> bool {
        self.host.is_some()
    }

    /// Connection URL for the cache server.
    pub fn url(&self) -> Option<String> {
        let host = self.host.as_deref()?;
        let auth = self
            .password
            .as_deref()
            .map(|p| format!(":{p}@"))
            .unwrap_or_default();
        Some(format!(
            "redis://{auth}{host}:{port}/{db}",
            port = self.port,
            db = self.database
        ))
    }
}

/// Object store settings for the artifact reference layer (ARTIFACT_* variables)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactConfig {
    pub bucket: Option<String>,
    pub region: Option<String>,
    /// Leading path segment for generated object paths
    pub prefix: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub endpoint: Option<String>,
}

impl ArtifactConfig {
    fn from_env() -> Self {
        Self {
            bucket: read_var("ARTIFACT_BUCKET"),
            region: read_var("ARTIFACT_REGION"),
            prefix: read_var("ARTIFACT_PREFIX").unwrap_or_else(|| "artifacts".to_string()),
            access_key: read_var("ARTIFACT_ACCESS_KEY"),
            secret_key: read_var("ARTIFACT_SECRET_KEY"),
            endpoint: read_var("ARTIFACT_ENDPOINT"),
        }
    }

    /// No bucket means fallback mode: `local://` URLs, no uploads, no presigning.
    pub fn is_fallback(&self) -> bool {
        self.bucket.is_none()
    }
}

/// Environment configuration - all env vars in one place
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Base directory for the store file (CONTEXT_DNA_DIR)
    pub data_dir: PathBuf,
    pub retention: RetentionConfig,
    pub cache: CacheConfig,
    pub artifacts: ArtifactConfig,
}

/// Resolve the base directory (CONTEXT_DNA_DIR, or `~/.context-dna`).
///
/// Exposed separately so the binary can locate the `.env` file before the
/// rest of the configuration is read.
pub fn resolve_data_dir() -> PathBuf {
    read_var("CONTEXT_DNA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(default_data_dir)
}

impl EnvConfig {
    /// Load all environment configuration (call once at startup)
    pub fn load() -> Self {
        info!("Loading environment configuration");

        let data_dir = resolve_data_dir();

        let config = Self {
            data_dir,
            retention: RetentionConfig::from_env(),
            cache: CacheConfig::from_env(),
            artifacts: ArtifactConfig::from_env(),
        };
        config.log_status();
        config
    }

    /// Path to the embedded store file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("context-dna.db")
    }

    fn log_status(&self) {
        debug!(dir = %self.data_dir.display(), "store directory");
        if !self.cache.is_configured() {
            debug!("SESSION_CACHE_HOST not set - using in-process session store");
        }
        if self.artifacts.is_fallback() {
            debug!("ARTIFACT_BUCKET not set - artifact layer in local fallback mode");
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigValidation {
        let mut validation = ConfigValidation::new();

        if self.retention.retention_days == 0 {
            validation.add_error("CONTEXT_DNA_RETENTION_DAYS must be at least 1");
        }
        if self.retention.cleanup_interval_hours == 0 {
            validation.add_error("CONTEXT_DNA_CLEANUP_INTERVAL_HOURS must be at least 1");
        }
        if !self.cache.is_configured() {
            validation.add_warning(
                "No session cache host configured. Set SESSION_CACHE_HOST for shared session state.",
            );
        }
        if self.artifacts.is_fallback() {
            validation.add_warning(
                "No artifact bucket configured. Set ARTIFACT_BUCKET to enable object-store paths.",
            );
        } else if self.artifacts.secret_key.is_none() {
            validation
                .add_warning("ARTIFACT_BUCKET is set but ARTIFACT_SECRET_KEY is missing - presigned URLs disabled.");
        }

        validation
    }
}

/// Configuration validation result
#[derive(Debug, Default)]
pub struct ConfigValidation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigValidation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Format as a human-readable report
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        if !self.errors.is_empty() {
            lines.push("Errors:".to_string());
            for err in &self.errors {
                lines.push(format!("  - {}", err));
            }
        }

        if !self.warnings.is_empty() {
            lines.push("Warnings:".to_string());
            for warning in &self.warnings {
                lines.push(format!("  - {}", warning));
            }
        }

        if lines.is_empty() {
            "Configuration OK".to_string()
        } else {
            lines.join("\n")
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".context-dna"))
        .unwrap_or_else(|| PathBuf::from(".context-dna"))
}

fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = read_var(name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "unparseable env var, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_defaults() {
        let config = RetentionConfig::default();
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.cleanup_interval_hours, 24);
        assert!(config.enabled);
    }

    #[test]
    fn test_retention_cutoff() {
        let config = RetentionConfig {
            retention_days: 30,
            ..Default::default()
        };
        let now = 1_700_000_000_000;
        assert_eq!(config.cutoff_millis(now), now - 30 * 86_400_000);
    }

    #[test]
    fn test_cache_url_with_password() {
        let config = CacheConfig {
            host: Some("cache.internal".to_string()),
            port: 6380,
            password: Some("hunter2".to_string()),
            database: 3,
            session_ttl_seconds: 60,
        };
        assert_eq!(
            config.url().unwrap(),
            "redis://:hunter2@cache.internal:6380/3"
        );
    }

    #[test]
    fn test_cache_unconfigured_has_no_url() {
        let config = CacheConfig::default();
        assert!(!config.is_configured());
        assert!(config.url().is_none());
    }

    #[test]
    fn test_validation_flags_zero_retention() {
        let mut config = EnvConfig {
            data_dir: PathBuf::from("/tmp/x"),
            retention: RetentionConfig::default(),
            cache: CacheConfig::default(),
            artifacts: ArtifactConfig::default(),
        };
        config.retention.retention_days = 0;
        assert!(!config.validate().is_valid());
    }
}
