//! Configuration management
//!
//! Configuration is read from `config.yml` and may be overridden by
//! `CUSTOMS_TRACKER_*` environment variables. Missing values fall back to
//! defaults, so an absent or empty file yields a runnable configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server
    #[serde(default)]
    pub server: ServerConfig,
    /// Document database
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Uploaded file storage
    #[serde(default)]
    pub upload: UploadConfig,
    /// Login sessions
    #[serde(default)]
    pub session: SessionConfig,
    /// Reference table synchronisation
    #[serde(default)]
    pub sync: SyncConfig,
    /// Remote client settings used by the admin tool
    #[serde(default)]
    pub client: ClientConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite path or `sqlite:` URL; `:memory:` for a throwaway database
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/customs-tracker.db".to_string()
}

/// Upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Directory uploaded blobs are written to
    #[serde(default = "default_upload_path")]
    pub path: PathBuf,
    /// Maximum decoded file size in bytes (default: 20MB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Prefix for public file URLs, e.g. `https://files.example.com`.
    /// Empty means URLs are relative to this server.
    #[serde(default)]
    pub public_url: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            path: default_upload_path(),
            max_file_size: default_max_file_size(),
            public_url: String::new(),
        }
    }
}

fn default_upload_path() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_file_size() -> u64 {
    20 * 1024 * 1024
}

impl UploadConfig {
    /// Public URL of a stored blob
    pub fn file_url(&self, stored_name: &str) -> String {
        format!("{}/files/{}", self.public_url.trim_end_matches('/'), stored_name)
    }

    /// Largest request body that can carry a base64 upload of `max_file_size`
    pub fn max_body_size(&self) -> usize {
        let encoded = self.max_file_size.saturating_mul(4) / 3;
        (encoded as usize).saturating_add(64 * 1024)
    }
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Days until a login session expires
    #[serde(default = "default_expiration_days")]
    pub expiration_days: i64,
    /// Reject data actions from callers without a valid session
    #[serde(default)]
    pub require_auth: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expiration_days: default_expiration_days(),
            require_auth: false,
        }
    }
}

fn default_expiration_days() -> i64 {
    7
}

/// Sync job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Tracking records fetched per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Records processed between progress reports
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_page_size() -> u32 {
    1000
}

fn default_chunk_size() -> usize {
    50
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Store endpoint of a running server
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// File the session token is persisted to
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            session_file: default_session_file(),
        }
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8080/api/store".to_string()
}

fn default_session_file() -> PathBuf {
    PathBuf::from("data/session.json")
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file.
    ///
    /// A missing or empty file yields the defaults. Invalid YAML is reported
    /// with its line and column.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file, then apply environment overrides:
    /// - CUSTOMS_TRACKER_SERVER_HOST
    /// - CUSTOMS_TRACKER_SERVER_PORT
    /// - CUSTOMS_TRACKER_SERVER_CORS_ORIGIN
    /// - CUSTOMS_TRACKER_DATABASE_URL
    /// - CUSTOMS_TRACKER_UPLOAD_PATH
    /// - CUSTOMS_TRACKER_UPLOAD_MAX_FILE_SIZE
    /// - CUSTOMS_TRACKER_UPLOAD_PUBLIC_URL
    /// - CUSTOMS_TRACKER_SESSION_EXPIRATION_DAYS
    /// - CUSTOMS_TRACKER_SESSION_REQUIRE_AUTH
    /// - CUSTOMS_TRACKER_CLIENT_ENDPOINT
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("CUSTOMS_TRACKER_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("CUSTOMS_TRACKER_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(cors_origin) = std::env::var("CUSTOMS_TRACKER_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }

        if let Ok(url) = std::env::var("CUSTOMS_TRACKER_DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(path) = std::env::var("CUSTOMS_TRACKER_UPLOAD_PATH") {
            self.upload.path = PathBuf::from(path);
        }
        if let Ok(size) = std::env::var("CUSTOMS_TRACKER_UPLOAD_MAX_FILE_SIZE") {
            if let Ok(size) = size.parse::<u64>() {
                self.upload.max_file_size = size;
            }
        }
        if let Ok(public_url) = std::env::var("CUSTOMS_TRACKER_UPLOAD_PUBLIC_URL") {
            self.upload.public_url = public_url;
        }

        if let Ok(days) = std::env::var("CUSTOMS_TRACKER_SESSION_EXPIRATION_DAYS") {
            if let Ok(days) = days.parse::<i64>() {
                self.session.expiration_days = days;
            }
        }
        if let Ok(flag) = std::env::var("CUSTOMS_TRACKER_SESSION_REQUIRE_AUTH") {
            match flag.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.session.require_auth = true,
                "0" | "false" | "no" => self.session.require_auth = false,
                _ => {}
            }
        }

        if let Ok(endpoint) = std::env::var("CUSTOMS_TRACKER_CLIENT_ENDPOINT") {
            self.client.endpoint = endpoint;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session.expiration_days <= 0 {
            return Err(ConfigError::ValidationError(
                "session.expiration_days must be positive".to_string(),
            ));
        }
        if self.sync.page_size == 0 || self.sync.page_size > 1000 {
            return Err(ConfigError::ValidationError(
                "sync.page_size must be between 1 and 1000".to_string(),
            ));
        }
        if self.sync.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "sync.chunk_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared by every test that touches process environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
const ENV_KEYS: &[&str] = &[
    "CUSTOMS_TRACKER_SERVER_HOST",
    "CUSTOMS_TRACKER_SERVER_PORT",
    "CUSTOMS_TRACKER_SERVER_CORS_ORIGIN",
    "CUSTOMS_TRACKER_DATABASE_URL",
    "CUSTOMS_TRACKER_UPLOAD_PATH",
    "CUSTOMS_TRACKER_UPLOAD_MAX_FILE_SIZE",
    "CUSTOMS_TRACKER_UPLOAD_PUBLIC_URL",
    "CUSTOMS_TRACKER_SESSION_EXPIRATION_DAYS",
    "CUSTOMS_TRACKER_SESSION_REQUIRE_AUTH",
    "CUSTOMS_TRACKER_CLIENT_ENDPOINT",
];

#[cfg(test)]
fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        super::CONFIG_ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let path = std::path::Path::new("nonexistent_config.yml");
        let config = Config::load(path).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.url, "data/customs-tracker.db");
        assert_eq!(config.upload.path, PathBuf::from("uploads"));
        assert_eq!(config.upload.max_file_size, 20 * 1024 * 1024);
        assert_eq!(config.session.expiration_days, 7);
        assert!(!config.session.require_auth);
        assert_eq!(config.sync.page_size, 1000);
        assert_eq!(config.sync.chunk_size, 50);
    }

    #[test]
    fn test_load_empty_file_returns_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.client.endpoint, "http://127.0.0.1:8080/api/store");
    }

    #[test]
    fn test_load_partial_config_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  port: 3000\nupload:\n  public_url: \"https://cdn.test\"\n").unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.upload.public_url, "https://cdn.test");
        assert_eq!(config.upload.path, PathBuf::from("uploads"));
    }

    #[test]
    fn test_load_full_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
server:
  host: "127.0.0.1"
  port: 9000
  cors_origin: "https://admin.test"
database:
  url: "sqlite:/var/lib/tracker.db"
upload:
  path: "/srv/files"
  max_file_size: 1024
session:
  expiration_days: 30
  require_auth: true
sync:
  page_size: 200
  chunk_size: 10
client:
  endpoint: "https://tracker.test/api/store"
  session_file: "/tmp/session.json"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.cors_origin, "https://admin.test");
        assert_eq!(config.database.url, "sqlite:/var/lib/tracker.db");
        assert_eq!(config.upload.path, PathBuf::from("/srv/files"));
        assert_eq!(config.upload.max_file_size, 1024);
        assert_eq!(config.session.expiration_days, 30);
        assert!(config.session.require_auth);
        assert_eq!(config.sync.page_size, 200);
        assert_eq!(config.sync.chunk_size, 10);
        assert_eq!(config.client.endpoint, "https://tracker.test/api/store");
        assert_eq!(config.client.session_file, PathBuf::from("/tmp/session.json"));
    }

    #[test]
    fn test_load_invalid_yaml_returns_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  port: not_a_number\n").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("parse"));
    }

    #[test]
    fn test_load_rejects_out_of_range_sync_page() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "sync:\n  page_size: 5000\n").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("page_size"));
    }

    #[test]
    fn test_file_url_with_and_without_public_prefix() {
        let mut upload = UploadConfig::default();
        assert_eq!(upload.file_url("a.pdf"), "/files/a.pdf");

        upload.public_url = "https://cdn.test/".to_string();
        assert_eq!(upload.file_url("a.pdf"), "https://cdn.test/files/a.pdf");
    }

    #[test]
    fn test_max_body_size_covers_base64_overhead() {
        let upload = UploadConfig {
            max_file_size: 3000,
            ..UploadConfig::default()
        };
        assert!(upload.max_body_size() >= 4000);
    }

    #[test]
    fn test_env_override_server_and_database() {
        let _guard = lock_env();
        clear_env();

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  host: \"0.0.0.0\"\n  port: 8080\n").unwrap();

        std::env::set_var("CUSTOMS_TRACKER_SERVER_HOST", "192.168.1.1");
        std::env::set_var("CUSTOMS_TRACKER_SERVER_PORT", "4000");
        std::env::set_var("CUSTOMS_TRACKER_DATABASE_URL", ":memory:");

        let config = Config::load_with_env(file.path()).unwrap();

        assert_eq!(config.server.host, "192.168.1.1");
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.database.url, ":memory:");

        clear_env();
    }

    #[test]
    fn test_env_override_session_flags() {
        let _guard = lock_env();
        clear_env();

        let file = NamedTempFile::new().unwrap();
        std::env::set_var("CUSTOMS_TRACKER_SESSION_REQUIRE_AUTH", "true");
        std::env::set_var("CUSTOMS_TRACKER_SESSION_EXPIRATION_DAYS", "2");

        let config = Config::load_with_env(file.path()).unwrap();
        assert!(config.session.require_auth);
        assert_eq!(config.session.expiration_days, 2);

        clear_env();
    }

    #[test]
    fn test_env_override_invalid_values_ignored() {
        let _guard = lock_env();
        clear_env();

        let file = NamedTempFile::new().unwrap();
        std::env::set_var("CUSTOMS_TRACKER_SERVER_PORT", "not-a-port");
        std::env::set_var("CUSTOMS_TRACKER_SESSION_REQUIRE_AUTH", "maybe");
        std::env::set_var("CUSTOMS_TRACKER_UPLOAD_MAX_FILE_SIZE", "-1");

        let config = Config::load_with_env(file.path()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(!config.session.require_auth);
        assert_eq!(config.upload.max_file_size, 20 * 1024 * 1024);

        clear_env();
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        super::CONFIG_ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn valid_host_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            (0u8..=255, 0u8..=255, 0u8..=255, 0u8..=255)
                .prop_map(|(a, b, c, d)| format!("{}.{}.{}.{}", a, b, c, d)),
            Just("localhost".to_string()),
            "[a-z][a-z0-9]{0,10}".prop_map(|s| s),
        ]
    }

    fn valid_config_strategy() -> impl Strategy<Value = Config> {
        (
            valid_host_strategy(),
            1u16..=65535,
            "[a-z][a-z0-9_/]{0,20}\\.db",
            1u64..=(100 * 1024 * 1024),
            1i64..=365,
            any::<bool>(),
            1u32..=1000,
            1usize..=500,
        )
            .prop_map(
                |(host, port, url, max_file_size, days, require_auth, page_size, chunk_size)| {
                    Config {
                        server: ServerConfig {
                            host,
                            port,
                            cors_origin: default_cors_origin(),
                        },
                        database: DatabaseConfig { url },
                        upload: UploadConfig {
                            max_file_size,
                            ..UploadConfig::default()
                        },
                        session: SessionConfig {
                            expiration_days: days,
                            require_auth,
                        },
                        sync: SyncConfig {
                            page_size,
                            chunk_size,
                        },
                        client: ClientConfig::default(),
                    }
                },
            )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        /// Serialising any valid config to YAML and loading it back is lossless.
        #[test]
        fn config_yaml_roundtrip(config in valid_config_strategy()) {
            let yaml = serde_yaml::to_string(&config).expect("Failed to serialize config");
            let mut file = NamedTempFile::new().expect("Failed to create temp file");
            write!(file, "{}", yaml).expect("Failed to write config");

            let parsed = Config::load(file.path()).expect("Failed to parse config");

            prop_assert_eq!(config.server.host, parsed.server.host);
            prop_assert_eq!(config.server.port, parsed.server.port);
            prop_assert_eq!(config.database.url, parsed.database.url);
            prop_assert_eq!(config.upload.max_file_size, parsed.upload.max_file_size);
            prop_assert_eq!(config.session.expiration_days, parsed.session.expiration_days);
            prop_assert_eq!(config.session.require_auth, parsed.session.require_auth);
            prop_assert_eq!(config.sync.page_size, parsed.sync.page_size);
            prop_assert_eq!(config.sync.chunk_size, parsed.sync.chunk_size);
        }

        /// Environment values take precedence over the file.
        #[test]
        fn env_port_precedence_over_file(file_port in 1u16..=65535, env_port in 1u16..=65535) {
            let _guard = lock_env();
            clear_env();

            let mut file = NamedTempFile::new().expect("Failed to create temp file");
            write!(file, "server:\n  port: {}\n", file_port).expect("Failed to write config");
            std::env::set_var("CUSTOMS_TRACKER_SERVER_PORT", env_port.to_string());

            let config = Config::load_with_env(file.path());
            clear_env();

            prop_assert_eq!(config.expect("Failed to load config").server.port, env_port);
        }
    }
}
