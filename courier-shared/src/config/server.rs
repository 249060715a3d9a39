use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf};
use thiserror::Error;

/// Deployment profile selecting baseline defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    Dev,
    Test,
    Prod,
}

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported configuration format; use 'yaml' or 'json'")]
    UnsupportedFormat,
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port for the HTTP server.
    pub port: u16,
    /// Header used to propagate the request id.
    pub request_id_header: String,
    /// Upper bound for request bodies, in bytes. Inline media rides in
    /// JSON bodies, so this must exceed the encoded media ceiling.
    pub max_body_bytes: usize,
    /// CORS settings.
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5001,
            request_id_header: "x-request-id".to_string(),
            max_body_bytes: 50 * 1024 * 1024,
            cors: CorsConfig::default(),
        }
    }
}

/// CORS settings applied to the API router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins; empty means any origin.
    pub allowed_origins: Vec<String>,
    /// Whether credentials are allowed.
    pub allow_credentials: bool,
    /// Preflight cache duration in seconds.
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:5173".to_string()],
            allow_credentials: true,
            max_age_seconds: 3600,
        }
    }
}

/// Database settings. With no URL configured the server runs on the
/// in-memory store, which is suitable for development only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres connection URL.
    pub url: Option<String>,
    /// Maximum pool connections.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level directive.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Realtime channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Per-connection event buffer capacity.
    pub channel_capacity: usize,
    /// Keep-alive cadence for SSE connections.
    pub heartbeat_seconds: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            heartbeat_seconds: 25,
        }
    }
}

/// Ceilings for inline media payloads. Raw ceilings are per kind; the
/// encoded ceiling bounds the data URL itself regardless of kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Maximum decoded image size, in bytes.
    pub max_image_bytes: usize,
    /// Maximum decoded video size, in bytes.
    pub max_video_bytes: usize,
    /// Maximum encoded payload size, in bytes.
    pub max_encoded_bytes: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: 10 * 1024 * 1024,
            max_video_bytes: 25 * 1024 * 1024,
            max_encoded_bytes: 35 * 1024 * 1024,
        }
    }
}

/// Session verification settings. Sessions are issued by the external
/// auth service; the server only resolves them to user ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cookie carrying the session token.
    pub cookie_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "courier_session".to_string(),
        }
    }
}

/// The main configuration structure for the Courier server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub db: DatabaseConfig,
    pub logging: LoggingConfig,
    pub stream: StreamConfig,
    pub media: MediaConfig,
    pub session: SessionConfig,
}

impl Config {
    /// Baseline configuration for the given profile.
    #[must_use]
    pub fn default_for_profile(profile: Profile) -> Self {
        let mut config = Self::default();
        match profile {
            Profile::Dev => {}
            Profile::Test => {
                config.logging.level = "warn".to_string();
                config.stream.channel_capacity = 8;
            }
            Profile::Prod => {
                config.logging.format = LogFormat::Json;
                config.server.cors.allowed_origins = Vec::new();
                config.db.max_connections = 16;
            }
        }
        config
    }

    /// Loads configuration from an optional file, environment variables,
    /// and an optional port override, in increasing precedence.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resolved configuration fails validation.
    pub fn load(config_path: Option<PathBuf>, port_override: Option<u16>) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => {
                let content = fs::read_to_string(&path)?;
                match path.extension().and_then(|ext| ext.to_str()) {
                    Some("yaml" | "yml") => serde_yml::from_str(&content)
                        .map_err(|err| ConfigError::Parse(err.to_string()))?,
                    Some("json") => serde_json::from_str(&content)
                        .map_err(|err| ConfigError::Parse(err.to_string()))?,
                    _ => return Err(ConfigError::UnsupportedFormat),
                }
            }
            None => Self::default_for_profile(Profile::Dev),
        };

        config.apply_env_overrides();

        if let Some(port) = port_override {
            config.server.port = port;
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = env::var("COURIER_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(url) = env::var("COURIER_DATABASE_URL") {
            if !url.is_empty() {
                self.db.url = Some(url);
            }
        }
        if let Ok(level) = env::var("COURIER_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("COURIER_LOG_FORMAT") {
            match format.as_str() {
                "json" => self.logging.format = LogFormat::Json,
                "text" => self.logging.format = LogFormat::Text,
                _ => {}
            }
        }
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    /// Returns an error describing the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid(
                "server.port must be greater than 0".to_string(),
            ));
        }
        if self.stream.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "stream.channel_capacity must be greater than 0".to_string(),
            ));
        }
        if self.media.max_encoded_bytes >= self.server.max_body_bytes {
            return Err(ConfigError::Invalid(
                "media.max_encoded_bytes must be below server.max_body_bytes".to_string(),
            ));
        }
        Ok(())
    }
}
