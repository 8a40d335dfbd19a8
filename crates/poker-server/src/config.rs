// Configuration loading and validation (config/server.toml).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// server.toml structs
// ---------------------------------------------------------------------------

/// Name of the single config file under `config/`.
pub const CONFIG_FILE: &str = "server.toml";

/// Environment variable that overrides `server.http_port`.
pub const PORT_ENV: &str = "PORT";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub websocket: WebsocketConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerConfig {
    /// Interface both listeners bind to.
    pub host: String,
    /// Port of the HTTP side channel (`/api/server-info`).
    pub http_port: u16,
    /// Host advertised in share links. Discovered from the local network
    /// interface when unset.
    #[serde(default)]
    pub public_host: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebsocketConfig {
    pub port: u16,
    /// Frames queued per connection before new ones are dropped.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// A connection that sends nothing (not even a pong) for this long is
    /// closed and treated as disconnected.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl WebsocketConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_id_length")]
    pub id_length: usize,
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        SessionsConfig {
            id_length: default_id_length(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

impl SessionsConfig {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins over it.
    #[serde(default)]
    pub filter: Option<String>,
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_ping_interval_secs() -> u64 {
    25
}

fn default_idle_timeout_secs() -> u64 {
    60
}

fn default_id_length() -> usize {
    poker_core::registry::DEFAULT_ID_LENGTH
}

fn default_stats_interval_secs() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/server.toml` relative to `base_dir`.
///
/// Does not copy defaults or look at the environment; `load_config()` does
/// both.
pub(crate) fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let config: Config = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    validate(&config)?;

    Ok(config)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the server crate root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let mut copied = Vec::new();

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Loads config relative to the current working directory, copying
/// defaults first and applying the `PORT` override.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    let config = load_config_from(&cwd)?;
    apply_port_override(config, std::env::var(PORT_ENV).ok().as_deref())
}

/// Replace `server.http_port` with the value of the `PORT` variable, if set.
pub fn apply_port_override(mut config: Config, port: Option<&str>) -> Result<Config, ConfigError> {
    let Some(raw) = port.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(config);
    };
    config.server.http_port = raw.parse().map_err(|_| ConfigError::ValidationError {
        field: PORT_ENV.into(),
        message: format!("not a valid port: {raw:?}"),
    })?;
    validate(&config)?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.server.host.trim().is_empty() {
        return Err(invalid("server.host", "must not be empty"));
    }
    if config.server.http_port == 0 {
        return Err(invalid("server.http_port", "must be greater than 0"));
    }
    if config.websocket.port == 0 {
        return Err(invalid("websocket.port", "must be greater than 0"));
    }
    if config.server.http_port == config.websocket.port {
        return Err(invalid(
            "websocket.port",
            format!(
                "must differ from server.http_port ({})",
                config.server.http_port
            ),
        ));
    }

    if config.websocket.outbound_buffer == 0 {
        return Err(invalid("websocket.outbound_buffer", "must be greater than 0"));
    }
    let ws = &config.websocket;
    if ws.ping_interval_secs == 0 {
        return Err(invalid("websocket.ping_interval_secs", "must be greater than 0"));
    }
    if ws.ping_interval_secs >= ws.idle_timeout_secs {
        return Err(invalid(
            "websocket.idle_timeout_secs",
            format!(
                "must be greater than ping_interval_secs ({}), got {}",
                ws.ping_interval_secs, ws.idle_timeout_secs
            ),
        ));
    }

    let len = config.sessions.id_length;
    if !(4..=16).contains(&len) {
        return Err(invalid(
            "sessions.id_length",
            format!("must be between 4 and 16 inclusive, got {len}"),
        ));
    }
    if config.sessions.stats_interval_secs == 0 {
        return Err(invalid("sessions.stats_interval_secs", "must be greater than 0"));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
