use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const APP_CONFIG_DIR: &str = "HalfDuplexBot";
const APP_CONFIG_FILE: &str = "config.json";
const LOCAL_CONFIG_FILE: &str = "halfduplex.json";
const CONFIG_PATH_ENV: &str = "HALFDUPLEX_CONFIG";

pub const DEFAULT_SERVER_HOST: &str = "localhost";
pub const DEFAULT_SERVER_PORT: u16 = 64738;
pub const DEFAULT_USERNAME: &str = "HalfDuplexBot";
pub const DEFAULT_CHANNEL: &str = "Half-Duplex Channel";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_allow_insecure_tls")]
    pub allow_insecure_tls: bool,
    /// PKCS#12 client certificate used to authenticate as a registered user.
    #[serde(default)]
    pub certificate: Option<PathBuf>,
    #[serde(default)]
    pub certificate_password: String,
}

/// One channel name or a list of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ChannelSelection {
    Single(String),
    Many(Vec<String>),
}

impl ChannelSelection {
    pub fn names(&self) -> Vec<String> {
        let raw: Vec<&String> = match self {
            Self::Single(name) => vec![name],
            Self::Many(names) => names.iter().collect(),
        };
        raw.into_iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActivityMode {
    /// Every received voice packet counts as activity.
    #[default]
    Chunks,
    /// Only talk-state transitions (and their refreshes) count.
    TalkState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BotConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_channels", alias = "channel")]
    pub channels: ChannelSelection,
    /// Seconds a new speaker must hold the floor before others are muted.
    #[serde(default = "default_speak_delay")]
    pub speak_delay: f64,
    /// Seconds of silence before everyone is unmuted again.
    #[serde(default = "default_restore_delay")]
    pub restore_delay: f64,
    #[serde(default)]
    pub activity_mode: ActivityMode,
    #[serde(default = "default_verbose_logging")]
    pub verbose_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: None,
            allow_insecure_tls: default_allow_insecure_tls(),
            certificate: None,
            certificate_password: String::new(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            username: default_username(),
            channels: default_channels(),
            speak_delay: default_speak_delay(),
            restore_delay: default_restore_delay(),
            activity_mode: ActivityMode::default(),
            verbose_logging: default_verbose_logging(),
        }
    }
}

impl BotConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.username.trim().is_empty() {
            return Err(ConfigError::Invalid("username cannot be empty".to_string()));
        }
        if self.channels.names().is_empty() {
            return Err(ConfigError::Invalid(
                "at least one half-duplex channel must be configured".to_string(),
            ));
        }
        for (field, value) in [
            ("speak_delay", self.speak_delay),
            ("restore_delay", self.restore_delay),
        ] {
            if Duration::try_from_secs_f64(value).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be a non-negative, representable number of seconds, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Values rejected by [`Self::validate`] saturate instead of panicking.
    pub fn speak_delay(&self) -> Duration {
        seconds(self.speak_delay)
    }

    pub fn restore_delay(&self) -> Duration {
        seconds(self.restore_delay)
    }
}

fn seconds(value: f64) -> Duration {
    match Duration::try_from_secs_f64(value) {
        Ok(duration) => duration,
        Err(_) if value > 0.0 => Duration::MAX,
        Err(_) => Duration::ZERO,
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: BotConfig,
    pub path: PathBuf,
    /// Set when no file existed and defaults were written to `path`.
    pub created_default: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to resolve config base directory")]
    NoConfigDirectory,
    #[error("failed to create config directory {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        path: String,
        source: serde_json::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write config file {path}: {source}")]
    WriteFile {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads the bot configuration.
///
/// An explicit path must exist. Otherwise the `HALFDUPLEX_CONFIG` variable and
/// a `halfduplex.json` next to the working directory are tried before the
/// per-user config file, which is created with defaults on first run.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    if let Some(path) = explicit {
        let config = read_config(path)?;
        config.validate()?;
        return Ok(LoadedConfig {
            config,
            path: path.to_path_buf(),
            created_default: false,
        });
    }

    if let Some(local_path) = find_local_config() {
        let config = read_config(&local_path)?;
        config.validate()?;
        return Ok(LoadedConfig {
            config,
            path: local_path,
            created_default: false,
        });
    }

    let path = persistent_config_path()?;
    let created_default = !path.exists();
    let config = if created_default {
        let config = BotConfig::default();
        save_config_to_path(&path, &config)?;
        config
    } else {
        read_config(&path)?
    };
    config.validate()?;

    Ok(LoadedConfig {
        config,
        path,
        created_default,
    })
}

pub fn save_config_to_path(path: &Path, config: &BotConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
            path: parent.display().to_string(),
            source,
        })?;
    }

    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content).map_err(|source| ConfigError::WriteFile {
        path: path.display().to_string(),
        source,
    })
}

pub fn persistent_config_path() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDirectory)?;
    Ok(base_dir.join(APP_CONFIG_DIR).join(APP_CONFIG_FILE))
}

fn read_config(path: &Path) -> Result<BotConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::ParseFile {
        path: path.display().to_string(),
        source,
    })
}

fn find_local_config() -> Option<PathBuf> {
    if let Ok(path_from_env) = std::env::var(CONFIG_PATH_ENV) {
        let from_env = PathBuf::from(path_from_env);
        if from_env.exists() {
            return Some(from_env);
        }
        log::warn!(
            "{CONFIG_PATH_ENV} points at {} which does not exist",
            from_env.display()
        );
    }

    let cwd = std::env::current_dir().ok()?;
    let direct = cwd.join(LOCAL_CONFIG_FILE);
    if direct.exists() {
        return Some(direct);
    }

    let parent = cwd.parent()?.join(LOCAL_CONFIG_FILE);
    if parent.exists() {
        return Some(parent);
    }

    None
}

fn default_host() -> String {
    DEFAULT_SERVER_HOST.to_string()
}

const fn default_port() -> u16 {
    DEFAULT_SERVER_PORT
}

const fn default_allow_insecure_tls() -> bool {
    true
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

fn default_channels() -> ChannelSelection {
    ChannelSelection::Single(DEFAULT_CHANNEL.to_string())
}

const fn default_speak_delay() -> f64 {
    0.2
}

const fn default_restore_delay() -> f64 {
    0.5
}

const fn default_verbose_logging() -> bool {
    true
}
