//! Bootstrap configuration loading
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `GOTM_CONFIG` environment variable
//! 3. `<user config dir>/gotm/config.toml`, if it exists
//! 4. Compiled defaults (fallback)
//!
//! A missing config file is not fatal: defaults are used and a warning is
//! logged. The chat-server token is the one value without a default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::{Error, Result};

pub const CONFIG_ENV_VAR: &str = "GOTM_CONFIG";
pub const TOKEN_ENV_VAR: &str = "GOTM_DISCORD_TOKEN";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// SQLite file backing the Resource Store
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Resource table name
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// HTTP port for the vote submission surface
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub discord: DiscordConfig,

    #[serde(default)]
    pub election: ElectionConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            table_name: default_table_name(),
            port: default_port(),
            discord: DiscordConfig::default(),
            election: ElectionConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TomlConfig {
    /// Configured database path, or the per-user data directory default
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }
}

/// Chat-server connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Bot token. Prefer the `GOTM_DISCORD_TOKEN` environment variable.
    #[serde(default)]
    pub token: Option<String>,

    /// Minimum spacing between remote API requests
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token: None,
            min_request_interval_ms: default_min_request_interval_ms(),
        }
    }
}

/// Election scheduling and policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Scheduler wake period
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Delay between guilds within one pass
    #[serde(default = "default_guild_delay_ms")]
    pub guild_delay_ms: u64,

    /// Remove bot accounts other than our own when rotating the honoree
    #[serde(default = "default_true")]
    pub remove_foreign_bots: bool,

    /// Consecutive passes that may fail to enumerate guilds before the
    /// scheduler gives up
    #[serde(default = "default_max_consecutive_pass_failures")]
    pub max_consecutive_pass_failures: u32,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            guild_delay_ms: default_guild_delay_ms(),
            remove_foreign_bots: true,
            max_consecutive_pass_failures: default_max_consecutive_pass_failures(),
        }
    }
}

impl ElectionConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn guild_delay(&self) -> Duration {
        Duration::from_millis(self.guild_delay_ms)
    }
}

/// Vote submission API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Shared secret for request hashes; 0 disables authentication
    #[serde(default)]
    pub shared_secret: i64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            shared_secret: 0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_table_name() -> String {
    "beyond".to_string()
}

fn default_port() -> u16 {
    5790
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_min_request_interval_ms() -> u64 {
    50
}

fn default_check_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_guild_delay_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_max_consecutive_pass_failures() -> u32 {
    3
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// OS-dependent default database location
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("gotm").join("gotm.db"))
        .unwrap_or_else(|| PathBuf::from("./gotm_data/gotm.db"))
}

/// Locate the config file following the priority order above.
/// `None` means "use compiled defaults".
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: User config directory
    dirs::config_dir()
        .map(|d| d.join("gotm").join("config.toml"))
        .filter(|path| path.exists())
}

/// Load configuration from `path`, or defaults when no file was resolved.
///
/// A path that was resolved but cannot be read falls back to defaults with a
/// warning; a file that exists but does not parse is an error.
pub fn load_config(path: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = path else {
        info!("No config file found, using compiled defaults");
        return Ok(TomlConfig::default());
    };

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(
                "Could not read config file {} ({}), using compiled defaults",
                path.display(),
                e
            );
            return Ok(TomlConfig::default());
        }
    };

    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Resolve the chat-server token: environment first, then TOML.
///
/// A missing token is fatal: the process must not start serving.
pub fn resolve_discord_token(config: &TomlConfig) -> Result<String> {
    if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
        if is_valid_token(&token) {
            info!("Chat-server token loaded from environment variable");
            return Ok(token.trim().to_string());
        }
    }

    if let Some(token) = config.discord.token.as_deref() {
        if is_valid_token(token) {
            info!("Chat-server token loaded from TOML config");
            return Ok(token.trim().to_string());
        }
    }

    Err(Error::Config(format!(
        "Chat-server token not configured. Set {} or [discord].token in the config file",
        TOKEN_ENV_VAR
    )))
}

fn is_valid_token(token: &str) -> bool {
    !token.trim().is_empty()
}
