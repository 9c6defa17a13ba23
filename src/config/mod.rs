//! Configuration management
//!
//! Configuration is loaded from `config.yml` and can be overridden with
//! `PLAYOPIA_*` environment variables. Missing values fall back to defaults,
//! so an absent or empty file yields a runnable configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Session lifetime and cookie settings
    #[serde(default)]
    pub session: SessionConfig,
    /// Argon2 cost parameters for new password hashes
    #[serde(default)]
    pub password: PasswordConfig,
    /// Failed-login throttling
    #[serde(default)]
    pub login_limit: LoginLimitConfig,
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
    /// Directory served under `/static`
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("public")
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/playopia.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a session stays valid after login, in minutes
    #[serde(default = "default_session_ttl")]
    pub ttl_minutes: i64,
    /// How often expired sessions are purged, in minutes
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_minutes: u64,
    /// Name of the cookie carrying the session token
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Add the `Secure` attribute to the session cookie
    #[serde(default)]
    pub secure_cookie: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_session_ttl(),
            sweep_interval_minutes: default_sweep_interval(),
            cookie_name: default_cookie_name(),
            secure_cookie: false,
        }
    }
}

fn default_session_ttl() -> i64 {
    60
}

fn default_sweep_interval() -> u64 {
    20
}

fn default_cookie_name() -> String {
    "session".to_string()
}

/// Argon2id cost parameters.
///
/// Only affects newly created hashes; verification reads the parameters
/// embedded in each stored PHC string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordConfig {
    /// Memory cost in KiB
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,
    /// Number of passes
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Degree of parallelism
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
        }
    }
}

fn default_memory_kib() -> u32 {
    argon2::Params::DEFAULT_M_COST
}

fn default_iterations() -> u32 {
    argon2::Params::DEFAULT_T_COST
}

fn default_parallelism() -> u32 {
    argon2::Params::DEFAULT_P_COST
}

/// Failed-login throttling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginLimitConfig {
    /// Failed attempts allowed per username inside the window
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Sliding window length in minutes
    #[serde(default = "default_window_minutes")]
    pub window_minutes: i64,
}

impl Default for LoginLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_minutes: default_window_minutes(),
        }
    }
}

fn default_max_attempts() -> usize {
    5
}

fn default_window_minutes() -> i64 {
    15
}

/// Upper bound for every minute-valued setting (one year)
const MAX_MINUTES: i64 = 525_600;

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist or is empty, returns the default configuration.
    /// Invalid YAML is reported with its line and column.
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

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        Ok(config)
    }

    /// Load configuration from file, apply environment overrides and validate.
    ///
    /// Recognised variables:
    /// - PLAYOPIA_SERVER_HOST, PLAYOPIA_SERVER_PORT, PLAYOPIA_SERVER_STATIC_DIR
    /// - PLAYOPIA_DATABASE_DRIVER, PLAYOPIA_DATABASE_URL
    /// - PLAYOPIA_SESSION_TTL_MINUTES, PLAYOPIA_SESSION_SWEEP_INTERVAL_MINUTES,
    ///   PLAYOPIA_SESSION_COOKIE_NAME, PLAYOPIA_SESSION_SECURE_COOKIE
    /// - PLAYOPIA_PASSWORD_MEMORY_KIB, PLAYOPIA_PASSWORD_ITERATIONS,
    ///   PLAYOPIA_PASSWORD_PARALLELISM
    /// - PLAYOPIA_LOGIN_LIMIT_MAX_ATTEMPTS, PLAYOPIA_LOGIN_LIMIT_WINDOW_MINUTES
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.ttl_minutes <= 0 || self.session.ttl_minutes > MAX_MINUTES {
            return Err(ConfigError::ValidationError(format!(
                "session.ttl_minutes must be between 1 and {}",
                MAX_MINUTES
            )));
        }
        if self.session.sweep_interval_minutes == 0
            || self.session.sweep_interval_minutes > MAX_MINUTES as u64
        {
            return Err(ConfigError::ValidationError(
                "session.sweep_interval_minutes is out of range".to_string(),
            ));
        }
        if !is_cookie_token(&self.session.cookie_name) {
            return Err(ConfigError::ValidationError(format!(
                "session.cookie_name '{}' is not a valid cookie name",
                self.session.cookie_name
            )));
        }
        if self.login_limit.max_attempts == 0
            || self.login_limit.window_minutes <= 0
            || self.login_limit.window_minutes > MAX_MINUTES
        {
            return Err(ConfigError::ValidationError(
                "login_limit values are out of range".to_string(),
            ));
        }
        argon2::Params::new(
            self.password.memory_kib,
            self.password.iterations,
            self.password.parallelism,
            None,
        )
        .map_err(|e| ConfigError::ValidationError(format!("password: {}", e)))?;

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        // Server
        if let Ok(host) = std::env::var("PLAYOPIA_SERVER_HOST") {
            self.server.host = host;
        }
        override_parsed("PLAYOPIA_SERVER_PORT", &mut self.server.port);
        if let Ok(dir) = std::env::var("PLAYOPIA_SERVER_STATIC_DIR") {
            self.server.static_dir = PathBuf::from(dir);
        }

        // Database
        if let Ok(driver) = std::env::var("PLAYOPIA_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => tracing::warn!("Ignoring unknown PLAYOPIA_DATABASE_DRIVER '{}'", driver),
            }
        }
        if let Ok(url) = std::env::var("PLAYOPIA_DATABASE_URL") {
            self.database.url = url;
        }

        // Session
        override_parsed("PLAYOPIA_SESSION_TTL_MINUTES", &mut self.session.ttl_minutes);
        override_parsed(
            "PLAYOPIA_SESSION_SWEEP_INTERVAL_MINUTES",
            &mut self.session.sweep_interval_minutes,
        );
        if let Ok(name) = std::env::var("PLAYOPIA_SESSION_COOKIE_NAME") {
            self.session.cookie_name = name;
        }
        override_parsed("PLAYOPIA_SESSION_SECURE_COOKIE", &mut self.session.secure_cookie);

        // Password hashing
        override_parsed("PLAYOPIA_PASSWORD_MEMORY_KIB", &mut self.password.memory_kib);
        override_parsed("PLAYOPIA_PASSWORD_ITERATIONS", &mut self.password.iterations);
        override_parsed("PLAYOPIA_PASSWORD_PARALLELISM", &mut self.password.parallelism);

        // Login throttling
        override_parsed("PLAYOPIA_LOGIN_LIMIT_MAX_ATTEMPTS", &mut self.login_limit.max_attempts);
        override_parsed("PLAYOPIA_LOGIN_LIMIT_WINDOW_MINUTES", &mut self.login_limit.window_minutes);
    }
}

/// RFC 6265 cookie-name token: visible ASCII without separators
fn is_cookie_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_graphic()
                && !matches!(
                    b,
                    b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\'
                        | b'"' | b'/' | b'[' | b']' | b'?' | b'=' | b'{' | b'}'
                )
        })
}

/// Overwrite `target` when `var` is set and parses; unparsable values are ignored.
fn override_parsed<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!("Ignoring unparsable value for {}: '{}'", var, raw),
        }
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

// Tests that touch the process environment share this lock.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
