//! Configuration management
//!
//! Configuration for the auth core can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults. Each engine
//! receives its config struct once at construction; nothing here is global
//! mutable state.

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// OTP challenge configuration
    #[serde(default)]
    pub otp: OtpConfig,
    /// Session and token lifetime configuration
    #[serde(default)]
    pub session: SessionConfig,
    /// Token signing configuration
    #[serde(default)]
    pub jwt: JwtConfig,
    /// SMS delivery configuration
    #[serde(default)]
    pub sms: SmsConfig,
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
    "data/otpgate.db".to_string()
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

/// OTP challenge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpConfig {
    /// Number of digits in the generated code
    #[serde(default = "default_otp_length")]
    pub length: u32,
    /// Challenge TTL in minutes
    #[serde(default = "default_otp_expiry_minutes")]
    pub expiry_minutes: i64,
    /// Maximum verification attempts per challenge
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    /// Cooldown between sends to the same phone, in minutes
    #[serde(default = "default_rate_limit_minutes")]
    pub rate_limit_minutes: i64,
    /// Maximum sends per phone in a rolling hour
    #[serde(default = "default_max_per_hour")]
    pub max_per_hour: i64,
    /// Maximum sends per client IP in a rolling minute, across all phones
    #[serde(default = "default_max_per_ip_per_minute")]
    pub max_per_ip_per_minute: i64,
    /// Key for the one-way keyed digest of stored codes
    #[serde(default = "default_otp_hash_key")]
    pub hash_key: String,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            length: default_otp_length(),
            expiry_minutes: default_otp_expiry_minutes(),
            max_attempts: default_max_attempts(),
            rate_limit_minutes: default_rate_limit_minutes(),
            max_per_hour: default_max_per_hour(),
            max_per_ip_per_minute: default_max_per_ip_per_minute(),
            hash_key: default_otp_hash_key(),
        }
    }
}

fn default_otp_length() -> u32 {
    6
}

fn default_otp_expiry_minutes() -> i64 {
    5
}

fn default_max_attempts() -> i32 {
    3
}

fn default_rate_limit_minutes() -> i64 {
    1
}

fn default_max_per_hour() -> i64 {
    5
}

fn default_max_per_ip_per_minute() -> i64 {
    3
}

fn default_otp_hash_key() -> String {
    "otpgate-otp-hash-key-change-in-production".to_string()
}

/// Session and token lifetime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Access token lifetime in hours
    #[serde(default = "default_access_token_expiry_hours")]
    pub access_token_expiry_hours: i64,
    /// Refresh token lifetime in days
    #[serde(default = "default_refresh_token_expiry_days")]
    pub refresh_token_expiry_days: i64,
    /// Active session cap per user
    #[serde(default = "default_max_sessions_per_user")]
    pub max_sessions_per_user: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_token_expiry_hours: default_access_token_expiry_hours(),
            refresh_token_expiry_days: default_refresh_token_expiry_days(),
            max_sessions_per_user: default_max_sessions_per_user(),
        }
    }
}

fn default_access_token_expiry_hours() -> i64 {
    1
}

fn default_refresh_token_expiry_days() -> i64 {
    7
}

fn default_max_sessions_per_user() -> i64 {
    5
}

/// Token signing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Symmetric signing key (HS256)
    #[serde(default = "default_jwt_secret")]
    pub secret: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: default_jwt_secret(),
        }
    }
}

fn default_jwt_secret() -> String {
    "otpgate-secret-key-change-in-production-very-long-and-secure".to_string()
}

/// SMS delivery configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmsConfig {
    /// SMS backend (memory or twilio)
    #[serde(default)]
    pub provider: SmsBackend,
    /// Twilio account SID (required for the twilio backend)
    #[serde(default)]
    pub twilio_account_sid: Option<String>,
    /// Twilio auth token
    #[serde(default)]
    pub twilio_auth_token: Option<String>,
    /// Twilio sender phone number (E.164)
    #[serde(default)]
    pub twilio_from_number: Option<String>,
}

/// SMS backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SmsBackend {
    /// In-memory store (default, for development and tests)
    #[default]
    Memory,
    /// Twilio carrier gateway
    Twilio,
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
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
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

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - OTPGATE_DATABASE_DRIVER / OTPGATE_DATABASE_URL
    /// - OTPGATE_OTP_LENGTH / OTPGATE_OTP_EXPIRY_MINUTES / OTPGATE_OTP_MAX_ATTEMPTS
    /// - OTPGATE_OTP_MAX_PER_HOUR / OTPGATE_OTP_HASH_KEY
    /// - OTPGATE_SESSION_ACCESS_EXPIRY_HOURS / OTPGATE_SESSION_REFRESH_EXPIRY_DAYS
    /// - OTPGATE_SESSION_MAX_PER_USER
    /// - OTPGATE_JWT_SECRET
    /// - OTPGATE_SMS_PROVIDER / OTPGATE_TWILIO_ACCOUNT_SID / OTPGATE_TWILIO_AUTH_TOKEN
    /// - OTPGATE_TWILIO_FROM_NUMBER
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        // Database configuration
        if let Ok(driver) = std::env::var("OTPGATE_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(url) = std::env::var("OTPGATE_DATABASE_URL") {
            self.database.url = url;
        }

        // OTP configuration
        if let Ok(length) = std::env::var("OTPGATE_OTP_LENGTH") {
            if let Ok(length) = length.parse::<u32>() {
                self.otp.length = length;
            }
        }
        if let Ok(minutes) = std::env::var("OTPGATE_OTP_EXPIRY_MINUTES") {
            if let Ok(minutes) = minutes.parse::<i64>() {
                self.otp.expiry_minutes = minutes;
            }
        }
        if let Ok(attempts) = std::env::var("OTPGATE_OTP_MAX_ATTEMPTS") {
            if let Ok(attempts) = attempts.parse::<i32>() {
                self.otp.max_attempts = attempts;
            }
        }
        if let Ok(per_hour) = std::env::var("OTPGATE_OTP_MAX_PER_HOUR") {
            if let Ok(per_hour) = per_hour.parse::<i64>() {
                self.otp.max_per_hour = per_hour;
            }
        }
        if let Ok(key) = std::env::var("OTPGATE_OTP_HASH_KEY") {
            self.otp.hash_key = key;
        }

        // Session configuration
        if let Ok(hours) = std::env::var("OTPGATE_SESSION_ACCESS_EXPIRY_HOURS") {
            if let Ok(hours) = hours.parse::<i64>() {
                self.session.access_token_expiry_hours = hours;
            }
        }
        if let Ok(days) = std::env::var("OTPGATE_SESSION_REFRESH_EXPIRY_DAYS") {
            if let Ok(days) = days.parse::<i64>() {
                self.session.refresh_token_expiry_days = days;
            }
        }
        if let Ok(max) = std::env::var("OTPGATE_SESSION_MAX_PER_USER") {
            if let Ok(max) = max.parse::<i64>() {
                self.session.max_sessions_per_user = max;
            }
        }

        // JWT configuration
        if let Ok(secret) = std::env::var("OTPGATE_JWT_SECRET") {
            self.jwt.secret = secret;
        }

        // SMS configuration
        if let Ok(provider) = std::env::var("OTPGATE_SMS_PROVIDER") {
            match provider.to_lowercase().as_str() {
                "memory" => self.sms.provider = SmsBackend::Memory,
                "twilio" => self.sms.provider = SmsBackend::Twilio,
                _ => {}
            }
        }
        if let Ok(sid) = std::env::var("OTPGATE_TWILIO_ACCOUNT_SID") {
            self.sms.twilio_account_sid = Some(sid);
        }
        if let Ok(token) = std::env::var("OTPGATE_TWILIO_AUTH_TOKEN") {
            self.sms.twilio_auth_token = Some(token);
        }
        if let Ok(from) = std::env::var("OTPGATE_TWILIO_FROM_NUMBER") {
            self.sms.twilio_from_number = Some(from);
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

// Shared mutex for config tests that modify environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
