//! Configuration management for ROADY.
//!
//! Loads settings from `~/.config/roady/config.toml` with environment overrides.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_ACCESS_TOKEN_MINUTES: i64 = 30;
pub const DEFAULT_REFRESH_TOKEN_DAYS: i64 = 7;
pub const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 5;
pub const DEFAULT_LOCKOUT_MINUTES: i64 = 15;

/// OAuth platforms whose credentials can be supplied through the environment.
pub const OAUTH_ENV_PLATFORMS: &[&str] = &["youtube", "facebook", "linkedin", "twitter", "discord", "slack"];

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub environment: Environment,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_access_minutes")]
    pub access_token_minutes: i64,
    #[serde(default = "default_refresh_days")]
    pub refresh_token_days: i64,
    #[serde(default = "default_max_failed")]
    pub max_failed_attempts: u32,
    #[serde(default = "default_lockout_minutes")]
    pub lockout_minutes: i64,
    #[serde(default = "default_min_password")]
    pub min_password_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Remote tier. An in-process store is used when unset.
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_l1_capacity")]
    pub l1_capacity: u64,
    #[serde(default = "default_l1_ttl")]
    pub l1_ttl_secs: u64,
    #[serde(default = "default_l2_ttl")]
    pub l2_ttl_secs: u64,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub google_api_key: Option<String>,
    #[serde(default = "default_anthropic_url")]
    pub anthropic_base_url: String,
    #[serde(default = "default_openai_url")]
    pub openai_base_url: String,
    #[serde(default = "default_gemini_url")]
    pub gemini_base_url: String,
    #[serde(default = "default_ollama_url")]
    pub ollama_base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Upper bound on agent conversations kept in memory.
    #[serde(default = "default_agent_capacity")]
    pub agent_capacity: u64,
    /// Conversations untouched for this long are dropped.
    #[serde(default = "default_agent_idle")]
    pub agent_idle_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillingConfig {
    #[serde(default)]
    pub stripe_secret_key: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_stripe_url")]
    pub api_base_url: String,
    #[serde(default = "default_success_url")]
    pub success_url: String,
    #[serde(default = "default_cancel_url")]
    pub cancel_url: String,
    #[serde(default = "default_portal_return_url")]
    pub portal_return_url: String,
    #[serde(default = "default_trial_days")]
    pub trial_days: u32,
    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub fcm_server_key: Option<String>,
    #[serde(default = "default_fcm_url")]
    pub fcm_url: String,
    /// HTTP relay accepting `{to, subject, body}` for email delivery.
    #[serde(default)]
    pub email_relay_url: Option<String>,
    /// HTTP relay accepting `{to, body}` for SMS delivery.
    #[serde(default)]
    pub sms_relay_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OAuthConfig {
    #[serde(default = "default_redirect_base")]
    pub redirect_base_url: String,
    #[serde(default)]
    pub clients: BTreeMap<String, OAuthClientConfig>,
    /// Lifetime of a pending authorization `state`.
    #[serde(default = "default_oauth_state_ttl")]
    pub state_ttl_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OAuthClientConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Replaces the platform's token endpoint.
    #[serde(default)]
    pub token_url: Option<String>,
    /// Replaces the platform's profile endpoint.
    #[serde(default)]
    pub userinfo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityConfig {
    /// Requests allowed per client IP and path within one window. Zero disables the limit.
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: u64,
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,
    /// `Strict-Transport-Security` max-age, sent in production only.
    #[serde(default = "default_hsts_max_age")]
    pub hsts_max_age_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { DEFAULT_PORT }
fn default_jwt_secret() -> String { "roady-dev-secret-change-me".to_string() }
fn default_access_minutes() -> i64 { DEFAULT_ACCESS_TOKEN_MINUTES }
fn default_refresh_days() -> i64 { DEFAULT_REFRESH_TOKEN_DAYS }
fn default_max_failed() -> u32 { DEFAULT_MAX_FAILED_ATTEMPTS }
fn default_lockout_minutes() -> i64 { DEFAULT_LOCKOUT_MINUTES }
fn default_min_password() -> usize { 8 }
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("roady")
        .join("roady.db")
}
fn default_l1_capacity() -> u64 { 1000 }
fn default_l1_ttl() -> u64 { 60 }
fn default_l2_ttl() -> u64 { 300 }
fn default_key_prefix() -> String { "cache:".to_string() }
fn default_anthropic_url() -> String { "https://api.anthropic.com/v1".to_string() }
fn default_openai_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_gemini_url() -> String { "https://generativelanguage.googleapis.com/v1beta".to_string() }
fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_max_retries() -> u32 { 3 }
fn default_retry_base_ms() -> u64 { 1000 }
fn default_llm_timeout() -> u64 { crate::http::LONG_TIMEOUT.as_secs() }
fn default_provider() -> String { "claude".to_string() }
fn default_model() -> String { "claude-sonnet-4-5-20250514".to_string() }
fn default_agent_capacity() -> u64 { 10_000 }
fn default_agent_idle() -> u64 { 3600 }
fn default_stripe_url() -> String { "https://api.stripe.com/v1".to_string() }
fn default_success_url() -> String { "https://roady.app/billing/success".to_string() }
fn default_cancel_url() -> String { "https://roady.app/billing/cancel".to_string() }
fn default_portal_return_url() -> String { "https://roady.app/settings/billing".to_string() }
fn default_trial_days() -> u32 { 14 }
fn default_webhook_tolerance() -> i64 { 300 }
fn default_fcm_url() -> String { "https://fcm.googleapis.com/fcm/send".to_string() }
fn default_redirect_base() -> String { "http://localhost:8000".to_string() }
fn default_oauth_state_ttl() -> i64 { 600 }
fn default_rate_limit_requests() -> u64 { 100 }
fn default_rate_limit_window() -> u64 { 60 }
fn default_hsts_max_age() -> u64 { 31_536_000 }
fn default_log_level() -> String { "info".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: Environment::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            access_token_minutes: default_access_minutes(),
            refresh_token_days: default_refresh_days(),
            max_failed_attempts: default_max_failed(),
            lockout_minutes: default_lockout_minutes(),
            min_password_length: default_min_password(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_database_path() }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            l1_capacity: default_l1_capacity(),
            l1_ttl_secs: default_l1_ttl(),
            l2_ttl_secs: default_l2_ttl(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            openai_api_key: None,
            google_api_key: None,
            anthropic_base_url: default_anthropic_url(),
            openai_base_url: default_openai_url(),
            gemini_base_url: default_gemini_url(),
            ollama_base_url: default_ollama_url(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_ms(),
            timeout_secs: default_llm_timeout(),
            default_provider: default_provider(),
            default_model: default_model(),
            agent_capacity: default_agent_capacity(),
            agent_idle_secs: default_agent_idle(),
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            stripe_secret_key: None,
            webhook_secret: None,
            api_base_url: default_stripe_url(),
            success_url: default_success_url(),
            cancel_url: default_cancel_url(),
            portal_return_url: default_portal_return_url(),
            trial_days: default_trial_days(),
            webhook_tolerance_secs: default_webhook_tolerance(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            fcm_server_key: None,
            fcm_url: default_fcm_url(),
            email_relay_url: None,
            sms_relay_url: None,
        }
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            redirect_base_url: default_redirect_base(),
            clients: BTreeMap::new(),
            state_ttl_secs: default_oauth_state_ttl(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_window_secs: default_rate_limit_window(),
            hsts_max_age_secs: default_hsts_max_age(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("roady")
            .join("config.toml")
    }

    /// Load config from file, falling back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::default_path())
    }

    /// Load config from a specific path.
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(host) = std::env::var("ROADY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse("ROADY_PORT") {
            self.server.port = port;
        }
        if let Ok(env) = std::env::var("APP_ENV") {
            self.server.environment = match env.to_lowercase().as_str() {
                "production" | "prod" => Environment::Production,
                _ => Environment::Development,
            };
        }
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Ok(path) = std::env::var("DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.cache.redis_url = Some(url);
        }
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            self.llm.anthropic_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.llm.openai_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("GOOGLE_AI_API_KEY") {
            self.llm.google_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            self.llm.ollama_base_url = url;
        }
        if let Some(retries) = env_parse("ROADY_LLM_MAX_RETRIES") {
            self.llm.max_retries = retries;
        }
        if let Ok(key) = std::env::var("STRIPE_SECRET_KEY") {
            self.billing.stripe_secret_key = Some(key);
        }
        if let Ok(secret) = std::env::var("STRIPE_WEBHOOK_SECRET") {
            self.billing.webhook_secret = Some(secret);
        }
        if let Ok(key) = std::env::var("FCM_SERVER_KEY") {
            self.notifications.fcm_server_key = Some(key);
        }
        if let Some(limit) = env_parse("ROADY_RATE_LIMIT_REQUESTS") {
            self.security.rate_limit_requests = limit;
        }
        if let Ok(level) = std::env::var("ROADY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("ROADY_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Compact,
            };
        }
        for platform in OAUTH_ENV_PLATFORMS {
            let prefix = platform.to_uppercase();
            let id = std::env::var(format!("{prefix}_CLIENT_ID"));
            let secret = std::env::var(format!("{prefix}_CLIENT_SECRET"));
            if let (Ok(client_id), Ok(client_secret)) = (id, secret) {
                let entry = self.oauth.clients.entry(platform.to_string()).or_default();
                entry.client_id = client_id;
                entry.client_secret = client_secret;
            }
        }
        self
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(&path, content).map_err(ConfigError::Io)
    }

    pub fn is_production(&self) -> bool {
        self.server.environment == Environment::Production
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Parse error: {0}")]
    Parse(toml::de::Error),
    #[error("Serialize error: {0}")]
    Serialize(toml::ser::Error),
}
