use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use config as cfg;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::rate_limit::RateLimitPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "ServerConfig::default_environment")]
    pub environment: String,
    /// Keep internal error messages in 500 responses. Turned off in production.
    #[serde(default = "ServerConfig::default_expose_error_details")]
    pub expose_error_details: bool,
    #[serde(default = "ServerConfig::default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl ServerConfig {
    fn default_environment() -> String {
        "development".to_string()
    }

    fn default_expose_error_details() -> bool {
        true
    }

    fn default_allowed_origins() -> Vec<String> {
        vec![
            "http://localhost:3000".to_string(),
            "http://localhost:3001".to_string(),
        ]
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            environment: Self::default_environment(),
            expose_error_details: Self::default_expose_error_details(),
            allowed_origins: Self::default_allowed_origins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "AuthConfig::default_jwt_secret", skip_serializing)]
    pub jwt_secret: SecretString,
    #[serde(default = "AuthConfig::default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

impl AuthConfig {
    fn default_jwt_secret() -> SecretString {
        SecretString::from(String::from("scriptflow-development-secret-change-me"))
    }

    fn default_token_ttl_secs() -> u64 {
        86_400
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: Self::default_jwt_secret(),
            token_ttl_secs: Self::default_token_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "RateLimitSettings::default_enabled")]
    pub enabled: bool,
    #[serde(default = "RateLimitSettings::default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "RateLimitSettings::default_api")]
    pub api: RateLimitPolicy,
    #[serde(default = "RateLimitSettings::default_auth")]
    pub auth: RateLimitPolicy,
    #[serde(default = "RateLimitSettings::default_registration")]
    pub registration: RateLimitPolicy,
}

impl RateLimitSettings {
    fn default_enabled() -> bool {
        true
    }

    fn default_sweep_interval_secs() -> u64 {
        60
    }

    fn default_api() -> RateLimitPolicy {
        RateLimitPolicy::new(100, 60_000)
    }

    fn default_auth() -> RateLimitPolicy {
        RateLimitPolicy::new(5, 15 * 60_000)
    }

    fn default_registration() -> RateLimitPolicy {
        RateLimitPolicy::new(5, 60 * 60_000)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            sweep_interval_secs: Self::default_sweep_interval_secs(),
            api: Self::default_api(),
            auth: Self::default_auth(),
            registration: Self::default_registration(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    /// Jobs advance only when a client calls the process endpoint.
    Polling,
    /// A tokio task drains the queue on its own.
    Background,
}

impl Default for QueueMode {
    fn default() -> Self {
        Self::Polling
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default)]
    pub mode: QueueMode,
    #[serde(default = "QueueSettings::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "QueueSettings::default_completed_retention_secs")]
    pub completed_retention_secs: u64,
    #[serde(default = "QueueSettings::default_failed_retention_secs")]
    pub failed_retention_secs: u64,
}

impl QueueSettings {
    fn default_poll_interval_ms() -> u64 {
        3_000
    }

    fn default_completed_retention_secs() -> u64 {
        5 * 60
    }

    fn default_failed_retention_secs() -> u64 {
        60 * 60
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn completed_retention(&self) -> Duration {
        Duration::from_secs(self.completed_retention_secs)
    }

    pub fn failed_retention(&self) -> Duration {
        Duration::from_secs(self.failed_retention_secs)
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            mode: QueueMode::default(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            completed_retention_secs: Self::default_completed_retention_secs(),
            failed_retention_secs: Self::default_failed_retention_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "AiConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "AiConfig::default_model")]
    pub model: String,
    // Do not serialize secrets; allow deserialization from config/env only.
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,
    #[serde(default = "AiConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "AiConfig::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "AiConfig::default_temperature")]
    pub temperature: f32,
    #[serde(default = "AiConfig::default_max_tokens")]
    pub max_tokens: u32,
    /// Minimum gap between outgoing requests.
    #[serde(default = "AiConfig::default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
}

impl AiConfig {
    fn default_base_url() -> String {
        "https://api.deepseek.com/v1".to_string()
    }

    fn default_model() -> String {
        "deepseek-chat".to_string()
    }

    fn default_timeout_secs() -> u64 {
        30
    }

    fn default_max_retries() -> u32 {
        3
    }

    fn default_temperature() -> f32 {
        0.3
    }

    fn default_max_tokens() -> u32 {
        4096
    }

    fn default_min_request_interval_ms() -> u64 {
        100
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            model: Self::default_model(),
            api_key: None,
            timeout_secs: Self::default_timeout_secs(),
            max_retries: Self::default_max_retries(),
            temperature: Self::default_temperature(),
            max_tokens: Self::default_max_tokens(),
            min_request_interval_ms: Self::default_min_request_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    #[serde(default = "ConverterConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "ConverterConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "ConverterConfig::default_max_retries")]
    pub max_retries: u32,
}

impl ConverterConfig {
    fn default_base_url() -> String {
        "http://localhost:8001".to_string()
    }

    fn default_timeout_secs() -> u64 {
        120
    }

    fn default_max_retries() -> u32 {
        3
    }
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            timeout_secs: Self::default_timeout_secs(),
            max_retries: Self::default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Pretty
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    pub fn default_env() -> String {
        env::var("SCRIPTFLOW_ENV")
            .ok()
            .or_else(|| env::var("APP_ENV").ok())
            .unwrap_or_else(|| "development".to_string())
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.server.host.trim().is_empty(),
            "server.host cannot be empty"
        );
        anyhow::ensure!(self.server.port > 0, "server.port must be > 0");

        for (name, policy) in [
            ("api", &self.rate_limit.api),
            ("auth", &self.rate_limit.auth),
            ("registration", &self.rate_limit.registration),
        ] {
            anyhow::ensure!(
                policy.max_requests > 0,
                "rate_limit.{}.max_requests must be > 0",
                name
            );
            anyhow::ensure!(
                policy.window_ms > 0,
                "rate_limit.{}.window_ms must be > 0",
                name
            );
        }

        anyhow::ensure!(
            self.queue.poll_interval_ms > 0,
            "queue.poll_interval_ms must be > 0"
        );
        anyhow::ensure!(
            (1..=120).contains(&self.ai.timeout_secs),
            "ai.timeout_secs must be 1..=120"
        );
        anyhow::ensure!(self.ai.max_retries <= 10, "ai.max_retries must be <= 10");
        anyhow::ensure!(
            !self.converter.base_url.trim().is_empty(),
            "converter.base_url cannot be empty"
        );
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing settings")
    }

    /// Apply the flat variables older deployments set (`DEEPSEEK_API_KEY`, `JWT_SECRET`, ...).
    pub fn apply_legacy_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("DEEPSEEK_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.ai.api_key = Some(SecretString::from(key));
        }
        if let Some(endpoint) = lookup("DEEPSEEK_API_ENDPOINT") {
            self.ai.base_url = endpoint;
        }
        if let Some(retries) = lookup("DEEPSEEK_MAX_RETRIES") {
            match retries.parse() {
                Ok(n) => self.ai.max_retries = n,
                Err(_) => warn!("ignoring invalid DEEPSEEK_MAX_RETRIES: {}", retries),
            }
        }
        if let Some(timeout_ms) = lookup("DEEPSEEK_TIMEOUT") {
            match timeout_ms.parse::<u64>() {
                Ok(ms) => self.ai.timeout_secs = ms.div_ceil(1000).max(1),
                Err(_) => warn!("ignoring invalid DEEPSEEK_TIMEOUT: {}", timeout_ms),
            }
        }
        if let Some(url) = lookup("PYTHON_CONVERTER_URL") {
            self.converter.base_url = url;
        }
        if let Some(secret) = lookup("JWT_SECRET").filter(|s| !s.trim().is_empty()) {
            self.auth.jwt_secret = SecretString::from(secret);
        }
        let disable = lookup("DISABLE_RATE_LIMIT")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if disable {
            if self.server.is_production() {
                warn!("DISABLE_RATE_LIMIT is ignored outside development");
            } else {
                self.rate_limit.enabled = false;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: PathBuf,
    env: String,
}

impl ConfigManager {
    pub fn new(config_dir: Option<PathBuf>, env_override: Option<String>) -> Self {
        Self {
            config_dir: config_dir.unwrap_or_else(Self::default_config_dir),
            env: env_override.unwrap_or_else(Settings::default_env),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    /// Load `.env`, the layered config files and environment overrides, then validate.
    pub fn load(&self) -> Result<Settings> {
        Self::load_dotenv();
        let mut settings = Self::load_from_sources(&self.config_dir, &self.env)?;
        settings.apply_legacy_overrides(|name| env::var(name).ok());
        if settings.server.is_production() && settings.server.expose_error_details {
            info!("production environment: hiding internal error details");
            settings.server.expose_error_details = false;
        }
        settings.validate()?;
        Ok(settings)
    }

    fn load_dotenv() {
        match dotenv::dotenv() {
            Ok(path) => info!("Loaded environment from {:?}", path),
            Err(dotenv::Error::Io(_)) => {}
            Err(e) => warn!("Failed to parse .env file: {}", e),
        }
    }

    /// Get the default configuration directory.
    ///
    /// Priority order:
    /// 1. ~/.scriptflow/
    /// 2. ./config/
    /// 3. Current directory
    pub fn default_config_dir() -> PathBuf {
        if let Some(home_dir) = dirs::home_dir() {
            let user_dir = home_dir.join(".scriptflow");
            if user_dir.exists() {
                info!("Using config directory: {:?}", user_dir);
                return user_dir;
            }
        }

        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let project_config = cwd.join("config");
        if project_config.exists() {
            info!("Using config directory: {:?}", project_config);
            return project_config;
        }

        info!("Using config directory: {:?}", cwd);
        cwd
    }

    pub fn load_from_sources(config_dir: &Path, env_name: &str) -> Result<Settings> {
        let settings: Settings = cfg::Config::builder()
            .set_default("server.environment", env_name)
            .context("seeding environment name")?
            .add_source(cfg::File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.toml", env_name))).required(false),
            )
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                cfg::Environment::with_prefix("SCRIPTFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;
    use std::fs;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.rate_limit.auth.max_requests, 5);
        assert_eq!(settings.rate_limit.auth.window_ms, 900_000);
        assert_eq!(settings.queue.mode, QueueMode::Polling);
        assert_eq!(settings.queue.completed_retention(), Duration::from_secs(300));
    }

    #[test]
    fn layered_files_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[server]\nhost = \"127.0.0.1\"\nport = 4000\n\n[rate_limit.api]\nmax_requests = 50\nwindow_ms = 1000\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("staging.toml"),
            "[server]\nhost = \"127.0.0.1\"\nport = 4100\n\n[queue]\nmode = \"background\"\n",
        )
        .unwrap();

        let settings = ConfigManager::load_from_sources(dir.path(), "staging").unwrap();
        assert_eq!(settings.server.port, 4100);
        assert_eq!(settings.server.environment, "staging");
        assert_eq!(settings.rate_limit.api.max_requests, 50);
        assert_eq!(settings.rate_limit.auth.max_requests, 5);
        assert_eq!(settings.queue.mode, QueueMode::Background);
    }

    #[test]
    fn validate_rejects_zero_policies() {
        let mut settings = Settings::default();
        settings.rate_limit.registration.max_requests = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.ai.timeout_secs = 600;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn legacy_overrides_apply() {
        let mut settings = Settings::default();
        settings.apply_legacy_overrides(lookup(&[
            ("DEEPSEEK_API_KEY", "sk-test"),
            ("DEEPSEEK_TIMEOUT", "45500"),
            ("PYTHON_CONVERTER_URL", "http://converter:9000"),
            ("DISABLE_RATE_LIMIT", "true"),
        ]));

        assert_eq!(
            settings.ai.api_key.as_ref().map(|k| k.expose_secret().to_string()),
            Some("sk-test".to_string())
        );
        assert_eq!(settings.ai.timeout_secs, 46);
        assert_eq!(settings.converter.base_url, "http://converter:9000");
        assert!(!settings.rate_limit.enabled);
    }

    #[test]
    fn disable_rate_limit_ignored_in_production() {
        let mut settings = Settings::default();
        settings.server.environment = "production".into();
        settings.apply_legacy_overrides(lookup(&[("DISABLE_RATE_LIMIT", "true")]));
        assert!(settings.rate_limit.enabled);
    }

    #[test]
    fn secrets_are_not_serialized() {
        let mut settings = Settings::default();
        settings.ai.api_key = Some(SecretString::from(String::from("sk-hidden")));
        let rendered = settings.to_toml().unwrap();
        assert!(!rendered.contains("sk-hidden"));
        assert!(!rendered.contains("jwt_secret"));
        assert!(rendered.contains("[rate_limit.auth]"));
    }
}
