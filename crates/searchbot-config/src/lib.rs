use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound for every minute-valued window (one year).
pub const MAX_WINDOW_MINUTES: u64 = 525_600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Server,
    pub telegram: Telegram,
    pub backend: Backend,
    pub store: Store,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub session: Session,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub jobs: Jobs,
    pub audit: Audit,
    #[serde(default)]
    pub logging: Logging,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telegram {
    pub bot_token: String,
    #[serde(default = "default_telegram_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_telegram_mode")]
    pub mode: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backend {
    pub base_url: String,
    pub api_key: String,
    pub jwt_secret: String,
    #[serde(default = "default_backend_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_token_ttl_minutes")]
    pub token_ttl_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    #[serde(rename = "type")]
    pub kind: String,
    pub sqlite_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Auth {
    #[serde(default)]
    pub allowed_user_ids: Vec<i64>,
    #[serde(default)]
    pub admin_user_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(default = "default_session_timeout_minutes")]
    pub timeout_minutes: u64,
    #[serde(default = "default_session_namespace")]
    pub namespace: String,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            timeout_minutes: default_session_timeout_minutes(),
            namespace: default_session_namespace(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_search_results_limit")]
    pub search_results_limit: u32,
    #[serde(default = "default_refined_search_results_limit")]
    pub refined_search_results_limit: u32,
    #[serde(default = "default_min_query_chars")]
    pub min_query_chars: usize,
    #[serde(default = "default_message_chunk_chars")]
    pub message_chunk_chars: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
            search_results_limit: default_search_results_limit(),
            refined_search_results_limit: default_refined_search_results_limit(),
            min_query_chars: default_min_query_chars(),
            message_chunk_chars: default_message_chunk_chars(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jobs {
    #[serde(default = "default_job_retention_minutes")]
    pub retention_minutes: u64,
}

impl Default for Jobs {
    fn default() -> Self {
        Self {
            retention_minutes: default_job_retention_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audit {
    pub jsonl_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_telegram_api_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_telegram_mode() -> String {
    "webhook".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_backend_timeout_ms() -> u64 {
    30_000
}

fn default_token_ttl_minutes() -> i64 {
    60
}

fn default_session_timeout_minutes() -> u64 {
    30
}

fn default_session_namespace() -> String {
    "main".to_string()
}

fn default_max_file_size_mb() -> u64 {
    50
}

fn default_search_results_limit() -> u32 {
    10
}

fn default_refined_search_results_limit() -> u32 {
    15
}

fn default_min_query_chars() -> usize {
    3
}

fn default_message_chunk_chars() -> usize {
    4000
}

fn default_page_size() -> usize {
    5
}

fn default_job_retention_minutes() -> u64 {
    24 * 60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_path = [
        std::path::PathBuf::from("config/config.schema.json"),
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("config/config.schema.json"),
    ]
    .into_iter()
    .find(|p| p.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad(
            "config schema not found at config/config.schema.json or workspace config path"
                .to_string(),
        )
    })?;

    let schema_text =
        std::fs::read_to_string(schema_path).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let schema: serde_json::Value =
        serde_json::from_str(&schema_text).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

pub fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.store.kind != "memory" && cfg.store.kind != "sqlite" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "store.type={} is not implemented; supported: memory, sqlite",
            cfg.store.kind
        )));
    }
    if cfg.store.kind == "memory" && cfg.store.sqlite_path.is_some() {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is not supported when store.type=memory".to_string(),
        ));
    }
    if cfg.store.kind == "sqlite"
        && cfg
            .store
            .sqlite_path
            .as_ref()
            .map(|v| v.trim().is_empty())
            .unwrap_or(true)
    {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is required when store.type=sqlite".to_string(),
        ));
    }
    if cfg.telegram.mode != "webhook" && cfg.telegram.mode != "polling" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "telegram.mode={} is not implemented; supported: webhook, polling",
            cfg.telegram.mode
        )));
    }
    if cfg.backend.timeout_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "backend.timeout_ms must be >= 1".to_string(),
        ));
    }
    if cfg.backend.token_ttl_minutes <= 0 {
        return Err(ConfigError::UnsupportedConfig(
            "backend.token_ttl_minutes must be >= 1".to_string(),
        ));
    }
    if cfg.backend.jwt_secret.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "backend.jwt_secret must not be empty".to_string(),
        ));
    }
    if cfg.session.timeout_minutes == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "session.timeout_minutes must be >= 1".to_string(),
        ));
    }
    if cfg.limits.max_file_size_mb == 0
        || cfg.limits.search_results_limit == 0
        || cfg.limits.refined_search_results_limit == 0
        || cfg.limits.message_chunk_chars == 0
        || cfg.limits.page_size == 0
    {
        return Err(ConfigError::UnsupportedConfig(
            "limits must be >= 1".to_string(),
        ));
    }
    if cfg.jobs.retention_minutes == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "jobs.retention_minutes must be >= 1".to_string(),
        ));
    }
    for (field, minutes) in [
        ("session.timeout_minutes", cfg.session.timeout_minutes),
        ("jobs.retention_minutes", cfg.jobs.retention_minutes),
        (
            "backend.token_ttl_minutes",
            u64::try_from(cfg.backend.token_ttl_minutes).unwrap_or(0),
        ),
    ] {
        if minutes > MAX_WINDOW_MINUTES {
            return Err(ConfigError::UnsupportedConfig(format!(
                "{field} must be <= {MAX_WINDOW_MINUTES}"
            )));
        }
    }
    if cfg.logging.format != "text" && cfg.logging.format != "json" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "logging.format={} is not implemented; supported: text, json",
            cfg.logging.format
        )));
    }
    Ok(())
}
