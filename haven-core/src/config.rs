use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

/// Environment variable consulted for the completion API key.
pub const LLM_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Environment variable consulted for the post-call webhook secret.
pub const WEBHOOK_SECRET_ENV: &str = "ELEVENLABS_WEBHOOK_SECRET";

#[derive(Debug, Deserialize, Clone)]
pub struct HavenConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub personalization: PersonalizationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Extra attempts after the first call. Zero keeps the pipeline single-shot.
    #[serde(default)]
    pub max_retries: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1500
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl LlmConfig {
    /// Config value first, then `OPENAI_API_KEY`.
    pub fn resolved_api_key(&self) -> String {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(LLM_API_KEY_ENV).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token required on the application endpoints when set.
    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8780,
            api_token: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    #[serde(default)]
    pub secret: Option<String>,
    /// Maximum signature age in seconds; 0 disables the check.
    #[serde(default = "default_tolerance_seconds")]
    pub tolerance_seconds: u64,
}

fn default_tolerance_seconds() -> u64 {
    1800
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            tolerance_seconds: default_tolerance_seconds(),
        }
    }
}

impl WebhookConfig {
    pub fn resolved_secret(&self) -> Option<String> {
        self.secret
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| std::env::var(WEBHOOK_SECRET_ENV).ok())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersonalizationConfig {
    /// Therapy module used when a personalization request names none.
    pub default_module: String,
}

impl Default for PersonalizationConfig {
    fn default() -> Self {
        Self {
            default_module: "foundations".to_string(),
        }
    }
}

impl HavenConfig {
    /// Load from a TOML file, with `HAVEN__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("HAVEN").separator("__"))
            .build()?;
        s.try_deserialize()
    }

    /// Parse an in-memory TOML document. No environment overrides are applied.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
