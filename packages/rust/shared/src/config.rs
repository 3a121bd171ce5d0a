//! Application configuration for readdo.
//!
//! User config lives at `~/.readdo/readdo.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ReaddoError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "readdo.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".readdo";

// ---------------------------------------------------------------------------
// Config structs (matching readdo.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub extractor: ExtractorConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file. A leading `~/` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.readdo/readdo.db".into()
}

impl StorageConfig {
    /// Resolve `db_path`, expanding `~/`.
    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        expand_home(&self.db_path)
    }
}

/// `[worker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Sleep between polls when the queue is empty or a claim fails.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    3000
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// `[extractor]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Use the built-in stub instead of fetching pages.
    #[serde(default)]
    pub stub: bool,

    /// Per-request timeout in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Extracted text is truncated past this many characters.
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,

    /// Pages with less text than this are rejected.
    #[serde(default = "default_min_text_length")]
    pub min_text_length: usize,

    /// Response bodies larger than this are rejected.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Permit loopback and private network targets.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            stub: false,
            timeout_secs: default_fetch_timeout(),
            max_text_length: default_max_text_length(),
            min_text_length: default_min_text_length(),
            max_body_bytes: default_max_body_bytes(),
            allow_private_hosts: false,
        }
    }
}

fn default_fetch_timeout() -> u64 {
    30
}
fn default_max_text_length() -> usize {
    15_000
}
fn default_min_text_length() -> usize {
    100
}
fn default_max_body_bytes() -> usize {
    5 * 1024 * 1024
}

/// Which completion backend to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    OpenAi,
    OpenRouter,
    Anthropic,
    Gemini,
    Ollama,
    Stub,
}

impl ModelProvider {
    /// Base URL used when `[model] base_url` is not set.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Self::Ollama => "http://localhost:11434/v1",
            Self::Stub => "",
        }
    }

    /// Model used when `[model] model` is not set.
    pub fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o-mini",
            Self::OpenRouter => "openai/gpt-4o-mini",
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::Gemini => "gemini-2.0-flash",
            Self::Ollama => "llama3",
            Self::Stub => "stub",
        }
    }

    /// Env var conventionally holding the API key, if one is needed.
    pub fn default_api_key_env(self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::OpenRouter => Some("OPENROUTER_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::Ollama | Self::Stub => None,
        }
    }
}

/// `[model]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: ModelProvider,

    /// Model name; provider default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// API base URL; provider default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            api_key_env: None,
            timeout_secs: default_model_timeout(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_provider() -> ModelProvider {
    ModelProvider::OpenAi
}
fn default_model_timeout() -> u64 {
    60
}
fn default_temperature() -> f64 {
    0.3
}
fn default_max_tokens() -> u32 {
    2048
}

impl ModelConfig {
    pub fn model_name(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.provider.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn api_key_env(&self) -> Option<String> {
        self.api_key_env
            .clone()
            .or_else(|| self.provider.default_api_key_env().map(String::from))
    }

    /// Read the API key from the configured env var.
    ///
    /// `Ok(None)` means the provider needs no key.
    pub fn api_key(&self) -> Result<Option<String>> {
        let Some(var_name) = self.api_key_env() else {
            return Ok(None);
        };
        match std::env::var(&var_name) {
            Ok(val) if !val.is_empty() => Ok(Some(val)),
            _ => Err(ReaddoError::config(format!(
                "API key not found. Set the {var_name} environment variable."
            ))),
        }
    }
}

/// `[retry]` section, applied to every external capability call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    10_000
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.readdo/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| ReaddoError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.readdo/readdo.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ReaddoError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| ReaddoError::config(format!("failed to parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ReaddoError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = AppConfig::default().to_toml()?;

    std::fs::write(&path, content).map_err(|e| ReaddoError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

impl AppConfig {
    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(ReaddoError::config("retry.max_attempts must be at least 1"));
        }
        if self.extractor.max_text_length < self.extractor.min_text_length {
            return Err(ReaddoError::config(
                "extractor.max_text_length must not be below min_text_length",
            ));
        }
        if self.worker.poll_interval_ms == 0 {
            return Err(ReaddoError::config("worker.poll_interval_ms must be positive"));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ReaddoError::config(e.to_string()))
    }
}

/// Expand a leading `~/` to the user's home directory.
fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| ReaddoError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}
