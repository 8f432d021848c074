//! Anon Configuration Management
//!
//! Handles configuration from environment variables and TOML files with
//! defaults suitable for running fully offline (no remote generator).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Remote generator configuration
    pub llm: LlmConfig,

    /// Pattern detection configuration
    pub detection: DetectionConfig,

    /// Overlap resolution configuration
    pub resolver: ResolverConfig,

    /// Replacement pipeline configuration
    pub replacement: ReplacementConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_vars(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Apply overrides from a key lookup (the process environment in
    /// production, a map in tests)
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // LLM
        if let Some(provider) = lookup("LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.llm.openai_api_key = Some(key);
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.llm.openai_base_url = Some(url);
        }
        if let Some(url) = lookup("OLLAMA_URL") {
            self.llm.ollama_url = url;
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(models) = lookup("LLM_MODELS") {
            self.llm.models = models
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(timeout) = lookup("REQUEST_TIMEOUT") {
            self.llm.timeout_secs = parse_value("REQUEST_TIMEOUT", &timeout)?;
        }

        // Replacement
        if let Some(path) = lookup("ANON_CACHE_PATH") {
            self.replacement.cache_path = PathBuf::from(path);
        }

        // Detection
        if let Some(threshold) = lookup("ANON_SCORE_THRESHOLD") {
            let threshold: f32 = parse_value("ANON_SCORE_THRESHOLD", &threshold)?;
            self.detection.score_threshold = threshold;
            self.resolver.min_score = threshold;
        }

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Remote generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// LLM provider to use
    pub provider: LlmProvider,

    /// OpenAI API key
    pub openai_api_key: Option<String>,

    /// OpenAI API base URL (for Azure or compatible APIs)
    pub openai_base_url: Option<String>,

    /// Ollama server URL
    pub ollama_url: String,

    /// Model name to use
    pub model: String,

    /// Several models served round-robin; overrides `model` when non-empty
    pub models: Vec<String>,

    /// Maximum tokens for completion
    pub max_tokens: u32,

    /// Temperature for generation
    pub temperature: f32,

    /// Wall-clock budget per remote attempt, in seconds
    pub timeout_secs: u64,

    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_backoff_ms: u64,

    /// Multiplier applied to the delay after each retry
    pub backoff_multiplier: f64,

    /// Upper bound on a single retry delay
    pub max_backoff_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::None,
            openai_api_key: None,
            openai_base_url: None,
            ollama_url: "http://localhost:11434".to_string(),
            model: "llama3.2:latest".to_string(),
            models: Vec::new(),
            max_tokens: 1024,
            temperature: 0.7,
            timeout_secs: 15,
            max_retries: 1,
            initial_backoff_ms: 500,
            backoff_multiplier: 1.5,
            max_backoff_ms: 5_000,
        }
    }
}

impl LlmConfig {
    /// Models to serve, in round-robin order
    pub fn model_list(&self) -> Vec<String> {
        if self.models.is_empty() {
            vec![self.model.clone()]
        } else {
            self.models.clone()
        }
    }
}

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAI,
    Ollama,
    Azure,
    /// No remote generator; every span resolves locally
    None,
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "azure" => Ok(Self::Azure),
            "none" | "off" | "" => Ok(Self::None),
            _ => Err(ConfigError::InvalidValue {
                key: "LLM_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Pattern detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Language tags every pattern recognizer is registered for
    pub languages: Vec<String>,

    /// Minimum score for a detected span to be reported
    pub score_threshold: f32,

    /// Words before a match searched for context keywords
    pub context_window_words: usize,

    /// Score increase when a context keyword is present
    pub context_similarity_factor: f32,

    /// Floor applied to a context-boosted score
    pub min_score_with_context: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            languages: vec!["en".to_string(), "zh".to_string()],
            score_threshold: 0.5,
            context_window_words: 5,
            context_similarity_factor: 0.35,
            min_score_with_context: 0.4,
        }
    }
}

/// Overlap resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Candidates scoring below this are dropped before ranking
    pub min_score: f32,

    /// Priority for entity types missing from the table
    pub default_priority: u32,

    /// Per-type priority overrides merged over the built-in table
    pub priorities: BTreeMap<String, u32>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_score: 0.5,
            default_priority: 99,
            priorities: BTreeMap::new(),
        }
    }
}

/// Replacement pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplacementConfig {
    /// Items per remote request
    pub batch_size: usize,

    /// Characters of context on each side of a span sent to the remote
    pub context_radius: usize,

    /// Persistent mapping cache file
    pub cache_path: PathBuf,

    /// Lower-cased field captions that are never replaced
    pub field_label_whitelist: Vec<String>,

    /// Entity types prone to matching field captions
    pub label_prone_types: Vec<String>,

    /// Entity types always generated locally
    pub local_types: Vec<String>,

    /// Leave relative time expressions ("tomorrow", "3 days ago") untouched
    pub keep_relative_dates: bool,

    /// Year range for synthetic ISO dates
    pub min_year: i32,
    pub max_year: i32,

    /// Rotation of domains used for synthetic email addresses
    pub email_domains: Vec<String>,

    /// Salt mixed into synthetic value seeds; random per process when unset
    pub seed_salt: Option<String>,

    /// Re-scan the output for PII-shaped leftovers
    pub safety_net: bool,
}

impl Default for ReplacementConfig {
    fn default() -> Self {
        Self {
            batch_size: 30,
            context_radius: 30,
            cache_path: default_cache_path(),
            field_label_whitelist: [
                "social security number",
                "unified business no",
                "passport number",
                "health insurance id",
                "date of birth",
                "phone",
                "email",
                "address",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            label_prone_types: vec!["ORGANIZATION".to_string()],
            local_types: [
                "EMAIL_ADDRESS",
                "PHONE_NUMBER",
                "TW_PHONE_NUMBER",
                "TW_HOME_NUMBER",
                "DATE_TIME",
                "TIME",
                "DURATION_TIME",
                "CREDIT_CARD",
                "IP_ADDRESS",
                "URL",
                "MAC_ADDRESS",
                "US_SSN",
                "UK_NHS",
                "TW_ID_NUMBER",
                "TW_NHI_NUMBER",
                "TW_HEALTH_INSURANCE",
                "TW_PASSPORT_NUMBER",
                "UNIFIED_BUSINESS_NO",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            keep_relative_dates: true,
            min_year: 1950,
            max_year: 2010,
            email_domains: ["example", "protonmail", "outlook", "gmail", "yahoo"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            seed_salt: None,
            safety_net: true,
        }
    }
}

fn default_cache_path() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".pii_map.json")
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.replacement.batch_size, 30);
        assert_eq!(config.replacement.context_radius, 30);
        assert_eq!(config.llm.provider, LlmProvider::None);
        assert_eq!(config.resolver.default_priority, 99);
        assert!(config
            .replacement
            .field_label_whitelist
            .contains(&"phone".to_string()));
        assert!(config.replacement.cache_path.ends_with(".pii_map.json"));
    }

    #[test]
    fn test_llm_provider_parse() {
        assert_eq!(
            "openai".parse::<LlmProvider>().unwrap(),
            LlmProvider::OpenAI
        );
        assert_eq!(
            "Ollama".parse::<LlmProvider>().unwrap(),
            LlmProvider::Ollama
        );
        assert_eq!("none".parse::<LlmProvider>().unwrap(), LlmProvider::None);
        assert!("invalid".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_apply_vars() {
        let vars: HashMap<&str, &str> = [
            ("LLM_PROVIDER", "ollama"),
            ("LLM_MODELS", "llama3.2:latest, qwen2.5 ,"),
            ("REQUEST_TIMEOUT", "12"),
            ("ANON_CACHE_PATH", "/tmp/anon/map.json"),
            ("ANON_SCORE_THRESHOLD", "0.6"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_vars(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.llm.provider, LlmProvider::Ollama);
        assert_eq!(config.llm.model_list(), vec!["llama3.2:latest", "qwen2.5"]);
        assert_eq!(config.llm.timeout_secs, 12);
        assert_eq!(
            config.replacement.cache_path,
            PathBuf::from("/tmp/anon/map.json")
        );
        assert!((config.resolver.min_score - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn test_apply_vars_invalid_timeout() {
        let mut config = AppConfig::default();
        let err = config
            .apply_vars(|key| (key == "REQUEST_TIMEOUT").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [replacement]
            batch_size = 10

            [resolver.priorities]
            US_SSN = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.replacement.batch_size, 10);
        assert_eq!(config.replacement.context_radius, 30);
        assert_eq!(config.resolver.priorities.get("US_SSN"), Some(&1));
        assert_eq!(config.detection.languages, vec!["en", "zh"]);
    }
}
