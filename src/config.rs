use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const PLACEHOLDER_API_KEY: &str = "PLACEHOLDER_GEMINI_API_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub generation: GenerationDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub api_key: String,
    pub base_url: String,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationDefaults {
    pub model_name: String,
    /// Temperature used by the free-form screens (summarize, photo reasoning, chat)
    pub temperature: f32,
}

impl Config {
    /// Load configuration from file with environment variable overrides.
    /// Always returns a usable config; problems are logged, never raised.
    pub fn load() -> Self {
        let env_paths = ["../.env", ".env"];

        let mut env_loaded = false;
        for path in &env_paths {
            if dotenvy::from_path(path).is_ok() {
                tracing::info!("Loaded .env from: {}", path);
                env_loaded = true;
                break;
            }
        }

        if !env_loaded {
            tracing::debug!("No .env file found - continuing with env vars only");
        }

        let config_path =
            env::var("GENAI_CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = Self::from_file(&config_path);
        config.apply_env_overrides();

        if let Err(e) = config.validate() {
            tracing::warn!("Config validation warnings: {} - continuing anyway", e);
        }

        config
    }

    fn from_file(config_path: &str) -> Self {
        if !Path::new(config_path).exists() {
            tracing::debug!("Config file not found at {} - using defaults", config_path);
            return Self::default();
        }

        match fs::read_to_string(config_path) {
            Ok(contents) => Self::from_yaml(&contents).unwrap_or_else(|e| {
                tracing::error!(
                    "Failed to parse config file {}: {} - using defaults",
                    config_path,
                    e
                );
                Self::default()
            }),
            Err(e) => {
                tracing::error!(
                    "Failed to read config file {}: {} - using defaults",
                    config_path,
                    e
                );
                Self::default()
            }
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        let config = serde_yaml::from_str::<Config>(contents)?;
        tracing::info!(model = %config.generation.model_name, "Loaded configuration from YAML");
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(api_key) = env::var("GEMINI_API_KEY").or_else(|_| env::var("API_KEY")) {
            self.api.api_key = api_key;
        }
        if let Ok(base_url) = env::var("GEMINI_BASE_URL") {
            self.api.base_url = base_url;
        }
        if let Ok(timeout) = env::var("GENAI_REQUEST_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse() {
                self.api.request_timeout_seconds = secs;
            }
        }

        if let Ok(model) = env::var("GEMINI_MODEL") {
            self.generation.model_name = model;
        }
        if let Ok(temperature) = env::var("GENAI_TEMPERATURE") {
            if let Ok(value) = temperature.parse() {
                self.generation.temperature = value;
            }
        }
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err("Temperature must be between 0.0 and 2.0".into());
        }
        if self.generation.model_name.trim().is_empty() {
            return Err("Model name cannot be empty".into());
        }
        if self.api.request_timeout_seconds == 0 {
            return Err("Request timeout cannot be 0".into());
        }
        if !self.has_api_key() {
            return Err("GEMINI_API_KEY environment variable must be set".into());
        }
        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        !self.api.api_key.is_empty() && self.api.api_key != PLACEHOLDER_API_KEY
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_seconds)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                api_key: PLACEHOLDER_API_KEY.to_string(),
                base_url: DEFAULT_BASE_URL.to_string(),
                request_timeout_seconds: 120,
            },
            generation: GenerationDefaults {
                model_name: DEFAULT_MODEL.to_string(),
                temperature: 0.2,
            },
        }
    }
}
