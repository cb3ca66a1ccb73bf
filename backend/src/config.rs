use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::preprocess::PreprocessConfig;
use crate::training::config::TrainingConfig;

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_MODEL_PATH: &str = "./models/dr_model.ot";
const DEFAULT_LOG_FILE: &str = "dr_service.log";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_CACHE_SIZE: usize = 64;
const DEFAULT_MAX_BATCH_FILES: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("Failed to read training config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse training config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Service settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: String,
    pub host: String,
    pub port: u16,
    pub model_path: PathBuf,
    pub log_file: PathBuf,
    pub max_upload_bytes: usize,
    /// Upper bound on files per `/batch_predict` request.
    pub max_batch_files: usize,
    pub cache_capacity: usize,
    pub enhance_contrast: bool,
    pub training_config: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_batch_files: DEFAULT_MAX_BATCH_FILES,
            cache_capacity: DEFAULT_CACHE_SIZE,
            enhance_contrast: true,
            training_config: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds settings from an arbitrary variable source; unset variables keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();

        let api_url = lookup("API_URL")
            .or_else(|| lookup("NEXT_PUBLIC_PYTHON_API_URL"))
            .unwrap_or(defaults.api_url);

        Ok(Self {
            api_url,
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT", defaults.port)?,
            model_path: lookup("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
            log_file: lookup("LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_file),
            max_upload_bytes: parse_var(&lookup, "MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            max_batch_files: parse_var(&lookup, "MAX_BATCH_FILES", defaults.max_batch_files)?,
            cache_capacity: parse_var(&lookup, "PREDICTION_CACHE_SIZE", defaults.cache_capacity)?,
            enhance_contrast: parse_flag(&lookup, "ENHANCE_CONTRAST", defaults.enhance_contrast)?,
            training_config: lookup("TRAINING_CONFIG").map(PathBuf::from),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn preprocess_config(&self) -> PreprocessConfig {
        PreprocessConfig {
            enhance_contrast: self.enhance_contrast,
            ..PreprocessConfig::default()
        }
    }

    /// Training parameters for `POST /train`: the YAML file named by
    /// `TRAINING_CONFIG` if set, otherwise defaults. The service's model path and
    /// contrast setting always win so that training and serving stay aligned.
    pub fn training_config(&self) -> Result<TrainingConfig, ConfigError> {
        let mut config = match &self.training_config {
            Some(path) => TrainingConfig::load(path)?,
            None => TrainingConfig::default(),
        };
        config.model_path = self.model_path.clone();
        config.preprocessing.enhance_contrast = self.enhance_contrast;
        Ok(config)
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

fn parse_flag<F>(lookup: &F, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { name, value }),
        },
        None => Ok(default),
    }
}
