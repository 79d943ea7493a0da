use serde::Deserialize;
use std::time::Duration;

use crate::services::worker::WorkerSettings;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportBackend {
    #[default]
    Filesystem,
    R2,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000")
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string. Without it job state lives in memory.
    pub database_url: Option<String>,

    /// Directory for re-encoded images
    #[serde(default = "default_image_dir")]
    pub image_dir: String,

    /// Directory for filesystem batch reports
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Upper bound on jobs processed at the same time
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Attempts per image before its job fails
    #[serde(default = "default_max_attempts_per_image")]
    pub max_attempts_per_image: u32,

    /// Base delay between retries, multiplied by the attempt number
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Attempts for a job's terminal status write and batch increment
    #[serde(default = "default_persistence_attempts")]
    pub persistence_attempts: u32,

    /// JPEG quality for re-encoded images (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    #[serde(default)]
    pub report_backend: ReportBackend,

    /// R2 bucket name
    pub r2_bucket: Option<String>,

    /// R2 endpoint URL
    pub r2_endpoint: Option<String>,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: Option<String>,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_image_dir() -> String {
    "images".to_string()
}

fn default_output_dir() -> String {
    "output".to_string()
}

fn default_max_concurrent_jobs() -> usize {
    8
}

fn default_max_attempts_per_image() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_persistence_attempts() -> u32 {
    5
}

fn default_jpeg_quality() -> u8 {
    50
}

/// R2 settings, present only when the r2 backend is configured.
pub struct R2Settings<'a> {
    pub bucket: &'a str,
    pub endpoint: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid("MAX_CONCURRENT_JOBS must be at least 1".into()));
        }
        if self.max_attempts_per_image == 0 {
            return Err(ConfigError::Invalid("MAX_ATTEMPTS_PER_IMAGE must be at least 1".into()));
        }
        if self.persistence_attempts == 0 {
            return Err(ConfigError::Invalid("PERSISTENCE_ATTEMPTS must be at least 1".into()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::Invalid("JPEG_QUALITY must be between 1 and 100".into()));
        }
        if self.report_backend == ReportBackend::R2 && self.r2_settings().is_none() {
            return Err(ConfigError::Invalid(
                "REPORT_BACKEND=r2 requires R2_BUCKET, R2_ENDPOINT, R2_ACCESS_KEY and R2_SECRET_KEY"
                    .into(),
            ));
        }
        Ok(())
    }

    pub fn r2_settings(&self) -> Option<R2Settings<'_>> {
        Some(R2Settings {
            bucket: self.r2_bucket.as_deref()?,
            endpoint: self.r2_endpoint.as_deref()?,
            access_key: self.r2_access_key.as_deref()?,
            secret_key: self.r2_secret_key.as_deref()?,
        })
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            max_attempts_per_image: self.max_attempts_per_image,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            persistence_attempts: self.persistence_attempts,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
