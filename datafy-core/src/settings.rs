//! Process-wide settings and per-pipeline configuration

use crate::executor::ExecutorLimits;
use crate::llm_client::{LlmConfig, LlmProvider};
use crate::profiler::DEFAULT_SAMPLE_SIZE;
use crate::{DatafyError, Result};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{info, warn};

pub const ENV_BASE_URL: &str = "OLLAMA_BASE_URL";
pub const ENV_MODEL: &str = "OLLAMA_MODEL";
pub const ENV_PROVIDER: &str = "DATAFY_LLM_PROVIDER";
pub const ENV_API_KEY: &str = "DATAFY_API_KEY";
pub const ENV_TIMEOUT_SECS: &str = "DATAFY_LLM_TIMEOUT_SECS";

static SETTINGS: OnceCell<DatafySettings> = OnceCell::new();

/// Knobs of a single pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Rows included in the dataset profile
    pub sample_size: usize,
    pub classification_temperature: f32,
    pub executor: ExecutorLimits,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            classification_temperature: 0.4,
            executor: ExecutorLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DatafySettings {
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
}

impl DatafySettings {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns; unparsable values are
    /// logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        let llm = &mut settings.llm;

        if let Some(url) = lookup(ENV_BASE_URL) {
            llm.endpoint = url;
        }
        if let Some(model) = lookup(ENV_MODEL) {
            llm.model = model;
        }
        if let Some(key) = lookup(ENV_API_KEY).filter(|k| !k.is_empty()) {
            llm.api_key = Some(key);
        }
        if let Some(provider) = lookup(ENV_PROVIDER) {
            match provider.parse::<LlmProvider>() {
                Ok(provider) => llm.provider = provider,
                Err(e) => warn!("Ignoring {}: {}", ENV_PROVIDER, e),
            }
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS) {
            match secs.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => llm.timeout = Duration::from_secs(secs),
                _ => warn!("Ignoring {}: '{}' is not a positive number of seconds", ENV_TIMEOUT_SECS, secs),
            }
        }
        settings
    }
}

/// Settings shared by the whole process, read from the environment on first
/// use unless [`install`] ran before.
pub fn global() -> &'static DatafySettings {
    SETTINGS.get_or_init(|| {
        info!("Loading settings from environment");
        DatafySettings::from_env()
    })
}

/// Install explicitly loaded settings. Only the first call before any
/// [`global`] access wins.
pub fn install(settings: DatafySettings) -> Result<&'static DatafySettings> {
    SETTINGS
        .set(settings)
        .map_err(|_| DatafyError::Other("settings are already initialised".into()))?;
    Ok(global())
}
