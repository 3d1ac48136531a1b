//! Layered configuration: built-in defaults, optional file, `DATAFY__*`
//! environment variables, then command-line overrides.

use config as config_rs;
use config_rs::{Config, Environment, File};
use datafy_core::executor::ExecutorLimits;
use datafy_core::llm_client::{LlmConfig, LlmProvider};
use datafy_core::settings::{self, DatafySettings, PipelineConfig};
use datafy_core::DatafyError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub const ENV_PREFIX: &str = "DATAFY";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Config(#[from] config_rs::ConfigError),
    #[error("invalid setting {key}: {message}")]
    Invalid { key: &'static str, message: String },
    #[error(transparent)]
    Datafy(#[from] DatafyError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSection {
    pub provider: String,
    pub endpoint: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub top_p: f32,
    pub retry_max_elapsed_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSection {
    pub sample_size: usize,
    pub classification_temperature: f32,
    pub max_statements: usize,
    pub max_operations_per_statement: usize,
    pub max_rows: usize,
}

/// Merged view of every configuration layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub pipeline: PipelineSection,
}

/// Values given on the command line; `None` leaves lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub llm_endpoint: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub provider: Option<String>,
}

/// Load configuration from every layer, reading the process environment.
///
/// Defaults come from [`DatafySettings::from_env`], so `OLLAMA_BASE_URL` and
/// friends keep working underneath the `DATAFY__*` variables.
pub fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<AppConfig, ConfigError> {
    let environment = Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true);
    load_config_with(&DatafySettings::from_env(), path, environment, overrides)
}

/// Same as [`load_config`] with explicit defaults and environment source.
pub fn load_config_with(
    defaults: &DatafySettings,
    path: Option<&Path>,
    environment: Environment,
    overrides: &Overrides,
) -> Result<AppConfig, ConfigError> {
    let llm = &defaults.llm;
    let pipeline = &defaults.pipeline;

    let mut builder = Config::builder()
        .set_default("llm.provider", provider_name(llm.provider))?
        .set_default("llm.endpoint", llm.endpoint.clone())?
        .set_default("llm.model", llm.model.clone())?
        .set_default("llm.timeout_secs", llm.timeout.as_secs() as i64)?
        .set_default("llm.top_p", f64::from(llm.top_p))?
        .set_default("llm.retry_max_elapsed_secs", llm.retry_max_elapsed.as_secs() as i64)?
        .set_default("pipeline.sample_size", pipeline.sample_size as i64)?
        .set_default(
            "pipeline.classification_temperature",
            f64::from(pipeline.classification_temperature),
        )?
        .set_default("pipeline.max_statements", pipeline.executor.max_statements as i64)?
        .set_default(
            "pipeline.max_operations_per_statement",
            pipeline.executor.max_operations_per_statement as i64,
        )?
        .set_default("pipeline.max_rows", pipeline.executor.max_rows as i64)?;

    if let Some(key) = &llm.api_key {
        builder = builder.set_default("llm.api_key", key.clone())?;
    }

    if let Some(path) = path {
        info!("Reading configuration from {}", path.display());
        builder = builder.add_source(File::from(path).required(true));
    }

    // CLI flags take precedence
    builder = builder
        .add_source(environment)
        .set_override_option("llm.endpoint", overrides.llm_endpoint.clone())?
        .set_override_option("llm.model", overrides.model.clone())?
        .set_override_option("llm.api_key", overrides.api_key.clone())?
        .set_override_option("llm.provider", overrides.provider.clone())?;

    let cfg = builder.build()?;
    Ok(cfg.try_deserialize::<AppConfig>()?)
}

impl AppConfig {
    /// Check the merged values and convert them into core settings
    pub fn into_settings(self) -> Result<DatafySettings, ConfigError> {
        let provider = self
            .llm
            .provider
            .parse::<LlmProvider>()
            .map_err(|message| ConfigError::Invalid {
                key: "llm.provider",
                message,
            })?;
        if self.llm.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "llm.timeout_secs",
                message: "must be positive".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.llm.top_p) {
            return Err(ConfigError::Invalid {
                key: "llm.top_p",
                message: format!("{} is outside 0..=1", self.llm.top_p),
            });
        }
        let temperature = self.pipeline.classification_temperature;
        if !(0.0..=1.0).contains(&temperature) {
            return Err(ConfigError::Invalid {
                key: "pipeline.classification_temperature",
                message: format!("{} is outside 0..=1", temperature),
            });
        }
        if self.pipeline.sample_size == 0 {
            return Err(ConfigError::Invalid {
                key: "pipeline.sample_size",
                message: "must be positive".into(),
            });
        }

        Ok(DatafySettings {
            llm: LlmConfig {
                provider,
                endpoint: self.llm.endpoint,
                model: self.llm.model,
                api_key: self.llm.api_key.filter(|k| !k.is_empty()),
                timeout: Duration::from_secs(self.llm.timeout_secs),
                top_p: self.llm.top_p,
                retry_max_elapsed: Duration::from_secs(self.llm.retry_max_elapsed_secs),
            },
            pipeline: PipelineConfig {
                sample_size: self.pipeline.sample_size,
                classification_temperature: temperature,
                executor: ExecutorLimits {
                    max_statements: self.pipeline.max_statements,
                    max_operations_per_statement: self.pipeline.max_operations_per_statement,
                    max_rows: self.pipeline.max_rows,
                },
            },
        })
    }
}

/// Load every layer and install the result as the process-wide settings
pub fn init_settings(
    path: Option<&Path>,
    overrides: &Overrides,
) -> Result<&'static DatafySettings, ConfigError> {
    let settings = load_config(path, overrides)?.into_settings()?;
    info!(
        provider = ?settings.llm.provider,
        endpoint = %settings.llm.endpoint,
        model = %settings.llm.model,
        "Configuration loaded"
    );
    Ok(settings::install(settings)?)
}

fn provider_name(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::Ollama => "ollama",
        LlmProvider::OpenAi => "openai",
    }
}
