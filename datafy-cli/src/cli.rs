use crate::config::Overrides;
use crate::logger::LogFormat;
use crate::mock_llm;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use datafy_core::request::DEFAULT_TEMPERATURE;
use datafy_core::{
    AnalysisRequest, DataSource, Datafy, DataProfiler, PipelineConfig, RawChartConfig, Table,
};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "datafy", version)]
#[command(about = "Turn natural-language analytics requests into charts, tables and statistics")]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Base URL of the generation service
    #[arg(long, global = true)]
    pub llm_endpoint: Option<String>,
    #[arg(long, global = true)]
    pub model: Option<String>,
    #[arg(short = 'k', long, global = true)]
    pub api_key: Option<String>,
    /// ollama or openai
    #[arg(long, global = true)]
    pub provider: Option<String>,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            llm_endpoint: self.llm_endpoint.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            provider: self.provider.clone(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Full pipeline: classify, synthesize, execute, normalize
    Analyze {
        /// CSV file; repeat to analyze several files combined
        #[arg(short, long, required = true)]
        file: Vec<PathBuf>,
        #[arg(short, long)]
        prompt: String,
        #[arg(short, long, default_value_t = DEFAULT_TEMPERATURE)]
        temperature: f32,
        /// Only load the first N rows of each file
        #[arg(short, long)]
        rows: Option<usize>,
        /// Skip the generation service and answer from the fallbacks
        #[arg(long)]
        dry_run: bool,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Aggregate a CSV file with a chart configuration file
    Chart {
        #[arg(short, long)]
        file: PathBuf,
        /// Chart configuration (JSON or YAML)
        #[arg(short = 'c', long)]
        chart_config: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the dataset profile
    Profile {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(short, long)]
        rows: Option<usize>,
        /// Number of sample rows
        #[arg(short, long)]
        sample: Option<usize>,
    },
    /// Start mock LLM server
    MockServer {
        #[arg(short, long, default_value = "11435")]
        port: u16,
    },
}

/// Load one CSV file the way uploads are loaded: cleaned column names,
/// optional row limit
pub async fn load_table(file: &Path, rows: Option<usize>) -> Result<Table> {
    let mut source = DataSource::csv(file.to_path_buf()).with_clean_column_names(true);
    if let Some(limit) = rows {
        source = source.with_row_limit(limit);
    }
    source
        .load()
        .await
        .with_context(|| format!("failed to load {}", file.display()))
}

/// Load every file and stack the rows; reports whether several were combined
pub async fn load_tables(files: &[PathBuf], rows: Option<usize>) -> Result<(Table, bool)> {
    match files {
        [] => bail!("no input file given"),
        [single] => Ok((load_table(single, rows).await?, false)),
        many => {
            let mut combined = Vec::new();
            for file in many {
                combined.extend(load_table(file, rows).await?.into_rows());
            }
            info!("Combined {} files into {} rows", many.len(), combined.len());
            Ok((Table::from_rows(combined), true))
        }
    }
}

pub async fn analyze_command(
    files: Vec<PathBuf>,
    prompt: String,
    temperature: f32,
    rows: Option<usize>,
    dry_run: bool,
    output: Option<PathBuf>,
    pipeline: PipelineConfig,
) -> Result<()> {
    let (table, combined) = load_tables(&files, rows).await?;
    let mut request = AnalysisRequest::new(prompt, table.columns(), temperature)?;
    if combined {
        request = request.combined();
    }

    let datafy = if dry_run {
        warn!("Dry run: answers come from the deterministic fallbacks");
        Datafy::offline(pipeline)
    } else {
        Datafy::from_global_settings()?
    };

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling analysis");
            trigger.cancel();
        }
    });

    let run = datafy.analyze_with_cancel(&request, &table, &cancel).await?;
    info!(
        run_id = %run.id,
        intent = %run.intent.kind(),
        transitions = run.transitions.len(),
        "Analysis finished"
    );
    for warning in run.output.warnings() {
        warn!("{}", warning);
    }

    write_json(&run.output, output.as_deref()).await
}

pub async fn chart_command(file: PathBuf, config: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let table = load_table(&file, None).await?;
    let text = tokio::fs::read_to_string(&config)
        .await
        .with_context(|| format!("failed to read {}", config.display()))?;
    // YAML parses JSON as well
    let value: Value = serde_yaml::from_str(&text)
        .with_context(|| format!("{} is not a valid chart configuration", config.display()))?;
    if !value.is_object() {
        bail!("{} must contain a mapping", config.display());
    }

    let raw = RawChartConfig::from_value(&value);
    let spec = Datafy::offline(PipelineConfig::default()).chart(&table, &raw);
    info!(
        chart_type = %spec.chart_type,
        points = spec.labels.len(),
        "Chart aggregated"
    );
    write_json(&spec, output.as_deref()).await
}

pub async fn profile_command(
    file: PathBuf,
    rows: Option<usize>,
    sample: Option<usize>,
    pipeline: PipelineConfig,
) -> Result<()> {
    let table = load_table(&file, rows).await?;
    let profile = DataProfiler::new(sample.unwrap_or(pipeline.sample_size)).profile(&table);
    if let Some(error) = &profile.error {
        warn!("Profiling degraded: {}", error);
    }
    write_json(&profile, None).await
}

pub async fn mock_server_command(port: u16) -> Result<()> {
    mock_llm::start_mock_server(port).await
}

async fn write_json<T: Serialize + ?Sized>(value: &T, output: Option<&Path>) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            tokio::fs::write(path, text)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Output written to {}", path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}
