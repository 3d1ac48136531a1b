//! Datafy: natural-language analytics requests turned into charts, tables and statistics

pub mod chart;
pub mod chart_config;
pub mod codegen;
pub mod data_source;
pub mod errors;
pub mod executor;
pub mod extraction;
pub mod fallback;
pub mod intent;
pub mod llm_client;
pub mod normalize;
pub mod pipeline;
pub mod profiler;
pub mod program;
pub mod request;
pub mod settings;
pub mod stats;
pub mod table;

// Re-exports
pub use chart::{aggregate, aggregate_with_warnings, ChartSpec};
pub use chart_config::{validate, Aggregation, ChartConfig, ChartType, RawChartConfig};
pub use codegen::{GeneratedCode, ResultVariable};
pub use data_source::{DataSource, DataSourceConfig};
pub use errors::{DatafyError, Result};
pub use executor::{ExecutionResult, ExecutorLimits, SandboxedExecutor};
pub use fallback::FallbackPolicy;
pub use intent::{Classification, Intent, IntentKind};
pub use llm_client::{GenerationError, LlmClient, LlmConfig, LlmProvider, ScriptedGenerator, TextGenerator};
pub use pipeline::{AnalysisOutput, AnalysisRun, PipelineContext, PipelineState};
pub use profiler::{DataProfiler, DatasetProfile};
pub use request::AnalysisRequest;
pub use settings::{DatafySettings, PipelineConfig};
pub use table::{Row, Table};

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Main Datafy library interface
#[derive(Clone)]
pub struct Datafy {
    context: Arc<PipelineContext>,
}

impl Datafy {
    /// Create a new Datafy instance around a prepared context
    pub fn new(context: PipelineContext) -> Self {
        Self {
            context: Arc::new(context),
        }
    }

    /// Instance backed by the process-wide settings
    pub fn from_global_settings() -> Result<Self> {
        let settings = settings::global();
        info!(
            provider = ?settings.llm.provider,
            model = %settings.llm.model,
            "Initialising Datafy"
        );
        Ok(Self::new(PipelineContext::from_settings(settings)?))
    }

    /// Instance whose generator has nothing to say, so every answer comes
    /// from the deterministic fallbacks
    pub fn offline(config: PipelineConfig) -> Self {
        Self::new(PipelineContext::new(Arc::new(ScriptedGenerator::empty()), config))
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    /// Analyze a request against a table
    pub async fn analyze(&self, request: &AnalysisRequest, table: &Table) -> Result<AnalysisOutput> {
        let run = self
            .context
            .run(request, table, &CancellationToken::new())
            .await?;
        Ok(run.output)
    }

    /// Analyze with a caller-held cancellation token, returning the full run record
    pub async fn analyze_with_cancel(
        &self,
        request: &AnalysisRequest,
        table: &Table,
        cancel: &CancellationToken,
    ) -> Result<AnalysisRun> {
        self.context.run(request, table, cancel).await
    }

    /// Profile a table with the configured sample size
    pub fn profile(&self, table: &Table) -> DatasetProfile {
        DataProfiler::new(self.context.config().sample_size).profile(table)
    }

    /// Chart a table with a caller-supplied configuration, skipping generation
    pub fn chart(&self, table: &Table, raw: &RawChartConfig) -> ChartSpec {
        let config = validate(raw, &table.columns());
        aggregate(table.rows(), &config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_offline_transformation_returns_input() {
        let table = Table::from_values(vec![json!({"a": 1}), json!({"a": 2})]).unwrap();
        let datafy = Datafy::offline(PipelineConfig::default());
        let request = AnalysisRequest::for_table("rename things", &table).unwrap();

        match datafy.analyze(&request, &table).await.unwrap() {
            AnalysisOutput::Table { data, warnings, .. } => {
                assert_eq!(data, table.to_value());
                assert!(!warnings.is_empty());
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[test]
    fn test_chart_with_supplied_config() {
        let table = Table::from_values(vec![json!({"k": "a", "v": 2}), json!({"k": "a", "v": 3})]).unwrap();
        let raw = RawChartConfig {
            chart_type: Some("pie".into()),
            ..Default::default()
        };
        let spec = Datafy::offline(PipelineConfig::default()).chart(&table, &raw);
        assert_eq!(spec.labels, vec!["a"]);
        assert_eq!(spec.values(), &[5.0]);
    }
}
