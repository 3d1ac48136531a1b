//! Request-to-action pipeline as an explicit state machine

use crate::chart::{aggregate_with_warnings, ChartSpec};
use crate::chart_config::{validate, ChartConfigSynthesizer, RawChartConfig};
use crate::codegen::{CodeSynthesizer, GeneratedCode, ResultVariable};
use crate::executor::SandboxedExecutor;
use crate::fallback::FallbackPolicy;
use crate::intent::{Intent, IntentClassifier, IntentKind};
use crate::llm_client::{LlmClient, TextGenerator};
use crate::normalize::normalize_serializable;
use crate::profiler::{DataProfiler, DatasetProfile};
use crate::request::AnalysisRequest;
use crate::settings::{DatafySettings, PipelineConfig};
use crate::table::{Row, Table};
use crate::{DatafyError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Profiling,
    Classifying,
    SynthesizingConfig,
    SynthesizingCode,
    Executing,
    Repairing,
    Normalizing,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    ChartIntent,
    CodeIntent,
    Recoverable,
    Fatal,
}

/// Transition table. Pairs not listed lead to `Failed`.
pub fn next_state(state: PipelineState, outcome: Outcome) -> PipelineState {
    use Outcome::*;
    use PipelineState::*;

    match (state, outcome) {
        (Profiling, Succeeded) => Classifying,
        (Classifying, ChartIntent) => SynthesizingConfig,
        (Classifying, CodeIntent) => SynthesizingCode,
        (Classifying, Recoverable) => Repairing,
        (SynthesizingConfig, Succeeded) => Normalizing,
        (SynthesizingConfig, Recoverable) => Repairing,
        (SynthesizingCode, Succeeded) => Executing,
        (SynthesizingCode, Recoverable) => Repairing,
        (Executing, Succeeded) => Normalizing,
        (Executing, Recoverable) => Repairing,
        (Repairing, Succeeded) => Normalizing,
        (Normalizing, Succeeded) => Done,
        _ => Failed,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub from: PipelineState,
    pub outcome: Outcome,
    pub to: PipelineState,
    pub at: DateTime<Utc>,
}

/// Terminal payload handed back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisOutput {
    Chart {
        config: ChartSpec,
        data: Vec<Row>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    Table {
        data: Value,
        message: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    StatisticalResult {
        result: Value,
        message: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
}

impl AnalysisOutput {
    pub fn warnings(&self) -> &[String] {
        match self {
            AnalysisOutput::Chart { warnings, .. }
            | AnalysisOutput::Table { warnings, .. }
            | AnalysisOutput::StatisticalResult { warnings, .. } => warnings,
        }
    }

    fn warnings_mut(&mut self) -> &mut Vec<String> {
        match self {
            AnalysisOutput::Chart { warnings, .. }
            | AnalysisOutput::Table { warnings, .. }
            | AnalysisOutput::StatisticalResult { warnings, .. } => warnings,
        }
    }
}

/// A finished run
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRun {
    pub id: Uuid,
    pub intent: Intent,
    pub output: AnalysisOutput,
    pub transitions: Vec<Transition>,
}

/// Collaborators and knobs shared by every run in the process
pub struct PipelineContext {
    generator: Arc<dyn TextGenerator>,
    config: PipelineConfig,
}

impl PipelineContext {
    pub fn new(generator: Arc<dyn TextGenerator>, config: PipelineConfig) -> Self {
        Self { generator, config }
    }

    /// Context talking to the configured text-generation service.
    pub fn from_settings(settings: &DatafySettings) -> Result<Self> {
        let client = LlmClient::new(settings.llm.clone())?;
        Ok(Self::new(Arc::new(client), settings.pipeline.clone()))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn generator(&self) -> &dyn TextGenerator {
        self.generator.as_ref()
    }

    /// Run one request to completion.
    pub async fn run(
        &self,
        request: &AnalysisRequest,
        table: &Table,
        cancel: &CancellationToken,
    ) -> Result<AnalysisRun> {
        let id = Uuid::new_v4();
        let span = info_span!("analysis", run_id = %id);
        Run::new(self, request, table, cancel)
            .drive(id)
            .instrument(span)
            .await
    }
}

/// Working state of one run; each stage adds to it, none rewrites an earlier stage's output
struct Run<'a> {
    ctx: &'a PipelineContext,
    request: &'a AnalysisRequest,
    table: &'a Table,
    cancel: &'a CancellationToken,
    fallback: FallbackPolicy,
    state: PipelineState,
    transitions: Vec<Transition>,
    warnings: Vec<String>,
    profile: DatasetProfile,
    intent: Option<Intent>,
    code: Option<GeneratedCode>,
    output: Option<AnalysisOutput>,
    error: Option<DatafyError>,
}

impl<'a> Run<'a> {
    fn new(
        ctx: &'a PipelineContext,
        request: &'a AnalysisRequest,
        table: &'a Table,
        cancel: &'a CancellationToken,
    ) -> Self {
        let executor = SandboxedExecutor::new(ctx.config.executor);
        Self {
            ctx,
            request,
            table,
            cancel,
            fallback: FallbackPolicy::new(executor),
            state: PipelineState::Profiling,
            transitions: Vec::new(),
            warnings: Vec::new(),
            profile: DatasetProfile::default(),
            intent: None,
            code: None,
            output: None,
            error: None,
        }
    }

    async fn drive(mut self, id: Uuid) -> Result<AnalysisRun> {
        info!(rows = self.table.len(), "Analysis started");

        while !self.state.is_terminal() {
            let outcome = if self.cancel.is_cancelled() {
                self.error = Some(DatafyError::Cancelled);
                Outcome::Fatal
            } else {
                self.step().await
            };
            self.advance(outcome);
        }

        match (self.state, self.output, self.intent) {
            (PipelineState::Done, Some(output), Some(intent)) => {
                info!(intent = %intent.kind(), "Analysis finished");
                Ok(AnalysisRun {
                    id,
                    intent,
                    output,
                    transitions: self.transitions,
                })
            }
            _ => {
                let error = self
                    .error
                    .unwrap_or_else(|| DatafyError::Other("pipeline ended without a result".into()));
                warn!("Analysis failed: {}", error);
                Err(error)
            }
        }
    }

    fn advance(&mut self, outcome: Outcome) {
        let to = next_state(self.state, outcome);
        info!(from = %self.state, ?outcome, to = %to, "Pipeline transition");
        self.transitions.push(Transition {
            from: self.state,
            outcome,
            to,
            at: Utc::now(),
        });
        self.state = to;
    }

    async fn step(&mut self) -> Outcome {
        match self.state {
            PipelineState::Profiling => self.profiling(),
            PipelineState::Classifying => self.classifying().await,
            PipelineState::SynthesizingConfig => self.synthesizing_config().await,
            PipelineState::SynthesizingCode => self.synthesizing_code().await,
            PipelineState::Executing => self.executing(),
            PipelineState::Repairing => self.repairing(),
            PipelineState::Normalizing => self.normalizing(),
            PipelineState::Done | PipelineState::Failed => Outcome::Fatal,
        }
    }

    /// Race a generation call against the run's cancellation token.
    async fn cancellable<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DatafyError::Cancelled),
            result = call => result,
        }
    }

    fn fatal(&mut self, error: DatafyError) -> Outcome {
        self.error = Some(error);
        Outcome::Fatal
    }

    fn soft_warning(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }

    fn profiling(&mut self) -> Outcome {
        self.profile = DataProfiler::new(self.ctx.config.sample_size).profile(self.table);
        if let Some(error) = self.profile.error.clone() {
            self.soft_warning(format!("dataset profile degraded: {}", error));
        }
        Outcome::Succeeded
    }

    async fn classifying(&mut self) -> Outcome {
        let classifier = IntentClassifier::new(
            self.ctx.generator(),
            self.ctx.config.classification_temperature,
        );
        let result = self
            .cancellable(classifier.classify(self.request.prompt(), &self.profile))
            .await;

        match result {
            Ok(classification) => {
                let outcome = match classification.intent.kind() {
                    IntentKind::Visualization => Outcome::ChartIntent,
                    _ => Outcome::CodeIntent,
                };
                self.intent = Some(classification.intent);
                outcome
            }
            Err(e) if e.is_recoverable() => {
                if let DatafyError::Classification { raw, .. } = &e {
                    debug!("Unusable classifier reply: {}", raw);
                }
                let intent = Intent::heuristic(self.request.prompt());
                self.soft_warning(format!(
                    "classification failed ({}), resolved '{}' from prompt keywords",
                    e,
                    intent.kind()
                ));
                self.intent = Some(intent);
                Outcome::Recoverable
            }
            Err(e) => self.fatal(e),
        }
    }

    async fn synthesizing_config(&mut self) -> Outcome {
        let synthesizer = ChartConfigSynthesizer::new(self.ctx.generator());
        let result = self
            .cancellable(synthesizer.synthesize(
                self.request.prompt(),
                &self.profile,
                self.request.columns(),
                self.request.temperature(),
            ))
            .await;

        match result {
            Ok(raw) => {
                self.output = Some(self.chart_output(&raw));
                Outcome::Succeeded
            }
            Err(DatafyError::Cancelled) => self.fatal(DatafyError::Cancelled),
            Err(e) => {
                self.soft_warning(format!("chart configuration failed: {}", e));
                Outcome::Recoverable
            }
        }
    }

    async fn synthesizing_code(&mut self) -> Outcome {
        let Some(intent) = self.intent.clone() else {
            return self.fatal(DatafyError::Other("no intent to synthesize for".into()));
        };
        let synthesizer = CodeSynthesizer::new(self.ctx.generator());
        let result = self
            .cancellable(synthesizer.synthesize(
                self.request.prompt(),
                &intent,
                &self.profile,
                self.request.columns(),
                self.request.temperature(),
            ))
            .await;

        match result {
            Ok(code) => {
                if code.repaired {
                    self.soft_warning(format!(
                        "generated program was repaired to assign '{}'",
                        code.result_variable
                    ));
                }
                self.code = Some(code);
                Outcome::Succeeded
            }
            Err(DatafyError::Cancelled) => self.fatal(DatafyError::Cancelled),
            Err(e) => {
                self.soft_warning(format!("program synthesis failed: {}", e));
                Outcome::Recoverable
            }
        }
    }

    fn executing(&mut self) -> Outcome {
        let Some(code) = self.code.as_ref() else {
            return self.fatal(DatafyError::Other("no program to execute".into()));
        };
        let variable = code.result_variable;

        match self.fallback.execute(code, self.table) {
            Ok(value) => {
                self.output = Some(code_output(variable, value, false));
                Outcome::Succeeded
            }
            Err(e) if e.is_recoverable() => {
                self.soft_warning(format!("program execution failed: {}", e));
                Outcome::Recoverable
            }
            Err(e) => self.fatal(e),
        }
    }

    fn repairing(&mut self) -> Outcome {
        let Some(kind) = self.intent.as_ref().map(Intent::kind) else {
            return self.fatal(DatafyError::Other("no intent to repair".into()));
        };

        match ResultVariable::for_intent(kind) {
            None => {
                let config = self.fallback.chart_config(self.request.columns());
                self.output = Some(self.chart_output(&RawChartConfig::from(&config)));
                Outcome::Succeeded
            }
            Some(variable) => match self.fallback.default_result(variable, self.table) {
                Ok(value) => {
                    self.output = Some(code_output(variable, value, true));
                    Outcome::Succeeded
                }
                Err(e) => self.fatal(e),
            },
        }
    }

    fn normalizing(&mut self) -> Outcome {
        let Some(mut output) = self.output.take() else {
            return self.fatal(DatafyError::ResultShape("no result to normalize".into()));
        };
        let mut warnings = std::mem::take(&mut self.warnings);
        warnings.append(output.warnings_mut());
        *output.warnings_mut() = warnings;

        let normalized: Result<AnalysisOutput> = normalize_serializable(&output)
            .and_then(|value| serde_json::from_value(value).map_err(DatafyError::from));
        match normalized {
            Ok(output) => {
                self.output = Some(output);
                Outcome::Succeeded
            }
            Err(e) => self.fatal(DatafyError::ResultShape(e.to_string())),
        }
    }

    fn chart_output(&self, raw: &RawChartConfig) -> AnalysisOutput {
        let config = validate(raw, self.request.columns());
        let chart = aggregate_with_warnings(self.table.rows(), &config);
        AnalysisOutput::Chart {
            config: chart.spec,
            data: self.table.rows().to_vec(),
            warnings: chart.warnings,
        }
    }
}

fn code_output(variable: ResultVariable, value: Value, fallback: bool) -> AnalysisOutput {
    match (variable, fallback) {
        (ResultVariable::TransformedDf, false) => AnalysisOutput::Table {
            data: value,
            message: "Data transformed successfully".into(),
            warnings: Vec::new(),
        },
        (ResultVariable::TransformedDf, true) => AnalysisOutput::Table {
            data: value,
            message: "Transformation could not be applied; returning the original data".into(),
            warnings: Vec::new(),
        },
        (ResultVariable::StatResult, false) => AnalysisOutput::StatisticalResult {
            result: value,
            message: "Statistical analysis completed".into(),
            warnings: Vec::new(),
        },
        (ResultVariable::StatResult, true) => AnalysisOutput::StatisticalResult {
            result: value,
            message: "Requested analysis could not be run; returning descriptive statistics".into(),
            warnings: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::ScriptedGenerator;
    use serde_json::json;

    #[test]
    fn test_transition_table() {
        use Outcome::*;
        use PipelineState::*;

        assert_eq!(next_state(Profiling, Succeeded), Classifying);
        assert_eq!(next_state(Classifying, ChartIntent), SynthesizingConfig);
        assert_eq!(next_state(Classifying, CodeIntent), SynthesizingCode);
        assert_eq!(next_state(Executing, Recoverable), Repairing);
        assert_eq!(next_state(Repairing, Recoverable), Failed);
        assert_eq!(next_state(Normalizing, Succeeded), Done);
        assert_eq!(next_state(Classifying, Fatal), Failed);
        assert_eq!(next_state(Profiling, ChartIntent), Failed);
    }

    #[tokio::test]
    async fn test_statistical_run_records_trail() {
        let table = Table::from_values(vec![json!({"a": 1, "b": 2}), json!({"a": 2, "b": 5})]).unwrap();
        let generator = ScriptedGenerator::new([
            r#"{"intent": "statistical", "reason": "r", "statistical_type": "correlation"}"#,
            r#"[{"assign": "stat_result", "ops": [{"op": "correlation"}]}]"#,
        ]);
        let ctx = PipelineContext::new(Arc::new(generator), PipelineConfig::default());
        let request = AnalysisRequest::for_table("how do a and b relate", &table).unwrap();

        let run = ctx.run(&request, &table, &CancellationToken::new()).await.unwrap();

        let states: Vec<PipelineState> = run.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            states,
            vec![
                PipelineState::Classifying,
                PipelineState::SynthesizingCode,
                PipelineState::Executing,
                PipelineState::Normalizing,
                PipelineState::Done
            ]
        );
        match run.output {
            AnalysisOutput::StatisticalResult { result, warnings, .. } => {
                assert_eq!(result["a"]["b"], json!(1.0));
                assert!(warnings.is_empty());
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let table = Table::from_values(vec![json!({"a": 1})]).unwrap();
        let ctx = PipelineContext::new(Arc::new(ScriptedGenerator::empty()), PipelineConfig::default());
        let request = AnalysisRequest::for_table("anything", &table).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ctx.run(&request, &table, &cancel).await.unwrap_err();
        assert!(matches!(err, DatafyError::Cancelled));
    }

    #[test]
    fn test_output_serialization_shape() {
        let output = AnalysisOutput::Table {
            data: json!([{"a": 1}]),
            message: "m".into(),
            warnings: Vec::new(),
        };
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value, json!({"type": "table", "data": [{"a": 1}], "message": "m"}));
    }
}
