//! Intent classification of analytics requests

use crate::chart_config::ChartType;
use crate::extraction::extract_json;
use crate::llm_client::{GenerationError, TextGenerator};
use crate::profiler::DatasetProfile;
use crate::{DatafyError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformationType {
    Aggregate,
    Filter,
    Join,
    Compute,
    Sort,
    Select,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticalType {
    Correlation,
    #[serde(alias = "t_test", alias = "t-test")]
    Ttest,
    #[serde(alias = "z_test", alias = "z-test")]
    Ztest,
    #[serde(alias = "chi-square", alias = "chisquare", alias = "chi2")]
    ChiSquare,
    #[serde(alias = "descriptive_statistics", alias = "summary")]
    Descriptive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Visualization,
    Transformation,
    Statistical,
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntentKind::Visualization => "visualization",
            IntentKind::Transformation => "transformation",
            IntentKind::Statistical => "statistical",
        };
        f.write_str(name)
    }
}

/// What the request asks for, always exactly one variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    Visualization { chart_type: ChartType, reason: String },
    Transformation { operation: TransformationType, reason: String },
    Statistical { test: StatisticalType, reason: String },
}

impl Intent {
    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::Visualization { .. } => IntentKind::Visualization,
            Intent::Transformation { .. } => IntentKind::Transformation,
            Intent::Statistical { .. } => IntentKind::Statistical,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Intent::Visualization { reason, .. }
            | Intent::Transformation { reason, .. }
            | Intent::Statistical { reason, .. } => reason,
        }
    }

    /// Keyword reading of a prompt, used only when the model's answer is unusable.
    pub fn heuristic(prompt: &str) -> Self {
        let lower = prompt.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));
        let reason = "resolved from prompt keywords".to_string();

        if has(&["chart", "plot", "graph", "visualize", "visualise", "histogram"]) {
            let chart_type = if has(&["pie"]) {
                ChartType::Pie
            } else if has(&["scatter"]) {
                ChartType::Scatter
            } else if has(&["area"]) {
                ChartType::Area
            } else if has(&["line", "trend", "over time"]) {
                ChartType::Line
            } else {
                ChartType::Bar
            };
            return Intent::Visualization { chart_type, reason };
        }

        if has(&["stat", "correlat", "mean", "average", "test", "distribution", "describe", "variance"]) {
            let test = if has(&["correlat"]) {
                StatisticalType::Correlation
            } else if has(&["t-test", "ttest", "t test"]) {
                StatisticalType::Ttest
            } else if has(&["z-test", "ztest", "z test"]) {
                StatisticalType::Ztest
            } else if has(&["chi"]) {
                StatisticalType::ChiSquare
            } else {
                StatisticalType::Descriptive
            };
            return Intent::Statistical { test, reason };
        }

        let operation = if has(&["filter", "where", "only"]) {
            TransformationType::Filter
        } else if has(&["join", "merge"]) {
            TransformationType::Join
        } else if has(&["group", "total", "sum", "aggregate", "per "]) {
            TransformationType::Aggregate
        } else if has(&["sort", "order", "rank", "top"]) {
            TransformationType::Sort
        } else if has(&["select", "columns", "keep"]) {
            TransformationType::Select
        } else {
            TransformationType::Compute
        };
        Intent::Transformation { operation, reason }
    }
}

/// Classifier verdict
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: Option<f64>,
}

/// Model answer as received; checked before it becomes a [`Classification`]
#[derive(Debug, Clone, Deserialize)]
pub struct RawIntent {
    pub intent: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub visualization_type: Option<String>,
    #[serde(default)]
    pub transformation_type: Option<String>,
    #[serde(default)]
    pub statistical_type: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

fn parse_subtype<T: DeserializeOwned>(field: &str, value: Option<&String>) -> std::result::Result<T, String> {
    let value = value
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("missing required field '{}'", field))?;
    serde_json::from_value(Value::String(value.clone()))
        .map_err(|_| format!("'{}' is not a valid {}", value, field))
}

impl TryFrom<RawIntent> for Classification {
    type Error = String;

    fn try_from(raw: RawIntent) -> std::result::Result<Self, Self::Error> {
        let reason = raw.reason.clone().unwrap_or_default();
        let kind = raw
            .intent
            .as_deref()
            .map(|i| i.trim().to_lowercase())
            .ok_or_else(|| "missing required field 'intent'".to_string())?;

        let intent = match kind.as_str() {
            "visualization" | "visualisation" => Intent::Visualization {
                chart_type: parse_subtype("visualization_type", raw.visualization_type.as_ref())?,
                reason,
            },
            "transformation" => Intent::Transformation {
                operation: parse_subtype("transformation_type", raw.transformation_type.as_ref())?,
                reason,
            },
            "statistical" | "statistics" => Intent::Statistical {
                test: parse_subtype("statistical_type", raw.statistical_type.as_ref())?,
                reason,
            },
            other => return Err(format!("unknown intent '{}'", other)),
        };

        let confidence = raw.confidence.filter(|c| c.is_finite()).map(|c| c.clamp(0.0, 1.0));
        Ok(Classification { intent, confidence })
    }
}

/// Parse and validate a classifier reply.
pub fn parse_classification(reply: &str) -> Result<Classification> {
    let value = extract_json(reply).map_err(|e| DatafyError::Classification {
        message: e.to_string(),
        raw: e.raw,
    })?;
    let raw: RawIntent = serde_json::from_value(value).map_err(|e| DatafyError::Classification {
        message: format!("reply does not match the intent schema: {}", e),
        raw: reply.to_string(),
    })?;
    Classification::try_from(raw).map_err(|message| DatafyError::Classification {
        message,
        raw: reply.to_string(),
    })
}

pub struct IntentClassifier<'a> {
    generator: &'a dyn TextGenerator,
    temperature: f32,
}

impl<'a> IntentClassifier<'a> {
    pub fn new(generator: &'a dyn TextGenerator, temperature: f32) -> Self {
        Self {
            generator,
            temperature,
        }
    }

    pub async fn classify(&self, prompt: &str, profile: &DatasetProfile) -> Result<Classification> {
        let reply = self
            .generator
            .generate(&classification_prompt(prompt, profile), self.temperature)
            .await
            .map_err(|e| match e {
                GenerationError::Timeout(_) | GenerationError::Status { .. } => DatafyError::from(e),
                other => DatafyError::Classification {
                    message: other.to_string(),
                    raw: String::new(),
                },
            })?;
        debug!("Classifier reply: {}", reply);

        let classification = parse_classification(&reply)?;
        info!(
            intent = %classification.intent.kind(),
            confidence = ?classification.confidence,
            "Request classified"
        );
        Ok(classification)
    }
}

fn classification_prompt(prompt: &str, profile: &DatasetProfile) -> String {
    format!(
        r#"Classify the following analytics request as data transformation, visualization, or statistical analysis.

Request: {prompt}

{context}
Answer with a JSON object containing:
1. intent: "visualization", "transformation" or "statistical"
2. reason: a short explanation of the choice
3. visualization_type: for visualization, one of "bar", "line", "pie", "scatter", "area"
4. transformation_type: for transformation, one of "aggregate", "filter", "join", "compute", "sort", "select"
5. statistical_type: for statistical, one of "correlation", "ttest", "ztest", "chi_square", "descriptive"
6. confidence: a number between 0 and 1

Example:
{{"intent": "statistical", "reason": "asks how two columns relate", "visualization_type": null, "transformation_type": null, "statistical_type": "correlation", "confidence": 0.9}}"#,
        prompt = prompt,
        context = profile.to_prompt_context(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::ScriptedGenerator;

    #[test]
    fn test_parse_fenced_reply() {
        let reply = "```json\n{\"intent\": \"visualization\", \"reason\": \"plot\", \"visualization_type\": \"Pie\", \"confidence\": 1.4}\n```";
        let classification = parse_classification(reply).unwrap();

        assert_eq!(
            classification.intent,
            Intent::Visualization {
                chart_type: ChartType::Pie,
                reason: "plot".into()
            }
        );
        assert_eq!(classification.confidence, Some(1.0));
    }

    #[test]
    fn test_missing_subtype_is_an_error() {
        let err = parse_classification(r#"{"intent": "statistical", "reason": "x"}"#).unwrap_err();
        match err {
            DatafyError::Classification { message, raw } => {
                assert!(message.contains("statistical_type"));
                assert!(raw.contains("statistical"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_intent_and_subtype_rejected() {
        assert!(parse_classification(r#"{"intent": "prediction"}"#).is_err());
        assert!(parse_classification(
            r#"{"intent": "transformation", "transformation_type": "pivot"}"#
        )
        .is_err());
        assert!(parse_classification("no json here").is_err());
    }

    #[test]
    fn test_subtype_aliases() {
        let c = parse_classification(r#"{"intent": "statistical", "statistical_type": "T-Test"}"#).unwrap();
        assert_eq!(c.intent.kind(), IntentKind::Statistical);
        assert!(matches!(c.intent, Intent::Statistical { test: StatisticalType::Ttest, .. }));
    }

    #[test]
    fn test_heuristic() {
        assert!(matches!(
            Intent::heuristic("Plot a pie chart of revenue"),
            Intent::Visualization { chart_type: ChartType::Pie, .. }
        ));
        assert!(matches!(
            Intent::heuristic("correlation between price and sales"),
            Intent::Statistical { test: StatisticalType::Correlation, .. }
        ));
        assert!(matches!(
            Intent::heuristic("keep only rows where region is N"),
            Intent::Transformation { operation: TransformationType::Filter, .. }
        ));
    }

    #[tokio::test]
    async fn test_classifier_uses_generator() {
        let generator = ScriptedGenerator::new([
            r#"{"intent": "transformation", "reason": "r", "transformation_type": "filter"}"#,
        ]);
        let classifier = IntentClassifier::new(&generator, 0.4);
        let classification = classifier
            .classify("only north", &DatasetProfile::default())
            .await
            .unwrap();

        assert_eq!(classification.intent.kind(), IntentKind::Transformation);
        assert!(generator.prompts()[0].contains("only north"));
    }

    #[tokio::test]
    async fn test_generic_generation_failure_is_classification_error() {
        let generator = ScriptedGenerator::empty();
        let err = IntentClassifier::new(&generator, 0.4)
            .classify("anything", &DatasetProfile::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DatafyError::Classification { .. }));
    }
}
