//! Chart configuration synthesis and deterministic repair

use crate::extraction::extract_json;
use crate::llm_client::TextGenerator;
use crate::profiler::DatasetProfile;
use crate::{DatafyError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

/// Stand-ins used when there is no column to point an axis at.
pub const X_PLACEHOLDER: &str = "x";
pub const Y_PLACEHOLDER: &str = "y";
pub const DEFAULT_TITLE: &str = "Chart";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    #[default]
    Bar,
    Line,
    Pie,
    Scatter,
    Area,
}

impl ChartType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "bar" => Some(ChartType::Bar),
            "line" => Some(ChartType::Line),
            "pie" => Some(ChartType::Pie),
            "scatter" => Some(ChartType::Scatter),
            "area" => Some(ChartType::Area),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Pie => "pie",
            ChartType::Scatter => "scatter",
            ChartType::Area => "area",
        }
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    None,
    Sum,
    Average,
    Count,
    Min,
    Max,
    Std,
}

impl Aggregation {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Some(Aggregation::None),
            "sum" => Some(Aggregation::Sum),
            "average" => Some(Aggregation::Average),
            "count" => Some(Aggregation::Count),
            "min" => Some(Aggregation::Min),
            "max" => Some(Aggregation::Max),
            "std" => Some(Aggregation::Std),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::None => "none",
            Aggregation::Sum => "sum",
            Aggregation::Average => "average",
            Aggregation::Count => "count",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Std => "std",
        }
    }
}

/// Validated chart configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartConfig {
    pub chart_type: ChartType,
    pub x_axis: String,
    pub y_axis: String,
    pub aggregation: Aggregation,
    pub title: String,
}

/// Configuration as proposed by the model: any field may be missing or wrong
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawChartConfig {
    pub chart_type: Option<String>,
    pub x_axis: Option<String>,
    pub y_axis: Option<String>,
    pub aggregation: Option<String>,
    pub title: Option<String>,
}

impl RawChartConfig {
    /// Lenient read of an arbitrary JSON value; non-text fields count as missing.
    pub fn from_value(value: &Value) -> Self {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            chart_type: text("chart_type"),
            x_axis: text("x_axis"),
            y_axis: text("y_axis"),
            aggregation: text("aggregation"),
            title: text("title").or_else(|| text("chart_title")),
        }
    }
}

impl From<&ChartConfig> for RawChartConfig {
    fn from(config: &ChartConfig) -> Self {
        Self {
            chart_type: Some(config.chart_type.as_str().to_string()),
            x_axis: Some(config.x_axis.clone()),
            y_axis: Some(config.y_axis.clone()),
            aggregation: Some(config.aggregation.as_str().to_string()),
            title: Some(config.title.clone()),
        }
    }
}

/// Repair a proposed configuration against the available columns.
///
/// Total and idempotent: any input yields a structurally valid config whose
/// axes name existing columns (or the placeholders when there are none).
pub fn validate(raw: &RawChartConfig, columns: &[String]) -> ChartConfig {
    let known = |axis: &Option<String>| {
        axis.as_ref()
            .filter(|name| columns.iter().any(|c| c == *name))
            .cloned()
    };

    let chart_type = raw
        .chart_type
        .as_deref()
        .and_then(ChartType::parse)
        .unwrap_or_default();

    let x_axis = known(&raw.x_axis).unwrap_or_else(|| {
        columns
            .first()
            .cloned()
            .unwrap_or_else(|| X_PLACEHOLDER.to_string())
    });

    let y_axis = known(&raw.y_axis).unwrap_or_else(|| {
        columns
            .get(1)
            .or_else(|| columns.first())
            .cloned()
            .unwrap_or_else(|| Y_PLACEHOLDER.to_string())
    });

    let mut aggregation = raw
        .aggregation
        .as_deref()
        .and_then(Aggregation::parse)
        .unwrap_or_default();

    // One slice per row is never what a pie chart means.
    if chart_type == ChartType::Pie && aggregation == Aggregation::None {
        aggregation = Aggregation::Sum;
    }
    // Scatter plots need the raw point pairs.
    if chart_type == ChartType::Scatter {
        aggregation = Aggregation::None;
    }

    let title = raw
        .title
        .as_ref()
        .filter(|t| !t.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    let config = ChartConfig {
        chart_type,
        x_axis,
        y_axis,
        aggregation,
        title,
    };
    if RawChartConfig::from(&config) != *raw {
        debug!("Chart config repaired: {:?} -> {:?}", raw, config);
    }
    config
}

pub struct ChartConfigSynthesizer<'a> {
    generator: &'a dyn TextGenerator,
}

impl<'a> ChartConfigSynthesizer<'a> {
    pub fn new(generator: &'a dyn TextGenerator) -> Self {
        Self { generator }
    }

    /// Ask the model for a configuration. The raw proposal is returned; run it
    /// through [`validate`] before use.
    pub async fn synthesize(
        &self,
        prompt: &str,
        profile: &DatasetProfile,
        columns: &[String],
        temperature: f32,
    ) -> Result<RawChartConfig> {
        let reply = self
            .generator
            .generate(&config_prompt(prompt, profile, columns), temperature)
            .await
            .map_err(|e| DatafyError::CodeGeneration(format!("chart configuration: {}", e)))?;
        debug!("Chart config reply: {}", reply);

        let value = extract_json(&reply).map_err(|e| {
            warn!("Chart config reply was not JSON: {}", e);
            DatafyError::CodeGeneration(format!("chart configuration: {}", e))
        })?;
        Ok(RawChartConfig::from_value(&value))
    }
}

fn config_prompt(prompt: &str, profile: &DatasetProfile, columns: &[String]) -> String {
    format!(
        r#"Based on the following request, determine the appropriate chart configuration.

Request: {prompt}

Available columns: {columns}

{context}
Generate a JSON configuration with:
1. chart_type: "bar", "line", "pie", "scatter" or "area"
2. x_axis: column name for the x-axis
3. y_axis: column name for the y-axis
4. aggregation: "sum", "average", "count", "min", "max", "std" or "none"
5. title: chart title

Example:
{{"chart_type": "bar", "x_axis": "date", "y_axis": "sales", "aggregation": "sum", "title": "Total Sales by Date"}}

Provide only the JSON configuration, no explanations."#,
        prompt = prompt,
        columns = columns.join(", "),
        context = profile.to_prompt_context(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn raw(value: Value) -> RawChartConfig {
        RawChartConfig::from_value(&value)
    }

    #[test]
    fn test_well_formed_config_is_kept() {
        let config = validate(
            &raw(json!({"chart_type": "line", "x_axis": "day", "y_axis": "sales", "aggregation": "average", "title": "T"})),
            &cols(&["day", "sales"]),
        );
        assert_eq!(
            config,
            ChartConfig {
                chart_type: ChartType::Line,
                x_axis: "day".into(),
                y_axis: "sales".into(),
                aggregation: Aggregation::Average,
                title: "T".into(),
            }
        );
    }

    #[test]
    fn test_unknown_values_are_substituted() {
        let config = validate(
            &raw(json!({"chart_type": "donut", "x_axis": "nope", "y_axis": 3, "aggregation": "median"})),
            &cols(&["region", "sales", "units"]),
        );
        assert_eq!(config.chart_type, ChartType::Bar);
        assert_eq!(config.x_axis, "region");
        assert_eq!(config.y_axis, "sales");
        assert_eq!(config.aggregation, Aggregation::None);
        assert_eq!(config.title, DEFAULT_TITLE);
    }

    #[test]
    fn test_single_and_no_columns() {
        let single = validate(&RawChartConfig::default(), &cols(&["only"]));
        assert_eq!((single.x_axis.as_str(), single.y_axis.as_str()), ("only", "only"));

        let none = validate(&RawChartConfig::default(), &[]);
        assert_eq!((none.x_axis.as_str(), none.y_axis.as_str()), (X_PLACEHOLDER, Y_PLACEHOLDER));
    }

    #[test]
    fn test_pie_without_aggregation_sums() {
        let config = validate(
            &raw(json!({"chart_type": "pie", "x_axis": "region", "y_axis": "sales", "aggregation": "none"})),
            &cols(&["region", "sales"]),
        );
        assert_eq!(config.aggregation, Aggregation::Sum);
    }

    #[test]
    fn test_scatter_never_aggregates() {
        let config = validate(
            &raw(json!({"chart_type": "scatter", "aggregation": "max"})),
            &cols(&["a", "b"]),
        );
        assert_eq!(config.aggregation, Aggregation::None);
    }

    #[test]
    fn test_chart_title_alias() {
        let config = validate(&raw(json!({"chart_title": "Revenue"})), &cols(&["a"]));
        assert_eq!(config.title, "Revenue");
    }

    #[test]
    fn test_idempotent() {
        let columns = cols(&["region", "sales"]);
        let once = validate(&raw(json!({"chart_type": "PIE", "title": "  "})), &columns);
        let twice = validate(&RawChartConfig::from(&once), &columns);
        assert_eq!(once, twice);
    }
}
