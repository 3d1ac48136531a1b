//! Chart aggregation engine: rows plus a validated config to a render-ready spec

use crate::chart_config::{validate, Aggregation, ChartConfig, ChartType, RawChartConfig};
use crate::stats;
use crate::table::{as_number, label_text, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

pub const NO_DATA_TITLE: &str = "No Data Available";
pub const NO_DATA_LABEL: &str = "No Data";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub label: String,
    pub data: Vec<f64>,
}

/// Render-ready chart; `labels` and every dataset's `data` have equal length
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
    pub title: String,
    pub x_axis_title: Option<String>,
    pub y_axis_title: Option<String>,
}

impl ChartSpec {
    /// The spec returned for an empty row set.
    pub fn no_data() -> Self {
        Self {
            chart_type: ChartType::Bar,
            labels: Vec::new(),
            datasets: vec![Dataset {
                label: NO_DATA_LABEL.to_string(),
                data: Vec::new(),
            }],
            title: NO_DATA_TITLE.to_string(),
            x_axis_title: None,
            y_axis_title: None,
        }
    }

    /// Values of the first dataset.
    pub fn values(&self) -> &[f64] {
        self.datasets.first().map(|d| d.data.as_slice()).unwrap_or(&[])
    }
}

/// Spec plus the soft warnings raised while building it
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedChart {
    pub spec: ChartSpec,
    pub warnings: Vec<String>,
}

/// Build a chart spec from rows. Pure and total.
pub fn aggregate(rows: &[Row], config: &ChartConfig) -> ChartSpec {
    aggregate_with_warnings(rows, config).spec
}

/// Like [`aggregate`], also reporting repaired axes and aggregation reverts.
pub fn aggregate_with_warnings(rows: &[Row], config: &ChartConfig) -> AggregatedChart {
    let mut warnings = Vec::new();
    if rows.is_empty() {
        return AggregatedChart {
            spec: ChartSpec::no_data(),
            warnings,
        };
    }

    // Rows may not carry the columns the config was validated against.
    let keys = row_keys(rows);
    let config = {
        let checked = validate(&RawChartConfig::from(config), &keys);
        if checked.x_axis != config.x_axis || checked.y_axis != config.y_axis {
            warnings.push(format!(
                "axes '{}'/'{}' not found in data, using '{}'/'{}'",
                config.x_axis, config.y_axis, checked.x_axis, checked.y_axis
            ));
        }
        checked
    };

    let points = if config.aggregation == Aggregation::None {
        raw_points(rows, &config)
    } else {
        match grouped(rows, &config) {
            Ok(points) => points,
            Err(reason) => {
                warn!("Aggregation reverted to raw rows: {}", reason);
                warnings.push(format!(
                    "could not apply '{}' aggregation ({}), showing unaggregated data",
                    config.aggregation.as_str(),
                    reason
                ));
                raw_points(rows, &config)
            }
        }
    };
    debug!("Chart built with {} points", points.len());

    let (labels, data) = points.into_iter().unzip();
    AggregatedChart {
        spec: ChartSpec {
            chart_type: config.chart_type,
            labels,
            datasets: vec![Dataset {
                label: config.y_axis.clone(),
                data,
            }],
            title: config.title,
            x_axis_title: Some(config.x_axis),
            y_axis_title: Some(config.y_axis),
        },
        warnings,
    }
}

fn row_keys(rows: &[Row]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for key in rows.iter().flat_map(|r| r.keys()) {
        if !keys.contains(key) {
            keys.push(key.clone());
        }
    }
    keys
}

fn cell<'a>(row: &'a Row, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&Value::Null)
}

/// One point per row; rows whose x is null or whose y is not numeric are dropped.
fn raw_points(rows: &[Row], config: &ChartConfig) -> Vec<(String, f64)> {
    rows.iter()
        .filter_map(|row| {
            let x = cell(row, &config.x_axis);
            if x.is_null() {
                return None;
            }
            let y = as_number(cell(row, &config.y_axis))?;
            Some((label_text(x), y))
        })
        .collect()
}

/// One point per x group in first-seen order. Fails on a non-numeric y or a
/// reduction that leaves the f64 range so the caller can fall back to raw rows.
fn grouped(rows: &[Row], config: &ChartConfig) -> Result<Vec<(String, f64)>, String> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<&Value>)> = Vec::new();
    for row in rows {
        let x = cell(row, &config.x_axis);
        if x.is_null() {
            continue;
        }
        let label = label_text(x);
        let y = cell(row, &config.y_axis);
        match index.get(&label) {
            Some(&slot) => groups[slot].1.push(y),
            None => {
                index.insert(label.clone(), groups.len());
                groups.push((label, vec![y]));
            }
        }
    }

    let mut points = Vec::with_capacity(groups.len());
    for (label, members) in groups {
        if config.aggregation == Aggregation::Count {
            points.push((label, members.len() as f64));
            continue;
        }

        let mut values = Vec::with_capacity(members.len());
        for y in members.into_iter().filter(|y| !y.is_null()) {
            let value = as_number(y)
                .ok_or_else(|| format!("'{}' is not numeric", label_text(y)))?;
            values.push(value);
        }

        let reduced = match config.aggregation {
            Aggregation::Sum => Some(values.iter().sum::<f64>()),
            Aggregation::Average => stats::mean(&values),
            Aggregation::Min => values.iter().copied().reduce(f64::min),
            Aggregation::Max => values.iter().copied().reduce(f64::max),
            Aggregation::Std => stats::sample_std(&values),
            Aggregation::Count | Aggregation::None => None,
        };
        match reduced {
            Some(reduced) if !reduced.is_finite() => {
                return Err(format!(
                    "'{}' overflows for '{}'",
                    config.aggregation.as_str(),
                    label
                ));
            }
            Some(reduced) => points.push((label, reduced)),
            None => {}
        }
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: Value) -> Vec<Row> {
        values
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    fn config(chart_type: ChartType, aggregation: Aggregation) -> ChartConfig {
        ChartConfig {
            chart_type,
            x_axis: "region".into(),
            y_axis: "sales".into(),
            aggregation,
            title: "T".into(),
        }
    }

    #[test]
    fn test_sum_in_first_seen_order() {
        let data = rows(json!([
            {"region": "N", "sales": 10},
            {"region": "S", "sales": 20},
            {"region": "N", "sales": 5}
        ]));
        let spec = aggregate(&data, &config(ChartType::Bar, Aggregation::Sum));

        assert_eq!(spec.labels, vec!["N", "S"]);
        assert_eq!(spec.values(), &[15.0, 20.0]);
        assert_eq!(spec.title, "T");
        assert_eq!(spec.x_axis_title.as_deref(), Some("region"));
    }

    #[test]
    fn test_non_numeric_rows_are_dropped() {
        let data = rows(json!([
            {"region": "a", "sales": "10"},
            {"region": "b", "sales": "abc"},
            {"region": "c", "sales": "30"}
        ]));
        let spec = aggregate(&data, &config(ChartType::Line, Aggregation::None));

        assert_eq!(spec.labels, vec!["a", "c"]);
        assert_eq!(spec.values(), &[10.0, 30.0]);
    }

    #[test]
    fn test_empty_rows_give_sentinel() {
        let spec = aggregate(&[], &config(ChartType::Pie, Aggregation::Sum));
        assert_eq!(spec, ChartSpec::no_data());
        assert_eq!(spec.title, "No Data Available");
        assert!(spec.labels.is_empty() && spec.values().is_empty());
    }

    #[test]
    fn test_count_ignores_y_values() {
        let data = rows(json!([
            {"region": "N", "sales": "n/a"},
            {"region": "N", "sales": null},
            {"region": "S", "sales": 1}
        ]));
        let spec = aggregate(&data, &config(ChartType::Bar, Aggregation::Count));
        assert_eq!(spec.values(), &[2.0, 1.0]);
    }

    #[test]
    fn test_failed_reduction_reverts_with_warning() {
        let data = rows(json!([
            {"region": "N", "sales": 10},
            {"region": "N", "sales": "lots"},
            {"region": "S", "sales": 3}
        ]));
        let chart = aggregate_with_warnings(&data, &config(ChartType::Bar, Aggregation::Sum));

        assert_eq!(chart.spec.labels, vec!["N", "S"]);
        assert_eq!(chart.spec.values(), &[10.0, 3.0]);
        assert_eq!(chart.warnings.len(), 1);
    }

    #[test]
    fn test_axes_rechecked_against_rows() {
        let data = rows(json!([{"day": "mon", "amount": 4}]));
        let chart = aggregate_with_warnings(&data, &config(ChartType::Bar, Aggregation::None));

        assert_eq!(chart.spec.labels, vec!["mon"]);
        assert_eq!(chart.spec.values(), &[4.0]);
        assert_eq!(chart.spec.y_axis_title.as_deref(), Some("amount"));
        assert!(!chart.warnings.is_empty());
    }

    #[test]
    fn test_std_and_average() {
        let data = rows(json!([
            {"region": "N", "sales": 2},
            {"region": "N", "sales": 4},
            {"region": "S", "sales": 7}
        ]));
        let avg = aggregate(&data, &config(ChartType::Bar, Aggregation::Average));
        assert_eq!(avg.values(), &[3.0, 7.0]);

        // A single-valued group has no sample deviation and is left out.
        let std = aggregate(&data, &config(ChartType::Bar, Aggregation::Std));
        assert_eq!(std.labels, vec!["N"]);
        assert!((std.values()[0] - 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_overflowing_reduction_reverts_with_warning() {
        let data = rows(json!([
            {"region": "N", "sales": 1e308},
            {"region": "N", "sales": 1e308}
        ]));
        for aggregation in [Aggregation::Sum, Aggregation::Average] {
            let chart = aggregate_with_warnings(&data, &config(ChartType::Bar, aggregation));
            assert_eq!(chart.spec.labels, vec!["N", "N"]);
            assert!(chart.spec.values().iter().all(|v| v.is_finite()));
            assert_eq!(chart.warnings.len(), 1);
        }
    }

    #[test]
    fn test_many_groups_keep_first_seen_order() {
        let data: Vec<Row> = (0..50_000)
            .rev()
            .map(|i| json!({"region": format!("r{}", i), "sales": i}).as_object().unwrap().clone())
            .collect();
        let spec = aggregate(&data, &config(ChartType::Bar, Aggregation::Sum));

        assert_eq!(spec.labels.len(), 50_000);
        assert_eq!(spec.labels[0], "r49999");
        assert_eq!(spec.labels[49_999], "r0");
        assert_eq!(spec.values()[0], 49_999.0);
    }

    #[test]
    fn test_null_x_rows_are_dropped() {
        let data = rows(json!([
            {"region": null, "sales": 1},
            {"region": "N", "sales": 2}
        ]));
        for aggregation in [Aggregation::None, Aggregation::Sum] {
            let spec = aggregate(&data, &config(ChartType::Bar, aggregation));
            assert_eq!(spec.labels, vec!["N"]);
            assert_eq!(spec.values(), &[2.0]);
        }
    }

    #[test]
    fn test_serialized_shape() {
        let value = serde_json::to_value(ChartSpec::no_data()).unwrap();
        assert_eq!(value["type"], "bar");
        assert_eq!(value["datasets"][0]["label"], "No Data");
    }
}
