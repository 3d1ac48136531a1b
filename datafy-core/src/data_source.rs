//! Data source abstractions for loading tables

use crate::table::{ColumnType, Field, Row, Table};
use crate::{DatafyError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, info};

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").expect("valid regex"));

/// Configuration for different data sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DataSourceConfig {
    CSV {
        path: PathBuf,
        delimiter: Option<u8>,
        has_headers: bool,
    },
    Memory {
        data: Vec<Value>,
    },
}

/// Represents a data source that can be loaded into a [`Table`]
#[derive(Debug, Clone)]
pub struct DataSource {
    config: DataSourceConfig,
    clean_column_names: bool,
    row_limit: Option<usize>,
}

impl DataSource {
    /// Create a new data source
    pub fn new(config: DataSourceConfig) -> Self {
        Self {
            config,
            clean_column_names: false,
            row_limit: None,
        }
    }

    /// Create a CSV data source
    pub fn csv(path: PathBuf) -> Self {
        Self::new(DataSourceConfig::CSV {
            path,
            delimiter: Some(b','),
            has_headers: true,
        })
    }

    /// Create an in-memory data source from JSON objects
    pub fn memory(data: Vec<Value>) -> Self {
        Self::new(DataSourceConfig::Memory { data })
    }

    /// Normalise column names while loading
    pub fn with_clean_column_names(mut self, clean: bool) -> Self {
        self.clean_column_names = clean;
        self
    }

    pub fn with_row_limit(mut self, limit: usize) -> Self {
        self.row_limit = Some(limit);
        self
    }

    /// Load the whole source into a table
    pub async fn load(&self) -> Result<Table> {
        let (headers, rows) = match &self.config {
            DataSourceConfig::CSV {
                path,
                delimiter,
                has_headers,
            } => {
                info!("Loading CSV data from {}", path.display());
                let bytes = tokio::fs::read(path).await?;
                parse_csv(&bytes, delimiter.unwrap_or(b','), *has_headers, self.row_limit)?
            }
            DataSourceConfig::Memory { data } => {
                let limit = self.row_limit.unwrap_or(usize::MAX);
                let values = data.iter().take(limit).cloned().collect();
                (Vec::new(), Table::from_values(values)?.into_rows())
            }
        };

        let table = if rows.is_empty() && !headers.is_empty() {
            // No records: the header row alone carries the schema.
            let template: Row = headers.into_iter().map(|h| (h, Value::Null)).collect();
            let template = if self.clean_column_names {
                rename_columns(vec![template])
            } else {
                vec![template]
            };
            let fields = template
                .iter()
                .flat_map(|row| row.keys())
                .map(|name| Field::new(name.clone(), ColumnType::Null))
                .collect();
            Table::with_schema(fields, Vec::new())
        } else if self.clean_column_names {
            Table::from_rows(rename_columns(rows))
        } else {
            Table::from_rows(rows)
        };
        debug!(
            "Loaded table with {} rows and columns {:?}",
            table.len(),
            table.columns()
        );
        Ok(table)
    }
}

fn parse_csv(
    bytes: &[u8],
    delimiter: u8,
    has_headers: bool,
    row_limit: Option<usize>,
) -> Result<(Vec<String>, Vec<Row>)> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(has_headers)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = if has_headers {
        reader.headers()?.iter().map(|h| h.to_string()).collect()
    } else {
        Vec::new()
    };

    let mut rows = Vec::new();
    for record in reader.records() {
        if row_limit.is_some_and(|limit| rows.len() >= limit) {
            break;
        }
        let record = record?;
        let mut row = Row::new();
        for (index, cell) in record.iter().enumerate() {
            let name = headers
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("column_{}", index + 1));
            row.insert(name, parse_cell(cell));
        }
        for name in headers.iter().skip(record.len()) {
            row.insert(name.clone(), Value::Null);
        }
        rows.push(row);
    }

    if rows.is_empty() && headers.is_empty() {
        return Err(DatafyError::InvalidDataFormat(
            "CSV input has no header and no records".into(),
        ));
    }

    Ok((headers, rows))
}

/// Parse one CSV cell the way a tabular reader would: empty is null,
/// integer/float/boolean literals become typed values, the rest stays text.
pub fn parse_cell(cell: &str) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(cell.to_string()),
    }
}

/// `"Unit Price ($)"` → `"unit_price"`
pub fn clean_column_name(name: &str) -> String {
    NON_WORD
        .replace_all(name, "")
        .trim()
        .to_lowercase()
        .replace(' ', "_")
}

fn rename_columns(rows: Vec<Row>) -> Vec<Row> {
    let mut mapping: Vec<(String, String)> = Vec::new();

    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .map(|(key, value)| {
                    if let Some((_, cleaned)) = mapping.iter().find(|(k, _)| *k == key) {
                        return (cleaned.clone(), value);
                    }
                    let base = clean_column_name(&key);
                    let base = if base.is_empty() { "column".to_string() } else { base };
                    let mut cleaned = base.clone();
                    let mut suffix = 2;
                    while mapping.iter().any(|(_, c)| *c == cleaned) {
                        cleaned = format!("{}_{}", base, suffix);
                        suffix += 1;
                    }
                    mapping.push((key, cleaned.clone()));
                    (cleaned, value)
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::ResultVariable;
    use crate::fallback::FallbackPolicy;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_clean_column_name() {
        assert_eq!(clean_column_name("Unit Price ($)"), "unit_price");
        assert_eq!(clean_column_name("  Region "), "region");
        assert_eq!(clean_column_name("sales"), "sales");
    }

    #[test]
    fn test_parse_cell() {
        assert_eq!(parse_cell(""), Value::Null);
        assert_eq!(parse_cell("42"), json!(42));
        assert_eq!(parse_cell("4.5"), json!(4.5));
        assert_eq!(parse_cell("TRUE"), json!(true));
        assert_eq!(parse_cell("North"), json!("North"));
    }

    #[tokio::test]
    async fn test_header_only_csv_keeps_columns() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Region,Total Sales").unwrap();
        file.flush().unwrap();

        let table = DataSource::csv(file.path().to_path_buf())
            .with_clean_column_names(true)
            .load()
            .await
            .unwrap();
        assert_eq!(table.columns(), vec!["region", "total_sales"]);
        assert!(table.is_empty());
        let fallback = FallbackPolicy::default().default_result(ResultVariable::TransformedDf, &table);
        assert_eq!(fallback.unwrap(), json!([]));

        let limited = DataSource::csv(file.path().to_path_buf())
            .with_row_limit(0)
            .load()
            .await
            .unwrap();
        assert_eq!(limited.columns(), vec!["Region", "Total Sales"]);
    }

    #[tokio::test]
    async fn test_load_csv_with_clean_names() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Region,Total Sales,Note").unwrap();
        writeln!(file, "N,10,").unwrap();
        writeln!(file, "S,20.5,late").unwrap();
        file.flush().unwrap();

        let table = DataSource::csv(file.path().to_path_buf())
            .with_clean_column_names(true)
            .load()
            .await
            .unwrap();

        assert_eq!(table.columns(), vec!["region", "total_sales", "note"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0]["total_sales"], json!(10));
        assert_eq!(table.rows()[0]["note"], Value::Null);
    }

    #[tokio::test]
    async fn test_memory_source_row_limit() {
        let table = DataSource::memory(vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 3})])
            .with_row_limit(2)
            .load()
            .await
            .unwrap();
        assert_eq!(table.len(), 2);
    }
}
