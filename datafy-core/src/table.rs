//! In-memory dataset handle shared by every pipeline stage

use crate::{DatafyError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt;

/// One record: column name to cell value, in schema order.
pub type Row = Map<String, Value>;

/// Formats accepted as date-like text when declaring column types.
const TEMPORAL_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%Y/%m/%d"];

/// Declared column type, fixed once when the table is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    String,
    Datetime,
    Null,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::String => "string",
            ColumnType::Datetime => "datetime",
            ColumnType::Null => "null",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub declared_type: ColumnType,
}

impl Field {
    pub fn new(name: impl Into<String>, declared_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            declared_type,
        }
    }
}

/// Ordered rows of named fields with a declared schema
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    fields: Vec<Field>,
    rows: Vec<Row>,
}

impl Table {
    /// Build a table from rows, declaring column types from the values.
    ///
    /// Columns appear in first-seen key order; rows missing a column get a
    /// null cell so every row carries the full schema.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut names: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !names.iter().any(|n| n == key) {
                    names.push(key.clone());
                }
            }
        }

        let rows: Vec<Row> = rows
            .into_iter()
            .map(|mut row| {
                let mut conformed = Row::with_capacity(names.len());
                for name in &names {
                    conformed.insert(name.clone(), row.remove(name).unwrap_or(Value::Null));
                }
                conformed
            })
            .collect();

        let fields = names
            .into_iter()
            .map(|name| {
                let declared_type = infer_type(rows.iter().map(|r| &r[name.as_str()]));
                Field { name, declared_type }
            })
            .collect();

        Self { fields, rows }
    }

    /// Build a table from JSON values; every value must be an object.
    pub fn from_values(values: Vec<Value>) -> Result<Self> {
        let rows = values
            .into_iter()
            .enumerate()
            .map(|(index, value)| match value {
                Value::Object(map) => Ok(map),
                other => Err(DatafyError::InvalidDataFormat(format!(
                    "row {} is not an object: {}",
                    index, other
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_rows(rows))
    }

    /// Build a table with an explicit schema. The caller guarantees each row
    /// carries exactly the schema's columns.
    pub fn with_schema(fields: Vec<Field>, rows: Vec<Row>) -> Self {
        Self { fields, rows }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn columns(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_count(&self) -> usize {
        self.fields.len()
    }

    /// Values of one column in row order; absent cells read as null.
    pub fn column_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.rows.iter().map(move |row| row.get(name).unwrap_or(&Value::Null))
    }

    pub fn truncate(&mut self, limit: usize) {
        self.rows.truncate(limit);
    }

    /// Rows as a JSON array of objects.
    pub fn to_value(&self) -> Value {
        Value::Array(self.rows.iter().cloned().map(Value::Object).collect())
    }
}

/// Declare a column type from its values.
pub fn infer_type<'a>(values: impl Iterator<Item = &'a Value>) -> ColumnType {
    let mut declared: Option<ColumnType> = None;

    for value in values {
        let this = match value {
            Value::Null => continue,
            Value::Number(n) if n.is_i64() || n.is_u64() => ColumnType::Integer,
            Value::Number(_) => ColumnType::Float,
            Value::Bool(_) => ColumnType::Boolean,
            Value::String(s) if is_date_like(s) => ColumnType::Datetime,
            _ => ColumnType::String,
        };

        declared = Some(match (declared, this) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some(ColumnType::Integer), ColumnType::Float)
            | (Some(ColumnType::Float), ColumnType::Integer) => ColumnType::Float,
            _ => ColumnType::String,
        });

        if declared == Some(ColumnType::String) {
            break;
        }
    }

    declared.unwrap_or(ColumnType::Null)
}

pub fn is_date_like(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return false;
    }
    DateTime::parse_from_rfc3339(text).is_ok()
        || TEMPORAL_FORMATS
            .iter()
            .any(|f| NaiveDateTime::parse_from_str(text, f).is_ok())
        || DATE_FORMATS
            .iter()
            .any(|f| NaiveDate::parse_from_str(text, f).is_ok())
}

/// Coerce a cell to a finite number: numbers, numeric text and booleans.
pub fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// Text form of a cell, used for labels and grouping keys.
pub fn label_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// JSON number for a float; non-finite values become null.
pub fn json_number(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: Value) -> Table {
        Table::from_values(values.as_array().unwrap().clone()).unwrap()
    }

    #[test]
    fn test_from_rows_conforms_schema() {
        let table = rows(json!([
            {"region": "N", "sales": 10},
            {"sales": 2.5, "note": "late"}
        ]));

        assert_eq!(table.columns(), vec!["region", "sales", "note"]);
        assert_eq!(table.rows()[1]["region"], Value::Null);
        assert_eq!(table.field("sales").unwrap().declared_type, ColumnType::Float);
        assert_eq!(table.field("region").unwrap().declared_type, ColumnType::String);
    }

    #[test]
    fn test_infer_types() {
        let table = rows(json!([
            {"id": 1, "day": "2024-01-02", "ok": true, "empty": null},
            {"id": 2, "day": "2024-01-03", "ok": false, "empty": null}
        ]));

        assert_eq!(table.field("id").unwrap().declared_type, ColumnType::Integer);
        assert_eq!(table.field("day").unwrap().declared_type, ColumnType::Datetime);
        assert_eq!(table.field("ok").unwrap().declared_type, ColumnType::Boolean);
        assert_eq!(table.field("empty").unwrap().declared_type, ColumnType::Null);
    }

    #[test]
    fn test_from_values_rejects_scalars() {
        let err = Table::from_values(vec![json!({"a": 1}), json!(3)]).unwrap_err();
        assert!(matches!(err, DatafyError::InvalidDataFormat(_)));
    }

    #[test]
    fn test_number_coercion() {
        assert_eq!(as_number(&json!("10")), Some(10.0));
        assert_eq!(as_number(&json!(" 2.5 ")), Some(2.5));
        assert_eq!(as_number(&json!("abc")), None);
        assert_eq!(as_number(&json!("NaN")), None);
        assert_eq!(as_number(&Value::Null), None);
        assert_eq!(json_number(f64::NAN), Value::Null);
    }
}
