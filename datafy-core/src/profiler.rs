//! Dataset profiling used to ground generation

use crate::table::{ColumnType, Row, Table};
use crate::{DatafyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tracing::warn;

pub const DEFAULT_SAMPLE_SIZE: usize = 5;

/// Coarse column kind presented to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Categorical,
    Datetime,
}

impl From<ColumnType> for ColumnKind {
    fn from(declared: ColumnType) -> Self {
        match declared {
            ColumnType::Integer | ColumnType::Float => ColumnKind::Numeric,
            ColumnType::Datetime => ColumnKind::Datetime,
            ColumnType::Boolean | ColumnType::String | ColumnType::Null => ColumnKind::Categorical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub declared_type: ColumnType,
    pub kind: ColumnKind,
    pub null_count: usize,
}

/// Compact structural summary of a dataset
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatasetProfile {
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<ColumnProfile>,
    pub sample_rows: Vec<Row>,
    /// Set when profiling failed and only this error text is available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DatasetProfile {
    pub fn degraded(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }

    pub fn columns_of_kind(&self, kind: ColumnKind) -> impl Iterator<Item = &ColumnProfile> {
        self.columns.iter().filter(move |c| c.kind == kind)
    }

    /// Text block handed to the model as dataset context
    pub fn to_prompt_context(&self) -> String {
        if let Some(error) = &self.error {
            return format!("Dataset profile unavailable: {}", error);
        }

        let mut out = String::new();
        let _ = writeln!(
            out,
            "Dataset shape: {} rows x {} columns",
            self.row_count, self.column_count
        );
        let _ = writeln!(out, "Columns:");
        for column in &self.columns {
            let _ = writeln!(
                out,
                "- {} ({}, {:?}, {} nulls)",
                column.name, column.declared_type, column.kind, column.null_count
            );
        }
        let numeric: Vec<&str> = self
            .columns_of_kind(ColumnKind::Numeric)
            .map(|c| c.name.as_str())
            .collect();
        if !numeric.is_empty() {
            let _ = writeln!(out, "Numeric columns: {}", numeric.join(", "));
        }
        if !self.sample_rows.is_empty() {
            let _ = writeln!(out, "Sample rows:");
            for row in &self.sample_rows {
                let line = serde_json::to_string(row).unwrap_or_default();
                let _ = writeln!(out, "{}", line);
            }
        }
        out
    }
}

pub struct DataProfiler {
    sample_size: usize,
}

impl Default for DataProfiler {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_SIZE)
    }
}

impl DataProfiler {
    pub fn new(sample_size: usize) -> Self {
        Self { sample_size }
    }

    /// Profile a table. Never fails: on error the profile only carries the
    /// error text and the pipeline continues with reduced context.
    pub fn profile(&self, table: &Table) -> DatasetProfile {
        match self.try_profile(table) {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Profiling failed, continuing with degraded profile: {}", e);
                DatasetProfile::degraded(e.to_string())
            }
        }
    }

    fn try_profile(&self, table: &Table) -> Result<DatasetProfile> {
        for (index, row) in table.rows().iter().enumerate() {
            if let Some(key) = row.keys().find(|k| !table.has_column(k)) {
                return Err(DatafyError::InvalidDataFormat(format!(
                    "row {} carries undeclared column '{}'",
                    index, key
                )));
            }
        }

        // Kinds come from the declared schema, only null counts touch the values.
        let columns = table
            .fields()
            .iter()
            .map(|field| ColumnProfile {
                name: field.name.clone(),
                declared_type: field.declared_type,
                kind: field.declared_type.into(),
                null_count: table.column_values(&field.name).filter(|v| v.is_null()).count(),
            })
            .collect();

        Ok(DatasetProfile {
            row_count: table.len(),
            column_count: table.column_count(),
            columns,
            sample_rows: table.rows().iter().take(self.sample_size).cloned().collect(),
            error: None,
        })
    }
}
