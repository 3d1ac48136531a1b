//! Request boundary: everything entering the pipeline is validated here

use crate::table::Table;
use crate::{DatafyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use validator::{Validate, ValidationError};

pub const DEFAULT_TEMPERATURE: f32 = 0.5;
const COMBINED_PREFIX: &str = "(Combined multiple files)";

/// A natural-language analytics request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAnalysisRequest")]
pub struct AnalysisRequest {
    prompt: String,
    columns: Vec<String>,
    temperature: f32,
}

/// Wire shape, checked before it becomes an [`AnalysisRequest`]
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RawAnalysisRequest {
    #[validate(custom = "validate_prompt")]
    pub prompt: String,
    #[validate(custom = "validate_columns")]
    pub columns: Vec<String>,
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn validate_prompt(prompt: &str) -> std::result::Result<(), ValidationError> {
    if prompt.trim().is_empty() {
        return Err(ValidationError::new("empty_prompt"));
    }
    Ok(())
}

fn validate_columns(columns: &Vec<String>) -> std::result::Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for column in columns {
        if column.trim().is_empty() {
            return Err(ValidationError::new("empty_column_name"));
        }
        if !seen.insert(column.as_str()) {
            return Err(ValidationError::new("duplicate_column_name"));
        }
    }
    Ok(())
}

impl TryFrom<RawAnalysisRequest> for AnalysisRequest {
    type Error = DatafyError;

    fn try_from(raw: RawAnalysisRequest) -> Result<Self> {
        raw.validate()
            .map_err(|e| DatafyError::InvalidRequest(e.to_string()))?;
        if raw.temperature.is_nan() {
            return Err(DatafyError::InvalidRequest("temperature is not a number".into()));
        }
        Ok(Self {
            prompt: raw.prompt.trim().to_string(),
            columns: raw.columns,
            temperature: raw.temperature,
        })
    }
}

impl AnalysisRequest {
    pub fn new(prompt: impl Into<String>, columns: Vec<String>, temperature: f32) -> Result<Self> {
        Self::try_from(RawAnalysisRequest {
            prompt: prompt.into(),
            columns,
            temperature,
        })
    }

    /// Request over every column of `table`, default temperature.
    pub fn for_table(prompt: impl Into<String>, table: &Table) -> Result<Self> {
        Self::new(prompt, table.columns(), DEFAULT_TEMPERATURE)
    }

    /// Mark a prompt that runs over several uploaded files merged together.
    pub fn combined(mut self) -> Self {
        if !self.prompt.starts_with(COMBINED_PREFIX) {
            self.prompt = format!("{} {}", COMBINED_PREFIX, self.prompt);
        }
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }
}
