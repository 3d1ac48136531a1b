//! Deterministic substitutes used when generation or execution fails

use crate::chart_config::{validate, ChartConfig, RawChartConfig};
use crate::codegen::{ensure_contract, GeneratedCode, ResultVariable};
use crate::executor::SandboxedExecutor;
use crate::table::Table;
use crate::{DatafyError, Result};
use serde_json::Value;
use tracing::warn;

/// Intent-specific fallbacks. Every operation is idempotent.
#[derive(Debug, Clone, Default)]
pub struct FallbackPolicy {
    executor: SandboxedExecutor,
}

impl FallbackPolicy {
    pub fn new(executor: SandboxedExecutor) -> Self {
        Self { executor }
    }

    /// Chart configuration built from nothing but the column list.
    pub fn chart_config(&self, columns: &[String]) -> ChartConfig {
        validate(&RawChartConfig::default(), columns)
    }

    /// Bring code back under its contract. A no-op on its own output.
    pub fn repair_code(&self, code: &GeneratedCode) -> GeneratedCode {
        let repaired = ensure_contract(&code.text, code.result_variable);
        GeneratedCode {
            repaired: code.repaired || repaired.repaired,
            ..repaired
        }
    }

    /// Value of the default program for `variable`: a copy of the table for
    /// transformations, its descriptive summary for statistics.
    ///
    /// Fails with [`DatafyError::ResultShape`] when the table cannot yield a
    /// well-formed result.
    pub fn default_result(&self, variable: ResultVariable, table: &Table) -> Result<Value> {
        if table.column_count() == 0 {
            return Err(DatafyError::ResultShape("dataset has no columns".into()));
        }
        if variable == ResultVariable::StatResult && table.is_empty() {
            return Err(DatafyError::ResultShape(
                "cannot summarise a dataset without rows".into(),
            ));
        }

        let code = GeneratedCode::new(variable.default_program().to_text(), variable);
        self.executor
            .execute(&code, table)
            .into_result()
            .map_err(|e| DatafyError::ResultShape(e.to_string()))
    }

    /// Run code under its contract, repairing it first. Failures come back as
    /// [`DatafyError::Execution`] so the caller can take the default result.
    pub fn execute(&self, code: &GeneratedCode, table: &Table) -> Result<Value> {
        let code = self.repair_code(code);
        self.executor
            .execute(&code, table)
            .into_result()
            .map_err(|e| {
                warn!("Program for '{}' failed: {}", code.result_variable, e);
                DatafyError::Execution(e.to_string())
            })
    }
}
