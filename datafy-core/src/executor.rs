//! Sandboxed interpreter for operation programs
//!
//! The namespace holds only the input copy (`df`) and variables assigned by
//! earlier steps. The operation set has no way to reach files, the network
//! or the process.

use crate::codegen::{GeneratedCode, ResultVariable};
use crate::normalize::normalize_value;
use crate::program::{
    AggregateFunction, AggregateSpec, Arithmetic, Comparison, JoinKind, Operand, Operation, Program,
    INPUT_VARIABLE,
};
use crate::stats;
use crate::table::{as_number, infer_type, json_number, label_text, Field, Row, Table};
use crate::{DatafyError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorLimits {
    pub max_statements: usize,
    pub max_operations_per_statement: usize,
    /// Ceiling on rows any join may produce
    pub max_rows: usize,
}

impl Default for ExecutorLimits {
    fn default() -> Self {
        Self {
            max_statements: 32,
            max_operations_per_statement: 16,
            max_rows: 100_000,
        }
    }
}

/// Outcome of one sandboxed run; exactly one of `value` and `error` is set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn succeeded(value: Value) -> Self {
        Self {
            success: true,
            value: Some(value),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            value: None,
            error: Some(error.into()),
        }
    }

    pub fn into_result(self) -> Result<Value> {
        match (self.value, self.error) {
            (Some(value), None) => Ok(value),
            (_, error) => Err(DatafyError::Execution(
                error.unwrap_or_else(|| "execution produced no value".into()),
            )),
        }
    }
}

/// Bound value in the sandbox namespace
#[derive(Debug, Clone, PartialEq)]
enum Frame {
    Table(Table),
    Value(Value),
}

impl Frame {
    fn into_value(self) -> Value {
        match self {
            Frame::Table(table) => table.to_value(),
            Frame::Value(value) => value,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SandboxedExecutor {
    limits: ExecutorLimits,
}

impl SandboxedExecutor {
    pub fn new(limits: ExecutorLimits) -> Self {
        Self { limits }
    }

    /// Run `code` against a copy of `table` and capture its result variable.
    /// Never panics or returns early with an error; failures are reported in
    /// the [`ExecutionResult`].
    pub fn execute(&self, code: &GeneratedCode, table: &Table) -> ExecutionResult {
        match self.run(code, table) {
            Ok(value) => ExecutionResult::succeeded(normalize_value(value)),
            Err(error) => {
                warn!("Sandboxed execution failed: {}", error);
                ExecutionResult::failed(error)
            }
        }
    }

    fn run(&self, code: &GeneratedCode, table: &Table) -> std::result::Result<Value, String> {
        let program = Program::parse(&code.text)?;
        self.check_limits(&program)?;

        let mut namespace: HashMap<String, Frame> = HashMap::new();
        namespace.insert(INPUT_VARIABLE.to_string(), Frame::Table(table.clone()));

        for step in &program.steps {
            let mut frame = namespace
                .get(&step.from)
                .cloned()
                .ok_or_else(|| format!("'{}' is not defined", step.from))?;
            for op in &step.ops {
                frame = self.apply(frame, op, &namespace)?;
            }
            debug!("Bound '{}'", step.assign);
            namespace.insert(step.assign.clone(), frame);
        }

        let variable = code.result_variable.name();
        match (code.result_variable, namespace.remove(variable)) {
            (_, None) => Err(format!("program did not assign '{}'", variable)),
            (ResultVariable::TransformedDf, Some(Frame::Value(_))) => Err(format!(
                "'{}' must hold a table, found a statistical result",
                variable
            )),
            (_, Some(frame)) => Ok(frame.into_value()),
        }
    }

    fn check_limits(&self, program: &Program) -> std::result::Result<(), String> {
        if program.steps.len() > self.limits.max_statements {
            return Err(format!(
                "program has {} statements, limit is {}",
                program.steps.len(),
                self.limits.max_statements
            ));
        }
        if let Some(step) = program
            .steps
            .iter()
            .find(|s| s.ops.len() > self.limits.max_operations_per_statement)
        {
            return Err(format!(
                "statement '{}' has {} operations, limit is {}",
                step.assign,
                step.ops.len(),
                self.limits.max_operations_per_statement
            ));
        }
        Ok(())
    }

    fn apply(
        &self,
        frame: Frame,
        op: &Operation,
        namespace: &HashMap<String, Frame>,
    ) -> std::result::Result<Frame, String> {
        let Frame::Table(table) = frame else {
            return Err(format!("{:?} needs a table, found a statistical result", op));
        };

        let result = match op {
            Operation::Select { columns } => select(table, columns)?,
            Operation::Drop { columns } => drop_columns(table, columns)?,
            Operation::Rename { from, to } => rename(table, from, to)?,
            Operation::Filter { column, cmp, value } => filter(table, column, *cmp, value)?,
            Operation::Derive {
                column,
                left,
                operator,
                right,
            } => derive(table, column, left, *operator, right)?,
            Operation::FillNull { column, value } => fill_null(table, column.as_deref(), value)?,
            Operation::Distinct { columns } => distinct(table, columns.as_deref())?,
            Operation::Sort { by, descending } => sort(table, by, *descending)?,
            Operation::Limit { n } => {
                let mut table = table;
                table.truncate(*n);
                table
            }
            Operation::GroupAggregate { by, aggregations } => group_aggregate(table, by, aggregations)?,
            Operation::Join { with, on, how } => {
                let right = match namespace.get(with) {
                    Some(Frame::Table(right)) => right,
                    Some(Frame::Value(_)) => return Err(format!("join target '{}' is not a table", with)),
                    None => return Err(format!("join target '{}' is not defined", with)),
                };
                join(&table, right, on, *how, self.limits.max_rows)?
            }
            Operation::Describe { columns } => return stats::describe(&table, columns.as_deref()).map(Frame::Value),
            Operation::Correlation { columns } => {
                return stats::correlation(&table, columns.as_deref()).map(Frame::Value)
            }
            Operation::ValueCounts { column } => return stats::value_counts(&table, column).map(Frame::Value),
            Operation::Ttest { columns } => return stats::welch_ttest(&table, columns).map(Frame::Value),
            Operation::Ztest { columns } => return stats::ztest(&table, columns).map(Frame::Value),
            Operation::ChiSquare { columns } => return stats::chi_square(&table, columns).map(Frame::Value),
        };
        Ok(Frame::Table(result))
    }
}

fn require(table: &Table, columns: &[String]) -> std::result::Result<(), String> {
    match columns.iter().find(|c| !table.has_column(c)) {
        Some(missing) => Err(format!("unknown column '{}'", missing)),
        None => Ok(()),
    }
}

/// Declared type recomputed from the column's current values.
fn declare(name: &str, rows: &[Row]) -> Field {
    Field::new(name, infer_type(rows.iter().map(|r| r.get(name).unwrap_or(&Value::Null))))
}

fn select(table: Table, columns: &[String]) -> std::result::Result<Table, String> {
    require(&table, columns)?;
    let fields = columns
        .iter()
        .filter_map(|c| table.field(c).cloned())
        .collect();
    let rows = table
        .into_rows()
        .into_iter()
        .map(|mut row| {
            columns
                .iter()
                .map(|c| (c.clone(), row.remove(c).unwrap_or(Value::Null)))
                .collect()
        })
        .collect();
    Ok(Table::with_schema(fields, rows))
}

fn drop_columns(table: Table, columns: &[String]) -> std::result::Result<Table, String> {
    require(&table, columns)?;
    let keep: Vec<String> = table
        .columns()
        .into_iter()
        .filter(|c| !columns.contains(c))
        .collect();
    select(table, &keep)
}

fn rename(table: Table, from: &str, to: &str) -> std::result::Result<Table, String> {
    require(&table, &[from.to_string()])?;
    if from != to && table.has_column(to) {
        return Err(format!("column '{}' already exists", to));
    }
    let swap = |name: &str| if name == from { to.to_string() } else { name.to_string() };
    let fields = table
        .fields()
        .iter()
        .map(|f| Field::new(swap(&f.name), f.declared_type))
        .collect();
    let rows = table
        .into_rows()
        .into_iter()
        .map(|row| row.into_iter().map(|(k, v)| (swap(&k), v)).collect())
        .collect();
    Ok(Table::with_schema(fields, rows))
}

fn equals(cell: &Value, value: &Value) -> bool {
    if cell.is_null() || value.is_null() {
        return cell.is_null() && value.is_null();
    }
    match (as_number(cell), as_number(value)) {
        (Some(a), Some(b)) => a == b,
        _ => label_text(cell) == label_text(value),
    }
}

/// Numbers compare numerically, anything else by its text; nulls are unordered.
fn order(cell: &Value, value: &Value) -> Option<Ordering> {
    if cell.is_null() || value.is_null() {
        return None;
    }
    match (as_number(cell), as_number(value)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => Some(label_text(cell).cmp(&label_text(value))),
    }
}

/// Text predicates are case-insensitive.
fn satisfies(cell: &Value, cmp: Comparison, value: &Value) -> bool {
    let text = |v: &Value| label_text(v).to_lowercase();
    match cmp {
        Comparison::IsNull => cell.is_null(),
        Comparison::NotNull => !cell.is_null(),
        Comparison::Eq => equals(cell, value),
        Comparison::Ne => !equals(cell, value),
        Comparison::Gt => order(cell, value) == Some(Ordering::Greater),
        Comparison::Ge => matches!(order(cell, value), Some(Ordering::Greater | Ordering::Equal)),
        Comparison::Lt => order(cell, value) == Some(Ordering::Less),
        Comparison::Le => matches!(order(cell, value), Some(Ordering::Less | Ordering::Equal)),
        Comparison::Contains => !cell.is_null() && text(cell).contains(&text(value)),
        Comparison::StartsWith => !cell.is_null() && text(cell).starts_with(&text(value)),
        Comparison::EndsWith => !cell.is_null() && text(cell).ends_with(&text(value)),
    }
}

fn filter(table: Table, column: &str, cmp: Comparison, value: &Value) -> std::result::Result<Table, String> {
    require(&table, &[column.to_string()])?;
    let fields = table.fields().to_vec();
    let rows = table
        .into_rows()
        .into_iter()
        .filter(|row| satisfies(row.get(column).unwrap_or(&Value::Null), cmp, value))
        .collect();
    Ok(Table::with_schema(fields, rows))
}

fn operand(row: &Row, operand: &Operand) -> Option<f64> {
    match operand {
        Operand::Column { column } => row.get(column).and_then(as_number),
        Operand::Literal { value } => Some(*value),
    }
}

/// Compute `column` per row; rows where the expression fails get null.
fn derive(
    table: Table,
    column: &str,
    left: &Operand,
    operator: Arithmetic,
    right: &Operand,
) -> std::result::Result<Table, String> {
    for side in [left, right] {
        if let Operand::Column { column } = side {
            require(&table, &[column.clone()])?;
        }
    }
    let mut fields: Vec<Field> = table.fields().to_vec();
    let rows: Vec<Row> = table
        .into_rows()
        .into_iter()
        .map(|mut row| {
            let value = operand(&row, left)
                .zip(operand(&row, right))
                .and_then(|(l, r)| operator.apply(l, r))
                .map(json_number)
                .unwrap_or(Value::Null);
            row.insert(column.to_string(), value);
            row
        })
        .collect();

    let field = declare(column, &rows);
    match fields.iter_mut().find(|f| f.name == column) {
        Some(existing) => *existing = field,
        None => fields.push(field),
    }
    Ok(Table::with_schema(fields, rows))
}

fn fill_null(table: Table, column: Option<&str>, value: &Value) -> std::result::Result<Table, String> {
    let targets: Vec<String> = match column {
        Some(column) => {
            require(&table, &[column.to_string()])?;
            vec![column.to_string()]
        }
        None => table.columns(),
    };
    let fields = table.fields().to_vec();
    let rows: Vec<Row> = table
        .into_rows()
        .into_iter()
        .map(|mut row| {
            for target in &targets {
                if let Some(cell) = row.get_mut(target) {
                    if cell.is_null() {
                        *cell = value.clone();
                    }
                }
            }
            row
        })
        .collect();
    let fields = fields
        .into_iter()
        .map(|f| if targets.contains(&f.name) { declare(&f.name, &rows) } else { f })
        .collect();
    Ok(Table::with_schema(fields, rows))
}

/// Composite key over `columns`; `None` when any part is null.
fn row_key(row: &Row, columns: &[String]) -> Option<String> {
    let parts: Vec<&Value> = columns
        .iter()
        .map(|c| row.get(c).unwrap_or(&Value::Null))
        .collect();
    if parts.iter().any(|v| v.is_null()) {
        return None;
    }
    serde_json::to_string(&parts).ok()
}

fn distinct(table: Table, columns: Option<&[String]>) -> std::result::Result<Table, String> {
    let columns = match columns {
        Some(columns) => {
            require(&table, columns)?;
            columns.to_vec()
        }
        None => table.columns(),
    };
    let fields = table.fields().to_vec();
    let mut seen = HashSet::new();
    let rows = table
        .into_rows()
        .into_iter()
        .filter(|row| {
            let parts: Vec<&Value> = columns
                .iter()
                .map(|c| row.get(c).unwrap_or(&Value::Null))
                .collect();
            serde_json::to_string(&parts)
                .map(|key| seen.insert(key))
                .unwrap_or(true)
        })
        .collect();
    Ok(Table::with_schema(fields, rows))
}

/// Stable sort; nulls go last in either direction.
fn sort(table: Table, by: &[String], descending: bool) -> std::result::Result<Table, String> {
    require(&table, by)?;
    let fields = table.fields().to_vec();
    let mut rows = table.into_rows();
    rows.sort_by(|a, b| {
        for column in by {
            let x = a.get(column).unwrap_or(&Value::Null);
            let y = b.get(column).unwrap_or(&Value::Null);
            let ordering = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => {
                    let o = order(x, y).unwrap_or(Ordering::Equal);
                    if descending {
                        o.reverse()
                    } else {
                        o
                    }
                }
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    Ok(Table::with_schema(fields, rows))
}

fn reduce(func: AggregateFunction, column: &str, values: &[&Value]) -> std::result::Result<Value, String> {
    let present: Vec<&Value> = values.iter().copied().filter(|v| !v.is_null()).collect();
    match func {
        AggregateFunction::Count => return Ok(Value::from(present.len())),
        AggregateFunction::CountDistinct => {
            let distinct: HashSet<String> = present.iter().map(|v| label_text(v)).collect();
            return Ok(Value::from(distinct.len()));
        }
        _ => {}
    }

    let numbers = present
        .iter()
        .map(|v| as_number(v).ok_or_else(|| format!("column '{}' holds non-numeric value {}", column, v)))
        .collect::<std::result::Result<Vec<f64>, String>>()?;

    let reduced = match func {
        AggregateFunction::Sum => Some(numbers.iter().sum::<f64>()),
        AggregateFunction::Average => stats::mean(&numbers),
        AggregateFunction::Min => numbers.iter().copied().reduce(f64::min),
        AggregateFunction::Max => numbers.iter().copied().reduce(f64::max),
        AggregateFunction::Std => stats::sample_std(&numbers),
        AggregateFunction::Median => stats::median(&numbers),
        AggregateFunction::Count | AggregateFunction::CountDistinct => None,
    };
    Ok(reduced.map(json_number).unwrap_or(Value::Null))
}

/// Groups appear in first-seen order; rows with a null key are dropped.
fn group_aggregate(
    table: Table,
    by: &[String],
    aggregations: &[AggregateSpec],
) -> std::result::Result<Table, String> {
    require(&table, by)?;
    require(
        &table,
        &aggregations.iter().map(|a| a.column.clone()).collect::<Vec<_>>(),
    )?;

    let mut first_seen: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&Row>> = HashMap::new();
    for row in table.rows() {
        let Some(key) = row_key(row, by) else { continue };
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                first_seen.push(key);
                Vec::new()
            })
            .push(row);
    }

    let mut rows: Vec<Row> = Vec::with_capacity(first_seen.len());
    for key in &first_seen {
        let members = &groups[key];
        let mut out = Row::new();
        for column in by {
            out.insert(column.clone(), members[0].get(column).cloned().unwrap_or(Value::Null));
        }
        for spec in aggregations {
            let values: Vec<&Value> = members
                .iter()
                .map(|r| r.get(&spec.column).unwrap_or(&Value::Null))
                .collect();
            out.insert(spec.output_name(), reduce(spec.func, &spec.column, &values)?);
        }
        rows.push(out);
    }

    let mut fields: Vec<Field> = by.iter().filter_map(|c| table.field(c).cloned()).collect();
    fields.extend(aggregations.iter().map(|a| declare(&a.output_name(), &rows)));
    Ok(Table::with_schema(fields, rows))
}

/// Key-equality join; right-hand columns clashing with left ones get `_right`.
fn join(
    left: &Table,
    right: &Table,
    on: &[String],
    how: JoinKind,
    max_rows: usize,
) -> std::result::Result<Table, String> {
    if on.is_empty() {
        return Err("join needs at least one key column".into());
    }
    require(left, on)?;
    require(right, on)?;

    let extra: Vec<(String, Field)> = right
        .fields()
        .iter()
        .filter(|f| !on.contains(&f.name))
        .map(|f| {
            let name = if left.has_column(&f.name) {
                format!("{}_right", f.name)
            } else {
                f.name.clone()
            };
            (f.name.clone(), Field::new(name, f.declared_type))
        })
        .collect();

    let mut index: HashMap<String, Vec<&Row>> = HashMap::new();
    for row in right.rows() {
        if let Some(key) = row_key(row, on) {
            index.entry(key).or_default().push(row);
        }
    }

    let mut rows: Vec<Row> = Vec::new();
    for row in left.rows() {
        let matched = row_key(row, on).and_then(|key| index.get(&key));
        match matched {
            Some(partners) => {
                for partner in partners {
                    let mut out = row.clone();
                    for (source, field) in &extra {
                        out.insert(field.name.clone(), partner.get(source).cloned().unwrap_or(Value::Null));
                    }
                    rows.push(out);
                }
            }
            None if how == JoinKind::Left => {
                let mut out = row.clone();
                for (_, field) in &extra {
                    out.insert(field.name.clone(), Value::Null);
                }
                rows.push(out);
            }
            None => {}
        }
        if rows.len() > max_rows {
            return Err(format!("join produced more than {} rows", max_rows));
        }
    }

    let mut fields = left.fields().to_vec();
    fields.extend(extra.into_iter().map(|(_, field)| field));
    Ok(Table::with_schema(fields, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sales() -> Table {
        Table::from_values(
            json!([
                {"region": "N", "sales": 10, "units": 1},
                {"region": "S", "sales": 20, "units": 2},
                {"region": "N", "sales": 5, "units": null}
            ])
            .as_array()
            .unwrap()
            .clone(),
        )
        .unwrap()
    }

    fn run(program: Value, variable: ResultVariable) -> ExecutionResult {
        SandboxedExecutor::default().execute(&GeneratedCode::new(program.to_string(), variable), &sales())
    }

    #[test]
    fn test_identity_returns_input_rows() {
        let result = run(json!([{"assign": "transformed_df"}]), ResultVariable::TransformedDf);
        assert_eq!(result.value, Some(sales().to_value()));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_transformation_must_end_as_table() {
        let result = run(
            json!([{"assign": "transformed_df", "ops": [{"op": "describe"}]}]),
            ResultVariable::TransformedDf,
        );
        assert!(result.value.is_none());
        assert!(result.error.unwrap().contains("must hold a table"));

        let stats = run(
            json!([{"assign": "stat_result", "ops": [{"op": "describe"}]}]),
            ResultVariable::StatResult,
        );
        assert!(stats.error.is_none());
    }

    #[test]
    fn test_filter_sort_select() {
        let result = run(
            json!([{"assign": "transformed_df", "ops": [
                {"op": "filter", "column": "sales", "cmp": "ge", "value": "10"},
                {"op": "sort", "by": ["sales"], "descending": true},
                {"op": "select", "columns": ["region"]}
            ]}]),
            ResultVariable::TransformedDf,
        );
        assert_eq!(result.value, Some(json!([{"region": "S"}, {"region": "N"}])));
    }

    #[test]
    fn test_group_aggregate() {
        let result = run(
            json!([{"assign": "transformed_df", "ops": [
                {"op": "group_aggregate", "by": ["region"], "aggregations": [
                    {"column": "sales", "func": "sum", "alias": "total"},
                    {"column": "units", "func": "count"}
                ]}
            ]}]),
            ResultVariable::TransformedDf,
        );
        assert_eq!(
            result.value,
            Some(json!([
                {"region": "N", "total": 15.0, "units_count": 1},
                {"region": "S", "total": 20.0, "units_count": 1}
            ]))
        );
    }

    #[test]
    fn test_derive_and_rename() {
        let result = run(
            json!([{"assign": "transformed_df", "ops": [
                {"op": "derive", "column": "per_unit", "left": {"column": "sales"}, "operator": "div", "right": {"column": "units"}},
                {"op": "rename", "from": "per_unit", "to": "price"},
                {"op": "drop", "columns": ["units"]}
            ]}]),
            ResultVariable::TransformedDf,
        );
        let rows = result.value.unwrap();
        assert_eq!(rows[0], json!({"region": "N", "sales": 10, "price": 10.0}));
        assert_eq!(rows[2]["price"], Value::Null);
    }

    #[test]
    fn test_join_between_steps() {
        let result = run(
            json!([
                {"assign": "totals", "ops": [
                    {"op": "group_aggregate", "by": ["region"], "aggregations": [{"column": "sales", "func": "max"}]}
                ]},
                {"assign": "transformed_df", "ops": [
                    {"op": "join", "with": "totals", "on": ["region"], "how": "left"},
                    {"op": "limit", "n": 1}
                ]}
            ]),
            ResultVariable::TransformedDf,
        );
        assert_eq!(
            result.value,
            Some(json!([{"region": "N", "sales": 10, "units": 1, "sales_max": 10.0}]))
        );
    }

    #[test]
    fn test_statistical_result() {
        let result = run(
            json!([{"assign": "stat_result", "ops": [{"op": "value_counts", "column": "region"}]}]),
            ResultVariable::StatResult,
        );
        assert_eq!(result.value, Some(json!({"N": 2, "S": 1})));
    }

    #[test]
    fn test_table_op_after_statistic_fails() {
        let result = run(
            json!([{"assign": "stat_result", "ops": [{"op": "describe"}, {"op": "limit", "n": 1}]}]),
            ResultVariable::StatResult,
        );
        assert!(!result.success);
        assert!(result.value.is_none());
    }

    #[test]
    fn test_missing_result_variable_is_reported() {
        let result = run(json!([{"assign": "other"}]), ResultVariable::TransformedDf);
        assert_eq!(result.error.as_deref(), Some("program did not assign 'transformed_df'"));
        assert!(matches!(result.into_result(), Err(DatafyError::Execution(_))));
    }

    #[test]
    fn test_limits_are_enforced() {
        let executor = SandboxedExecutor::new(ExecutorLimits {
            max_statements: 1,
            ..Default::default()
        });
        let code = GeneratedCode::new(
            json!([{"assign": "a"}, {"assign": "transformed_df"}]).to_string(),
            ResultVariable::TransformedDf,
        );
        assert!(!executor.execute(&code, &sales()).success);
    }

    #[test]
    fn test_input_is_not_mutated() {
        let table = sales();
        let code = GeneratedCode::new(
            json!([{"assign": "transformed_df", "ops": [{"op": "fill_null", "value": 0}]}]).to_string(),
            ResultVariable::TransformedDf,
        );
        let result = SandboxedExecutor::default().execute(&code, &table);

        assert_eq!(result.value.unwrap()[2]["units"], json!(0));
        assert_eq!(table, sales());
    }
}
