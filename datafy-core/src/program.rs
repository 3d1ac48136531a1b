//! Typed operation programs: the only logic the executor will run

use crate::extraction::strip_code_fence;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name bound to the private copy of the input table.
pub const INPUT_VARIABLE: &str = "df";

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

fn input_variable() -> String {
    INPUT_VARIABLE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub steps: Vec<Statement>,
}

/// `assign = from |> ops...`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub assign: String,
    #[serde(default = "input_variable")]
    pub from: String,
    #[serde(default)]
    pub ops: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Select {
        columns: Vec<String>,
    },
    Drop {
        columns: Vec<String>,
    },
    Rename {
        from: String,
        to: String,
    },
    Filter {
        column: String,
        cmp: Comparison,
        #[serde(default)]
        value: Value,
    },
    Derive {
        column: String,
        left: Operand,
        operator: Arithmetic,
        right: Operand,
    },
    FillNull {
        #[serde(default)]
        column: Option<String>,
        value: Value,
    },
    Distinct {
        #[serde(default)]
        columns: Option<Vec<String>>,
    },
    Sort {
        by: Vec<String>,
        #[serde(default)]
        descending: bool,
    },
    Limit {
        n: usize,
    },
    GroupAggregate {
        by: Vec<String>,
        aggregations: Vec<AggregateSpec>,
    },
    Join {
        with: String,
        on: Vec<String>,
        #[serde(default)]
        how: JoinKind,
    },
    Describe {
        #[serde(default)]
        columns: Option<Vec<String>>,
    },
    Correlation {
        #[serde(default)]
        columns: Option<Vec<String>>,
    },
    ValueCounts {
        column: String,
    },
    Ttest {
        columns: Vec<String>,
    },
    Ztest {
        columns: Vec<String>,
    },
    ChiSquare {
        columns: Vec<String>,
    },
}

impl Operation {
    /// Statistical operations turn a table into a mapping.
    pub fn is_statistical(&self) -> bool {
        matches!(
            self,
            Operation::Describe { .. }
                | Operation::Correlation { .. }
                | Operation::ValueCounts { .. }
                | Operation::Ttest { .. }
                | Operation::Ztest { .. }
                | Operation::ChiSquare { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    #[serde(alias = "==", alias = "=")]
    Eq,
    #[serde(alias = "!=")]
    Ne,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Ge,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Le,
    Contains,
    StartsWith,
    EndsWith,
    IsNull,
    NotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arithmetic {
    #[serde(alias = "+")]
    Add,
    #[serde(alias = "-")]
    Sub,
    #[serde(alias = "*")]
    Mul,
    #[serde(alias = "/")]
    Div,
}

impl Arithmetic {
    pub fn apply(self, left: f64, right: f64) -> Option<f64> {
        let result = match self {
            Arithmetic::Add => left + right,
            Arithmetic::Sub => left - right,
            Arithmetic::Mul => left * right,
            Arithmetic::Div if right == 0.0 => return None,
            Arithmetic::Div => left / right,
        };
        result.is_finite().then_some(result)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Column { column: String },
    Literal { value: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub column: String,
    pub func: AggregateFunction,
    #[serde(default)]
    pub alias: Option<String>,
}

impl AggregateSpec {
    /// Output column name: the alias, else `<column>_<func>`.
    pub fn output_name(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.column, self.func.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Sum,
    #[serde(alias = "mean", alias = "avg")]
    Average,
    Count,
    Min,
    Max,
    Std,
    Median,
    #[serde(alias = "nunique")]
    CountDistinct,
}

impl AggregateFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "sum",
            AggregateFunction::Average => "average",
            AggregateFunction::Count => "count",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Std => "std",
            AggregateFunction::Median => "median",
            AggregateFunction::CountDistinct => "count_distinct",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProgramDocument {
    Steps { steps: Vec<Statement> },
    Bare(Vec<Statement>),
}

impl Program {
    /// Parse program text, with or without a markdown fence, and check its
    /// variable references.
    pub fn parse(text: &str) -> Result<Self, String> {
        let body = strip_code_fence(text);
        let document: ProgramDocument =
            serde_json::from_str(body).map_err(|e| format!("not an operation program: {}", e))?;
        let steps = match document {
            ProgramDocument::Steps { steps } | ProgramDocument::Bare(steps) => steps,
        };
        let program = Program { steps };
        program.check_bindings()?;
        Ok(program)
    }

    /// One step binding `variable` to an unmodified copy of the input.
    pub fn identity(variable: &str) -> Self {
        Self {
            steps: vec![Statement::new(variable, Vec::new())],
        }
    }

    /// One step binding `variable` to the descriptive summary of the input.
    pub fn describe(variable: &str) -> Self {
        Self {
            steps: vec![Statement::new(
                variable,
                vec![Operation::Describe { columns: None }],
            )],
        }
    }

    /// Whether some step assigns `variable`.
    pub fn assigns(&self, variable: &str) -> bool {
        self.steps.iter().any(|s| s.assign == variable)
    }

    pub fn operation_count(&self) -> usize {
        self.steps.iter().map(|s| s.ops.len()).sum()
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| String::from("{\"steps\":[]}"))
    }

    fn check_bindings(&self) -> Result<(), String> {
        let mut bound: Vec<&str> = vec![INPUT_VARIABLE];
        for (index, step) in self.steps.iter().enumerate() {
            if !IDENTIFIER.is_match(&step.assign) {
                return Err(format!("step {}: '{}' is not an identifier", index, step.assign));
            }
            if step.assign == INPUT_VARIABLE {
                return Err(format!("step {}: '{}' cannot be reassigned", index, INPUT_VARIABLE));
            }
            if !bound.contains(&step.from.as_str()) {
                return Err(format!("step {}: '{}' is not defined", index, step.from));
            }
            for op in &step.ops {
                if let Operation::Join { with, .. } = op {
                    if !bound.contains(&with.as_str()) {
                        return Err(format!("step {}: join target '{}' is not defined", index, with));
                    }
                }
            }
            bound.push(&step.assign);
        }
        Ok(())
    }
}

impl Statement {
    pub fn new(assign: &str, ops: Vec<Operation>) -> Self {
        Self {
            assign: assign.to_string(),
            from: input_variable(),
            ops,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_and_bare_forms() {
        let object = r#"{"steps": [{"assign": "out", "ops": [{"op": "limit", "n": 2}]}]}"#;
        let bare = r#"[{"assign": "out", "from": "df", "ops": [{"op": "limit", "n": 2}]}]"#;

        let a = Program::parse(object).unwrap();
        assert_eq!(a, Program::parse(bare).unwrap());
        assert_eq!(a.steps[0].from, "df");
        assert_eq!(a.steps[0].ops, vec![Operation::Limit { n: 2 }]);
    }

    #[test]
    fn test_parse_fenced_program_with_aliases() {
        let text = "```json\n{\"steps\": [{\"assign\": \"t\", \"ops\": [\
            {\"op\": \"filter\", \"column\": \"sales\", \"cmp\": \">=\", \"value\": 10},\
            {\"op\": \"group_aggregate\", \"by\": [\"region\"], \"aggregations\": [{\"column\": \"sales\", \"func\": \"mean\"}]}\
        ]}]}\n```";
        let program = Program::parse(text).unwrap();

        match &program.steps[0].ops[1] {
            Operation::GroupAggregate { aggregations, .. } => {
                assert_eq!(aggregations[0].func, AggregateFunction::Average);
                assert_eq!(aggregations[0].output_name(), "sales_average");
            }
            other => panic!("unexpected op: {:?}", other),
        }
        assert!(matches!(
            program.steps[0].ops[0],
            Operation::Filter { cmp: Comparison::Ge, .. }
        ));
    }

    #[test]
    fn test_derive_operands() {
        let program = Program::parse(
            r#"[{"assign": "t", "ops": [{"op": "derive", "column": "margin",
                "left": {"column": "revenue"}, "operator": "-", "right": {"value": 3}}]}]"#,
        )
        .unwrap();
        assert_eq!(
            program.steps[0].ops[0],
            Operation::Derive {
                column: "margin".into(),
                left: Operand::Column { column: "revenue".into() },
                operator: Arithmetic::Sub,
                right: Operand::Literal { value: 3.0 },
            }
        );
    }

    #[test]
    fn test_bindings_are_checked() {
        assert!(Program::parse(r#"[{"assign": "a", "from": "b"}]"#).is_err());
        assert!(Program::parse(r#"[{"assign": "df"}]"#).is_err());
        assert!(Program::parse(r#"[{"assign": "not valid"}]"#).is_err());
        assert!(Program::parse(
            r#"[{"assign": "a", "ops": [{"op": "join", "with": "later", "on": ["id"]}]}]"#
        )
        .is_err());
        assert!(Program::parse(r#"[{"assign": "a"}, {"assign": "b", "from": "a"}]"#).is_ok());
    }

    #[test]
    fn test_python_is_not_a_program() {
        assert!(Program::parse("transformed_df = df.copy()").is_err());
        assert!(Program::parse(r#"{"steps": [{"assign": "x", "ops": [{"op": "exec"}]}]}"#).is_err());
    }

    #[test]
    fn test_repair_programs() {
        let identity = Program::identity("transformed_df");
        assert!(identity.assigns("transformed_df"));
        assert_eq!(identity.operation_count(), 0);
        assert_eq!(Program::parse(&identity.to_text()).unwrap(), identity);

        assert!(Program::describe("stat_result").steps[0].ops[0].is_statistical());
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(Arithmetic::Div.apply(1.0, 0.0), None);
        assert_eq!(Arithmetic::Mul.apply(2.0, 3.5), Some(7.0));
    }
}
