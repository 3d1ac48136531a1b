//! Operation-program synthesis and the result-variable contract

use crate::extraction::strip_code_fence;
use crate::intent::{Intent, IntentKind};
use crate::llm_client::TextGenerator;
use crate::profiler::DatasetProfile;
use crate::program::Program;
use crate::{DatafyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Variable a generated program must assign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultVariable {
    TransformedDf,
    StatResult,
}

impl ResultVariable {
    pub fn for_intent(kind: IntentKind) -> Option<Self> {
        match kind {
            IntentKind::Transformation => Some(ResultVariable::TransformedDf),
            IntentKind::Statistical => Some(ResultVariable::StatResult),
            IntentKind::Visualization => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResultVariable::TransformedDf => "transformed_df",
            ResultVariable::StatResult => "stat_result",
        }
    }

    /// Safe default for this contract: a copy of the input or its summary.
    pub fn default_program(&self) -> Program {
        match self {
            ResultVariable::TransformedDf => Program::identity(self.name()),
            ResultVariable::StatResult => Program::describe(self.name()),
        }
    }
}

impl fmt::Display for ResultVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedCode {
    pub text: String,
    pub result_variable: ResultVariable,
    /// Set when the text had to be amended to satisfy the contract.
    pub repaired: bool,
}

impl GeneratedCode {
    /// Code known to satisfy its contract without repair.
    pub fn new(text: impl Into<String>, result_variable: ResultVariable) -> Self {
        Self {
            text: text.into(),
            result_variable,
            repaired: false,
        }
    }
}

/// Make sure `text` assigns `variable`.
///
/// A program missing the assignment gets the default step appended; text
/// that is not a program at all is replaced by the default program. Applying
/// this to its own output changes nothing.
pub fn ensure_contract(text: &str, variable: ResultVariable) -> GeneratedCode {
    let body = strip_code_fence(text);
    match Program::parse(body) {
        Ok(program) if program.assigns(variable.name()) => GeneratedCode::new(body, variable),
        Ok(mut program) => {
            warn!("Program does not assign '{}', appending default step", variable);
            program.steps.extend(variable.default_program().steps);
            GeneratedCode {
                text: program.to_text(),
                result_variable: variable,
                repaired: true,
            }
        }
        Err(reason) => {
            warn!("Replacing unusable program ({}) with default for '{}'", reason, variable);
            GeneratedCode {
                text: variable.default_program().to_text(),
                result_variable: variable,
                repaired: true,
            }
        }
    }
}

pub struct CodeSynthesizer<'a> {
    generator: &'a dyn TextGenerator,
}

impl<'a> CodeSynthesizer<'a> {
    pub fn new(generator: &'a dyn TextGenerator) -> Self {
        Self { generator }
    }

    pub async fn synthesize(
        &self,
        prompt: &str,
        intent: &Intent,
        profile: &DatasetProfile,
        columns: &[String],
        temperature: f32,
    ) -> Result<GeneratedCode> {
        let variable = ResultVariable::for_intent(intent.kind()).ok_or_else(|| {
            DatafyError::CodeGeneration("visualization requests do not synthesize programs".into())
        })?;

        let reply = self
            .generator
            .generate(&program_prompt(prompt, intent, profile, columns, variable), temperature)
            .await
            .map_err(|e| DatafyError::CodeGeneration(e.to_string()))?;
        debug!("Program reply: {}", reply);

        Ok(ensure_contract(&reply, variable))
    }
}

fn program_prompt(
    prompt: &str,
    intent: &Intent,
    profile: &DatasetProfile,
    columns: &[String],
    variable: ResultVariable,
) -> String {
    let operations = match variable {
        ResultVariable::TransformedDf => {
            r#"select{columns}, drop{columns}, rename{from,to}, filter{column,cmp,value} (cmp: eq, ne, gt, ge, lt, le, contains, starts_with, ends_with, is_null, not_null), derive{column,left,operator,right} (operator: add, sub, mul, div; operands {"column": name} or {"value": number}), fill_null{column,value}, distinct{columns}, sort{by,descending}, limit{n}, group_aggregate{by,aggregations:[{column,func,alias}]} (func: sum, average, count, min, max, std, median, count_distinct), join{with,on,how}"#
        }
        ResultVariable::StatResult => {
            r#"any table operation, then one of describe{columns}, correlation{columns}, value_counts{column}, ttest{columns:[a,b]}, ztest{columns:[a,b]}, chi_square{columns:[a,b]}"#
        }
    };

    format!(
        r#"Write an operation program for the following {kind} request ({reason}).

Request: {prompt}

Available columns: {columns}

{context}
The input table is named "df". The program must assign its result to "{variable}".
Available operations: {operations}

Example:
{{"steps": [{{"assign": "{variable}", "from": "df", "ops": [{{"op": "filter", "column": "sales", "cmp": "gt", "value": 100}}]}}]}}

Provide only the JSON program, no explanations."#,
        kind = intent.kind(),
        reason = intent.reason(),
        prompt = prompt,
        columns = columns.join(", "),
        context = profile.to_prompt_context(),
        variable = variable,
        operations = operations,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::TransformationType;
    use crate::llm_client::ScriptedGenerator;

    #[test]
    fn test_complete_program_is_untouched() {
        let text = r#"{"steps": [{"assign": "transformed_df", "ops": [{"op": "limit", "n": 1}]}]}"#;
        let code = ensure_contract(&format!("```json\n{}\n```", text), ResultVariable::TransformedDf);

        assert_eq!(code.text, text);
        assert!(!code.repaired);
    }

    #[test]
    fn test_missing_assignment_is_appended() {
        let code = ensure_contract(r#"[{"assign": "tmp"}]"#, ResultVariable::StatResult);
        let program = Program::parse(&code.text).unwrap();

        assert!(code.repaired);
        assert_eq!(program.steps.len(), 2);
        assert!(program.assigns("stat_result"));
    }

    #[test]
    fn test_free_form_code_is_replaced() {
        let code = ensure_contract("result = df.groupby('a').sum()", ResultVariable::TransformedDf);
        assert!(code.repaired);
        assert_eq!(
            Program::parse(&code.text).unwrap(),
            Program::identity("transformed_df")
        );
    }

    #[test]
    fn test_repair_is_idempotent() {
        let once = ensure_contract("nonsense", ResultVariable::StatResult);
        let twice = ensure_contract(&once.text, ResultVariable::StatResult);
        assert_eq!(once.text, twice.text);
        assert!(!twice.repaired);
    }

    #[tokio::test]
    async fn test_synthesizer_names_the_contract() {
        let generator = ScriptedGenerator::new([r#"[{"assign": "transformed_df"}]"#]);
        let intent = Intent::Transformation {
            operation: TransformationType::Select,
            reason: "r".into(),
        };
        let code = CodeSynthesizer::new(&generator)
            .synthesize("keep it", &intent, &DatasetProfile::default(), &["a".into()], 0.3)
            .await
            .unwrap();

        assert_eq!(code.result_variable, ResultVariable::TransformedDf);
        assert!(generator.prompts()[0].contains("\"transformed_df\""));
    }

    #[tokio::test]
    async fn test_generation_failure_is_code_generation_error() {
        let generator = ScriptedGenerator::empty();
        let intent = Intent::heuristic("describe the data");
        let err = CodeSynthesizer::new(&generator)
            .synthesize("describe", &intent, &DatasetProfile::default(), &[], 0.3)
            .await
            .unwrap_err();
        assert!(matches!(err, DatafyError::CodeGeneration(_)));
    }
}
