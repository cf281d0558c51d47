//! Condition evaluation for branching nodes.
//!
//! A condition compares a named context variable against a literal value.
//! Evaluation is pure: identical (condition, context) inputs always resolve
//! to the same branch. Comparison is numeric; a missing variable or a
//! non-numeric operand on either side resolves to the `no` branch. That
//! default is part of the contract, not an error.

use crate::context::ExecutionContext;
use crate::edge::Handle;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Comparison operators supported by condition nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl ComparisonOp {
    /// Applies the operator to two numeric operands.
    #[must_use]
    pub fn apply(&self, left: f64, right: f64) -> bool {
        match self {
            Self::GreaterThan => left > right,
            Self::LessThan => left < right,
            Self::GreaterOrEqual => left >= right,
            Self::LessOrEqual => left <= right,
            Self::Equal => left == right,
            Self::NotEqual => left != right,
        }
    }
}

impl std::fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::GreaterOrEqual => ">=",
            Self::LessOrEqual => "<=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
        };
        f.write_str(s)
    }
}

/// The data payload of a condition node, also used as a loop exit condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSpec {
    /// Name of the context variable on the left-hand side.
    pub variable: String,
    /// Comparison operator.
    pub operator: ComparisonOp,
    /// Literal right-hand side.
    pub value: JsonValue,
}

impl ConditionSpec {
    /// Creates a new condition.
    #[must_use]
    pub fn new(variable: impl Into<String>, operator: ComparisonOp, value: JsonValue) -> Self {
        Self {
            variable: variable.into(),
            operator,
            value,
        }
    }
}

/// Resolves a condition against the execution context to a branch handle.
///
/// Both operands are coerced to numbers; JSON numbers and numeric strings
/// are accepted. Anything else, including a missing variable, selects
/// [`Handle::No`].
#[must_use]
pub fn evaluate(condition: &ConditionSpec, context: &ExecutionContext) -> Handle {
    let left = context.get(&condition.variable).and_then(as_number);
    let right = as_number(&condition.value);

    match (left, right) {
        (Some(left), Some(right)) if condition.operator.apply(left, right) => Handle::Yes,
        _ => Handle::No,
    }
}

/// Returns true when the condition resolves to the `yes` branch.
#[must_use]
pub fn holds(condition: &ConditionSpec, context: &ExecutionContext) -> bool {
    evaluate(condition, context) == Handle::Yes
}

fn as_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn score_condition(operator: ComparisonOp, value: i64) -> ConditionSpec {
        ConditionSpec::new("score", operator, json!(value))
    }

    fn context_with_score(score: JsonValue) -> ExecutionContext {
        let mut context = ExecutionContext::new();
        context.set("score", score);
        context
    }

    #[test]
    fn greater_than_selects_yes() {
        let condition = score_condition(ComparisonOp::GreaterThan, 70);
        let context = context_with_score(json!(85));
        assert_eq!(evaluate(&condition, &context), Handle::Yes);
    }

    #[test]
    fn greater_than_selects_no_below_threshold() {
        let condition = score_condition(ComparisonOp::GreaterThan, 70);
        let context = context_with_score(json!(50));
        assert_eq!(evaluate(&condition, &context), Handle::No);
    }

    #[test]
    fn missing_variable_selects_no() {
        let condition = score_condition(ComparisonOp::GreaterThan, 70);
        let context = ExecutionContext::new();
        assert_eq!(evaluate(&condition, &context), Handle::No);
    }

    #[test]
    fn non_numeric_operand_selects_no() {
        let condition = score_condition(ComparisonOp::LessThan, 70);
        let context = context_with_score(json!("alto"));
        assert_eq!(evaluate(&condition, &context), Handle::No);

        let condition = ConditionSpec::new("score", ComparisonOp::Equal, json!(true));
        let context = context_with_score(json!(85));
        assert_eq!(evaluate(&condition, &context), Handle::No);
    }

    #[test]
    fn numeric_string_is_coerced() {
        let condition = score_condition(ComparisonOp::GreaterOrEqual, 100);
        let context = context_with_score(json!("150.00"));
        assert_eq!(evaluate(&condition, &context), Handle::Yes);
    }

    #[test]
    fn equality_and_inequality() {
        let context = context_with_score(json!(42));

        let eq = score_condition(ComparisonOp::Equal, 42);
        assert_eq!(evaluate(&eq, &context), Handle::Yes);

        let ne = score_condition(ComparisonOp::NotEqual, 42);
        assert_eq!(evaluate(&ne, &context), Handle::No);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let condition = score_condition(ComparisonOp::LessOrEqual, 70);
        let context = context_with_score(json!(70));
        let first = evaluate(&condition, &context);
        for _ in 0..10 {
            assert_eq!(evaluate(&condition, &context), first);
        }
    }

    #[test]
    fn operator_serde_uses_symbols() {
        let condition = score_condition(ComparisonOp::GreaterOrEqual, 1);
        let json = serde_json::to_value(&condition).expect("serialize");
        assert_eq!(json["operator"], ">=");

        let parsed: ConditionSpec = serde_json::from_value(json).expect("deserialize");
        assert_eq!(parsed.operator, ComparisonOp::GreaterOrEqual);
    }
}
