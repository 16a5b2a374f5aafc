use crate::types::{Condition, ConditionOperator, VariableMap, VariableValue};

/// Evaluate one condition against a variable map.
///
/// An absent field fails the condition unconditionally — including
/// `NotEquals` and `IsFalse`, which a naive reading might expect to pass on
/// a missing key. This is intentional policy, not an oversight: a clause
/// only opts in when the data actually says so.
pub fn evaluate(condition: &Condition, variables: &VariableMap) -> bool {
    let Some(actual) = variables.get(&condition.field) else {
        return false;
    };

    match condition.operator {
        ConditionOperator::Equals => actual == &condition.value,
        ConditionOperator::NotEquals => actual != &condition.value,
        ConditionOperator::Contains => actual
            .as_text()
            .to_lowercase()
            .contains(&condition.value.as_text().to_lowercase()),
        ConditionOperator::GreaterThan => match (actual.as_number(), condition.value.as_number()) {
            (Some(lhs), Some(rhs)) => lhs > rhs,
            _ => false,
        },
        ConditionOperator::LessThan => match (actual.as_number(), condition.value.as_number()) {
            (Some(lhs), Some(rhs)) => lhs < rhs,
            _ => false,
        },
        ConditionOperator::IsTrue => matches!(actual, VariableValue::Bool(true)),
        ConditionOperator::IsFalse => matches!(actual, VariableValue::Bool(false)),
    }
}

/// All conditions must hold (logical AND). An empty list always holds.
pub fn evaluate_all(conditions: &[Condition], variables: &VariableMap) -> bool {
    conditions.iter().all(|c| evaluate(c, variables))
}
