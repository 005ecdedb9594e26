use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use codeblock_runtime::{
    ActionArgs, ActionDef, ActionRegistry, ActionResult, ExecutionContext, ParamDef, ScriptError,
    ScriptResult,
};
use codeblock_types::{BlockCategory, DataValue, Parameters, ValueKind, VariableScope};

use super::require_actor;

// ─────────────────────────────────────────────────────────────────────────────
// Comparison
// ─────────────────────────────────────────────────────────────────────────────

/// Operator of a comparison condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    NotEqual,
    Greater,
    Less,
    GreaterOrEqual,
    LessOrEqual,
    /// Substring for text, membership for lists
    Contains,
}

impl FromStr for Comparison {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "==" | "=" | "eq" | "equals" => Ok(Comparison::Equal),
            "!=" | "ne" | "not_equals" => Ok(Comparison::NotEqual),
            ">" | "gt" => Ok(Comparison::Greater),
            "<" | "lt" => Ok(Comparison::Less),
            ">=" | "ge" => Ok(Comparison::GreaterOrEqual),
            "<=" | "le" => Ok(Comparison::LessOrEqual),
            "contains" => Ok(Comparison::Contains),
            other => Err(ScriptError::validation(
                "operator",
                format!("unknown operator '{}'", other),
            )),
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Comparison::Equal => "==",
            Comparison::NotEqual => "!=",
            Comparison::Greater => ">",
            Comparison::Less => "<",
            Comparison::GreaterOrEqual => ">=",
            Comparison::LessOrEqual => "<=",
            Comparison::Contains => "contains",
        })
    }
}

/// Evaluate `left <op> right`
///
/// Ordering operators are false when the values are not comparable.
pub fn compare(left: &DataValue, op: Comparison, right: &DataValue) -> bool {
    match op {
        Comparison::Equal => left.loosely_equals(right),
        Comparison::NotEqual => !left.loosely_equals(right),
        Comparison::Greater => left.compare(right) == Some(Ordering::Greater),
        Comparison::Less => left.compare(right) == Some(Ordering::Less),
        Comparison::GreaterOrEqual => matches!(
            left.compare(right),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Comparison::LessOrEqual => {
            matches!(left.compare(right), Some(Ordering::Less | Ordering::Equal))
        }
        Comparison::Contains => match left {
            DataValue::List(items) => items.iter().any(|item| item.loosely_equals(right)),
            other => match (other.as_text(), right.as_string()) {
                (Some(haystack), Ok(needle)) => haystack
                    .to_lowercase()
                    .contains(&needle.to_lowercase()),
                _ => false,
            },
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Condition Actions
// ─────────────────────────────────────────────────────────────────────────────

pub(super) fn register(registry: &ActionRegistry) {
    registry.register_fn(
        ActionDef::new("if_variable", "If Variable", BlockCategory::Condition)
            .describe("Compare a variable against a value")
            .param(ParamDef::required("name", ValueKind::Text))
            .param(ParamDef::optional("operator", ValueKind::Text))
            .param(ParamDef::required("value", ValueKind::Any))
            .param(ParamDef::optional("scope", ValueKind::Text)),
        |ctx, params| if_variable(ctx, params).into(),
    );

    registry.register_fn(
        ActionDef::new("if_health", "If Health", BlockCategory::Condition)
            .describe("Compare the actor's health against a number")
            .param(ParamDef::optional("operator", ValueKind::Text))
            .param(ParamDef::required("value", ValueKind::Number)),
        |ctx, params| if_health(ctx, params).into(),
    );

    registry.register_fn(
        ActionDef::new("has_item", "Has Item", BlockCategory::Condition)
            .describe("Whether the actor carries at least `amount` of a material")
            .param(ParamDef::required("material", ValueKind::Text))
            .param(ParamDef::optional("amount", ValueKind::Number)),
        |ctx, params| has_item(ctx, params).into(),
    );

    registry.register_fn(
        ActionDef::new("is_online", "Is Online", BlockCategory::Condition)
            .describe("Whether an actor (the triggering one by default) is online")
            .param(ParamDef::optional("actor", ValueKind::Actor)),
        |ctx, params| is_online(ctx, params).into(),
    );
}

fn operator(args: &ActionArgs) -> ScriptResult<Comparison> {
    args.text_or("operator", "==")?.parse()
}

fn if_variable(ctx: &ExecutionContext, params: &Parameters) -> ScriptResult<ActionResult> {
    let args = ActionArgs::new(params);
    let name = ctx.interpolate(&args.text("name")?);
    let op = operator(&args)?;

    let variable = match args.get("scope") {
        Some(_) => {
            let scope = args.scope_or("scope", VariableScope::Local)?;
            ctx.variables().resolve_with_scopes(&name, ctx.id(), &[scope])
        }
        None => ctx.variables().resolve(&name, ctx.id()),
    };
    let left = variable.map(|v| v.value).unwrap_or_default();

    let right = match args.require("value")? {
        DataValue::Text(text) => DataValue::Text(ctx.interpolate(text)),
        other => other.clone(),
    };

    Ok(ActionResult::branch(compare(&left, op, &right)))
}

fn if_health(ctx: &ExecutionContext, params: &Parameters) -> ScriptResult<ActionResult> {
    let args = ActionArgs::new(params);
    let actor = require_actor(ctx)?;
    let op = operator(&args)?;
    let expected = args.number("value")?;

    let health = ctx
        .host()
        .health(actor)
        .map_err(|e| ScriptError::host("if_health", e))?;
    Ok(ActionResult::branch(compare(
        &DataValue::Number(health),
        op,
        &DataValue::Number(expected),
    )))
}

fn has_item(ctx: &ExecutionContext, params: &Parameters) -> ScriptResult<ActionResult> {
    let args = ActionArgs::new(params);
    let actor = require_actor(ctx)?;
    let material = args.text("material")?;
    let amount = args.integer_clamped("amount", 1, 1, i64::from(u32::MAX))? as u32;

    let held = ctx
        .host()
        .count_item(actor, material.trim())
        .map_err(|e| ScriptError::host("has_item", e))?;
    Ok(ActionResult::branch(held >= amount))
}

fn is_online(ctx: &ExecutionContext, params: &Parameters) -> ScriptResult<ActionResult> {
    let args = ActionArgs::new(params);
    let actor = match args.get("actor") {
        Some(value) => Some(
            value
                .as_actor()
                .ok_or_else(|| ScriptError::validation("actor", "expected an actor"))?,
        ),
        None => ctx.actor(),
    };

    Ok(ActionResult::branch(
        actor.is_some_and(|actor| ctx.host().is_online(actor)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operators() {
        assert_eq!("==".parse::<Comparison>().unwrap(), Comparison::Equal);
        assert_eq!(" >= ".parse::<Comparison>().unwrap(), Comparison::GreaterOrEqual);
        assert_eq!("CONTAINS".parse::<Comparison>().unwrap(), Comparison::Contains);
        assert!("~=".parse::<Comparison>().is_err());
    }

    #[test]
    fn test_numeric_comparisons_coerce_text() {
        let five = DataValue::Number(5.0);
        assert!(compare(&five, Comparison::Equal, &DataValue::from("5")));
        assert!(compare(&five, Comparison::Greater, &DataValue::Number(4.5)));
        assert!(compare(&five, Comparison::LessOrEqual, &DataValue::from("5.0")));
        assert!(!compare(&five, Comparison::Less, &DataValue::Number(5.0)));
    }

    #[test]
    fn test_incomparable_ordering_is_false() {
        let list = DataValue::List(vec![DataValue::Number(1.0)]);
        assert!(!compare(&list, Comparison::Greater, &DataValue::Number(0.0)));
        assert!(!compare(&list, Comparison::LessOrEqual, &DataValue::Number(0.0)));
    }

    #[test]
    fn test_contains() {
        let text = DataValue::from("Hello World");
        assert!(compare(&text, Comparison::Contains, &DataValue::from("world")));
        assert!(!compare(&text, Comparison::Contains, &DataValue::from("moon")));

        let list = DataValue::List(vec![DataValue::from("a"), DataValue::Number(2.0)]);
        assert!(compare(&list, Comparison::Contains, &DataValue::from("2")));
        assert!(!compare(&list, Comparison::Contains, &DataValue::from("b")));
    }

    #[test]
    fn test_missing_variable_is_null() {
        let missing = DataValue::default();
        assert!(compare(&missing, Comparison::NotEqual, &DataValue::from("x")));
    }
}
