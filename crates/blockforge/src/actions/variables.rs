use codeblock_runtime::{
    ActionArgs, ActionDef, ActionRegistry, ActionResult, ExecutionContext, ParamDef, ScriptError,
    ScriptResult, ScopeKey,
};
use codeblock_types::{
    BlockCategory, DataValue, Parameters, ValueKind, VariableScope, format_number,
};

// ─────────────────────────────────────────────────────────────────────────────
// Variable Actions
// ─────────────────────────────────────────────────────────────────────────────

pub(super) fn register(registry: &ActionRegistry) {
    registry.register_fn(
        ActionDef::new("set_variable", "Set Variable", BlockCategory::Action)
            .describe("Store a value in a variable scope (local by default)")
            .param(ParamDef::required("name", ValueKind::Text))
            .param(ParamDef::required("value", ValueKind::Any))
            .param(ParamDef::optional("scope", ValueKind::Text)),
        |ctx, params| set_variable(ctx, params).into(),
    );

    registry.register_fn(
        ActionDef::new("increment_variable", "Increment Variable", BlockCategory::Action)
            .describe("Add to a numeric variable, treating a missing one as 0")
            .param(ParamDef::required("name", ValueKind::Text))
            .param(ParamDef::optional("amount", ValueKind::Number))
            .param(ParamDef::optional("scope", ValueKind::Text)),
        |ctx, params| increment_variable(ctx, params).into(),
    );

    registry.register_fn(
        ActionDef::new("delete_variable", "Delete Variable", BlockCategory::Action)
            .describe("Remove a variable from a scope")
            .param(ParamDef::required("name", ValueKind::Text))
            .param(ParamDef::optional("scope", ValueKind::Text)),
        |ctx, params| delete_variable(ctx, params).into(),
    );
}

/// Variable name and writable storage key from the block parameters
fn target(
    ctx: &ExecutionContext,
    args: &ActionArgs,
) -> ScriptResult<(String, VariableScope, ScopeKey)> {
    let name = ctx.interpolate(&args.text("name")?);
    if name.trim().is_empty() {
        return Err(ScriptError::validation("name", "variable name is empty"));
    }
    let scope = args.scope_or("scope", VariableScope::Local)?;
    if scope == VariableScope::Dynamic {
        return Err(ScriptError::validation("scope", "dynamic variables are read-only"));
    }
    Ok((name, scope, ctx.scope_key(scope)?))
}

fn set_variable(ctx: &ExecutionContext, params: &Parameters) -> ScriptResult<ActionResult> {
    let args = ActionArgs::new(params);
    let (name, scope, key) = target(ctx, &args)?;

    let value = match args.require("value")? {
        DataValue::Text(text) => DataValue::Text(ctx.interpolate(text)),
        other => other.clone(),
    };
    ctx.variables().set(key, &name, value);

    Ok(ActionResult::message(format!("Set {} variable {}", scope, name)))
}

fn increment_variable(ctx: &ExecutionContext, params: &Parameters) -> ScriptResult<ActionResult> {
    let args = ActionArgs::new(params);
    let (name, scope, key) = target(ctx, &args)?;
    let amount = args.number_or("amount", 1.0)?;

    if let Some(current) = ctx.variables().get(key, &name) {
        // Fail before writing so a non-numeric variable is left as is
        current.as_number()?;
    }
    let value = ctx.variables().increment(key, &name, amount).ok_or_else(|| {
        ScriptError::validation("amount", format!("{} would overflow {}", amount, name))
    })?;

    Ok(ActionResult::message(format!(
        "{} variable {} is now {}",
        scope,
        name,
        format_number(value)
    )))
}

fn delete_variable(ctx: &ExecutionContext, params: &Parameters) -> ScriptResult<ActionResult> {
    let args = ActionArgs::new(params);
    let (name, scope, key) = target(ctx, &args)?;

    Ok(match ctx.variables().remove(key, &name) {
        Some(_) => ActionResult::message(format!("Deleted {} variable {}", scope, name)),
        None => ActionResult::ok(),
    })
}
