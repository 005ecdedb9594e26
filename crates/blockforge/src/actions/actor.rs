use codeblock_runtime::{
    ActionArgs, ActionDef, ActionRegistry, ActionResult, ExecutionContext, ParamDef, ScriptError,
    ScriptResult,
};
use codeblock_types::{BlockCategory, ItemStack, Parameters, ValueKind, format_number};

use super::require_actor;

/// Highest food level a host accepts
const MAX_FOOD_LEVEL: i64 = 20;

/// Largest stack count a single give may hand out (a full inventory)
const MAX_GIVE_AMOUNT: i64 = 36 * 64;

// ─────────────────────────────────────────────────────────────────────────────
// Actor State Actions
// ─────────────────────────────────────────────────────────────────────────────

pub(super) fn register(registry: &ActionRegistry) {
    registry.register_fn(
        ActionDef::new("set_health", "Set Health", BlockCategory::Action)
            .describe("Set the actor's health, clamped to [0, max health]")
            .param(ParamDef::required("health", ValueKind::Number)),
        |ctx, params| set_health(ctx, params).into(),
    );

    registry.register_fn(
        ActionDef::new("heal", "Heal", BlockCategory::Action)
            .describe("Restore health; heals fully when no amount is given")
            .param(ParamDef::optional("amount", ValueKind::Number)),
        |ctx, params| heal(ctx, params).into(),
    );

    registry.register_fn(
        ActionDef::new("set_food_level", "Set Food Level", BlockCategory::Action)
            .describe("Set the actor's food level, clamped to [0, 20]")
            .param(ParamDef::required("level", ValueKind::Number)),
        |ctx, params| set_food_level(ctx, params).into(),
    );

    registry.register_fn(
        ActionDef::new("teleport", "Teleport", BlockCategory::Action)
            .describe("Move the actor, keeping the height inside the world bounds")
            .param(ParamDef::required("target", ValueKind::Any)),
        |ctx, params| teleport(ctx, params).into(),
    );

    registry.register_fn(
        ActionDef::new("give_item", "Give Item", BlockCategory::Action)
            .describe("Add items to the actor's inventory")
            .param(ParamDef::required("material", ValueKind::Text))
            .param(ParamDef::optional("amount", ValueKind::Number))
            .param(ParamDef::optional("name", ValueKind::Text)),
        |ctx, params| give_item(ctx, params).into(),
    );
}

fn set_health(ctx: &ExecutionContext, params: &Parameters) -> ScriptResult<ActionResult> {
    let actor = require_actor(ctx)?;
    let max = ctx
        .host()
        .max_health(actor)
        .map_err(|e| ScriptError::host("set_health", e))?;
    let health = ActionArgs::new(params).clamped("health", 0.0, max)?;

    ctx.host()
        .set_health(actor, health)
        .map_err(|e| ScriptError::host("set_health", e))?;
    Ok(ActionResult::message(format!("Health set to {}", format_number(health))))
}

fn heal(ctx: &ExecutionContext, params: &Parameters) -> ScriptResult<ActionResult> {
    let actor = require_actor(ctx)?;
    let host = ctx.host();
    let max = host.max_health(actor).map_err(|e| ScriptError::host("heal", e))?;
    let current = host.health(actor).map_err(|e| ScriptError::host("heal", e))?;
    let amount = ActionArgs::new(params).clamped_or("amount", max, 0.0, max)?;

    let health = (current + amount).min(max);
    host.set_health(actor, health)
        .map_err(|e| ScriptError::host("heal", e))?;
    Ok(ActionResult::message(format!("Healed to {}", format_number(health))))
}

fn set_food_level(ctx: &ExecutionContext, params: &Parameters) -> ScriptResult<ActionResult> {
    let actor = require_actor(ctx)?;
    let level =
        ActionArgs::new(params).integer_clamped("level", MAX_FOOD_LEVEL, 0, MAX_FOOD_LEVEL)? as u32;

    ctx.host()
        .set_food_level(actor, level)
        .map_err(|e| ScriptError::host("set_food_level", e))?;
    Ok(ActionResult::message(format!("Food level set to {}", level)))
}

fn teleport(ctx: &ExecutionContext, params: &Parameters) -> ScriptResult<ActionResult> {
    let actor = require_actor(ctx)?;
    let mut target = ActionArgs::new(params).location("target")?;

    let (min_y, max_y) = ctx.host().height_bounds(&target.world);
    target.y = target.y.clamp(min_y, max_y);

    ctx.host()
        .teleport(actor, &target)
        .map_err(|e| ScriptError::host("teleport", e))?;
    Ok(ActionResult::message(format!(
        "Teleported to {} {} {} in {}",
        format_number(target.x),
        format_number(target.y),
        format_number(target.z),
        target.world
    )))
}

fn give_item(ctx: &ExecutionContext, params: &Parameters) -> ScriptResult<ActionResult> {
    let actor = require_actor(ctx)?;
    let args = ActionArgs::new(params);

    let material = args.text("material")?.trim().to_ascii_lowercase();
    if material.is_empty() {
        return Err(ScriptError::validation("material", "material is empty"));
    }
    let amount = args.integer_clamped("amount", 1, 1, MAX_GIVE_AMOUNT)? as u32;

    let mut item = ItemStack::new(material, amount);
    if args.get("name").is_some() {
        item = item.with_name(ctx.interpolate(&args.text("name")?));
    }

    ctx.host()
        .give_item(actor, &item)
        .map_err(|e| ScriptError::host("give_item", e))?;
    Ok(ActionResult::message(format!("Gave {} x{}", item.material, item.amount)))
}
