use codeblock_runtime::{
    ActionArgs, ActionDef, ActionRegistry, ActionResult, ExecutionContext, ParamDef, ScriptError,
    ScriptResult,
};
use codeblock_types::{BlockCategory, Parameters, ValueKind};

use super::require_actor;

// ─────────────────────────────────────────────────────────────────────────────
// Messaging Actions
// ─────────────────────────────────────────────────────────────────────────────

pub(super) fn register(registry: &ActionRegistry) {
    registry.register_fn(
        ActionDef::new("send_message", "Send Message", BlockCategory::Action)
            .describe("Send a chat message to the triggering actor")
            .param(ParamDef::required("message", ValueKind::Text)),
        |ctx, params| send_message(ctx, params).into(),
    );

    registry.register_fn(
        ActionDef::new("broadcast", "Broadcast", BlockCategory::Action)
            .describe("Send a message to every online actor")
            .param(ParamDef::required("message", ValueKind::Text)),
        |ctx, params| broadcast(ctx, params).into(),
    );
}

fn send_message(ctx: &ExecutionContext, params: &Parameters) -> ScriptResult<ActionResult> {
    let args = ActionArgs::new(params);
    let actor = require_actor(ctx)?;
    let message = ctx.interpolate(&args.text("message")?);

    ctx.host()
        .send_message(actor, &message)
        .map_err(|e| ScriptError::host("send_message", e))?;

    let name = ctx
        .host()
        .actor_name(actor)
        .unwrap_or_else(|| actor.to_string());
    Ok(ActionResult::message(format!("Sent message to {}", name)))
}

fn broadcast(ctx: &ExecutionContext, params: &Parameters) -> ScriptResult<ActionResult> {
    let message = ctx.interpolate(&ActionArgs::new(params).text("message")?);
    ctx.host().broadcast(&message);
    Ok(ActionResult::message("Broadcast sent"))
}
