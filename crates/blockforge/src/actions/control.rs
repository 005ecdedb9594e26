use codeblock_runtime::{
    ActionArgs, ActionDef, ActionRegistry, ActionResult, ExecutionContext, LoopOwner, LoopRequest,
    ParamDef, ScriptError, ScriptResult,
};
use codeblock_types::{BlockCategory, Parameters, ValueKind};

// ─────────────────────────────────────────────────────────────────────────────
// Control Actions
// ─────────────────────────────────────────────────────────────────────────────

pub(super) fn register(registry: &ActionRegistry) {
    registry.register_fn(
        ActionDef::new("repeat", "Repeat", BlockCategory::Control)
            .describe("Run the children every `delay` ticks; `times` of -1 repeats until the cap")
            .param(ParamDef::optional("times", ValueKind::Number))
            .param(ParamDef::optional("delay", ValueKind::Number)),
        |ctx, params| repeat(ctx, params).into(),
    );

    registry.register_fn(
        ActionDef::new("group", "Group", BlockCategory::Control)
            .describe("Run the children once, in order, before continuing"),
        |ctx, _| group(ctx),
    );

    registry.register_fn(
        ActionDef::new("cancel_loops", "Cancel Loops", BlockCategory::Control)
            .describe("Cancel the loops of the triggering actor, or every loop with `all`")
            .param(ParamDef::optional("all", ValueKind::Boolean)),
        |ctx, params| cancel_loops(ctx, params).into(),
    );

    registry.register_fn(
        ActionDef::new("stop", "Stop", BlockCategory::Control)
            .describe("Stop the current chain"),
        |_, _| ActionResult::halt(),
    );
}

fn repeat(ctx: &ExecutionContext, params: &Parameters) -> ScriptResult<ActionResult> {
    let args = ActionArgs::new(params);
    let times = args.number_or("times", -1.0)?;
    let delay = args.number_or("delay", 20.0)?;
    if times.fract() != 0.0 {
        return Err(ScriptError::validation("times", "must be a whole number"));
    }
    if delay.fract() != 0.0 {
        return Err(ScriptError::validation("delay", "must be a whole number of ticks"));
    }

    let id = ctx
        .loops()
        .start(ctx, LoopRequest::new(times as i64, delay as i64))?;
    Ok(ActionResult::message(format!("Started loop {}", id)))
}

fn group(ctx: &ExecutionContext) -> ActionResult {
    let children = ctx.execute_children();
    if children.iter().any(|child| child.outcome.halted) {
        return ActionResult::halt();
    }
    ActionResult::message(format!("Ran {} child chains", children.len()))
}

fn cancel_loops(ctx: &ExecutionContext, params: &Parameters) -> ScriptResult<ActionResult> {
    let cancelled = if ActionArgs::new(params).boolean_or("all", false)? {
        ctx.loops().cancel_all()
    } else {
        let owner = match ctx.actor() {
            Some(actor) => LoopOwner::Actor(actor),
            None => LoopOwner::Server,
        };
        ctx.loops().cancel_owner(owner)
    };
    Ok(ActionResult::message(format!("Cancelled {} loops", cancelled)))
}
