//! Built-in Action Registration
//!
//! Registers every built-in action (messaging, variables, actor state,
//! conditions and control flow) plus the dynamic variables the host exposes.

use std::sync::Arc;

use codeblock_runtime::{ActionRegistry, ExecutionContext, ScriptEngine, ScriptError, ScriptResult};
use codeblock_types::{ActorId, DataValue};

mod actor;
mod conditions;
mod control;
mod messaging;
mod variables;

pub use conditions::{Comparison, compare};

/// Register all built-in actions
pub fn register_builtin_actions(registry: &ActionRegistry) {
    messaging::register(registry);
    variables::register(registry);
    actor::register(registry);
    conditions::register(registry);
    control::register(registry);

    tracing::info!("Registered {} built-in actions", registry.len());
}

/// Register the host-backed dynamic variables
///
/// - `player_name`: display name of the actor in context
/// - `tick`: current simulation tick
/// - `active_loops`: number of running loops
pub fn register_dynamic_variables(engine: &Arc<ScriptEngine>) {
    let vars = engine.variables();

    let weak = Arc::downgrade(engine);
    vars.register_dynamic("player_name", move |actor| {
        let engine = weak.upgrade()?;
        engine.host().actor_name(actor?).map(DataValue::from)
    });

    let weak = Arc::downgrade(engine);
    vars.register_dynamic("tick", move |_| {
        let engine = weak.upgrade()?;
        Some(DataValue::Number(engine.scheduler().current_tick() as f64))
    });

    let weak = Arc::downgrade(engine);
    vars.register_dynamic("active_loops", move |_| {
        let engine = weak.upgrade()?;
        Some(DataValue::from(engine.loops().active_count()))
    });
}

/// The actor an action applies to
fn require_actor(ctx: &ExecutionContext) -> ScriptResult<ActorId> {
    ctx.actor()
        .ok_or_else(|| ScriptError::validation("actor", "this action needs a triggering actor"))
}
