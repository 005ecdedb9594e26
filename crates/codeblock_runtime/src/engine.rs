//! Script Engine
//!
//! The service object the host talks to. It owns the action registry, the
//! variable store, the loop manager, the executor and every loaded graph, and
//! turns host events into script invocations.
//!
//! All entry points swallow script failures: they are logged, shown to the
//! initiating actor and summarized in [`ExecutionOutcome`]s, but never
//! propagate into the host tick loop.

use std::sync::Arc;

use codeblock_types::{ActorId, BlockId, CodeBlock, CodeGraph, ContextId};
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::context::{ExecutionContext, TriggerEvent};
use crate::executor::{ExecutionOutcome, ScriptExecutor};
use crate::host::HostServices;
use crate::loops::{LoopManager, LoopOwner};
use crate::persistence::{PersistenceStore, StoreError};
use crate::registry::ActionRegistry;
use crate::scheduler::{TaskControl, TaskId, TickScheduler};
use crate::variables::VariableManager;

/// Block-script execution engine
pub struct ScriptEngine {
    config: EngineConfig,
    registry: Arc<ActionRegistry>,
    variables: VariableManager,
    loops: LoopManager,
    executor: ScriptExecutor,
    graphs: DashMap<String, Arc<CodeGraph>>,
    /// Invocations whose synchronous chain is still on the stack
    running: DashSet<ContextId>,
    host: Arc<dyn HostServices>,
    scheduler: Arc<dyn TickScheduler>,
    store: Option<Arc<dyn PersistenceStore>>,
    autosave: Mutex<Option<TaskId>>,
}

impl ScriptEngine {
    /// Create an engine without persistence
    pub fn new(
        config: EngineConfig,
        host: Arc<dyn HostServices>,
        scheduler: Arc<dyn TickScheduler>,
    ) -> Self {
        Self {
            registry: Arc::new(ActionRegistry::new()),
            variables: VariableManager::new(None),
            loops: LoopManager::new(config.limits.clone()),
            executor: ScriptExecutor::new(config.limits.max_recursion_depth),
            graphs: DashMap::new(),
            running: DashSet::new(),
            host,
            scheduler,
            store: None,
            autosave: Mutex::new(None),
            config,
        }
    }

    /// Persist graphs and PERSISTENT variables in `store`
    pub fn with_store(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.variables = VariableManager::new(Some(Arc::clone(&store)));
        self.store = Some(store);
        self
    }

    /// Share an existing action registry
    pub fn with_registry(mut self, registry: Arc<ActionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Services
    // ─────────────────────────────────────────────────────────────────────────

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn variables(&self) -> &VariableManager {
        &self.variables
    }

    pub fn loops(&self) -> &LoopManager {
        &self.loops
    }

    pub fn executor(&self) -> &ScriptExecutor {
        &self.executor
    }

    pub fn host(&self) -> &dyn HostServices {
        self.host.as_ref()
    }

    pub fn scheduler(&self) -> &dyn TickScheduler {
        self.scheduler.as_ref()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Graphs
    // ─────────────────────────────────────────────────────────────────────────

    /// Load or replace a graph
    ///
    /// Loops started from a replaced graph are cancelled.
    pub fn load_graph(&self, graph: CodeGraph) {
        let dangling = graph.dangling_edges();
        if !dangling.is_empty() {
            warn!(graph_id = %graph.id, count = dangling.len(), "Graph has dangling edges");
        }

        let id = graph.id.clone();
        if self.graphs.contains_key(&id) {
            self.loops.cancel_graph(&id);
        }
        info!(graph_id = %id, blocks = graph.len(), "Loaded graph");
        self.graphs.insert(id, Arc::new(graph));
    }

    pub fn unload_graph(&self, id: &str) -> bool {
        self.loops.cancel_graph(id);
        let removed = self.graphs.remove(id).is_some();
        if removed {
            info!(graph_id = %id, "Unloaded graph");
        }
        removed
    }

    pub fn graph(&self, id: &str) -> Option<Arc<CodeGraph>> {
        self.graphs.get(id).map(|g| Arc::clone(&g))
    }

    pub fn graph_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.graphs.iter().map(|g| g.key().clone()).collect();
        ids.sort();
        ids
    }

    fn store(&self) -> Result<&Arc<dyn PersistenceStore>, StoreError> {
        self.store
            .as_ref()
            .ok_or_else(|| StoreError::Unavailable("no persistence store configured".into()))
    }

    /// Load one graph from the store. Returns false if it is not stored.
    pub fn load_graph_from_store(&self, id: &str) -> Result<bool, StoreError> {
        match self.store()?.load_graph(id)? {
            Some(graph) => {
                self.load_graph(graph);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Load every stored graph, skipping ones that fail to parse
    pub fn load_all_from_store(&self) -> Result<usize, StoreError> {
        let mut loaded = 0;
        for id in self.store()?.list_graphs()? {
            match self.load_graph_from_store(&id) {
                Ok(true) => loaded += 1,
                Ok(false) => {}
                Err(e) => warn!(graph_id = %id, error = %e, "Failed to load graph"),
            }
        }
        info!(count = loaded, "Loaded graphs from store");
        Ok(loaded)
    }

    /// Save a loaded graph. Returns false if it is not loaded.
    pub fn save_graph(&self, id: &str) -> Result<bool, StoreError> {
        let Some(graph) = self.graph(id) else {
            return Ok(false);
        };
        self.store()?.save_graph(&graph)?;
        Ok(true)
    }

    /// Reload every graph from the store
    ///
    /// Cancels all loops and clears GLOBAL variables.
    pub fn reload(&self) -> Result<usize, StoreError> {
        self.store()?;
        self.loops.cancel_all();
        self.variables.clear_global();
        self.graphs.clear();
        self.load_all_from_store()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Execution
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one script from `entry`. Returns `None` if the graph or block is
    /// not loaded.
    pub fn execute_script(
        self: &Arc<Self>,
        graph_id: &str,
        entry: BlockId,
        event: TriggerEvent,
    ) -> Option<ExecutionOutcome> {
        let Some(graph) = self.graph(graph_id) else {
            warn!(graph_id, "Graph not loaded");
            return None;
        };
        if !graph.contains(entry) {
            warn!(graph_id, block_id = %entry, "Entry block not found");
            return None;
        }
        Some(self.invoke(graph, entry, Arc::new(event)))
    }

    /// Run every trigger that matches the event, each as its own chain
    pub fn fire(self: &Arc<Self>, event: TriggerEvent) -> Vec<ExecutionOutcome> {
        let mut graphs: Vec<Arc<CodeGraph>> =
            self.graphs.iter().map(|g| Arc::clone(g.value())).collect();
        graphs.sort_by(|a, b| a.id.cmp(&b.id));

        let event = Arc::new(event);
        let mut outcomes = Vec::new();
        for graph in graphs {
            let mut entries: Vec<BlockId> = graph
                .triggers()
                .filter(|t| trigger_matches(t, &event))
                .map(|t| t.id)
                .collect();
            entries.sort();

            for entry in entries {
                outcomes.push(self.invoke(Arc::clone(&graph), entry, Arc::clone(&event)));
            }
        }

        debug!(event = %event.name, scripts = outcomes.len(), "Fired event");
        outcomes
    }

    /// Fire an event on the next simulation tick
    ///
    /// Safe to call from any thread.
    pub fn fire_deferred(self: &Arc<Self>, event: TriggerEvent) -> TaskId {
        self.submit(move |engine| {
            engine.fire(event);
        })
    }

    /// Run a task on the next simulation tick
    pub fn submit<F>(self: &Arc<Self>, task: F) -> TaskId
    where
        F: FnOnce(&Arc<ScriptEngine>) + Send + 'static,
    {
        let engine = Arc::downgrade(self);
        self.scheduler.schedule_once(
            0,
            Box::new(move || {
                if let Some(engine) = engine.upgrade() {
                    task(&engine);
                }
            }),
        )
    }

    fn invoke(
        self: &Arc<Self>,
        graph: Arc<CodeGraph>,
        entry: BlockId,
        event: Arc<TriggerEvent>,
    ) -> ExecutionOutcome {
        let ctx = ExecutionContext::new(Arc::clone(self), graph, entry, event);
        let id = ctx.id();

        self.variables.open_local(id, ctx.actor());
        self.running.insert(id);
        let outcome = self.executor.execute_script(&ctx);
        self.running.remove(&id);
        self.release_context(id);

        debug!(
            graph_id = %ctx.graph().id,
            block_id = %entry,
            blocks = outcome.blocks_executed,
            errors = outcome.errors.len(),
            "Script finished"
        );
        outcome
    }

    /// Clear an invocation's local scope once nothing uses it
    ///
    /// The scope survives while the chain is running or a loop started from
    /// it is active.
    pub fn release_context(&self, id: ContextId) {
        if self.running.contains(&id) || self.loops.count_for_context(id) > 0 {
            return;
        }
        self.variables.close_local(id);
    }

    /// Cancel an actor's loops and drop its PLAYER variables
    pub fn actor_left(&self, actor: ActorId) {
        let cancelled = self.loops.cancel_owner(LoopOwner::Actor(actor));
        self.variables.clear_player(actor);
        debug!(actor = %actor, cancelled, "Actor left");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Write PERSISTENT variables to the store
    pub fn flush(&self) -> Result<usize, StoreError> {
        self.variables.flush()
    }

    /// Flush every `autosave_interval_ticks`
    pub fn start_autosave(self: &Arc<Self>) -> Option<TaskId> {
        let interval = self.config.runtime.autosave_interval_ticks;
        if interval == 0 || self.store.is_none() {
            return None;
        }

        let mut slot = self.autosave.lock();
        if let Some(existing) = *slot {
            return Some(existing);
        }

        let engine = Arc::downgrade(self);
        let task = self.scheduler.schedule_repeating(
            interval,
            interval,
            Box::new(move || match engine.upgrade() {
                Some(engine) => {
                    // flush() logs its own failures
                    let _ = engine.flush();
                    TaskControl::Continue
                }
                None => TaskControl::Stop,
            }),
        );
        info!(interval_ticks = interval, "Autosave scheduled");
        *slot = Some(task);
        Some(task)
    }

    /// Stop loops, flush persistent variables and drop local scopes
    pub fn shutdown(&self) {
        if let Some(task) = self.autosave.lock().take() {
            self.scheduler.cancel(task);
        }
        let cancelled = self.loops.cancel_all();
        if let Err(e) = self.flush() {
            error!(error = %e, "Final flush failed");
        }
        self.variables.clear_all_local();
        info!(cancelled_loops = cancelled, "Script engine shut down");
    }
}

fn trigger_matches(block: &CodeBlock, event: &TriggerEvent) -> bool {
    event.matches(&block.action)
        || block
            .param("pattern")
            .and_then(|p| p.as_text())
            .is_some_and(|p| event.matches(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use codeblock_types::{BlockCategory, DataValue, Parameters};

    use crate::args::ActionArgs;
    use crate::config::EngineLimits;
    use crate::error::{ScriptError, ScriptResult};
    use crate::host::HeadlessHost;
    use crate::loops::{LoopRequest, LoopState};
    use crate::persistence::MemoryStore;
    use crate::registry::{ActionDef, ActionResult};
    use crate::scheduler::TickQueue;
    use crate::variables::ScopeKey;

    fn repeat(ctx: &ExecutionContext, params: &Parameters) -> ScriptResult<ActionResult> {
        let times = ActionArgs::new(params).number_or("times", 1.0)? as i64;
        let id = ctx.loops().start(ctx, LoopRequest::new(times, 1))?;
        Ok(ActionResult::message(format!("started {id}")))
    }

    fn register_test_actions(registry: &ActionRegistry) {
        registry.register_fn(ActionDef::new("count", "Count", BlockCategory::Action), |ctx, _| {
            ctx.variables().increment(ScopeKey::Server, "count", 1.0);
            ActionResult::ok()
        });
        registry.register_fn(
            ActionDef::new("set_local", "Set Local", BlockCategory::Action),
            |ctx, _| {
                ctx.variables().set(ScopeKey::Local(ctx.id()), "x", DataValue::from(1));
                ActionResult::ok()
            },
        );
        registry.register_fn(
            ActionDef::new("is_true", "Is True", BlockCategory::Condition),
            |_, params| {
                let value = params
                    .get("value")
                    .and_then(|v| v.as_boolean().ok())
                    .unwrap_or(false);
                ActionResult::branch(value)
            },
        );
        registry.register_fn(ActionDef::new("invalid", "Invalid", BlockCategory::Action), |_, _| {
            ActionResult::error(ScriptError::validation("amount", "must be positive"))
        });
        registry.register_fn(ActionDef::new("boom", "Boom", BlockCategory::Action), |_, _| {
            panic!("handler exploded")
        });
        registry.register_fn(ActionDef::new("halt", "Halt", BlockCategory::Control), |_, _| {
            ActionResult::halt()
        });
        registry.register_fn(
            ActionDef::new("repeat", "Repeat", BlockCategory::Control),
            |ctx, params| repeat(ctx, params).into(),
        );
    }

    fn setup_with(config: EngineConfig) -> (Arc<ScriptEngine>, Arc<HeadlessHost>, Arc<TickQueue>) {
        let host = Arc::new(HeadlessHost::new());
        let queue = Arc::new(TickQueue::new());
        let engine = ScriptEngine::new(config, host.clone(), queue.clone());
        register_test_actions(engine.registry());
        (Arc::new(engine), host, queue)
    }

    fn setup() -> (Arc<ScriptEngine>, Arc<HeadlessHost>, Arc<TickQueue>) {
        setup_with(EngineConfig::default())
    }

    /// Trigger `event` followed by `blocks` linked through `next`
    fn chain(id: &str, event: &str, blocks: Vec<CodeBlock>) -> (CodeGraph, BlockId, Vec<BlockId>) {
        let mut graph = CodeGraph::new(id, id);
        let trigger = graph.add_block(CodeBlock::trigger(event));
        let mut ids = Vec::new();
        let mut prev = trigger;
        for block in blocks {
            let id = graph.add_block(block);
            graph.link_next(prev, id).unwrap();
            ids.push(id);
            prev = id;
        }
        (graph, trigger, ids)
    }

    /// Trigger followed by a repeat block whose only child counts
    fn loop_graph(id: &str, times: i64) -> CodeGraph {
        let repeat = CodeBlock::control("repeat").with_param("times", times);
        let (mut graph, _, ids) = chain(id, "start", vec![repeat]);
        let child = graph.add_block(CodeBlock::action("count"));
        graph.add_child(ids[0], child).unwrap();
        graph
    }

    fn count(engine: &ScriptEngine) -> f64 {
        engine
            .variables()
            .get(ScopeKey::Server, "count")
            .and_then(|v| v.as_number().ok())
            .unwrap_or(0.0)
    }

    #[test]
    fn test_trigger_is_not_dispatched() {
        let (engine, _, _) = setup();
        let (graph, trigger, _) = chain(
            "g",
            "start",
            vec![CodeBlock::action("count"), CodeBlock::action("count")],
        );
        engine.load_graph(graph);

        let outcome = engine.execute_script("g", trigger, TriggerEvent::new("start")).unwrap();
        assert_eq!(outcome.blocks_executed, 2);
        assert!(outcome.is_ok());
        assert_eq!(count(&engine), 2.0);
    }

    #[test]
    fn test_missing_graph_or_block() {
        let (engine, _, _) = setup();
        assert!(engine.execute_script("nope", BlockId::new(), TriggerEvent::new("x")).is_none());

        let (graph, _, _) = chain("g", "start", vec![]);
        engine.load_graph(graph);
        assert!(engine.execute_script("g", BlockId::new(), TriggerEvent::new("x")).is_none());
    }

    #[test]
    fn test_condition_follows_else() {
        let (engine, _, _) = setup();
        let (mut graph, _, ids) = chain(
            "g",
            "start",
            vec![
                CodeBlock::condition("is_true").with_param("value", false),
                CodeBlock::action("halt"),
            ],
        );
        let other = graph.add_block(CodeBlock::action("count"));
        graph.set_else(ids[0], Some(other)).unwrap();
        engine.load_graph(graph);

        let outcomes = engine.fire(TriggerEvent::new("start"));
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].halted);
        assert_eq!(count(&engine), 1.0);
    }

    #[test]
    fn test_halt_stops_chain() {
        let (engine, _, _) = setup();
        let blocks = vec![CodeBlock::action("halt"), CodeBlock::action("count")];
        let (graph, _, _) = chain("g", "start", blocks);
        engine.load_graph(graph);

        let outcomes = engine.fire(TriggerEvent::new("start"));
        assert!(outcomes[0].halted);
        assert_eq!(count(&engine), 0.0);
    }

    #[test]
    fn test_unknown_action_is_isolated() {
        let (engine, host, _) = setup();
        let blocks = vec![CodeBlock::action("nope"), CodeBlock::action("count")];
        let (broken, _, _) = chain("a", "start", blocks);
        let (healthy, _, _) = chain("b", "start", vec![CodeBlock::action("count")]);
        engine.load_graph(broken);
        engine.load_graph(healthy);

        let outcomes = engine.fire(TriggerEvent::new("start"));
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0].errors[..], [ScriptError::UnknownAction(_)]));
        assert!(outcomes[1].is_ok());
        assert_eq!(count(&engine), 1.0);
        assert_eq!(host.errors().len(), 1);
    }

    #[test]
    fn test_recursion_limit_is_exact() {
        let (engine, _, _) = setup();
        let (mut graph, _, ids) = chain("g", "start", vec![CodeBlock::action("count")]);
        graph.link_next(ids[0], ids[0]).unwrap();
        engine.load_graph(graph);

        let outcomes = engine.fire(TriggerEvent::new("start"));
        assert_eq!(count(&engine), 50.0);
        assert_eq!(outcomes[0].blocks_executed, 50);
        assert_eq!(outcomes[0].errors, vec![ScriptError::RecursionLimit { limit: 50 }]);
        assert_eq!(engine.executor().depth(crate::executor::RecursionKey::Server), 0);
    }

    #[test]
    fn test_validation_error_continues_chain() {
        let (engine, host, _) = setup();
        let actor = host.join("Alex");
        let blocks = vec![CodeBlock::action("invalid"), CodeBlock::action("count")];
        let (graph, _, _) = chain("g", "start", blocks);
        engine.load_graph(graph);

        let outcomes = engine.fire(TriggerEvent::new("start").for_actor(actor));
        assert_eq!(outcomes[0].errors.len(), 1);
        assert_eq!(count(&engine), 1.0);
        assert_eq!(host.errors().len(), 1);
    }

    #[test]
    fn test_panicking_handler_is_caught() {
        let (engine, _, _) = setup();
        let blocks = vec![CodeBlock::action("boom"), CodeBlock::action("count")];
        let (graph, _, _) = chain("g", "start", blocks);
        engine.load_graph(graph);

        let outcomes = engine.fire(TriggerEvent::new("start"));
        assert!(matches!(
            &outcomes[0].errors[..],
            [ScriptError::RuntimeHandler { message, .. }] if message == "handler exploded"
        ));
        assert_eq!(count(&engine), 0.0);
    }

    #[test]
    fn test_trigger_pattern_parameter() {
        let (engine, _, _) = setup();
        let mut graph = CodeGraph::new("g", "g");
        let trigger =
            graph.add_block(CodeBlock::trigger("on_event").with_param("pattern", "block_*"));
        let action = graph.add_block(CodeBlock::action("count"));
        graph.link_next(trigger, action).unwrap();
        engine.load_graph(graph);

        engine.fire(TriggerEvent::new("block_break"));
        engine.fire(TriggerEvent::new("player_join"));
        assert_eq!(count(&engine), 1.0);
    }

    #[test]
    fn test_local_scope_released_after_invocation() {
        let (engine, _, _) = setup();
        let (graph, _, _) = chain("g", "start", vec![CodeBlock::action("set_local")]);
        engine.load_graph(graph);

        engine.fire(TriggerEvent::new("start"));
        assert_eq!(engine.variables().local_count(), 0);
    }

    #[test]
    fn test_loop_runs_and_completes() {
        let (engine, _, queue) = setup();
        engine.load_graph(loop_graph("g", 3));

        engine.fire(TriggerEvent::new("start"));
        assert_eq!(engine.loops().active_count(), 1);
        assert_eq!(engine.variables().local_count(), 1);
        assert_eq!(count(&engine), 0.0);

        queue.advance(3);
        assert_eq!(count(&engine), 3.0);
        assert_eq!(engine.loops().active_count(), 0);
        assert_eq!(engine.variables().local_count(), 0);

        let history = engine.loops().history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].state, LoopState::Completed);
        assert_eq!(history[0].iterations, 3);

        queue.advance(5);
        assert_eq!(count(&engine), 3.0);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_loop_concurrency_limit() {
        let (engine, host, _) = setup();
        let actor = host.join("Alex");
        engine.load_graph(loop_graph("g", 100));

        for _ in 0..10 {
            let outcomes = engine.fire(TriggerEvent::new("start").for_actor(actor));
            assert!(outcomes[0].is_ok());
        }
        let outcomes = engine.fire(TriggerEvent::new("start").for_actor(actor));
        assert!(matches!(
            outcomes[0].errors[..],
            [ScriptError::ConcurrencyLimit { limit: 10, .. }]
        ));
        assert_eq!(engine.loops().count_for_owner(LoopOwner::Actor(actor)), 10);

        // Other owners are unaffected
        let outcomes = engine.fire(TriggerEvent::new("start"));
        assert!(outcomes[0].is_ok());
    }

    #[test]
    fn test_cancel_stops_ticks() {
        let (engine, _, queue) = setup();
        engine.load_graph(loop_graph("g", 100));
        engine.fire(TriggerEvent::new("start"));
        let id = engine.loops().ids()[0];

        queue.tick();
        assert_eq!(count(&engine), 1.0);
        assert!(matches!(engine.loops().state(id), LoopState::Running { iteration: 1 }));

        assert!(engine.loops().cancel(id));
        assert!(!engine.loops().cancel(id));
        queue.advance(5);
        assert_eq!(count(&engine), 1.0);
        assert_eq!(engine.loops().state(id), LoopState::Removed);
        assert_eq!(engine.loops().record(id).unwrap().state, LoopState::Cancelled);
    }

    #[test]
    fn test_loop_cancelled_when_owner_leaves() {
        let (engine, host, queue) = setup();
        let actor = host.join("Alex");
        engine.load_graph(loop_graph("g", 100));
        engine.fire(TriggerEvent::new("start").for_actor(actor));
        let id = engine.loops().ids()[0];

        host.leave(actor);
        queue.tick();
        assert_eq!(count(&engine), 0.0);
        assert_eq!(engine.loops().record(id).unwrap().state, LoopState::Cancelled);
    }

    #[test]
    fn test_loop_times_out() {
        let config = EngineConfig {
            limits: EngineLimits {
                max_loop_duration_secs: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let (engine, host, queue) = setup_with(config);
        engine.load_graph(loop_graph("g", 100));
        engine.fire(TriggerEvent::new("start"));
        let id = engine.loops().ids()[0];

        std::thread::sleep(Duration::from_millis(5));
        queue.tick();
        assert_eq!(count(&engine), 0.0);
        assert_eq!(engine.loops().record(id).unwrap().state, LoopState::TimedOut);
        assert_eq!(host.errors().len(), 1);
    }

    #[test]
    fn test_unload_cancels_graph_loops() {
        let (engine, _, queue) = setup();
        engine.load_graph(loop_graph("g", 100));
        engine.fire(TriggerEvent::new("start"));

        assert!(engine.unload_graph("g"));
        assert_eq!(engine.loops().active_count(), 0);
        queue.advance(3);
        assert_eq!(count(&engine), 0.0);
    }

    #[test]
    fn test_fire_deferred_runs_next_tick() {
        let (engine, _, queue) = setup();
        let (graph, _, _) = chain("g", "start", vec![CodeBlock::action("count")]);
        engine.load_graph(graph);

        engine.fire_deferred(TriggerEvent::new("start"));
        assert_eq!(count(&engine), 0.0);
        queue.tick();
        assert_eq!(count(&engine), 1.0);
    }

    #[test]
    fn test_panicking_submit_keeps_ticking() {
        let (engine, _, queue) = setup();
        let (graph, _, _) = chain("g", "start", vec![CodeBlock::action("count")]);
        engine.load_graph(graph);

        engine.submit(|_| panic!("submitted task failed"));
        engine.fire_deferred(TriggerEvent::new("start"));
        assert_eq!(queue.tick(), 2);
        assert_eq!(count(&engine), 1.0);

        engine.fire_deferred(TriggerEvent::new("start"));
        queue.tick();
        assert_eq!(count(&engine), 2.0);
    }

    #[test]
    fn test_autosave_and_shutdown() {
        let config = EngineConfig::from_toml_str("[runtime]\nautosave_interval_ticks = 2").unwrap();
        let store = Arc::new(MemoryStore::new());
        let host = Arc::new(HeadlessHost::new());
        let queue = Arc::new(TickQueue::new());
        let engine =
            Arc::new(ScriptEngine::new(config, host, queue.clone()).with_store(store.clone()));
        register_test_actions(engine.registry());

        assert!(engine.start_autosave().is_some());
        engine.variables().set(ScopeKey::Persistent, "wins", DataValue::from(1));
        queue.advance(2);
        assert_eq!(store.durable_variables().get("wins"), Some(&DataValue::from(1)));

        engine.load_graph(loop_graph("g", 100));
        engine.fire(TriggerEvent::new("start"));
        engine.variables().set(ScopeKey::Persistent, "wins", DataValue::from(2));
        engine.shutdown();

        assert_eq!(engine.loops().active_count(), 0);
        assert_eq!(engine.variables().local_count(), 0);
        assert_eq!(store.durable_variables().get("wins"), Some(&DataValue::from(2)));
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_store_roundtrip_and_reload() {
        let store = Arc::new(MemoryStore::new());
        let host = Arc::new(HeadlessHost::new());
        let queue = Arc::new(TickQueue::new());
        let engine = ScriptEngine::new(EngineConfig::default(), host, queue).with_store(store);

        engine.load_graph(loop_graph("g", 1));
        assert!(engine.save_graph("g").unwrap());
        assert!(!engine.save_graph("missing").unwrap());

        engine.variables().set(ScopeKey::Global, "round", DataValue::from(4));
        assert_eq!(engine.reload().unwrap(), 1);
        assert_eq!(engine.graph_ids(), vec!["g"]);
        assert!(engine.variables().get(ScopeKey::Global, "round").is_none());
    }

    #[test]
    fn test_store_required_for_persistence_calls() {
        let (engine, _, _) = setup();
        assert!(matches!(engine.load_all_from_store(), Err(StoreError::Unavailable(_))));
        assert!(engine.start_autosave().is_none());
    }
}
