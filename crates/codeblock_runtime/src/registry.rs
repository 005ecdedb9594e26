// Action Registry - Maps action ids to handlers
//
// Every block names an action id. The registry resolves that id to a handler at
// execution time, so new actions can be registered while graphs are loaded.
// Ids are case-insensitive. Lookups that miss the table fall back to alias
// matching and registered factories; hits are compiled into the table and
// misses are remembered until the next registration.

/// Remembered misses before the miss cache starts over
pub const MAX_CACHED_MISSES: usize = 256;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use codeblock_types::{BlockCategory, Parameters, ValueKind};
use parking_lot::RwLock;

use crate::context::ExecutionContext;
use crate::error::{ScriptError, ScriptResult};

// ─────────────────────────────────────────────────────────────────────────────
// Action Result
// ─────────────────────────────────────────────────────────────────────────────

/// What a handler tells the executor to do next
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResult {
    /// Follow `next`, with an optional human-readable message
    Continue(Option<String>),
    /// Condition outcome: `next` when true, `else` when false
    Branch(bool),
    /// Stop this chain without error
    Halt,
    /// The action failed
    Error(ScriptError),
}

impl ActionResult {
    /// Continue without a message
    pub fn ok() -> Self {
        ActionResult::Continue(None)
    }

    /// Continue with a message
    pub fn message(message: impl Into<String>) -> Self {
        ActionResult::Continue(Some(message.into()))
    }

    pub fn branch(value: bool) -> Self {
        ActionResult::Branch(value)
    }

    pub fn halt() -> Self {
        ActionResult::Halt
    }

    pub fn error(error: ScriptError) -> Self {
        ActionResult::Error(error)
    }

    pub fn is_continue(&self) -> bool {
        matches!(self, ActionResult::Continue(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ActionResult::Error(_))
    }

    /// The message carried by a `Continue` result
    pub fn text(&self) -> Option<&str> {
        match self {
            ActionResult::Continue(Some(message)) => Some(message),
            _ => None,
        }
    }
}

impl From<ScriptError> for ActionResult {
    fn from(error: ScriptError) -> Self {
        ActionResult::Error(error)
    }
}

impl From<ScriptResult<ActionResult>> for ActionResult {
    fn from(result: ScriptResult<ActionResult>) -> Self {
        result.unwrap_or_else(ActionResult::Error)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Action Handler Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for action execution
pub trait ActionHandler: Send + Sync {
    fn execute(&self, ctx: &ExecutionContext, params: &Parameters) -> ActionResult;
}

/// Function-based action handler
pub struct FnActionHandler<F>
where
    F: Fn(&ExecutionContext, &Parameters) -> ActionResult + Send + Sync,
{
    func: F,
}

impl<F> FnActionHandler<F>
where
    F: Fn(&ExecutionContext, &Parameters) -> ActionResult + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> ActionHandler for FnActionHandler<F>
where
    F: Fn(&ExecutionContext, &Parameters) -> ActionResult + Send + Sync,
{
    fn execute(&self, ctx: &ExecutionContext, params: &Parameters) -> ActionResult {
        (self.func)(ctx, params)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Action Definitions
// ─────────────────────────────────────────────────────────────────────────────

/// Declared parameter of an action
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    pub name: String,
    pub kind: ValueKind,
    pub required: bool,
}

impl ParamDef {
    pub fn required(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }
}

/// Metadata describing an action
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDef {
    pub id: String,
    pub name: String,
    pub category: BlockCategory,
    pub description: Option<String>,
    pub params: Vec<ParamDef>,
}

impl ActionDef {
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: BlockCategory) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category,
            description: None,
            params: Vec::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn param(mut self, param: ParamDef) -> Self {
        self.params.push(param);
        self
    }

    /// Check that every required parameter is present and non-null
    pub fn validate(&self, params: &Parameters) -> ScriptResult<()> {
        for param in self.params.iter().filter(|p| p.required) {
            match params.get(&param.name) {
                Some(value) if !value.is_null() => {}
                _ => {
                    return Err(ScriptError::validation(
                        &param.name,
                        "required parameter is missing",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// A registered action
pub struct ActionEntry {
    pub definition: ActionDef,
    pub handler: Arc<dyn ActionHandler>,
}

impl ActionEntry {
    pub fn new(definition: ActionDef, handler: Arc<dyn ActionHandler>) -> Self {
        Self {
            definition,
            handler,
        }
    }

    /// Validate parameters, then run the handler
    pub fn invoke(&self, ctx: &ExecutionContext, params: &Parameters) -> ActionResult {
        if let Err(e) = self.definition.validate(params) {
            return ActionResult::Error(e);
        }
        self.handler.execute(ctx, params)
    }
}

/// Fallback provider consulted when an id is not in the table
pub type ActionFactory = Box<dyn Fn(&str) -> Option<ActionEntry> + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Action Registry
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RegistryState {
    actions: HashMap<String, Arc<ActionEntry>>,
    /// normalized id -> table key
    aliases: HashMap<String, String>,
    misses: HashSet<String>,
    factories: Vec<ActionFactory>,
}

impl RegistryState {
    fn insert(&mut self, entry: ActionEntry) {
        let key = entry.definition.id.to_ascii_lowercase();
        self.aliases.insert(normalize(&key), key.clone());
        self.actions.insert(key, Arc::new(entry));
        self.misses.clear();
    }
}

/// Lowercase and drop separators so `Send Message`, `send-message` and
/// `send_message` compare equal
fn normalize(id: &str) -> String {
    id.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Registry of all available actions
#[derive(Default)]
pub struct ActionRegistry {
    state: RwLock<RegistryState>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action with its handler, replacing any previous one
    pub fn register(&self, definition: ActionDef, handler: Arc<dyn ActionHandler>) {
        tracing::debug!(action = %definition.id, "Registered action");
        self.state.write().insert(ActionEntry::new(definition, handler));
    }

    /// Register an action backed by a closure
    pub fn register_fn<F>(&self, definition: ActionDef, func: F)
    where
        F: Fn(&ExecutionContext, &Parameters) -> ActionResult + Send + Sync + 'static,
    {
        self.register(definition, Arc::new(FnActionHandler::new(func)));
    }

    /// Register a handler with a minimal definition
    pub fn register_handler(&self, id: &str, handler: Arc<dyn ActionHandler>) {
        let definition = ActionDef::new(id, id, BlockCategory::Action)
            .describe(format!("Extension action: {}", id));
        self.register(definition, handler);
    }

    /// Add a fallback provider
    pub fn register_factory<F>(&self, factory: F)
    where
        F: Fn(&str) -> Option<ActionEntry> + Send + Sync + 'static,
    {
        let mut state = self.state.write();
        state.factories.push(Box::new(factory));
        state.misses.clear();
    }

    /// Find the entry for an action id
    pub fn resolve(&self, id: &str) -> Option<Arc<ActionEntry>> {
        let key = id.to_ascii_lowercase();
        let alias = normalize(&key);

        {
            let state = self.state.read();
            if let Some(entry) = state.actions.get(&key) {
                return Some(Arc::clone(entry));
            }
            if let Some(entry) = state.aliases.get(&alias).and_then(|k| state.actions.get(k)) {
                return Some(Arc::clone(entry));
            }
            if state.misses.contains(&key) {
                return None;
            }
        }

        let mut state = self.state.write();
        let discovered = state.factories.iter().find_map(|factory| factory(id));
        match discovered {
            Some(mut entry) => {
                tracing::debug!(action = %id, "Compiled action from factory");
                entry.definition.id = key.clone();
                state.insert(entry);
                state.actions.get(&key).cloned()
            }
            None => {
                if state.misses.len() >= MAX_CACHED_MISSES {
                    tracing::debug!(dropped = state.misses.len(), "Miss cache full, clearing");
                    state.misses.clear();
                }
                state.misses.insert(key);
                None
            }
        }
    }

    /// Resolve or fail with [`ScriptError::UnknownAction`]
    pub fn require(&self, id: &str) -> ScriptResult<Arc<ActionEntry>> {
        self.resolve(id)
            .ok_or_else(|| ScriptError::UnknownAction(id.to_string()))
    }

    pub fn definition(&self, id: &str) -> Option<ActionDef> {
        self.resolve(id).map(|e| e.definition.clone())
    }

    /// All registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().actions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn categories(&self) -> Vec<BlockCategory> {
        let state = self.state.read();
        let mut cats: Vec<BlockCategory> = Vec::new();
        for entry in state.actions.values() {
            if !cats.contains(&entry.definition.category) {
                cats.push(entry.definition.category);
            }
        }
        cats.sort_by_key(|c| c.to_string());
        cats
    }

    pub fn in_category(&self, category: BlockCategory) -> Vec<ActionDef> {
        let mut defs: Vec<ActionDef> = self
            .state
            .read()
            .actions
            .values()
            .filter(|e| e.definition.category == category)
            .map(|e| e.definition.clone())
            .collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state
            .read()
            .actions
            .contains_key(&id.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.state.read().actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().actions.is_empty()
    }

    /// Unknown ids currently remembered as misses
    pub fn cached_misses(&self) -> usize {
        self.state.read().misses.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeblock_types::DataValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn def(id: &str, category: BlockCategory) -> ActionDef {
        ActionDef::new(id, id, category)
    }

    #[test]
    fn test_empty_registry() {
        let registry = ActionRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_ids_are_case_insensitive() {
        let registry = ActionRegistry::new();
        registry.register_fn(def("Send_Message", BlockCategory::Action), |_, _| ActionResult::ok());

        assert!(registry.contains("send_message"));
        assert!(registry.resolve("SEND_MESSAGE").is_some());
        assert_eq!(registry.ids(), vec!["send_message"]);
    }

    #[test]
    fn test_alias_lookup() {
        let registry = ActionRegistry::new();
        registry.register_fn(def("send_message", BlockCategory::Action), |_, _| ActionResult::ok());

        assert!(registry.resolve("Send Message").is_some());
        assert!(registry.resolve("send-message").is_some());
        assert!(registry.resolve("sendmessage").is_some());
    }

    #[test]
    fn test_reregister_replaces() {
        let registry = ActionRegistry::new();
        registry.register_fn(def("x", BlockCategory::Action), |_, _| ActionResult::ok());
        registry.register_fn(def("x", BlockCategory::Condition), |_, _| ActionResult::branch(true));

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.definition("x").unwrap().category,
            BlockCategory::Condition
        );
    }

    #[test]
    fn test_factory_and_negative_cache() {
        let registry = ActionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        registry.register_factory(move |id| {
            counter.fetch_add(1, Ordering::SeqCst);
            id.starts_with("ext:").then(|| {
                ActionEntry::new(
                    ActionDef::new(id, id, BlockCategory::Action),
                    Arc::new(FnActionHandler::new(|_, _| ActionResult::ok())),
                )
            })
        });

        assert!(registry.resolve("ext:wave").is_some());
        assert!(registry.resolve("ext:wave").is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(registry.resolve("missing").is_none());
        assert!(registry.resolve("missing").is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // A registration clears remembered misses
        registry.register_fn(def("other", BlockCategory::Action), |_, _| ActionResult::ok());
        assert!(registry.resolve("missing").is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_miss_cache_is_bounded() {
        let registry = ActionRegistry::new();
        registry.register_fn(def("send_message", BlockCategory::Action), |_, _| {
            ActionResult::ok()
        });

        for i in 0..MAX_CACHED_MISSES * 4 {
            assert!(registry.resolve(&format!("ghost_{}", i)).is_none());
            assert!(registry.cached_misses() <= MAX_CACHED_MISSES);
        }
        assert!(registry.cached_misses() > 0);
        assert!(registry.resolve("send_message").is_some());
        assert!(registry.resolve("SendMessage").is_some());
    }

    #[test]
    fn test_required_params_validated() {
        let definition = def("send_message", BlockCategory::Action)
            .param(ParamDef::required("message", ValueKind::Text))
            .param(ParamDef::optional("prefix", ValueKind::Text));

        let empty = Parameters::new();
        assert!(matches!(
            definition.validate(&empty),
            Err(ScriptError::Validation { .. })
        ));

        let null: Parameters = [("message", DataValue::null())].into_iter().collect();
        assert!(definition.validate(&null).is_err());

        let ok: Parameters = [("message", "hi")].into_iter().collect();
        assert!(definition.validate(&ok).is_ok());
    }

    #[test]
    fn test_categories() {
        let registry = ActionRegistry::new();
        registry.register_fn(def("a", BlockCategory::Action), |_, _| ActionResult::ok());
        registry.register_fn(def("c", BlockCategory::Condition), |_, _| {
            ActionResult::branch(false)
        });
        registry.register_fn(def("b", BlockCategory::Action), |_, _| ActionResult::ok());

        let categories = registry.categories();
        assert_eq!(categories, vec![BlockCategory::Action, BlockCategory::Condition]);
        assert_eq!(registry.in_category(BlockCategory::Action).len(), 2);
    }

    #[test]
    fn test_result_from_script_result() {
        let failed: ActionResult = ScriptResult::Err(ScriptError::UnknownAction("x".into())).into();
        assert!(failed.is_error());
        let ok: ActionResult = ScriptResult::Ok(ActionResult::message("done")).into();
        assert_eq!(ok.text(), Some("done"));
    }
}
