//! Variable Manager
//!
//! Scoped variable storage shared by every script. Each scope is its own
//! concurrent map; composed operations like [`VariableManager::increment`] are
//! read-then-write and not atomic across threads. Scripts run on the
//! simulation thread, so last writer wins.
//!
//! Unqualified names resolve through [`VariableScope::PRECEDENCE`]:
//! dynamic, local, player, global, server. PERSISTENT values are only reached
//! by naming the scope.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use codeblock_types::{ActorId, ContextId, DataValue, Variable, VariableScope};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::persistence::{PersistenceStore, StoreError};

/// Computes a DYNAMIC variable for the actor in context
pub type DynamicSupplier = Arc<dyn Fn(Option<ActorId>) -> Option<DataValue> + Send + Sync>;

/// Addresses one partition of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    Local(ContextId),
    Player(ActorId),
    Global,
    Server,
    Persistent,
    /// Dynamic suppliers are evaluated for this actor
    Dynamic(Option<ActorId>),
}

impl ScopeKey {
    pub fn scope(&self) -> VariableScope {
        match self {
            ScopeKey::Local(_) => VariableScope::Local,
            ScopeKey::Player(_) => VariableScope::Player,
            ScopeKey::Global => VariableScope::Global,
            ScopeKey::Server => VariableScope::Server,
            ScopeKey::Persistent => VariableScope::Persistent,
            ScopeKey::Dynamic(_) => VariableScope::Dynamic,
        }
    }
}

/// Multi-scope variable store
pub struct VariableManager {
    locals: DashMap<ContextId, HashMap<String, DataValue>>,
    /// Actor of each open invocation; outlives `clear_local`
    bindings: DashMap<ContextId, Option<ActorId>>,
    players: DashMap<ActorId, HashMap<String, DataValue>>,
    global: DashMap<String, DataValue>,
    server: DashMap<String, DataValue>,
    persistent: DashMap<String, DataValue>,
    dirty: Mutex<HashSet<String>>,
    dynamic: DashMap<String, DynamicSupplier>,
    store: Option<Arc<dyn PersistenceStore>>,
}

impl Default for VariableManager {
    fn default() -> Self {
        Self::new(None)
    }
}

impl VariableManager {
    /// Create a manager; PERSISTENT writes go to `store` on flush
    pub fn new(store: Option<Arc<dyn PersistenceStore>>) -> Self {
        Self {
            locals: DashMap::new(),
            bindings: DashMap::new(),
            players: DashMap::new(),
            global: DashMap::new(),
            server: DashMap::new(),
            persistent: DashMap::new(),
            dirty: Mutex::new(HashSet::new()),
            dynamic: DashMap::new(),
            store,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scoped access
    // ─────────────────────────────────────────────────────────────────────────

    /// Read a variable from one scope. Absent names are `None`, never errors.
    pub fn get(&self, key: ScopeKey, name: &str) -> Option<DataValue> {
        match key {
            ScopeKey::Local(ctx) => self.locals.get(&ctx)?.get(name).cloned(),
            ScopeKey::Player(actor) => self.players.get(&actor)?.get(name).cloned(),
            ScopeKey::Global => self.global.get(name).map(|v| v.clone()),
            ScopeKey::Server => self.server.get(name).map(|v| v.clone()),
            ScopeKey::Persistent => self.persistent.get(name).map(|v| v.clone()),
            ScopeKey::Dynamic(actor) => self.evaluate_dynamic(name, actor),
        }
    }

    /// Write a variable. DYNAMIC is read-only and ignored.
    pub fn set(&self, key: ScopeKey, name: &str, value: DataValue) {
        trace!(scope = %key.scope(), name, "Set variable");
        match key {
            ScopeKey::Local(ctx) => {
                self.locals
                    .entry(ctx)
                    .or_default()
                    .insert(name.to_string(), value);
            }
            ScopeKey::Player(actor) => {
                self.players
                    .entry(actor)
                    .or_default()
                    .insert(name.to_string(), value);
            }
            ScopeKey::Global => {
                self.global.insert(name.to_string(), value);
            }
            ScopeKey::Server => {
                self.server.insert(name.to_string(), value);
            }
            ScopeKey::Persistent => {
                if matches!(value, DataValue::Number(n) if !n.is_finite()) {
                    warn!(name, "Refusing non-finite persistent number");
                    return;
                }
                self.persistent.insert(name.to_string(), value);
                self.dirty.lock().insert(name.to_string());
            }
            ScopeKey::Dynamic(_) => {
                warn!(name, "Ignoring write to dynamic variable");
            }
        }
    }

    pub fn remove(&self, key: ScopeKey, name: &str) -> Option<DataValue> {
        match key {
            ScopeKey::Local(ctx) => self.locals.get_mut(&ctx)?.remove(name),
            ScopeKey::Player(actor) => self.players.get_mut(&actor)?.remove(name),
            ScopeKey::Global => self.global.remove(name).map(|(_, v)| v),
            ScopeKey::Server => self.server.remove(name).map(|(_, v)| v),
            ScopeKey::Persistent => {
                let removed = self.persistent.remove(name).map(|(_, v)| v);
                if removed.is_some() {
                    self.dirty.lock().insert(name.to_string());
                }
                removed
            }
            ScopeKey::Dynamic(_) => {
                warn!(name, "Ignoring removal of dynamic variable");
                None
            }
        }
    }

    /// Add `delta` to a numeric variable and return the new value
    ///
    /// Absent or non-numeric values count as 0. Returns `None` and leaves the
    /// variable untouched when the sum is not finite.
    pub fn increment(&self, key: ScopeKey, name: &str, delta: f64) -> Option<f64> {
        let current = self
            .get(key, name)
            .and_then(|v| v.as_number().ok())
            .unwrap_or(0.0);
        let updated = current + delta;
        if !updated.is_finite() {
            warn!(
                scope = %key.scope(),
                name,
                current,
                delta,
                "Increment overflowed, keeping old value"
            );
            return None;
        }
        self.set(key, name, DataValue::Number(updated));
        Some(updated)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dynamic variables
    // ─────────────────────────────────────────────────────────────────────────

    pub fn register_dynamic<F>(&self, name: impl Into<String>, supplier: F)
    where
        F: Fn(Option<ActorId>) -> Option<DataValue> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(name = %name, "Registered dynamic variable");
        self.dynamic.insert(name, Arc::new(supplier));
    }

    pub fn unregister_dynamic(&self, name: &str) -> bool {
        self.dynamic.remove(name).is_some()
    }

    fn evaluate_dynamic(&self, name: &str, actor: Option<ActorId>) -> Option<DataValue> {
        // Clone the supplier out so it can read other variables
        let supplier = self.dynamic.get(name).map(|s| Arc::clone(&s))?;
        supplier(actor)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local scopes
    // ─────────────────────────────────────────────────────────────────────────

    /// Bind the local scope of an invocation to its actor
    pub fn open_local(&self, ctx: ContextId, actor: Option<ActorId>) {
        self.bindings.insert(ctx, actor);
        self.locals.entry(ctx).or_default();
    }

    /// Drop an invocation's local scope and its actor binding
    pub fn close_local(&self, ctx: ContextId) {
        self.clear_local(ctx);
        self.bindings.remove(&ctx);
    }

    pub fn has_local(&self, ctx: ContextId) -> bool {
        self.locals.contains_key(&ctx)
    }

    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    fn actor_of(&self, ctx: ContextId) -> Option<ActorId> {
        self.bindings.get(&ctx).and_then(|actor| *actor)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Resolution
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolve an unqualified name for an invocation
    pub fn resolve(&self, name: &str, ctx: ContextId) -> Option<Variable> {
        self.resolve_with_scopes(name, ctx, &VariableScope::PRECEDENCE)
    }

    /// Resolve a name through `scopes` in order
    pub fn resolve_with_scopes(
        &self,
        name: &str,
        ctx: ContextId,
        scopes: &[VariableScope],
    ) -> Option<Variable> {
        let actor = self.actor_of(ctx);
        scopes.iter().find_map(|scope| {
            let key = match scope {
                VariableScope::Local => ScopeKey::Local(ctx),
                VariableScope::Player => ScopeKey::Player(actor?),
                VariableScope::Global => ScopeKey::Global,
                VariableScope::Server => ScopeKey::Server,
                VariableScope::Persistent => ScopeKey::Persistent,
                VariableScope::Dynamic => ScopeKey::Dynamic(actor),
            };
            self.get(key, name)
                .map(|value| Variable::new(name, value, *scope))
        })
    }

    /// Every variable visible to an invocation, higher precedence winning
    pub fn get_all_variables(&self, ctx: ContextId) -> BTreeMap<String, Variable> {
        let actor = self.actor_of(ctx);
        let mut all = BTreeMap::new();
        let mut put = |scope: VariableScope, name: &str, value: DataValue| {
            all.insert(name.to_string(), Variable::new(name, value, scope));
        };

        for entry in self.server.iter() {
            put(VariableScope::Server, entry.key(), entry.value().clone());
        }
        for entry in self.global.iter() {
            put(VariableScope::Global, entry.key(), entry.value().clone());
        }
        if let Some(vars) = actor.and_then(|a| self.players.get(&a)) {
            for (name, value) in vars.iter() {
                put(VariableScope::Player, name, value.clone());
            }
        }
        if let Some(local) = self.locals.get(&ctx) {
            for (name, value) in local.iter() {
                put(VariableScope::Local, name, value.clone());
            }
        }
        let suppliers: Vec<(String, DynamicSupplier)> = self
            .dynamic
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        for (name, supplier) in suppliers {
            if let Some(value) = supplier(actor) {
                put(VariableScope::Dynamic, &name, value);
            }
        }
        all
    }

    /// Replace `%name%` placeholders with resolved values
    ///
    /// Unknown names are left as written.
    pub fn interpolate(&self, text: &str, ctx: ContextId) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find('%') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let Some(end) = after.find('%') else {
                out.push_str(&rest[start..]);
                return out;
            };

            let name = &after[..end];
            let resolved = is_placeholder_name(name)
                .then(|| self.resolve(name, ctx))
                .flatten();
            match resolved {
                Some(var) => {
                    out.push_str(&var.value.to_string());
                    rest = &after[end + 1..];
                }
                None => {
                    out.push('%');
                    rest = after;
                }
            }
        }

        out.push_str(rest);
        out
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Clearing
    // ─────────────────────────────────────────────────────────────────────────

    /// Empty an invocation's local scope; its actor binding stays, so
    /// unqualified names fall back to PLAYER
    pub fn clear_local(&self, ctx: ContextId) {
        if self.locals.remove(&ctx).is_some() {
            trace!(context = %ctx, "Cleared local scope");
        }
    }

    pub fn clear_all_local(&self) {
        self.locals.clear();
        self.bindings.clear();
    }

    pub fn clear_player(&self, actor: ActorId) {
        self.players.remove(&actor);
    }

    pub fn clear_global(&self) {
        self.global.clear();
    }

    pub fn clear_server(&self) {
        self.server.clear();
    }

    /// Drop every persistent value; the deletions reach the store on flush
    pub fn clear_persistent(&self) {
        let mut dirty = self.dirty.lock();
        for entry in self.persistent.iter() {
            dirty.insert(entry.key().clone());
        }
        self.persistent.clear();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────────

    /// Number of persistent names changed since the last successful flush
    pub fn dirty_count(&self) -> usize {
        self.dirty.lock().len()
    }

    /// Write changed PERSISTENT values to the store
    ///
    /// On failure the in-memory values stay and the names remain dirty for
    /// the next flush.
    pub fn flush(&self) -> Result<usize, StoreError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let pending: Vec<String> = self.dirty.lock().drain().collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let result = pending
            .iter()
            .try_for_each(|name| store.set_variable(name, self.get(ScopeKey::Persistent, name)))
            .and_then(|_| store.flush());

        match result {
            Ok(()) => {
                debug!(count = pending.len(), "Flushed persistent variables");
                Ok(pending.len())
            }
            Err(e) => {
                error!(error = %e, count = pending.len(), "Failed to flush persistent variables");
                self.dirty.lock().extend(pending);
                Err(e)
            }
        }
    }

    /// Load PERSISTENT values from the store
    pub fn load_persistent(&self) -> Result<usize, StoreError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let vars = store.load_variables()?;
        let count = vars.len();
        for (name, value) in vars {
            self.persistent.insert(name, value);
        }
        debug!(count, "Loaded persistent variables");
        Ok(count)
    }
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'))
}
