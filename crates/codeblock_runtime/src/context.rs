//! Execution Context
//!
//! Carries everything a handler needs for one script invocation: who triggered
//! it, which graph and block are running, where, and the engine services.
//! Contexts are cheap to clone; deriving one for another block never mutates
//! the original.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use codeblock_types::{
    ActorId, BlockId, CodeBlock, CodeGraph, ContextId, DataValue, Location, VariableScope,
};
use serde::{Deserialize, Serialize};
use wildmatch::WildMatch;

use crate::engine::ScriptEngine;
use crate::error::{ScriptError, ScriptResult};
use crate::executor::{ChildOutcome, RecursionKey};
use crate::host::HostServices;
use crate::loops::LoopManager;
use crate::variables::{ScopeKey, VariableManager};

// ─────────────────────────────────────────────────────────────────────────────
// Trigger Event
// ─────────────────────────────────────────────────────────────────────────────

/// A host event that can start scripts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Event name (e.g., "player_join", "block/break")
    pub name: String,
    /// Actor that caused the event, `None` for server events
    pub actor: Option<ActorId>,
    /// Where the event happened
    pub location: Option<Location>,
    /// Event data
    pub payload: BTreeMap<String, DataValue>,
    pub fired_at: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actor: None,
            location: None,
            payload: BTreeMap::new(),
            fired_at: Utc::now(),
        }
    }

    pub fn for_actor(mut self, actor: ActorId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.payload.get(key)
    }

    /// Check if this event matches a trigger pattern
    ///
    /// Patterns are case-insensitive and support `*` and `?` wildcards, so
    /// `player_*` matches `player_join` and `*` matches everything.
    pub fn matches(&self, pattern: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        let name = self.name.to_lowercase();
        let pattern = pattern.to_lowercase();
        name == pattern || WildMatch::new(&pattern).matches(&name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Execution Context
// ─────────────────────────────────────────────────────────────────────────────

/// Per-invocation state passed to every handler
#[derive(Clone)]
pub struct ExecutionContext {
    id: ContextId,
    actor: Option<ActorId>,
    graph: Arc<CodeGraph>,
    block: BlockId,
    location: Option<Location>,
    event: Arc<TriggerEvent>,
    engine: Arc<ScriptEngine>,
}

impl ExecutionContext {
    /// Start a new invocation at `block`
    ///
    /// The spatial anchor is the event location, falling back to the block's
    /// own placement and then the graph anchor.
    pub fn new(
        engine: Arc<ScriptEngine>,
        graph: Arc<CodeGraph>,
        block: BlockId,
        event: Arc<TriggerEvent>,
    ) -> Self {
        let location = event
            .location
            .clone()
            .or_else(|| graph.block(block).and_then(|b| b.location.clone()))
            .or_else(|| graph.anchor.clone());
        Self {
            id: ContextId::new(),
            actor: event.actor,
            graph,
            block,
            location,
            event,
            engine,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn actor(&self) -> Option<ActorId> {
        self.actor
    }

    pub fn graph(&self) -> &Arc<CodeGraph> {
        &self.graph
    }

    pub fn block_id(&self) -> BlockId {
        self.block
    }

    /// The block being executed, `None` if it was removed from the graph
    pub fn current_block(&self) -> Option<&CodeBlock> {
        self.graph.block(self.block)
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    pub fn event(&self) -> &TriggerEvent {
        &self.event
    }

    pub fn engine(&self) -> &Arc<ScriptEngine> {
        &self.engine
    }

    pub fn host(&self) -> &dyn HostServices {
        self.engine.host()
    }

    pub fn variables(&self) -> &VariableManager {
        self.engine.variables()
    }

    pub fn loops(&self) -> &LoopManager {
        self.engine.loops()
    }

    /// Same invocation, positioned at another block
    pub fn with_block(&self, block: BlockId) -> Self {
        Self {
            block,
            ..self.clone()
        }
    }

    /// Same invocation, anchored somewhere else
    pub fn with_location(&self, location: Location) -> Self {
        Self {
            location: Some(location),
            ..self.clone()
        }
    }

    /// Key for the recursion budget of this invocation
    pub fn recursion_key(&self) -> RecursionKey {
        match self.actor {
            Some(actor) => RecursionKey::Actor(actor),
            None => RecursionKey::Server,
        }
    }

    /// Storage key for `scope` as seen from this invocation
    pub fn scope_key(&self, scope: VariableScope) -> ScriptResult<ScopeKey> {
        Ok(match scope {
            VariableScope::Local => ScopeKey::Local(self.id),
            VariableScope::Player => ScopeKey::Player(self.actor.ok_or_else(|| {
                ScriptError::validation("scope", "player scope needs an actor")
            })?),
            VariableScope::Global => ScopeKey::Global,
            VariableScope::Server => ScopeKey::Server,
            VariableScope::Persistent => ScopeKey::Persistent,
            VariableScope::Dynamic => ScopeKey::Dynamic(self.actor),
        })
    }

    /// Replace `%name%` placeholders using this invocation's variables
    pub fn interpolate(&self, text: &str) -> String {
        self.variables().interpolate(text, self.id)
    }

    /// Run the children of the current block in order
    pub fn execute_children(&self) -> Vec<ChildOutcome> {
        self.engine.executor().execute_children(self)
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("actor", &self.actor)
            .field("graph", &self.graph.id)
            .field("block", &self.block)
            .field("event", &self.event.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_matching() {
        let event = TriggerEvent::new("player_join");
        assert!(event.matches("player_join"));
        assert!(event.matches("PLAYER_JOIN"));
        assert!(event.matches("player_*"));
        assert!(event.matches("*"));
        assert!(!event.matches("player_quit"));
        assert!(!event.matches("block_*"));
    }

    #[test]
    fn test_event_payload() {
        let actor = ActorId::new();
        let event = TriggerEvent::new("chat")
            .for_actor(actor)
            .with("message", "hello");
        assert_eq!(event.actor, Some(actor));
        assert_eq!(event.get("message"), Some(&DataValue::from("hello")));
    }
}
