//! Host Services
//!
//! The engine never touches the host world directly. Everything it needs from
//! the simulation (presence checks, messaging, actor state) goes through the
//! [`HostServices`] trait, which the embedding host implements.
//!
//! [`HeadlessHost`] is an in-memory implementation with an actor table and a
//! message log. It backs the tests and the demo binary.

use std::collections::HashMap;

use codeblock_types::{ActorId, ItemStack, Location};
use parking_lot::{Mutex, RwLock};

// ─────────────────────────────────────────────────────────────────────────────
// Host Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors reported by the host
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostError {
    #[error("Actor is not online: {0}")]
    ActorOffline(ActorId),

    #[error("Host does not support {0}")]
    Unsupported(&'static str),

    #[error("Host rejected the request: {0}")]
    Rejected(String),
}

/// Result type for host calls
pub type HostResult<T> = Result<T, HostError>;

// ─────────────────────────────────────────────────────────────────────────────
// Host Services Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Services the host simulation provides to scripts
///
/// All calls happen on the simulation thread. Optional capabilities default to
/// [`HostError::Unsupported`].
pub trait HostServices: Send + Sync {
    /// Whether the actor is currently present
    fn is_online(&self, actor: ActorId) -> bool;

    /// Display name of an actor
    fn actor_name(&self, actor: ActorId) -> Option<String>;

    /// Send a chat message to one actor
    fn send_message(&self, actor: ActorId, message: &str) -> HostResult<()>;

    /// Send a chat message to every actor
    fn broadcast(&self, message: &str);

    /// Show a script error to the actor that triggered it
    fn notify_error(&self, actor: Option<ActorId>, message: &str) {
        match actor {
            Some(actor) => {
                let _ = self.send_message(actor, &format!("[Script error] {message}"));
            }
            None => tracing::warn!(message, "Script error in server-triggered run"),
        }
    }

    fn health(&self, _actor: ActorId) -> HostResult<f64> {
        Err(HostError::Unsupported("health"))
    }

    fn max_health(&self, _actor: ActorId) -> HostResult<f64> {
        Ok(20.0)
    }

    fn set_health(&self, _actor: ActorId, _health: f64) -> HostResult<()> {
        Err(HostError::Unsupported("set_health"))
    }

    fn set_food_level(&self, _actor: ActorId, _level: u32) -> HostResult<()> {
        Err(HostError::Unsupported("set_food_level"))
    }

    fn location(&self, _actor: ActorId) -> HostResult<Location> {
        Err(HostError::Unsupported("location"))
    }

    fn teleport(&self, _actor: ActorId, _target: &Location) -> HostResult<()> {
        Err(HostError::Unsupported("teleport"))
    }

    /// Lowest and highest legal y coordinate of a world
    fn height_bounds(&self, _world: &str) -> (f64, f64) {
        (-64.0, 320.0)
    }

    fn give_item(&self, _actor: ActorId, _item: &ItemStack) -> HostResult<()> {
        Err(HostError::Unsupported("give_item"))
    }

    fn count_item(&self, _actor: ActorId, _material: &str) -> HostResult<u32> {
        Err(HostError::Unsupported("count_item"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Headless Host
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of a logged host message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Chat,
    Broadcast,
    Error,
}

/// One message delivered through a [`HeadlessHost`]
#[derive(Debug, Clone, PartialEq)]
pub struct HostMessage {
    pub recipient: Option<ActorId>,
    pub kind: MessageKind,
    pub text: String,
}

/// Actor state tracked by a [`HeadlessHost`]
#[derive(Debug, Clone)]
pub struct HeadlessActor {
    pub name: String,
    pub health: f64,
    pub max_health: f64,
    pub food_level: u32,
    pub location: Location,
    pub inventory: HashMap<String, u32>,
}

impl HeadlessActor {
    fn new(name: String) -> Self {
        Self {
            name,
            health: 20.0,
            max_health: 20.0,
            food_level: 20,
            location: Location::new("world", 0.0, 64.0, 0.0),
            inventory: HashMap::new(),
        }
    }
}

/// In-memory host with an actor table and a message log
#[derive(Default)]
pub struct HeadlessHost {
    actors: RwLock<HashMap<ActorId, HeadlessActor>>,
    messages: Mutex<Vec<HostMessage>>,
}

impl HeadlessHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an actor and return its id
    pub fn join(&self, name: impl Into<String>) -> ActorId {
        let id = ActorId::new();
        self.actors.write().insert(id, HeadlessActor::new(name.into()));
        id
    }

    /// Remove an actor
    pub fn leave(&self, actor: ActorId) -> bool {
        self.actors.write().remove(&actor).is_some()
    }

    /// Snapshot of an actor's state
    pub fn actor(&self, actor: ActorId) -> Option<HeadlessActor> {
        self.actors.read().get(&actor).cloned()
    }

    /// Every message delivered so far
    pub fn messages(&self) -> Vec<HostMessage> {
        self.messages.lock().clone()
    }

    /// Chat messages delivered to one actor
    pub fn messages_for(&self, actor: ActorId) -> Vec<String> {
        self.filtered(|m| m.recipient == Some(actor) && m.kind == MessageKind::Chat)
    }

    /// Broadcast messages
    pub fn broadcasts(&self) -> Vec<String> {
        self.filtered(|m| m.kind == MessageKind::Broadcast)
    }

    /// Errors surfaced to actors (or the console for server runs)
    pub fn errors(&self) -> Vec<String> {
        self.filtered(|m| m.kind == MessageKind::Error)
    }

    pub fn clear_messages(&self) {
        self.messages.lock().clear();
    }

    fn filtered(&self, pred: impl Fn(&HostMessage) -> bool) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|m| pred(m))
            .map(|m| m.text.clone())
            .collect()
    }

    fn record(&self, recipient: Option<ActorId>, kind: MessageKind, text: &str) {
        self.messages.lock().push(HostMessage {
            recipient,
            kind,
            text: text.to_string(),
        });
    }

    fn with_actor<T>(
        &self,
        actor: ActorId,
        f: impl FnOnce(&mut HeadlessActor) -> T,
    ) -> HostResult<T> {
        let mut actors = self.actors.write();
        let state = actors.get_mut(&actor).ok_or(HostError::ActorOffline(actor))?;
        Ok(f(state))
    }
}

impl HostServices for HeadlessHost {
    fn is_online(&self, actor: ActorId) -> bool {
        self.actors.read().contains_key(&actor)
    }

    fn actor_name(&self, actor: ActorId) -> Option<String> {
        self.actors.read().get(&actor).map(|a| a.name.clone())
    }

    fn send_message(&self, actor: ActorId, message: &str) -> HostResult<()> {
        let name = self.actor_name(actor).ok_or(HostError::ActorOffline(actor))?;
        tracing::info!(target: "host", to = %name, "{}", message);
        self.record(Some(actor), MessageKind::Chat, message);
        Ok(())
    }

    fn broadcast(&self, message: &str) {
        tracing::info!(target: "host", "[broadcast] {}", message);
        self.record(None, MessageKind::Broadcast, message);
    }

    fn notify_error(&self, actor: Option<ActorId>, message: &str) {
        tracing::warn!(target: "host", actor = ?actor, "{}", message);
        self.record(actor, MessageKind::Error, message);
    }

    fn health(&self, actor: ActorId) -> HostResult<f64> {
        self.with_actor(actor, |a| a.health)
    }

    fn max_health(&self, actor: ActorId) -> HostResult<f64> {
        self.with_actor(actor, |a| a.max_health)
    }

    fn set_health(&self, actor: ActorId, health: f64) -> HostResult<()> {
        self.with_actor(actor, |a| {
            if health < 0.0 || health > a.max_health {
                return Err(HostError::Rejected(format!("health {health} out of range")));
            }
            a.health = health;
            Ok(())
        })?
    }

    fn set_food_level(&self, actor: ActorId, level: u32) -> HostResult<()> {
        self.with_actor(actor, |a| a.food_level = level)
    }

    fn location(&self, actor: ActorId) -> HostResult<Location> {
        self.with_actor(actor, |a| a.location.clone())
    }

    fn teleport(&self, actor: ActorId, target: &Location) -> HostResult<()> {
        self.with_actor(actor, |a| a.location = target.clone())
    }

    fn give_item(&self, actor: ActorId, item: &ItemStack) -> HostResult<()> {
        self.with_actor(actor, |a| {
            *a.inventory.entry(item.material.to_ascii_lowercase()).or_insert(0) += item.amount;
        })
    }

    fn count_item(&self, actor: ActorId, material: &str) -> HostResult<u32> {
        self.with_actor(actor, |a| {
            a.inventory
                .get(&material.to_ascii_lowercase())
                .copied()
                .unwrap_or(0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_leave() {
        let host = HeadlessHost::new();
        let steve = host.join("Steve");
        assert!(host.is_online(steve));
        assert_eq!(host.actor_name(steve).as_deref(), Some("Steve"));

        assert!(host.leave(steve));
        assert!(!host.is_online(steve));
        assert_eq!(host.send_message(steve, "hi"), Err(HostError::ActorOffline(steve)));
    }

    #[test]
    fn test_message_log() {
        let host = HeadlessHost::new();
        let alex = host.join("Alex");
        host.send_message(alex, "hello").unwrap();
        host.broadcast("everyone");
        host.notify_error(Some(alex), "oops");

        assert_eq!(host.messages_for(alex), vec!["hello"]);
        assert_eq!(host.broadcasts(), vec!["everyone"]);
        assert_eq!(host.errors(), vec!["oops"]);
    }

    #[test]
    fn test_set_health_rejects_out_of_range() {
        let host = HeadlessHost::new();
        let alex = host.join("Alex");
        assert!(host.set_health(alex, 25.0).is_err());
        host.set_health(alex, 5.0).unwrap();
        assert_eq!(host.health(alex), Ok(5.0));
    }

    #[test]
    fn test_inventory() {
        let host = HeadlessHost::new();
        let alex = host.join("Alex");
        host.give_item(alex, &ItemStack::new("Diamond", 3)).unwrap();
        host.give_item(alex, &ItemStack::new("diamond", 2)).unwrap();
        assert_eq!(host.count_item(alex, "DIAMOND"), Ok(5));
    }
}
