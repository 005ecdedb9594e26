// Variable scopes
//
// Scopes partition the variable store by visibility and lifetime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::value::DataValue;

/// A variable-store partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableScope {
    /// One script invocation, cleared when the invocation ends
    Local,
    /// One actor
    Player,
    /// Every script, cleared on reload
    Global,
    /// The whole process
    Server,
    /// Durable across restarts, written on flush
    Persistent,
    /// Computed on every read, never stored
    Dynamic,
}

impl VariableScope {
    /// Resolution order for unqualified names, highest precedence first
    pub const PRECEDENCE: [VariableScope; 5] = [
        VariableScope::Dynamic,
        VariableScope::Local,
        VariableScope::Player,
        VariableScope::Global,
        VariableScope::Server,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VariableScope::Local => "local",
            VariableScope::Player => "player",
            VariableScope::Global => "global",
            VariableScope::Server => "server",
            VariableScope::Persistent => "persistent",
            VariableScope::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for VariableScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unrecognised scope names
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Unknown variable scope: {0}")]
pub struct UnknownScope(pub String);

impl FromStr for VariableScope {
    type Err = UnknownScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(VariableScope::Local),
            "player" | "actor" => Ok(VariableScope::Player),
            "global" => Ok(VariableScope::Global),
            "server" => Ok(VariableScope::Server),
            "persistent" | "saved" => Ok(VariableScope::Persistent),
            "dynamic" => Ok(VariableScope::Dynamic),
            other => Err(UnknownScope(other.to_string())),
        }
    }
}

/// A resolved variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: DataValue,
    pub scope: VariableScope,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: DataValue, scope: VariableScope) -> Self {
        Self {
            name: name.into(),
            value,
            scope,
        }
    }
}
