//! Code Block Runtime - Execution engine for block scripts
//!
//! This crate contains the action registry, the executor, scoped variables,
//! tick-driven loops and the [`ScriptEngine`] service that ties them together.
//! The host plugs in through [`HostServices`], [`TickScheduler`] and
//! [`PersistenceStore`].

pub use codeblock_types;

mod args;
mod config;
mod context;
mod engine;
mod error;
mod executor;
mod host;
mod loops;
mod persistence;
mod registry;
mod scheduler;
mod variables;

pub use args::*;
pub use config::*;
pub use context::*;
pub use engine::*;
pub use error::*;
pub use executor::*;
pub use host::*;
pub use loops::*;
pub use persistence::*;
pub use registry::*;
pub use scheduler::*;
pub use variables::*;
