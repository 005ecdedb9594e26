//! Code Block Types - Core data structures for the block scripting engine
//!
//! This crate contains the pure data structures shared by the runtime and the
//! authoring tools: values, identifiers, block graphs and variable scopes.
//! It has no knowledge of execution.

mod graph;
mod ids;
mod scope;
mod value;

pub use graph::*;
pub use ids::*;
pub use scope::*;
pub use value::*;
