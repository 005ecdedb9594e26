//! Blockforge - headless host for block scripts
//!
//! Wires the code block runtime to a tick driver and ships the built-in
//! action library.

pub mod actions;
pub mod driver;

pub use actions::{register_builtin_actions, register_dynamic_variables};
pub use driver::TickDriver;
