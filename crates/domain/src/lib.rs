//! Shared domain types for the swarmgate agent network.
//!
//! Everything the other crates agree on lives here: the common error type,
//! agent configuration and goals, provider-agnostic message and tool-call
//! formats, and the structured trace events emitted across the workspace.

pub mod config;
pub mod error;
pub mod tool;
pub mod trace;

pub use error::{Error, Issue, Result};
