//! Tool registry and dispatcher for agent cycles.
//!
//! Tools are named handlers with JSON-schema parameters. The dispatcher
//! enforces the per-cycle call cap, the tool-phase wall budget, the
//! allowlist (after environment alias routing), and capability guards, and
//! records every attempt in the bounded action-outcome log.

pub mod dispatch;
pub mod environment;
pub mod outcome;
pub mod registry;

pub use dispatch::{dispatch_phase, CallRecord, DispatchConfig, DispatchContext, PhaseReport};
pub use environment::{Environment, TurnState};
pub use outcome::OutcomeLog;
pub use registry::{Tool, ToolHandler, ToolRegistry};
