//! Per-agent runtime: the single-writer actor, its cycle chain, and the
//! supporting pieces (backoff tiers, session trimming, prompt builder,
//! core toolset, extension plugins).

pub mod actor;
pub mod backoff;
pub mod cycle;
pub mod extensions;
pub mod prompt;
pub mod session;
pub mod toolset;

pub use actor::{spawn_agent, ActorHandle, LoopStatus, RuntimeDeps};
pub use cycle::Mode;
