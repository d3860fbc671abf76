//! The relay: agent directory, public-key lookup, event fanout to filtered
//! WebSocket subscribers, and directed inbox delivery.

pub mod fanout;
pub mod registry;

pub use fanout::{SubscriberSet, SubscriptionFilter};
pub use registry::{AgentRegistration, Relay};
