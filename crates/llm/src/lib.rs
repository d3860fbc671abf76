//! Model client and the agentic control loop.
//!
//! The HTTP side speaks the OpenRouter chat-completions contract; the loop
//! drives a model with tools, executes its calls through a caller-supplied
//! runner, and falls back across a deduplicated model chain on retriable
//! failures.

pub mod agentic;
pub mod chain;
pub mod openrouter;
pub mod traits;

pub use agentic::{agentic_loop, LoopConfig, LoopResult, ToolCallPreview, ToolRunner, TranscriptStep};
pub use chain::{chat_with_fallback, fallback_chain, is_retriable};
pub use openrouter::OpenRouterClient;
pub use traits::{ChatRequest, ChatResponse, ModelClient, Usage};
