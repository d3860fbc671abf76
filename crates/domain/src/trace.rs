use serde::Serialize;

/// Structured trace events emitted across all swarmgate crates.
///
/// Events serialize to single-line JSON; the gateway's observability
/// emitter wraps them with trace/span ids before broadcast.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    CycleStart {
        agent: String,
        loop_count: u64,
        mode: String,
    },
    CycleEnd {
        agent: String,
        loop_count: u64,
        mode: String,
        duration_ms: u64,
        errors: usize,
        error_category: Option<String>,
        backoff_streak: u32,
        next_interval_ms: u64,
    },
    CycleSkipped {
        agent: String,
        reason: String,
    },
    LoopError {
        agent: String,
        phase: String,
        category: String,
        message: String,
    },
    ModelRequest {
        model: String,
        duration_ms: u64,
        steps: usize,
        fallback_index: usize,
    },
    ModelFallback {
        from_model: String,
        to_model: String,
        reason: String,
    },
    ToolDispatched {
        agent: String,
        tool: String,
        ok: bool,
        duration_ms: u64,
    },
    ToolPhaseDone {
        agent: String,
        calls: usize,
        truncated: bool,
        timed_out: bool,
    },
    InboxDelivered {
        recipient: String,
        sender: String,
        interrupted_timer: bool,
    },
    RelayFanout {
        collection: String,
        agent_did: String,
        subscribers: usize,
        delivered: usize,
    },
    SessionArchived {
        agent: String,
        archived: usize,
        base_index: u64,
    },
    MemoryStored {
        did: String,
        collection: String,
    },
    AgentRegistered {
        did: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "sg_event");
    }
}
