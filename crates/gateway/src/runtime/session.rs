//! The agent's conversation transcript and its trim/archive policy.
//!
//! The live window is bounded at 50 messages. Overflow is archived into the
//! encrypted memory store as an `agent.session.archive` record *before*
//! `base_index` advances, so history is durable even though the window is
//! bounded.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use sg_domain::tool::Message;
use sg_domain::trace::TraceEvent;
use sg_domain::Result;
use sg_memory::MemoryStore;

/// Maximum messages kept in the live window after a save.
pub const SESSION_WINDOW: usize = 50;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Global index of `messages[0]` across the agent's whole history.
    pub base_index: u64,
    pub messages: Vec<Message>,
    /// Indices where the conversation window was reset (reflection mode).
    pub branch_points: Vec<u64>,
}

impl Session {
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Global index of the next message to be appended.
    pub fn next_index(&self) -> u64 {
        self.base_index + self.messages.len() as u64
    }

    /// Record a conversation-window reset (reflection clears the live
    /// transcript but history already archived stays reachable).
    pub fn branch(&mut self) {
        let at = self.next_index();
        self.branch_points.push(at);
        self.base_index = at;
        self.messages.clear();
    }

    /// Trim to the live window, archiving overflow first.
    ///
    /// Exactly one archive record is written per overflow event; the
    /// archive write happens before `base_index` advances so a failed
    /// write never loses messages.
    pub fn save(&mut self, agent: &str, memory: &MemoryStore) -> Result<()> {
        if self.messages.len() <= SESSION_WINDOW {
            return Ok(());
        }
        let overflow = self.messages.len() - SESSION_WINDOW;
        let archived: Vec<Message> = self.messages[..overflow].to_vec();

        let record = json!({
            "$type": "agent.session.archive",
            "fromIndex": self.base_index,
            "toIndex": self.base_index + overflow as u64 - 1,
            "messages": archived,
            "archivedAt": Utc::now().to_rfc3339(),
        });
        memory.store(&record)?;

        self.messages.drain(..overflow);
        self.base_index += overflow as u64;

        TraceEvent::SessionArchived {
            agent: agent.to_owned(),
            archived: overflow,
            base_index: self.base_index,
        }
        .emit();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_crypto::EncryptionKeypair;
    use sg_kv::{Kv, MemoryKv};
    use sg_memory::ListParams;
    use std::sync::Arc;

    fn memory() -> MemoryStore {
        let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
        MemoryStore::new(kv, "did:cf:alice", EncryptionKeypair::generate())
    }

    #[test]
    fn save_under_window_is_noop() {
        let store = memory();
        let mut session = Session::default();
        for i in 0..10 {
            session.append(Message::user(format!("m{i}")));
        }
        session.save("alice", &store).unwrap();
        assert_eq!(session.messages.len(), 10);
        assert_eq!(session.base_index, 0);
        assert!(store.list(&ListParams::default()).is_empty());
    }

    #[test]
    fn overflow_archives_once_and_advances_base_index() {
        let store = memory();
        let mut session = Session::default();
        for i in 0..64 {
            session.append(Message::user(format!("m{i}")));
        }
        session.save("alice", &store).unwrap();

        assert_eq!(session.messages.len(), SESSION_WINDOW);
        assert_eq!(session.base_index, 14);
        assert_eq!(session.messages[0].content, "m14");

        let archives = store.list(&ListParams {
            collection: Some("agent.session.archive".into()),
            limit: None,
        });
        assert_eq!(archives.len(), 1, "exactly one archive per overflow event");
        let record = &archives[0].record;
        assert_eq!(record["fromIndex"], 0);
        assert_eq!(record["toIndex"], 13);
        assert_eq!(record["messages"].as_array().unwrap().len(), 14);
    }

    #[test]
    fn repeated_overflows_stack_archives() {
        let store = memory();
        let mut session = Session::default();
        for i in 0..60 {
            session.append(Message::user(format!("a{i}")));
        }
        session.save("alice", &store).unwrap();
        for i in 0..20 {
            session.append(Message::user(format!("b{i}")));
        }
        session.save("alice", &store).unwrap();

        assert_eq!(session.messages.len(), SESSION_WINDOW);
        assert_eq!(session.base_index, 30);
        let archives = store.list(&ListParams {
            collection: Some("agent.session.archive".into()),
            limit: None,
        });
        assert_eq!(archives.len(), 2);
        // Newest-first listing: the second archive covers indices 10..29.
        assert_eq!(archives[0].record["fromIndex"], 10);
        assert_eq!(archives[0].record["toIndex"], 29);
    }

    #[test]
    fn branch_resets_window_and_records_point() {
        let mut session = Session::default();
        session.base_index = 5;
        for _ in 0..7 {
            session.append(Message::user("x"));
        }
        session.branch();
        assert!(session.messages.is_empty());
        assert_eq!(session.base_index, 12);
        assert_eq!(session.branch_points, [12]);
    }
}
