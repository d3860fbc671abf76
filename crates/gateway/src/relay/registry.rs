use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use sg_crypto::PublicKeys;
use sg_domain::trace::TraceEvent;
use sg_domain::{Error, Result};
use sg_kv::{Kv, KvExt};

use crate::observability::Emitter;
use crate::relay::fanout::{SubscriberSet, SubscriptionFilter};

/// A registered agent as stored at `agent:<did>` and returned by the
/// directory endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRegistration {
    pub did: String,
    pub public_keys: PublicKeys,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub registered_at: DateTime<Utc>,
}

/// The single logical relay actor: directory, fanout, directed delivery.
pub struct Relay {
    kv: Arc<dyn Kv>,
    subscribers: SubscriberSet,
    emitter: Arc<Emitter>,
    /// Directed-delivery sinks, one per live agent actor, keyed by did.
    inboxes: RwLock<HashMap<String, mpsc::Sender<Value>>>,
}

impl Relay {
    pub fn new(kv: Arc<dyn Kv>, emitter: Arc<Emitter>) -> Arc<Self> {
        Arc::new(Self {
            kv,
            subscribers: SubscriberSet::new(),
            emitter,
            inboxes: RwLock::new(HashMap::new()),
        })
    }

    // ── Directory ─────────────────────────────────────────────────

    /// Register (or re-register) an agent's public keys. Idempotent per did.
    pub fn register(
        &self,
        did: &str,
        public_keys: PublicKeys,
        metadata: Option<Value>,
    ) -> Result<()> {
        let registration = AgentRegistration {
            did: did.to_owned(),
            public_keys,
            metadata,
            registered_at: Utc::now(),
        };
        self.kv.put_as(&format!("agent:{did}"), &registration)?;
        TraceEvent::AgentRegistered {
            did: did.to_owned(),
        }
        .emit();
        Ok(())
    }

    /// All registrations, newest-first by registration time.
    pub fn list_registrations(&self) -> Vec<AgentRegistration> {
        let mut all: Vec<AgentRegistration> = self
            .kv
            .list_prefix("agent:")
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_value(v).ok())
            .collect();
        all.sort_by(|a, b| b.registered_at.cmp(&a.registered_at));
        all
    }

    pub fn public_keys(&self, did: &str) -> Option<AgentRegistration> {
        self.kv.get_as(&format!("agent:{did}"))
    }

    // ── Fanout ────────────────────────────────────────────────────

    pub fn subscribe(&self, filter: SubscriptionFilter) -> (u64, mpsc::Receiver<String>) {
        self.subscribers.subscribe(filter)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.unsubscribe(id);
    }

    /// Fan an event out to all matching firehose subscribers.
    pub fn emit(&self, event: &Value) -> usize {
        let (matched, delivered) = self.subscribers.fanout(event);
        let collection = event
            .get("collection")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let agent_did = event
            .get("agent_did")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        self.emitter.emit(
            "relay",
            &TraceEvent::RelayFanout {
                collection,
                agent_did,
                subscribers: matched,
                delivered,
            },
        );
        delivered
    }

    // ── Directed delivery ─────────────────────────────────────────

    /// Attach a live actor's inbox sink. Replaces any previous sink for
    /// the did (actor restart).
    pub fn attach_inbox(&self, did: &str, sink: mpsc::Sender<Value>) {
        self.inboxes.write().insert(did.to_owned(), sink);
    }

    pub fn detach_inbox(&self, did: &str) {
        self.inboxes.write().remove(did);
    }

    /// Deliver a validated `agent.comms.message` to its recipient's inbox
    /// and emit the corresponding fanout event. Delivery order from one
    /// sender is preserved by the sequential await on the sink.
    pub async fn deliver_message(&self, message: &Value) -> Result<()> {
        let recipient = message
            .get("recipient")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::NotFound("message has no recipient".into()))?
            .to_owned();
        let sender = message
            .get("sender")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        let sink = self
            .inboxes
            .read()
            .get(&recipient)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no agent registered for {recipient}")))?;

        sink.send(message.clone())
            .await
            .map_err(|_| Error::Upstream(format!("inbox for {recipient} is gone")))?;

        self.emit(&json!({
            "collection": "agent.comms.message",
            "agent_did": sender,
            "recipient": recipient,
            "record": message,
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_kv::MemoryKv;

    fn relay() -> Arc<Relay> {
        let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
        Relay::new(kv, Emitter::new(None))
    }

    fn keys() -> PublicKeys {
        PublicKeys {
            signing: "zEd".into(),
            encryption: "zX".into(),
        }
    }

    #[test]
    fn registration_round_trip_and_404() {
        let relay = relay();
        relay.register("did:cf:alice", keys(), None).unwrap();
        let found = relay.public_keys("did:cf:alice").unwrap();
        assert_eq!(found.did, "did:cf:alice");
        assert!(relay.public_keys("did:cf:ghost").is_none());
    }

    #[test]
    fn listing_is_newest_first() {
        let relay = relay();
        relay.register("did:cf:a", keys(), None).unwrap();
        relay.register("did:cf:b", keys(), None).unwrap();
        let list = relay.list_registrations();
        assert_eq!(list.len(), 2);
        assert!(list[0].registered_at >= list[1].registered_at);
    }

    #[tokio::test]
    async fn directed_delivery_reaches_inbox_and_fanout() {
        let relay = relay();
        let (tx, mut rx) = mpsc::channel(8);
        relay.attach_inbox("did:cf:bob", tx);
        let (_, mut fh) = relay.subscribe(SubscriptionFilter::default());

        let message = json!({
            "$type": "agent.comms.message",
            "sender": "did:cf:alice",
            "recipient": "did:cf:bob",
            "content": {"kind": "text", "text": "hi"},
            "createdAt": "2026-02-07T00:00:00Z"
        });
        relay.deliver_message(&message).await.unwrap();

        assert_eq!(rx.recv().await.unwrap()["sender"], "did:cf:alice");
        let line = fh.recv().await.unwrap();
        assert!(line.contains("agent.comms.message"));
    }

    #[tokio::test]
    async fn delivery_to_unknown_recipient_is_not_found() {
        let relay = relay();
        let message = json!({"recipient": "did:cf:ghost", "sender": "did:cf:a"});
        assert!(matches!(
            relay.deliver_message(&message).await,
            Err(Error::NotFound(_))
        ));
    }
}
