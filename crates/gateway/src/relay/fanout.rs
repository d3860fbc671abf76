use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;

/// Per-socket subscription filter, parsed from the firehose query string
/// and kept with the socket so it survives reconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub collections: Vec<String>,
    pub dids: Vec<String>,
}

impl Default for SubscriptionFilter {
    fn default() -> Self {
        Self {
            collections: vec!["*".into()],
            dids: vec!["*".into()],
        }
    }
}

impl SubscriptionFilter {
    /// Parse `collections=a,b&dids=x,y` style parameters. Missing or empty
    /// parameters mean wildcard.
    pub fn from_params(collections: Option<&str>, dids: Option<&str>) -> Self {
        fn split(raw: Option<&str>) -> Vec<String> {
            let items: Vec<String> = raw
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if items.is_empty() {
                vec!["*".into()]
            } else {
                items
            }
        }
        Self {
            collections: split(collections),
            dids: split(dids),
        }
    }

    pub fn matches(&self, collection: &str, did: &str) -> bool {
        let coll_ok = self
            .collections
            .iter()
            .any(|c| c == "*" || c == collection);
        let did_ok = self.dids.iter().any(|d| d == "*" || d == did);
        coll_ok && did_ok
    }
}

struct Subscriber {
    filter: SubscriptionFilter,
    tx: mpsc::Sender<String>,
}

/// The set of live firehose subscribers. Sends are non-blocking: a slow
/// socket drops events rather than stalling the relay.
#[derive(Default)]
pub struct SubscriberSet {
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a socket; returns its id and the event receiver.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> (u64, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(64);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .insert(id, Subscriber { filter, tx });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.write().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Fan an event line out to every matching subscriber. Returns
    /// `(matched, delivered)` — the difference is full or closed sockets.
    pub fn fanout(&self, event: &Value) -> (usize, usize) {
        let collection = event
            .get("collection")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let did = event
            .get("agent_did")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let line = event.to_string();

        let subscribers = self.subscribers.read();
        let mut matched = 0;
        let mut delivered = 0;
        for sub in subscribers.values() {
            if !sub.filter.matches(collection, did) {
                continue;
            }
            matched += 1;
            if sub.tx.try_send(line.clone()).is_ok() {
                delivered += 1;
            }
        }
        (matched, delivered)
    }
}
