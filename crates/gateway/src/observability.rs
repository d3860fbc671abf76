//! Structured event emission.
//!
//! Every event becomes a single-line JSON envelope with trace/span ids and
//! a monotonic sequence number. Envelopes go three ways: into `tracing`,
//! onto a broadcast channel consumed by dashboard WebSockets, and (when
//! configured) into a batching shipper that POSTs NDJSON to an event sink.
//! All delivery is best-effort; emission never blocks an agent cycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

use sg_domain::trace::TraceEvent;

const BROADCAST_CAPACITY: usize = 256;
const SINK_BATCH_MAX: usize = 64;
const SINK_FLUSH_EVERY: Duration = Duration::from_secs(2);

pub struct Emitter {
    tx: broadcast::Sender<String>,
    seq: AtomicU64,
    sink_tx: Option<mpsc::UnboundedSender<String>>,
}

impl Emitter {
    pub fn new(sink_url: Option<String>) -> Arc<Self> {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let sink_tx = sink_url.map(spawn_shipper);
        Arc::new(Self {
            tx,
            seq: AtomicU64::new(0),
            sink_tx,
        })
    }

    /// Subscribe a dashboard socket to the live event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn emit(&self, source: &str, event: &TraceEvent) {
        event.emit();
        if let Ok(value) = serde_json::to_value(event) {
            self.emit_json(source, value);
        }
    }

    /// Wrap a raw event object in the canonical envelope and fan it out.
    pub fn emit_json(&self, source: &str, event: Value) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let envelope = json!({
            "ts": Utc::now().to_rfc3339(),
            "seq": seq,
            "traceId": uuid::Uuid::new_v4().simple().to_string(),
            "spanId": format!("{:016x}", seq.wrapping_mul(0x9E37_79B9_7F4A_7C15)),
            "source": source,
            "event": event,
        });
        let line = envelope.to_string();

        // Broadcast has no subscribers until a dashboard connects; that is
        // not an error.
        let _ = self.tx.send(line.clone());
        if let Some(ref sink) = self.sink_tx {
            let _ = sink.send(line);
        }
    }
}

/// Background task that batches envelope lines and ships them as NDJSON.
fn spawn_shipper(url: String) -> mpsc::UnboundedSender<String> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "event sink disabled: client build failed");
                return;
            }
        };

        let mut batch: Vec<String> = Vec::with_capacity(SINK_BATCH_MAX);
        let mut ticker = tokio::time::interval(SINK_FLUSH_EVERY);
        loop {
            tokio::select! {
                line = rx.recv() => match line {
                    Some(line) => {
                        batch.push(line);
                        if batch.len() >= SINK_BATCH_MAX {
                            flush(&client, &url, &mut batch).await;
                        }
                    }
                    None => {
                        flush(&client, &url, &mut batch).await;
                        break;
                    }
                },
                _ = ticker.tick() => flush(&client, &url, &mut batch).await,
            }
        }
    });
    tx
}

async fn flush(client: &reqwest::Client, url: &str, batch: &mut Vec<String>) {
    if batch.is_empty() {
        return;
    }
    let body = batch.join("\n");
    let count = batch.len();
    batch.clear();
    match client
        .post(url)
        .header("content-type", "application/x-ndjson")
        .body(body)
        .send()
        .await
    {
        Ok(resp) if !resp.status().is_success() => {
            tracing::warn!(status = %resp.status(), count, "event sink rejected batch");
        }
        Err(e) => {
            tracing::warn!(error = %e, count, "event sink unreachable, batch dropped");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn envelopes_are_single_line_json_with_ids() {
        let emitter = Emitter::new(None);
        let mut rx = emitter.subscribe();
        emitter.emit_json("relay", json!({"event": "Test"}));

        let line = rx.recv().await.unwrap();
        assert!(!line.contains('\n'));
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["seq"], 0);
        assert_eq!(parsed["source"], "relay");
        assert_eq!(parsed["traceId"].as_str().unwrap().len(), 32);
        assert_eq!(parsed["event"]["event"], "Test");
    }

    #[tokio::test]
    async fn seq_is_monotonic() {
        let emitter = Emitter::new(None);
        let mut rx = emitter.subscribe();
        emitter.emit_json("a", json!({}));
        emitter.emit_json("a", json!({}));
        let first: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        let second: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert!(second["seq"].as_u64() > first["seq"].as_u64());
    }
}
