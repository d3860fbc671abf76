//! Record CRUD with per-record envelope encryption.
//!
//! All actors share one records table; each row is owned by the `did` that
//! wrote it. Read paths never error on undecryptable rows — a key mismatch
//! yields `None` (or a skipped row in listings), not a failure.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sg_crypto::{decode_public_key, envelope, EncryptionKeypair, KeyAlgorithm};
use sg_domain::trace::TraceEvent;
use sg_domain::{Error, Issue, Result};
use sg_kv::{Kv, KvExt};

use crate::bytes::Bytes;
use crate::tid::next_tid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordRow {
    pub id: String,
    pub did: String,
    pub collection: String,
    pub rkey: String,
    pub ciphertext: Bytes,
    /// Owner-wrapped DEK. `None` iff `public`. Preserved across updates so
    /// outstanding shares stay valid.
    pub encrypted_dek: Option<Bytes>,
    pub nonce: Bytes,
    pub public: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedRow {
    pub record_id: String,
    pub recipient_did: String,
    pub encrypted_dek: Bytes,
    pub shared_at: DateTime<Utc>,
}

/// One decrypted row as returned by the list operations.
#[derive(Debug, Clone, Serialize)]
pub struct ListedRecord {
    pub id: String,
    pub collection: String,
    pub record: Value,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub collection: Option<String>,
    pub limit: Option<usize>,
}

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 200;

fn record_key(id: &str) -> String {
    format!("record:{id}")
}

fn shared_key(recipient_did: &str, record_id: &str) -> String {
    format!("shared:{recipient_did}|{record_id}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MemoryStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One actor's view of the shared records table.
#[derive(Clone)]
pub struct MemoryStore {
    kv: Arc<dyn Kv>,
    did: String,
    keys: EncryptionKeypair,
}

impl MemoryStore {
    pub fn new(kv: Arc<dyn Kv>, did: impl Into<String>, keys: EncryptionKeypair) -> Self {
        Self {
            kv,
            did: did.into(),
            keys,
        }
    }

    pub fn did(&self) -> &str {
        &self.did
    }

    // ── Write path ────────────────────────────────────────────────

    /// Encrypt and persist a record. Returns the new record id
    /// (`did/collection/rkey`).
    pub fn store(&self, record: &Value) -> Result<String> {
        self.store_with_visibility(record, false)
    }

    /// Persist a record readable without a key (profile, character sheet).
    /// Public rows carry no wrapped DEK and can never be shared.
    pub fn store_public(&self, record: &Value) -> Result<String> {
        self.store_with_visibility(record, true)
    }

    fn store_with_visibility(&self, record: &Value, public: bool) -> Result<String> {
        let collection = required_type(record)?;
        let rkey = next_tid();
        let id = format!("{}/{}/{}", self.did, collection, rkey);
        let plaintext = serde_json::to_vec(record)?;

        let (ciphertext, encrypted_dek, nonce) = if public {
            (Bytes(plaintext), None, Bytes(envelope::generate_nonce().to_vec()))
        } else {
            let dek = envelope::generate_dek();
            let nonce = envelope::generate_nonce();
            let ct = envelope::encrypt(&dek, &nonce, &plaintext)?;
            let wrapped = envelope::wrap_dek(&dek, &self.keys.public_bytes())?;
            (Bytes(ct), Some(Bytes(wrapped)), Bytes(nonce.to_vec()))
        };

        let row = RecordRow {
            id: id.clone(),
            did: self.did.clone(),
            collection: collection.clone(),
            rkey,
            ciphertext,
            encrypted_dek,
            nonce,
            public,
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        };
        self.kv.put_as(&record_key(&id), &row)?;

        TraceEvent::MemoryStored {
            did: self.did.clone(),
            collection,
        }
        .emit();
        Ok(id)
    }

    /// Re-encrypt a record in place: fresh nonce, same wrapped DEK, same id.
    pub fn update(&self, id: &str, record: &Value) -> Result<()> {
        let collection = required_type(record)?;
        let mut row = self
            .visible_row(id)
            .ok_or_else(|| Error::NotFound(format!("record {id}")))?;
        if row.collection != collection {
            return Err(Error::invalid_record(vec![Issue::new(
                "$type",
                format!("expected {}, got {}", row.collection, collection),
            )]));
        }

        let plaintext = serde_json::to_vec(record)?;
        if row.public {
            row.ciphertext = Bytes(plaintext);
        } else {
            let wrapped = row
                .encrypted_dek
                .as_ref()
                .ok_or_else(|| Error::Crypto("private row missing wrapped DEK".into()))?;
            let dek = envelope::unwrap_dek(wrapped.as_slice(), &self.keys)?;
            let nonce = envelope::generate_nonce();
            row.ciphertext = Bytes(envelope::encrypt(&dek, &nonce, &plaintext)?);
            row.nonce = Bytes(nonce.to_vec());
            // encrypted_dek is intentionally untouched: shares wrap this DEK.
        }
        row.updated_at = Some(Utc::now());
        self.kv.put_as(&record_key(id), &row)
    }

    /// Mark a record deleted. Returns `false` when the row is missing or
    /// already deleted.
    pub fn soft_delete(&self, id: &str) -> Result<bool> {
        let Some(mut row) = self.kv.get_as::<RecordRow>(&record_key(id)) else {
            return Ok(false);
        };
        if row.deleted_at.is_some() {
            return Ok(false);
        }
        row.deleted_at = Some(Utc::now());
        self.kv.put_as(&record_key(id), &row)?;
        Ok(true)
    }

    // ── Read path ─────────────────────────────────────────────────

    /// Decrypt one record. `None` for missing, deleted, or undecryptable
    /// rows — a key mismatch is not an error.
    pub fn retrieve(&self, id: &str) -> Option<Value> {
        let row = self.visible_row(id)?;
        self.decrypt_own(&row)
    }

    /// Newest-first listing of this actor's records. Undecryptable rows are
    /// skipped, never aborting the listing.
    pub fn list(&self, params: &ListParams) -> Vec<ListedRecord> {
        let limit = effective_limit(params.limit);
        let mut rows: Vec<RecordRow> = self
            .kv
            .list_prefix("record:")
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_value::<RecordRow>(v).ok())
            .filter(|r| r.did == self.did && r.deleted_at.is_none())
            .filter(|r| {
                params
                    .collection
                    .as_ref()
                    .map(|c| &r.collection == c)
                    .unwrap_or(true)
            })
            .collect();
        rows.sort_by(|a, b| b.rkey.cmp(&a.rkey));

        rows.into_iter()
            .filter_map(|row| {
                let record = self.decrypt_own(&row)?;
                Some(ListedRecord {
                    id: row.id,
                    collection: row.collection,
                    record,
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                })
            })
            .take(limit)
            .collect()
    }

    // ── Sharing ───────────────────────────────────────────────────

    /// Grant `recipient_did` read access by re-wrapping the record's DEK for
    /// their multibase-exported X25519 key. Idempotent per
    /// `(record_id, recipient_did)`.
    pub fn share(&self, id: &str, recipient_did: &str, recipient_public: &str) -> Result<()> {
        let row = self
            .visible_row(id)
            .ok_or_else(|| Error::NotFound(format!("record {id}")))?;
        if row.public {
            return Err(Error::Conflict("cannot share a public record".into()));
        }
        let (algorithm, raw_key) = decode_public_key(recipient_public)?;
        if algorithm != KeyAlgorithm::X25519 {
            return Err(Error::Crypto("recipient key must be X25519".into()));
        }

        let wrapped = row
            .encrypted_dek
            .as_ref()
            .ok_or_else(|| Error::Crypto("private row missing wrapped DEK".into()))?;
        let dek = envelope::unwrap_dek(wrapped.as_slice(), &self.keys)?;
        let rewrapped = envelope::wrap_dek(&dek, &raw_key)?;

        let shared = SharedRow {
            record_id: id.to_owned(),
            recipient_did: recipient_did.to_owned(),
            encrypted_dek: Bytes(rewrapped),
            shared_at: Utc::now(),
        };
        self.kv.put_as(&shared_key(recipient_did, id), &shared)
    }

    /// Recipient side: decrypt a record someone shared with this actor.
    pub fn retrieve_shared(&self, id: &str) -> Option<Value> {
        let shared: SharedRow = self.kv.get_as(&shared_key(&self.did, id))?;
        let row: RecordRow = self.kv.get_as(&record_key(id))?;
        if row.deleted_at.is_some() {
            return None;
        }
        let dek = envelope::unwrap_dek(shared.encrypted_dek.as_slice(), &self.keys).ok()?;
        decrypt_row(&dek, &row)
    }

    /// Newest-first listing of records shared with this actor.
    pub fn list_shared(&self, params: &ListParams) -> Vec<ListedRecord> {
        let limit = effective_limit(params.limit);
        let mut joined: Vec<(SharedRow, RecordRow)> = self
            .kv
            .list_prefix(&format!("shared:{}|", self.did))
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_value::<SharedRow>(v).ok())
            .filter_map(|shared| {
                let row: RecordRow = self.kv.get_as(&record_key(&shared.record_id))?;
                (row.deleted_at.is_none()).then_some((shared, row))
            })
            .filter(|(_, row)| {
                params
                    .collection
                    .as_ref()
                    .map(|c| &row.collection == c)
                    .unwrap_or(true)
            })
            .collect();
        joined.sort_by(|(_, a), (_, b)| b.rkey.cmp(&a.rkey));

        joined
            .into_iter()
            .filter_map(|(shared, row)| {
                let dek = envelope::unwrap_dek(shared.encrypted_dek.as_slice(), &self.keys).ok()?;
                let record = decrypt_row(&dek, &row)?;
                Some(ListedRecord {
                    id: row.id,
                    collection: row.collection,
                    record,
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                })
            })
            .take(limit)
            .collect()
    }

    // ── Internals ─────────────────────────────────────────────────

    fn visible_row(&self, id: &str) -> Option<RecordRow> {
        let row: RecordRow = self.kv.get_as(&record_key(id))?;
        row.deleted_at.is_none().then_some(row)
    }

    fn decrypt_own(&self, row: &RecordRow) -> Option<Value> {
        if row.public {
            return serde_json::from_slice(row.ciphertext.as_slice()).ok();
        }
        let wrapped = row.encrypted_dek.as_ref()?;
        let dek = envelope::unwrap_dek(wrapped.as_slice(), &self.keys).ok()?;
        decrypt_row(&dek, row)
    }
}

fn decrypt_row(dek: &[u8; envelope::DEK_LEN], row: &RecordRow) -> Option<Value> {
    if row.public {
        return serde_json::from_slice(row.ciphertext.as_slice()).ok();
    }
    let nonce: [u8; envelope::NONCE_LEN] = row.nonce.as_slice().try_into().ok()?;
    let plaintext = envelope::decrypt(dek, &nonce, row.ciphertext.as_slice()).ok()?;
    serde_json::from_slice(&plaintext).ok()
}

fn required_type(record: &Value) -> Result<String> {
    match record.get("$type").and_then(Value::as_str) {
        Some(t) if !t.is_empty() => Ok(t.to_owned()),
        _ => Err(Error::invalid_record(vec![Issue::new(
            "$type",
            "missing or empty $type",
        )])),
    }
}

fn effective_limit(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sg_kv::MemoryKv;

    fn note(summary: &str) -> Value {
        json!({
            "$type": "agent.memory.note",
            "summary": summary,
            "createdAt": "2026-02-07T00:00:00.000Z"
        })
    }

    fn store_for(kv: &Arc<dyn Kv>, did: &str) -> (MemoryStore, EncryptionKeypair) {
        let keys = EncryptionKeypair::generate();
        (MemoryStore::new(kv.clone(), did, keys.clone()), keys)
    }

    fn shared_kv() -> Arc<dyn Kv> {
        Arc::new(MemoryKv::new())
    }

    #[test]
    fn store_and_retrieve_round_trip() {
        let kv = shared_kv();
        let (store, _) = store_for(&kv, "did:cf:alice");
        let id = store.store(&note("Hi")).unwrap();
        assert!(id.contains("/agent.memory.note/"));
        assert_eq!(store.retrieve(&id).unwrap()["summary"], "Hi");
    }

    #[test]
    fn store_requires_type() {
        let kv = shared_kv();
        let (store, _) = store_for(&kv, "did:cf:alice");
        let err = store.store(&json!({"summary": "no type"})).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord { .. }));
    }

    #[test]
    fn retrieve_with_wrong_identity_yields_none_not_error() {
        let kv = shared_kv();
        let (store, _) = store_for(&kv, "did:cf:alice");
        let id = store.store(&note("secret")).unwrap();

        // Same did, different keys: decryption silently fails.
        let imposter = MemoryStore::new(kv.clone(), "did:cf:alice", EncryptionKeypair::generate());
        assert!(imposter.retrieve(&id).is_none());
    }

    #[test]
    fn update_keeps_dek_and_freshens_nonce() {
        let kv = shared_kv();
        let (store, _) = store_for(&kv, "did:cf:alice");
        let id = store.store(&note("v1")).unwrap();

        let before: RecordRow =
            serde_json::from_value(kv.get(&format!("record:{id}")).unwrap()).unwrap();
        store.update(&id, &note("v2")).unwrap();
        let after: RecordRow =
            serde_json::from_value(kv.get(&format!("record:{id}")).unwrap()).unwrap();

        assert_eq!(store.retrieve(&id).unwrap()["summary"], "v2");
        assert_ne!(before.nonce, after.nonce, "nonce must be fresh per write");
        assert_eq!(
            before.encrypted_dek, after.encrypted_dek,
            "wrapped DEK must survive updates"
        );
        assert!(after.updated_at.is_some());
    }

    #[test]
    fn update_rejects_type_change_and_missing_record() {
        let kv = shared_kv();
        let (store, _) = store_for(&kv, "did:cf:alice");
        let id = store.store(&note("v1")).unwrap();

        let decision = json!({"$type": "agent.memory.decision", "decision": "x"});
        assert!(matches!(
            store.update(&id, &decision),
            Err(Error::InvalidRecord { .. })
        ));
        assert!(matches!(
            store.update("did:cf:alice/agent.memory.note/nope", &note("x")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn soft_delete_hides_and_is_idempotent_safe() {
        let kv = shared_kv();
        let (store, _) = store_for(&kv, "did:cf:alice");
        let id = store.store(&note("gone soon")).unwrap();

        assert!(store.soft_delete(&id).unwrap());
        assert!(store.retrieve(&id).is_none());
        assert!(store.list(&ListParams::default()).is_empty());
        assert!(!store.soft_delete(&id).unwrap(), "second delete reports false");
        assert!(matches!(
            store.update(&id, &note("zombie")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn share_grants_recipient_and_only_recipient() {
        let kv = shared_kv();
        let (alice, _) = store_for(&kv, "did:cf:alice");
        let (bob, bob_keys) = store_for(&kv, "did:cf:bob");
        let (eve, _) = store_for(&kv, "did:cf:eve");

        let id = alice.store(&note("for bob")).unwrap();
        alice
            .share(&id, "did:cf:bob", &bob_keys.export_public())
            .unwrap();

        assert_eq!(bob.retrieve_shared(&id).unwrap(), alice.retrieve(&id).unwrap());
        assert!(eve.retrieve_shared(&id).is_none());

        // Idempotent: sharing again replaces the grant, still decryptable.
        alice
            .share(&id, "did:cf:bob", &bob_keys.export_public())
            .unwrap();
        assert_eq!(bob.retrieve_shared(&id).unwrap()["summary"], "for bob");
    }

    #[test]
    fn shares_survive_owner_updates() {
        let kv = shared_kv();
        let (alice, _) = store_for(&kv, "did:cf:alice");
        let (bob, bob_keys) = store_for(&kv, "did:cf:bob");

        let id = alice.store(&note("v1")).unwrap();
        alice
            .share(&id, "did:cf:bob", &bob_keys.export_public())
            .unwrap();
        alice.update(&id, &note("v2")).unwrap();

        assert_eq!(bob.retrieve_shared(&id).unwrap()["summary"], "v2");
    }

    #[test]
    fn deleted_records_invisible_to_recipients() {
        let kv = shared_kv();
        let (alice, _) = store_for(&kv, "did:cf:alice");
        let (bob, bob_keys) = store_for(&kv, "did:cf:bob");

        let id = alice.store(&note("ephemeral")).unwrap();
        alice
            .share(&id, "did:cf:bob", &bob_keys.export_public())
            .unwrap();
        alice.soft_delete(&id).unwrap();

        assert!(bob.retrieve_shared(&id).is_none());
        assert!(bob.list_shared(&ListParams::default()).is_empty());
    }

    #[test]
    fn public_records_cannot_be_shared() {
        let kv = shared_kv();
        let (alice, _) = store_for(&kv, "did:cf:alice");
        let (_, bob_keys) = store_for(&kv, "did:cf:bob");

        let id = alice.store_public(&note("profile")).unwrap();
        assert!(matches!(
            alice.share(&id, "did:cf:bob", &bob_keys.export_public()),
            Err(Error::Conflict(_))
        ));
        // Public rows are readable without unwrapping.
        assert_eq!(alice.retrieve(&id).unwrap()["summary"], "profile");
    }

    #[test]
    fn list_is_newest_first_filtered_and_skips_undecryptable() {
        let kv = shared_kv();
        let (store, _) = store_for(&kv, "did:cf:alice");
        let first = store.store(&note("first")).unwrap();
        let _second = store.store(&note("second")).unwrap();
        let third = store.store(&note("third")).unwrap();
        store
            .store(&json!({"$type": "agent.memory.decision", "decision": "d",
                           "context": "c", "rationale": "r", "status": "accepted",
                           "createdAt": "2026-02-07T00:00:00Z"}))
            .unwrap();

        // Corrupt one row's ciphertext; the listing must simply skip it.
        let key = format!("record:{first}");
        let mut row: RecordRow = serde_json::from_value(kv.get(&key).unwrap()).unwrap();
        row.ciphertext = Bytes(vec![0u8; 16]);
        kv.put(&key, serde_json::to_value(&row).unwrap()).unwrap();

        let notes = store.list(&ListParams {
            collection: Some("agent.memory.note".into()),
            limit: None,
        });
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].id, third, "newest first");
        assert_eq!(notes[0].record["summary"], "third");

        let limited = store.list(&ListParams {
            collection: None,
            limit: Some(2),
        });
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn limit_is_capped() {
        assert_eq!(effective_limit(None), 50);
        assert_eq!(effective_limit(Some(10)), 10);
        assert_eq!(effective_limit(Some(5_000)), 200);
    }
}
