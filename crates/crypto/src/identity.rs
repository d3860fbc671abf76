use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sg_domain::{Error, Result};

use crate::keys::{EncryptionKeypair, SigningKeypair};

/// Stable per-actor identity: a DID plus its two keypairs.
///
/// Created on first touch, persisted into the actor's own KV namespace,
/// and never exported in private form outside the actor.
#[derive(Clone)]
pub struct AgentIdentity {
    pub did: String,
    pub signing: SigningKeypair,
    pub encryption: EncryptionKeypair,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
}

impl AgentIdentity {
    /// Mint a fresh identity for the actor instance id.
    pub fn generate(instance_id: &str) -> Self {
        Self {
            did: format!("did:cf:{instance_id}"),
            signing: SigningKeypair::generate(),
            encryption: EncryptionKeypair::generate(),
            created_at: Utc::now(),
            rotated_at: None,
        }
    }

    /// Public half only, in the relay directory wire shape.
    pub fn public_keys(&self) -> PublicKeys {
        PublicKeys {
            signing: self.signing.export_public(),
            encryption: self.encryption.export_public(),
        }
    }

    pub fn to_stored(&self) -> StoredIdentity {
        StoredIdentity {
            version: 1,
            did: self.did.clone(),
            signing_secret: BASE64.encode(*self.signing.secret_bytes()),
            encryption_secret: BASE64.encode(*self.encryption.secret_bytes()),
            created_at: self.created_at,
            rotated_at: self.rotated_at,
        }
    }

    pub fn from_stored(stored: &StoredIdentity) -> Result<Self> {
        if stored.version != 1 {
            return Err(Error::Crypto(format!(
                "unsupported identity version: {}",
                stored.version
            )));
        }
        Ok(Self {
            did: stored.did.clone(),
            signing: SigningKeypair::from_secret_bytes(decode_secret(&stored.signing_secret)?),
            encryption: EncryptionKeypair::from_secret_bytes(decode_secret(
                &stored.encryption_secret,
            )?),
            created_at: stored.created_at,
            rotated_at: stored.rotated_at,
        })
    }
}

fn decode_secret(b64: &str) -> Result<[u8; 32]> {
    let bytes = BASE64
        .decode(b64)
        .map_err(|e| Error::Crypto(format!("invalid stored key: {e}")))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::Crypto("stored key has wrong length".into()))
}

/// Versioned KV record holding the private keypair material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredIdentity {
    pub version: u32,
    pub did: String,
    pub signing_secret: String,
    pub encryption_secret: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotated_at: Option<DateTime<Utc>>,
}

/// Multibase-exported public keys as published to the relay directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicKeys {
    pub signing: String,
    pub encryption: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn did_is_derived_from_instance_id() {
        let id = AgentIdentity::generate("abc123");
        assert_eq!(id.did, "did:cf:abc123");
    }

    #[test]
    fn stored_identity_round_trip() {
        let id = AgentIdentity::generate("alice-1");
        let restored = AgentIdentity::from_stored(&id.to_stored()).unwrap();
        assert_eq!(restored.did, id.did);
        assert_eq!(
            restored.encryption.public_bytes(),
            id.encryption.public_bytes()
        );
        assert_eq!(restored.signing.public_bytes(), id.signing.public_bytes());
    }

    #[test]
    fn unknown_version_rejected() {
        let mut stored = AgentIdentity::generate("x").to_stored();
        stored.version = 9;
        assert!(AgentIdentity::from_stored(&stored).is_err());
    }
}
