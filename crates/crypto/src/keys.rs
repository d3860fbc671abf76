use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use sg_domain::{Error, Result};

/// Multicodec prefix for an Ed25519 public key.
const MULTICODEC_ED25519: [u8; 2] = [0xED, 0x01];
/// Multicodec prefix for an X25519 public key.
const MULTICODEC_X25519: [u8; 2] = [0xEC, 0x01];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Ed25519,
    X25519,
}

/// Export a raw 32-byte public key as multibase: `"z" + base58btc(prefix || raw)`.
pub fn export_public_key(algorithm: KeyAlgorithm, raw: &[u8; 32]) -> String {
    let prefix = match algorithm {
        KeyAlgorithm::Ed25519 => MULTICODEC_ED25519,
        KeyAlgorithm::X25519 => MULTICODEC_X25519,
    };
    let mut bytes = Vec::with_capacity(2 + raw.len());
    bytes.extend_from_slice(&prefix);
    bytes.extend_from_slice(raw);
    format!("z{}", bs58::encode(bytes).into_string())
}

/// Decode a multibase public key back to its algorithm and raw bytes.
pub fn decode_public_key(exported: &str) -> Result<(KeyAlgorithm, [u8; 32])> {
    let encoded = exported
        .strip_prefix('z')
        .ok_or_else(|| Error::Crypto("public key is not multibase base58btc".into()))?;
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| Error::Crypto(format!("invalid base58 key: {e}")))?;
    if bytes.len() != 34 {
        return Err(Error::Crypto(format!(
            "public key has wrong length: {}",
            bytes.len()
        )));
    }
    let algorithm = match [bytes[0], bytes[1]] {
        MULTICODEC_ED25519 => KeyAlgorithm::Ed25519,
        MULTICODEC_X25519 => KeyAlgorithm::X25519,
        other => {
            return Err(Error::Crypto(format!(
                "unknown multicodec prefix: {other:02x?}"
            )))
        }
    };
    let raw: [u8; 32] = bytes[2..]
        .try_into()
        .map_err(|_| Error::Crypto("malformed public key".into()))?;
    Ok((algorithm, raw))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// X25519 encryption keypair
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Static X25519 keypair used to wrap and unwrap record DEKs.
#[derive(Clone)]
pub struct EncryptionKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EncryptionKeypair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    /// Secret bytes for persistence into the owner's KV. Never leaves the
    /// actor boundary.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// X25519 ECDH against a raw peer public key.
    pub fn derive_shared_secret(&self, peer_public: &[u8; 32]) -> Zeroizing<[u8; 32]> {
        let peer = PublicKey::from(*peer_public);
        Zeroizing::new(self.secret.diffie_hellman(&peer).to_bytes())
    }

    pub fn export_public(&self) -> String {
        export_public_key(KeyAlgorithm::X25519, self.public.as_bytes())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ed25519 signing keypair
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ed25519 keypair used to sign relay registrations and directed messages.
#[derive(Clone)]
pub struct SigningKeypair {
    signing: SigningKey,
}

impl SigningKeypair {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&bytes),
        }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing.to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }

    pub fn export_public(&self) -> String {
        export_public_key(KeyAlgorithm::Ed25519, &self.public_bytes())
    }
}

/// Verify an Ed25519 signature against a raw public key.
pub fn verify_signature(public: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> Result<()> {
    let key = VerifyingKey::from_bytes(public)
        .map_err(|e| Error::Crypto(format!("invalid verifying key: {e}")))?;
    let sig = Signature::from_bytes(signature);
    key.verify(message, &sig)
        .map_err(|e| Error::Crypto(format!("signature verification failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multibase_export_has_z_prefix_and_decodes() {
        let kp = SigningKeypair::generate();
        let exported = kp.export_public();
        assert!(exported.starts_with('z'));

        let decoded = bs58::decode(&exported[1..]).into_vec().unwrap();
        assert_eq!(&decoded[..2], &[0xED, 0x01]);
        assert_eq!(&decoded[2..], kp.public_bytes());
    }

    #[test]
    fn x25519_export_uses_x25519_prefix() {
        let kp = EncryptionKeypair::generate();
        let decoded = bs58::decode(&kp.export_public()[1..]).into_vec().unwrap();
        assert_eq!(&decoded[..2], &[0xEC, 0x01]);
    }

    #[test]
    fn ecdh_is_symmetric() {
        let a = EncryptionKeypair::generate();
        let b = EncryptionKeypair::generate();
        let ab = a.derive_shared_secret(&b.public_bytes());
        let ba = b.derive_shared_secret(&a.public_bytes());
        assert_eq!(*ab, *ba);
    }

    #[test]
    fn sign_verify_round_trip() {
        let kp = SigningKeypair::generate();
        let sig = kp.sign(b"register");
        verify_signature(&kp.public_bytes(), b"register", &sig).unwrap();
        assert!(verify_signature(&kp.public_bytes(), b"tampered", &sig).is_err());
    }

    #[test]
    fn decode_public_key_round_trip() {
        let kp = EncryptionKeypair::generate();
        let (alg, raw) = decode_public_key(&kp.export_public()).unwrap();
        assert_eq!(alg, KeyAlgorithm::X25519);
        assert_eq!(raw, kp.public_bytes());
        assert!(decode_public_key("not-multibase").is_err());
    }

    #[test]
    fn keypair_survives_secret_round_trip() {
        let kp = EncryptionKeypair::generate();
        let restored = EncryptionKeypair::from_secret_bytes(*kp.secret_bytes());
        assert_eq!(kp.public_bytes(), restored.public_bytes());
    }
}
