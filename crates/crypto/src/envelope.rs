use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

use sg_domain::{Error, Result};

use crate::keys::EncryptionKeypair;

pub const DEK_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

const ENVELOPE_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const EPHEMERAL_PUB_LEN: usize = 32;
/// version + salt + nonce + ephemeral pub; the GCM ciphertext follows.
const ENVELOPE_HEADER_LEN: usize = 1 + SALT_LEN + NONCE_LEN + EPHEMERAL_PUB_LEN;
const HKDF_INFO: &[u8] = b"atproto-agent-network:dek";

/// Fresh 32-byte data-encryption key.
pub fn generate_dek() -> Zeroizing<[u8; DEK_LEN]> {
    let mut dek = Zeroizing::new([0u8; DEK_LEN]);
    OsRng.fill_bytes(dek.as_mut());
    dek
}

/// Fresh 12-byte AES-GCM nonce. Must be regenerated on every write.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// AES-256-GCM encrypt `plaintext` under `dek` with `nonce`.
pub fn encrypt(dek: &[u8; DEK_LEN], nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(dek));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| Error::Crypto("AES-GCM encryption failed".into()))
}

/// AES-256-GCM decrypt. Fails on tag mismatch or wrong key.
pub fn decrypt(dek: &[u8; DEK_LEN], nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(dek));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Crypto("AES-GCM decryption failed".into()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DEK wrapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wrap a DEK for `recipient_public`.
///
/// Layout: `version(1)=1 || salt(16) || nonce(12) || ephemeral_pub(32) || ct`.
/// A fresh ephemeral keypair and salt are sampled per call, so wrapping the
/// same DEK twice yields distinct envelopes that both unwrap to it.
pub fn wrap_dek(dek: &[u8; DEK_LEN], recipient_public: &[u8; 32]) -> Result<Vec<u8>> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_pub = PublicKey::from(&ephemeral);
    let shared = Zeroizing::new(
        ephemeral
            .diffie_hellman(&PublicKey::from(*recipient_public))
            .to_bytes(),
    );

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let nonce = generate_nonce();

    let kek = derive_kek(&shared, &salt)?;
    let ct = encrypt(&kek, &nonce, dek.as_slice())?;

    let mut envelope = Vec::with_capacity(ENVELOPE_HEADER_LEN + ct.len());
    envelope.push(ENVELOPE_VERSION);
    envelope.extend_from_slice(&salt);
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(ephemeral_pub.as_bytes());
    envelope.extend_from_slice(&ct);
    Ok(envelope)
}

/// Reverse of [`wrap_dek`]. Fails on unknown version, short input, or a
/// key that was not the wrap target.
pub fn unwrap_dek(envelope: &[u8], recipient: &EncryptionKeypair) -> Result<Zeroizing<[u8; DEK_LEN]>> {
    if envelope.len() < ENVELOPE_HEADER_LEN {
        return Err(Error::Crypto(format!(
            "envelope too short: {} bytes",
            envelope.len()
        )));
    }
    if envelope[0] != ENVELOPE_VERSION {
        return Err(Error::Crypto(format!(
            "unsupported envelope version: {}",
            envelope[0]
        )));
    }

    let salt: [u8; SALT_LEN] = envelope[1..1 + SALT_LEN]
        .try_into()
        .map_err(|_| Error::Crypto("malformed envelope salt".into()))?;
    let nonce: [u8; NONCE_LEN] = envelope[1 + SALT_LEN..1 + SALT_LEN + NONCE_LEN]
        .try_into()
        .map_err(|_| Error::Crypto("malformed envelope nonce".into()))?;
    let ephemeral_pub: [u8; EPHEMERAL_PUB_LEN] = envelope
        [1 + SALT_LEN + NONCE_LEN..ENVELOPE_HEADER_LEN]
        .try_into()
        .map_err(|_| Error::Crypto("malformed ephemeral key".into()))?;
    let ct = &envelope[ENVELOPE_HEADER_LEN..];

    let shared = recipient.derive_shared_secret(&ephemeral_pub);
    let kek = derive_kek(&shared, &salt)?;
    let dek = decrypt(&kek, &nonce, ct)?;

    let dek: [u8; DEK_LEN] = dek
        .as_slice()
        .try_into()
        .map_err(|_| Error::Crypto("unwrapped DEK has wrong length".into()))?;
    Ok(Zeroizing::new(dek))
}

fn derive_kek(shared: &[u8; 32], salt: &[u8; SALT_LEN]) -> Result<Zeroizing<[u8; DEK_LEN]>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), shared);
    let mut kek = Zeroizing::new([0u8; DEK_LEN]);
    hk.expand(HKDF_INFO, kek.as_mut())
        .map_err(|_| Error::Crypto("HKDF expansion failed".into()))?;
    Ok(kek)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let dek = generate_dek();
        let nonce = generate_nonce();
        let ct = encrypt(&dek, &nonce, b"private note").unwrap();
        assert_ne!(ct.as_slice(), b"private note");
        assert_eq!(decrypt(&dek, &nonce, &ct).unwrap(), b"private note");
    }

    #[test]
    fn decrypt_with_wrong_dek_fails() {
        let dek = generate_dek();
        let nonce = generate_nonce();
        let ct = encrypt(&dek, &nonce, b"secret").unwrap();
        let other = generate_dek();
        assert!(decrypt(&other, &nonce, &ct).is_err());
    }

    #[test]
    fn wrap_unwrap_round_trip() {
        let recipient = EncryptionKeypair::generate();
        let dek = generate_dek();
        let envelope = wrap_dek(&dek, &recipient.public_bytes()).unwrap();
        let unwrapped = unwrap_dek(&envelope, &recipient).unwrap();
        assert_eq!(*unwrapped, *dek);
    }

    #[test]
    fn unwrap_with_wrong_recipient_fails() {
        let recipient = EncryptionKeypair::generate();
        let eve = EncryptionKeypair::generate();
        let dek = generate_dek();
        let envelope = wrap_dek(&dek, &recipient.public_bytes()).unwrap();
        assert!(unwrap_dek(&envelope, &eve).is_err());
    }

    #[test]
    fn wrap_is_non_deterministic() {
        let recipient = EncryptionKeypair::generate();
        let dek = generate_dek();
        let a = wrap_dek(&dek, &recipient.public_bytes()).unwrap();
        let b = wrap_dek(&dek, &recipient.public_bytes()).unwrap();
        assert_ne!(a, b);
        assert_eq!(*unwrap_dek(&a, &recipient).unwrap(), *dek);
        assert_eq!(*unwrap_dek(&b, &recipient).unwrap(), *dek);
    }

    #[test]
    fn unwrap_rejects_bad_version_and_short_input() {
        let recipient = EncryptionKeypair::generate();
        let dek = generate_dek();
        let mut envelope = wrap_dek(&dek, &recipient.public_bytes()).unwrap();

        envelope[0] = 2;
        assert!(unwrap_dek(&envelope, &recipient).is_err());

        assert!(unwrap_dek(&[1u8; 60], &recipient).is_err());
    }

    #[test]
    fn envelope_layout() {
        let recipient = EncryptionKeypair::generate();
        let dek = generate_dek();
        let envelope = wrap_dek(&dek, &recipient.public_bytes()).unwrap();
        assert_eq!(envelope[0], 1);
        // 32-byte DEK + 16-byte GCM tag after the 61-byte header.
        assert_eq!(envelope.len(), ENVELOPE_HEADER_LEN + DEK_LEN + 16);
    }
}
