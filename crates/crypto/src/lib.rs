//! Envelope encryption primitives for agent memory and sharing.
//!
//! Every record is encrypted under a fresh data-encryption key (DEK) with
//! AES-256-GCM; the DEK is wrapped for each recipient via X25519 ECDH +
//! HKDF-SHA256 + AES-256-GCM. Signing uses Ed25519. Public keys export as
//! multibase (`z` + base58btc) with multicodec prefixes.

pub mod envelope;
pub mod identity;
pub mod keys;

pub use envelope::{
    decrypt, encrypt, generate_dek, generate_nonce, unwrap_dek, wrap_dek, DEK_LEN, NONCE_LEN,
};
pub use identity::{AgentIdentity, PublicKeys, StoredIdentity};
pub use keys::{
    decode_public_key, export_public_key, verify_signature, EncryptionKeypair, KeyAlgorithm,
    SigningKeypair,
};
