//! Best-effort webhook notifications for agent configs that carry a
//! `webhook_url`. Payloads are signed with HMAC-SHA256 over the exact body
//! bytes so receivers can verify origin.

use std::time::Duration;

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// `X-Signature` value for a payload: `sha256=<hex hmac>`.
pub fn sign(body: &[u8], secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Fire-and-forget delivery; failures are logged, never surfaced.
pub fn dispatch(url: String, secret: Vec<u8>, payload: Value) {
    tokio::spawn(async move {
        let body = payload.to_string();
        let signature = sign(body.as_bytes(), &secret);

        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "webhook client build failed");
                return;
            }
        };

        match client
            .post(&url)
            .header("content-type", "application/json")
            .header("x-signature", &signature)
            .body(body)
            .send()
            .await
        {
            Ok(resp) if !resp.status().is_success() => {
                tracing::warn!(url = %url, status = %resp.status(), "webhook rejected");
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "webhook delivery failed");
            }
            _ => {}
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_and_secret_dependent() {
        let sig = sign(b"{\"a\":1}", b"secret");
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig, sign(b"{\"a\":1}", b"secret"));
        assert_ne!(sig, sign(b"{\"a\":1}", b"other"));
        assert_ne!(sig, sign(b"{\"a\":2}", b"secret"));
    }
}
