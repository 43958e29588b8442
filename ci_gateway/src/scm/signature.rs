//! Webhook signature verification (X-Hub-Signature-256).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("no verification key configured")]
    MissingKey,

    #[error("missing signature header")]
    MissingHeader,

    #[error("malformed signature header")]
    Malformed,

    #[error("signature does not match payload")]
    Mismatch,
}

/// Verify `payload` against a `sha256=<hex>` header using `key`.
///
/// An empty key never verifies.
pub fn verify_signature(
    key: &[u8],
    payload: &[u8],
    header: Option<&str>,
) -> Result<(), SignatureError> {
    if key.is_empty() {
        return Err(SignatureError::MissingKey);
    }
    let header = header.ok_or(SignatureError::MissingHeader)?;
    let sig = header
        .strip_prefix("sha256=")
        .ok_or(SignatureError::Malformed)?;
    let sig_bytes = hex::decode(sig).map_err(|_| SignatureError::Malformed)?;

    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SignatureError::MissingKey)?;
    mac.update(payload);

    mac.verify_slice(&sig_bytes)
        .map_err(|_| SignatureError::Mismatch)
}

/// Compute the header value a provider would send for `payload`.
pub fn sign(key: &[u8], payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
