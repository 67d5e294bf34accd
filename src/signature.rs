//! Webhook signature verification.
//!
//! HMAC-SHA256 over the raw request body, hex-encoded, compared against the
//! signature header. Verification is fail-open: a missing secret or a
//! missing header lets the request through (logged), only a present-but-wrong
//! signature rejects. That trade-off favors availability during platform
//! configuration changes and is surfaced at WARN so it stays visible.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Outcome of checking one inbound delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    /// Signature present and correct.
    Verified,
    /// No secret configured, or no header sent; request is allowed.
    Unverified,
    /// Signature present but wrong; request must be rejected.
    Rejected,
}

/// Verify `header` (hex HMAC-SHA256) against `body` using `secret`.
pub fn verify(
    secret: Option<&SecretString>,
    header: Option<&str>,
    body: &[u8],
) -> SignatureCheck {
    let Some(secret) = secret else {
        tracing::warn!("webhook secret not configured; accepting unverified delivery");
        return SignatureCheck::Unverified;
    };
    let Some(header) = header else {
        tracing::warn!("delivery carried no signature header; accepting unverified");
        return SignatureCheck::Unverified;
    };

    let Ok(expected) = hex::decode(header.trim()) else {
        return SignatureCheck::Rejected;
    };

    // Key length is unconstrained for HMAC; new_from_slice cannot fail here,
    // but avoid unwrap anyway.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.expose_secret().as_bytes()) else {
        return SignatureCheck::Rejected;
    };
    mac.update(body);
    if mac.verify_slice(&expected).is_ok() {
        SignatureCheck::Verified
    } else {
        SignatureCheck::Rejected
    }
}
