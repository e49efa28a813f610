//! HMAC-SHA256 webhook signatures
//!
//! Stripe signs `"<t>.<payload>"` and sends `Stripe-Signature: t=<unix>,v1=<hex>`
//! (several `v1` entries during secret rotation). The infrastructure relay
//! signs the raw body and sends `X-Signature: sha256=<hex>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a Stripe signature timestamp, in seconds
pub const STRIPE_TOLERANCE_SECS: i64 = 300;

fn mac(secret: &str) -> Result<HmacSha256, WebhookError> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::InvalidSignature(format!("Invalid HMAC key: {}", e)))
}

/// Verify a `Stripe-Signature` header against `payload` at time `now`.
pub fn verify_stripe_signature(
    secret: &str,
    header: &str,
    payload: &[u8],
    now: i64,
) -> Result<(), WebhookError> {
    let mut timestamp: Option<&str> = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        WebhookError::InvalidSignature("Signature header has no timestamp".to_string())
    })?;
    let issued_at: i64 = timestamp.parse().map_err(|_| {
        WebhookError::InvalidSignature(format!("Malformed signature timestamp '{}'", timestamp))
    })?;
    if candidates.is_empty() {
        return Err(WebhookError::InvalidSignature(
            "Signature header has no v1 signature".to_string(),
        ));
    }

    let mut signed = mac(secret)?;
    signed.update(timestamp.as_bytes());
    signed.update(b".");
    signed.update(payload);

    let matched = candidates.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| signed.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if !matched {
        return Err(WebhookError::InvalidSignature(
            "No signature matches the payload".to_string(),
        ));
    }

    if (now - issued_at).abs() > STRIPE_TOLERANCE_SECS {
        return Err(WebhookError::StaleTimestamp {
            age_secs: now - issued_at,
        });
    }
    Ok(())
}

/// Verify an `X-Signature: sha256=<hex>` header against the raw body.
pub fn verify_body_signature(secret: &str, header: &str, body: &[u8]) -> Result<(), WebhookError> {
    let hex_signature = header.trim().strip_prefix("sha256=").ok_or_else(|| {
        WebhookError::InvalidSignature("Signature must start with 'sha256='".to_string())
    })?;
    let expected = hex::decode(hex_signature)
        .map_err(|_| WebhookError::InvalidSignature("Signature is not hex".to_string()))?;

    let mut signed = mac(secret)?;
    signed.update(body);
    signed
        .verify_slice(&expected)
        .map_err(|_| WebhookError::InvalidSignature("Signature does not match body".to_string()))
}

/// Build a `Stripe-Signature` header value
pub fn stripe_signature_header(
    secret: &str,
    timestamp: i64,
    payload: &[u8],
) -> Result<String, WebhookError> {
    let mut signed = mac(secret)?;
    signed.update(timestamp.to_string().as_bytes());
    signed.update(b".");
    signed.update(payload);
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(signed.finalize().into_bytes())
    ))
}

/// Build an `X-Signature` header value
pub fn body_signature_header(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    let mut signed = mac(secret)?;
    signed.update(body);
    Ok(format!("sha256={}", hex::encode(signed.finalize().into_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const PAYLOAD: &[u8] = br#"{"id":"evt_1","type":"invoice.payment_failed"}"#;

    #[test]
    fn test_stripe_signature_accepts_fresh_signature() {
        let header = stripe_signature_header(SECRET, 1_700_000_000, PAYLOAD).unwrap();
        assert!(verify_stripe_signature(SECRET, &header, PAYLOAD, 1_700_000_100).is_ok());
    }

    #[test]
    fn test_stripe_signature_accepts_any_rotated_secret() {
        let valid = stripe_signature_header(SECRET, 1_700_000_000, PAYLOAD).unwrap();
        let v1 = valid.split(",v1=").nth(1).unwrap();
        let header = format!("t=1700000000,v1={},v1={}", "00".repeat(32), v1);
        assert!(verify_stripe_signature(SECRET, &header, PAYLOAD, 1_700_000_000).is_ok());
    }

    #[test]
    fn test_stripe_signature_rejects_tampered_payload() {
        let header = stripe_signature_header(SECRET, 1_700_000_000, PAYLOAD).unwrap();
        let result = verify_stripe_signature(SECRET, &header, b"{}", 1_700_000_000);
        assert!(matches!(result, Err(WebhookError::InvalidSignature(_))));
    }

    #[test]
    fn test_stripe_signature_rejects_stale_timestamp() {
        let header = stripe_signature_header(SECRET, 1_700_000_000, PAYLOAD).unwrap();
        let result = verify_stripe_signature(SECRET, &header, PAYLOAD, 1_700_000_301);
        assert!(matches!(
            result,
            Err(WebhookError::StaleTimestamp { age_secs: 301 })
        ));
    }

    #[test]
    fn test_stripe_signature_rejects_malformed_header() {
        for header in ["", "v1=abcd", "t=abc,v1=abcd", "t=1700000000"] {
            let result = verify_stripe_signature(SECRET, header, PAYLOAD, 1_700_000_000);
            assert!(
                matches!(result, Err(WebhookError::InvalidSignature(_))),
                "header {:?}",
                header
            );
        }
    }

    #[test]
    fn test_body_signature() {
        let header = body_signature_header(SECRET, PAYLOAD).unwrap();
        assert!(header.starts_with("sha256="));
        assert!(verify_body_signature(SECRET, &header, PAYLOAD).is_ok());
        assert!(verify_body_signature("other", &header, PAYLOAD).is_err());
        assert!(verify_body_signature(SECRET, header.trim_start_matches("sha256="), PAYLOAD).is_err());
    }
}
