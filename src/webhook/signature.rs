//! Webhook Signature Verification
//!
//! Verifies that an inbound webhook actually came from the provider before
//! any of its content is trusted. Signature checking runs against the raw
//! request body; re-serialized JSON would not verify.
//!
//! Stripe signs each delivery with the endpoint's signing secret:
//!
//! ```text
//! Stripe-Signature: t=1700000000,v1=5257a869e7...
//! ```
//!
//! where `v1` is HMAC-SHA256 over `"{t}.{raw_body}"`. The signed timestamp
//! is checked against a tolerance window to bound replay of captured
//! deliveries. Telegram uses a simpler scheme: a static secret token echoed
//! in the `X-Telegram-Bot-Api-Secret-Token` header.
//!
//! All comparisons are constant-time.

use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Name of the header Stripe signs deliveries with.
pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

/// Name of the header Telegram echoes the configured secret token in.
pub const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Verifies Stripe webhook signatures.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
    tolerance: Duration,
}

impl SignatureVerifier {
    /// Create a verifier for the given endpoint signing secret.
    pub fn new(secret: impl Into<String>, tolerance: Duration) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
        }
    }

    /// Verify a delivery against its `Stripe-Signature` header.
    ///
    /// `now` is the current Unix timestamp; injected so tests can pin time.
    pub fn verify(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: i64,
    ) -> Result<(), WebhookError> {
        let parsed = ParsedSignature::parse(signature_header)?;

        let age = now - parsed.timestamp;
        if age.unsigned_abs() > self.tolerance.as_secs() {
            return Err(WebhookError::StaleTimestamp { age_secs: age });
        }

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| WebhookError::MalformedSignature(e.to_string()))?;
        mac.update(parsed.timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);

        // Stripe may send several v1 entries during secret rotation; accept
        // if any of them verifies. Mac::verify_slice is constant-time.
        for candidate in &parsed.v1_signatures {
            let Ok(sig_bytes) = hex::decode(candidate) else {
                continue;
            };
            if mac.clone().verify_slice(&sig_bytes).is_ok() {
                return Ok(());
            }
        }

        Err(WebhookError::SignatureMismatch)
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose the signing secret in logs.
        f.debug_struct("SignatureVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

/// Parsed `t=...,v1=...` signature header.
struct ParsedSignature {
    timestamp: i64,
    v1_signatures: Vec<String>,
}

impl ParsedSignature {
    fn parse(header: &str) -> Result<Self, WebhookError> {
        let mut timestamp = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| {
                        WebhookError::MalformedSignature(format!("bad timestamp: {value}"))
                    })?);
                }
                "v1" => v1_signatures.push(value.to_string()),
                // v0 and unknown schemes are ignored
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| WebhookError::MalformedSignature("missing t= entry".to_string()))?;
        if v1_signatures.is_empty() {
            return Err(WebhookError::MalformedSignature(
                "missing v1= entry".to_string(),
            ));
        }

        Ok(Self {
            timestamp,
            v1_signatures,
        })
    }
}

/// Constant-time comparison of the Telegram secret token header.
///
/// Returns `Ok(())` when `presented` matches `expected`.
pub fn verify_telegram_secret(expected: &str, presented: &str) -> Result<(), WebhookError> {
    // HMAC both sides with a fixed key so length differences leak nothing.
    let mut expected_mac = HmacSha256::new_from_slice(b"telegram-secret-token")
        .map_err(|e| WebhookError::MalformedSignature(e.to_string()))?;
    expected_mac.update(expected.as_bytes());
    let expected_tag = expected_mac.finalize().into_bytes();

    let mut presented_mac = HmacSha256::new_from_slice(b"telegram-secret-token")
        .map_err(|e| WebhookError::MalformedSignature(e.to_string()))?;
    presented_mac.update(presented.as_bytes());

    presented_mac
        .verify_slice(&expected_tag)
        .map_err(|_| WebhookError::SignatureMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";

    /// Compute a valid Stripe signature the way Stripe's SDK does.
    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(SECRET, Duration::from_secs(300))
    }

    #[test]
    fn test_valid_signature_accepted() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let now = 1_700_000_000;
        let header = format!("t={now},v1={}", sign(payload, SECRET, now));

        verifier().verify(payload, &header, now).unwrap();
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let now = 1_700_000_000;
        let header = format!("t={now},v1={}", sign(payload, SECRET, now));

        let err = verifier()
            .verify(br#"{"type":"evil"}"#, &header, now)
            .unwrap_err();
        assert!(matches!(err, WebhookError::SignatureMismatch));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = b"{}";
        let now = 1_700_000_000;
        let header = format!("t={now},v1={}", sign(payload, "whsec_other", now));

        let err = verifier().verify(payload, &header, now).unwrap_err();
        assert!(matches!(err, WebhookError::SignatureMismatch));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = b"{}";
        let now = 1_700_000_000;
        let signed_at = now - 600; // beyond the 5-minute tolerance
        let header = format!("t={signed_at},v1={}", sign(payload, SECRET, signed_at));

        let err = verifier().verify(payload, &header, now).unwrap_err();
        assert!(matches!(
            err,
            WebhookError::StaleTimestamp { age_secs: 600 }
        ));
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let payload = b"{}";
        let now = 1_700_000_000;
        let signed_at = now + 600;
        let header = format!("t={signed_at},v1={}", sign(payload, SECRET, signed_at));

        let err = verifier().verify(payload, &header, now).unwrap_err();
        assert!(matches!(err, WebhookError::StaleTimestamp { .. }));
    }

    #[test]
    fn test_rotation_second_v1_accepted() {
        let payload = b"{}";
        let now = 1_700_000_000;
        let stale = sign(payload, "whsec_old", now);
        let good = sign(payload, SECRET, now);
        let header = format!("t={now},v1={stale},v1={good}");

        verifier().verify(payload, &header, now).unwrap();
    }

    #[test]
    fn test_malformed_headers_rejected() {
        let payload = b"{}";
        let now = 1_700_000_000;

        for header in ["", "v1=abc", "t=notanumber,v1=abc", "t=123"] {
            let err = verifier().verify(payload, header, now).unwrap_err();
            assert!(
                matches!(err, WebhookError::MalformedSignature(_)),
                "header {header:?} should be malformed, got {err:?}"
            );
        }
    }

    #[test]
    fn test_non_hex_v1_entry_skipped() {
        let payload = b"{}";
        let now = 1_700_000_000;
        let header = format!("t={now},v1=zzzz,v1={}", sign(payload, SECRET, now));

        verifier().verify(payload, &header, now).unwrap();
    }

    #[test]
    fn test_telegram_secret_match() {
        verify_telegram_secret("tok_123", "tok_123").unwrap();
        assert!(verify_telegram_secret("tok_123", "tok_456").is_err());
        assert!(verify_telegram_secret("tok_123", "").is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let debug = format!("{:?}", verifier());
        assert!(!debug.contains(SECRET));
    }
}
