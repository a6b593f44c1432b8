//! Webhook payload signing
//!
//! HMAC-SHA256 over `timestamp + "." + payload` with the subscriber's
//! secret, Base64-encoded. Verification recomputes the signature and
//! compares in constant time; an optional tolerance rejects stale
//! timestamps to blunt replay.

use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Sign `timestamp + "." + payload`; returns the Base64 signature.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// Verify a signature produced by [`sign_payload`].
///
/// # Arguments
/// * `tolerance_secs` - when set, `timestamp` must be within this many
///   seconds of `now_secs`
pub fn verify_signature(
    secret: &str,
    timestamp: i64,
    payload: &str,
    signature: &str,
    tolerance_secs: Option<i64>,
    now_secs: i64,
) -> bool {
    if let Some(tolerance) = tolerance_secs {
        if (now_secs - timestamp).abs() > tolerance {
            return false;
        }
    }

    let expected = sign_payload(secret, timestamp, payload);
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const SECRET: &str = "whsec_test_secret";
    const PAYLOAD: &str = r#"{"type":"com.fluxpay.payment.confirmed","data":{"payment_id":"p1"}}"#;

    #[test]
    fn test_sign_verify_round_trip() {
        let now = Utc::now().timestamp();
        let signature = sign_payload(SECRET, now, PAYLOAD);

        assert!(verify_signature(
            SECRET,
            now,
            PAYLOAD,
            &signature,
            Some(300),
            now
        ));
    }

    #[test]
    fn test_rejects_tampered_payload() {
        let now = Utc::now().timestamp();
        let signature = sign_payload(SECRET, now, PAYLOAD);

        let tampered = PAYLOAD.replace("p1", "p2");
        assert!(!verify_signature(
            SECRET,
            now,
            &tampered,
            &signature,
            Some(300),
            now
        ));
    }

    #[test]
    fn test_rejects_wrong_secret() {
        let now = Utc::now().timestamp();
        let signature = sign_payload(SECRET, now, PAYLOAD);

        assert!(!verify_signature(
            "whsec_other",
            now,
            PAYLOAD,
            &signature,
            Some(300),
            now
        ));
    }

    #[test]
    fn test_rejects_stale_timestamp() {
        let now = Utc::now().timestamp();
        let old = now - 301;
        let signature = sign_payload(SECRET, old, PAYLOAD);

        assert!(!verify_signature(
            SECRET,
            old,
            PAYLOAD,
            &signature,
            Some(300),
            now
        ));
        // Without a tolerance the stale timestamp is accepted
        assert!(verify_signature(SECRET, old, PAYLOAD, &signature, None, now));
    }

    #[test]
    fn test_signature_is_base64() {
        let signature = sign_payload(SECRET, 0, PAYLOAD);
        assert!(base64::engine::general_purpose::STANDARD
            .decode(&signature)
            .is_ok());
    }
}
