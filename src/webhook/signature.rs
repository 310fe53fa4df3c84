//! Constant-time HMAC-SHA-256 signature validation for webhook ingress.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Verify that `signature_b64` is the Base64-encoded HMAC-SHA-256 of `body`
/// under `secret`. The comparison itself is constant-time; decoding the
/// header is not (its length is not secret).
#[must_use]
pub fn verify(secret: &[u8], body: &[u8], signature_b64: &str) -> bool {
    let Ok(provided) = STANDARD.decode(signature_b64.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    if expected.len() != provided.len() {
        return false;
    }
    bool::from(expected.as_slice().ct_eq(&provided))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &[u8], body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(body);
        STANDARD.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_correct_signature() {
        let secret = b"shared-secret";
        let body = br#"{"id":"1"}"#;
        let sig = sign(secret, body);
        assert!(verify(secret, body, &sig));
    }

    #[test]
    fn rejects_one_byte_mismatch() {
        let secret = b"shared-secret";
        let body = br#"{"id":"1"}"#;
        let mut sig = STANDARD.decode(sign(secret, body)).unwrap();
        sig[0] ^= 0xFF;
        assert!(!verify(secret, body, &STANDARD.encode(sig)));
    }

    #[test]
    fn rejects_missing_signature() {
        assert!(!verify(b"shared-secret", b"body", ""));
    }
}
