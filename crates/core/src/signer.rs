use hmac::{Hmac, Mac};
use nanoid::nanoid;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SECRET_PREFIX: &str = "whsec_";

/// Length of a hex-encoded HMAC-SHA256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

pub fn generate_secret() -> String {
    format!("{}{}", SECRET_PREFIX, nanoid!(32))
}

/// Sign the exact bytes that go on the wire with HMAC-SHA256.
///
/// Note: new_from_slice only fails for algorithms with key length constraints.
/// SHA256 accepts any key length, so this is infallible in practice.
pub fn sign(payload: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Check a candidate digest against the expected one in constant time.
///
/// A candidate of the wrong length is copied into a fixed-size buffer and
/// compared anyway, so the work done does not depend on its length.
pub fn verify(payload: &[u8], candidate: &str, secret: &str) -> bool {
    let expected = sign(payload, secret);
    let candidate = candidate.as_bytes();

    let mut padded = [0u8; DIGEST_HEX_LEN];
    let copied = candidate.len().min(DIGEST_HEX_LEN);
    padded[..copied].copy_from_slice(&candidate[..copied]);

    let len_eq = (candidate.len() as u64).ct_eq(&(DIGEST_HEX_LEN as u64));
    let bytes_eq = expected.as_bytes().ct_eq(&padded[..]);
    (len_eq & bytes_eq).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secret_format() {
        let secret = generate_secret();

        assert!(secret.starts_with(SECRET_PREFIX), "secret should carry the prefix");
        assert_eq!(secret.len(), SECRET_PREFIX.len() + 32);
    }

    #[test]
    fn test_generate_secret_uniqueness() {
        assert_ne!(generate_secret(), generate_secret());
    }

    #[test]
    fn test_sign_is_hex_sha256() {
        let signature = sign(br#"{"event":"ncr.created"}"#, "secret");

        assert_eq!(signature.len(), DIGEST_HEX_LEN);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_sign_known_vector() {
        // RFC 4231 test case 2
        let signature = sign(b"what do ya want for nothing?", "Jefe");
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_sign_different_secrets() {
        assert_ne!(sign(b"body", "secret1"), sign(b"body", "secret2"));
    }

    #[test]
    fn test_verify_round_trip() {
        let payloads: [&[u8]; 4] = [b"", b"body", br#"{"data":{"id":42}}"#, &[0xff, 0x00, 0x10]];
        for payload in payloads {
            let signature = sign(payload, "whsec_abc");
            assert!(verify(payload, &signature, "whsec_abc"));
        }
    }

    #[test]
    fn test_verify_wrong_secret() {
        let signature = sign(b"body", "secret1");
        assert!(!verify(b"body", &signature, "secret2"));
    }

    #[test]
    fn test_verify_tampered_body() {
        let signature = sign(b"original body", "secret");
        assert!(!verify(b"tampered body", &signature, "secret"));
    }

    #[test]
    fn test_verify_length_mismatch_returns_false() {
        let signature = sign(b"body", "secret");

        assert!(!verify(b"body", "", "secret"));
        assert!(!verify(b"body", &signature[..10], "secret"));
        assert!(!verify(b"body", &signature[..DIGEST_HEX_LEN - 1], "secret"));
        assert!(!verify(b"body", &format!("{signature}0"), "secret"));
        assert!(!verify(b"body", &signature.repeat(8), "secret"));
    }

    #[test]
    fn test_verify_prefix_of_longer_candidate_is_rejected() {
        // the first 64 bytes match, only the length differs
        let signature = sign(b"body", "secret");
        let longer = format!("{signature}ff");
        assert!(!verify(b"body", &longer, "secret"));
    }
}
