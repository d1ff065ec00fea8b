//! C2: fulfillment/condition crypto.
//!
//! Two interoperable schemes, selected per session (spec.md §9 Open
//! Questions, resolved in DESIGN.md):
//!
//! * [`FulfillmentScheme::Sha256`] — `fulfillment = SHA-256(data)`,
//!   `condition = SHA-256(fulfillment)`.
//! * [`FulfillmentScheme::HmacSha256`] — `fulfillment =
//!   HMAC-SHA-256(shared_secret, data)`, `condition =
//!   SHA-256(fulfillment)`. The RFC-0029 STREAM scheme.
//!
//! Grounded on the teacher's use of `ring` for digests and constant-time
//! comparison in the settlement/ILDCP clients.

use ring::digest;
use ring::hmac;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfillmentScheme {
    Sha256,
    HmacSha256,
}

/// 32-byte SHA-256 fulfillment or condition.
pub type Digest32 = [u8; 32];

fn sha256(bytes: &[u8]) -> Digest32 {
    let digest = digest::digest(&digest::SHA256, bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_ref());
    out
}

/// Derive the fulfillment for `data` under `scheme`. For
/// [`FulfillmentScheme::HmacSha256`], `shared_secret` must be `Some`.
pub fn fulfillment_from_data(
    scheme: FulfillmentScheme,
    shared_secret: Option<&[u8]>,
    data: &[u8],
) -> Digest32 {
    match scheme {
        FulfillmentScheme::Sha256 => sha256(data),
        FulfillmentScheme::HmacSha256 => {
            let key_bytes = shared_secret.expect("HMAC scheme requires a shared secret");
            let key = hmac::Key::new(hmac::HMAC_SHA256, key_bytes);
            let tag = hmac::sign(&key, data);
            let mut out = [0u8; 32];
            out.copy_from_slice(tag.as_ref());
            out
        }
    }
}

/// `condition = SHA-256(fulfillment)`, shared by both schemes.
pub fn condition_from_fulfillment(fulfillment: &Digest32) -> Digest32 {
    sha256(fulfillment)
}

/// Convenience: derive the condition directly from `data`.
pub fn condition_from_data(
    scheme: FulfillmentScheme,
    shared_secret: Option<&[u8]>,
    data: &[u8],
) -> Digest32 {
    condition_from_fulfillment(&fulfillment_from_data(scheme, shared_secret, data))
}

/// Verify that `fulfillment` satisfies `condition`, in constant time.
pub fn verify(condition: &Digest32, fulfillment: &Digest32) -> bool {
    let derived = condition_from_fulfillment(fulfillment);
    ring::constant_time::verify_slices_are_equal(&derived, condition).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_scheme_fulfillment_is_sha256_of_data() {
        let data = b"preimage-data";
        let fulfillment = fulfillment_from_data(FulfillmentScheme::Sha256, None, data);
        assert_eq!(fulfillment, sha256(data));
    }

    #[test]
    fn sha256_scheme_condition_is_double_hash() {
        let data = b"preimage-data";
        let fulfillment = fulfillment_from_data(FulfillmentScheme::Sha256, None, data);
        let condition = condition_from_data(FulfillmentScheme::Sha256, None, data);
        assert_eq!(condition, sha256(&fulfillment));
    }

    #[test]
    fn hmac_scheme_fulfillment_depends_on_shared_secret() {
        let data = b"stream-data";
        let f1 = fulfillment_from_data(FulfillmentScheme::HmacSha256, Some(b"secret-a"), data);
        let f2 = fulfillment_from_data(FulfillmentScheme::HmacSha256, Some(b"secret-b"), data);
        assert_ne!(f1, f2);
    }

    #[test]
    fn verify_accepts_matching_pair_and_rejects_mismatch() {
        let data = b"hello";
        let fulfillment = fulfillment_from_data(FulfillmentScheme::Sha256, None, data);
        let condition = condition_from_fulfillment(&fulfillment);
        assert!(verify(&condition, &fulfillment));

        let wrong_fulfillment = fulfillment_from_data(FulfillmentScheme::Sha256, None, b"goodbye");
        assert!(!verify(&condition, &wrong_fulfillment));
    }

    #[test]
    #[should_panic]
    fn hmac_scheme_without_shared_secret_panics() {
        fulfillment_from_data(FulfillmentScheme::HmacSha256, None, b"data");
    }
}
