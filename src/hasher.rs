use std::hash::Hasher;

use siphasher::sip::SipHasher13;

/// Returns a hasher whose output is stable across processes and platforms.
///
/// Every node of the cluster must place virtual nodes and keys at the same ring positions,
/// so the keys are fixed rather than randomized like the standard library's `RandomState`.
pub(crate) fn deterministic_hasher() -> SipHasher13 {
    SipHasher13::new_with_keys(0x646f_6e61_6d6f_6b76, 0x7269_6e67_6469_6765)
}

/// Digest of a string under [deterministic_hasher]
pub(crate) fn digest(value: &str) -> u64 {
    let mut hasher = deterministic_hasher();
    hasher.write(value.as_bytes());
    hasher.finish()
}
