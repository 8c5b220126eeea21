//! Hash functions for placement decisions.
//!
//! Every selection draw must be a pure function of the cluster state and the
//! object key, so draws come from a keyed hash rather than an RNG. The hash
//! must be:
//! - Deterministic: same input always produces same output
//! - Uniform: output is uniformly distributed
//! - Fast: evaluated once per child per draw in the straw strategy

use std::hash::{Hash, Hasher};

use siphasher::sip::SipHasher13;

/// Fixed SipHash key so placements agree across processes and runs.
const PLACEMENT_HASH_KEY: (u64, u64) = (0x6469_7374_6b76_2d70, 0x6c61_6365_6d65_6e74);

/// Hash a replica round together with an object key.
///
/// This is the draw input for the uniform and cumulative-weight strategies,
/// where one draw per retry decides among all children.
#[inline]
#[must_use]
pub fn placement_hash2(round: u64, key: u64) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(PLACEMENT_HASH_KEY.0, PLACEMENT_HASH_KEY.1);
    round.hash(&mut hasher);
    key.hash(&mut hasher);
    hasher.finish()
}

/// Hash a replica round, an object key, and a child identity.
///
/// The straw strategy draws independently per child, so the child id is part
/// of the input. Changing one child's weight then only perturbs that child's
/// straw, not every sibling's.
#[inline]
#[must_use]
pub fn placement_hash3(round: u64, key: u64, child: u64) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(PLACEMENT_HASH_KEY.0, PLACEMENT_HASH_KEY.1);
    round.hash(&mut hasher);
    key.hash(&mut hasher);
    child.hash(&mut hasher);
    hasher.finish()
}

/// Hash a string name to an object key.
///
/// Callers with string object names fold them to the `u64` key space the
/// engine places on.
#[inline]
#[must_use]
pub fn key_of(name: &str) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(PLACEMENT_HASH_KEY.0, PLACEMENT_HASH_KEY.1);
    name.hash(&mut hasher);
    hasher.finish()
}

/// Map a hash to a draw in `[0, 1)`.
///
/// Uses the top 53 bits so the result is an exactly representable dyadic
/// fraction strictly below 1, which the cumulative-weight prefix scan
/// depends on.
#[inline]
#[must_use]
pub fn unit_interval(hash: u64) -> f64 {
    (hash >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}
