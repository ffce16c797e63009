//! Persistent hashing for resource identification
//!
//! Resources created dynamically inside a node's execute context are keyed by
//! a two-part 64-bit hash instead of a runtime string:
//!
//! - the *scope hash* covers `(node instance id, bundle index)` and groups
//!   every resource allocated within one node phase, so temporaries can be
//!   released en masse at a phase boundary;
//! - the *member hash* is an FNV-1a hash of the member name, computable in
//!   const context so the identifier exists at compile time.
//!
//! The full identifier is the boost-style combination of the two parts.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a hash over raw bytes
pub const fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// FNV-1a hash of a string, usable in const context
pub const fn fnv1a_str(s: &str) -> u64 {
    fnv1a(s.as_bytes())
}

/// Combine two hashes (boost-style `hash_combine`)
pub const fn combine(h1: u64, h2: u64) -> u64 {
    h1 ^ h2
        .wrapping_add(0x9e37_79b9)
        .wrapping_add(h1 << 6)
        .wrapping_add(h1 >> 2)
}

/// Hash identifying an allocation scope `(node instance id, bundle index)`
///
/// Every resource requested within the same node phase shares this value,
/// which is what makes bulk release at the end of the phase possible.
pub const fn scope_hash(node_instance_id: u32, bundle_index: u32) -> u64 {
    combine(node_instance_id as u64, bundle_index as u64)
}

/// Hash of a member name alone
pub const fn member_hash(name: &str) -> u64 {
    fnv1a_str(name)
}

/// Full resource hash: scope combined with the member name
///
/// Deterministic: the same `(node, bundle, name)` triple always yields the
/// same identifier, across frames and across runs.
pub const fn resource_hash(node_instance_id: u32, bundle_index: u32, name: &str) -> u64 {
    combine(scope_hash(node_instance_id, bundle_index), member_hash(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_known_vectors() {
        // Reference values for the 64-bit FNV-1a parameters
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_resource_hash_is_deterministic() {
        let first = resource_hash(7, 0, "framebuffers");
        let second = resource_hash(7, 0, "framebuffers");
        assert_eq!(first, second);
    }

    #[test]
    fn test_resource_hash_distinguishes_parts() {
        let base = resource_hash(7, 0, "framebuffers");
        assert_ne!(base, resource_hash(8, 0, "framebuffers"));
        assert_ne!(base, resource_hash(7, 1, "framebuffers"));
        assert_ne!(base, resource_hash(7, 0, "descriptors"));
    }

    #[test]
    fn test_scope_hash_shared_across_members() {
        // Two members of the same node+bundle share a scope but not a full hash
        let scope = scope_hash(3, 2);
        assert_eq!(
            combine(scope, member_hash("a")),
            resource_hash(3, 2, "a")
        );
        assert_ne!(resource_hash(3, 2, "a"), resource_hash(3, 2, "b"));
    }

    #[test]
    fn test_hash_usable_in_const_context() {
        const HASH: u64 = resource_hash(1, 0, "semaphores");
        assert_eq!(HASH, resource_hash(1, 0, "semaphores"));
    }
}
