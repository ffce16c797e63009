//! Resource lifetime analysis
//!
//! Computes a birth and death index, in topological node order, for every
//! registered resource. Birth is the order of the writing node; every reader
//! extends death. The aliasing engine consults these spans to decide whether
//! two resources may safely share memory.

use super::state::ResourceLifetime;
use super::ResourceKey;
use std::collections::HashMap;

/// Death index assigned to persistent resources
pub const PERSISTENT_DEATH: u32 = u32::MAX;

/// Inclusive `[birth, death]` window of a resource, in topological order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifetimeSpan {
    /// Order index of the writing node
    pub birth: u32,
    /// Order index of the last reading node, equal to `birth` when unread
    pub death: u32,
    /// Lifetime class of the resource
    pub lifetime: ResourceLifetime,
}

impl LifetimeSpan {
    /// Whether two spans share at least one order index
    pub fn overlaps(&self, other: &LifetimeSpan) -> bool {
        self.birth <= other.death && other.birth <= self.death
    }
}

/// Computes and stores lifetime spans for all graph resources
#[derive(Default)]
pub struct LifetimeAnalyzer {
    spans: HashMap<ResourceKey, LifetimeSpan>,
}

impl LifetimeAnalyzer {
    /// Create an empty analyzer
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all recorded spans, called at the start of each compile
    pub fn clear(&mut self) {
        self.spans.clear();
    }

    /// Record the writing node of a resource
    ///
    /// A resource that is never read keeps `death == birth`. Persistent
    /// resources get an unbounded death and are excluded from aliasing.
    pub fn record_write(&mut self, key: ResourceKey, order: u32, lifetime: ResourceLifetime) {
        let death = if lifetime == ResourceLifetime::Persistent {
            PERSISTENT_DEATH
        } else {
            order
        };
        let span = self.spans.entry(key).or_insert(LifetimeSpan {
            birth: order,
            death,
            lifetime,
        });
        span.birth = span.birth.min(order);
        span.lifetime = lifetime;
    }

    /// Record a reading node, extending the resource's death index
    pub fn record_read(&mut self, key: ResourceKey, order: u32) {
        if let Some(span) = self.spans.get_mut(&key) {
            if span.lifetime != ResourceLifetime::Persistent {
                span.death = span.death.max(order);
            }
        }
    }

    /// Birth index of a resource
    pub fn birth(&self, key: ResourceKey) -> Option<u32> {
        self.spans.get(&key).map(|span| span.birth)
    }

    /// Death index of a resource
    pub fn death(&self, key: ResourceKey) -> Option<u32> {
        self.spans.get(&key).map(|span| span.death)
    }

    /// Full span of a resource
    pub fn span(&self, key: ResourceKey) -> Option<LifetimeSpan> {
        self.spans.get(&key).copied()
    }

    /// Whether two resources' lifetimes intersect
    ///
    /// Unknown resources are reported as overlapping, so callers never alias
    /// memory based on missing data.
    pub fn overlaps(&self, a: ResourceKey, b: ResourceKey) -> bool {
        match (self.spans.get(&a), self.spans.get(&b)) {
            (Some(span_a), Some(span_b)) => span_a.overlaps(span_b),
            _ => true,
        }
    }

    /// Number of tracked resources
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Whether no resources are tracked
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Iterate over all tracked spans
    pub fn iter(&self) -> impl Iterator<Item = (&ResourceKey, &LifetimeSpan)> {
        self.spans.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn keys(n: usize) -> Vec<ResourceKey> {
        let mut nodes: SlotMap<crate::graph::NodeKey, ()> = SlotMap::with_key();
        (0..n).map(|_| ResourceKey::new(nodes.insert(()), 0)).collect()
    }

    #[test]
    fn test_write_then_read_extends_death() {
        let mut analyzer = LifetimeAnalyzer::new();
        let key = keys(1)[0];

        analyzer.record_write(key, 0, ResourceLifetime::Transient);
        analyzer.record_read(key, 3);
        analyzer.record_read(key, 1);

        assert_eq!(analyzer.birth(key), Some(0));
        assert_eq!(analyzer.death(key), Some(3));
    }

    #[test]
    fn test_unread_resource_dies_at_birth() {
        let mut analyzer = LifetimeAnalyzer::new();
        let key = keys(1)[0];

        analyzer.record_write(key, 2, ResourceLifetime::Transient);

        assert_eq!(analyzer.birth(key), Some(2));
        assert_eq!(analyzer.death(key), Some(2));
    }

    #[test]
    fn test_persistent_resource_never_dies() {
        let mut analyzer = LifetimeAnalyzer::new();
        let key = keys(1)[0];

        analyzer.record_write(key, 1, ResourceLifetime::Persistent);
        analyzer.record_read(key, 4);

        assert_eq!(analyzer.death(key), Some(PERSISTENT_DEATH));
    }

    #[test]
    fn test_overlap_detection() {
        let mut analyzer = LifetimeAnalyzer::new();
        let ks = keys(3);

        // [0,1] and [1,2] share index 1; [0,0] and [1,2] are disjoint
        analyzer.record_write(ks[0], 0, ResourceLifetime::Transient);
        analyzer.record_read(ks[0], 1);
        analyzer.record_write(ks[1], 1, ResourceLifetime::Transient);
        analyzer.record_read(ks[1], 2);
        analyzer.record_write(ks[2], 0, ResourceLifetime::Transient);

        assert!(analyzer.overlaps(ks[0], ks[1]));
        assert!(!analyzer.overlaps(ks[2], ks[1]));
    }

    #[test]
    fn test_unknown_resources_report_overlap() {
        let analyzer = LifetimeAnalyzer::new();
        let ks = keys(2);

        assert!(analyzer.overlaps(ks[0], ks[1]));
    }
}
