//! Bucket types for the placement hierarchy.
//!
//! The topology is a tree of buckets: a single root, racks below it, and
//! devices as leaves. Interior buckets aggregate the capacity of their
//! children; devices carry the load counters.

use serde::{Deserialize, Serialize};

/// Unique identifier for a device. Devices use non-negative ids.
pub type DeviceId = i32;

/// Unique identifier for any bucket. Interior buckets use negative ids so
/// they never collide with device ids.
pub type BucketId = i32;

/// Opaque key placed by the engine.
pub type ObjectKey = u64;

/// The failure-domain level a bucket represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BucketKind {
    /// Root of the cluster.
    Root,
    /// Physical rack.
    Rack,
    /// Storage device - leaf level.
    Device,
}

impl BucketKind {
    /// Returns the numeric level (higher = closer to root).
    #[must_use]
    pub fn level(self) -> u8 {
        match self {
            Self::Root => 2,
            Self::Rack => 1,
            Self::Device => 0,
        }
    }
}

/// A node in the placement hierarchy.
///
/// Children are kept in construction order and never reordered: selection
/// indexes into them, so a stable order is what keeps placement stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    /// Unique id (non-negative for devices, negative for interior buckets).
    pub id: BucketId,
    /// The failure-domain level of this bucket.
    pub kind: BucketKind,
    /// Base capacity, fixed at construction.
    pub base_capacity: f64,
    pub(crate) parent: Option<BucketId>,
    pub(crate) children: Vec<BucketId>,
    pub(crate) weight: f64,
    pub(crate) failed: bool,
    pub(crate) load: u64,
}

impl Bucket {
    pub(crate) fn new(id: BucketId, kind: BucketKind, base_capacity: f64) -> Self {
        Self {
            id,
            kind,
            base_capacity,
            parent: None,
            children: Vec::new(),
            weight: 1.0,
            failed: false,
            load: 0,
        }
    }

    /// Child bucket ids in construction order.
    #[must_use]
    pub fn children(&self) -> &[BucketId] {
        &self.children
    }

    /// Current weight. Interior bucket weights track their children's
    /// aggregate adjusted capacity; device weights are set by reweighting.
    #[must_use]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Whether this bucket is marked failed. Failed buckets stay in the
    /// tree (sibling indices must not shift) but are never selected.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Stored load counter. Meaningful for devices; interior bucket load is
    /// recomputed on read via [`crate::Topology::subtree_load`].
    #[must_use]
    pub fn load(&self) -> u64 {
        self.load
    }

    /// Base capacity scaled by the current weight. This is what selection
    /// probability is proportional to.
    #[must_use]
    pub fn adjusted_capacity(&self) -> f64 {
        self.base_capacity * self.weight
    }

    /// Returns true if this is a leaf device bucket.
    #[must_use]
    pub fn is_device(&self) -> bool {
        self.kind == BucketKind::Device
    }
}
