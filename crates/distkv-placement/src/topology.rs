//! Cluster topology: the bucket tree and its mutable per-run state.
//!
//! The shape is fixed at construction: one root, racks under it, devices
//! under racks. What mutates afterwards is per-device weight (reweighting),
//! the failed flag, and device load counters.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bucket::{Bucket, BucketId, BucketKind, DeviceId};

/// Errors from topology construction or state mutation.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// Shape parameters describe an empty cluster.
    #[error("topology needs at least one rack and one device per rack")]
    EmptyShape,

    /// Capacity must be positive.
    #[error("device capacity must be positive, got {0}")]
    InvalidCapacity(f64),

    /// Weight must be positive.
    #[error("weight must be positive, got {0}")]
    InvalidWeight(f64),

    /// Device not found.
    #[error("device {0} not found")]
    UnknownDevice(DeviceId),

    /// Bucket not found.
    #[error("bucket {0} not found")]
    UnknownBucket(BucketId),
}

/// The complete cluster topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    /// All buckets, indexed by id.
    buckets: HashMap<BucketId, Bucket>,
    /// Device ids in construction order.
    device_ids: Vec<DeviceId>,
    /// Rack ids in construction order.
    rack_ids: Vec<BucketId>,
    /// Root bucket id.
    root_id: BucketId,
}

impl Topology {
    /// Build the fixed root -> racks -> devices tree.
    ///
    /// Devices get ids `0..rack_count * devices_per_rack` in rack order.
    /// Rack base capacity is `device_capacity * devices_per_rack`; the root
    /// aggregates all racks. All weights start at 1.0.
    pub fn build(
        rack_count: usize,
        devices_per_rack: usize,
        device_capacity: f64,
    ) -> Result<Self, TopologyError> {
        if rack_count == 0 || devices_per_rack == 0 {
            return Err(TopologyError::EmptyShape);
        }
        if !(device_capacity > 0.0) {
            return Err(TopologyError::InvalidCapacity(device_capacity));
        }

        let device_count = rack_count * devices_per_rack;
        let mut buckets = HashMap::with_capacity(device_count + rack_count + 1);
        let mut device_ids = Vec::with_capacity(device_count);
        let mut rack_ids = Vec::with_capacity(rack_count);
        let mut next_bucket_id: BucketId = -1;

        let root_id = -(rack_count as BucketId) - 1;
        for rack_index in 0..rack_count {
            let rack_id = next_bucket_id;
            next_bucket_id -= 1;

            let mut rack =
                Bucket::new(rack_id, BucketKind::Rack, device_capacity * devices_per_rack as f64);
            rack.parent = Some(root_id);

            for device_index in 0..devices_per_rack {
                let device_id = (rack_index * devices_per_rack + device_index) as DeviceId;
                let mut device = Bucket::new(device_id, BucketKind::Device, device_capacity);
                device.parent = Some(rack_id);
                rack.children.push(device_id);
                buckets.insert(device_id, device);
                device_ids.push(device_id);
            }

            rack_ids.push(rack_id);
            buckets.insert(rack_id, rack);
        }

        let mut root = Bucket::new(root_id, BucketKind::Root, device_capacity * device_count as f64);
        root.children = rack_ids.clone();
        buckets.insert(root_id, root);

        Ok(Self { buckets, device_ids, rack_ids, root_id })
    }

    /// The root bucket id.
    #[must_use]
    pub fn root_id(&self) -> BucketId {
        self.root_id
    }

    /// Look up a bucket by id.
    pub fn bucket(&self, id: BucketId) -> Result<&Bucket, TopologyError> {
        self.buckets.get(&id).ok_or(TopologyError::UnknownBucket(id))
    }

    /// Device ids in construction order.
    #[must_use]
    pub fn device_ids(&self) -> &[DeviceId] {
        &self.device_ids
    }

    /// Rack ids in construction order.
    #[must_use]
    pub fn rack_ids(&self) -> &[BucketId] {
        &self.rack_ids
    }

    /// Number of devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.device_ids.len()
    }

    fn device(&self, id: DeviceId) -> Result<&Bucket, TopologyError> {
        match self.buckets.get(&id) {
            Some(bucket) if bucket.is_device() => Ok(bucket),
            _ => Err(TopologyError::UnknownDevice(id)),
        }
    }

    fn device_mut(&mut self, id: DeviceId) -> Result<&mut Bucket, TopologyError> {
        match self.buckets.get_mut(&id) {
            Some(bucket) if bucket.is_device() => Ok(bucket),
            _ => Err(TopologyError::UnknownDevice(id)),
        }
    }

    /// Current weight of a device.
    pub fn device_weight(&self, id: DeviceId) -> Result<f64, TopologyError> {
        Ok(self.device(id)?.weight)
    }

    /// Current load of a device.
    pub fn device_load(&self, id: DeviceId) -> Result<u64, TopologyError> {
        Ok(self.device(id)?.load)
    }

    /// Set a device's weight and propagate the change upward.
    ///
    /// Propagation is eager: the parent rack's weight is recomputed as
    /// `sum(children adjusted capacity) / rack base capacity`, then the root
    /// the same way. Interior weights are never written by anything else, so
    /// they always agree with their children.
    pub fn set_device_weight(&mut self, id: DeviceId, weight: f64) -> Result<(), TopologyError> {
        if !(weight > 0.0) {
            return Err(TopologyError::InvalidWeight(weight));
        }
        let device = self.device_mut(id)?;
        device.weight = weight;

        let mut parent = device.parent;
        while let Some(bucket_id) = parent {
            parent = self.recompute_interior_weight(bucket_id)?;
        }
        Ok(())
    }

    /// Recompute one interior bucket's weight from its children and return
    /// its parent for the next step up.
    fn recompute_interior_weight(
        &mut self,
        id: BucketId,
    ) -> Result<Option<BucketId>, TopologyError> {
        let bucket = self.bucket(id)?;
        let children = bucket.children.clone();
        let base = bucket.base_capacity;
        let parent = bucket.parent;

        let mut aggregate = 0.0;
        for child_id in children {
            aggregate += self.bucket(child_id)?.adjusted_capacity();
        }

        if let Some(bucket) = self.buckets.get_mut(&id) {
            bucket.weight = aggregate / base;
        }
        Ok(parent)
    }

    /// Mark a device failed or healthy. A failed device stays in the tree
    /// so sibling selection indices do not shift.
    pub fn set_device_failed(&mut self, id: DeviceId, failed: bool) -> Result<(), TopologyError> {
        self.device_mut(id)?.failed = failed;
        Ok(())
    }

    pub(crate) fn increment_load(&mut self, id: DeviceId) -> Result<(), TopologyError> {
        let device = self.device_mut(id)?;
        device.load += 1;
        Ok(())
    }

    pub(crate) fn decrement_load(&mut self, id: DeviceId) -> Result<(), TopologyError> {
        let device = self.device_mut(id)?;
        device.load = device.load.saturating_sub(1);
        Ok(())
    }

    /// Aggregate load under any bucket, recomputed on every call by summing
    /// the subtree. Interior load is never cached, so it cannot go stale
    /// against device counters.
    pub fn subtree_load(&self, id: BucketId) -> Result<u64, TopologyError> {
        let bucket = self.bucket(id)?;
        if bucket.is_device() {
            return Ok(bucket.load);
        }
        let mut total = 0;
        for &child_id in &bucket.children {
            total += self.subtree_load(child_id)?;
        }
        Ok(total)
    }

    /// Total load across all devices.
    #[must_use]
    pub fn total_load(&self) -> u64 {
        self.device_ids.iter().filter_map(|id| self.buckets.get(id)).map(|b| b.load).sum()
    }

    /// Zero all loads and restore every weight to 1.0. Failed flags are
    /// left alone.
    pub fn reset(&mut self) {
        for bucket in self.buckets.values_mut() {
            bucket.load = 0;
            bucket.weight = 1.0;
        }
    }
}
