//! Placement engine: two-pass selection plus key index and load accounting.
//!
//! `locate` composes two selector passes over the topology: pick racks from
//! the root, then pick devices within each chosen rack. Replicas land on
//! distinct racks, and on distinct devices within a rack, by construction.
//!
//! The engine also owns the key index (which devices hold each key) and the
//! per-device load counters that reweighting reads.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bucket::{BucketKind, DeviceId, ObjectKey};
use crate::select::{SelectError, SelectionStrategy, Selector};
use crate::topology::{Topology, TopologyError};

/// Errors from placement operations.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// Topology error.
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// Selection error.
    #[error(transparent)]
    Select(#[from] SelectError),

    /// The key is already placed.
    #[error("key {0:#018x} is already placed")]
    DuplicateKey(ObjectKey),

    /// The key is not placed.
    #[error("key {0:#018x} is not placed")]
    UnknownKey(ObjectKey),
}

/// Configuration for the placement engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// How many distinct racks hold replicas of each key.
    pub rack_replicas: usize,

    /// How many distinct devices hold replicas within each chosen rack.
    pub replicas_per_rack: usize,

    /// Selection strategy for both passes.
    pub strategy: SelectionStrategy,

    /// Per-replica-slot retry budget for selection.
    pub max_retries: usize,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            rack_replicas: 2,
            replicas_per_rack: 1,
            strategy: SelectionStrategy::Straw,
            max_retries: 30,
        }
    }
}

impl PlacementConfig {
    /// Replicas each placed key occupies in total.
    #[must_use]
    pub fn replica_count(&self) -> usize {
        self.rack_replicas * self.replicas_per_rack
    }
}

/// Deterministic placement engine over a fixed topology.
#[derive(Debug, Clone)]
pub struct PlacementEngine {
    topology: Topology,
    selector: Selector,
    config: PlacementConfig,
    /// Key -> devices currently holding it. Ordered so full scans are
    /// deterministic.
    index: BTreeMap<ObjectKey, BTreeSet<DeviceId>>,
}

impl PlacementEngine {
    /// Create an engine over an existing topology.
    #[must_use]
    pub fn new(topology: Topology, config: PlacementConfig) -> Self {
        let selector = Selector::new(config.strategy, config.max_retries);
        Self { topology, selector, config, index: BTreeMap::new() }
    }

    /// Build the standard rack/device topology and an engine over it.
    pub fn build(
        rack_count: usize,
        devices_per_rack: usize,
        device_capacity: f64,
        config: PlacementConfig,
    ) -> Result<Self, TopologyError> {
        let topology = Topology::build(rack_count, devices_per_rack, device_capacity)?;
        Ok(Self::new(topology, config))
    }

    /// The underlying topology.
    #[must_use]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    /// Compute the device set for a key.
    ///
    /// Pure read: depends only on the key and current topology state
    /// (weights, failed flags, child order). Two calls with unchanged state
    /// return identical sets.
    pub fn locate(&self, key: ObjectKey) -> Result<BTreeSet<DeviceId>, PlacementError> {
        let racks = self.selector.select(
            &self.topology,
            key,
            &[self.topology.root_id()],
            self.config.rack_replicas,
            BucketKind::Rack,
        )?;
        let devices = self.selector.select(
            &self.topology,
            key,
            &racks,
            self.config.replicas_per_rack,
            BucketKind::Device,
        )?;
        Ok(devices.into_iter().collect())
    }

    /// Place a key: compute its device set, bump loads, record the index
    /// entry.
    pub fn insert(&mut self, key: ObjectKey) -> Result<(), PlacementError> {
        if self.index.contains_key(&key) {
            return Err(PlacementError::DuplicateKey(key));
        }
        let devices = self.locate(key)?;
        for &device_id in &devices {
            self.topology.increment_load(device_id)?;
        }
        self.index.insert(key, devices);
        Ok(())
    }

    /// Remove a key, releasing load on the devices that actually hold it.
    ///
    /// The stored index entry is authoritative here, not `locate`: the
    /// topology may have been reweighted since the key was placed, and
    /// removal must target where the data really sits.
    pub fn remove(&mut self, key: ObjectKey) -> Result<(), PlacementError> {
        let devices = self.index.remove(&key).ok_or(PlacementError::UnknownKey(key))?;
        for &device_id in &devices {
            self.topology.decrement_load(device_id)?;
        }
        Ok(())
    }

    /// Rewrite a key's index entry to `devices`, applying only the load
    /// delta against the stored entry.
    pub fn reassign(
        &mut self,
        key: ObjectKey,
        devices: BTreeSet<DeviceId>,
    ) -> Result<(), PlacementError> {
        let current = self.index.get(&key).ok_or(PlacementError::UnknownKey(key))?.clone();
        for &added in devices.difference(&current) {
            self.topology.increment_load(added)?;
        }
        for &removed in current.difference(&devices) {
            self.topology.decrement_load(removed)?;
        }
        self.index.insert(key, devices);
        Ok(())
    }

    /// Whether a key is currently placed.
    #[must_use]
    pub fn contains(&self, key: ObjectKey) -> bool {
        self.index.contains_key(&key)
    }

    /// The stored device set for a key, if placed.
    #[must_use]
    pub fn locations(&self, key: ObjectKey) -> Option<&BTreeSet<DeviceId>> {
        self.index.get(&key)
    }

    /// All placed keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = ObjectKey> + '_ {
        self.index.keys().copied()
    }

    /// Number of placed keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.index.len()
    }

    /// Number of devices in the topology.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.topology.device_count()
    }

    /// Total replica count across all devices.
    #[must_use]
    pub fn total_load(&self) -> u64 {
        self.topology.total_load()
    }

    /// Mean replica count per device.
    #[must_use]
    pub fn average_load(&self) -> f64 {
        let devices = self.topology.device_count();
        if devices == 0 {
            return 0.0;
        }
        self.total_load() as f64 / devices as f64
    }

    /// Per-device load snapshot in device order.
    #[must_use]
    pub fn device_loads(&self) -> Vec<(DeviceId, u64)> {
        self.topology
            .device_ids()
            .iter()
            .filter_map(|&id| self.topology.device_load(id).ok().map(|load| (id, load)))
            .collect()
    }

    /// Per-device weight snapshot in device order.
    #[must_use]
    pub fn device_weights(&self) -> Vec<(DeviceId, f64)> {
        self.topology
            .device_ids()
            .iter()
            .filter_map(|&id| self.topology.device_weight(id).ok().map(|weight| (id, weight)))
            .collect()
    }

    /// Per-device `load / average load` snapshot. All zeros while nothing
    /// is placed.
    #[must_use]
    pub fn utilization(&self) -> Vec<(DeviceId, f64)> {
        let avg = self.average_load();
        self.device_loads()
            .into_iter()
            .map(|(id, load)| (id, if avg > 0.0 { load as f64 / avg } else { 0.0 }))
            .collect()
    }

    /// The `k` most loaded devices, heaviest first. Ties break toward the
    /// lower device id so the ranking is deterministic.
    #[must_use]
    pub fn most_loaded(&self, k: usize) -> Vec<(DeviceId, u64)> {
        let mut loads = self.device_loads();
        loads.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        loads.truncate(k);
        loads
    }

    /// The `k` least loaded devices, lightest first. Ties break toward the
    /// lower device id.
    #[must_use]
    pub fn least_loaded(&self, k: usize) -> Vec<(DeviceId, u64)> {
        let mut loads = self.device_loads();
        loads.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        loads.truncate(k);
        loads
    }

    /// Set a device's weight (eagerly propagated upward).
    pub fn set_device_weight(&mut self, id: DeviceId, weight: f64) -> Result<(), PlacementError> {
        self.topology.set_device_weight(id, weight)?;
        Ok(())
    }

    /// Current weight of a device.
    pub fn device_weight(&self, id: DeviceId) -> Result<f64, PlacementError> {
        Ok(self.topology.device_weight(id)?)
    }

    /// Mark a device failed or healthy.
    pub fn set_device_failed(&mut self, id: DeviceId, failed: bool) -> Result<(), PlacementError> {
        self.topology.set_device_failed(id, failed)?;
        Ok(())
    }

    /// Drop every placed key, zero all loads, and restore weights to 1.0.
    /// Failed flags are preserved.
    pub fn reset(&mut self) {
        self.index.clear();
        self.topology.reset();
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn engine(rack_count: usize, devices_per_rack: usize) -> PlacementEngine {
        PlacementEngine::build(rack_count, devices_per_rack, 100.0, PlacementConfig::default())
            .unwrap()
    }

    fn sample_keys(n: usize, seed: u64) -> Vec<ObjectKey> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut keys = BTreeSet::new();
        while keys.len() < n {
            keys.insert(rng.gen::<u64>());
        }
        keys.into_iter().collect()
    }

    #[test]
    fn test_locate_deterministic() {
        let engine = engine(3, 3);
        for key in sample_keys(200, 1) {
            assert_eq!(engine.locate(key).unwrap(), engine.locate(key).unwrap());
        }
    }

    #[test]
    fn test_locate_spans_distinct_racks() {
        let engine = engine(3, 3);
        for key in sample_keys(500, 2) {
            let devices = engine.locate(key).unwrap();
            assert_eq!(devices.len(), 2);
            let racks: BTreeSet<i32> = devices.iter().map(|d| d / 3).collect();
            assert_eq!(racks.len(), 2, "replicas share a rack for key {key:#x}");
        }
    }

    #[test]
    fn test_insert_duplicate_rejected() {
        let mut engine = engine(2, 2);
        engine.insert(7).unwrap();
        assert!(matches!(engine.insert(7), Err(PlacementError::DuplicateKey(7))));
    }

    #[test]
    fn test_remove_unknown_rejected() {
        let mut engine = engine(2, 2);
        assert!(matches!(engine.remove(9), Err(PlacementError::UnknownKey(9))));
    }

    #[test]
    fn test_load_conservation() {
        let mut engine = engine(3, 3);
        let keys = sample_keys(300, 3);
        for &key in &keys {
            engine.insert(key).unwrap();
        }
        let replica_count = engine.config().replica_count() as u64;
        assert_eq!(engine.total_load(), 300 * replica_count);

        for &key in &keys[..100] {
            engine.remove(key).unwrap();
        }
        assert_eq!(engine.total_load(), 200 * replica_count);
        assert_eq!(engine.key_count(), 200);
    }

    #[test]
    fn test_remove_uses_index_not_locate() {
        let mut engine = engine(2, 2);
        let keys = sample_keys(50, 4);
        for &key in &keys {
            engine.insert(key).unwrap();
        }
        // Shift selection probabilities after placement; removal must still
        // release exactly the devices each key was placed on.
        engine.set_device_weight(0, 0.2).unwrap();
        for &key in &keys {
            engine.remove(key).unwrap();
        }
        assert_eq!(engine.total_load(), 0);
        for (_, load) in engine.device_loads() {
            assert_eq!(load, 0);
        }
    }

    #[test]
    fn test_failed_device_excluded() {
        let mut engine = engine(3, 3);
        engine.set_device_failed(4, true).unwrap();
        for key in sample_keys(10_000, 5) {
            let devices = engine.locate(key).unwrap();
            assert!(!devices.contains(&4), "failed device located for key {key:#x}");
        }
    }

    #[test]
    fn test_reassign_applies_delta_only() {
        let mut engine = engine(2, 2);
        engine.insert(11).unwrap();
        let before = engine.locations(11).unwrap().clone();

        let mut target = before.clone();
        // Swap one replica to a device outside the current set.
        let spare = (0..4).find(|d| !before.contains(d)).unwrap();
        let dropped = *before.iter().next().unwrap();
        target.remove(&dropped);
        target.insert(spare);

        engine.reassign(11, target.clone()).unwrap();
        assert_eq!(engine.locations(11), Some(&target));
        assert_eq!(engine.topology().device_load(spare).unwrap(), 1);
        assert_eq!(engine.topology().device_load(dropped).unwrap(), 0);
        assert_eq!(engine.total_load(), 2);
    }

    #[test]
    fn test_most_and_least_loaded_ranking() {
        let mut engine = engine(2, 2);
        let keys = sample_keys(200, 6);
        for &key in &keys {
            engine.insert(key).unwrap();
        }

        let most = engine.most_loaded(4);
        let least = engine.least_loaded(4);
        assert_eq!(most.len(), 4);
        assert!(most.windows(2).all(|w| w[0].1 >= w[1].1));
        assert!(least.windows(2).all(|w| w[0].1 <= w[1].1));
        assert!(most[0].1 >= least[0].1);
        assert_eq!(engine.most_loaded(99).len(), 4);
    }

    #[test]
    fn test_straw_distribution_near_uniform() {
        let mut engine = engine(2, 2);
        for key in sample_keys(2_000, 7) {
            engine.insert(key).unwrap();
        }
        // 2000 keys x 2 replicas over 4 equal devices: about 1000 each.
        for (id, load) in engine.device_loads() {
            assert!(
                (900..=1100).contains(&load),
                "device {id} load {load} outside 10% of expected 1000"
            );
        }
    }

    #[test]
    fn test_utilization_snapshot() {
        let mut engine = engine(2, 2);
        assert!(engine.utilization().iter().all(|&(_, u)| u == 0.0));

        for key in sample_keys(400, 8) {
            engine.insert(key).unwrap();
        }
        let total: f64 = engine.utilization().iter().map(|&(_, u)| u).sum();
        assert!((total - 4.0).abs() < 1e-9, "relative loads must sum to device count");
    }

    #[test]
    fn test_reset_clears_run_state() {
        let mut engine = engine(2, 2);
        for key in sample_keys(50, 9) {
            engine.insert(key).unwrap();
        }
        engine.set_device_weight(1, 0.4).unwrap();
        engine.reset();

        assert_eq!(engine.key_count(), 0);
        assert_eq!(engine.total_load(), 0);
        assert!(engine.device_weights().iter().all(|&(_, w)| (w - 1.0).abs() < f64::EPSILON));
    }

    #[test]
    fn test_exhaustion_surfaces_not_degrades() {
        // Two racks, one device each; the only device of rack 0 fails.
        // Every key needs both racks, so every locate must fail loudly
        // rather than return the failed device.
        let mut engine = engine(2, 1);
        engine.set_device_failed(0, true).unwrap();
        for key in sample_keys(50, 10) {
            let err = engine.locate(key).unwrap_err();
            assert!(matches!(err, PlacementError::Select(SelectError::Exhausted { .. })));
        }
    }

    #[test]
    fn test_config_default() {
        let config = PlacementConfig::default();
        assert_eq!(config.rack_replicas, 2);
        assert_eq!(config.replicas_per_rack, 1);
        assert_eq!(config.strategy, SelectionStrategy::Straw);
        assert_eq!(config.max_retries, 30);
        assert_eq!(config.replica_count(), 2);
    }
}
