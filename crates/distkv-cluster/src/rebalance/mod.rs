// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The DistKV Authors

//! Weight-based load rebalancing.
//!
//! A rebalance pass reads the engine's load distribution, nudges the
//! weights of the most- and least-loaded devices toward the mean, then
//! recomputes placement for every tracked key and applies only the deltas.
//!
//! # Algorithm
//!
//! One pass, against the mean device load:
//! 1. Among the `max_devices_considered` most loaded devices, lower the
//!    weight of each one whose relative load exceeds `overload_ratio`,
//!    targeting `weight * avg / load` but never cutting more than
//!    `max_weight_step` in one pass. The target is the weight that would
//!    bring the device exactly to the mean, so a single step never
//!    overcorrects below it.
//! 2. With the remaining device budget, raise the weights of underloaded
//!    devices symmetrically, capped at 1.0 and by the same step bound.
//! 3. Recompute `locate` for every placed key; where the device set
//!    changed, move the load delta and record the relocation.
//!
//! A pass that relocates nothing means the workload has settled under the
//! current weights; [`Rebalancer::run`] loops passes until that happens or
//! the iteration bound is hit.

mod config;
mod events;

pub use config::RebalanceConfig;
pub use events::{PassOutcome, RebalanceReport, RelocationRecord};
use distkv_placement::{DeviceId, ObjectKey, PlacementEngine, PlacementError};
use metrics::{counter, gauge};
use tracing::{debug, info};

/// Applies weight-based rebalancing to a [`PlacementEngine`].
#[derive(Debug, Clone, Default)]
pub struct Rebalancer {
    config: RebalanceConfig,
}

impl Rebalancer {
    /// Creates a rebalancer with the given thresholds.
    #[must_use]
    pub fn new(config: RebalanceConfig) -> Self {
        Self { config }
    }

    /// The configured thresholds.
    #[must_use]
    pub fn config(&self) -> &RebalanceConfig {
        &self.config
    }

    /// Runs a single rebalance pass: reweight, then relocate.
    ///
    /// A pass over an engine with nothing placed is a no-op. The pass is
    /// atomic from the caller's perspective: by return, loads and the key
    /// index agree with the adjusted weights.
    pub fn rebalance_pass(
        &self,
        engine: &mut PlacementEngine,
    ) -> Result<PassOutcome, PlacementError> {
        let avg_load = engine.average_load();
        if avg_load <= 0.0 {
            return Ok(PassOutcome::default());
        }

        self.reweight(engine, avg_load)?;
        let outcome = self.relocate(engine)?;

        counter!("distkv_rebalance_relocated_keys").increment(outcome.relocated_keys() as u64);
        counter!("distkv_rebalance_moved_replicas").increment(outcome.moved_replicas() as u64);
        info!(
            relocated = outcome.relocated_keys(),
            moved_replicas = outcome.moved_replicas(),
            avg_load,
            "rebalance pass complete"
        );
        Ok(outcome)
    }

    /// Lowers overloaded weights, raises underloaded ones, within bounds.
    fn reweight(&self, engine: &mut PlacementEngine, avg_load: f64) -> Result<(), PlacementError> {
        let mut lowered = 0usize;
        for (device_id, load) in engine.most_loaded(self.config.max_devices_considered) {
            let load = load as f64;
            if load / avg_load <= self.config.overload_ratio {
                continue;
            }
            let weight = engine.device_weight(device_id)?;
            // Target hits the mean exactly; the step bound keeps one pass
            // from cutting further than that.
            let new_weight = (weight - self.config.max_weight_step).max(weight * avg_load / load);
            debug!(device = device_id, weight, new_weight, "device overloaded, lowering weight");
            engine.set_device_weight(device_id, new_weight)?;
            lowered += 1;
        }

        let budget = self.config.max_devices_considered.saturating_sub(lowered);
        for (device_id, load) in engine.least_loaded(budget) {
            let load = load as f64;
            let weight = engine.device_weight(device_id)?;
            if load / avg_load >= 1.0 || weight >= 1.0 {
                continue;
            }
            // An idle device has no finite mean-hitting target; the step
            // bound and the 1.0 cap are the only limits then.
            let target = if load > 0.0 { weight * avg_load / load } else { 1.0 };
            let new_weight = target.min(weight + self.config.max_weight_step).min(1.0);
            debug!(device = device_id, weight, new_weight, "device underloaded, raising weight");
            engine.set_device_weight(device_id, new_weight)?;
        }
        Ok(())
    }

    /// Recomputes every key's placement and applies the deltas.
    fn relocate(&self, engine: &mut PlacementEngine) -> Result<PassOutcome, PlacementError> {
        let keys: Vec<ObjectKey> = engine.keys().collect();
        let mut outcome = PassOutcome::default();

        for key in keys {
            let to = engine.locate(key)?;
            let from = match engine.locations(key) {
                Some(current) if *current != to => current.clone(),
                _ => continue,
            };
            engine.reassign(key, to.clone())?;
            outcome.relocations.push(RelocationRecord { key, from, to });
        }
        Ok(outcome)
    }

    /// Runs passes until one relocates nothing or the iteration bound is
    /// hit, and reports the totals.
    pub fn run(&self, engine: &mut PlacementEngine) -> Result<RebalanceReport, PlacementError> {
        let mut report = RebalanceReport::default();

        while report.passes < self.config.max_iterations {
            let outcome = self.rebalance_pass(engine)?;
            report.passes += 1;
            report.relocated_keys += outcome.relocated_keys();
            report.moved_replicas += outcome.moved_replicas();
            if outcome.is_settled() {
                report.converged = true;
                break;
            }
        }

        gauge!("distkv_rebalance_passes").set(report.passes as f64);
        info!(
            passes = report.passes,
            relocated = report.relocated_keys,
            converged = report.converged,
            "rebalance run complete"
        );
        Ok(report)
    }

    /// Largest absolute weight change observed between two weight
    /// snapshots. Handy for asserting the step bound.
    #[must_use]
    pub fn max_weight_delta(before: &[(DeviceId, f64)], after: &[(DeviceId, f64)]) -> f64 {
        before
            .iter()
            .zip(after.iter())
            .map(|(&(_, was), &(_, now))| (now - was).abs())
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use distkv_placement::PlacementConfig;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn loaded_engine(keys: usize, seed: u64) -> PlacementEngine {
        let mut engine =
            PlacementEngine::build(3, 3, 100.0, PlacementConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut inserted = 0;
        while inserted < keys {
            if engine.insert(rng.gen::<u64>()).is_ok() {
                inserted += 1;
            }
        }
        engine
    }

    #[test]
    fn test_pass_on_empty_engine_is_noop() {
        let mut engine =
            PlacementEngine::build(2, 2, 100.0, PlacementConfig::default()).unwrap();
        let outcome = Rebalancer::default().rebalance_pass(&mut engine).unwrap();
        assert!(outcome.is_settled());
        assert!(engine.device_weights().iter().all(|&(_, w)| w == 1.0));
    }

    #[test]
    fn test_high_threshold_changes_nothing() {
        let mut engine = loaded_engine(500, 11);
        let weights_before = engine.device_weights();
        let config = RebalanceConfig { overload_ratio: 10.0, ..RebalanceConfig::default() };
        let outcome = Rebalancer::new(config).rebalance_pass(&mut engine).unwrap();

        // Nothing is 10x the mean, so no device is lowered; and nothing was
        // lowered before, so every device already sits at weight 1.0 and
        // cannot be raised. The pass must relocate nothing.
        assert!(outcome.is_settled());
        assert_eq!(engine.device_weights(), weights_before);
    }

    #[test]
    fn test_weight_step_bound_per_pass() {
        let mut engine = loaded_engine(800, 12);
        let config = RebalanceConfig {
            overload_ratio: 1.0001,
            max_weight_step: 0.03,
            ..RebalanceConfig::default()
        };
        let rebalancer = Rebalancer::new(config);

        for _ in 0..4 {
            let before = engine.device_weights();
            rebalancer.rebalance_pass(&mut engine).unwrap();
            let after = engine.device_weights();
            let delta = Rebalancer::max_weight_delta(&before, &after);
            assert!(delta <= 0.03 + 1e-12, "pass exceeded weight step: {delta}");
        }
    }

    #[test]
    fn test_weights_stay_in_bounds() {
        let mut engine = loaded_engine(800, 13);
        let config = RebalanceConfig {
            overload_ratio: 1.0001,
            max_weight_step: 0.5,
            ..RebalanceConfig::default()
        };
        let rebalancer = Rebalancer::new(config);
        for _ in 0..6 {
            rebalancer.rebalance_pass(&mut engine).unwrap();
            for (device_id, weight) in engine.device_weights() {
                assert!(weight > 0.0, "device {device_id} weight hit zero");
                assert!(weight <= 1.0, "device {device_id} weight {weight} above 1.0");
            }
        }
    }

    #[test]
    fn test_load_conserved_across_passes() {
        let mut engine = loaded_engine(600, 14);
        let total_before = engine.total_load();
        let rebalancer = Rebalancer::new(RebalanceConfig {
            overload_ratio: 1.01,
            ..RebalanceConfig::default()
        });
        rebalancer.run(&mut engine).unwrap();
        assert_eq!(engine.total_load(), total_before);

        // The index and the load counters must still agree.
        let from_index: u64 = engine
            .keys()
            .map(|key| engine.locations(key).map_or(0, |set| set.len() as u64))
            .sum();
        assert_eq!(from_index, total_before);
    }

    #[test]
    fn test_relocations_reported_match_index_changes() {
        let mut engine = loaded_engine(600, 15);
        let placements_before: Vec<_> =
            engine.keys().map(|k| (k, engine.locations(k).unwrap().clone())).collect();

        let rebalancer = Rebalancer::new(RebalanceConfig {
            overload_ratio: 1.01,
            max_weight_step: 0.2,
            ..RebalanceConfig::default()
        });
        let outcome = rebalancer.rebalance_pass(&mut engine).unwrap();

        let mut changed = 0;
        for (key, before) in placements_before {
            let after = engine.locations(key).unwrap();
            if *after != before {
                changed += 1;
            }
        }
        assert_eq!(outcome.relocated_keys(), changed);
        for record in &outcome.relocations {
            assert_eq!(engine.locations(record.key), Some(&record.to));
            assert_ne!(record.from, record.to);
        }
    }

    #[test]
    fn test_run_stops_on_settled_pass() {
        let mut engine = loaded_engine(500, 16);
        // With nothing over 10x the mean no weight moves, so the first pass
        // settles immediately.
        let config = RebalanceConfig { overload_ratio: 10.0, ..RebalanceConfig::default() };
        let report = Rebalancer::new(config).run(&mut engine).unwrap();
        assert_eq!(report.passes, 1);
        assert!(report.converged);
        assert_eq!(report.relocated_keys, 0);
    }

    #[test]
    fn test_run_respects_iteration_bound() {
        let mut engine = loaded_engine(800, 17);
        let config = RebalanceConfig {
            overload_ratio: 1.0001,
            max_weight_step: 0.02,
            max_iterations: 3,
            ..RebalanceConfig::default()
        };
        let report = Rebalancer::new(config).run(&mut engine).unwrap();
        assert!(report.passes <= 3);
    }
}
