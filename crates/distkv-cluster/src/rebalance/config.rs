// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The DistKV Authors

//! Configuration for the rebalancer.

/// Configuration for weight-based rebalancing.
#[derive(Debug, Clone)]
pub struct RebalanceConfig {
    /// A device is overloaded when `load / average load` exceeds this.
    /// 1.1 means 10% above the mean triggers a weight cut.
    pub overload_ratio: f64,

    /// Largest weight change any single pass may apply to one device.
    pub max_weight_step: f64,

    /// How many devices one pass may touch, split between the most loaded
    /// (lowered) and the least loaded (raised).
    pub max_devices_considered: usize,

    /// Upper bound on passes per [`super::Rebalancer::run`] call. Weight
    /// changes shift selection probabilities globally, so one pass can fix
    /// an imbalance and introduce a smaller one elsewhere; the loop lets
    /// that settle without running unbounded.
    pub max_iterations: usize,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            overload_ratio: 1.1,
            max_weight_step: 0.05,
            max_devices_considered: 10,
            max_iterations: 5,
        }
    }
}
