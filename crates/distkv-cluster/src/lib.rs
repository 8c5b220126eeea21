// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The DistKV Authors

//! Cluster load management for DistKV placement.
//!
//! This crate provides:
//! - Weight-based rebalancing against a placement engine's observed load
//! - Bounded settle loops with per-pass relocation accounting
//!
//! # Architecture
//!
//! Rebalancing operates in two phases per pass:
//! 1. **Reweight**: lower the weights of overloaded devices and raise the
//!    weights of underloaded ones, each within a per-pass step bound
//! 2. **Relocate**: recompute placement for every tracked key and apply
//!    only the deltas, recording which keys moved
//!
//! # Example
//!
//! ```
//! use distkv_cluster::{RebalanceConfig, Rebalancer};
//! use distkv_placement::{PlacementConfig, PlacementEngine};
//!
//! let mut engine = PlacementEngine::build(2, 2, 100.0, PlacementConfig::default()).unwrap();
//! for key in 0..100u64 {
//!     engine.insert(key).unwrap();
//! }
//!
//! let rebalancer = Rebalancer::new(RebalanceConfig::default());
//! let report = rebalancer.run(&mut engine).unwrap();
//! assert!(report.passes <= rebalancer.config().max_iterations);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod rebalance;

pub use rebalance::{
    PassOutcome, RebalanceConfig, RebalanceReport, Rebalancer, RelocationRecord,
};
