//! Deterministic, hierarchy-aware data placement.
//!
//! This crate computes where replicas of a key live in a cluster without a
//! central metadata table: placement is a pure hash of the key against the
//! cluster topology, so every node that knows the topology agrees on the
//! answer. The topology is a tree of failure domains; replicas are spread
//! across racks first, then across devices within each chosen rack.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Topology                         │
//! ├──────────────────────────────────────────────────────┤
//! │                  ┌──────────┐                        │
//! │                  │   root   │                        │
//! │                  └────┬─────┘                        │
//! │         ┌─────────────┼─────────────┐                │
//! │    ┌────┴────┐   ┌────┴────┐   ┌────┴────┐           │
//! │    │ rack 0  │   │ rack 1  │   │ rack 2  │  (racks)  │
//! │    └────┬────┘   └────┬────┘   └────┬────┘           │
//! │    ┌────┴────┐   ┌────┴────┐   ┌────┴────┐           │
//! │    │dev 0,1,2│   │dev 3,4,5│   │dev 6,7,8│ (devices) │
//! │    └─────────┘   └─────────┘   └─────────┘           │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! A [`Selector`] picks children out of a bucket with one of three hash
//! strategies; the [`PlacementEngine`] composes a rack pass and a device
//! pass, and keeps the key index plus per-device load counters that the
//! rebalancer consumes.
//!
//! # Usage
//!
//! ```
//! use distkv_placement::{PlacementConfig, PlacementEngine};
//!
//! // 3 racks x 3 devices of capacity 100 each.
//! let config = PlacementConfig::default();
//! let mut engine = PlacementEngine::build(3, 3, 100.0, config).unwrap();
//!
//! engine.insert(0xfeed_beef).unwrap();
//! let devices = engine.locations(0xfeed_beef).unwrap();
//! assert_eq!(devices.len(), 2);
//!
//! // Placement is deterministic: locating again gives the same devices.
//! assert_eq!(&engine.locate(0xfeed_beef).unwrap(), devices);
//! ```

#![warn(missing_docs)]

pub mod bucket;
pub mod engine;
pub mod hash;
pub mod select;
pub mod topology;

pub use bucket::{Bucket, BucketId, BucketKind, DeviceId, ObjectKey};
pub use engine::{PlacementConfig, PlacementEngine, PlacementError};
pub use hash::key_of;
pub use select::{SelectError, SelectionStrategy, Selector};
pub use topology::{Topology, TopologyError};
