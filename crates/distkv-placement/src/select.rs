//! Child selection strategies and the bounded retry loop.
//!
//! A selector picks distinct, non-failed children out of candidate buckets
//! as a pure function of the object key. Three strategies are available:
//!
//! - **Uniform**: one hash indexes the child list. Fastest, ignores weight.
//! - **CumulativeWeight**: one draw walked over a prefix sum of child
//!   capacity shares. Weight-proportional, but a single weight change
//!   re-partitions every child's interval.
//! - **Straw**: an independent weighted draw per child; the longest straw
//!   wins. Weight-proportional, and a weight change only perturbs that
//!   child's straw, so reshuffling on reweight is minimal. This is the
//!   production default.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bucket::{Bucket, BucketId, BucketKind, ObjectKey};
use crate::hash::{placement_hash2, placement_hash3, unit_interval};
use crate::topology::{Topology, TopologyError};

/// How a selector picks one child out of a bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionStrategy {
    /// Equal-probability child pick, ignoring weights.
    Uniform,
    /// Single draw against a prefix scan of capacity shares.
    CumulativeWeight,
    /// Weighted max-draw, one straw per child.
    #[default]
    Straw,
}

/// Errors from a selection call.
#[derive(Debug, Error)]
pub enum SelectError {
    /// Topology lookup failed.
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// A candidate bucket's children are not of the expected kind. This is
    /// a topology-consistency failure, not a per-key condition.
    #[error("bucket {bucket} holds {found:?} children, expected {expected:?}")]
    WrongChildKind {
        /// The offending candidate bucket.
        bucket: BucketId,
        /// Kind the caller asked for.
        expected: BucketKind,
        /// Kind actually found.
        found: BucketKind,
    },

    /// A candidate bucket has no children to select from.
    #[error("bucket {bucket} has no children")]
    NoChildren {
        /// The offending candidate bucket.
        bucket: BucketId,
    },

    /// The retry budget ran out before a distinct, non-failed child was
    /// found. The candidate cannot satisfy the requested replica count;
    /// the caller decides whether to degrade or escalate.
    #[error("bucket {bucket} cannot fill replica slot {replica} within {retries} retries")]
    Exhausted {
        /// The candidate bucket that ran dry.
        bucket: BucketId,
        /// Replica slot that could not be filled.
        replica: usize,
        /// The exhausted retry budget.
        retries: usize,
    },
}

/// Deterministic child selector.
///
/// The strategy is an explicit constructor parameter; nothing about
/// selection is ambient state. Every pick is a function of
/// `(key, replica slot, retry count, candidate bucket)`.
#[derive(Debug, Clone)]
pub struct Selector {
    strategy: SelectionStrategy,
    max_retries: usize,
}

impl Selector {
    /// Create a selector with the given strategy and per-slot retry budget.
    #[must_use]
    pub fn new(strategy: SelectionStrategy, max_retries: usize) -> Self {
        Self { strategy, max_retries }
    }

    /// The configured strategy.
    #[must_use]
    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// Pick `replica_count` distinct, non-failed children per candidate,
    /// appended in candidate order.
    ///
    /// Every candidate's children must be of `expected_kind`. A pick that
    /// lands on a failed child or one already in the result retries with a
    /// perturbed round: the round for slot `r` is `r` plus the number of
    /// failures seen so far in this candidate (first-fit offset), so a
    /// collision on one slot shifts later slots past it. Each slot has a
    /// budget of `max_retries` attempts before [`SelectError::Exhausted`].
    pub fn select(
        &self,
        topology: &Topology,
        key: ObjectKey,
        candidates: &[BucketId],
        replica_count: usize,
        expected_kind: BucketKind,
    ) -> Result<Vec<BucketId>, SelectError> {
        let mut picked = Vec::with_capacity(candidates.len() * replica_count);

        for &candidate_id in candidates {
            let candidate = topology.bucket(candidate_id)?;
            let &first_child = candidate
                .children()
                .first()
                .ok_or(SelectError::NoChildren { bucket: candidate_id })?;
            let found = topology.bucket(first_child)?.kind;
            if found != expected_kind {
                return Err(SelectError::WrongChildKind {
                    bucket: candidate_id,
                    expected: expected_kind,
                    found,
                });
            }

            let mut failures = 0usize;
            for replica in 0..replica_count {
                let mut slot_failures = 0usize;
                loop {
                    let round = (replica + failures) as u64;
                    let child_id = self.draw(topology, candidate, key, round)?;
                    let child = topology.bucket(child_id)?;

                    if child.failed() || picked.contains(&child_id) {
                        failures += 1;
                        slot_failures += 1;
                        if slot_failures >= self.max_retries {
                            return Err(SelectError::Exhausted {
                                bucket: candidate_id,
                                replica,
                                retries: slot_failures,
                            });
                        }
                        continue;
                    }

                    picked.push(child_id);
                    break;
                }
            }
        }

        Ok(picked)
    }

    /// One strategy draw over a bucket's children. Pure: failed flags and
    /// the already-picked set are the retry loop's concern, not the draw's.
    fn draw(
        &self,
        topology: &Topology,
        bucket: &Bucket,
        key: ObjectKey,
        round: u64,
    ) -> Result<BucketId, SelectError> {
        match self.strategy {
            SelectionStrategy::Uniform => {
                let hash = placement_hash2(round, key);
                let index = (hash % bucket.children().len() as u64) as usize;
                Ok(bucket.children()[index])
            }

            SelectionStrategy::CumulativeWeight => {
                let target = unit_interval(placement_hash2(round, key));
                let total = bucket.adjusted_capacity();
                let mut cumulative = 0.0;
                let mut chosen = None;
                for &child_id in bucket.children() {
                    cumulative += topology.bucket(child_id)?.adjusted_capacity() / total;
                    chosen = Some(child_id);
                    if target < cumulative {
                        break;
                    }
                }
                // Float shortfall in the prefix sum falls through to the
                // last child.
                chosen.ok_or(SelectError::NoChildren { bucket: bucket.id })
            }

            SelectionStrategy::Straw => {
                let mut best: Option<(f64, BucketId)> = None;
                for &child_id in bucket.children() {
                    let adjusted = topology.bucket(child_id)?.adjusted_capacity();
                    if adjusted <= 0.0 {
                        continue;
                    }
                    let u = unit_interval(placement_hash3(round, key, child_id as u64));
                    // ln(u) is negative; a larger capacity pulls the score
                    // toward zero, so heavier children win more draws.
                    let score = u.ln() / adjusted;
                    if best.map_or(true, |(best_score, _)| score > best_score) {
                        best = Some((score, child_id));
                    }
                }
                best.map(|(_, id)| id).ok_or(SelectError::NoChildren { bucket: bucket.id })
            }
        }
    }
}
