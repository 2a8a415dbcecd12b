//! Byzantine-robust aggregation for federated learning.
//!
//! Each round runs three steps over the plaintext batch:
//!
//! | Step | Function | Purpose |
//! |------|----------|---------|
//! | 1 | [`compute_center`] | Weighted geometric median (Weiszfeld) |
//! | 2 | [`detect_outliers`] | Reject vectors far from the center |
//! | 3 | [`aggregate`] | Arithmetic mean of the survivors |
//!
//! [`RobustAggregator`] drives these through the [`Round`] state machine and
//! enforces the quorum rule.

pub mod center;
pub mod mean;
pub mod outliers;
pub mod round;

pub use center::{compute_center, compute_weighted_center, CenterConfig, GeometricCenter};
pub use mean::aggregate;
pub use outliers::{detect_outliers, OutlierPolicy, OutlierSplit};
pub use round::{QuorumRule, Round, RoundPhase, RoundRecord, Submission};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AggregationError;
use crate::ledger::{PrincipalId, RoundId};
use crate::model::ModelVector;

/// Check that every vector has the first vector's length and is finite.
/// Returns that length (0 for an empty batch).
pub(crate) fn check_batch(vectors: &[ModelVector]) -> Result<usize, AggregationError> {
    let dim = vectors.first().map(|v| v.len()).unwrap_or(0);
    for (index, v) in vectors.iter().enumerate() {
        if v.len() != dim {
            return Err(AggregationError::DimensionMismatch {
                expected: dim,
                actual: v.len(),
                index,
            });
        }
        if !v.is_finite() {
            return Err(AggregationError::NonFinite(index));
        }
    }
    Ok(dim)
}

/// Tunables for [`RobustAggregator`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Center estimation budget
    pub center: CenterConfig,
    /// Outlier threshold policy
    pub outlier_policy: OutlierPolicy,
    /// Minimum accepted updates per round
    pub quorum: QuorumRule,
}

/// Round-by-round robust aggregator.
///
/// # Example
///
/// ```rust
/// use tessera_fl::aggregators::{AggregationConfig, RobustAggregator, Submission};
/// use tessera_fl::ledger::PrincipalId;
/// use tessera_fl::ModelVector;
///
/// let ids: Vec<PrincipalId> = (0..5).map(|i| PrincipalId::new(format!("d{}", i))).collect();
/// let mut agg = RobustAggregator::new(AggregationConfig::default());
/// let mut round = agg.begin_round(ids.clone(), ModelVector::zeros(2));
///
/// for (i, id) in ids.iter().enumerate() {
///     let value = if i == 3 { 1000.0 } else { 1.0 }; // Byzantine
///     round.submit(Submission::new(id.clone(), ModelVector::filled(2, value))).unwrap();
/// }
///
/// let result = agg.process(&mut round).unwrap();
/// assert_eq!(result, ModelVector::filled(2, 1.0));
/// assert_eq!(round.outlier_principals(), vec![ids[3].clone()]);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RobustAggregator {
    config: AggregationConfig,
    prior_center: Option<ModelVector>,
    next_round: RoundId,
}

impl RobustAggregator {
    /// Aggregator whose first round has index 1.
    pub fn new(config: AggregationConfig) -> Self {
        Self::starting_at(config, 1)
    }

    /// Aggregator resuming at `next_round` (e.g. one past the ledger's latest model).
    pub fn starting_at(config: AggregationConfig, next_round: RoundId) -> Self {
        Self {
            config,
            prior_center: None,
            next_round,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Center of the last published round, used to warm-start the next.
    pub fn prior_center(&self) -> Option<&ModelVector> {
        self.prior_center.as_ref()
    }

    /// Index the next [`begin_round`](Self::begin_round) will assign.
    pub fn next_round(&self) -> RoundId {
        self.next_round
    }

    /// Open the next round. Indices increase by one per call, including
    /// for rounds that later fail.
    pub fn begin_round(&mut self, participants: Vec<PrincipalId>, global_before: ModelVector) -> Round {
        let index = self.next_round;
        self.next_round += 1;
        Round::new(index, participants, global_before)
    }

    /// Use up the next index without opening a round, for a round that
    /// failed before it could start. Returns the skipped index.
    pub fn skip_round(&mut self) -> RoundId {
        let index = self.next_round;
        self.next_round += 1;
        index
    }

    /// `Collecting -> CenterEstimated`.
    ///
    /// Fails with `QuorumNotMet` up front if fewer updates arrived than the
    /// quorum requires, since filtering can only shrink the batch.
    pub fn estimate_center(&self, round: &mut Round) -> Result<(), AggregationError> {
        let required = self.config.quorum.required(round.participants().len());
        let submitted = round.submissions().len();
        if submitted < required {
            return Err(AggregationError::QuorumNotMet {
                needed: required,
                actual: submitted,
            });
        }

        let updates = round.updates();
        let weights = round.weights();
        let center = compute_weighted_center(
            &updates,
            Some(weights.as_slice()),
            self.prior_center.as_ref(),
            &self.config.center,
        )?;
        round.set_center(center)
    }

    /// `CenterEstimated -> OutliersFiltered`, enforcing the quorum on survivors.
    pub fn filter_outliers(&self, round: &mut Round) -> Result<(), AggregationError> {
        let center = round
            .center()
            .map(|c| c.vector.clone())
            .ok_or(AggregationError::PhaseViolation {
                from: round.phase().name(),
                to: RoundPhase::OutliersFiltered.name(),
            })?;

        let split = detect_outliers(&round.updates(), &center, &self.config.outlier_policy)?;

        let required = self.config.quorum.required(round.participants().len());
        if split.accepted.len() < required {
            return Err(AggregationError::QuorumNotMet {
                needed: required,
                actual: split.accepted.len(),
            });
        }
        round.set_split(split)
    }

    /// `OutliersFiltered -> Aggregated`.
    pub fn aggregate_round(&self, round: &mut Round) -> Result<ModelVector, AggregationError> {
        let accepted = round
            .split()
            .map(|s| s.accepted_vectors(&round.updates()))
            .ok_or(AggregationError::PhaseViolation {
                from: round.phase().name(),
                to: RoundPhase::Aggregated.name(),
            })?;

        let result = aggregate(&accepted)?;
        round.set_aggregate(result.clone())?;
        Ok(result)
    }

    /// Run center estimation, filtering and aggregation. On any error the
    /// round is moved to `Failed` and the error returned.
    pub fn process(&self, round: &mut Round) -> Result<ModelVector, AggregationError> {
        let result = self
            .estimate_center(round)
            .and_then(|_| self.filter_outliers(round))
            .and_then(|_| self.aggregate_round(round));

        match result {
            Ok(model) => {
                info!(
                    round = round.index(),
                    submitted = round.submissions().len(),
                    rejected = round.split().map(|s| s.rejected.len()).unwrap_or(0),
                    "Round aggregated"
                );
                Ok(model)
            }
            Err(e) => {
                warn!(round = round.index(), reason = %e, "Round failed; keeping previous global model");
                round.fail(e.clone());
                Err(e)
            }
        }
    }

    /// Close a round whose aggregate has been published and remember its
    /// center for the next round's warm start.
    pub fn complete(&mut self, round: &mut Round) -> Result<RoundRecord, AggregationError> {
        let record = round.close()?;
        self.prior_center = round.center().map(|c| c.vector.clone());
        Ok(record)
    }
}
