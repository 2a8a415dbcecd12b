//! Per-round aggregation state machine
//!
//! `Collecting -> CenterEstimated -> OutliersFiltered -> Aggregated -> Published`
//!
//! A round only moves forward one phase at a time. Any error before
//! `Published` moves it to the terminal `Failed` phase, and nothing from a
//! failed round is ever published.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::center::GeometricCenter;
use super::outliers::OutlierSplit;
use crate::error::AggregationError;
use crate::ledger::{PrincipalId, RoundId};
use crate::model::ModelVector;

/// Phase of a [`Round`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RoundPhase {
    /// Accepting submissions
    Collecting,
    /// Geometric center computed
    CenterEstimated,
    /// Outliers separated from the batch
    OutliersFiltered,
    /// Mean of accepted updates computed
    Aggregated,
    /// New global model published; the round is closed
    Published,
    /// Aborted; the previous global model stays in force
    Failed,
}

impl RoundPhase {
    /// Human-readable phase name.
    pub fn name(self) -> &'static str {
        match self {
            RoundPhase::Collecting => "collecting",
            RoundPhase::CenterEstimated => "center_estimated",
            RoundPhase::OutliersFiltered => "outliers_filtered",
            RoundPhase::Aggregated => "aggregated",
            RoundPhase::Published => "published",
            RoundPhase::Failed => "failed",
        }
    }

    fn next(self) -> Option<RoundPhase> {
        match self {
            RoundPhase::Collecting => Some(RoundPhase::CenterEstimated),
            RoundPhase::CenterEstimated => Some(RoundPhase::OutliersFiltered),
            RoundPhase::OutliersFiltered => Some(RoundPhase::Aggregated),
            RoundPhase::Aggregated => Some(RoundPhase::Published),
            RoundPhase::Published | RoundPhase::Failed => None,
        }
    }
}

/// Minimum number of accepted updates for a round to publish.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumRule {
    /// `floor(n/2) + 1` of the round's participants
    #[default]
    Majority,
    /// A fixed count
    AtLeast(usize),
}

impl QuorumRule {
    /// Accepted updates required for a round with `participants` devices.
    pub fn required(&self, participants: usize) -> usize {
        match *self {
            QuorumRule::Majority => participants / 2 + 1,
            QuorumRule::AtLeast(k) => k.max(1),
        }
    }
}

/// One device's plaintext update as seen by the aggregator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Submitting device
    pub principal: PrincipalId,
    /// Locally trained model
    pub update: ModelVector,
    /// Relative weight in center estimation (e.g. sample count)
    pub weight: f32,
}

impl Submission {
    /// Unit-weight submission.
    pub fn new(principal: PrincipalId, update: ModelVector) -> Self {
        Self {
            principal,
            update,
            weight: 1.0,
        }
    }

    /// Override the center-estimation weight.
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }
}

/// Immutable summary of a published round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round index
    pub index: RoundId,
    /// Devices invited to the round
    pub participants: Vec<PrincipalId>,
    /// Devices whose update arrived, in submission order
    pub submitted: Vec<PrincipalId>,
    /// Devices whose update entered the aggregate
    pub accepted: Vec<PrincipalId>,
    /// Devices rejected as outliers
    pub outliers: Vec<PrincipalId>,
    /// Global model the round started from
    pub global_before: ModelVector,
    /// Global model the round published
    pub global_after: ModelVector,
    /// Weiszfeld steps used for the center
    pub center_iterations: usize,
}

/// Working state of one aggregation round. Single owner; not shared across threads.
#[derive(Debug)]
pub struct Round {
    index: RoundId,
    participants: Vec<PrincipalId>,
    global_before: ModelVector,
    phase: RoundPhase,
    submissions: Vec<Submission>,
    center: Option<GeometricCenter>,
    split: Option<OutlierSplit>,
    aggregate: Option<ModelVector>,
    failure: Option<AggregationError>,
}

impl Round {
    /// Open a round in the `Collecting` phase.
    pub fn new(index: RoundId, participants: Vec<PrincipalId>, global_before: ModelVector) -> Self {
        Self {
            index,
            participants,
            global_before,
            phase: RoundPhase::Collecting,
            submissions: Vec::new(),
            center: None,
            split: None,
            aggregate: None,
            failure: None,
        }
    }

    /// Round index.
    pub fn index(&self) -> RoundId {
        self.index
    }

    /// Current phase.
    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Devices invited to this round.
    pub fn participants(&self) -> &[PrincipalId] {
        &self.participants
    }

    /// Global model the round started from.
    pub fn global_before(&self) -> &ModelVector {
        &self.global_before
    }

    /// Submissions received so far, in arrival order.
    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    /// Center, once estimated.
    pub fn center(&self) -> Option<&GeometricCenter> {
        self.center.as_ref()
    }

    /// Outlier split, once filtered.
    pub fn split(&self) -> Option<&OutlierSplit> {
        self.split.as_ref()
    }

    /// Aggregate, once computed.
    pub fn aggregate(&self) -> Option<&ModelVector> {
        self.aggregate.as_ref()
    }

    /// Why the round failed, if it did.
    pub fn failure(&self) -> Option<&AggregationError> {
        self.failure.as_ref()
    }

    /// Add a submission while collecting.
    ///
    /// Returns `Ok(false)` and ignores the update if the sender is not a
    /// participant or already submitted; the first update from a device wins.
    pub fn submit(&mut self, submission: Submission) -> Result<bool, AggregationError> {
        if self.phase != RoundPhase::Collecting {
            return Err(AggregationError::PhaseViolation {
                from: self.phase.name(),
                to: RoundPhase::Collecting.name(),
            });
        }
        if !self.participants.contains(&submission.principal) {
            warn!(round = self.index, principal = %submission.principal, "Submission from non-participant ignored");
            return Ok(false);
        }
        if self
            .submissions
            .iter()
            .any(|s| s.principal == submission.principal)
        {
            warn!(round = self.index, principal = %submission.principal, "Duplicate submission ignored");
            return Ok(false);
        }
        self.submissions.push(submission);
        Ok(true)
    }

    /// Devices whose updates were accepted, in submission order.
    pub fn accepted_principals(&self) -> Vec<PrincipalId> {
        self.split
            .as_ref()
            .map(|s| self.principals_at(&s.accepted))
            .unwrap_or_default()
    }

    /// Devices rejected as outliers, in submission order.
    pub fn outlier_principals(&self) -> Vec<PrincipalId> {
        self.split
            .as_ref()
            .map(|s| self.principals_at(&s.rejected))
            .unwrap_or_default()
    }

    /// Participants that never submitted.
    pub fn missing_principals(&self) -> Vec<PrincipalId> {
        let submitted: HashSet<&PrincipalId> = self.submissions.iter().map(|s| &s.principal).collect();
        self.participants
            .iter()
            .filter(|p| !submitted.contains(p))
            .cloned()
            .collect()
    }

    fn principals_at(&self, indices: &[usize]) -> Vec<PrincipalId> {
        indices
            .iter()
            .map(|&i| self.submissions[i].principal.clone())
            .collect()
    }

    pub(crate) fn updates(&self) -> Vec<ModelVector> {
        self.submissions.iter().map(|s| s.update.clone()).collect()
    }

    pub(crate) fn weights(&self) -> Vec<f32> {
        self.submissions.iter().map(|s| s.weight).collect()
    }

    pub(crate) fn set_center(&mut self, center: GeometricCenter) -> Result<(), AggregationError> {
        self.advance(RoundPhase::CenterEstimated)?;
        self.center = Some(center);
        Ok(())
    }

    pub(crate) fn set_split(&mut self, split: OutlierSplit) -> Result<(), AggregationError> {
        self.advance(RoundPhase::OutliersFiltered)?;
        self.split = Some(split);
        Ok(())
    }

    pub(crate) fn set_aggregate(&mut self, aggregate: ModelVector) -> Result<(), AggregationError> {
        self.advance(RoundPhase::Aggregated)?;
        self.aggregate = Some(aggregate);
        Ok(())
    }

    /// Move exactly one phase forward.
    fn advance(&mut self, to: RoundPhase) -> Result<(), AggregationError> {
        if self.phase.next() != Some(to) {
            return Err(AggregationError::PhaseViolation {
                from: self.phase.name(),
                to: to.name(),
            });
        }
        self.phase = to;
        Ok(())
    }

    /// Abort the round. Has no effect once published.
    pub fn fail(&mut self, reason: AggregationError) {
        if self.phase == RoundPhase::Published {
            return;
        }
        self.phase = RoundPhase::Failed;
        self.failure = Some(reason);
    }

    /// Mark the aggregate as published and freeze the round's outputs.
    pub fn close(&mut self) -> Result<RoundRecord, AggregationError> {
        let global_after = self.aggregate.clone().ok_or(AggregationError::PhaseViolation {
            from: self.phase.name(),
            to: RoundPhase::Published.name(),
        })?;
        self.advance(RoundPhase::Published)?;

        Ok(RoundRecord {
            index: self.index,
            participants: self.participants.clone(),
            submitted: self.submissions.iter().map(|s| s.principal.clone()).collect(),
            accepted: self.accepted_principals(),
            outliers: self.outlier_principals(),
            global_before: self.global_before.clone(),
            global_after,
            center_iterations: self.center.as_ref().map(|c| c.iterations).unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<PrincipalId> {
        (0..n).map(|i| PrincipalId::new(format!("device-{}", i))).collect()
    }

    #[test]
    fn test_quorum_rule() {
        assert_eq!(QuorumRule::Majority.required(5), 3);
        assert_eq!(QuorumRule::Majority.required(4), 3);
        assert_eq!(QuorumRule::Majority.required(1), 1);
        assert_eq!(QuorumRule::AtLeast(2).required(10), 2);
        assert_eq!(QuorumRule::AtLeast(0).required(10), 1);
    }

    #[test]
    fn test_submit_filters_unknown_and_duplicates() {
        let mut round = Round::new(1, ids(2), ModelVector::zeros(1));
        let p0 = ids(1)[0].clone();

        assert!(round.submit(Submission::new(p0.clone(), ModelVector::zeros(1))).unwrap());
        assert!(!round.submit(Submission::new(p0, ModelVector::filled(1, 9.0))).unwrap());
        assert!(!round
            .submit(Submission::new(PrincipalId::new("stranger"), ModelVector::zeros(1)))
            .unwrap());

        assert_eq!(round.submissions().len(), 1);
        assert_eq!(round.submissions()[0].update, ModelVector::zeros(1));
        assert_eq!(round.missing_principals(), vec![PrincipalId::new("device-1")]);
    }

    #[test]
    fn test_cannot_skip_or_regress() {
        let mut round = Round::new(1, ids(1), ModelVector::zeros(1));
        assert!(matches!(
            round.set_aggregate(ModelVector::zeros(1)),
            Err(AggregationError::PhaseViolation { .. })
        ));
        assert!(round.close().is_err());
        assert_eq!(round.phase(), RoundPhase::Collecting);
    }

    #[test]
    fn test_no_submissions_after_collecting() {
        let mut round = Round::new(1, ids(1), ModelVector::zeros(1));
        round.fail(AggregationError::EmptyBatch);
        assert_eq!(round.phase(), RoundPhase::Failed);
        assert!(round
            .submit(Submission::new(ids(1)[0].clone(), ModelVector::zeros(1)))
            .is_err());
        assert_eq!(round.failure(), Some(&AggregationError::EmptyBatch));
    }
}
