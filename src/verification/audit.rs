//! Round and audit history for post-hoc analysis.
//!
//! Records every published round and every quorum audit so a run can be
//! replayed and checked after the fact.

use serde::{Deserialize, Serialize};

use crate::aggregators::RoundRecord;
use crate::ledger::{PrincipalId, RoundId};
use crate::model::ModelVector;
use crate::participants::AuditOutcome;

/// Result of comparing a published aggregate with the quorum's recomputation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Round audited
    pub round: RoundId,
    /// Aggregate the aggregator published
    pub published: ModelVector,
    /// Aggregate the quorum recomputed
    pub recomputed: ModelVector,
    /// Largest elementwise difference; `None` if the lengths differ
    pub max_abs_diff: Option<f32>,
    /// Tolerance the difference was checked against
    pub tolerance: f32,
    /// Whether the two aggregates agree within `tolerance`
    pub passed: bool,
    /// Devices whose update the quorum could open
    pub included: Vec<PrincipalId>,
    /// Devices whose blob failed to open
    pub excluded: Vec<PrincipalId>,
}

impl AuditReport {
    /// Compare `published` with the quorum's `outcome`.
    pub fn compare(round: RoundId, published: &ModelVector, outcome: AuditOutcome, tolerance: f32) -> Self {
        let max_abs_diff = published.max_abs_diff(&outcome.aggregate);
        let passed = matches!(max_abs_diff, Some(d) if d <= tolerance);
        Self {
            round,
            published: published.clone(),
            recomputed: outcome.aggregate,
            max_abs_diff,
            tolerance,
            passed,
            included: outcome.included,
            excluded: outcome.excluded,
        }
    }
}

/// One line of the audit log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntry {
    /// A round published a new global model
    Round(RoundRecord),
    /// A round aborted; the previous global model stayed in force
    RoundFailed {
        /// Round index
        round: RoundId,
        /// Human-readable reason
        reason: String,
    },
    /// The quorum audited a round
    Audit(AuditReport),
    /// The quorum could not audit a round (e.g. too few shares)
    AuditFailed {
        /// Round index
        round: RoundId,
        /// Human-readable reason
        reason: String,
    },
}

impl AuditEntry {
    /// Round this entry concerns.
    pub fn round(&self) -> RoundId {
        match self {
            AuditEntry::Round(r) => r.index,
            AuditEntry::Audit(a) => a.round,
            AuditEntry::RoundFailed { round, .. } | AuditEntry::AuditFailed { round, .. } => *round,
        }
    }
}

/// Append-only log of rounds and audits.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    /// Create a new, empty audit log.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append an entry to the log.
    pub fn push(&mut self, entry: AuditEntry) {
        self.entries.push(entry);
    }

    /// Get all entries.
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Published rounds, oldest first.
    pub fn rounds(&self) -> impl Iterator<Item = &RoundRecord> {
        self.entries.iter().filter_map(|e| match e {
            AuditEntry::Round(r) => Some(r),
            _ => None,
        })
    }

    /// Completed audits, oldest first.
    pub fn audits(&self) -> impl Iterator<Item = &AuditReport> {
        self.entries.iter().filter_map(|e| match e {
            AuditEntry::Audit(a) => Some(a),
            _ => None,
        })
    }

    /// Audits whose recomputed aggregate disagreed with the published one.
    pub fn mismatches(&self) -> impl Iterator<Item = &AuditReport> {
        self.audits().filter(|a| !a.passed)
    }

    /// Serialize the audit log to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(values: Vec<f32>) -> AuditOutcome {
        AuditOutcome {
            aggregate: ModelVector::new(values),
            included: vec![PrincipalId::new("d0")],
            excluded: vec![],
        }
    }

    fn record(index: RoundId) -> RoundRecord {
        RoundRecord {
            index,
            participants: vec![PrincipalId::new("d0")],
            submitted: vec![PrincipalId::new("d0")],
            accepted: vec![PrincipalId::new("d0")],
            outliers: vec![],
            global_before: ModelVector::zeros(2),
            global_after: ModelVector::filled(2, 1.0),
            center_iterations: 1,
        }
    }

    #[test]
    fn test_report_within_tolerance() {
        let report = AuditReport::compare(1, &ModelVector::new(vec![1.0, 2.0]), outcome(vec![1.0, 2.00001]), 1e-3);
        assert!(report.passed);
    }

    #[test]
    fn test_report_mismatch_and_length_mismatch() {
        let report = AuditReport::compare(1, &ModelVector::new(vec![1.0]), outcome(vec![2.0]), 1e-3);
        assert!(!report.passed);
        assert_eq!(report.max_abs_diff, Some(1.0));

        let report = AuditReport::compare(1, &ModelVector::new(vec![1.0]), outcome(vec![1.0, 1.0]), 1e-3);
        assert!(!report.passed);
        assert_eq!(report.max_abs_diff, None);
    }

    #[test]
    fn test_log_filters() {
        let mut log = AuditLog::new();
        assert!(log.is_empty());

        log.push(AuditEntry::Round(record(1)));
        log.push(AuditEntry::RoundFailed {
            round: 2,
            reason: "Quorum not met: need 3, got 2".to_string(),
        });
        log.push(AuditEntry::Audit(AuditReport::compare(
            1,
            &ModelVector::filled(2, 1.0),
            outcome(vec![5.0, 5.0]),
            1e-4,
        )));

        assert_eq!(log.len(), 3);
        assert_eq!(log.rounds().count(), 1);
        assert_eq!(log.audits().count(), 1);
        assert_eq!(log.mismatches().count(), 1);
        assert_eq!(log.entries()[1].round(), 2);
    }

    #[test]
    fn test_log_serde() {
        let mut log = AuditLog::new();
        log.push(AuditEntry::Round(record(3)));
        log.push(AuditEntry::AuditFailed {
            round: 3,
            reason: "Insufficient shares: need 3, got 2".to_string(),
        });
        let json = log.to_json().unwrap();
        let restored: AuditLog = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.entries(), log.entries());
    }
}
