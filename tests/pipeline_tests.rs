//! End-to-end rounds over the in-memory ledger

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ndarray::{array, Array2};
use tessera_fl::config::{EngineConfig, RoundConfig};
use tessera_fl::crypto::{decrypt, derive_shared_key, KeyPurpose, SecretKey};
use tessera_fl::error::{AggregationError, CryptoError, SharingError, TesseraError};
use tessera_fl::ledger::RetryPolicy;
use tessera_fl::participants::{DecryptionQuorum, SealedUpdate};
use tessera_fl::verification::AuditEntry;
use tessera_fl::{
    EdgeDevice, InMemoryLedger, KeyAuthority, Ledger, ModelVector, PrincipalId, RoundCoordinator, Trainer,
};

const DIM: usize = 10;

/// Returns `data[0][0]` in every coordinate; sleeps when `data[0][1]` is set.
struct Scripted;

impl Trainer for Scripted {
    fn train(&self, global: &ModelVector, data: &Array2<f32>) -> Result<ModelVector, TesseraError> {
        let delay = data[[0, 1]];
        if delay > 0.0 {
            thread::sleep(Duration::from_millis(delay as u64));
        }
        Ok(ModelVector::filled(global.len(), data[[0, 0]]))
    }
}

fn device(i: usize, value: f32, delay_ms: f32) -> EdgeDevice {
    EdgeDevice::new(
        PrincipalId::new(format!("device-{}", i)),
        array![[value, delay_ms]],
    )
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 8,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
    }
}

fn coordinator(ledger: Arc<InMemoryLedger>, devices: Vec<EdgeDevice>, config: EngineConfig) -> RoundCoordinator {
    let mut coordinator = RoundCoordinator::new(config, ledger, Arc::new(Scripted), devices).unwrap();
    let mut authority = KeyAuthority::new(PrincipalId::new("key-authority"));
    coordinator.setup(&mut authority, ModelVector::zeros(DIM)).unwrap();
    coordinator
}

fn config() -> EngineConfig {
    EngineConfig {
        retry: fast_retry(),
        ..Default::default()
    }
}

#[test]
fn test_end_to_end_byzantine_device_rejected_and_audited() {
    let ledger = Arc::new(InMemoryLedger::new());
    let devices = (0..5)
        .map(|i| device(i, if i == 3 { 1000.0 } else { 1.0 }, 0.0))
        .collect();
    let mut coordinator = coordinator(ledger.clone(), devices, config());

    let record = coordinator.run_round().unwrap();
    assert_eq!(record.outliers, vec![PrincipalId::new("device-3")]);
    assert_eq!(record.accepted.len(), 4);

    let (round, model) = ledger.get_global_model().unwrap();
    assert_eq!(round, record.index);
    assert_eq!(model, ModelVector::filled(DIM, 1.0));

    // Every device, outlier included, left an audit copy on the ledger
    assert_eq!(ledger.get_blobs(record.index).unwrap().len(), 5);

    let audit = coordinator.audit_log().audits().next().unwrap();
    assert!(audit.passed);
    assert_eq!(audit.recomputed, model);
    assert!(!audit.included.contains(&PrincipalId::new("device-3")));
}

#[test]
fn test_rounds_chain_through_ledger_history() {
    let ledger = Arc::new(InMemoryLedger::new());
    let devices = (0..5).map(|i| device(i, 2.0, 0.0)).collect();
    let mut coordinator = coordinator(ledger.clone(), devices, config());

    let results = coordinator.run(3);
    assert!(results.iter().all(|r| r.is_ok()));

    let history = ledger.global_model_history();
    let rounds: Vec<u64> = history.iter().map(|(r, _)| *r).collect();
    assert_eq!(rounds, vec![0, 1, 2, 3]);
    assert_eq!(coordinator.audit_log().rounds().count(), 3);
    assert!(coordinator.aggregator().prior_center().is_some());
}

#[test]
fn test_finality_lag_is_absorbed_by_retry() {
    let ledger = Arc::new(InMemoryLedger::with_finality_lag(2));
    let devices = (0..5).map(|i| device(i, 1.5, 0.0)).collect();
    let mut coordinator = coordinator(ledger.clone(), devices, config());

    let record = coordinator.run_round().unwrap();
    assert_eq!(record.global_after, ModelVector::filled(DIM, 1.5));
    assert!(coordinator.audit_log().audits().all(|a| a.passed));
}

#[test]
fn test_quorum_not_met_keeps_previous_model_and_continues() {
    let ledger = Arc::new(InMemoryLedger::new());
    // Three of five devices straggle past the deadline
    let devices = (0..5)
        .map(|i| device(i, 1.0, if i < 2 { 0.0 } else { 2_000.0 }))
        .collect();
    let config = EngineConfig {
        rounds: RoundConfig {
            collection_timeout_ms: 300,
            ..Default::default()
        },
        ..config()
    };
    let mut coordinator = coordinator(ledger.clone(), devices, config);

    let err = coordinator.run_round().unwrap_err();
    assert!(matches!(
        err,
        TesseraError::Aggregation(AggregationError::QuorumNotMet { needed: 3, .. })
    ));
    assert_eq!(ledger.get_global_model().unwrap(), (0, ModelVector::zeros(DIM)));
    assert!(matches!(
        coordinator.audit_log().entries().last(),
        Some(AuditEntry::RoundFailed { round: 1, .. })
    ));
    assert_eq!(coordinator.aggregator().next_round(), 2);
}

#[test]
fn test_audit_with_two_of_three_shares_fails_insufficient() {
    let ledger = Arc::new(InMemoryLedger::new());
    let devices: Vec<EdgeDevice> = (0..5).map(|i| device(i, 1.0, 0.0)).collect();
    let mut coordinator = coordinator(ledger.clone(), devices, config());
    let record = coordinator.run_round().unwrap();

    let node = DecryptionQuorum::new(PrincipalId::new("auditor"));
    let shares: Vec<_> = coordinator.devices()[..2]
        .iter()
        .map(|d| d.reveal_share().unwrap())
        .collect();
    let err = node.reconstruct_and_audit(&shares, 3, &[]).unwrap_err();
    assert!(matches!(
        err,
        TesseraError::Sharing(SharingError::InsufficientShares { needed: 3, actual: 2 })
    ));

    // Three shares open every audit copy on the ledger
    let shares: Vec<_> = coordinator.devices()[2..]
        .iter()
        .map(|d| d.reveal_share().unwrap())
        .collect();
    let batch: Vec<SealedUpdate> = ledger
        .get_blobs(record.index)
        .unwrap()
        .into_iter()
        .map(|(sender, blob)| {
            let device = coordinator.devices().iter().find(|d| d.id() == &sender).unwrap();
            SealedUpdate {
                sender,
                sender_public: device.public_key().clone(),
                blob,
            }
        })
        .collect();
    let outcome = node.reconstruct_and_audit(&shares, 3, &batch).unwrap();
    assert_eq!(outcome.aggregate, ModelVector::filled(DIM, 1.0));
    assert!(outcome.excluded.is_empty());
}

#[test]
fn test_audit_copy_unreadable_without_quorum_secret() {
    let ledger = Arc::new(InMemoryLedger::new());
    let devices: Vec<EdgeDevice> = (0..5).map(|i| device(i, 1.0, 0.0)).collect();
    let mut coordinator = coordinator(ledger.clone(), devices, config());
    let record = coordinator.run_round().unwrap();

    // Without the reconstructed secret the ECDH peer key is wrong
    let (sender, blob) = ledger.get_blobs(record.index).unwrap().remove(0);
    let device = coordinator.devices().iter().find(|d| d.id() == &sender).unwrap();
    let outsider = SecretKey::from_slice(&[7u8; 32]).unwrap();
    let key = derive_shared_key(&outsider, device.public_key(), KeyPurpose::ModelEncryption).unwrap();
    assert_eq!(decrypt(&key, &blob).unwrap_err(), CryptoError::AuthenticationFailed);
    assert!(device.has_share());
}

#[test]
fn test_ledger_outage_fails_round_without_publishing() {
    let ledger = Arc::new(InMemoryLedger::new());
    let devices = (0..5).map(|i| device(i, 1.0, 0.0)).collect();
    let mut coordinator = coordinator(ledger.clone(), devices, config());

    ledger.set_unavailable(true);
    assert!(matches!(
        coordinator.run_round(),
        Err(TesseraError::Ledger(_))
    ));
    ledger.set_unavailable(false);

    assert_eq!(ledger.global_model_history().len(), 1);
    let record = coordinator.run_round().unwrap();
    assert_eq!(record.index, 2);

    // Every round index appears in the log under exactly one outcome
    let outcomes: Vec<_> = coordinator
        .audit_log()
        .entries()
        .iter()
        .filter(|e| matches!(e, AuditEntry::Round(_) | AuditEntry::RoundFailed { .. }))
        .map(|e| e.round())
        .collect();
    assert_eq!(outcomes, vec![1, 2]);
    assert!(matches!(
        coordinator.audit_log().entries().first(),
        Some(AuditEntry::RoundFailed { round: 1, .. })
    ));
}

#[test]
fn test_late_device_cannot_add_to_published_round() {
    let ledger = Arc::new(InMemoryLedger::new());
    let devices = (0..5)
        .map(|i| device(i, 1.0, if i == 4 { 1_000.0 } else { 0.0 }))
        .collect();
    let config = EngineConfig {
        rounds: RoundConfig {
            collection_timeout_ms: 300,
            ..Default::default()
        },
        ..config()
    };
    let mut coordinator = coordinator(ledger.clone(), devices, config);

    let record = coordinator.run_round().unwrap();
    assert_eq!(record.submitted.len(), 4);
    assert_eq!(ledger.get_global_model().unwrap(), (record.index, ModelVector::filled(DIM, 1.0)));
    let at_close = ledger.get_blobs(record.index).unwrap();
    assert_eq!(at_close.len(), 4);

    // Let the late device finish its work
    thread::sleep(Duration::from_millis(1_200));
    assert_eq!(ledger.get_blobs(record.index).unwrap(), at_close);
}
