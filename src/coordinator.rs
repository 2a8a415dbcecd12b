//! Sequential round driver.
//!
//! One [`RoundCoordinator::run_round`] call:
//!
//! 1. reads the current global model from the ledger,
//! 2. has every device train and seal an audit copy to the quorum key and a
//!    transport copy to the aggregation server, each device on its own
//!    worker thread,
//! 3. collects both copies until the collection deadline and uploads the
//!    audit copies of the arrivals to the ledger,
//! 4. runs the [`RobustAggregator`] state machine and publishes the result,
//! 5. every `audit_interval` rounds, gathers key shares and lets the
//!    [`DecryptionQuorum`] recompute the aggregate.
//!
//! A failed round is logged and recorded; the previous global model stays
//! in force and the next call starts a fresh round.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::aggregators::{RobustAggregator, RoundRecord, Submission};
use crate::config::EngineConfig;
use crate::crypto::{open, EncryptedBlob, KeyPair, KeyPurpose};
use crate::error::{ConfigError, LedgerError, TesseraError};
use crate::ledger::{with_retry, Ledger, PrincipalId, RetryPolicy};
use crate::model::ModelVector;
use crate::participants::{
    lookup_key, register_key, DecryptionQuorum, EdgeDevice, Epoch, KeyAuthority, SealedUpdate, Trainer,
};
use crate::verification::{AuditEntry, AuditLog, AuditReport};

/// Drives rounds over a fixed device population.
pub struct RoundCoordinator {
    config: EngineConfig,
    ledger: Arc<dyn Ledger>,
    trainer: Arc<dyn Trainer>,
    devices: Vec<Arc<EdgeDevice>>,
    server_id: PrincipalId,
    server_keys: KeyPair,
    quorum: DecryptionQuorum,
    aggregator: RobustAggregator,
    epoch: Option<Epoch>,
    log: AuditLog,
}

impl RoundCoordinator {
    /// Validate `config` and take ownership of the device population.
    pub fn new(
        config: EngineConfig,
        ledger: Arc<dyn Ledger>,
        trainer: Arc<dyn Trainer>,
        devices: Vec<EdgeDevice>,
    ) -> Result<Self, TesseraError> {
        config.validate()?;
        if devices.len() < config.sharing.holders {
            return Err(ConfigError::Invalid(format!(
                "{} share holders configured but only {} devices",
                config.sharing.holders,
                devices.len()
            ))
            .into());
        }

        let aggregator = RobustAggregator::new(config.aggregation.clone());
        Ok(Self {
            config,
            ledger,
            trainer,
            devices: devices.into_iter().map(Arc::new).collect(),
            server_id: PrincipalId::new("aggregation-server"),
            server_keys: KeyPair::generate(),
            quorum: DecryptionQuorum::new(PrincipalId::new("decryption-node")),
            aggregator,
            epoch: None,
            log: AuditLog::new(),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Participating devices.
    pub fn devices(&self) -> &[Arc<EdgeDevice>] {
        &self.devices
    }

    /// Aggregator state (next round index, warm-start center).
    pub fn aggregator(&self) -> &RobustAggregator {
        &self.aggregator
    }

    /// Current key epoch, once [`setup`](Self::setup) has run.
    pub fn epoch(&self) -> Option<&Epoch> {
        self.epoch.as_ref()
    }

    /// History of rounds and audits.
    pub fn audit_log(&self) -> &AuditLog {
        &self.log
    }

    /// Register every principal, seed the ledger with `initial_model` if it
    /// holds no global model yet, and run one key epoch.
    ///
    /// The first `sharing.holders` devices become share holders. A holder
    /// that fails to fetch its share is logged and skipped; it simply cannot
    /// contribute to later audits.
    pub fn setup(&mut self, authority: &mut KeyAuthority, initial_model: ModelVector) -> Result<Epoch, TesseraError> {
        let ledger = Arc::clone(&self.ledger);
        let ledger = ledger.as_ref();
        let retry = self.config.retry.clone();

        register_key(ledger, &self.server_id, &self.server_keys.public_key_bytes(), &retry)?;
        self.quorum.register(ledger, &retry)?;
        authority.register(ledger, &retry)?;
        for device in &self.devices {
            device.register(ledger, &retry)?;
        }

        let latest = match with_retry(&retry, "get_global_model", || ledger.get_global_model()) {
            Ok((round, _)) => round,
            Err(LedgerError::NotFound(_)) => {
                with_retry(&retry, "publish_global_model", || {
                    ledger.publish_global_model(0, &initial_model)
                })?;
                0
            }
            Err(e) => return Err(e.into()),
        };
        self.aggregator = RobustAggregator::starting_at(self.config.aggregation.clone(), latest + 1);

        let holders: Vec<PrincipalId> = self
            .devices
            .iter()
            .take(self.config.sharing.holders)
            .map(|d| d.id().clone())
            .collect();
        let epoch = authority.generate_epoch(&holders, self.config.sharing.threshold, ledger, &retry)?;

        for device in self.devices.iter().take(holders.len()) {
            if let Err(e) = device.receive_share(ledger, authority.id(), &retry) {
                warn!(principal = %device.id(), error = %e, "Holder could not receive its key share");
            }
        }

        self.epoch = Some(epoch.clone());
        Ok(epoch)
    }

    /// Run `rounds` rounds back to back. A failed round does not stop the
    /// run; its error is returned in place.
    pub fn run(&mut self, rounds: usize) -> Vec<Result<RoundRecord, TesseraError>> {
        (0..rounds).map(|_| self.run_round()).collect()
    }

    /// Run one round. On failure the round is logged with its index and
    /// reason, recorded in the audit log, and nothing is published. The
    /// index is used up either way.
    pub fn run_round(&mut self) -> Result<RoundRecord, TesseraError> {
        let index = self.aggregator.next_round();
        let result = self.try_round();
        if let Err(e) = &result {
            if self.aggregator.next_round() == index {
                // Failed before the round opened
                self.aggregator.skip_round();
            }
            warn!(round = index, reason = %e, "Round failed; previous global model retained");
            self.log.push(AuditEntry::RoundFailed {
                round: index,
                reason: e.to_string(),
            });
        }
        result
    }

    fn try_round(&mut self) -> Result<RoundRecord, TesseraError> {
        let ledger = Arc::clone(&self.ledger);
        let retry = self.config.retry.clone();

        let (_, global) = with_retry(&retry, "get_global_model", || ledger.get_global_model())?;
        let quorum_key = lookup_key(ledger.as_ref(), &PrincipalId::quorum(), &retry)?;
        let server_key = lookup_key(ledger.as_ref(), &self.server_id, &retry)?;

        let participants = self.devices.iter().map(|d| d.id().clone()).collect();
        let mut round = self.aggregator.begin_round(participants, global.clone());
        let index = round.index();
        debug!(round = index, "Round started");

        let trainer = Arc::clone(&self.trainer);
        let arrivals = collect_within(
            "training",
            &self.devices,
            self.config.rounds.collection_timeout(),
            move |device| {
                let update = device.train(trainer.as_ref(), &global)?;
                let audit_copy = device.encrypt_update(&update, &quorum_key)?;
                let transport = device.encrypt_update(&update, &server_key)?;
                Ok((audit_copy, transport, device.sample_count()))
            },
        );

        // Only arrivals inside the deadline reach the ledger
        for (principal, (audit_copy, transport, samples)) in arrivals {
            let update = match self.open_transport(&principal, &transport, &retry) {
                Ok(update) => update,
                Err(e) => {
                    warn!(round = index, principal = %principal, error = %e, "Dropping unreadable update");
                    continue;
                }
            };
            if let Err(e) = with_retry(&retry, "upload_blob", || {
                ledger.upload_blob(index, &principal, &audit_copy)
            }) {
                warn!(round = index, principal = %principal, error = %e, "Dropping update without audit copy");
                continue;
            }
            debug!(round = index, principal = %principal, norm = update.norm(), "Update received");
            let submission = Submission::new(principal, update).with_weight(samples.max(1) as f32);
            round.submit(submission)?;
        }

        let aggregate = self.aggregator.process(&mut round)?;
        with_retry(&retry, "publish_global_model", || {
            ledger.publish_global_model(index, &aggregate)
        })?;
        let record = self.aggregator.complete(&mut round)?;
        info!(
            round = index,
            accepted = record.accepted.len(),
            rejected = record.outliers.len(),
            missing = record.participants.len() - record.submitted.len(),
            "Global model published"
        );
        self.log.push(AuditEntry::Round(record.clone()));

        if self.config.rounds.audit_due(index) {
            match self.audit(&record) {
                Ok(report) => self.log.push(AuditEntry::Audit(report)),
                Err(e) => {
                    warn!(round = index, reason = %e, "Audit could not run");
                    self.log.push(AuditEntry::AuditFailed {
                        round: index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(record)
    }

    fn open_transport(
        &self,
        principal: &PrincipalId,
        blob: &EncryptedBlob,
        retry: &RetryPolicy,
    ) -> Result<ModelVector, TesseraError> {
        let device_key = lookup_key(self.ledger.as_ref(), principal, retry)?;
        let bytes = open(
            self.server_keys.secret_key(),
            &device_key,
            KeyPurpose::ModelEncryption,
            blob,
        )?;
        Ok(ModelVector::from_bytes(&bytes)?)
    }

    /// Have the quorum recompute a published round from the ledger's audit
    /// copies of its accepted updates.
    pub fn audit(&self, record: &RoundRecord) -> Result<AuditReport, TesseraError> {
        let epoch = self
            .epoch
            .as_ref()
            .ok_or_else(|| ConfigError::Invalid("no key epoch; run setup first".to_string()))?;
        let ledger = self.ledger.as_ref();
        let retry = &self.config.retry;

        let posted = with_retry(retry, "get_blobs", || ledger.get_blobs(record.index))?;
        let mut batch = Vec::with_capacity(record.accepted.len());
        for principal in &record.accepted {
            match posted.iter().find(|(p, _)| p == principal) {
                Some((_, blob)) => batch.push(SealedUpdate {
                    sender: principal.clone(),
                    sender_public: lookup_key(ledger, principal, retry)?,
                    blob: blob.clone(),
                }),
                None => warn!(round = record.index, principal = %principal, "Accepted update missing from ledger"),
            }
        }

        let holders: Vec<Arc<EdgeDevice>> = self
            .devices
            .iter()
            .filter(|d| epoch.holders.contains(d.id()))
            .cloned()
            .collect();
        let node_key = self.quorum.public_key().clone();
        let revealed = collect_within(
            "share reveal",
            &holders,
            self.config.rounds.collection_timeout(),
            move |device| device.reveal_share_sealed(&node_key),
        );

        let mut shares = Vec::with_capacity(revealed.len());
        for (holder, blob) in revealed {
            let holder_key = lookup_key(ledger, &holder, retry)?;
            match self.quorum.open_share(&holder_key, &blob) {
                Ok(share) => shares.push(share),
                Err(e) => warn!(principal = %holder, error = %e, "Discarding unreadable key share"),
            }
        }

        self.quorum.audit_round(
            record.index,
            &shares,
            epoch.threshold,
            &batch,
            &record.global_after,
            self.config.rounds.audit_tolerance,
        )
    }
}

/// Run `job` for every device on its own worker thread and gather results
/// until `timeout`. Failed jobs are logged and skipped; results arriving
/// after the deadline are dropped and their threads left to finish alone,
/// so `job` must not write anything a closed round depends on.
fn collect_within<T, F>(
    what: &str,
    devices: &[Arc<EdgeDevice>],
    timeout: Duration,
    job: F,
) -> Vec<(PrincipalId, T)>
where
    T: Send + 'static,
    F: Fn(&EdgeDevice) -> Result<T, TesseraError> + Send + Sync + 'static,
{
    let job = Arc::new(job);
    let (tx, rx) = mpsc::channel();
    let mut pending = 0usize;
    for device in devices {
        let worker = Arc::clone(device);
        let job = Arc::clone(&job);
        let tx = tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("tessera-{}", device.id()))
            .spawn(move || {
                let result = (*job)(&worker);
                // Receiver is gone once the deadline has passed
                let _ = tx.send((worker.id().clone(), result));
            });
        match spawned {
            Ok(_) => pending += 1,
            Err(e) => warn!(what, principal = %device.id(), error = %e, "Could not start device task"),
        }
    }
    drop(tx);

    let deadline = Instant::now() + timeout;
    let mut arrived = Vec::with_capacity(pending);
    while pending > 0 {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((principal, Ok(value))) => {
                pending -= 1;
                arrived.push((principal, value));
            }
            Ok((principal, Err(e))) => {
                pending -= 1;
                warn!(what, principal = %principal, error = %e, "Device task failed");
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(what, missing = pending, ?timeout, "Deadline passed; continuing without stragglers");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    arrived
}
