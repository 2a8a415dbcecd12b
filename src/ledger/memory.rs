//! In-process ledger for tests, demos and single-node deployments.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use super::{Ledger, PrincipalId, RoundId};
use crate::crypto::EncryptedBlob;
use crate::error::LedgerError;
use crate::model::ModelVector;

/// A written value plus how many more reads it answers `NotYetFinalized`.
#[derive(Clone, Debug)]
struct Entry<T> {
    value: T,
    pending_reads: u32,
}

impl<T: Clone> Entry<T> {
    fn new(value: T, lag: u32) -> Self {
        Self {
            value,
            pending_reads: lag,
        }
    }

    fn read(&mut self) -> Result<T, LedgerError> {
        if self.pending_reads > 0 {
            self.pending_reads -= 1;
            return Err(LedgerError::NotYetFinalized);
        }
        Ok(self.value.clone())
    }
}

#[derive(Default)]
struct State {
    public_keys: HashMap<PrincipalId, Entry<Vec<u8>>>,
    blobs: BTreeMap<RoundId, Vec<Entry<(PrincipalId, EncryptedBlob)>>>,
    global_models: Vec<Entry<(RoundId, ModelVector)>>,
    key_shares: HashMap<(PrincipalId, PrincipalId), Entry<EncryptedBlob>>,
    unavailable: bool,
}

/// Thread-safe in-memory [`Ledger`].
///
/// `finality_lag` makes every new record answer
/// [`LedgerError::NotYetFinalized`] to its first `finality_lag` reads, which
/// exercises the callers' retry path. Global models are kept as an
/// append-only history.
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<State>,
    finality_lag: u32,
}

impl InMemoryLedger {
    /// Ledger whose writes are readable immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger whose writes become readable after `lag` reads.
    pub fn with_finality_lag(lag: u32) -> Self {
        Self {
            state: Mutex::new(State::default()),
            finality_lag: lag,
        }
    }

    /// Simulate an outage: every call returns [`LedgerError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Every published global model, oldest first, ignoring finality.
    pub fn global_model_history(&self) -> Vec<(RoundId, ModelVector)> {
        self.state
            .lock()
            .global_models
            .iter()
            .map(|e| e.value.clone())
            .collect()
    }

    fn guard(state: &State) -> Result<(), LedgerError> {
        if state.unavailable {
            return Err(LedgerError::Unavailable("in-memory ledger offline".to_string()));
        }
        Ok(())
    }
}

impl Ledger for InMemoryLedger {
    fn register_public_key(&self, principal: &PrincipalId, public_key: &[u8]) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        Self::guard(&state)?;
        state
            .public_keys
            .insert(principal.clone(), Entry::new(public_key.to_vec(), self.finality_lag));
        Ok(())
    }

    fn get_public_key(&self, principal: &PrincipalId) -> Result<Vec<u8>, LedgerError> {
        let mut state = self.state.lock();
        Self::guard(&state)?;
        state
            .public_keys
            .get_mut(principal)
            .ok_or_else(|| LedgerError::NotFound(format!("public key for {}", principal)))?
            .read()
    }

    fn upload_blob(
        &self,
        round: RoundId,
        principal: &PrincipalId,
        blob: &EncryptedBlob,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        Self::guard(&state)?;
        state
            .blobs
            .entry(round)
            .or_default()
            .push(Entry::new((principal.clone(), blob.clone()), self.finality_lag));
        Ok(())
    }

    fn get_blobs(&self, round: RoundId) -> Result<Vec<(PrincipalId, EncryptedBlob)>, LedgerError> {
        let mut state = self.state.lock();
        Self::guard(&state)?;
        let Some(entries) = state.blobs.get_mut(&round) else {
            return Ok(Vec::new());
        };

        // The batch is readable only once every entry in it is final
        let mut pending = false;
        for e in entries.iter_mut() {
            if e.pending_reads > 0 {
                e.pending_reads -= 1;
                pending = true;
            }
        }
        if pending {
            return Err(LedgerError::NotYetFinalized);
        }
        Ok(entries.iter().map(|e| e.value.clone()).collect())
    }

    fn publish_global_model(&self, round: RoundId, model: &ModelVector) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        Self::guard(&state)?;
        state
            .global_models
            .push(Entry::new((round, model.clone()), self.finality_lag));
        Ok(())
    }

    fn get_global_model(&self) -> Result<(RoundId, ModelVector), LedgerError> {
        let mut state = self.state.lock();
        Self::guard(&state)?;
        state
            .global_models
            .last_mut()
            .ok_or_else(|| LedgerError::NotFound("global model".to_string()))?
            .read()
    }

    fn upload_key_share(
        &self,
        owner: &PrincipalId,
        holder: &PrincipalId,
        blob: &EncryptedBlob,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        Self::guard(&state)?;
        state.key_shares.insert(
            (owner.clone(), holder.clone()),
            Entry::new(blob.clone(), self.finality_lag),
        );
        Ok(())
    }

    fn get_key_share(&self, owner: &PrincipalId, holder: &PrincipalId) -> Result<EncryptedBlob, LedgerError> {
        let mut state = self.state.lock();
        Self::guard(&state)?;
        state
            .key_shares
            .get_mut(&(owner.clone(), holder.clone()))
            .ok_or_else(|| LedgerError::NotFound(format!("key share {} -> {}", owner, holder)))?
            .read()
    }
}
