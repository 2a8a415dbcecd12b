//! Edge device: local training, update sealing and key-share custody.

use ndarray::{s, Array1, Array2};
use parking_lot::Mutex;
use tracing::debug;
use zeroize::Zeroizing;

use super::{lookup_key, register_key};
use crate::crypto::{open, seal, EncryptedBlob, KeyPair, KeyPurpose, PublicKey};
use crate::error::{CryptoError, TesseraError};
use crate::ledger::{with_retry, Ledger, PrincipalId, RetryPolicy};
use crate::model::ModelVector;
use crate::sharing::Share;

/// Local training step. Implementations must not share mutable state
/// between devices; the coordinator calls them from several threads at once.
pub trait Trainer: Send + Sync {
    /// Produce an updated model from the current global model and local data.
    fn train(&self, global: &ModelVector, data: &Array2<f32>) -> Result<ModelVector, TesseraError>;
}

/// Full-batch gradient descent on mean squared error for a linear model.
///
/// Each data row is `[x_1, ..., x_d, y]`; the model vector holds the `d`
/// weights.
#[derive(Clone, Debug, PartialEq)]
pub struct LeastSquaresTrainer {
    /// Gradient steps per call
    pub epochs: usize,
    /// Step size
    pub learning_rate: f32,
}

impl Default for LeastSquaresTrainer {
    fn default() -> Self {
        Self {
            epochs: 10,
            learning_rate: 0.1,
        }
    }
}

impl Trainer for LeastSquaresTrainer {
    fn train(&self, global: &ModelVector, data: &Array2<f32>) -> Result<ModelVector, TesseraError> {
        let dim = global.len();
        if data.ncols() != dim + 1 {
            return Err(TesseraError::ShapeError(format!(
                "expected {} data columns for a {}-weight model, got {}",
                dim + 1,
                dim,
                data.ncols()
            )));
        }
        if data.nrows() == 0 {
            return Ok(global.clone());
        }

        let x = data.slice(s![.., ..dim]);
        let y = data.column(dim);
        let scale = 2.0 / data.nrows() as f32;

        let mut w: Array1<f32> = global.as_array().clone();
        for _ in 0..self.epochs {
            let residual = x.dot(&w) - &y;
            let grad = x.t().dot(&residual) * scale;
            w.scaled_add(-self.learning_rate, &grad);
        }
        Ok(ModelVector::from(w))
    }
}

/// A participating edge device.
///
/// Owns its key pair and data outright. The received key share sits behind
/// a lock so a device can be shared across the worker pool.
pub struct EdgeDevice {
    id: PrincipalId,
    keys: KeyPair,
    data: Array2<f32>,
    share: Mutex<Option<Share>>,
}

impl EdgeDevice {
    /// Device with a fresh key pair and the given local dataset.
    pub fn new(id: PrincipalId, data: Array2<f32>) -> Self {
        Self {
            id,
            keys: KeyPair::generate(),
            data,
            share: Mutex::new(None),
        }
    }

    /// Ledger identity.
    pub fn id(&self) -> &PrincipalId {
        &self.id
    }

    /// This device's public key.
    pub fn public_key(&self) -> &PublicKey {
        self.keys.public_key()
    }

    /// Local samples, used as the update's weight in center estimation.
    pub fn sample_count(&self) -> usize {
        self.data.nrows()
    }

    /// Publish this device's public key.
    pub fn register(&self, ledger: &dyn Ledger, retry: &RetryPolicy) -> Result<(), TesseraError> {
        register_key(ledger, &self.id, &self.keys.public_key_bytes(), retry)
    }

    /// Run `trainer` on the local data.
    pub fn train(&self, trainer: &dyn Trainer, global: &ModelVector) -> Result<ModelVector, TesseraError> {
        trainer.train(global, &self.data)
    }

    /// Seal `update` for `recipient` under `"model_encryption"`.
    ///
    /// The recipient opens it with its own secret key and this device's
    /// public key. Each call uses a fresh IV.
    pub fn encrypt_update(
        &self,
        update: &ModelVector,
        recipient: &PublicKey,
    ) -> Result<EncryptedBlob, CryptoError> {
        seal(
            self.keys.secret_key(),
            recipient,
            KeyPurpose::ModelEncryption,
            &update.to_bytes(),
        )
    }

    /// Fetch, open and keep the share `authority` sealed for this device.
    pub fn receive_share(
        &self,
        ledger: &dyn Ledger,
        authority: &PrincipalId,
        retry: &RetryPolicy,
    ) -> Result<(), TesseraError> {
        let authority_key = lookup_key(ledger, authority, retry)?;
        let blob = with_retry(retry, "get_key_share", || ledger.get_key_share(authority, &self.id))?;
        let bytes = Zeroizing::new(open(
            self.keys.secret_key(),
            &authority_key,
            KeyPurpose::KeyShareEncryption,
            &blob,
        )?);
        let share = Share::from_bytes(&bytes)?;
        debug!(principal = %self.id, index = share.index(), "Key share received");
        *self.share.lock() = Some(share);
        Ok(())
    }

    /// Whether a share has been received.
    pub fn has_share(&self) -> bool {
        self.share.lock().is_some()
    }

    /// Hand the held share to a quorum coordinator, uninspected.
    pub fn reveal_share(&self) -> Result<Share, TesseraError> {
        self.share
            .lock()
            .clone()
            .ok_or_else(|| TesseraError::ShareNotReceived(self.id.clone()))
    }

    /// [`reveal_share`](Self::reveal_share), sealed for a decryption node
    /// under `"key_share_encryption"`.
    pub fn reveal_share_sealed(&self, node: &PublicKey) -> Result<EncryptedBlob, TesseraError> {
        let share = self.reveal_share()?;
        Ok(seal(
            self.keys.secret_key(),
            node,
            KeyPurpose::KeyShareEncryption,
            &share.to_bytes(),
        )?)
    }
}
