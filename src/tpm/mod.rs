//! TPM access.
//!
//! The agent never talks to a TPM directly. It is handed a [`TpmHandleFactory`]
//! which opens a [`TpmTransport`] for a single operation; the transport is
//! closed again as soon as that operation finishes. [`TpmSigner`] binds a
//! [`KeyDescriptor`] to the factory and is the only thing that produces
//! signatures.

pub mod software;

use std::fmt;
use std::sync::Arc;

use ssh_key::{Algorithm, Signature};

use crate::error::TpmError;
use crate::key::{key_blob, KeyDescriptor};

pub use software::SoftwareTpm;

/// An open connection to a TPM.
pub trait TpmTransport: Send {
    /// Load the sealed key and sign `data` with `algorithm`
    fn sign(
        &mut self,
        key: &KeyDescriptor,
        algorithm: &Algorithm,
        data: &[u8],
    ) -> Result<Signature, TpmError>;

    /// Release the transport
    fn close(self: Box<Self>) -> Result<(), TpmError>;
}

/// Opens a fresh transport on every call. Shared by all signers, never closed
/// by the agent.
pub type TpmHandleFactory =
    Arc<dyn Fn() -> Result<Box<dyn TpmTransport>, TpmError> + Send + Sync>;

/// A signer bound to one key for the duration of a single request
pub struct TpmSigner {
    key: KeyDescriptor,
    tpm: TpmHandleFactory,
}

impl TpmSigner {
    pub fn new(key: KeyDescriptor, tpm: TpmHandleFactory) -> Self {
        Self { key, tpm }
    }

    pub fn key(&self) -> &KeyDescriptor {
        &self.key
    }

    /// SSH wire encoding of the bound public key
    pub fn public_key_blob(&self) -> Result<Vec<u8>, ssh_encoding::Error> {
        key_blob(self.key.public_key())
    }

    /// Sign `data` using `algorithm`, which must belong to the bound key's family.
    pub fn sign_with_algorithm(
        &self,
        data: &[u8],
        algorithm: &Algorithm,
    ) -> Result<Signature, TpmError> {
        let key_algorithm = self.key.public_key().algorithm();
        if !same_family(&key_algorithm, algorithm) {
            return Err(TpmError::UnsupportedAlgorithm {
                requested: algorithm.clone(),
                key: key_algorithm,
            });
        }

        let mut transport = (self.tpm)()?;
        let result = transport.sign(&self.key, algorithm, data);
        if let Err(e) = transport.close() {
            // A finished signature is still valid
            log::warn!("{}", e);
        }
        result
    }
}

impl fmt::Debug for TpmSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TpmSigner").field("key", &self.key).finish()
    }
}

/// RSA keys may sign with any of the RSA hash variants; everything else must
/// match exactly.
fn same_family(key: &Algorithm, requested: &Algorithm) -> bool {
    match (key, requested) {
        (Algorithm::Rsa { .. }, Algorithm::Rsa { .. }) => true,
        _ => key == requested,
    }
}
