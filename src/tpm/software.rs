//! In-process stand-in for a TPM.
//!
//! The sealed blob is an unencrypted OpenSSH private key in binary form. This
//! offers none of the protection of real hardware and exists so the agent can
//! run (and be tested) on machines without a TPM.

use std::sync::Arc;

use signature::Signer as _;
use ssh_key::{Algorithm, PrivateKey, Signature};

use crate::error::TpmError;
use crate::key::KeyDescriptor;
use crate::tpm::{TpmHandleFactory, TpmTransport};

/// Software TPM
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareTpm;

impl SoftwareTpm {
    pub fn new() -> Self {
        Self
    }

    /// Factory handing out software transports
    pub fn factory(&self) -> TpmHandleFactory {
        Arc::new(|| Ok(Box::new(SoftwareTransport) as Box<dyn TpmTransport>))
    }

    /// Wrap a private key so this TPM can sign with it.
    pub fn seal(&self, private_key: &PrivateKey) -> Result<KeyDescriptor, TpmError> {
        if private_key.is_encrypted() {
            return Err(TpmError::Unseal(
                "passphrase-protected keys are not supported".to_string(),
            ));
        }

        let sealed = private_key
            .to_bytes()
            .map_err(|e| TpmError::Unseal(e.to_string()))?;

        Ok(KeyDescriptor::new(
            private_key.public_key().key_data().clone(),
            private_key.comment(),
            sealed.to_vec(),
        ))
    }
}

struct SoftwareTransport;

impl TpmTransport for SoftwareTransport {
    fn sign(
        &mut self,
        key: &KeyDescriptor,
        algorithm: &Algorithm,
        data: &[u8],
    ) -> Result<Signature, TpmError> {
        let private =
            PrivateKey::from_bytes(key.sealed()).map_err(|e| TpmError::Unseal(e.to_string()))?;
        if private.is_encrypted() {
            return Err(TpmError::Unseal(
                "sealed key is passphrase-protected".to_string(),
            ));
        }
        if private.public_key().key_data() != key.public_key() {
            return Err(TpmError::KeyMismatch);
        }

        let signature = private
            .try_sign(data)
            .map_err(|e| TpmError::Sign(e.to_string()))?;

        // Software keys only produce their default hash variant
        if signature.algorithm() != *algorithm {
            return Err(TpmError::UnsupportedAlgorithm {
                requested: algorithm.clone(),
                key: private.algorithm(),
            });
        }

        Ok(signature)
    }

    fn close(self: Box<Self>) -> Result<(), TpmError> {
        Ok(())
    }
}
