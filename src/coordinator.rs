//! Serialized access to the key.
//!
//! The TPM handles one operation at a time, so every key-bearing call (listing
//! as well as signing) takes the same exclusive lock. The lock guard travels
//! into the blocking task that does the hardware work, so it is released only
//! once that work has finished, even if the requesting client has gone away.

use std::fmt;
use std::sync::Arc;

use ssh_key::public::KeyData;
use ssh_key::{Algorithm, HashAlg, Signature};
use tokio::sync::Mutex;

use crate::error::SigningError;
use crate::key::{key_blob, KeySource, PublicKeyRecord};
use crate::tpm::{TpmHandleFactory, TpmSigner};

/// Flags sent with an SSH-agent sign request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignatureFlags(u32);

impl SignatureFlags {
    pub const RSA_SHA2_256: Self = Self(0x02);
    pub const RSA_SHA2_512: Self = Self(0x04);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Signature algorithm for a request against `key`.
///
/// RSA keys pick their hash from the flags, preferring SHA-512; every other key
/// type has a single algorithm.
pub fn signature_algorithm(key: &KeyData, flags: SignatureFlags) -> Algorithm {
    match key.algorithm() {
        Algorithm::Rsa { .. } if flags.contains(SignatureFlags::RSA_SHA2_512) => Algorithm::Rsa {
            hash: Some(HashAlg::Sha512),
        },
        Algorithm::Rsa { .. } if flags.contains(SignatureFlags::RSA_SHA2_256) => Algorithm::Rsa {
            hash: Some(HashAlg::Sha256),
        },
        Algorithm::Rsa { .. } => Algorithm::Rsa { hash: None },
        other => other,
    }
}

/// Owns the signing lock and the collaborators needed to reach the key
#[derive(Clone)]
pub struct SigningCoordinator {
    lock: Arc<Mutex<()>>,
    keys: Arc<dyn KeySource>,
    tpm: TpmHandleFactory,
}

impl SigningCoordinator {
    pub fn new(keys: impl KeySource, tpm: TpmHandleFactory) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            keys: Arc::new(keys),
            tpm,
        }
    }

    /// The single stored key
    pub async fn list(&self) -> Result<Vec<PublicKeyRecord>, SigningError> {
        let keys = self.keys.clone();
        self.exclusive(move || {
            let key = keys.load()?;
            Ok(vec![key.public_key_record()?])
        })
        .await
    }

    pub async fn sign(&self, key: &KeyData, data: &[u8]) -> Result<Signature, SigningError> {
        self.sign_with_flags(key, data, SignatureFlags::empty())
            .await
    }

    /// Sign `data` if `requested` is the stored key.
    pub async fn sign_with_flags(
        &self,
        requested: &KeyData,
        data: &[u8],
        flags: SignatureFlags,
    ) -> Result<Signature, SigningError> {
        let requested_blob = key_blob(requested)?;
        let algorithm = signature_algorithm(requested, flags);
        let data = data.to_vec();
        let keys = self.keys.clone();
        let tpm = self.tpm.clone();

        self.exclusive(move || {
            let signer = TpmSigner::new(keys.load()?, tpm);
            if signer.public_key_blob()? != requested_blob {
                return Err(SigningError::NoMatchingKey);
            }
            log::debug!("Signing {} bytes with {}", data.len(), algorithm);
            Ok(signer.sign_with_algorithm(&data, &algorithm)?)
        })
        .await
    }

    async fn exclusive<T, F>(&self, op: F) -> Result<T, SigningError>
    where
        F: FnOnce() -> Result<T, SigningError> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.lock.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            op()
        })
        .await?
    }
}

impl fmt::Debug for SigningCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCoordinator").finish_non_exhaustive()
    }
}
