//! The operations the agent offers to clients.

use ssh_agent_lib::async_trait;
use ssh_agent_lib::proto::{AddIdentity, Extension};
use ssh_key::public::KeyData;
use ssh_key::Signature;

use crate::coordinator::{SignatureFlags, SigningCoordinator};
use crate::error::SigningError;
use crate::key::PublicKeyRecord;

/// Everything a connection can ask of the agent.
///
/// The protocol dispatcher only ever sees this trait, so tests and alternative
/// backends can stand in for the TPM-backed implementation.
#[async_trait]
pub trait AgentCapabilities: Send + Sync + 'static {
    async fn list(&self) -> Result<Vec<PublicKeyRecord>, SigningError>;

    async fn sign(&self, key: &KeyData, data: &[u8]) -> Result<Signature, SigningError> {
        self.sign_with_flags(key, data, SignatureFlags::empty())
            .await
    }

    async fn sign_with_flags(
        &self,
        key: &KeyData,
        data: &[u8],
        flags: SignatureFlags,
    ) -> Result<Signature, SigningError>;

    async fn add(&self, identity: AddIdentity) -> Result<(), SigningError>;

    async fn remove(&self, key: &KeyData) -> Result<(), SigningError>;

    async fn remove_all(&self) -> Result<(), SigningError>;

    async fn lock(&self, passphrase: &str) -> Result<(), SigningError>;

    async fn unlock(&self, passphrase: &str) -> Result<(), SigningError>;

    async fn extension(&self, extension: Extension) -> Result<Option<Extension>, SigningError>;

    async fn close(&self) -> Result<(), SigningError>;
}

/// Read-only agent over the single stored key
#[async_trait]
impl AgentCapabilities for SigningCoordinator {
    async fn list(&self) -> Result<Vec<PublicKeyRecord>, SigningError> {
        SigningCoordinator::list(self).await
    }

    async fn sign_with_flags(
        &self,
        key: &KeyData,
        data: &[u8],
        flags: SignatureFlags,
    ) -> Result<Signature, SigningError> {
        SigningCoordinator::sign_with_flags(self, key, data, flags).await
    }

    async fn add(&self, _identity: AddIdentity) -> Result<(), SigningError> {
        log::debug!("Refusing to add a key");
        Err(SigningError::Unsupported)
    }

    async fn remove(&self, _key: &KeyData) -> Result<(), SigningError> {
        log::debug!("Refusing to remove a key");
        Err(SigningError::Unsupported)
    }

    async fn remove_all(&self) -> Result<(), SigningError> {
        self.close().await
    }

    async fn lock(&self, _passphrase: &str) -> Result<(), SigningError> {
        Err(SigningError::Unsupported)
    }

    async fn unlock(&self, _passphrase: &str) -> Result<(), SigningError> {
        Err(SigningError::Unsupported)
    }

    async fn extension(&self, extension: Extension) -> Result<Option<Extension>, SigningError> {
        log::debug!("Unsupported extension requested: {}", extension.name);
        Err(SigningError::ExtensionUnsupported)
    }

    async fn close(&self) -> Result<(), SigningError> {
        Ok(())
    }
}
