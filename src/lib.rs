//! SSH agent for a single TPM-backed key.
//!
//! ```text
//! Agent (lifecycle) ── accept loop (listener) ── one task per connection
//!                                                   │
//!                                     Dispatcher (ssh-agent-lib Session)
//!                                                   │
//!                                   AgentCapabilities / SigningCoordinator
//!                                          │                    │
//!                                     KeySource           TpmHandleFactory
//! ```
//!
//! The agent is read-only: it lists and signs with the key stored under
//! `<data-home>/tpm-ssh-agent/ssh.key` and refuses every request that would
//! change agent state. All key access is serialized because the TPM handles one
//! operation at a time.

pub mod capabilities;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod key;
pub mod lifecycle;
pub mod listener;
pub mod paths;
pub mod tpm;

#[cfg(test)]
mod test_support;

pub use capabilities::AgentCapabilities;
pub use coordinator::{SignatureFlags, SigningCoordinator};
pub use error::{AgentError, ConnectionError, KeyError, SigningError, TpmError};
pub use key::{FileKeySource, KeyDescriptor, KeySource, PublicKeyRecord};
pub use lifecycle::Agent;
pub use tpm::{SoftwareTpm, TpmHandleFactory, TpmSigner, TpmTransport};
