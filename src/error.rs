//! Error types for the agent.
//!
//! Each layer has its own error enum; conversions only flow upwards
//! (key/TPM errors into [`SigningError`], I/O into [`AgentError`]).

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use ssh_key::Algorithm;

/// Failure to load the stored key
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("failed to read key file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("not a tpm-ssh-agent key file (unexpected header {0:?})")]
    BadMagic(String),

    #[error("unexpected {0} trailing bytes after key data")]
    TrailingData(usize),

    #[error("malformed key data: {0}")]
    Encoding(#[from] ssh_encoding::Error),

    #[error("invalid public key: {0}")]
    Key(#[from] ssh_key::Error),

    #[error("cannot determine data directory: {0}")]
    DataHome(String),
}

/// Failure inside the TPM transport
#[derive(Debug, thiserror::Error)]
pub enum TpmError {
    #[error("failed to open TPM transport: {0}")]
    Open(String),

    #[error("failed to close TPM transport: {0}")]
    Close(String),

    #[error("failed to unseal key: {0}")]
    Unseal(String),

    #[error("sealed key does not match the stored public key")]
    KeyMismatch,

    #[error("algorithm {requested} is not supported for a {key} key")]
    UnsupportedAlgorithm { requested: Algorithm, key: Algorithm },

    #[error("signing failed: {0}")]
    Sign(String),
}

/// Failure of a key-bearing or unsupported agent operation
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Tpm(#[from] TpmError),

    #[error("no private keys match the requested public key")]
    NoMatchingKey,

    #[error("operation unsupported")]
    Unsupported,

    #[error("extension not supported")]
    ExtensionUnsupported,

    #[error("failed to encode public key: {0}")]
    Encoding(#[from] ssh_encoding::Error),

    #[error("signing worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Failure to start or run the agent
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("failed to create UNIX socket folder {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen on UNIX socket {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to restrict permissions of {}: {source}", path.display())]
    Permissions {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept connections: {0}")]
    Accept(#[source] Arc<io::Error>),

    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Failure of a single client connection
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("request exceeds the maximum message size")]
    Oversized,

    #[error("failed to encode reply: {0}")]
    Encoding(#[from] ssh_encoding::Error),
}
