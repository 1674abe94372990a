//! The stored key and where it comes from.
//!
//! The agent serves exactly one key. It lives on disk as a small
//! SSH-wire-encoded record:
//!
//! ```text
//! string  "tpm-ssh-agent-key-v1"
//! string  public key blob
//! string  comment
//! string  sealed private blob
//! ```
//!
//! The sealed blob is opaque to the agent; only the TPM transport knows how to
//! use it. A [`KeySource`] reloads the record on every request, so replacing the
//! file takes effect for the next connection without restarting the agent.

use std::fmt;
use std::path::{Path, PathBuf};

use ssh_encoding::{Decode, Encode, Reader};
use ssh_key::public::KeyData;

use crate::error::KeyError;
use crate::paths;

/// Header of the on-disk key format
pub const KEY_MAGIC: &str = "tpm-ssh-agent-key-v1";

/// SSH wire encoding of `key`, as compared and listed by the agent
pub fn key_blob(key: &KeyData) -> Result<Vec<u8>, ssh_encoding::Error> {
    let mut blob = Vec::new();
    key.encode(&mut blob)?;
    Ok(blob)
}

/// A decoded key record.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyDescriptor {
    public: KeyData,
    comment: String,
    sealed: Vec<u8>,
}

impl KeyDescriptor {
    pub fn new(public: KeyData, comment: impl Into<String>, sealed: Vec<u8>) -> Self {
        Self {
            public,
            comment: comment.into(),
            sealed,
        }
    }

    /// Decode a key record, rejecting trailing bytes
    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self, KeyError> {
        let reader = &mut bytes;

        let magic = String::decode(reader)?;
        if magic != KEY_MAGIC {
            return Err(KeyError::BadMagic(magic));
        }

        let blob = Vec::<u8>::decode(reader)?;
        let public = KeyData::decode(&mut blob.as_slice())?;
        let comment = String::decode(reader)?;
        let sealed = Vec::<u8>::decode(reader)?;

        let remaining = reader.remaining_len();
        if remaining != 0 {
            return Err(KeyError::TrailingData(remaining));
        }

        Ok(Self {
            public,
            comment,
            sealed,
        })
    }

    /// Encode the record in the on-disk format
    pub fn to_bytes(&self) -> Result<Vec<u8>, KeyError> {
        let mut out = Vec::new();
        KEY_MAGIC.encode(&mut out)?;
        key_blob(&self.public)?.encode(&mut out)?;
        self.comment.encode(&mut out)?;
        self.sealed.encode(&mut out)?;
        Ok(out)
    }

    pub fn public_key(&self) -> &KeyData {
        &self.public
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// The TPM-specific private blob
    pub fn sealed(&self) -> &[u8] {
        &self.sealed
    }

    /// Derive the record advertised to clients
    pub fn public_key_record(&self) -> Result<PublicKeyRecord, ssh_encoding::Error> {
        PublicKeyRecord::new(self.public.clone(), self.comment.clone())
    }
}

impl fmt::Debug for KeyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyDescriptor")
            .field("algorithm", &self.public.algorithm())
            .field("comment", &self.comment)
            .field("sealed_len", &self.sealed.len())
            .finish()
    }
}

/// Public half of the served key as listed to clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyRecord {
    /// Key type name, e.g. `ssh-ed25519`
    pub format: String,
    /// SSH wire encoding of the public key
    pub blob: Vec<u8>,
    pub key: KeyData,
    pub comment: String,
}

impl PublicKeyRecord {
    pub fn new(key: KeyData, comment: String) -> Result<Self, ssh_encoding::Error> {
        Ok(Self {
            format: key.algorithm().as_str().to_string(),
            blob: key_blob(&key)?,
            key,
            comment,
        })
    }
}

/// Where the agent loads its key from.
///
/// Called under the signing lock for every key-bearing request; results must
/// not be cached.
pub trait KeySource: Send + Sync + 'static {
    fn load(&self) -> Result<KeyDescriptor, KeyError>;
}

/// Loads the key from a file
#[derive(Debug, Clone)]
pub struct FileKeySource {
    path: PathBuf,
}

impl FileKeySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data-home>/tpm-ssh-agent/ssh.key`
    pub fn default_location() -> Result<Self, KeyError> {
        Ok(Self::new(paths::default_key_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeySource for FileKeySource {
    fn load(&self) -> Result<KeyDescriptor, KeyError> {
        let bytes = std::fs::read(&self.path).map_err(|source| KeyError::Read {
            path: self.path.clone(),
            source,
        })?;
        KeyDescriptor::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssh_key::public::Ed25519PublicKey;
    use tempfile::TempDir;

    fn descriptor() -> KeyDescriptor {
        KeyDescriptor::new(
            KeyData::Ed25519(Ed25519PublicKey([7u8; 32])),
            "test@host",
            vec![1, 2, 3, 4],
        )
    }

    #[test]
    fn test_file_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ssh.key");
        let key = descriptor();
        std::fs::write(&path, key.to_bytes().unwrap()).unwrap();

        let loaded = FileKeySource::new(&path).load().unwrap();
        assert_eq!(loaded, key);
        assert_eq!(loaded.comment(), "test@host");
        assert_eq!(loaded.sealed(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_rejects_wrong_magic() {
        let mut bytes = Vec::new();
        "some-other-format".encode(&mut bytes).unwrap();
        match KeyDescriptor::from_bytes(&bytes) {
            Err(KeyError::BadMagic(magic)) => assert_eq!(magic, "some-other-format"),
            other => panic!("Expected BadMagic, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut bytes = descriptor().to_bytes().unwrap();
        bytes.extend_from_slice(&[0, 0]);
        assert!(matches!(
            KeyDescriptor::from_bytes(&bytes),
            Err(KeyError::TrailingData(2))
        ));
    }

    #[test]
    fn test_rejects_truncated_record() {
        let bytes = descriptor().to_bytes().unwrap();
        assert!(KeyDescriptor::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.key");
        match FileKeySource::new(&path).load() {
            Err(KeyError::Read { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("Expected Read error, got {:?}", other),
        }
    }

    #[test]
    fn test_public_key_record() {
        let key = descriptor();
        let record = key.public_key_record().unwrap();
        assert_eq!(record.format, "ssh-ed25519");
        assert_eq!(record.blob, key_blob(key.public_key()).unwrap());
        assert_eq!(record.comment, "test@host");
    }
}
