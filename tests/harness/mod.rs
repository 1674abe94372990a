#![allow(dead_code)]

use std::{
    error::Error,
    io,
    path::{Path, PathBuf},
};

use ssh_agent_lib::proto::{Request, Response, SignRequest};
use ssh_encoding::{Decode, Encode};
use ssh_key::{public::KeyData, PrivateKey, Signature};
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
};
use tpm_ssh_agent::{Agent, FileKeySource, KeyDescriptor, SigningCoordinator, SoftwareTpm};

use crate::keys;

pub type BoxError = Box<dyn Error + Send + Sync>;
pub type TestResult = Result<(), BoxError>;

/// Minimal agent client speaking raw frames over a Unix socket
pub struct AgentClient {
    stream: UnixStream,
}

impl AgentClient {
    pub async fn connect(path: impl AsRef<Path>) -> io::Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self { stream })
    }

    /// Send one frame body and read back one reply body
    pub async fn roundtrip(&mut self, body: &[u8]) -> io::Result<Vec<u8>> {
        self.stream.write_u32(body.len() as u32).await?;
        self.stream.write_all(body).await?;
        self.stream.flush().await?;

        let len = self.stream.read_u32().await?;
        let mut reply = vec![0u8; len as usize];
        self.stream.read_exact(&mut reply).await?;
        Ok(reply)
    }

    pub async fn request(&mut self, request: &Request) -> Result<Response, BoxError> {
        let mut body = Vec::new();
        request.encode(&mut body)?;
        let reply = self.roundtrip(&body).await?;
        Ok(Response::decode(&mut reply.as_slice())?)
    }

    pub async fn list(&mut self) -> Result<Vec<(KeyData, String)>, BoxError> {
        match self.request(&Request::RequestIdentities).await? {
            Response::IdentitiesAnswer(identities) => Ok(identities
                .into_iter()
                .map(|id| (KeyData::from(id.pubkey), id.comment))
                .collect()),
            other => Err(format!("unexpected reply to list: {:?}", other).into()),
        }
    }

    /// Returns `None` when the agent answers with a failure
    pub async fn sign(
        &mut self,
        key: &KeyData,
        data: &[u8],
    ) -> Result<Option<Signature>, BoxError> {
        let request = Request::SignRequest(SignRequest {
            pubkey: key.clone().into(),
            data: data.to_vec(),
            flags: 0,
        });
        match self.request(&request).await? {
            Response::SignResponse(signature) => Ok(Some(signature)),
            Response::Failure => Ok(None),
            other => Err(format!("unexpected reply to sign: {:?}", other).into()),
        }
    }

    pub fn into_inner(self) -> UnixStream {
        self.stream
    }
}

/// An agent serving the fixture key from a private temporary directory
pub struct TestAgent {
    pub dir: TempDir,
    pub socket_path: PathBuf,
    pub key_path: PathBuf,
    pub key: KeyDescriptor,
    pub agent: Agent,
}

impl TestAgent {
    pub fn start() -> Result<Self, BoxError> {
        let dir = TempDir::new()?;
        let socket_path = dir.path().join("agent.sock");
        Self::start_at(dir, socket_path)
    }

    pub fn start_at(dir: TempDir, socket_path: PathBuf) -> Result<Self, BoxError> {
        let key_path = dir.path().join("ssh.key");
        let key = seal_key(keys::TEST_KEY_ED25519)?;
        std::fs::write(&key_path, key.to_bytes()?)?;

        let coordinator = SigningCoordinator::new(
            FileKeySource::new(&key_path),
            SoftwareTpm::new().factory(),
        );
        let agent = Agent::start_with(&socket_path, coordinator)?;

        Ok(Self {
            dir,
            socket_path,
            key_path,
            key,
            agent,
        })
    }

    pub async fn connect(&self) -> io::Result<AgentClient> {
        AgentClient::connect(&self.socket_path).await
    }
}

pub fn seal_key(openssh: &str) -> Result<KeyDescriptor, BoxError> {
    let private = PrivateKey::from_openssh(openssh)?;
    Ok(SoftwareTpm::new().seal(&private)?)
}
