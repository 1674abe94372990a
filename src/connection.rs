//! Serving a single client connection.
//!
//! Each accepted stream gets its own [`Dispatcher`], a thin
//! [`Session`](ssh_agent_lib::agent::Session) adapter that forwards decoded
//! requests to the agent's [`AgentCapabilities`]. Failed operations are answered
//! with `SSH_AGENT_FAILURE` and the connection carries on; only transport and
//! framing errors end it.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use ssh_agent_lib::agent::Session;
use ssh_agent_lib::async_trait;
use ssh_agent_lib::error::AgentError;
use ssh_agent_lib::proto::{
    AddIdentity, AddIdentityConstrained, Extension, Identity, RemoveIdentity, Request, Response,
    SignRequest,
};
use ssh_encoding::{Decode, Encode};
use ssh_key::public::KeyData;
use ssh_key::Signature;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec, LengthDelimitedCodecError};

use crate::capabilities::AgentCapabilities;
use crate::coordinator::SignatureFlags;
use crate::error::{ConnectionError, SigningError};

/// Largest request accepted from a client (matches OpenSSH's agent)
pub const MAX_MESSAGE_LEN: usize = 256 * 1024;

/// Per-connection adapter from the protocol dispatcher to the agent
pub struct Dispatcher<A> {
    agent: Arc<A>,
}

impl<A> Dispatcher<A> {
    pub fn new(agent: Arc<A>) -> Self {
        Self { agent }
    }
}

fn reply_error(e: SigningError) -> AgentError {
    log::debug!("Agent request failed: {}", e);
    match e {
        SigningError::ExtensionUnsupported => AgentError::Failure,
        other => AgentError::other(other),
    }
}

#[async_trait]
impl<A: AgentCapabilities> Session for Dispatcher<A> {
    async fn request_identities(&mut self) -> Result<Vec<Identity>, AgentError> {
        let records = self.agent.list().await.map_err(reply_error)?;
        Ok(records
            .into_iter()
            .map(|record| Identity {
                pubkey: record.key.into(),
                comment: record.comment,
            })
            .collect())
    }

    async fn sign(&mut self, request: SignRequest) -> Result<Signature, AgentError> {
        let key = KeyData::from(request.pubkey);
        self.agent
            .sign_with_flags(&key, &request.data, SignatureFlags::from_bits(request.flags))
            .await
            .map_err(reply_error)
    }

    async fn add_identity(&mut self, identity: AddIdentity) -> Result<(), AgentError> {
        self.agent.add(identity).await.map_err(reply_error)
    }

    async fn add_identity_constrained(
        &mut self,
        identity: AddIdentityConstrained,
    ) -> Result<(), AgentError> {
        self.agent.add(identity.identity).await.map_err(reply_error)
    }

    async fn remove_identity(&mut self, identity: RemoveIdentity) -> Result<(), AgentError> {
        let key = KeyData::from(identity.pubkey);
        self.agent.remove(&key).await.map_err(reply_error)
    }

    async fn remove_all_identities(&mut self) -> Result<(), AgentError> {
        self.agent.remove_all().await.map_err(reply_error)
    }

    async fn lock(&mut self, key: String) -> Result<(), AgentError> {
        self.agent.lock(&key).await.map_err(reply_error)
    }

    async fn unlock(&mut self, key: String) -> Result<(), AgentError> {
        self.agent.unlock(&key).await.map_err(reply_error)
    }

    async fn extension(&mut self, extension: Extension) -> Result<Option<Extension>, AgentError> {
        self.agent.extension(extension).await.map_err(reply_error)
    }
}

/// Serve `stream` until the client hangs up. Errors are logged, never returned.
pub async fn serve_connection<S, A>(stream: S, agent: Arc<A>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    A: AgentCapabilities,
{
    let mut session = Dispatcher::new(agent);
    match handle_stream(stream, &mut session).await {
        Ok(()) => log::debug!("Agent client disconnected"),
        Err(e) => log::warn!("Agent client connection ended with error: {}", e),
    }
}

/// Frame codec for the agent protocol: u32 big-endian length prefix
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .big_endian()
        .length_field_length(4)
        .max_frame_length(MAX_MESSAGE_LEN)
        .new_codec()
}

/// Read framed requests from `stream` and answer each through `session`.
///
/// A request that fails to decode is answered with `SSH_AGENT_FAILURE`; only
/// transport errors and oversized frames end the connection.
pub async fn handle_stream<S>(
    stream: S,
    session: &mut impl Session,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut framed = Framed::new(stream, frame_codec());

    while let Some(frame) = framed.next().await {
        let frame = frame.map_err(|e| {
            if is_oversized(&e) {
                ConnectionError::Oversized
            } else {
                ConnectionError::Io(e)
            }
        })?;

        let response = match Request::decode(&mut &frame[..]) {
            Ok(request) => {
                log::trace!("Agent request: {:?}", request);
                match session.handle(request).await {
                    Ok(response) => response,
                    Err(AgentError::ExtensionFailure) => Response::ExtensionFailure,
                    Err(_) => Response::Failure,
                }
            }
            Err(e) => {
                log::debug!("Malformed agent request: {}", e);
                Response::Failure
            }
        };
        log::trace!("Agent response: {:?}", response);

        let mut reply = Vec::new();
        response.encode(&mut reply)?;
        framed.send(Bytes::from(reply)).await?;
    }

    Ok(())
}

fn is_oversized(e: &io::Error) -> bool {
    e.get_ref()
        .is_some_and(|inner| inner.is::<LengthDelimitedCodecError>())
}
