//! The accept loop.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use ssh_agent_lib::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::capabilities::AgentCapabilities;
use crate::connection::serve_connection;

/// Pause after a transient accept error
pub const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

const ENFILE: i32 = 23;
const EMFILE: i32 = 24;

/// Source of client connections
#[async_trait]
pub trait Listener: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn accept(&mut self) -> io::Result<Self::Stream>;
}

#[async_trait]
impl Listener for UnixListener {
    type Stream = UnixStream;

    async fn accept(&mut self) -> io::Result<UnixStream> {
        let (stream, _) = UnixListener::accept(self).await?;
        Ok(stream)
    }
}

/// Errors worth retrying: the listener itself is still usable
pub fn is_transient(e: &io::Error) -> bool {
    use io::ErrorKind::*;

    matches!(
        e.kind(),
        WouldBlock | Interrupted | ConnectionAborted | ConnectionReset | TimedOut
    ) || matches!(e.raw_os_error(), Some(ENFILE) | Some(EMFILE))
}

/// Accept connections until `shutdown` is cancelled, serving each one as a
/// task in `tasks`.
///
/// Returns an error only for a non-transient accept failure outside shutdown.
/// The listener is dropped (and so closed) when this returns.
pub async fn accept_loop<L, A>(
    mut listener: L,
    agent: Arc<A>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
) -> io::Result<()>
where
    L: Listener,
    A: AgentCapabilities,
{
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                log::debug!("Accept loop shutting down");
                return Ok(());
            }
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok(stream) => {
                log::debug!("Accepted agent client connection");
                tasks.spawn(serve_connection(stream, agent.clone()));
            }
            Err(e) if is_transient(&e) => {
                log::warn!(
                    "Temporary accept error, sleeping {}s: {}",
                    ACCEPT_BACKOFF.as_secs(),
                    e
                );
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
            Err(e) if shutdown.is_cancelled() => {
                log::debug!("Accept failed during shutdown: {}", e);
                return Ok(());
            }
            Err(e) => {
                log::error!("Failed to accept connections: {}", e);
                return Err(e);
            }
        }
    }
}
