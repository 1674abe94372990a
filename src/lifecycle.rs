//! Starting and stopping the agent.

use std::fs::{DirBuilder, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::capabilities::AgentCapabilities;
use crate::coordinator::SigningCoordinator;
use crate::error::AgentError;
use crate::key::FileKeySource;
use crate::listener::{accept_loop, Listener};
use crate::tpm::TpmHandleFactory;

/// Removes the socket file once the accept loop has released the listener
pub struct SelfDeletingSocket {
    path: PathBuf,
}

impl SelfDeletingSocket {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for SelfDeletingSocket {
    fn drop(&mut self) {
        log::debug!("Cleaning up agent socket {}", self.path.display());
        let _ = std::fs::remove_file(&self.path);
    }
}

/// A running agent.
///
/// Owns the accept loop and every connection task it spawned. The listener
/// itself lives inside the accept loop, so cancelling [`Agent::stop`]'s token is
/// what closes it.
pub struct Agent {
    socket_path: Option<PathBuf>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    failure: watch::Receiver<Option<Arc<io::Error>>>,
}

impl Agent {
    /// Serve the key stored under the data home on `socket_path`
    pub fn start(socket_path: impl AsRef<Path>, tpm: TpmHandleFactory) -> Result<Self, AgentError> {
        let keys = FileKeySource::default_location()?;
        log::info!("Serving key from {}", keys.path().display());
        Self::start_with(socket_path, SigningCoordinator::new(keys, tpm))
    }

    /// Bind `socket_path`, replacing any stale file, and serve `agent` on it.
    pub fn start_with<A: AgentCapabilities>(
        socket_path: impl AsRef<Path>,
        agent: A,
    ) -> Result<Self, AgentError> {
        let socket_path = socket_path.as_ref();
        let listener = bind_socket(socket_path)?;
        log::info!("Agent listening on {}", socket_path.display());

        let cleanup = SelfDeletingSocket::new(socket_path.to_path_buf());
        let mut started = Self::spawn(listener, agent, Some(cleanup));
        started.socket_path = Some(socket_path.to_path_buf());
        Ok(started)
    }

    /// Serve `agent` on an already-bound listener
    pub fn serve<L: Listener, A: AgentCapabilities>(listener: L, agent: A) -> Self {
        Self::spawn(listener, agent, None)
    }

    fn spawn<L: Listener, A: AgentCapabilities>(
        listener: L,
        agent: A,
        cleanup: Option<SelfDeletingSocket>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();
        let (failure_tx, failure) = watch::channel(None);

        let accept = accept_loop(listener, Arc::new(agent), shutdown.clone(), tasks.clone());
        tasks.spawn(async move {
            let result = accept.await;
            drop(cleanup);
            if let Err(e) = result {
                failure_tx.send_replace(Some(Arc::new(e)));
            }
        });
        // Only lets wait() finish once empty; the accept loop keeps spawning
        tasks.close();

        Self {
            socket_path: None,
            shutdown,
            tasks,
            failure,
        }
    }

    pub fn socket_path(&self) -> Option<&Path> {
        self.socket_path.as_deref()
    }

    /// Accept loop plus live connections
    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_stopping(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting, then wait for every connection to finish.
    ///
    /// Always joins the full task set, even after a fatal accept error, which
    /// is reported once everything has finished. Calling this more than once
    /// only waits again.
    pub async fn stop(&self) -> Result<(), AgentError> {
        if !self.shutdown.is_cancelled() {
            log::info!("Stopping agent");
            self.shutdown.cancel();
        }
        self.tasks.wait().await;
        log::info!("Agent stopped");
        self.accept_result()
    }

    /// Wait for the accept loop and all connections to finish without stopping
    /// them. Returns early with an error if accepting failed.
    pub async fn wait(&self) -> Result<(), AgentError> {
        let mut failure = self.failure.clone();
        let failed = async move { failure.wait_for(Option::is_some).await.is_ok() };

        tokio::select! {
            biased;
            true = failed => {}
            () = self.tasks.wait() => {}
        }

        self.accept_result()
    }

    fn accept_result(&self) -> Result<(), AgentError> {
        match self.failure.borrow().clone() {
            Some(e) => Err(AgentError::Accept(e)),
            None => Ok(()),
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn bind_socket(path: &Path) -> Result<UnixListener, AgentError> {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("Removed stale socket {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        DirBuilder::new()
            .recursive(true)
            .mode(0o777)
            .create(parent)
            .map_err(|source| AgentError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let listener = UnixListener::bind(path).map_err(|source| AgentError::Bind {
        path: path.to_path_buf(),
        source,
    })?;

    std::fs::set_permissions(path, Permissions::from_mode(0o600)).map_err(|source| {
        AgentError::Permissions {
            path: path.to_path_buf(),
            source,
        }
    })?;

    Ok(listener)
}
