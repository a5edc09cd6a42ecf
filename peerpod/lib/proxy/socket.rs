use std::{
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    fs,
    net::{TcpStream, UnixListener, UnixStream},
    time,
};
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use super::{AgentProxy, ProxyFactory, Readiness};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default bound on a single dial attempt to the agent.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// The default pause between dial attempts while the agent is unreachable.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An agent proxy that forwards a unix socket to the agent's TCP endpoint.
///
/// [`start`](AgentProxy::start) first dials the agent until it answers, then binds the unix socket,
/// fulfills its readiness and forwards each accepted connection until stopped.
#[derive(Debug)]
pub struct SocketProxy {
    /// The name the guest is expected to present.
    server_name: String,

    /// Where the proxy listens.
    socket_path: PathBuf,

    /// Fulfilled once the socket accepts connections.
    readiness: Readiness,

    /// Fired by `shutdown`.
    stop: CancellationToken,

    /// The bound on a single dial attempt.
    dial_timeout: Duration,

    /// The pause between dial attempts.
    retry_interval: Duration,
}

/// Builds a [`SocketProxy`] per sandbox.
#[derive(Debug, Clone, TypedBuilder)]
pub struct SocketProxyFactory {
    /// The bound on a single dial attempt.
    #[builder(default = DEFAULT_DIAL_TIMEOUT)]
    dial_timeout: Duration,

    /// The pause between dial attempts.
    #[builder(default = DEFAULT_RETRY_INTERVAL)]
    retry_interval: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SocketProxy {
    /// Creates a proxy listening on `socket_path`.
    pub fn new(
        server_name: impl Into<String>,
        socket_path: impl AsRef<Path>,
        dial_timeout: Duration,
        retry_interval: Duration,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            socket_path: socket_path.as_ref().to_path_buf(),
            readiness: Readiness::new(),
            stop: CancellationToken::new(),
            dial_timeout,
            retry_interval,
        }
    }

    /// Returns the name the guest is expected to present.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Dials the agent until it answers. Returns `false` if stopped first.
    async fn wait_for_agent(&self, target: SocketAddr, cancel: &CancellationToken) -> bool {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            tokio::select! {
                _ = self.stop.cancelled() => return false,
                _ = cancel.cancelled() => return false,
                dialed = time::timeout(self.dial_timeout, TcpStream::connect(target)) => match dialed {
                    Ok(Ok(_)) => {
                        tracing::debug!(%target, attempts, "agent is reachable");
                        return true;
                    }
                    Ok(Err(e)) => tracing::debug!(%target, attempts, error = %e, "agent not reachable yet"),
                    Err(_) => tracing::debug!(%target, attempts, "dialing agent timed out"),
                }
            }

            tokio::select! {
                _ = self.stop.cancelled() => return false,
                _ = cancel.cancelled() => return false,
                _ = time::sleep(self.retry_interval) => {}
            }
        }
    }

    /// Creates the socket's parent directory and removes a stale socket file.
    async fn prepare_socket(&self) -> io::Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        match fs::remove_file(&self.socket_path).await {
            Ok(()) => {
                tracing::warn!(socket = %self.socket_path.display(), "removed stale agent socket");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl SocketProxyFactory {
    /// Creates a factory with the given dial bounds.
    pub fn new(dial_timeout: Duration, retry_interval: Duration) -> Self {
        Self {
            dial_timeout,
            retry_interval,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl AgentProxy for SocketProxy {
    async fn start(&self, target: SocketAddr, cancel: CancellationToken) -> anyhow::Result<()> {
        tracing::info!(
            server_name = %self.server_name,
            socket = %self.socket_path.display(),
            %target,
            "waiting for agent"
        );

        if !self.wait_for_agent(target, &cancel).await {
            tracing::info!(socket = %self.socket_path.display(), "proxy stopped before the agent was reachable");
            return Ok(());
        }

        self.prepare_socket().await?;
        let listener = UnixListener::bind(&self.socket_path)?;
        self.readiness.notify();
        tracing::info!(socket = %self.socket_path.display(), %target, "agent proxy ready");

        let connections = CancellationToken::new();
        let result = loop {
            tokio::select! {
                _ = self.stop.cancelled() => break Ok(()),
                _ = cancel.cancelled() => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let connections = connections.clone();
                        tokio::spawn(async move {
                            if let Err(e) = forward(stream, target, connections).await {
                                tracing::debug!(%target, error = %e, "agent connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(socket = %self.socket_path.display(), error = %e, "failed to accept agent connection");
                        break Err(e.into());
                    }
                }
            }
        };

        connections.cancel();
        drop(listener);
        if let Err(e) = fs::remove_file(&self.socket_path).await {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(socket = %self.socket_path.display(), error = %e, "failed to remove agent socket");
            }
        }

        result
    }

    fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.stop.cancel();
        Ok(())
    }

    fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl ProxyFactory for SocketProxyFactory {
    fn new_proxy(
        &self,
        server_name: &str,
        socket_path: &Path,
    ) -> anyhow::Result<Arc<dyn AgentProxy>> {
        Ok(Arc::new(SocketProxy::new(
            server_name,
            socket_path,
            self.dial_timeout,
            self.retry_interval,
        )))
    }
}

impl Default for SocketProxyFactory {
    fn default() -> Self {
        Self::new(DEFAULT_DIAL_TIMEOUT, DEFAULT_RETRY_INTERVAL)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Copies bytes both ways between a local connection and the agent until either side closes.
async fn forward(
    mut inbound: UnixStream,
    target: SocketAddr,
    cancel: CancellationToken,
) -> io::Result<()> {
    let mut outbound = TcpStream::connect(target).await?;
    tokio::select! {
        copied = tokio::io::copy_bidirectional(&mut inbound, &mut outbound) => {
            let (to_agent, from_agent) = copied?;
            tracing::trace!(%target, to_agent, from_agent, "agent connection closed");
        }
        _ = cancel.cancelled() => {}
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
