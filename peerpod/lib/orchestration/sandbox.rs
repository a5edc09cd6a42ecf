use std::{
    fmt,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use getset::Getters;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{oneshot, Mutex},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;

use crate::{
    cloud::Instance,
    podnetwork::TunnelConfig,
    proxy::{AgentProxy, Readiness},
    securecomms::SecureTunnel,
    utils::PodAnnotations,
    PeerpodError,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The lifecycle state of a sandbox.
///
/// ```text
/// creating → created → starting → ready → stopping → stopped
///               └──────────┴─────────→ failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    /// CreateVM is provisioning the sandbox.
    Creating,

    /// The instance exists and the proxy is constructed.
    Created,

    /// StartVM is bringing the sandbox up.
    Starting,

    /// The agent is reachable through the proxy.
    Ready,

    /// StopVM is tearing the sandbox down.
    Stopping,

    /// Every cleanup step has been attempted.
    Stopped,

    /// A lifecycle operation failed. StopVM releases whatever is left.
    Failed,
}

/// A point-in-time view of a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct SandboxStatus {
    /// The sandbox ID.
    id: String,

    /// The pod name.
    pod_name: String,

    /// The pod namespace.
    pod_namespace: String,

    /// The lifecycle state.
    state: SandboxState,

    /// The provisioned instance, once created.
    instance: Option<Instance>,

    /// Where the agent proxy listens.
    agent_socket_path: PathBuf,

    /// The last error observed, cleared by a successful transition.
    last_error: Option<String>,

    /// When the sandbox was created.
    created_at: DateTime<Utc>,

    /// When the sandbox last changed state.
    modified_at: DateTime<Utc>,
}

/// The state record of one sandbox.
pub(super) struct Sandbox {
    pub(super) id: String,
    pub(super) pod_name: String,
    pub(super) pod_namespace: String,
    pub(super) netns_path: Option<PathBuf>,
    pub(super) instance: Option<Instance>,
    pub(super) agent_socket_path: PathBuf,
    pub(super) sandbox_dir: PathBuf,
    pub(super) proxy: Option<Arc<ProxyHandle>>,

    /// The tunnel configuration inspected or assigned at creation.
    pub(super) tunnel_config: Option<TunnelConfig>,

    /// The configuration actually handed to the worker node's setup.
    pub(super) active_tunnel: Option<ActiveTunnel>,

    pub(super) secure_tunnel: Option<Arc<dyn SecureTunnel>>,
    pub(super) state: SandboxState,
    pub(super) last_error: Option<String>,
    pub(super) created_at: DateTime<Utc>,
    pub(super) modified_at: DateTime<Utc>,

    /// Fired when StopVM takes the sandbox over.
    pub(super) stop: CancellationToken,

    /// Notified once CreateVM is done with the record.
    pub(super) settled: Readiness,
}

/// A pod network tunnel that was handed to the worker node.
#[derive(Debug, Clone)]
pub(super) struct ActiveTunnel {
    pub(super) netns_path: PathBuf,
    pub(super) config: TunnelConfig,
}

/// Resources taken out of a record to be released.
#[derive(Default)]
pub(super) struct SandboxResources {
    pub(super) proxy: Option<Arc<ProxyHandle>>,
    pub(super) secure_tunnel: Option<Arc<dyn SecureTunnel>>,
    pub(super) tunnel: Option<ActiveTunnel>,
    pub(super) instance: Option<Instance>,
    pub(super) sandbox_dir: Option<PathBuf>,
}

/// Owns an agent proxy and the background task running it.
///
/// Shutting down is idempotent, so the proxy's own shutdown runs exactly once whichever path gets
/// there first.
pub(super) struct ProxyHandle {
    proxy: Arc<dyn AgentProxy>,
    cancel: CancellationToken,
    shut_down: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SandboxState {
    /// Returns the lowercase name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    /// Returns whether no further lifecycle transition is expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl Sandbox {
    pub(super) fn new(
        id: impl Into<String>,
        annotations: &PodAnnotations,
        netns_path: Option<PathBuf>,
        agent_socket_path: PathBuf,
        sandbox_dir: PathBuf,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            pod_name: annotations.get_pod_name().clone(),
            pod_namespace: annotations.get_pod_namespace().clone(),
            netns_path,
            instance: None,
            agent_socket_path,
            sandbox_dir,
            proxy: None,
            tunnel_config: None,
            active_tunnel: None,
            secure_tunnel: None,
            state: SandboxState::Creating,
            last_error: None,
            created_at: now,
            modified_at: now,
            stop: CancellationToken::new(),
            settled: Readiness::new(),
        }
    }

    /// Moves to `state`. Clears the last error unless the sandbox failed.
    pub(super) fn set_state(&mut self, state: SandboxState) {
        tracing::debug!(sandbox_id = %self.id, from = %self.state, to = %state, "sandbox state change");
        self.state = state;
        self.modified_at = Utc::now();
        if state != SandboxState::Failed {
            self.last_error = None;
        }
    }

    /// Whether StopVM has taken the sandbox over.
    pub(super) fn is_stopping(&self) -> bool {
        matches!(self.state, SandboxState::Stopping | SandboxState::Stopped)
    }

    /// Marks the sandbox failed with `error`.
    pub(super) fn fail(&mut self, error: &PeerpodError) {
        self.set_state(SandboxState::Failed);
        self.last_error = Some(error.to_string());
    }

    /// Takes every resource the sandbox holds.
    pub(super) fn take_resources(&mut self) -> SandboxResources {
        SandboxResources {
            proxy: self.proxy.take(),
            secure_tunnel: self.secure_tunnel.take(),
            tunnel: self.active_tunnel.take(),
            instance: self.instance.take(),
            sandbox_dir: Some(self.sandbox_dir.clone()),
        }
    }

    /// Takes what a failed start brought up, and the instance if `with_instance` is set.
    pub(super) fn take_start_resources(&mut self, with_instance: bool) -> SandboxResources {
        SandboxResources {
            proxy: self.proxy.take(),
            secure_tunnel: self.secure_tunnel.take(),
            tunnel: self.active_tunnel.take(),
            instance: if with_instance {
                self.instance.take()
            } else {
                None
            },
            sandbox_dir: None,
        }
    }

    pub(super) fn status(&self) -> SandboxStatus {
        SandboxStatus {
            id: self.id.clone(),
            pod_name: self.pod_name.clone(),
            pod_namespace: self.pod_namespace.clone(),
            state: self.state,
            instance: self.instance.clone(),
            agent_socket_path: self.agent_socket_path.clone(),
            last_error: self.last_error.clone(),
            created_at: self.created_at,
            modified_at: self.modified_at,
        }
    }
}

impl ProxyHandle {
    pub(super) fn new(proxy: Arc<dyn AgentProxy>) -> Self {
        Self {
            proxy,
            cancel: CancellationToken::new(),
            shut_down: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub(super) fn readiness(&self) -> Readiness {
        self.proxy.readiness()
    }

    pub(super) fn proxy(&self) -> &Arc<dyn AgentProxy> {
        &self.proxy
    }

    /// Runs the proxy in the background. The receiver yields the result of its blocking start.
    pub(super) async fn spawn(&self, target: SocketAddr) -> oneshot::Receiver<anyhow::Result<()>> {
        let (tx, rx) = oneshot::channel();
        let mut task = self.task.lock().await;

        if self.cancel.is_cancelled() || task.is_some() {
            let _ = tx.send(Err(anyhow!("agent proxy already started or shut down")));
            return rx;
        }

        let proxy = Arc::clone(&self.proxy);
        let cancel = self.cancel.clone();
        *task = Some(tokio::spawn(async move {
            let result = proxy.start(target, cancel).await;
            let _ = tx.send(result);
        }));

        rx
    }

    /// Shuts the proxy down and waits up to `timeout` for its task to end.
    pub(super) async fn shutdown(&self, timeout: Duration) -> anyhow::Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.cancel.cancel();
        let stopped = time::timeout(timeout, self.proxy.shutdown()).await;

        let task = self.task.lock().await.take();
        if let Some(mut task) = task {
            if time::timeout(timeout, &mut task).await.is_err() {
                tracing::warn!(socket = %self.proxy.socket_path().display(), "agent proxy did not exit, aborting it");
                task.abort();
            }
        }

        match stopped {
            Ok(result) => result,
            Err(_) => Err(anyhow!("agent proxy shutdown timed out after {timeout:?}")),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
