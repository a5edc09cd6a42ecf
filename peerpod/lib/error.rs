use std::{
    error::Error,
    fmt::{self, Display},
    time::Duration,
};

use thiserror::Error;

use crate::orchestration::StopReport;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a peerpod-related operation.
pub type PeerpodResult<T> = Result<T, PeerpodError>;

/// An error that occurred while orchestrating a sandbox or handling its configuration.
///
/// Lifecycle errors carry the sandbox ID and the [`Stage`] that failed so that a failure spanning
/// several components can be correlated by an operator.
#[derive(pretty_error_debug::Debug, Error)]
pub enum PeerpodError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A YAML (de)serialization error.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A TOML deserialization error.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// One or more configuration fields failed validation.
    #[error("configuration validation failed: {}", .0.join("; "))]
    ConfigValidationErrors(Vec<String>),

    /// A secure-comms forwarding rule could not be parsed.
    #[error("invalid forwarding rule: {0}")]
    InvalidForwardingRule(String),

    /// The sandbox ID cannot be used to derive a contained socket path.
    #[error("invalid sandbox id: {0:?}")]
    InvalidSandboxId(String),

    /// The cloud provider rejected its configuration or credentials.
    #[error("cloud provider configuration check failed: {0}")]
    ConfigVerification(AnyError),

    /// The process-wide cloud provider shutdown failed.
    #[error("cloud provider teardown failed: {0}")]
    ProviderTeardown(AnyError),

    /// Selecting, creating or deleting a cloud instance failed.
    #[error("sandbox {sandbox_id}: provisioning failed at {stage}: {source}")]
    Provisioning {
        /// The sandbox the operation was for.
        sandbox_id: String,

        /// The stage that failed.
        stage: Stage,

        /// The underlying error.
        source: AnyError,
    },

    /// Allocating or starting a local resource (socket directory, proxy) failed.
    #[error("sandbox {sandbox_id}: local resource failure at {stage}: {source}")]
    Resource {
        /// The sandbox the operation was for.
        sandbox_id: String,

        /// The stage that failed.
        stage: Stage,

        /// The underlying error.
        source: AnyError,
    },

    /// Inspecting, setting up or tearing down the pod network tunnel failed.
    #[error("sandbox {sandbox_id}: pod network failure at {stage}: {source}")]
    NetworkSetup {
        /// The sandbox the operation was for.
        sandbox_id: String,

        /// The stage that failed.
        stage: Stage,

        /// The underlying error.
        source: AnyError,
    },

    /// Retrieving key material or running the secure tunnel failed.
    #[error("sandbox {sandbox_id}: secure comms failure at {stage}: {source}")]
    SecureComms {
        /// The sandbox the operation was for.
        sandbox_id: String,

        /// The stage that failed.
        stage: Stage,

        /// The underlying error.
        source: AnyError,
    },

    /// A bounded wait elapsed.
    #[error("sandbox {sandbox_id}: timed out after {timeout:?} at {stage}")]
    Timeout {
        /// The sandbox the operation was for.
        sandbox_id: String,

        /// The stage that was being waited on.
        stage: Stage,

        /// The bound that elapsed.
        timeout: Duration,
    },

    /// The caller cancelled the operation, or a concurrent stop took the sandbox over.
    #[error("sandbox {sandbox_id}: cancelled at {stage}")]
    Cancelled {
        /// The sandbox the operation was for.
        sandbox_id: String,

        /// The stage that was interrupted.
        stage: Stage,
    },

    /// No sandbox with the given ID exists.
    #[error("sandbox {0} not found")]
    NotFound(String),

    /// The sandbox exists but is not in a state that allows the operation.
    #[error("sandbox {sandbox_id}: conflict: {reason}")]
    Conflict {
        /// The sandbox the operation was for.
        sandbox_id: String,

        /// Why the operation was rejected.
        reason: String,
    },

    /// Deleting the cloud instance failed while stopping a sandbox.
    ///
    /// Every other cleanup step has still been attempted; `report` tells which succeeded.
    #[error("sandbox {sandbox_id}: failed to delete instance {instance_id}: {source}")]
    Teardown {
        /// The sandbox that was being stopped.
        sandbox_id: String,

        /// The instance that could not be deleted.
        instance_id: String,

        /// The underlying error.
        source: AnyError,

        /// The outcome of every cleanup step.
        report: Box<StopReport>,
    },

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// The step of a sandbox lifecycle operation that an error or cleanup outcome refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Choosing an instance type for the requested resources.
    SelectInstanceType,

    /// Creating the cloud instance.
    CreateInstance,

    /// Deleting the cloud instance.
    DeleteInstance,

    /// Discovering the pod network tunnel configuration.
    InspectTunnel,

    /// Setting up the pod network tunnel.
    SetupTunnel,

    /// Tearing down the pod network tunnel.
    TeardownTunnel,

    /// Constructing the agent proxy.
    CreateProxy,

    /// Rendering the guest configuration.
    GenerateGuestConfig,

    /// Creating the sandbox socket directory.
    AllocateSocket,

    /// Retrieving key material from the key broker.
    RetrieveKeys,

    /// Opening the secure tunnel.
    StartSecureTunnel,

    /// Waiting for the secure tunnel to report ready.
    SecureTunnelReady,

    /// Stopping the secure tunnel.
    StopSecureTunnel,

    /// Running the agent proxy.
    StartProxy,

    /// Waiting for the agent proxy to report ready.
    ProxyReady,

    /// Shutting the agent proxy down.
    ShutdownProxy,

    /// Removing the sandbox socket directory.
    RemoveSocket,
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PeerpodError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> PeerpodError {
        PeerpodError::Custom(AnyError::new(error))
    }

    /// Creates a provisioning error.
    pub fn provisioning(
        sandbox_id: impl Into<String>,
        stage: Stage,
        error: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Provisioning {
            sandbox_id: sandbox_id.into(),
            stage,
            source: AnyError::new(error),
        }
    }

    /// Creates a local resource error.
    pub fn resource(
        sandbox_id: impl Into<String>,
        stage: Stage,
        error: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Resource {
            sandbox_id: sandbox_id.into(),
            stage,
            source: AnyError::new(error),
        }
    }

    /// Creates a pod network error.
    pub fn network_setup(
        sandbox_id: impl Into<String>,
        stage: Stage,
        error: impl Into<anyhow::Error>,
    ) -> Self {
        Self::NetworkSetup {
            sandbox_id: sandbox_id.into(),
            stage,
            source: AnyError::new(error),
        }
    }

    /// Creates a secure comms error.
    pub fn secure_comms(
        sandbox_id: impl Into<String>,
        stage: Stage,
        error: impl Into<anyhow::Error>,
    ) -> Self {
        Self::SecureComms {
            sandbox_id: sandbox_id.into(),
            stage,
            source: AnyError::new(error),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(sandbox_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            sandbox_id: sandbox_id.into(),
            reason: reason.into(),
        }
    }

    /// Returns the sandbox ID the error refers to, if any.
    pub fn sandbox_id(&self) -> Option<&str> {
        match self {
            Self::Provisioning { sandbox_id, .. }
            | Self::Resource { sandbox_id, .. }
            | Self::NetworkSetup { sandbox_id, .. }
            | Self::SecureComms { sandbox_id, .. }
            | Self::Timeout { sandbox_id, .. }
            | Self::Cancelled { sandbox_id, .. }
            | Self::Conflict { sandbox_id, .. }
            | Self::Teardown { sandbox_id, .. } => Some(sandbox_id),
            Self::NotFound(sandbox_id) | Self::InvalidSandboxId(sandbox_id) => Some(sandbox_id),
            _ => None,
        }
    }

    /// Returns the lifecycle stage the error refers to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Provisioning { stage, .. }
            | Self::Resource { stage, .. }
            | Self::NetworkSetup { stage, .. }
            | Self::SecureComms { stage, .. }
            | Self::Timeout { stage, .. }
            | Self::Cancelled { stage, .. } => Some(*stage),
            Self::Teardown { .. } => Some(Stage::DeleteInstance),
            _ => None,
        }
    }
}

impl Stage {
    /// Returns the kebab-case name of the stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelectInstanceType => "select-instance-type",
            Self::CreateInstance => "create-instance",
            Self::DeleteInstance => "delete-instance",
            Self::InspectTunnel => "inspect-tunnel",
            Self::SetupTunnel => "setup-tunnel",
            Self::TeardownTunnel => "teardown-tunnel",
            Self::CreateProxy => "create-proxy",
            Self::GenerateGuestConfig => "generate-guest-config",
            Self::AllocateSocket => "allocate-socket",
            Self::RetrieveKeys => "retrieve-keys",
            Self::StartSecureTunnel => "start-secure-tunnel",
            Self::SecureTunnelReady => "secure-tunnel-ready",
            Self::StopSecureTunnel => "stop-secure-tunnel",
            Self::StartProxy => "start-proxy",
            Self::ProxyReady => "proxy-ready",
            Self::ShutdownProxy => "shutdown-proxy",
            Self::RemoveSocket => "remove-socket",
        }
    }
}

impl AnyError {
    /// Wraps any error.
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: error.into(),
        }
    }

    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.error)
    }
}

impl Error for AnyError {}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
