use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use getset::Getters;
use serde::{Deserialize, Serialize};
use tokio::fs;
use typed_builder::TypedBuilder;

use crate::{securecomms::ForwardingRule, PeerpodResult};

use super::{
    DEFAULT_FORWARDER_PORT, DEFAULT_PODS_DIR, DEFAULT_PODVM_NAME_PREFIX,
    DEFAULT_PROXY_READY_TIMEOUT_MS, DEFAULT_SECURE_COMMS_SSH_PORT,
    DEFAULT_TEARDOWN_STEP_TIMEOUT_MS,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The orchestrator configuration.
///
/// ### Required fields:
/// - `pods_dir`: Root directory for per-sandbox agent sockets
///
/// ### Optional fields:
/// - `secure_comms`: Route agent traffic through the SSH-based secure tunnel
/// - `secure_comms_trustee`: Source creation-phase keys from a trustee key broker
/// - `secure_comms_kbs_address`: The key broker endpoint (`host:port`)
/// - `forwarder_port`: The guest port agent traffic is forwarded to
/// - `proxy_ready_timeout_ms`: The bound on StartVM
/// - `teardown_step_timeout_ms`: The bound on each StopVM cleanup step
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct OrchestratorConfig {
    /// Whether agent traffic goes through the secure tunnel.
    #[serde(default)]
    #[builder(default)]
    pub(super) secure_comms: bool,

    /// Whether creation-phase keys come from a trustee key broker.
    #[serde(default)]
    #[builder(default)]
    pub(super) secure_comms_trustee: bool,

    /// Root directory under which each sandbox gets its agent socket.
    #[serde(default = "OrchestratorConfig::default_pods_dir")]
    #[builder(setter(into))]
    pub(super) pods_dir: PathBuf,

    /// The guest port agent traffic is forwarded to.
    #[serde(default = "OrchestratorConfig::default_forwarder_port")]
    #[builder(default = DEFAULT_FORWARDER_PORT)]
    pub(super) forwarder_port: u16,

    /// The key broker endpoint (`host:port`).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option, into))]
    pub(super) secure_comms_kbs_address: Option<String>,

    /// The guest port the secure tunnel connects to.
    #[serde(default = "OrchestratorConfig::default_secure_comms_ssh_port")]
    #[builder(default = DEFAULT_SECURE_COMMS_SSH_PORT)]
    pub(super) secure_comms_ssh_port: u16,

    /// Host-side inbound forwarding rules of the secure tunnel.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub(super) secure_comms_inbounds: Vec<ForwardingRule>,

    /// Host-side outbound forwarding rules of the secure tunnel.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub(super) secure_comms_outbounds: Vec<ForwardingRule>,

    /// Guest-side inbound forwarding rules, shipped in the guest configuration.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub(super) secure_comms_pp_inbounds: Vec<ForwardingRule>,

    /// Guest-side outbound forwarding rules, shipped in the guest configuration.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub(super) secure_comms_pp_outbounds: Vec<ForwardingRule>,

    /// The bound on StartVM, in milliseconds.
    #[serde(default = "OrchestratorConfig::default_proxy_ready_timeout_ms")]
    #[builder(default = DEFAULT_PROXY_READY_TIMEOUT_MS)]
    pub(super) proxy_ready_timeout_ms: u64,

    /// The bound on each StopVM cleanup step, in milliseconds.
    #[serde(default = "OrchestratorConfig::default_teardown_step_timeout_ms")]
    #[builder(default = DEFAULT_TEARDOWN_STEP_TIMEOUT_MS)]
    pub(super) teardown_step_timeout_ms: u64,

    /// Whether a failed StartVM deletes the instance instead of leaving it for diagnostics.
    #[serde(default)]
    #[builder(default)]
    pub(super) delete_instance_on_start_failure: bool,

    /// The prefix of generated instance names.
    #[serde(default = "OrchestratorConfig::default_podvm_name_prefix")]
    #[builder(default = DEFAULT_PODVM_NAME_PREFIX.to_string(), setter(into))]
    pub(super) podvm_name_prefix: String,

    /// vCPUs requested when the pod does not say. Zero leaves the choice to the provider.
    #[serde(default)]
    #[builder(default)]
    pub(super) default_vcpus: u32,

    /// Memory in MiB requested when the pod does not say. Zero leaves the choice to the provider.
    #[serde(default)]
    #[builder(default)]
    pub(super) default_memory_mib: u32,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OrchestratorConfig {
    /// Loads and validates a configuration file.
    ///
    /// The format follows the file extension: `.toml`, `.json`, otherwise YAML.
    pub async fn load(path: impl AsRef<Path>) -> PeerpodResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).await?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&contents)?,
            Some("json") => serde_json::from_str(&contents)?,
            _ => serde_yaml::from_str(&contents)?,
        };

        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded orchestrator configuration");

        Ok(config)
    }

    /// Returns the StartVM bound.
    pub fn proxy_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy_ready_timeout_ms)
    }

    /// Returns the bound on each StopVM cleanup step.
    pub fn teardown_step_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_step_timeout_ms)
    }

    pub(super) fn default_pods_dir() -> PathBuf {
        PathBuf::from(DEFAULT_PODS_DIR)
    }

    pub(super) fn default_forwarder_port() -> u16 {
        DEFAULT_FORWARDER_PORT
    }

    pub(super) fn default_secure_comms_ssh_port() -> u16 {
        DEFAULT_SECURE_COMMS_SSH_PORT
    }

    pub(super) fn default_proxy_ready_timeout_ms() -> u64 {
        DEFAULT_PROXY_READY_TIMEOUT_MS
    }

    pub(super) fn default_teardown_step_timeout_ms() -> u64 {
        DEFAULT_TEARDOWN_STEP_TIMEOUT_MS
    }

    pub(super) fn default_podvm_name_prefix() -> String {
        DEFAULT_PODVM_NAME_PREFIX.to_string()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
