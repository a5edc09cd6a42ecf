use std::net::IpAddr;

use async_trait::async_trait;
use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use super::CloudConfig;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A provisioned cloud instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Instance {
    /// The instance name.
    name: String,

    /// The provider's opaque instance identifier.
    id: String,

    /// The addresses the instance is reachable at.
    ips: Vec<IpAddr>,
}

/// The sizing requested for a new instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct InstanceTypeSpec {
    /// The provider instance type. Empty means the provider's default.
    #[builder(default, setter(into))]
    instance_type: String,

    /// The requested number of vCPUs. Zero means unspecified.
    #[builder(default)]
    vcpus: u32,

    /// The requested memory in MiB. Zero means unspecified.
    #[builder(default)]
    memory_mib: u32,

    /// A guest image override.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option, into))]
    image: Option<String>,
}

/// A cloud provider that creates and deletes the instances backing sandboxes.
///
/// Implementations must be safe to call concurrently for different sandboxes.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Creates an instance for the sandbox, booting it with the given guest configuration.
    async fn create_instance(
        &self,
        pod_name: &str,
        sandbox_id: &str,
        cloud_config: &CloudConfig,
        spec: &InstanceTypeSpec,
    ) -> anyhow::Result<Instance>;

    /// Deletes an instance.
    async fn delete_instance(&self, instance_id: &str) -> anyhow::Result<()>;

    /// Picks an instance type for the requested resources.
    async fn select_instance_type(&self, vcpus: u32, memory_mib: u32) -> anyhow::Result<String>;

    /// Checks credentials and provider configuration. Called once when the orchestrator is built.
    fn config_verifier(&self) -> anyhow::Result<()>;

    /// Releases process-wide provider resources.
    fn teardown(&self) -> anyhow::Result<()>;
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Instance {
    /// Creates a new instance description.
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        ips: impl IntoIterator<Item = IpAddr>,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            ips: ips.into_iter().collect(),
        }
    }

    /// Returns the address agent traffic is sent to.
    pub fn primary_ip(&self) -> Option<IpAddr> {
        self.ips.first().copied()
    }
}
