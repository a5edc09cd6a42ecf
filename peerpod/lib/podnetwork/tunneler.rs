use std::{fmt, net::IpAddr, path::Path};

use async_trait::async_trait;
use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The encapsulation used by a pod network tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelType {
    /// VXLAN encapsulation.
    #[default]
    Vxlan,

    /// Plain routing without encapsulation.
    Routing,
}

/// The parameters of a pod network tunnel.
///
/// Whatever configuration was given to [`WorkerNode::setup`] must be given back to
/// [`WorkerNode::teardown`].
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters,
)]
#[serde(rename_all = "camelCase")]
#[getset(get = "pub with_prefix")]
pub struct TunnelConfig {
    /// The encapsulation.
    #[builder(default)]
    tunnel_type: TunnelType,

    /// The numeric tunnel index (for VXLAN, the VNI offset).
    #[builder(default)]
    index: u32,

    /// Whether traffic leaving the pod is routed out through the instance.
    #[builder(default)]
    external_net_via_pod_vm: bool,
}

/// The worker node side of the pod network.
///
/// Implementations must be safe to call concurrently for different namespaces.
#[async_trait]
pub trait WorkerNode: Send + Sync {
    /// Discovers the tunnel configuration already present in a namespace.
    ///
    /// Must be idempotent: it is called again when recovering a namespace whose state is unknown.
    async fn inspect(&self, netns_path: &Path) -> anyhow::Result<TunnelConfig>;

    /// Sets up the tunnel between the namespace and the given instance addresses.
    async fn setup(
        &self,
        netns_path: &Path,
        peer_ips: &[IpAddr],
        config: &TunnelConfig,
    ) -> anyhow::Result<()>;

    /// Tears down a tunnel previously set up with `config`.
    async fn teardown(&self, netns_path: &Path, config: &TunnelConfig) -> anyhow::Result<()>;
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for TunnelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vxlan => write!(f, "vxlan"),
            Self::Routing => write!(f, "routing"),
        }
    }
}

impl fmt::Display for TunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} (external via pod vm: {})",
            self.tunnel_type, self.index, self.external_net_via_pod_vm
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tunnel_config_serde() -> anyhow::Result<()> {
        let config = TunnelConfig::builder()
            .tunnel_type(TunnelType::Routing)
            .index(7)
            .build();

        let json = serde_json::to_value(&config)?;
        assert_eq!(json["tunnelType"], "routing");
        assert_eq!(json["index"], 7);
        assert_eq!(json["externalNetViaPodVm"], false);

        let back: TunnelConfig = serde_json::from_value(json)?;
        assert_eq!(back, config);
        assert_eq!(config.to_string(), "routing/7 (external via pod vm: false)");

        Ok(())
    }
}
