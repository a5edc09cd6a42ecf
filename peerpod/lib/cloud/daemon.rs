use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{podnetwork::TunnelConfig, securecomms::ForwardingRule, PeerpodResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The configuration of the forwarder daemon running inside the guest.
///
/// Shipped to the instance as JSON through the cloud-init document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters)]
#[serde(rename_all = "camelCase")]
#[getset(get = "pub with_prefix")]
pub struct DaemonConfig {
    /// The pod name.
    #[builder(setter(into))]
    pod_name: String,

    /// The pod namespace.
    #[builder(setter(into))]
    pod_namespace: String,

    /// The guest side of the pod network tunnel.
    pod_network: TunnelConfig,

    /// The port the forwarder listens on for agent traffic.
    forwarder_port: u16,

    /// The PEM server certificate the forwarder presents.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    tls_server_cert: Option<String>,

    /// The PEM private key of the server certificate.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    tls_server_key: Option<String>,

    /// The PEM CA the forwarder verifies clients against.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    tls_client_ca: Option<String>,

    /// Whether agent traffic arrives through the secure tunnel.
    #[builder(default)]
    secure_comms: bool,

    /// Guest-side inbound forwarding rules.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    secure_comms_inbounds: Vec<ForwardingRule>,

    /// Guest-side outbound forwarding rules.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    secure_comms_outbounds: Vec<ForwardingRule>,

    /// The key broker endpoint the guest attests against.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    secure_comms_kbs_address: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DaemonConfig {
    /// Serializes the configuration as pretty JSON.
    pub fn to_json(&self) -> PeerpodResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_config_json_shape() -> anyhow::Result<()> {
        let config = DaemonConfig::builder()
            .pod_name("mypod")
            .pod_namespace("default")
            .pod_network(TunnelConfig::default())
            .forwarder_port(15150)
            .secure_comms(true)
            .secure_comms_inbounds(vec!["RUNTIME_PHASE:KATAAGENT:127.0.0.1:7111".parse()?])
            .build();

        let json: serde_json::Value = serde_json::from_str(&config.to_json()?)?;
        assert_eq!(json["podName"], "mypod");
        assert_eq!(json["podNamespace"], "default");
        assert_eq!(json["forwarderPort"], 15150);
        assert_eq!(json["secureComms"], true);
        assert_eq!(
            json["secureCommsInbounds"][0],
            "RUNTIME_PHASE:KATAAGENT:127.0.0.1:7111"
        );
        assert!(json.get("tlsServerCert").is_none());

        Ok(())
    }
}
