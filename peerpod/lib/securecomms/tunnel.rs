use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use getset::Getters;
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use super::{ForwardingRule, KeyMaterial};
use crate::proxy::Readiness;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Everything needed to open a secure tunnel to one sandbox's instance.
#[derive(Debug, Clone, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct TunnelRequest {
    /// The sandbox the tunnel belongs to.
    #[builder(setter(into))]
    sandbox_id: String,

    /// The guest's SSH endpoint.
    peer: SocketAddr,

    /// The key material authenticating both ends.
    keys: KeyMaterial,

    /// Rules for traffic entering the tunnel from the host.
    #[builder(default)]
    inbounds: Vec<ForwardingRule>,

    /// Rules for traffic leaving the tunnel towards the host.
    #[builder(default)]
    outbounds: Vec<ForwardingRule>,
}

/// The secure-comms transport: an SSH-based tunnel carrying agent traffic end to end.
#[async_trait]
pub trait SecureComms: Send + Sync {
    /// Opens a tunnel to the guest.
    ///
    /// Returns once the tunnel is started; it is usable once its [`Readiness`] is fulfilled.
    /// Firing `cancel` aborts the tunnel.
    async fn open(
        &self,
        request: TunnelRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<Arc<dyn SecureTunnel>>;
}

/// An open secure tunnel.
#[async_trait]
pub trait SecureTunnel: Send + Sync {
    /// Returns the local endpoint forwarding to the guest agent.
    fn agent_endpoint(&self) -> SocketAddr;

    /// Returns the notification fulfilled once the tunnel carries traffic.
    fn readiness(&self) -> Readiness;

    /// Stops the tunnel. Must be idempotent.
    async fn stop(&self) -> anyhow::Result<()>;
}
