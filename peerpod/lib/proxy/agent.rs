use std::{net::SocketAddr, path::Path, sync::Arc};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::Readiness;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A proxy between a local socket and the agent running in a sandbox's instance.
#[async_trait]
pub trait AgentProxy: Send + Sync {
    /// Runs the proxy, forwarding local connections to `target`.
    ///
    /// Blocks until [`shutdown`](Self::shutdown) is called or `cancel` fires. The proxy's
    /// [`Readiness`] must be fulfilled once the local socket accepts connections.
    async fn start(&self, target: SocketAddr, cancel: CancellationToken) -> anyhow::Result<()>;

    /// Returns the readiness notification fulfilled by [`start`](Self::start).
    fn readiness(&self) -> Readiness;

    /// Stops the proxy and unblocks [`start`](Self::start).
    ///
    /// Must be safe to call before `start`, after readiness fired, or after `start` returned.
    async fn shutdown(&self) -> anyhow::Result<()>;

    /// Returns the local socket path.
    fn socket_path(&self) -> &Path;

    /// Returns the PEM CA certificate clients are verified against, when the proxy uses mutual TLS.
    fn client_ca(&self) -> Option<Vec<u8>> {
        None
    }

    /// Returns the CA that issues the guest forwarder's server certificate, when the proxy uses TLS.
    fn ca_service(&self) -> Option<Arc<dyn CaService>> {
        None
    }
}

/// Builds one agent proxy per sandbox.
pub trait ProxyFactory: Send + Sync {
    /// Creates a proxy that will listen on `socket_path` and expects the guest to present
    /// `server_name`.
    fn new_proxy(&self, server_name: &str, socket_path: &Path)
        -> anyhow::Result<Arc<dyn AgentProxy>>;
}

/// A certificate authority issuing guest server certificates.
pub trait CaService: Send + Sync {
    /// Issues a server certificate for `server_name`.
    fn issue(&self, server_name: &str) -> anyhow::Result<IssuedCertificate>;
}

/// A PEM certificate and its private key.
#[derive(Clone)]
pub struct IssuedCertificate {
    /// The PEM certificate.
    pub cert_pem: Vec<u8>,

    /// The PEM private key.
    pub key_pem: Vec<u8>,
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("cert_pem", &String::from_utf8_lossy(&self.cert_pem))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}
