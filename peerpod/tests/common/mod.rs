#![allow(dead_code)]

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use peerpod::{
    cloud::{CloudConfig, CloudProvider, Instance, InstanceTypeSpec},
    config::OrchestratorConfig,
    orchestration::{Collaborators, CreateVmRequest, Orchestrator},
    podnetwork::{TunnelConfig, TunnelType, WorkerNode},
    proxy::{AgentProxy, CaService, IssuedCertificate, ProxyFactory, Readiness},
    securecomms::{KeyBroker, SecretKey, SecureComms, SecureTunnel, TunnelRequest},
    utils::{SANDBOX_NAMESPACE_ANNOTATION, SANDBOX_NAME_ANNOTATION},
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

pub const NETNS_PATH: &str = "/var/run/netns/cni-test";

pub const SECURE_TUNNEL_ENDPOINT: &str = "127.0.0.1:7111";

//--------------------------------------------------------------------------------------------------
// Types: Cloud Provider
//--------------------------------------------------------------------------------------------------

pub struct MockProvider {
    pub ips: Mutex<Vec<IpAddr>>,
    pub create_delay: Mutex<Duration>,
    pub fail_create: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_verifier: AtomicBool,
    pub create_calls: AtomicUsize,
    pub select_calls: AtomicUsize,
    pub teardown_calls: AtomicUsize,
    pub deleted: Mutex<Vec<String>>,
    pub cloud_configs: Mutex<Vec<CloudConfig>>,
    pub specs: Mutex<Vec<InstanceTypeSpec>>,
}

#[async_trait]
impl CloudProvider for MockProvider {
    async fn create_instance(
        &self,
        pod_name: &str,
        sandbox_id: &str,
        cloud_config: &CloudConfig,
        spec: &InstanceTypeSpec,
    ) -> anyhow::Result<Instance> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.cloud_configs.lock().unwrap().push(cloud_config.clone());
        self.specs.lock().unwrap().push(spec.clone());

        let delay = *self.create_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_create.load(Ordering::SeqCst) {
            anyhow::bail!("quota exceeded");
        }

        let short_id: String = sandbox_id.chars().take(8).collect();
        Ok(Instance::new(
            format!("podvm-{pod_name}-{short_id}"),
            format!("{pod_name}-{short_id}"),
            self.ips.lock().unwrap().clone(),
        ))
    }

    async fn delete_instance(&self, instance_id: &str) -> anyhow::Result<()> {
        self.deleted.lock().unwrap().push(instance_id.to_string());
        if self.fail_delete.load(Ordering::SeqCst) {
            anyhow::bail!("instance {instance_id} is locked");
        }
        Ok(())
    }

    async fn select_instance_type(&self, vcpus: u32, memory_mib: u32) -> anyhow::Result<String> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("type-{vcpus}-{memory_mib}"))
    }

    fn config_verifier(&self) -> anyhow::Result<()> {
        if self.fail_verifier.load(Ordering::SeqCst) {
            anyhow::bail!("missing credentials");
        }
        Ok(())
    }

    fn teardown(&self) -> anyhow::Result<()> {
        self.teardown_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl MockProvider {
    pub fn delete_calls(&self) -> usize {
        self.deleted.lock().unwrap().len()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            ips: Mutex::new(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]),
            create_delay: Mutex::new(Duration::ZERO),
            fail_create: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fail_verifier: AtomicBool::new(false),
            create_calls: AtomicUsize::new(0),
            select_calls: AtomicUsize::new(0),
            teardown_calls: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
            cloud_configs: Mutex::new(Vec::new()),
            specs: Mutex::new(Vec::new()),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Types: Agent Proxy
//--------------------------------------------------------------------------------------------------

/// How mock proxies behave once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyBehavior {
    /// Signal readiness, then block until shut down.
    Ready,

    /// Block until shut down without ever signaling readiness.
    NeverReady,

    /// Fail right away.
    FailStart,
}

pub struct MockProxyFactory {
    pub behavior: Mutex<ProxyBehavior>,
    pub tls: AtomicBool,
    pub proxies: Mutex<Vec<Arc<MockProxy>>>,
}

pub struct MockProxy {
    pub server_name: String,
    pub socket_path: PathBuf,
    pub behavior: ProxyBehavior,
    pub tls: bool,
    pub readiness: Readiness,
    pub stop: CancellationToken,
    pub targets: Mutex<Vec<SocketAddr>>,
    pub shutdowns: AtomicUsize,
}

impl ProxyFactory for MockProxyFactory {
    fn new_proxy(
        &self,
        server_name: &str,
        socket_path: &Path,
    ) -> anyhow::Result<Arc<dyn AgentProxy>> {
        let proxy = Arc::new(MockProxy {
            server_name: server_name.to_string(),
            socket_path: socket_path.to_path_buf(),
            behavior: *self.behavior.lock().unwrap(),
            tls: self.tls.load(Ordering::SeqCst),
            readiness: Readiness::new(),
            stop: CancellationToken::new(),
            targets: Mutex::new(Vec::new()),
            shutdowns: AtomicUsize::new(0),
        });
        self.proxies.lock().unwrap().push(Arc::clone(&proxy));
        Ok(proxy)
    }
}

#[async_trait]
impl AgentProxy for MockProxy {
    async fn start(&self, target: SocketAddr, cancel: CancellationToken) -> anyhow::Result<()> {
        self.targets.lock().unwrap().push(target);
        match self.behavior {
            ProxyBehavior::FailStart => anyhow::bail!("address already in use"),
            ProxyBehavior::Ready => {
                self.readiness.notify();
            }
            ProxyBehavior::NeverReady => {}
        }

        tokio::select! {
            _ = self.stop.cancelled() => {}
            _ = cancel.cancelled() => {}
        }
        Ok(())
    }

    fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.stop.cancel();
        Ok(())
    }

    fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn client_ca(&self) -> Option<Vec<u8>> {
        self.tls.then(|| b"CLIENT CA".to_vec())
    }

    fn ca_service(&self) -> Option<Arc<dyn CaService>> {
        if self.tls {
            Some(Arc::new(MockCa))
        } else {
            None
        }
    }
}

/// Issues placeholder certificates naming the server.
pub struct MockCa;

impl CaService for MockCa {
    fn issue(&self, server_name: &str) -> anyhow::Result<IssuedCertificate> {
        Ok(IssuedCertificate {
            cert_pem: format!("CERT {server_name}").into_bytes(),
            key_pem: format!("KEY {server_name}").into_bytes(),
        })
    }
}

impl MockProxyFactory {
    pub fn set_behavior(&self, behavior: ProxyBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn created(&self) -> usize {
        self.proxies.lock().unwrap().len()
    }

    pub fn last(&self) -> Arc<MockProxy> {
        Arc::clone(self.proxies.lock().unwrap().last().unwrap())
    }
}

impl MockProxy {
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn targets(&self) -> Vec<SocketAddr> {
        self.targets.lock().unwrap().clone()
    }
}

impl Default for MockProxyFactory {
    fn default() -> Self {
        Self {
            behavior: Mutex::new(ProxyBehavior::Ready),
            tls: AtomicBool::new(false),
            proxies: Mutex::new(Vec::new()),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Types: Worker Node
//--------------------------------------------------------------------------------------------------

pub struct MockWorkerNode {
    pub inspected: TunnelConfig,
    pub fail_setup: AtomicBool,
    pub fail_teardown: AtomicBool,
    pub inspect_calls: AtomicUsize,
    pub setups: Mutex<Vec<(PathBuf, Vec<IpAddr>, TunnelConfig)>>,
    pub teardowns: Mutex<Vec<(PathBuf, TunnelConfig)>>,
}

#[async_trait]
impl WorkerNode for MockWorkerNode {
    async fn inspect(&self, _netns_path: &Path) -> anyhow::Result<TunnelConfig> {
        self.inspect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.inspected.clone())
    }

    async fn setup(
        &self,
        netns_path: &Path,
        peer_ips: &[IpAddr],
        config: &TunnelConfig,
    ) -> anyhow::Result<()> {
        self.setups
            .lock()
            .unwrap()
            .push((netns_path.to_path_buf(), peer_ips.to_vec(), config.clone()));
        if self.fail_setup.load(Ordering::SeqCst) {
            anyhow::bail!("vxlan device exists");
        }
        Ok(())
    }

    async fn teardown(&self, netns_path: &Path, config: &TunnelConfig) -> anyhow::Result<()> {
        self.teardowns
            .lock()
            .unwrap()
            .push((netns_path.to_path_buf(), config.clone()));
        if self.fail_teardown.load(Ordering::SeqCst) {
            anyhow::bail!("netns is gone");
        }
        Ok(())
    }
}

impl MockWorkerNode {
    pub fn setup_calls(&self) -> usize {
        self.setups.lock().unwrap().len()
    }

    pub fn teardown_calls(&self) -> usize {
        self.teardowns.lock().unwrap().len()
    }
}

impl Default for MockWorkerNode {
    fn default() -> Self {
        Self {
            inspected: TunnelConfig::builder()
                .tunnel_type(TunnelType::Vxlan)
                .index(7)
                .build(),
            fail_setup: AtomicBool::new(false),
            fail_teardown: AtomicBool::new(false),
            inspect_calls: AtomicUsize::new(0),
            setups: Mutex::new(Vec::new()),
            teardowns: Mutex::new(Vec::new()),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Types: Secure Comms
//--------------------------------------------------------------------------------------------------

pub struct MockSecureComms {
    pub ready: AtomicBool,
    pub requests: Mutex<Vec<TunnelRequest>>,
    pub tunnels: Mutex<Vec<Arc<MockTunnel>>>,
}

pub struct MockTunnel {
    pub readiness: Readiness,
    pub stops: AtomicUsize,
}

#[async_trait]
impl SecureComms for MockSecureComms {
    async fn open(
        &self,
        request: TunnelRequest,
        _cancel: CancellationToken,
    ) -> anyhow::Result<Arc<dyn SecureTunnel>> {
        self.requests.lock().unwrap().push(request);

        let tunnel = Arc::new(MockTunnel {
            readiness: Readiness::new(),
            stops: AtomicUsize::new(0),
        });
        if self.ready.load(Ordering::SeqCst) {
            tunnel.readiness.notify();
        }

        self.tunnels.lock().unwrap().push(Arc::clone(&tunnel));
        Ok(tunnel)
    }
}

#[async_trait]
impl SecureTunnel for MockTunnel {
    fn agent_endpoint(&self) -> SocketAddr {
        SECURE_TUNNEL_ENDPOINT.parse().unwrap()
    }

    fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl MockSecureComms {
    pub fn opened(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_tunnel(&self) -> Arc<MockTunnel> {
        Arc::clone(self.tunnels.lock().unwrap().last().unwrap())
    }
}

impl Default for MockSecureComms {
    fn default() -> Self {
        Self {
            ready: AtomicBool::new(true),
            requests: Mutex::new(Vec::new()),
            tunnels: Mutex::new(Vec::new()),
        }
    }
}

#[derive(Default)]
pub struct MockKeyBroker {
    pub fail: AtomicBool,
    pub requested: Mutex<Vec<SecretKey>>,
}

#[async_trait]
impl KeyBroker for MockKeyBroker {
    async fn get_key(&self, key: &SecretKey) -> anyhow::Result<Vec<u8>> {
        self.requested.lock().unwrap().push(key.clone());
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("key broker unreachable");
        }
        Ok(format!("secret for {key}").into_bytes())
    }
}

impl MockKeyBroker {
    pub fn requested(&self) -> Vec<SecretKey> {
        self.requested.lock().unwrap().clone()
    }
}

//--------------------------------------------------------------------------------------------------
// Types: Harness
//--------------------------------------------------------------------------------------------------

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub provider: Arc<MockProvider>,
    pub proxies: Arc<MockProxyFactory>,
    pub worker: Arc<MockWorkerNode>,
    pub secure_comms: Arc<MockSecureComms>,
    pub broker: Arc<MockKeyBroker>,
    pub pods_dir: TempDir,
}

impl Harness {
    /// A harness with secure comms disabled and short timeouts.
    pub fn new() -> anyhow::Result<Self> {
        Self::with_config(test_config)
    }

    pub fn with_config(
        config: impl FnOnce(PathBuf) -> OrchestratorConfig,
    ) -> anyhow::Result<Self> {
        Self::with_mocks(
            config,
            MockProvider::default(),
            MockProxyFactory::default(),
            MockWorkerNode::default(),
        )
    }

    pub fn with_mocks(
        config: impl FnOnce(PathBuf) -> OrchestratorConfig,
        provider: MockProvider,
        proxies: MockProxyFactory,
        worker: MockWorkerNode,
    ) -> anyhow::Result<Self> {
        let pods_dir = tempfile::tempdir()?;
        let provider = Arc::new(provider);
        let proxies = Arc::new(proxies);
        let worker = Arc::new(worker);
        let secure_comms = Arc::new(MockSecureComms::default());
        let broker = Arc::new(MockKeyBroker::default());

        let collaborators = Collaborators::builder()
            .provider(provider.clone())
            .proxy_factory(proxies.clone())
            .worker_node(worker.clone())
            .secure_comms(secure_comms.clone())
            .key_broker(broker.clone())
            .build();

        let orchestrator =
            Orchestrator::new(collaborators, config(pods_dir.path().to_path_buf()))?;

        Ok(Self {
            orchestrator,
            provider,
            proxies,
            worker,
            secure_comms,
            broker,
            pods_dir,
        })
    }

    pub fn pods_dir(&self) -> &Path {
        self.pods_dir.path()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// A config with secure comms disabled and short timeouts.
pub fn test_config(pods_dir: PathBuf) -> OrchestratorConfig {
    OrchestratorConfig::builder()
        .pods_dir(pods_dir)
        .proxy_ready_timeout_ms(5_000)
        .teardown_step_timeout_ms(1_000)
        .build()
}

/// A CreateVM request for pod `default/mypod` with a pod network namespace.
pub fn request(sandbox_id: &str) -> CreateVmRequest {
    CreateVmRequest::builder()
        .id(sandbox_id)
        .annotations(annotations(&[]))
        .network_namespace_path(NETNS_PATH)
        .build()
}

/// Pod annotations for `default/mypod` plus `extra`.
pub fn annotations(extra: &[(&str, &str)]) -> HashMap<String, String> {
    let mut annotations = HashMap::from([
        (SANDBOX_NAME_ANNOTATION.to_string(), "mypod".to_string()),
        (SANDBOX_NAMESPACE_ANNOTATION.to_string(), "default".to_string()),
    ]);
    for (key, value) in extra {
        annotations.insert(key.to_string(), value.to_string());
    }
    annotations
}
