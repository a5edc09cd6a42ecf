use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, RwLock};
use typed_builder::TypedBuilder;

use crate::{
    cloud::CloudProvider,
    config::OrchestratorConfig,
    podnetwork::WorkerNode,
    proxy::ProxyFactory,
    securecomms::{KbsClient, KeyBroker, SecretKey, SecureComms, Secrets},
    AnyError, PeerpodError, PeerpodResult,
};

use super::sandbox::Sandbox;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The sandbox lifecycle orchestrator.
///
/// Holds one record per sandbox ID and sequences [`create_vm`](Self::create_vm),
/// [`start_vm`](Self::start_vm) and [`stop_vm`](Self::stop_vm) against its collaborators.
///
/// The map of records is only locked to insert, look up or remove a record. Each record has its
/// own lock, held while its state changes but never across a collaborator call, so one slow
/// sandbox never stalls another.
pub struct Orchestrator {
    /// The cloud provider.
    pub(super) provider: Arc<dyn CloudProvider>,

    /// Builds one agent proxy per sandbox.
    pub(super) proxy_factory: Arc<dyn ProxyFactory>,

    /// The worker node side of the pod network.
    pub(super) worker_node: Arc<dyn WorkerNode>,

    /// The secure tunnel transport, when secure comms are enabled.
    pub(super) secure_comms: Option<Arc<dyn SecureComms>>,

    /// The key material the secure tunnel needs, when secure comms are enabled.
    pub(super) secrets: Option<Arc<Secrets>>,

    /// The configuration.
    pub(super) config: OrchestratorConfig,

    /// Sandbox records by ID.
    pub(super) sandboxes: RwLock<HashMap<String, Arc<Mutex<Sandbox>>>>,
}

/// The collaborators injected into an [`Orchestrator`].
#[derive(TypedBuilder)]
pub struct Collaborators {
    /// The cloud provider.
    provider: Arc<dyn CloudProvider>,

    /// Builds one agent proxy per sandbox.
    proxy_factory: Arc<dyn ProxyFactory>,

    /// The worker node side of the pod network.
    worker_node: Arc<dyn WorkerNode>,

    /// The secure tunnel transport. Required when secure comms are enabled.
    #[builder(default, setter(strip_option))]
    secure_comms: Option<Arc<dyn SecureComms>>,

    /// The key broker. When absent and a trustee is configured, a [`KbsClient`] for the configured
    /// address is used.
    #[builder(default, setter(strip_option))]
    key_broker: Option<Arc<dyn KeyBroker>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Orchestrator {
    /// Creates an orchestrator.
    ///
    /// Validates the configuration and runs the provider's configuration check once.
    pub fn new(collaborators: Collaborators, config: OrchestratorConfig) -> PeerpodResult<Self> {
        config.validate()?;

        collaborators
            .provider
            .config_verifier()
            .map_err(|e| PeerpodError::ConfigVerification(AnyError::new(e)))?;

        let (secure_comms, secrets) = if *config.get_secure_comms() {
            let secure_comms = collaborators.secure_comms.ok_or_else(|| {
                PeerpodError::InvalidConfig(
                    "secure comms are enabled but no secure comms transport was provided"
                        .to_string(),
                )
            })?;

            let address = config.get_secure_comms_kbs_address();
            let broker: Arc<dyn KeyBroker> = match (collaborators.key_broker, address) {
                (Some(broker), _) => broker,
                (None, Some(address)) if *config.get_secure_comms_trustee() => {
                    tracing::info!(kbs = %address, "using trustee key broker");
                    Arc::new(KbsClient::new(address))
                }
                _ => {
                    return Err(PeerpodError::InvalidConfig(
                        "secure comms are enabled but no key broker is available".to_string(),
                    ))
                }
            };

            let mut secrets = Secrets::new(broker);
            secrets
                .add_key(SecretKey::WorkloadPublicKey)
                .add_key(SecretKey::PairPrivateKey);

            (Some(secure_comms), Some(Arc::new(secrets)))
        } else {
            (None, None)
        };

        tracing::info!(
            pods_dir = %config.get_pods_dir().display(),
            secure_comms = *config.get_secure_comms(),
            "orchestrator ready"
        );

        Ok(Self {
            provider: collaborators.provider,
            proxy_factory: collaborators.proxy_factory,
            worker_node: collaborators.worker_node,
            secure_comms,
            secrets,
            config,
            sandboxes: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Looks up a record.
    pub(super) async fn get(&self, sandbox_id: &str) -> PeerpodResult<Arc<Mutex<Sandbox>>> {
        self.sandboxes
            .read()
            .await
            .get(sandbox_id)
            .cloned()
            .ok_or_else(|| PeerpodError::NotFound(sandbox_id.to_string()))
    }

    /// Removes a record, unless it has already been replaced.
    pub(super) async fn evict(&self, sandbox_id: &str, sandbox: &Arc<Mutex<Sandbox>>) {
        let mut sandboxes = self.sandboxes.write().await;
        if sandboxes
            .get(sandbox_id)
            .is_some_and(|current| Arc::ptr_eq(current, sandbox))
        {
            sandboxes.remove(sandbox_id);
            tracing::debug!(sandbox_id, "evicted sandbox record");
        }
    }
}
