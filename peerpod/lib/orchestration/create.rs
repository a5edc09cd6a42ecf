use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::anyhow;
use getset::Getters;
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use crate::{
    cloud::{CloudConfig, DaemonConfig, Instance, InstanceTypeSpec},
    podnetwork::TunnelConfig,
    proxy::Readiness,
    utils::{self, PodAnnotations, GUEST_DAEMON_CONFIG_PATH, GUEST_INITDATA_PATH},
    PeerpodError, PeerpodResult, Stage,
};

use super::{
    sandbox::{ProxyHandle, Sandbox, SandboxState},
    utils::{bounded, Watchdog},
    Orchestrator,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A request to create the VM backing a sandbox.
#[derive(Debug, Clone, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct CreateVmRequest {
    /// The sandbox ID.
    #[builder(setter(into))]
    id: String,

    /// The pod sandbox annotations.
    #[builder(default)]
    annotations: HashMap<String, String>,

    /// The pod network namespace. Without one, no pod network tunnel is plumbed.
    #[builder(default, setter(strip_option, into))]
    network_namespace_path: Option<PathBuf>,
}

/// The result of creating a sandbox VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct CreateVmResponse {
    /// Where the agent proxy will listen once the sandbox is started.
    agent_socket_path: PathBuf,
}

/// What a successful provisioning leaves in the record.
struct Provisioned {
    instance: Instance,
    proxy: Arc<ProxyHandle>,
    tunnel_config: TunnelConfig,
}

/// Notifies a waiting StopVM when CreateVM is done with the record.
struct Settle(Readiness);

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Orchestrator {
    /// Creates the VM backing a sandbox.
    ///
    /// Inspects the pod network, builds the agent proxy, renders the guest configuration, creates
    /// the instance and allocates the sandbox socket directory. Fails with a conflict while any
    /// record for the ID exists.
    ///
    /// Firing `cancel` abandons the creation. If the provider is already creating the instance,
    /// the instance is deleted as soon as the provider returns it. A StopVM issued meanwhile
    /// abandons the creation the same way, and this returns [`Cancelled`](PeerpodError::Cancelled).
    pub async fn create_vm(
        &self,
        request: CreateVmRequest,
        cancel: CancellationToken,
    ) -> PeerpodResult<CreateVmResponse> {
        let sandbox_id = request.get_id().as_str();
        utils::validate_sandbox_id(sandbox_id)?;

        let annotations = PodAnnotations::from_map(request.get_annotations());
        let agent_socket_path = utils::agent_socket_path(self.config.get_pods_dir(), sandbox_id);

        let (sandbox, stop, settled) = {
            let mut sandboxes = self.sandboxes.write().await;
            if sandboxes.contains_key(sandbox_id) {
                return Err(PeerpodError::conflict(sandbox_id, "sandbox already exists"));
            }

            let record = Sandbox::new(
                sandbox_id,
                &annotations,
                request.get_network_namespace_path().clone(),
                agent_socket_path.clone(),
                utils::sandbox_dir(self.config.get_pods_dir(), sandbox_id),
            );
            let (stop, settled) = (record.stop.clone(), record.settled.clone());
            let sandbox = Arc::new(Mutex::new(record));
            sandboxes.insert(sandbox_id.to_string(), Arc::clone(&sandbox));
            (sandbox, stop, settled)
        };

        // Declared before the record guard, so a waiting StopVM only wakes once the record is
        // updated, and also when this future is dropped.
        let _settle = Settle(settled);

        tracing::info!(
            sandbox_id,
            pod_name = %annotations.get_pod_name(),
            pod_namespace = %annotations.get_pod_namespace(),
            "creating sandbox"
        );

        let watchdog = Watchdog::new(sandbox_id, cancel, stop);
        let netns_path = request.get_network_namespace_path().as_deref();
        let provisioned = self.provision(&watchdog, &annotations, netns_path).await;

        let mut record = sandbox.lock().await;

        if record.is_stopping() {
            tracing::info!(sandbox_id, "sandbox was stopped while being created");
            return match provisioned {
                // StopVM releases what was provisioned.
                Ok(provisioned) => {
                    record.instance = Some(provisioned.instance);
                    record.proxy = Some(provisioned.proxy);
                    record.tunnel_config = Some(provisioned.tunnel_config);
                    Err(watchdog.cancelled(Stage::AllocateSocket))
                }
                Err(e) => Err(e),
            };
        }

        match provisioned {
            Ok(provisioned) => {
                tracing::info!(
                    sandbox_id,
                    instance_id = %provisioned.instance.get_id(),
                    instance_name = %provisioned.instance.get_name(),
                    ips = ?provisioned.instance.get_ips(),
                    "sandbox created"
                );

                record.instance = Some(provisioned.instance);
                record.proxy = Some(provisioned.proxy);
                record.tunnel_config = Some(provisioned.tunnel_config);
                record.set_state(SandboxState::Created);

                Ok(CreateVmResponse { agent_socket_path })
            }
            Err(e) => {
                tracing::error!(sandbox_id, stage = ?e.stage(), error = %e, "failed to create sandbox");
                record.fail(&e);
                drop(record);

                self.evict(sandbox_id, &sandbox).await;
                Err(e)
            }
        }
    }

    /// Runs every CreateVM step up to and including instance creation.
    async fn provision(
        &self,
        watchdog: &Watchdog,
        annotations: &PodAnnotations,
        netns_path: Option<&Path>,
    ) -> PeerpodResult<Provisioned> {
        let sandbox_id = watchdog.sandbox_id();

        let tunnel_config = match netns_path {
            Some(netns_path) => watchdog
                .run(Stage::InspectTunnel, self.worker_node.inspect(netns_path))
                .await?
                .map_err(|e| PeerpodError::network_setup(sandbox_id, Stage::InspectTunnel, e))?,
            None => TunnelConfig::default(),
        };
        tracing::debug!(sandbox_id, tunnel = %tunnel_config, "pod network tunnel configuration");

        let spec = self.instance_spec(watchdog, annotations).await?;

        let instance_name = utils::generate_instance_name(
            self.config.get_podvm_name_prefix(),
            annotations.get_pod_name(),
            sandbox_id,
        );
        let agent_socket_path = utils::agent_socket_path(self.config.get_pods_dir(), sandbox_id);
        let proxy = self
            .proxy_factory
            .new_proxy(&instance_name, &agent_socket_path)
            .map_err(|e| PeerpodError::resource(sandbox_id, Stage::CreateProxy, e))?;
        let proxy = Arc::new(ProxyHandle::new(proxy));

        let provisioned = self
            .provision_instance(watchdog, annotations, &instance_name, &tunnel_config, &proxy, spec)
            .await;

        match provisioned {
            Ok(instance) => Ok(Provisioned {
                instance,
                proxy,
                tunnel_config,
            }),
            Err(e) => {
                if let Err(shutdown) = proxy.shutdown(self.config.teardown_step_timeout()).await {
                    tracing::warn!(sandbox_id, error = %format!("{shutdown:#}"), "failed to shut down unused agent proxy");
                }
                Err(e)
            }
        }
    }

    /// Creates the instance and the sandbox socket directory.
    async fn provision_instance(
        &self,
        watchdog: &Watchdog,
        annotations: &PodAnnotations,
        instance_name: &str,
        tunnel_config: &TunnelConfig,
        proxy: &ProxyHandle,
        spec: InstanceTypeSpec,
    ) -> PeerpodResult<Instance> {
        let sandbox_id = watchdog.sandbox_id();

        let cloud_config = self
            .guest_config(annotations, instance_name, tunnel_config, proxy)
            .map_err(|e| PeerpodError::resource(sandbox_id, Stage::GenerateGuestConfig, e))?;

        let provider = Arc::clone(&self.provider);
        let pod_name = annotations.get_pod_name().clone();
        let id = sandbox_id.to_string();
        let mut creating: JoinHandle<anyhow::Result<Instance>> = tokio::spawn(async move {
            provider
                .create_instance(&pod_name, &id, &cloud_config, &spec)
                .await
        });

        let created = match watchdog.run(Stage::CreateInstance, &mut creating).await {
            Ok(joined) => joined,
            Err(e) => {
                self.delete_when_created(sandbox_id, creating);
                return Err(e);
            }
        };

        let instance = created
            .map_err(|e| PeerpodError::provisioning(sandbox_id, Stage::CreateInstance, e))?
            .map_err(|e| PeerpodError::provisioning(sandbox_id, Stage::CreateInstance, e))?;

        if instance.get_ips().is_empty() {
            self.compensate(sandbox_id, &instance).await;
            return Err(PeerpodError::provisioning(
                sandbox_id,
                Stage::CreateInstance,
                anyhow!("instance {} has no addresses", instance.get_id()),
            ));
        }

        let sandbox_dir = utils::sandbox_dir(self.config.get_pods_dir(), sandbox_id);
        if let Err(e) = fs::create_dir_all(&sandbox_dir).await {
            self.compensate(sandbox_id, &instance).await;
            return Err(PeerpodError::resource(
                sandbox_id,
                Stage::AllocateSocket,
                anyhow::Error::new(e)
                    .context(format!("failed to create {}", sandbox_dir.display())),
            ));
        }

        Ok(instance)
    }

    /// Chooses the instance sizing from the annotations, falling back to the configured defaults.
    async fn instance_spec(
        &self,
        watchdog: &Watchdog,
        annotations: &PodAnnotations,
    ) -> PeerpodResult<InstanceTypeSpec> {
        let sandbox_id = watchdog.sandbox_id();
        let vcpus = annotations.get_vcpus().unwrap_or(*self.config.get_default_vcpus());
        let memory_mib = annotations
            .get_memory_mib()
            .unwrap_or(*self.config.get_default_memory_mib());

        let instance_type = match annotations.get_machine_type() {
            Some(machine_type) => machine_type.clone(),
            None => watchdog
                .run(
                    Stage::SelectInstanceType,
                    self.provider.select_instance_type(vcpus, memory_mib),
                )
                .await?
                .map_err(|e| PeerpodError::provisioning(sandbox_id, Stage::SelectInstanceType, e))?,
        };

        tracing::debug!(sandbox_id, %instance_type, vcpus, memory_mib, "selected instance type");

        let spec = InstanceTypeSpec::builder()
            .instance_type(instance_type)
            .vcpus(vcpus)
            .memory_mib(memory_mib);

        Ok(match annotations.get_image() {
            Some(image) => spec.image(image.clone()).build(),
            None => spec.build(),
        })
    }

    /// Renders the cloud-init document that configures the guest.
    fn guest_config(
        &self,
        annotations: &PodAnnotations,
        instance_name: &str,
        tunnel_config: &TunnelConfig,
        proxy: &ProxyHandle,
    ) -> anyhow::Result<CloudConfig> {
        let (tls_server_cert, tls_server_key) = match proxy.proxy().ca_service() {
            Some(ca) => {
                let issued = ca.issue(instance_name)?;
                (
                    Some(String::from_utf8(issued.cert_pem)?),
                    Some(String::from_utf8(issued.key_pem)?),
                )
            }
            None => (None, None),
        };

        let tls_client_ca = proxy
            .proxy()
            .client_ca()
            .map(String::from_utf8)
            .transpose()?;

        let daemon = DaemonConfig::builder()
            .pod_name(annotations.get_pod_name())
            .pod_namespace(annotations.get_pod_namespace())
            .pod_network(tunnel_config.clone())
            .forwarder_port(*self.config.get_forwarder_port())
            .tls_server_cert(tls_server_cert)
            .tls_server_key(tls_server_key)
            .tls_client_ca(tls_client_ca)
            .secure_comms(*self.config.get_secure_comms())
            .secure_comms_inbounds(self.config.get_secure_comms_pp_inbounds().clone())
            .secure_comms_outbounds(self.config.get_secure_comms_pp_outbounds().clone())
            .secure_comms_kbs_address(self.config.get_secure_comms_kbs_address().clone())
            .build();

        let mut cloud_config = CloudConfig::new();
        cloud_config.add_file(GUEST_DAEMON_CONFIG_PATH, daemon.to_json()?);
        if let Some(initdata) = annotations.get_initdata() {
            cloud_config.add_file(GUEST_INITDATA_PATH, initdata.clone());
        }

        Ok(cloud_config)
    }

    /// Deletes a freshly created instance the sandbox cannot use.
    async fn compensate(&self, sandbox_id: &str, instance: &Instance) {
        let instance_id = instance.get_id();
        tracing::warn!(sandbox_id, %instance_id, "deleting instance after failed creation");

        let deleted = bounded(
            self.config.teardown_step_timeout(),
            self.provider.delete_instance(instance_id),
        )
        .await;

        if let Err(e) = deleted {
            tracing::error!(sandbox_id, %instance_id, error = %format!("{e:#}"), "failed to delete instance, it may be orphaned");
        }
    }

    /// Deletes the instance of an abandoned creation once the provider returns it.
    fn delete_when_created(
        &self,
        sandbox_id: &str,
        creating: JoinHandle<anyhow::Result<Instance>>,
    ) {
        let provider = Arc::clone(&self.provider);
        let timeout = self.config.teardown_step_timeout();
        let sandbox_id = sandbox_id.to_string();

        tokio::spawn(async move {
            let instance = match creating.await {
                Ok(Ok(instance)) => instance,
                Ok(Err(e)) => {
                    tracing::debug!(%sandbox_id, error = %format!("{e:#}"), "abandoned instance creation failed");
                    return;
                }
                Err(e) => {
                    tracing::warn!(%sandbox_id, error = %e, "abandoned instance creation panicked");
                    return;
                }
            };

            let instance_id = instance.get_id();
            tracing::info!(%sandbox_id, %instance_id, "deleting instance of abandoned creation");
            if let Err(e) = bounded(timeout, provider.delete_instance(instance_id)).await {
                tracing::error!(%sandbox_id, %instance_id, error = %format!("{e:#}"), "failed to delete instance, it may be orphaned");
            }
        });
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for Settle {
    fn drop(&mut self) {
        self.0.notify();
    }
}
