use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::anyhow;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    cloud::Instance,
    podnetwork::TunnelConfig,
    securecomms::{SecureTunnel, TunnelRequest},
    PeerpodError, PeerpodResult, Stage,
};

use super::{
    sandbox::{ActiveTunnel, ProxyHandle, Sandbox, SandboxState},
    utils::{bounded, Watchdog},
    Orchestrator,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What StartVM reads from the record before it lets go of the lock.
struct StartPlan {
    instance: Instance,
    netns_path: Option<PathBuf>,
    tunnel_config: Option<TunnelConfig>,
    proxy: Arc<ProxyHandle>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Orchestrator {
    /// Brings a created sandbox up.
    ///
    /// Sets up the pod network tunnel, opens the secure tunnel when secure comms are enabled, and
    /// starts the agent proxy. Returns only once the proxy reports ready. A single deadline of
    /// `proxy_ready_timeout_ms` bounds all of it.
    ///
    /// On failure, timeout or cancellation, whatever was brought up is torn down again and the
    /// sandbox is marked failed; the instance is kept unless `delete_instance_on_start_failure` is
    /// set. If StopVM takes the sandbox over meanwhile, this returns
    /// [`Cancelled`](PeerpodError::Cancelled) and leaves the cleanup to StopVM.
    pub async fn start_vm(&self, sandbox_id: &str, cancel: CancellationToken) -> PeerpodResult<()> {
        let sandbox = self.get(sandbox_id).await?;

        let (plan, stop) = {
            let mut record = sandbox.lock().await;
            if record.state != SandboxState::Created {
                return Err(PeerpodError::conflict(
                    sandbox_id,
                    format!("cannot start a sandbox that is {}", record.state),
                ));
            }

            let (Some(instance), Some(proxy)) = (record.instance.clone(), record.proxy.clone())
            else {
                return Err(PeerpodError::conflict(
                    sandbox_id,
                    "sandbox holds no instance or proxy",
                ));
            };

            record.set_state(SandboxState::Starting);
            let plan = StartPlan {
                instance,
                netns_path: record.netns_path.clone(),
                tunnel_config: record.tunnel_config.clone(),
                proxy,
            };

            (plan, record.stop.clone())
        };

        tracing::info!(sandbox_id, instance_id = %plan.instance.get_id(), "starting sandbox");

        let watchdog = Watchdog::new(sandbox_id, cancel, stop)
            .with_timeout(self.config.proxy_ready_timeout());

        let started = self.bring_up(&sandbox, &watchdog, plan).await;

        let mut record = sandbox.lock().await;
        if record.is_stopping() {
            let stage = match &started {
                Ok(()) => Stage::ProxyReady,
                Err(e) => e.stage().unwrap_or(Stage::ProxyReady),
            };
            tracing::info!(sandbox_id, %stage, "sandbox was stopped while starting");
            return Err(watchdog.cancelled(stage));
        }

        match started {
            Ok(()) => {
                record.set_state(SandboxState::Ready);
                tracing::info!(sandbox_id, socket = %record.agent_socket_path.display(), "sandbox ready");
                Ok(())
            }
            Err(e) => {
                tracing::error!(sandbox_id, stage = ?e.stage(), error = %e, "failed to start sandbox");
                record.fail(&e);
                drop(record);

                self.roll_back_start(sandbox_id, &sandbox).await;
                Err(e)
            }
        }
    }

    /// Runs every StartVM step. Each resource is stored in the record as soon as it exists, so that
    /// a concurrent StopVM sees it.
    async fn bring_up(
        &self,
        sandbox: &Mutex<Sandbox>,
        watchdog: &Watchdog,
        plan: StartPlan,
    ) -> PeerpodResult<()> {
        let sandbox_id = watchdog.sandbox_id();

        if let Some(netns_path) = plan.netns_path {
            let config = match plan.tunnel_config {
                Some(config) => config,
                None => watchdog
                    .run(Stage::InspectTunnel, self.worker_node.inspect(&netns_path))
                    .await?
                    .map_err(|e| PeerpodError::network_setup(sandbox_id, Stage::InspectTunnel, e))?,
            };

            // The configuration is recorded before setup so that teardown always gets the same
            // parameters, even after a partial setup.
            {
                let mut record = sandbox.lock().await;
                if record.is_stopping() {
                    return Err(watchdog.cancelled(Stage::SetupTunnel));
                }
                record.tunnel_config = Some(config.clone());
                record.active_tunnel = Some(ActiveTunnel {
                    netns_path: netns_path.clone(),
                    config: config.clone(),
                });
            }

            tracing::debug!(sandbox_id, netns = %netns_path.display(), tunnel = %config, "setting up pod network tunnel");
            watchdog
                .run(
                    Stage::SetupTunnel,
                    self.worker_node
                        .setup(&netns_path, plan.instance.get_ips(), &config),
                )
                .await?
                .map_err(|e| PeerpodError::network_setup(sandbox_id, Stage::SetupTunnel, e))?;
        }

        let primary_ip = plan.instance.primary_ip().ok_or_else(|| {
            PeerpodError::provisioning(
                sandbox_id,
                Stage::CreateInstance,
                anyhow!("instance {} has no addresses", plan.instance.get_id()),
            )
        })?;

        let target = match (&self.secure_comms, &self.secrets) {
            (Some(secure_comms), Some(secrets)) => {
                let keys = watchdog
                    .run(Stage::RetrieveKeys, secrets.fetch())
                    .await?
                    .map_err(|e| PeerpodError::secure_comms(sandbox_id, Stage::RetrieveKeys, e))?;

                let request = TunnelRequest::builder()
                    .sandbox_id(sandbox_id)
                    .peer(SocketAddr::new(primary_ip, *self.config.get_secure_comms_ssh_port()))
                    .keys(keys)
                    .inbounds(self.config.get_secure_comms_inbounds().clone())
                    .outbounds(self.config.get_secure_comms_outbounds().clone())
                    .build();

                let tunnel = watchdog
                    .run(
                        Stage::StartSecureTunnel,
                        secure_comms.open(request, watchdog.child_token()),
                    )
                    .await?
                    .map_err(|e| {
                        PeerpodError::secure_comms(sandbox_id, Stage::StartSecureTunnel, e)
                    })?;

                self.keep_secure_tunnel(sandbox, watchdog, &tunnel).await?;

                watchdog
                    .run(Stage::SecureTunnelReady, tunnel.readiness().wait())
                    .await?;

                let endpoint = tunnel.agent_endpoint();
                tracing::info!(sandbox_id, %endpoint, "secure tunnel ready");
                endpoint
            }
            _ => SocketAddr::new(primary_ip, *self.config.get_forwarder_port()),
        };

        tracing::debug!(sandbox_id, %target, "starting agent proxy");
        let exited = plan.proxy.spawn(target).await;
        let readiness = plan.proxy.readiness();

        watchdog
            .run(Stage::ProxyReady, async {
                tokio::select! {
                    biased;
                    _ = readiness.wait() => Ok(()),
                    result = exited => Err(match result {
                        Ok(Ok(())) => anyhow!("agent proxy exited before becoming ready"),
                        Ok(Err(e)) => e,
                        Err(_) => anyhow!("agent proxy task ended unexpectedly"),
                    }),
                }
            })
            .await?
            .map_err(|e| PeerpodError::resource(sandbox_id, Stage::StartProxy, e))
    }

    /// Stores the secure tunnel in the record, or stops it if StopVM already took over.
    async fn keep_secure_tunnel(
        &self,
        sandbox: &Mutex<Sandbox>,
        watchdog: &Watchdog,
        tunnel: &Arc<dyn SecureTunnel>,
    ) -> PeerpodResult<()> {
        let mut record = sandbox.lock().await;
        if !record.is_stopping() {
            record.secure_tunnel = Some(Arc::clone(tunnel));
            return Ok(());
        }
        drop(record);

        if let Err(e) = bounded(self.config.teardown_step_timeout(), tunnel.stop()).await {
            tracing::warn!(sandbox_id = %watchdog.sandbox_id(), error = %format!("{e:#}"), "failed to stop secure tunnel");
        }

        Err(watchdog.cancelled(Stage::StartSecureTunnel))
    }

    /// Releases what a failed StartVM brought up.
    ///
    /// An instance that could not be deleted goes back into the record, so that StopVM deletes it
    /// again and reports the failure.
    async fn roll_back_start(&self, sandbox_id: &str, sandbox: &Mutex<Sandbox>) {
        let resources = sandbox
            .lock()
            .await
            .take_start_resources(*self.config.get_delete_instance_on_start_failure());
        let instance = resources.instance.clone();

        let released = self.release(sandbox_id, resources).await;
        if released.report.is_clean() {
            tracing::info!(sandbox_id, "rolled back failed start");
        } else {
            tracing::warn!(sandbox_id, report = %released.report, "rolled back failed start with errors");
        }

        if let (Some((instance_id, _)), Some(instance)) = (released.delete_failure, instance) {
            let mut record = sandbox.lock().await;
            if record.is_stopping() {
                tracing::error!(sandbox_id, %instance_id, "sandbox stopped during rollback, instance may be orphaned");
            } else {
                tracing::warn!(sandbox_id, %instance_id, "instance kept for StopVM to delete");
                record.instance = Some(instance);
            }
        }
    }
}
