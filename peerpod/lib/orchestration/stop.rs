use std::io;

use tokio::fs;

use crate::{AnyError, PeerpodError, PeerpodResult, Stage};

use super::{
    sandbox::{SandboxResources, SandboxState},
    utils::bounded,
    Orchestrator, StopReport,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The outcome of releasing a set of sandbox resources.
pub(super) struct Released {
    pub(super) report: StopReport,

    /// The instance that could not be deleted, and why.
    pub(super) delete_failure: Option<(String, anyhow::Error)>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Orchestrator {
    /// Tears a sandbox down and forgets it.
    ///
    /// Accepts a sandbox in any state short of stopping. A CreateVM still in progress is abandoned
    /// first, and whatever it provisioned is released here.
    ///
    /// Shuts the agent proxy down (unblocking a concurrent StartVM), stops the secure tunnel,
    /// tears the pod network tunnel down, deletes the instance and removes the sandbox socket
    /// directory. Every step is attempted with its own `teardown_step_timeout_ms` bound whatever
    /// happened to the previous ones; the returned report says how each went.
    ///
    /// Only a failure to delete the instance fails the call, with
    /// [`Teardown`](PeerpodError::Teardown). The record is forgotten either way, so stopping the
    /// same sandbox again fails with [`NotFound`](PeerpodError::NotFound).
    pub async fn stop_vm(&self, sandbox_id: &str) -> PeerpodResult<StopReport> {
        let sandbox = self.get(sandbox_id).await?;

        let settled = {
            let mut record = sandbox.lock().await;
            match record.state {
                SandboxState::Stopping => {
                    return Err(PeerpodError::conflict(sandbox_id, "sandbox is already stopping"))
                }
                SandboxState::Stopped => return Err(PeerpodError::NotFound(sandbox_id.to_string())),
                _ => {}
            }

            tracing::info!(sandbox_id, state = %record.state, "stopping sandbox");
            let settled = (record.state == SandboxState::Creating).then(|| record.settled.clone());
            record.set_state(SandboxState::Stopping);
            record.stop.cancel();
            settled
        };

        // Once stop fires, CreateVM only runs bounded steps before it hands the record back.
        if let Some(settled) = settled {
            tracing::debug!(sandbox_id, "waiting for sandbox creation to give up");
            settled.wait().await;
        }

        let resources = sandbox.lock().await.take_resources();

        let released = self.release(sandbox_id, resources).await;

        sandbox.lock().await.set_state(SandboxState::Stopped);
        self.evict(sandbox_id, &sandbox).await;

        match released.delete_failure {
            Some((instance_id, e)) => {
                tracing::error!(sandbox_id, %instance_id, error = %format!("{e:#}"), "sandbox stopped but its instance was not deleted");
                Err(PeerpodError::Teardown {
                    sandbox_id: sandbox_id.to_string(),
                    instance_id,
                    source: AnyError::new(e),
                    report: Box::new(released.report),
                })
            }
            None => {
                if released.report.is_clean() {
                    tracing::info!(sandbox_id, "sandbox stopped");
                } else {
                    tracing::warn!(sandbox_id, report = %released.report, "sandbox stopped with degraded cleanup");
                }
                Ok(released.report)
            }
        }
    }

    /// Releases resources in reverse dependency order, attempting every step.
    pub(super) async fn release(&self, sandbox_id: &str, resources: SandboxResources) -> Released {
        let timeout = self.config.teardown_step_timeout();
        let mut report = StopReport::new(sandbox_id);
        let mut delete_failure = None;

        if let Some(proxy) = resources.proxy {
            report.record(Stage::ShutdownProxy, &proxy.shutdown(timeout).await);
        }

        if let Some(tunnel) = resources.secure_tunnel {
            report.record(
                Stage::StopSecureTunnel,
                &bounded(timeout, tunnel.stop()).await,
            );
        }

        if let Some(tunnel) = resources.tunnel {
            let torn_down = bounded(
                timeout,
                self.worker_node.teardown(&tunnel.netns_path, &tunnel.config),
            )
            .await;
            report.record(Stage::TeardownTunnel, &torn_down);
        }

        if let Some(instance) = resources.instance {
            let deleted = bounded(timeout, self.provider.delete_instance(instance.get_id())).await;
            report.record(Stage::DeleteInstance, &deleted);
            if let Err(e) = deleted {
                delete_failure = Some((instance.get_id().clone(), e));
            }
        }

        if let Some(sandbox_dir) = resources.sandbox_dir {
            let removed = bounded(timeout, async {
                match fs::remove_dir_all(&sandbox_dir).await {
                    Err(e) if e.kind() != io::ErrorKind::NotFound => Err(anyhow::Error::new(e)
                        .context(format!("failed to remove {}", sandbox_dir.display()))),
                    _ => Ok(()),
                }
            })
            .await;
            report.record(Stage::RemoveSocket, &removed);
        }

        Released {
            report,
            delete_failure,
        }
    }

    /// Stops every sandbox, then shuts the cloud provider down.
    ///
    /// Sandboxes are stopped concurrently. Returns the report of each sandbox that was stopped,
    /// including those whose instance could not be deleted.
    pub async fn shutdown(&self) -> PeerpodResult<Vec<StopReport>> {
        let sandbox_ids: Vec<String> = self.sandboxes.read().await.keys().cloned().collect();
        tracing::info!(sandboxes = sandbox_ids.len(), "shutting down orchestrator");

        let results =
            futures::future::join_all(sandbox_ids.iter().map(|id| self.stop_vm(id))).await;

        let mut reports = Vec::with_capacity(results.len());
        for (sandbox_id, result) in sandbox_ids.iter().zip(results) {
            match result {
                Ok(report) => reports.push(report),
                Err(PeerpodError::Teardown { report, .. }) => reports.push(*report),
                Err(e) => {
                    tracing::warn!(%sandbox_id, error = %e, "could not stop sandbox during shutdown")
                }
            }
        }

        self.provider
            .teardown()
            .map_err(|e| PeerpodError::ProviderTeardown(AnyError::new(e)))?;

        Ok(reports)
    }
}
