use crate::PeerpodResult;

use super::{Orchestrator, SandboxStatus};

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Orchestrator {
    /// Returns a snapshot of one sandbox.
    pub async fn status(&self, sandbox_id: &str) -> PeerpodResult<SandboxStatus> {
        let sandbox = self.get(sandbox_id).await?;
        let status = sandbox.lock().await.status();
        Ok(status)
    }

    /// Returns a snapshot of every sandbox, ordered by ID.
    ///
    /// The map lock is released before any record is locked.
    pub async fn list(&self) -> Vec<SandboxStatus> {
        let sandboxes: Vec<_> = self.sandboxes.read().await.values().cloned().collect();

        let mut statuses = Vec::with_capacity(sandboxes.len());
        for sandbox in sandboxes {
            statuses.push(sandbox.lock().await.status());
        }

        statuses.sort_by(|a, b| a.get_id().cmp(b.get_id()));
        statuses
    }
}
