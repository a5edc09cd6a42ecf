use std::{future::Future, time::Duration};

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::{PeerpodError, PeerpodResult, Stage};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Bounds the waits of one lifecycle operation.
///
/// Every wait ends early when the caller cancels, when StopVM takes the sandbox over, or when the
/// operation's deadline passes.
pub(super) struct Watchdog {
    sandbox_id: String,
    cancel: CancellationToken,
    stop: CancellationToken,
    deadline: Option<(Instant, Duration)>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Watchdog {
    /// Creates a watchdog with no deadline.
    pub(super) fn new(
        sandbox_id: impl Into<String>,
        cancel: CancellationToken,
        stop: CancellationToken,
    ) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            cancel,
            stop,
            deadline: None,
        }
    }

    /// Bounds every wait by a single deadline `timeout` from now.
    pub(super) fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some((Instant::now() + timeout, timeout));
        self
    }

    pub(super) fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    /// Returns a token fired when StopVM takes the sandbox over.
    pub(super) fn child_token(&self) -> CancellationToken {
        self.stop.child_token()
    }

    /// Awaits `future` unless the operation is interrupted first.
    pub(super) async fn run<F>(&self, stage: Stage, future: F) -> PeerpodResult<F::Output>
    where
        F: Future,
    {
        let deadline = async {
            match self.deadline {
                Some((at, _)) => time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.stop.cancelled() => Err(self.cancelled(stage)),
            _ = self.cancel.cancelled() => Err(self.cancelled(stage)),
            output = future => Ok(output),
            _ = deadline => Err(self.timed_out(stage)),
        }
    }

    pub(super) fn cancelled(&self, stage: Stage) -> PeerpodError {
        PeerpodError::Cancelled {
            sandbox_id: self.sandbox_id.clone(),
            stage,
        }
    }

    fn timed_out(&self, stage: Stage) -> PeerpodError {
        PeerpodError::Timeout {
            sandbox_id: self.sandbox_id.clone(),
            stage,
            timeout: self.deadline.map(|(_, timeout)| timeout).unwrap_or_default(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Awaits a cleanup step for at most `timeout`.
pub(super) async fn bounded<F>(timeout: Duration, step: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match time::timeout(timeout, step).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("timed out after {timeout:?}")),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
