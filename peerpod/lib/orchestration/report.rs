use std::fmt;

use getset::Getters;
use serde::{Deserialize, Serialize};

use crate::Stage;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The outcome of tearing a sandbox down.
///
/// Every applicable cleanup step is attempted regardless of earlier failures. A step shows up
/// either in `completed` or in `failures`; steps that did not apply (nothing to release) show up
/// in neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct StopReport {
    /// The sandbox that was stopped.
    sandbox_id: String,

    /// The steps that succeeded, in order.
    completed: Vec<Stage>,

    /// The steps that failed, in order.
    failures: Vec<CleanupFailure>,
}

/// A cleanup step that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct CleanupFailure {
    /// The step.
    stage: Stage,

    /// The rendered error chain.
    error: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl StopReport {
    /// Creates an empty report.
    pub fn new(sandbox_id: impl Into<String>) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            completed: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Returns whether no step failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns whether `stage` completed.
    pub fn is_completed(&self, stage: Stage) -> bool {
        self.completed.contains(&stage)
    }

    /// Returns whether `stage` failed.
    pub fn has_failed(&self, stage: Stage) -> bool {
        self.failures.iter().any(|failure| failure.stage == stage)
    }

    pub(super) fn record(&mut self, stage: Stage, result: &anyhow::Result<()>) {
        match result {
            Ok(()) => self.completed.push(stage),
            Err(e) => {
                tracing::warn!(sandbox_id = %self.sandbox_id, %stage, error = %format!("{e:#}"), "cleanup step failed");
                self.failures.push(CleanupFailure {
                    stage,
                    error: format!("{e:#}"),
                });
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for StopReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sandbox {}: {} cleanup steps completed, {} failed",
            self.sandbox_id,
            self.completed.len(),
            self.failures.len()
        )?;

        for failure in &self.failures {
            write!(f, "; {}: {}", failure.stage, failure.error)?;
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn test_stop_report_records_steps() {
        let mut report = StopReport::new("123");
        report.record(Stage::ShutdownProxy, &Ok(()));
        report.record(Stage::TeardownTunnel, &Err(anyhow!("netns is gone")));
        report.record(Stage::RemoveSocket, &Ok(()));

        assert!(!report.is_clean());
        assert!(report.is_completed(Stage::ShutdownProxy));
        assert!(report.has_failed(Stage::TeardownTunnel));
        assert!(!report.is_completed(Stage::DeleteInstance));
        assert!(!report.has_failed(Stage::DeleteInstance));
        assert_eq!(
            report.to_string(),
            "sandbox 123: 2 cleanup steps completed, 1 failed; teardown-tunnel: netns is gone"
        );
    }
}
