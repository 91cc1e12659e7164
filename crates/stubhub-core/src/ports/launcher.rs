//! ProcessLauncher port - starting the real application.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::domain::{LaunchError, LaunchId};

/// How an external process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchStatus {
    Succeeded,
    Failed,
    Cancelled,
    Killed,
    TimedOut,
}

/// Completion report of one launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOutcome {
    pub status: LaunchStatus,
    pub exit_code: Option<i32>,
    /// Tail of the process output, bounded by the launcher.
    pub output: Vec<String>,
}

impl LaunchOutcome {
    pub fn new(status: LaunchStatus) -> Self {
        Self {
            status,
            exit_code: None,
            output: Vec::new(),
        }
    }

    pub fn succeeded() -> Self {
        Self::new(LaunchStatus::Succeeded)
    }

    pub fn failed(exit_code: Option<i32>) -> Self {
        Self {
            exit_code,
            ..Self::new(LaunchStatus::Failed)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == LaunchStatus::Succeeded
    }
}

/// Handle returned by `ProcessLauncher::launch`.
///
/// `completion` resolves exactly once. A dropped sender means the launcher
/// lost track of the process, which is reported as `Killed`.
#[derive(Debug)]
pub struct LaunchTicket {
    pub id: LaunchId,
    pub completion: oneshot::Receiver<LaunchOutcome>,
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start the process for `locator`; returns once it is started, not once
    /// it has finished.
    async fn launch(&self, locator: &str) -> Result<LaunchTicket, LaunchError>;

    /// Cancel or kill launch `id`. Unknown or finished launches are ignored.
    async fn cancel(&self, id: LaunchId);
}
