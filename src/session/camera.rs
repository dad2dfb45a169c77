//! Front/back camera toggle
//!
//! Switching tears the running session down completely and starts a new
//! one after [`RESTART_DELAY`], giving the old capture time to release.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::Sleep;

use crate::media::FacingMode;

/// Wait between teardown and the restart with the other camera
pub const RESTART_DELAY: Duration = Duration::from_millis(500);

/// Tracks the facing mode and a pending delayed restart
#[derive(Debug)]
pub struct CameraModeController {
    facing: FacingMode,
    restart: Option<Pin<Box<Sleep>>>,
}

impl CameraModeController {
    #[must_use]
    pub const fn new(facing: FacingMode) -> Self {
        Self {
            facing,
            restart: None,
        }
    }

    #[must_use]
    pub const fn facing(&self) -> FacingMode {
        self.facing
    }

    /// Flip the facing mode
    ///
    /// When `was_running`, the caller has just stopped the session and a
    /// restart is scheduled. Otherwise only the mode changes.
    pub fn switch(&mut self, was_running: bool) -> FacingMode {
        self.facing = self.facing.flipped();
        if was_running {
            self.restart = Some(Box::pin(tokio::time::sleep(RESTART_DELAY)));
        }
        self.facing
    }

    /// Drop a pending restart; returns whether one was pending
    pub fn cancel_restart(&mut self) -> bool {
        self.restart.take().is_some()
    }

    #[must_use]
    pub const fn restart_pending(&self) -> bool {
        self.restart.is_some()
    }

    /// Resolve when a scheduled restart is due
    ///
    /// Cancel-safe; pending forever when nothing is scheduled.
    pub async fn restart_due(&mut self) {
        match self.restart.as_mut() {
            Some(delay) => {
                delay.as_mut().await;
                self.restart = None;
            }
            None => std::future::pending().await,
        }
    }
}
