//! Observable session status

use serde::Serialize;
use uuid::Uuid;

use crate::media::FacingMode;

/// Lifecycle state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    /// Transient while resources are released
    Stopping,
}

/// Continuous monitoring requested through the assistant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Monitoring {
    /// What is being watched for, when the service said
    pub looking_for: Option<String>,
}

/// The most recent tool the assistant ran
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolEvent {
    pub tool: String,
    pub result: serde_json::Value,
}

/// Everything a UI needs to render the session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub state: SessionState,
    pub facing: FacingMode,
    /// Present while a session is starting or active
    pub session_id: Option<Uuid>,
    pub status_line: String,
    pub last_error: Option<String>,
    pub monitoring: Option<Monitoring>,
    pub last_tool: Option<ToolEvent>,
}

impl StatusSnapshot {
    #[must_use]
    pub fn idle(facing: FacingMode) -> Self {
        Self {
            state: SessionState::Idle,
            facing,
            session_id: None,
            status_line: "Ready".to_string(),
            last_error: None,
            monitoring: None,
            last_tool: None,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}
