use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plugin::{PluginKey, PluginSnapshot};
use crate::session::OwnerId;

/// Lifecycle of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    WaitingForOwner,
    Bootstrapping,
    Running,
    ShuttingDown,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrchestratorState::Idle => "idle",
            OrchestratorState::WaitingForOwner => "waiting for owner",
            OrchestratorState::Bootstrapping => "bootstrapping",
            OrchestratorState::Running => "running",
            OrchestratorState::ShuttingDown => "shutting down",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub owner: OwnerId,
    pub created_at: DateTime<Utc>,
}

/// Serializable snapshot of the orchestrator.
///
/// `plugins` describes the live session, or the most recent one after teardown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeReport {
    pub state: OrchestratorState,
    pub session: Option<SessionSummary>,
    pub bootstrap_attempts: u32,
    pub sessions_started: u32,
    pub last_error: Option<String>,
    pub plugins: Vec<PluginSnapshot>,
    pub excluded: Vec<PluginKey>,
    /// Keys in the order the last teardown deactivated them.
    pub deactivation_order: Vec<PluginKey>,
}
