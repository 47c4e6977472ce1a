//! Wire protocol types for supervisor-worker communication.
//!
//! One channel per worker (stdin/stdout for child processes):
//! - **Supervisor → worker**: Init (first message), Reload, Shutdown, Error
//! - **Worker → supervisor**: HttpOnline, exactly once per worker instance

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::WorkerConfig;

/// Unique identifier for a worker instance.
///
/// A respawned worker gets a fresh id even when it takes over the same slot,
/// so readiness and broadcasts can never be attributed to a dead instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(uuid::Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Control messages from supervisor to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Worker configuration, always the first message on a fresh channel.
    Init { config: WorkerConfig },

    /// Refresh the renderer. Carries the supervisor's current bundle path so
    /// a worker started without one can be promoted to serving.
    Reload {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dist_path: Option<PathBuf>,
    },

    Shutdown,

    /// Latest initialization error, surfaced by the no-app page.
    Error { error: String },
}

impl ControlMessage {
    pub fn reload(dist_path: Option<PathBuf>) -> Self {
        Self::Reload { dist_path }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    /// Short name for logging.
    pub fn event(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Reload { .. } => "reload",
            Self::Shutdown => "shutdown",
            Self::Error { .. } => "error",
        }
    }
}

/// Messages from worker to supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum WorkerMessage {
    /// The worker's HTTP listener is bound and accepting connections.
    HttpOnline,
}
