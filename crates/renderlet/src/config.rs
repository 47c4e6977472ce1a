//! Supervisor and worker configuration.
//!
//! The supervisor owns a [`SupervisorConfig`] with the collaborators it drives.
//! Each worker receives a serializable [`WorkerConfig`] in its `Init` message.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bundle::{Downloader, Notifier};
use crate::supervisor::{ProcessSpawner, WorkerSpawner};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("app server must be provided with either a dist path or a downloader")]
    MissingBundleSource,
    #[error("app server must be provided with either a dist path or a downloader, but not both")]
    ConflictingBundleSource,
    #[error("worker count must be at least 1")]
    NoWorkers,
}

/// Basic-auth credentials required by the gateway.
///
/// Either half may be left unset; an unset half never matches, so every
/// request is then rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Credentials from optional parts; `None` when neither is set.
    pub fn from_parts(username: Option<String>, password: Option<String>) -> Option<Self> {
        if username.is_none() && password.is_none() {
            return None;
        }
        Some(Self { username, password })
    }

    pub fn matches(&self, username: &str, password: &str) -> bool {
        self.username.as_deref() == Some(username) && self.password.as_deref() == Some(password)
    }
}

/// HTTP gateway settings for one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub gzip: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            gzip: false,
            credentials: None,
        }
    }
}

/// Configuration handed from supervisor to worker at spawn time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Resolved app bundle; `None` starts the worker in no-app mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist_path: Option<PathBuf>,
    /// Passed through to the renderer factory.
    #[serde(default)]
    pub resilient: bool,
    pub gateway: GatewayConfig,
}

pub struct SupervisorConfig {
    pub dist_path: Option<PathBuf>,
    pub downloader: Option<Arc<dyn Downloader>>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub worker_count: usize,
    pub resilient: bool,
    pub gateway: GatewayConfig,
    pub spawner: Arc<dyn WorkerSpawner>,
}

impl SupervisorConfig {
    /// Configuration with the default process spawner, which re-executes the
    /// current binary in worker mode.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self::with_spawner_only(Arc::new(ProcessSpawner::current_exe()?)))
    }

    fn with_spawner_only(spawner: Arc<dyn WorkerSpawner>) -> Self {
        Self {
            dist_path: None,
            downloader: None,
            notifier: None,
            worker_count: default_worker_count(),
            resilient: false,
            gateway: GatewayConfig::default(),
            spawner,
        }
    }

    /// Configuration with a custom spawner (in-process workers, tests).
    pub fn for_spawner(spawner: Arc<dyn WorkerSpawner>) -> Self {
        Self::with_spawner_only(spawner)
    }

    pub fn with_dist_path(mut self, dist_path: impl Into<PathBuf>) -> Self {
        self.dist_path = Some(dist_path.into());
        self
    }

    pub fn with_downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_worker_count(mut self, n: usize) -> Self {
        self.worker_count = n;
        self
    }

    pub fn with_resilient(mut self, resilient: bool) -> Self {
        self.resilient = resilient;
        self
    }

    pub fn with_gateway(mut self, gateway: GatewayConfig) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.dist_path, &self.downloader) {
            (None, None) => return Err(ConfigError::MissingBundleSource),
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingBundleSource),
            _ => {}
        }
        if self.worker_count == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }

    /// Worker configuration for the currently resolved bundle.
    pub(crate) fn worker_config(&self, dist_path: Option<PathBuf>) -> WorkerConfig {
        WorkerConfig {
            dist_path,
            resilient: self.resilient,
            gateway: self.gateway.clone(),
        }
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
