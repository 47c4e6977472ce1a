//! App bundle sources.
//!
//! A [`Downloader`] resolves the bundle directory the workers serve. A
//! [`Notifier`] tells the supervisor when a new bundle is available.

use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// No bundle published yet. Workers start in no-app mode.
    #[error("AppNotFoundError: {0}")]
    AppNotFound(String),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl DownloadError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::AppNotFound(_))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to subscribe to bundle updates: {0}")]
pub struct NotifierError(#[from] pub anyhow::Error);

#[async_trait::async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self) -> Result<PathBuf, DownloadError>;
}

/// Invoked every time a new bundle is published.
pub type UpdateCallback = Arc<dyn Fn() + Send + Sync>;

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Register for updates. The callback may fire any number of times.
    async fn subscribe(&self, on_update: UpdateCallback) -> Result<(), NotifierError>;
}
