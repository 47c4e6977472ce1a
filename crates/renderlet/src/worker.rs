//! Worker side: one gateway, one renderer binding, one control channel.
//!
//! Lifecycle:
//! 1. Read `Init` (always the first control message)
//! 2. Bind a renderer to the bundle, or enter no-app mode without one
//! 3. Bind the HTTP listener
//! 4. Send `HttpOnline`
//! 5. Serve while handling Reload / Error / Shutdown

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use crate::bridge::channel::WorkerEnd;
use crate::bridge::protocol::{ControlMessage, WorkerMessage};
use crate::cache::Cache;
use crate::config::WorkerConfig;
use crate::gateway::server::listen_addr;
use crate::gateway::{BoundApp, Gateway, RouterHooks};
use crate::renderer::{RendererFactory, RendererOptions};

/// Collaborators a worker is built from, provided by the embedding binary.
#[derive(Clone)]
pub struct WorkerComponents {
    pub renderer: Arc<dyn RendererFactory>,
    pub cache: Option<Arc<dyn Cache>>,
    pub hooks: RouterHooks,
}

impl WorkerComponents {
    pub fn new(renderer: Arc<dyn RendererFactory>) -> Self {
        Self {
            renderer,
            cache: None,
            hooks: RouterHooks::default(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_hooks(mut self, hooks: RouterHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("control channel closed before init")]
    ChannelClosed,
    #[error("control channel I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to load bundle at {}: {source}", path.display())]
    Renderer {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to bind HTTP listener: {0}")]
    Bind(#[source] io::Error),
    #[error("HTTP server failed: {0}")]
    Server(#[source] io::Error),
}

/// How a worker loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The supervisor asked the worker to stop.
    Shutdown,
    /// The control channel closed; nobody is left to supervise us.
    SupervisorGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    NoApp,
    Serving,
}

pub struct Worker {
    config: WorkerConfig,
    components: WorkerComponents,
    gateway: Gateway,
}

impl Worker {
    pub fn new(config: WorkerConfig, components: WorkerComponents) -> Self {
        let gateway = Gateway::with_parts(
            config.gateway.clone(),
            components.cache.clone(),
            components.hooks.clone(),
        );
        Self {
            config,
            components,
            gateway,
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub async fn mode(&self) -> WorkerMode {
        match self.gateway.app().await {
            Some(_) => WorkerMode::Serving,
            None => WorkerMode::NoApp,
        }
    }

    /// Pick the initial mode from the configured bundle.
    pub async fn prepare(&self) -> Result<WorkerMode, WorkerError> {
        match &self.config.dist_path {
            Some(dist_path) => {
                self.bind_renderer(dist_path).await?;
                Ok(WorkerMode::Serving)
            }
            None => {
                tracing::info!("No app bundle, serving fallback page");
                Ok(WorkerMode::NoApp)
            }
        }
    }

    /// Prepare, then bind the HTTP listener.
    pub async fn start(&self) -> Result<TcpListener, WorkerError> {
        self.prepare().await?;
        tracing::info!("Starting HTTP server");
        let addr = listen_addr(&self.config.gateway)
            .await
            .map_err(WorkerError::Bind)?;
        crate::gateway::bind(addr).map_err(WorkerError::Bind)
    }

    async fn bind_renderer(&self, dist_path: &Path) -> Result<(), WorkerError> {
        let options = RendererOptions {
            resilient: self.config.resilient,
        };
        let renderer = self
            .components
            .renderer
            .create(dist_path, &options)
            .await
            .map_err(|source| WorkerError::Renderer {
                path: dist_path.to_path_buf(),
                source,
            })?;
        self.gateway.bind(BoundApp::new(dist_path, renderer)).await;
        tracing::info!(dist_path = %dist_path.display(), "Renderer bound");
        Ok(())
    }

    /// Apply one control message. Returns `Some` when the worker must stop.
    pub async fn handle_message(&self, msg: ControlMessage) -> Option<WorkerExit> {
        match msg {
            ControlMessage::Reload { dist_path } => {
                self.reload(dist_path).await;
                None
            }
            ControlMessage::Error { error } => {
                tracing::warn!(%error, "Initialization error reported by supervisor");
                self.gateway.set_error(error).await;
                None
            }
            ControlMessage::Shutdown => {
                tracing::info!("Shutdown requested");
                Some(WorkerExit::Shutdown)
            }
            ControlMessage::Init { .. } => {
                tracing::warn!("Received Init in event loop (should be at startup)");
                None
            }
        }
    }

    async fn reload(&self, dist_path: Option<PathBuf>) {
        let current = self.gateway.app().await;
        let target = dist_path.or_else(|| current.as_ref().map(|app| app.dist_path.clone()));

        match (current, target) {
            (Some(app), Some(target)) if app.dist_path == target => {
                match app.renderer.reload().await {
                    Ok(()) => tracing::info!(dist_path = %target.display(), "Renderer reloaded"),
                    Err(e) => tracing::error!(error = %e, "Renderer reload failed"),
                }
            }
            (_, Some(target)) => {
                if let Err(e) = self.bind_renderer(&target).await {
                    tracing::error!(error = %e, "Rebinding renderer failed, keeping current mode");
                }
            }
            (_, None) => tracing::debug!("Reload ignored, no app bundle"),
        }
    }
}

/// Run a worker over its control channel until shutdown or channel loss.
pub async fn run_worker(
    channel: WorkerEnd,
    components: WorkerComponents,
) -> Result<WorkerExit, WorkerError> {
    let WorkerEnd {
        mut receiver,
        mut sender,
    } = channel;

    let config = match receiver.next().await {
        Some(Ok(ControlMessage::Init { config })) => config,
        Some(Ok(other)) => {
            return Err(WorkerError::Protocol(format!(
                "expected init, got {}",
                other.event()
            )));
        }
        Some(Err(e)) => return Err(e.into()),
        None => return Err(WorkerError::ChannelClosed),
    };
    tracing::trace!(?config, "Worker received init");

    let worker = Worker::new(config, components);
    let listener = worker.start().await?;

    let mut server = JoinSet::new();
    server.spawn(crate::gateway::serve(listener, worker.gateway().clone()));

    sender.send(WorkerMessage::HttpOnline).await?;
    tracing::info!("Worker online");

    // Messages that arrived while an earlier one was still being applied.
    let mut backlog = VecDeque::new();

    loop {
        let msg = match backlog.pop_front() {
            Some(msg) => msg,
            None => tokio::select! {
                msg = receiver.next() => match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Control channel error");
                        return Err(e.into());
                    }
                    None => {
                        tracing::error!("Control channel closed (supervisor died?), exiting");
                        return Ok(WorkerExit::SupervisorGone);
                    }
                },

                Some(result) = server.join_next() => {
                    let err = match result {
                        Ok(Ok(())) => io::Error::other("server stopped unexpectedly"),
                        Ok(Err(e)) => e,
                        Err(e) => io::Error::other(e),
                    };
                    tracing::error!(error = %err, "HTTP server exited");
                    return Err(WorkerError::Server(err));
                }
            },
        };
        tracing::debug!(event = msg.event(), "Control message received");

        // A reload can take a while; Shutdown must not wait for it.
        let handling = worker.handle_message(msg);
        tokio::pin!(handling);
        let exit = loop {
            tokio::select! {
                exit = &mut handling => break exit,
                next = receiver.next() => match next {
                    Some(Ok(ControlMessage::Shutdown)) => {
                        tracing::info!("Shutdown requested, abandoning message in progress");
                        return Ok(WorkerExit::Shutdown);
                    }
                    Some(Ok(other)) => backlog.push_back(other),
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Control channel error");
                        return Err(e.into());
                    }
                    None => {
                        tracing::error!("Control channel closed (supervisor died?), exiting");
                        return Ok(WorkerExit::SupervisorGone);
                    }
                },
            }
        };
        if let Some(exit) = exit {
            return Ok(exit);
        }
    }
}
