//! Worker pool supervisor.
//!
//! Resolves the app bundle, keeps a fixed number of workers alive, and
//! coordinates them with one-way broadcasts:
//! - `start` spawns the pool and resolves once every slot reported online
//! - `reload` / `stop` broadcast to the workers online right now
//! - every worker exit is answered with exactly one replacement in its slot

pub mod registry;
pub mod spawner;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::FramedRead;

use crate::bridge::channel::{BoxedReader, SupervisorEnd};
use crate::bridge::codec::JsonLinesCodec;
use crate::bridge::protocol::{ControlMessage, WorkerId, WorkerMessage};
use crate::bundle::{DownloadError, Notifier, UpdateCallback};
use crate::config::{ConfigError, SupervisorConfig};
use crate::gateway::server::listen_addr;

pub use registry::{WorkerHandle, WorkerRegistry, WorkerState, broadcast};
pub use spawner::{
    ExitReason, ProcessSpawner, SpawnError, SpawnedWorker, TaskSpawner, WORKER_FLAG, WorkerSpawner,
};

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to resolve app bundle: {0}")]
    Download(#[source] DownloadError),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error("worker slot {0} can no longer produce a worker")]
    WorkerLost(usize),
    #[error("supervisor already started")]
    AlreadyStarted,
    #[error("invalid listen address {host}:{port}: {source}")]
    ListenAddress {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

type WorkerReceiver = FramedRead<BoxedReader, JsonLinesCodec<WorkerMessage>>;

/// Outcome of the last initialization.
#[derive(Debug, Clone, Default)]
struct BundleState {
    dist_path: Option<PathBuf>,
    error: Option<String>,
}

/// Handle to the supervisor. Cheap to clone.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: SupervisorConfig,
    registry: WorkerRegistry,
    bundle: RwLock<BundleState>,
    started: AtomicBool,
}

impl Supervisor {
    /// Validate the configuration. Nothing is spawned until [`start`](Self::start).
    pub fn new(config: SupervisorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                registry: WorkerRegistry::new(),
                bundle: RwLock::new(BundleState::default()),
                started: AtomicBool::new(false),
            }),
        })
    }

    fn bundle(&self) -> RwLockReadGuard<'_, BundleState> {
        self.inner.bundle.read().unwrap_or_else(|e| e.into_inner())
    }

    fn bundle_mut(&self) -> RwLockWriteGuard<'_, BundleState> {
        self.inner.bundle.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.inner.registry
    }

    pub fn workers(&self) -> Vec<WorkerHandle> {
        self.inner.registry.snapshot()
    }

    pub fn online_count(&self) -> usize {
        self.inner.registry.online_count()
    }

    pub fn worker_count(&self) -> usize {
        self.inner.config.worker_count
    }

    pub fn dist_path(&self) -> Option<PathBuf> {
        self.bundle().dist_path.clone()
    }

    pub fn initialization_error(&self) -> Option<String> {
        self.bundle().error.clone()
    }

    /// Initialize, subscribe to updates, then bring up the whole pool.
    ///
    /// Resolves once every slot has an online worker. A worker that dies
    /// before reporting online hands its pending readiness to its replacement.
    /// The pool is fixed for the supervisor's lifetime: a second call fails
    /// with [`SupervisorError::AlreadyStarted`], even if the first one failed.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(SupervisorError::AlreadyStarted);
        }

        // Every worker binds this address; a bad one would crash-loop the pool.
        let gateway = &self.inner.config.gateway;
        listen_addr(gateway)
            .await
            .map_err(|source| SupervisorError::ListenAddress {
                host: gateway.host.clone(),
                port: gateway.port,
                source,
            })?;

        self.initialize().await?;

        if let Some(notifier) = &self.inner.config.notifier {
            self.subscribe(Arc::clone(notifier)).await;
        }

        let count = self.inner.config.worker_count;
        tracing::info!(workers = count, "Starting worker pool");

        let mut pending = Vec::with_capacity(count);
        for slot in 0..count {
            let (ready_tx, ready_rx) = oneshot::channel();
            self.spawn_slot(slot, Some(ready_tx))?;
            pending.push((slot, ready_rx));
        }

        for (slot, ready_rx) in pending {
            ready_rx
                .await
                .map_err(|_| SupervisorError::WorkerLost(slot))?;
        }
        tracing::info!(workers = count, "All workers online");

        self.broadcast_error();
        Ok(())
    }

    /// Ask every online worker to shut down. Does not wait.
    pub fn stop(&self) -> usize {
        tracing::info!("Shutting down workers");
        broadcast(&self.inner.registry, &ControlMessage::Shutdown)
    }

    /// Ask every online worker to reload with the current bundle.
    pub fn reload(&self) -> usize {
        let dist_path = self.dist_path();
        tracing::info!(dist_path = ?dist_path, "Reloading workers");
        broadcast(&self.inner.registry, &ControlMessage::reload(dist_path))
    }

    fn broadcast_error(&self) {
        if let Some(error) = self.initialization_error() {
            broadcast(&self.inner.registry, &ControlMessage::error(error));
        }
    }

    /// Resolve the app bundle.
    ///
    /// A missing bundle is recorded and reported to workers; any other
    /// download failure is fatal.
    async fn initialize(&self) -> Result<(), SupervisorError> {
        if let Some(dist_path) = &self.inner.config.dist_path {
            tracing::info!(dist_path = %dist_path.display(), "Using app bundle");
            *self.bundle_mut() = BundleState {
                dist_path: Some(dist_path.clone()),
                error: None,
            };
            return Ok(());
        }

        let Some(downloader) = &self.inner.config.downloader else {
            return Err(ConfigError::MissingBundleSource.into());
        };

        tracing::info!("Downloading app bundle");
        match downloader.download().await {
            Ok(dist_path) => {
                tracing::info!(dist_path = %dist_path.display(), "App bundle downloaded");
                *self.bundle_mut() = BundleState {
                    dist_path: Some(dist_path),
                    error: None,
                };
                Ok(())
            }
            Err(e) if !e.is_fatal() => {
                tracing::warn!(error = %e, "App bundle not found");
                self.bundle_mut().error = Some(e.to_string());
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to download app bundle");
                Err(SupervisorError::Download(e))
            }
        }
    }

    async fn subscribe(&self, notifier: Arc<dyn Notifier>) {
        let supervisor = Arc::downgrade(&self.inner);
        let runtime = tokio::runtime::Handle::current();
        let on_update: UpdateCallback = Arc::new(move || {
            let Some(supervisor) = upgrade(&supervisor) else {
                return;
            };
            runtime.spawn(async move { supervisor.handle_update().await });
        });

        match notifier.subscribe(on_update).await {
            Ok(()) => tracing::info!("Subscribed to app bundle updates"),
            Err(e) => tracing::error!(error = %e, "Subscription to app bundle updates failed"),
        }
    }

    async fn handle_update(&self) {
        tracing::info!("App bundle update received");
        match self.initialize().await {
            Ok(()) => {
                self.reload();
                self.broadcast_error();
            }
            Err(e) => tracing::error!(error = %e, "Reinitialization failed, not reloading"),
        }
    }

    /// Spawn a worker into `slot` and start monitoring it.
    fn spawn_slot(
        &self,
        slot: usize,
        ready: Option<oneshot::Sender<()>>,
    ) -> Result<WorkerId, SpawnError> {
        let SpawnedWorker { pid, channel, exit } = self.inner.config.spawner.spawn()?;
        let SupervisorEnd {
            mut sender,
            receiver,
        } = channel;
        let id = WorkerId::new();

        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let init = ControlMessage::Init {
            config: self.inner.config.worker_config(self.dist_path()),
        };
        // Queued before the worker is registered, so Init is always first.
        let _ = control_tx.send(init);
        self.inner.registry.insert(
            WorkerHandle {
                id,
                pid,
                slot,
                state: WorkerState::Starting,
            },
            control_tx,
        );
        tracing::info!(worker = %id, slot, pid, "Worker spawned");

        tokio::spawn(async move {
            while let Some(msg) = control_rx.recv().await {
                if let Err(e) = sender.send(msg).await {
                    tracing::debug!(worker = %id, error = %e, "Worker control channel closed");
                    break;
                }
            }
        });

        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor.monitor(id, slot, receiver, exit, ready).await;
        });

        Ok(id)
    }

    async fn monitor(
        self,
        id: WorkerId,
        slot: usize,
        mut receiver: WorkerReceiver,
        exit: BoxFuture<'static, ExitReason>,
        mut ready: Option<oneshot::Sender<()>>,
    ) {
        loop {
            match receiver.next().await {
                Some(Ok(WorkerMessage::HttpOnline)) => {
                    self.inner.registry.set_state(&id, WorkerState::Online);
                    tracing::info!(worker = %id, slot, "Worker online");
                    if let Some(ready) = ready.take() {
                        let _ = ready.send(());
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(worker = %id, error = %e, "Invalid message from worker");
                }
                None => break,
            }
        }

        self.inner.registry.set_state(&id, WorkerState::Exited);
        let reason = exit.await;
        if reason.is_clean() {
            tracing::info!(worker = %id, slot, "{reason}");
        } else {
            tracing::warn!(worker = %id, slot, "{reason}");
        }
        self.inner.registry.remove(&id);

        tracing::info!(slot, "Respawning worker");
        if let Err(e) = self.spawn_slot(slot, ready) {
            tracing::error!(slot, error = %e, "Failed to respawn worker");
        }
    }
}

fn upgrade(inner: &Weak<Inner>) -> Option<Supervisor> {
    inner.upgrade().map(|inner| Supervisor { inner })
}
