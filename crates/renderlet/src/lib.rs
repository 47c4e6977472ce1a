//! renderlet: supervised worker pool and cache-aside HTTP gateway for
//! server-side rendering engines.

pub mod bridge;
pub mod bundle;
pub mod cache;
pub mod config;
pub mod gateway;
pub mod renderer;
pub mod supervisor;
pub mod worker;

pub use bridge::channel::{SupervisorEnd, WorkerEnd, duplex_pair};
pub use bridge::protocol::{ControlMessage, WorkerId, WorkerMessage};
pub use bundle::{DownloadError, Downloader, Notifier, NotifierError, UpdateCallback};
pub use cache::{Cache, CacheError, RequestInfo, ResponseInfo};
pub use config::{ConfigError, Credentials, GatewayConfig, SupervisorConfig, WorkerConfig};
pub use gateway::{Gateway, RouterHook, RouterHooks};
pub use renderer::{RenderError, RenderedPage, Renderer, RendererFactory, RendererOptions};
pub use supervisor::{
    ExitReason, ProcessSpawner, SpawnError, Supervisor, SupervisorError, TaskSpawner, WORKER_FLAG,
    WorkerHandle, WorkerRegistry, WorkerSpawner, WorkerState, broadcast,
};
pub use worker::{WorkerComponents, WorkerError, WorkerExit, run_worker};
