//! Worker spawn strategies.
//!
//! [`ProcessSpawner`] re-executes the current binary in worker mode and talks
//! to it over stdin/stdout. [`TaskSpawner`] runs workers as tokio tasks in the
//! supervisor's own process.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::process::Command;
use tokio::task::AbortHandle;

use crate::bridge::channel::{SupervisorEnd, duplex_pair};
use crate::worker::{WorkerComponents, WorkerExit, run_worker};

/// Flag that switches the binary into worker mode.
pub const WORKER_FLAG: &str = "--internal-worker";

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn worker process: {0}")]
    Io(#[from] io::Error),
    #[error("worker process has no {0} pipe")]
    MissingPipe(&'static str),
    #[error("spawn failed: {0}")]
    Other(String),
}

/// Why a worker stopped. Only affects logging; every exit is respawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    Code(i32),
    Signal(String),
    /// In-process worker task was aborted.
    Aborted,
    /// In-process worker task panicked.
    Panicked(String),
    /// Exit status could not be observed.
    Lost(String),
}

impl ExitReason {
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signal(signal_name(signal));
            }
        }
        Self::Lost(format!("unrecognized exit status: {status}"))
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Code(0))
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(0) => write!(f, "worker exited"),
            Self::Code(code) => write!(f, "worker exited with error code: {code}"),
            Self::Signal(signal) => write!(f, "worker was killed by signal: {signal}"),
            Self::Aborted => write!(f, "worker task was aborted"),
            Self::Panicked(msg) => write!(f, "worker task panicked: {msg}"),
            Self::Lost(msg) => write!(f, "worker exit status lost: {msg}"),
        }
    }
}

#[cfg(unix)]
fn signal_name(signal: i32) -> String {
    nix::sys::signal::Signal::try_from(signal)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| signal.to_string())
}

/// A freshly started worker, not yet registered.
pub struct SpawnedWorker {
    pub pid: Option<u32>,
    pub channel: SupervisorEnd,
    /// Resolves once the worker is gone.
    pub exit: BoxFuture<'static, ExitReason>,
}

/// Extension point for different worker spawn strategies.
///
/// Called from within the tokio runtime.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self) -> Result<SpawnedWorker, SpawnError>;
}

/// Spawns workers as child processes of a program run with [`WORKER_FLAG`].
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessSpawner {
    pub fn new(
        program: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<OsString>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Re-run the current executable with the current arguments.
    pub fn current_exe() -> io::Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program, std::env::args_os().skip(1)))
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(&self) -> Result<SpawnedWorker, SpawnError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(WORKER_FLAG)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let pid = child.id();
        let stdin = child.stdin.take().ok_or(SpawnError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SpawnError::MissingPipe("stdout"))?;

        let exit = async move {
            match child.wait().await {
                Ok(status) => ExitReason::from_status(status),
                Err(e) => ExitReason::Lost(e.to_string()),
            }
        }
        .boxed();

        Ok(SpawnedWorker {
            pid,
            channel: SupervisorEnd::new(stdout, stdin),
            exit,
        })
    }
}

/// Runs each worker as a tokio task over an in-memory channel.
pub struct TaskSpawner {
    components: WorkerComponents,
    spawned: AtomicUsize,
    /// Handles of live workers, oldest first. Finished ones are pruned on spawn.
    tasks: StdMutex<Vec<AbortHandle>>,
}

impl TaskSpawner {
    pub fn new(components: WorkerComponents) -> Self {
        Self {
            components,
            spawned: AtomicUsize::new(0),
            tasks: StdMutex::new(Vec::new()),
        }
    }

    /// Number of workers spawned so far, replacements included.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Number of worker tasks still running.
    pub fn live(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|task| !task.is_finished());
        tasks.len()
    }

    /// Abort the `index`-th live worker, oldest first. Returns false if there
    /// is none.
    pub fn abort(&self, index: usize) -> bool {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        match tasks.get(index) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

impl WorkerSpawner for TaskSpawner {
    fn spawn(&self) -> Result<SpawnedWorker, SpawnError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|e| SpawnError::Other(e.to_string()))?;
        let (channel, worker_end) = duplex_pair();
        let handle = runtime.spawn(run_worker(worker_end, self.components.clone()));
        {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.retain(|task| !task.is_finished());
            tasks.push(handle.abort_handle());
        }
        self.spawned.fetch_add(1, Ordering::SeqCst);

        let exit = async move {
            match handle.await {
                Ok(Ok(WorkerExit::Shutdown | WorkerExit::SupervisorGone)) => ExitReason::Code(0),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Worker failed");
                    ExitReason::Code(1)
                }
                Err(e) if e.is_cancelled() => ExitReason::Aborted,
                Err(e) => ExitReason::Panicked(e.to_string()),
            }
        }
        .boxed();

        Ok(SpawnedWorker {
            pid: None,
            channel,
            exit,
        })
    }
}
