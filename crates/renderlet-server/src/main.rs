//! renderlet server binary.
//!
//! Without `--internal-worker` this process is the supervisor: it resolves the
//! bundle, spawns copies of itself as workers, and waits for a signal. With
//! the flag it is one of those workers, driven over stdin/stdout.

mod cli;
mod fs_cache;
mod shell;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use renderlet::{Supervisor, SupervisorConfig, WorkerComponents, WorkerEnd, run_worker};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cli::Cli;
use fs_cache::FsCache;
use shell::ShellRendererFactory;

/// Time for queued Shutdown messages to reach the workers before we exit.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Initialize tracing.
///
/// `RUST_LOG` wins when set; otherwise `RENDERLET_LOG` picks the level.
/// `LOG_FORMAT=json` switches to JSON lines. Always writes to stderr: a
/// worker's stdout carries its control channel.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("RENDERLET_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!(
            "renderlet={level},renderlet_server={level},tower_http=warn"
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn components(cli: &Cli) -> WorkerComponents {
    let components = WorkerComponents::new(Arc::new(ShellRendererFactory));
    match &cli.cache_dir {
        Some(dir) => components.with_cache(Arc::new(FsCache::new(dir))),
        None => components,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    if cli.internal_worker {
        run_worker_process(&cli).await
    } else {
        run_supervisor(cli).await
    }
}

/// Worker role. Exits the process as soon as the loop ends; there is no drain.
async fn run_worker_process(cli: &Cli) -> ! {
    let code = match run_worker(WorkerEnd::stdio(), components(cli)).await {
        Ok(exit) => {
            info!(?exit, "Worker exiting");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "Worker failed");
            1
        }
    };
    std::process::exit(code)
}

async fn run_supervisor(cli: Cli) -> anyhow::Result<()> {
    let mut config = SupervisorConfig::new()?
        .with_gateway(cli.gateway_config())
        .with_resilient(cli.resilient);
    if let Some(dist_path) = &cli.dist_path {
        config = config.with_dist_path(dist_path);
    }
    if let Some(workers) = cli.workers {
        config = config.with_worker_count(workers);
    }
    if config.gateway.credentials.is_some() {
        info!(username = ?cli.username, "Basic auth enabled");
    }

    let supervisor = Supervisor::new(config)?;
    supervisor.start().await?;
    info!(
        workers = supervisor.worker_count(),
        url = %format!("http://{}:{}", cli.host, cli.port),
        "renderlet ready"
    );

    shutdown_signal().await?;
    supervisor.stop();
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    info!("Supervisor exiting");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received SIGINT, shutting down...");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl-C, shutting down...");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_is_optional() {
        let cli = Cli::try_parse_from(["renderlet"]).unwrap();
        assert!(components(&cli).cache.is_none());

        let cli = Cli::try_parse_from(["renderlet", "--cache-dir", "/tmp/pages"]).unwrap();
        assert!(components(&cli).cache.is_some());
    }
}
