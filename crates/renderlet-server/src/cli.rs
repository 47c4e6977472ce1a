//! Command-line interface definitions using clap.

use std::path::PathBuf;

use clap::Parser;
use renderlet::{Credentials, GatewayConfig};

/// Serve a server-side-rendered app from a supervised pool of workers.
#[derive(Parser, Debug, Clone)]
#[command(name = "renderlet")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory of the app bundle to serve.
    #[arg(long, env = "RENDERLET_DIST_PATH")]
    pub dist_path: Option<PathBuf>,

    /// Address each worker listens on.
    #[arg(long, env = "HOST", default_value = renderlet::config::DEFAULT_HOST)]
    pub host: String,

    /// Port shared by all workers.
    #[arg(long, env = "PORT", default_value_t = renderlet::config::DEFAULT_PORT)]
    pub port: u16,

    /// Number of workers (defaults to the number of CPUs).
    #[arg(long, env = "RENDERLET_WORKERS")]
    pub workers: Option<usize>,

    /// Gzip responses.
    #[arg(long, env = "RENDERLET_GZIP")]
    pub gzip: bool,

    /// Require HTTP basic auth with this username.
    #[arg(long, env = "RENDERLET_USERNAME")]
    pub username: Option<String>,

    /// Require HTTP basic auth with this password.
    #[arg(long, env = "RENDERLET_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Cache rendered pages in this directory, shared by all workers.
    #[arg(long, env = "RENDERLET_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Serve the app shell when rendering fails instead of an error.
    #[arg(long, env = "RENDERLET_RESILIENT")]
    pub resilient: bool,

    /// Run as a worker process (used by the supervisor).
    #[arg(long = "internal-worker", hide = true)]
    pub internal_worker: bool,
}

impl Cli {
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            host: self.host.clone(),
            port: self.port,
            gzip: self.gzip,
            credentials: Credentials::from_parts(self.username.clone(), self.password.clone()),
        }
    }
}
