//! Listener setup and the serve loop.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpSocket};
use tracing::info;

use crate::config::GatewayConfig;

use super::Gateway;

const BACKLOG: u32 = 1024;

/// Resolve the configured listen address. Hostnames go through the system
/// resolver; the first address returned is used.
pub async fn listen_addr(config: &GatewayConfig) -> std::io::Result<SocketAddr> {
    tokio::net::lookup_host((config.host.as_str(), config.port))
        .await?
        .next()
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("host {} resolved to no addresses", config.host),
            )
        })
}

/// Bind a listener that every worker of the pool can share.
///
/// `SO_REUSEPORT` lets each worker process bind the same port; the kernel
/// spreads incoming connections across them.
pub fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    socket.listen(BACKLOG)
}

/// Serve the gateway on an already bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, gateway: Gateway) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(url = %format!("http://{addr}"), "HTTP server started");
    axum::serve(listener, gateway.router()).await
}
