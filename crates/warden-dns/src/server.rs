//! DNS listener — binds UDP + TCP using hickory-server.

use std::net::SocketAddr;
use std::time::Duration;

use hickory_server::server::RequestHandler;
use hickory_server::ServerFuture;
use tokio::net::{TcpListener, UdpSocket};
use tracing::info;

/// TCP connections idle longer than this are dropped.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// The warden DNS front end.
///
/// Wraps hickory-server's ServerFuture around a filtering handler.
pub struct DnsServer;

impl DnsServer {
    /// Bind the given address and serve DNS queries through `handler`
    /// until the runtime shuts down. Registers both UDP and TCP.
    pub async fn start<H: RequestHandler>(
        bind_addr: SocketAddr,
        handler: H,
    ) -> anyhow::Result<()> {
        let udp_socket = UdpSocket::bind(bind_addr).await?;
        let tcp_listener = TcpListener::bind(bind_addr).await?;

        info!(addr = %bind_addr, "DNS filter listening (UDP + TCP)");

        let mut server = ServerFuture::new(handler);
        server.register_socket(udp_socket);
        server.register_listener(tcp_listener, TCP_TIMEOUT);

        server.block_until_done().await?;

        info!("DNS server stopped");
        Ok(())
    }
}
