pub mod transaction;
mod udp;

pub use transaction::{TransactionClient, TransactionConfig, TransactionError, TransactionResult};
pub use udp::UdpNet;

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

/// Datagram socket abstraction
///
/// The discovery engine only ever talks to the network through this trait, so
/// the same code runs over real UDP sockets and over an in-process virtual
/// network.
#[async_trait]
pub trait PacketConn: Send + Sync {
    /// Send a datagram to `target`
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Receive one datagram
    ///
    /// # Returns
    /// - `Ok((len, from))` - number of bytes written into `buf` and the sender
    /// - `Err` - socket error; the socket should be considered unusable
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Get the locally bound address
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Network stack abstraction: socket creation and name resolution
#[async_trait]
pub trait Net: Send + Sync {
    /// Bind a datagram socket
    ///
    /// Binding a specific IP fails when the IP does not belong to this host,
    /// which the engine uses to tell local from translated addresses.
    async fn bind(&self, addr: SocketAddr) -> io::Result<Arc<dyn PacketConn>>;

    /// Resolve `host:port` to a single socket address, preferring IPv4
    async fn resolve(&self, host: &str) -> io::Result<SocketAddr>;
}
