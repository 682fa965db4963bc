use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{UdpSocket, lookup_host};

use crate::network::{Net, PacketConn};

/// Operating system UDP stack backed by tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpNet;

#[async_trait]
impl Net for UdpNet {
    async fn bind(&self, addr: SocketAddr) -> io::Result<Arc<dyn PacketConn>> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Arc::new(socket))
    }

    async fn resolve(&self, host: &str) -> io::Result<SocketAddr> {
        let addrs: Vec<SocketAddr> = lookup_host(host).await?.collect();
        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses resolved for {}", host),
                )
            })
    }
}

#[async_trait]
impl PacketConn for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}
