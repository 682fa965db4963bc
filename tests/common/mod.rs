//! In-process virtual network for discovery tests
//!
//! Topology used by every scenario:
//!
//! ```text
//!   client host ── gateway ──────── WAN ──────── STUN server host
//!   192.168.0.2    27.1.1.1 (NAT)                1.2.3.4 / 1.2.3.5
//!   1.2.3.100      1.2.3.100 (firewall only)     ports 3478 / 3479
//! ```
//!
//! The gateway implements the mapping and filtering behaviors of RFC 4787 so
//! the engine can be checked against every NAT type without real routers.

#![allow(dead_code)]

use async_trait::async_trait;
use rustnat::EndpointDependencyType;
use rustnat::codec::{AddressAttribute, AttrType, ChangeRequestAttribute, Message, MessageClass};
use rustnat::network::{Net, PacketConn};
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Datagram = (Vec<u8>, SocketAddr);
type Inbox = mpsc::UnboundedSender<Datagram>;

/// First port handed out by gateways, far from host ephemeral ports so a
/// translated port never equals the local one by accident
const GATEWAY_FIRST_PORT: u16 = 30000;

/// First ephemeral port of a host
const HOST_FIRST_PORT: u16 = 5000;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Behavior of the box in front of the client host
#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    /// Translate addresses; when false the gateway is a stateful firewall
    pub nat: bool,
    pub mapping: EndpointDependencyType,
    pub filtering: EndpointDependencyType,
}

impl GatewayConfig {
    pub fn nat(mapping: EndpointDependencyType, filtering: EndpointDependencyType) -> Self {
        Self {
            nat: true,
            mapping,
            filtering,
        }
    }

    pub fn firewall(filtering: EndpointDependencyType) -> Self {
        Self {
            nat: false,
            mapping: EndpointDependencyType::Independent,
            filtering,
        }
    }
}

type MappingKey = (SocketAddr, Option<IpAddr>, Option<u16>);
type PermissionKey = (u16, Option<IpAddr>, Option<u16>);

struct Gateway {
    config: GatewayConfig,
    external_ip: IpAddr,
    /// sockets of the host behind this gateway
    internal: HashMap<SocketAddr, Inbox>,
    mappings: HashMap<MappingKey, u16>,
    reverse: HashMap<u16, SocketAddr>,
    permissions: HashSet<PermissionKey>,
    next_port: u16,
}

fn endpoint_key(
    behavior: EndpointDependencyType,
    remote: SocketAddr,
) -> (Option<IpAddr>, Option<u16>) {
    match behavior {
        EndpointDependencyType::AddrDependent => (Some(remote.ip()), None),
        EndpointDependencyType::AddrPortDependent => (Some(remote.ip()), Some(remote.port())),
        _ => (None, None),
    }
}

impl Gateway {
    fn new(config: GatewayConfig, external_ip: IpAddr) -> Self {
        Self {
            config,
            external_ip,
            internal: HashMap::new(),
            mappings: HashMap::new(),
            reverse: HashMap::new(),
            permissions: HashSet::new(),
            next_port: GATEWAY_FIRST_PORT,
        }
    }

    /// Translates the source of an outgoing packet and opens the filter
    fn outbound(&mut self, from: SocketAddr, to: SocketAddr) -> SocketAddr {
        let port = if self.config.nat {
            let (ip, port) = endpoint_key(self.config.mapping, to);
            let key = (from, ip, port);
            match self.mappings.get(&key) {
                Some(port) => *port,
                None => {
                    let port = self.next_port;
                    self.next_port += 1;
                    self.mappings.insert(key, port);
                    port
                }
            }
        } else {
            from.port()
        };
        self.reverse.insert(port, from);

        let (ip, remote_port) = endpoint_key(self.config.filtering, to);
        self.permissions.insert((port, ip, remote_port));

        SocketAddr::new(self.external_ip, port)
    }

    /// Internal destination of an incoming packet, if the filter lets it in
    fn inbound(&self, src: SocketAddr, port: u16) -> Option<SocketAddr> {
        let internal = *self.reverse.get(&port)?;
        let (ip, remote_port) = endpoint_key(self.config.filtering, src);
        if self.permissions.contains(&(port, ip, remote_port)) {
            Some(internal)
        } else {
            tracing::debug!("gateway {} filtered packet from {}", self.external_ip, src);
            None
        }
    }
}

#[derive(Default)]
struct Fabric {
    /// sockets reachable directly from the WAN
    wan: HashMap<SocketAddr, Inbox>,
    /// gateways by external IP
    gateways: HashMap<IpAddr, Gateway>,
    /// name -> IP for resolution
    names: HashMap<String, IpAddr>,
}

impl Fabric {
    fn send(&mut self, from: SocketAddr, gateway: Option<IpAddr>, to: SocketAddr, data: Vec<u8>) {
        let src = match gateway {
            Some(gw) => match self.gateways.get_mut(&gw) {
                Some(g) => g.outbound(from, to),
                None => return,
            },
            None => from,
        };

        if let Some(g) = self.gateways.get(&to.ip()) {
            if let Some(internal) = g.inbound(src, to.port()) {
                if let Some(tx) = g.internal.get(&internal) {
                    let _ = tx.send((data, src));
                }
            }
            return;
        }

        if let Some(tx) = self.wan.get(&to) {
            let _ = tx.send((data, src));
        }
    }

    fn table(&mut self, gateway: Option<IpAddr>) -> Option<&mut HashMap<SocketAddr, Inbox>> {
        match gateway {
            Some(gw) => self.gateways.get_mut(&gw).map(|g| &mut g.internal),
            None => Some(&mut self.wan),
        }
    }
}

/// The whole simulated internet
#[derive(Clone, Default)]
pub struct VirtualNetwork {
    fabric: Arc<Mutex<Fabric>>,
}

impl VirtualNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_name(&self, name: &str, ip: IpAddr) {
        self.fabric.lock().unwrap().names.insert(name.to_string(), ip);
    }

    /// Sockets currently bound on hosts behind a gateway
    pub fn client_sockets(&self) -> usize {
        self.fabric
            .lock()
            .unwrap()
            .gateways
            .values()
            .map(|g| g.internal.len())
            .sum()
    }

    /// Host attached directly to the WAN
    pub fn wan_host(&self, ips: &[IpAddr]) -> Arc<VirtualHost> {
        Arc::new(VirtualHost {
            fabric: self.fabric.clone(),
            ips: ips.to_vec(),
            gateway: None,
            next_port: AtomicU16::new(HOST_FIRST_PORT),
        })
    }

    /// Host behind a gateway whose WAN side is `external_ip`
    pub fn gated_host(&self, ip: IpAddr, external_ip: IpAddr, config: GatewayConfig) -> Arc<VirtualHost> {
        self.fabric
            .lock()
            .unwrap()
            .gateways
            .insert(external_ip, Gateway::new(config, external_ip));
        Arc::new(VirtualHost {
            fabric: self.fabric.clone(),
            ips: vec![ip],
            gateway: Some(external_ip),
            next_port: AtomicU16::new(HOST_FIRST_PORT),
        })
    }
}

pub struct VirtualHost {
    fabric: Arc<Mutex<Fabric>>,
    ips: Vec<IpAddr>,
    gateway: Option<IpAddr>,
    next_port: AtomicU16,
}

#[async_trait]
impl Net for VirtualHost {
    async fn bind(&self, addr: SocketAddr) -> io::Result<Arc<dyn PacketConn>> {
        let ip = if addr.ip().is_unspecified() {
            self.ips[0]
        } else if self.ips.contains(&addr.ip()) {
            addr.ip()
        } else {
            return Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{} is not assigned to this host", addr.ip()),
            ));
        };
        let port = match addr.port() {
            0 => self.next_port.fetch_add(1, Ordering::SeqCst),
            port => port,
        };
        let local = SocketAddr::new(ip, port);

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut fabric = self.fabric.lock().unwrap();
            let table = fabric
                .table(self.gateway)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "gateway missing"))?;
            if table.contains_key(&local) {
                return Err(io::Error::new(io::ErrorKind::AddrInUse, local.to_string()));
            }
            table.insert(local, tx);
        }

        Ok(Arc::new(VirtualConn {
            fabric: self.fabric.clone(),
            local,
            gateway: self.gateway,
            rx: tokio::sync::Mutex::new(rx),
        }))
    }

    async fn resolve(&self, host: &str) -> io::Result<SocketAddr> {
        if let Ok(addr) = host.parse::<SocketAddr>() {
            return Ok(addr);
        }
        let (name, port) = host
            .rsplit_once(':')
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, host.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, host.to_string()))?;
        let ip = self
            .fabric
            .lock()
            .unwrap()
            .names
            .get(name)
            .copied()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))?;
        Ok(SocketAddr::new(ip, port))
    }
}

pub struct VirtualConn {
    fabric: Arc<Mutex<Fabric>>,
    local: SocketAddr,
    gateway: Option<IpAddr>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

#[async_trait]
impl PacketConn for VirtualConn {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.fabric
            .lock()
            .unwrap()
            .send(self.local, self.gateway, target, buf.to_vec());
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some((data, from)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok((len, from))
            }
            None => Err(io::Error::new(io::ErrorKind::ConnectionAborted, "socket closed")),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }
}

impl Drop for VirtualConn {
    fn drop(&mut self) {
        let mut fabric = self.fabric.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(table) = fabric.table(self.gateway) {
            table.remove(&self.local);
        }
    }
}

/// How the mock STUN server treats requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    /// Honors CHANGE-REQUEST
    Normal,
    /// Always answers from the socket the request arrived on
    IgnoreChangeRequest,
    /// Never answers
    Silent,
}

/// RFC 5780 test server listening on every combination of two IPs and two ports
pub struct StunServer {
    tasks: Vec<JoinHandle<()>>,
}

impl StunServer {
    pub async fn start(
        net: &dyn Net,
        primary: SocketAddr,
        secondary: SocketAddr,
        mode: ServerMode,
    ) -> io::Result<Self> {
        let addrs = [
            primary,
            SocketAddr::new(primary.ip(), secondary.port()),
            SocketAddr::new(secondary.ip(), primary.port()),
            secondary,
        ];

        let mut conns = Vec::with_capacity(addrs.len());
        for addr in addrs {
            tracing::debug!("stun server listening on {}", addr);
            conns.push(net.bind(addr).await?);
        }
        let conns: Arc<Vec<Arc<dyn PacketConn>>> = Arc::new(conns);

        let tasks = (0..addrs.len())
            .map(|index| {
                let conns = conns.clone();
                tokio::spawn(async move { serve(conns, addrs, index, mode).await })
            })
            .collect();
        Ok(Self { tasks })
    }
}

impl Drop for StunServer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn serve(
    conns: Arc<Vec<Arc<dyn PacketConn>>>,
    addrs: [SocketAddr; 4],
    index: usize,
    mode: ServerMode,
) {
    let mut buf = vec![0u8; 1500];
    loop {
        let (len, from) = match conns[index].recv_from(&mut buf).await {
            Ok(result) => result,
            Err(_) => return,
        };
        let req = match Message::decode(&buf[..len]) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!("stun server: failed to decode: {}", e);
                continue;
            }
        };
        if req.typ.class != MessageClass::Request || mode == ServerMode::Silent {
            continue;
        }

        let mut reply_from = index;
        if let Ok(change) = ChangeRequestAttribute::get_from(&req, AttrType::CHANGE_REQUEST) {
            tracing::debug!("stun server: CHANGE-REQUEST: {}", change);
            if mode == ServerMode::Normal {
                if change.change_ip {
                    reply_from ^= 0x2;
                }
                if change.change_port {
                    reply_from ^= 0x1;
                }
            }
        }

        let mut res = Message::binding_success(req.transaction_id);
        res.set_xor_mapped_address(from);
        AddressAttribute::from(addrs[3]).add_to(&mut res, AttrType::CHANGED_ADDRESS);
        let _ = conns[reply_from].send_to(&res.encode(), from).await;
    }
}

/// Client host, gateway and STUN server wired together
pub struct Scenario {
    pub net: VirtualNetwork,
    pub client: Arc<VirtualHost>,
    pub server: StunServer,
}

pub const STUN_NAME: &str = "stun.pion.net";

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

pub async fn build_scenario(gateway: GatewayConfig, mode: ServerMode) -> Scenario {
    init_logging();

    let net = VirtualNetwork::new();
    net.add_name(STUN_NAME, ip("1.2.3.4"));

    let server_host = net.wan_host(&[ip("1.2.3.4"), ip("1.2.3.5")]);
    let server = StunServer::start(
        &*server_host,
        "1.2.3.4:3478".parse().unwrap(),
        "1.2.3.5:3479".parse().unwrap(),
        mode,
    )
    .await
    .unwrap();

    let client = if gateway.nat {
        net.gated_host(ip("192.168.0.2"), ip("27.1.1.1"), gateway)
    } else {
        net.gated_host(ip("1.2.3.100"), ip("1.2.3.100"), gateway)
    };

    Scenario {
        net,
        client,
        server,
    }
}
