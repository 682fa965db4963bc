//! Discovery engine
//!
//! A run consists of two phases that overlap in time:
//!
//! 1. Filtering (spawned task, own socket): two binding requests to the
//!    primary server address carrying CHANGE-REQUEST, one asking for a reply
//!    from the alternate IP and port, one asking for the alternate port only.
//!    Which replies make it through the NAT tells how it filters.
//! 2. Mapping (caller's task, own socket): four plain binding requests, first
//!    to the primary address and then to the three alternates derived from
//!    CHANGED-ADDRESS. Comparing the reflexive ports tells how it maps.
//!
//! The filtering task reports `(behavior, error)` over a oneshot channel which
//! the caller awaits after the mapping phase.

use anyhow::Context;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::codec::attr::{AddressAttribute, AttrType, ChangeRequestAttribute};
use crate::codec::message::Message;
use crate::network::{Net, TransactionClient, TransactionConfig, TransactionError, UdpNet};
use crate::nat::config::DiscoverConfig;
use crate::nat::errors::DiscoverError;
use crate::nat::{DiscoverResult, EndpointDependencyType, nat_type_label};
use crate::utils::format_host_port;

/// Port used when the server address does not name one
pub const DEFAULT_STUN_PORT: u16 = 3478;

const UNSPECIFIED_V4: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

/// What the filtering task hands back to the caller
type FilteringOutcome = (EndpointDependencyType, Option<crate::Error>);

/// Discovers NAT behavior against one STUN server
pub struct Nats {
    server_addr: SocketAddr,
    verbose: bool,
    net: Arc<dyn Net>,
    transaction_config: TransactionConfig,
}

/// Result of one CHANGE-REQUEST probe
#[derive(Debug)]
enum ProbeOutcome {
    /// Reply arrived from the requested alternate endpoint
    Received,
    /// Nothing came back: the NAT dropped the reply
    NotReceived,
    /// Reply came from the unchanged endpoint
    Ignored(DiscoverError),
    /// The request could not be carried out
    Failed(DiscoverError),
}

/// Observations of the mapping phase
#[derive(Debug, Clone, PartialEq, Eq)]
struct MappingObservation {
    local_port: u16,
    mapped: [SocketAddr; 4],
}

impl Nats {
    /// Resolves the server address and prepares a discovery run
    ///
    /// A server given without a port gets 3478.
    pub async fn new(config: &DiscoverConfig, net: Arc<dyn Net>) -> crate::Result<Self> {
        let server = format_host_port(&config.server, DEFAULT_STUN_PORT);
        let server_addr = net
            .resolve(&server)
            .await
            .with_context(|| format!("failed to resolve STUN server {}", server))?;

        Ok(Self {
            server_addr,
            verbose: config.verbose,
            net,
            transaction_config: config.transaction_config(),
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Performs the RFC 5780 discovery procedure
    ///
    /// Either a complete result or an error is returned, never a partial
    /// result. An error captured by the filtering phase fails the run even
    /// when the mapping phase succeeded.
    pub async fn discover(&self) -> crate::Result<DiscoverResult> {
        let conn = self
            .net
            .bind(UNSPECIFIED_V4)
            .await
            .context("failed to bind mapping socket")?;
        let local_addr = conn.local_addr()?;
        if self.verbose {
            tracing::info!("Local port: {}", local_addr.port());
        }

        let mut client =
            TransactionClient::new(conn, self.server_addr, self.transaction_config.clone());
        client.listen()?;
        if self.verbose {
            tracing::info!("STUN server: {}", client.stun_server_addr());
        }

        // Run filtering behavior discovery in parallel
        let filtering = match self.start_filtering_discovery().await {
            Ok(filtering) => filtering,
            Err(e) => {
                client.close().await;
                return Err(e);
            }
        };

        let observation = self.discover_mapping(&client, local_addr.port()).await;
        client.close().await;
        drop(client);
        let observation = match observation {
            Ok(observation) => observation,
            Err(e) => {
                filtering.cancel().await;
                return Err(e);
            }
        };

        let is_natted = !self.is_local_ip(observation.mapped[0].ip()).await;
        let mapping_behavior = classify_mapping(is_natted, &observation.mapped);

        // Wait for filtering behavior discovery to complete
        let (filtering_behavior, filtering_err) = filtering.wait().await?;
        if let Some(e) = filtering_err {
            return Err(e);
        }

        let res = DiscoverResult {
            is_natted,
            mapping_behavior,
            filtering_behavior,
            port_preservation: observation.mapped[0].port() == observation.local_port,
            nat_type: nat_type_label(is_natted, mapping_behavior, filtering_behavior).to_string(),
            external_ip: observation.mapped[0].ip().to_string(),
        };
        tracing::debug!("discovery finished: {:?}", res);
        Ok(res)
    }

    /// Sequential binding requests to the primary address and the three
    /// alternates derived from CHANGED-ADDRESS
    async fn discover_mapping(
        &self,
        client: &TransactionClient,
        local_port: u16,
    ) -> crate::Result<MappingObservation> {
        let primary = client.stun_server_addr();
        let mut to_addrs = [primary; 4];
        let mut mapped = [primary; 4];

        for i in 0..to_addrs.len() {
            let to = to_addrs[i];
            let res = client
                .perform_transaction(&Message::binding_request(), to)
                .await
                .map_err(|source| DiscoverError::Transaction {
                    probe: i,
                    to,
                    source,
                })?;

            mapped[i] = res
                .msg
                .mapped_address()
                .map_err(|source| DiscoverError::MissingAttribute {
                    probe: i,
                    attr: AttrType::XOR_MAPPED_ADDRESS,
                    source,
                })?;
            if self.verbose {
                tracing::info!("MAPPED-ADDRESS [{}]: {}", i, mapped[i]);
            }

            if i == 0 {
                let changed = changed_address(&res.msg)?;
                if self.verbose {
                    tracing::info!("CHANGED-ADDRESS: {}", changed);
                }
                to_addrs[1] = SocketAddr::new(primary.ip(), changed.port);
                to_addrs[2] = SocketAddr::new(changed.ip, primary.port());
                to_addrs[3] = SocketAddr::new(changed.ip, changed.port);
            }
        }

        Ok(MappingObservation { local_port, mapped })
    }

    /// An IP is local when a socket can be bound to it
    async fn is_local_ip(&self, ip: IpAddr) -> bool {
        self.net.bind(SocketAddr::new(ip, 0)).await.is_ok()
    }

    /// Binds the filtering socket and spawns the filtering task
    async fn start_filtering_discovery(&self) -> crate::Result<FilteringDiscovery> {
        let conn = self
            .net
            .bind(UNSPECIFIED_V4)
            .await
            .context("failed to bind filtering socket")?;
        if self.verbose {
            tracing::info!(
                "Local port: {} (for filtering discovery)",
                conn.local_addr()?.port()
            );
        }

        let mut client =
            TransactionClient::new(conn, self.server_addr, self.transaction_config.clone());
        client.listen()?;

        let (done_tx, done_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let verbose = self.verbose;
        let handle = tokio::spawn(async move {
            let outcome = tokio::select! {
                outcome = discover_filtering_behavior(&client, verbose) => Some(outcome),
                _ = cancel_rx => None,
            };
            // socket goes away before the caller hears back
            client.close().await;
            drop(client);
            if let Some(outcome) = outcome {
                let _ = done_tx.send(outcome);
            }
        });

        Ok(FilteringDiscovery {
            done: done_rx,
            cancel: cancel_tx,
            handle,
        })
    }
}

/// Runs a discovery against `server` over the operating system's UDP stack
pub async fn discover(server: &str, verbose: bool) -> crate::Result<DiscoverResult> {
    let config = DiscoverConfig {
        server: server.to_string(),
        verbose,
        ..DiscoverConfig::default()
    };
    Nats::new(&config, Arc::new(UdpNet)).await?.discover().await
}

/// Handle on the running filtering task
///
/// Dropping the handle drops the cancel sender, which makes the task stop its
/// probes and close its transaction client on its own.
struct FilteringDiscovery {
    done: oneshot::Receiver<FilteringOutcome>,
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl FilteringDiscovery {
    async fn wait(self) -> crate::Result<FilteringOutcome> {
        let outcome = self
            .done
            .await
            .map_err(|_| DiscoverError::FilteringAborted)?;
        Ok(outcome)
    }

    /// Stops the task and waits until its socket is released
    async fn cancel(self) {
        let _ = self.cancel.send(());
        let _ = self.handle.await;
    }
}

async fn discover_filtering_behavior(client: &TransactionClient, verbose: bool) -> FilteringOutcome {
    let (independent, address) = tokio::join!(
        probe_with_change_request(client, ChangeRequestAttribute::new(true, true)),
        probe_with_change_request(client, ChangeRequestAttribute::new(false, true)),
    );
    if verbose {
        tracing::info!("recv1={:?} recv2={:?}", independent, address);
    }
    classify_filtering(independent, address)
}

/// Sends a binding request carrying `change` to the primary server address
async fn probe_with_change_request(
    client: &TransactionClient,
    change: ChangeRequestAttribute,
) -> ProbeOutcome {
    let mut msg = Message::binding_request();
    change.add_to(&mut msg, AttrType::CHANGE_REQUEST);

    let server = client.stun_server_addr();
    let res = match client.perform_transaction(&msg, server).await {
        Ok(res) => res,
        Err(TransactionError::Timeout) => return ProbeOutcome::NotReceived,
        Err(source) => {
            return ProbeOutcome::Failed(DiscoverError::FilteringProbe {
                change: change_label(change),
                source,
            });
        }
    };

    // Check if CHANGE-REQUEST was served by the server
    if change.change_ip && res.from.ip() == server.ip() {
        return ProbeOutcome::Ignored(DiscoverError::ChangeRequestIgnored("IP"));
    }
    if change.change_port && res.from.port() == server.port() {
        return ProbeOutcome::Ignored(DiscoverError::ChangeRequestIgnored("Port"));
    }
    ProbeOutcome::Received
}

fn change_label(change: ChangeRequestAttribute) -> &'static str {
    match (change.change_ip, change.change_port) {
        (true, true) => "change IP and port",
        (true, false) => "change IP",
        (false, true) => "change port",
        (false, false) => "no change",
    }
}

/// CHANGED-ADDRESS, falling back to its RFC 5780 name OTHER-ADDRESS
fn changed_address(msg: &Message) -> crate::Result<AddressAttribute> {
    AddressAttribute::get_from(msg, AttrType::CHANGED_ADDRESS)
        .or_else(|_| AddressAttribute::get_from(msg, AttrType::OTHER_ADDRESS))
        .map_err(|source| {
            DiscoverError::MissingAttribute {
                probe: 0,
                attr: AttrType::CHANGED_ADDRESS,
                source,
            }
            .into()
        })
}

/// Mapping behavior from the four reflexive addresses
///
/// `mapped[1]` answered from the alternate port, `mapped[2]` from the
/// alternate IP. A port change towards the alternate IP means the mapping is
/// at least address dependent; a change towards the alternate port on the same
/// IP makes it address and port dependent.
fn classify_mapping(is_natted: bool, mapped: &[SocketAddr; 4]) -> EndpointDependencyType {
    if !is_natted || mapped[0].port() == mapped[2].port() {
        return EndpointDependencyType::Independent;
    }
    if mapped[0].port() != mapped[1].port() {
        EndpointDependencyType::AddrPortDependent
    } else {
        EndpointDependencyType::AddrDependent
    }
}

/// Filtering behavior from the two CHANGE-REQUEST probes
///
/// A probe that failed outright makes the behavior undefined. A server that
/// ignored a CHANGE-REQUEST is reported as an error alongside the behavior.
fn classify_filtering(independent: ProbeOutcome, address: ProbeOutcome) -> FilteringOutcome {
    let mut error: Option<crate::Error> = None;
    let mut received = [false; 2];

    for (i, outcome) in [independent, address].into_iter().enumerate() {
        match outcome {
            ProbeOutcome::Received => received[i] = true,
            ProbeOutcome::NotReceived => {}
            ProbeOutcome::Ignored(e) => {
                error.get_or_insert_with(|| e.into());
            }
            ProbeOutcome::Failed(e) => {
                return (EndpointDependencyType::Undefined, Some(e.into()));
            }
        }
    }

    let behavior = if received[0] {
        EndpointDependencyType::Independent
    } else if received[1] {
        EndpointDependencyType::AddrDependent
    } else {
        EndpointDependencyType::AddrPortDependent
    };
    (behavior, error)
}
