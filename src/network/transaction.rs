//! STUN transaction client
//!
//! Sends a request over a [`PacketConn`], retransmits it on an RTO schedule
//! and hands back the response whose transaction ID matches. A single read
//! loop task owns the receive side of the socket and routes every incoming
//! response to whichever caller registered that transaction ID, so several
//! transactions may be in flight on one socket at the same time.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::codec::message::{Message, MessageClass, TransactionId};
use crate::network::PacketConn;

/// UDP receive buffer size
const BUFFER_SIZE: usize = 1500;

/// Upper bound of the doubling retransmission timeout
const MAX_RTO: Duration = Duration::from_millis(1600);

/// Retransmission settings
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Initial retransmission timeout
    pub rto: Duration,

    /// Number of retransmissions after the initial send
    pub max_retransmits: u32,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            rto: Duration::from_millis(500),
            max_retransmits: 6,
        }
    }
}

/// Response matched to a request
#[derive(Debug, Clone)]
pub struct TransactionResult {
    pub msg: Message,

    /// Address the response came from
    pub from: SocketAddr,

    /// Number of retransmissions that were needed
    pub retries: u32,
}

/// Transaction failures
#[derive(Debug)]
pub enum TransactionError {
    /// No matching response after all retransmissions
    Timeout,

    /// The client was closed or its read loop stopped while waiting
    Closed,

    /// `listen()` has not been called
    NotListening,

    /// Sending the request failed
    Io(io::Error),
}

impl std::error::Error for TransactionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransactionError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl Display for TransactionError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransactionError::Timeout => "transaction timed out".fmt(fmt),
            TransactionError::Closed => "transaction client closed".fmt(fmt),
            TransactionError::NotListening => "transaction client is not listening".fmt(fmt),
            TransactionError::Io(e) => write!(fmt, "failed to send request: {}", e),
        }
    }
}

type PendingMap = Arc<Mutex<HashMap<TransactionId, oneshot::Sender<(Message, SocketAddr)>>>>;

/// Removes a pending registration on every exit path of a transaction
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: TransactionId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

pub struct TransactionClient {
    conn: Arc<dyn PacketConn>,
    server_addr: SocketAddr,
    config: TransactionConfig,
    pending: PendingMap,
    read_loop: Option<JoinHandle<()>>,
}

impl TransactionClient {
    pub fn new(conn: Arc<dyn PacketConn>, server_addr: SocketAddr, config: TransactionConfig) -> Self {
        Self {
            conn,
            server_addr,
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
            read_loop: None,
        }
    }

    /// Start the read loop that routes responses to waiting transactions
    pub fn listen(&mut self) -> crate::Result<()> {
        if self.read_loop.is_some() {
            return Err("transaction client is already listening".into());
        }
        let conn = self.conn.clone();
        let pending = self.pending.clone();
        self.read_loop = Some(tokio::spawn(read_loop(conn, pending)));
        Ok(())
    }

    pub fn stun_server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.conn.local_addr()
    }

    /// Send `msg` to `to` and wait for the matching response
    ///
    /// The request is retransmitted with a doubling timeout starting at the
    /// configured RTO, capped at 1.6s.
    pub async fn perform_transaction(
        &self,
        msg: &Message,
        to: SocketAddr,
    ) -> Result<TransactionResult, TransactionError> {
        if self.read_loop.is_none() {
            return Err(TransactionError::NotListening);
        }

        // register before sending so a fast response cannot be missed
        let (tx, mut rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(msg.transaction_id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id: msg.transaction_id,
        };

        let raw = msg.encode();
        let mut rto = self.config.rto;
        for attempt in 0..=self.config.max_retransmits {
            self.conn
                .send_to(&raw, to)
                .await
                .map_err(TransactionError::Io)?;

            match tokio::time::timeout(rto, &mut rx).await {
                Ok(Ok((msg, from))) => {
                    return Ok(TransactionResult {
                        msg,
                        from,
                        retries: attempt,
                    });
                }
                Ok(Err(_)) => return Err(TransactionError::Closed),
                Err(_) => {
                    tracing::trace!(
                        "transaction to {} attempt {}/{} timed out after {:?}",
                        to,
                        attempt + 1,
                        self.config.max_retransmits + 1,
                        rto
                    );
                    rto = (rto * 2).min(MAX_RTO.max(self.config.rto));
                }
            }
        }

        Err(TransactionError::Timeout)
    }

    /// Send `msg` once without registering a transaction
    ///
    /// The ignore-result form of [`perform_transaction`](Self::perform_transaction):
    /// nothing is retransmitted and any response is dropped by the read loop.
    pub async fn send(&self, msg: &Message, to: SocketAddr) -> Result<(), TransactionError> {
        self.conn
            .send_to(&msg.encode(), to)
            .await
            .map_err(TransactionError::Io)?;
        Ok(())
    }

    /// Stop the read loop and fail every pending transaction
    ///
    /// Returns once the read loop is gone, so the socket is only held by this
    /// client afterwards.
    pub async fn close(&mut self) {
        if let Some(handle) = self.read_loop.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl Drop for TransactionClient {
    fn drop(&mut self) {
        if let Some(handle) = self.read_loop.take() {
            handle.abort();
        }
    }
}

async fn read_loop(conn: Arc<dyn PacketConn>, pending: PendingMap) {
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let (len, from) = match conn.recv_from(&mut buf).await {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!("transaction read loop stopped: {}", e);
                break;
            }
        };

        let msg = match Message::decode(&buf[..len]) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("dropping {} bytes from {}: {}", len, from, e);
                continue;
            }
        };

        if matches!(msg.typ.class, MessageClass::Request | MessageClass::Indication) {
            tracing::debug!("dropping unexpected {:?} from {}", msg.typ.class, from);
            continue;
        }

        let waiter = pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&msg.transaction_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send((msg, from));
            }
            None => tracing::debug!("no pending transaction for response from {}", from),
        }
    }

    // wake every waiter with Closed instead of letting them run into the timeout
    pending.lock().unwrap_or_else(|e| e.into_inner()).clear();
}
