//! UDP transport: one request per datagram, one reply datagram back.

use super::{ListenerMetrics, ListenerState};
use crate::core::error::{KdcError, KdcResult};
use crate::protocol::KdcService;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Largest datagram the listener reads.
pub const MAX_DATAGRAM: usize = 65_507;

/// Kerberos UDP listener.
pub struct UdpListener {
    bind_addr: SocketAddr,
    state: RwLock<ListenerState>,
    shutdown_rx: watch::Receiver<bool>,
    metrics: Arc<ListenerMetrics>,
}

impl UdpListener {
    pub fn new(bind_addr: SocketAddr, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            bind_addr,
            state: RwLock::new(ListenerState::Created),
            shutdown_rx,
            metrics: Arc::new(ListenerMetrics::default()),
        }
    }

    pub fn state(&self) -> ListenerState {
        *self.state.read()
    }

    pub fn metrics(&self) -> &Arc<ListenerMetrics> {
        &self.metrics
    }

    pub async fn bind(&self) -> KdcResult<UdpSocket> {
        *self.state.write() = ListenerState::Binding;
        let socket = UdpSocket::bind(self.bind_addr).await.map_err(|source| {
            *self.state.write() = ListenerState::Stopped;
            KdcError::Bind {
                transport: "udp".to_string(),
                address: self.bind_addr.to_string(),
                source,
            }
        })?;
        *self.state.write() = ListenerState::Listening;
        Ok(socket)
    }

    /// Answer datagrams until shutdown is signalled.
    pub async fn serve(self: Arc<Self>, socket: UdpSocket, service: Arc<KdcService>) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut buffer = vec![0u8; MAX_DATAGRAM];

        while !*shutdown_rx.borrow() {
            let received = tokio::select! {
                received = socket.recv_from(&mut buffer) => received,
                _ = shutdown_rx.changed() => break,
            };
            let (len, peer) = match received {
                Ok(r) => r,
                Err(e) => {
                    // ICMP port-unreachable from an earlier reply surfaces here on some platforms.
                    debug!(error = %e, "recv failed");
                    continue;
                }
            };
            if len == 0 {
                self.metrics.invalid_request();
                continue;
            }

            let reply = service.handle(&buffer[..len]);
            match socket.send_to(&reply, peer).await {
                Ok(sent) => {
                    self.metrics.request(len, sent);
                    trace!(peer = %peer, request = len, reply = sent, "answered");
                }
                Err(e) => warn!(peer = %peer, error = %e, "send failed"),
            }
        }

        *self.state.write() = ListenerState::ShuttingDown;
        drop(socket);
        *self.state.write() = ListenerState::Stopped;
    }
}
