//! KDC protocol server.
//!
//! Binds the configured transport once and freezes the bound address, so an
//! ephemeral port request (port 0) yields the port clients must use.

use super::tcp::{TcpListener, TcpListenerConfig};
use super::udp::UdpListener;
use super::ListenerMetrics;
use crate::core::config::Transport;
use crate::core::error::{KdcError, KdcResult};
use crate::protocol::KdcService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A running KDC listener.
pub struct KdcServer {
    transport: Transport,
    local_addr: SocketAddr,
    metrics: Arc<ListenerMetrics>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl KdcServer {
    /// Bind `bind_addr` on `transport` and start answering requests.
    pub async fn start(
        bind_addr: SocketAddr,
        transport: Transport,
        service: Arc<KdcService>,
    ) -> KdcResult<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (local_addr, metrics, task) = match transport {
            Transport::Tcp => {
                let listener = Arc::new(TcpListener::new(
                    TcpListenerConfig::new(bind_addr),
                    shutdown_rx,
                ));
                let socket = listener.bind().await?;
                let local_addr = socket.local_addr()?;
                let metrics = Arc::clone(listener.metrics());
                let task = tokio::spawn(listener.serve(socket, service));
                (local_addr, metrics, task)
            }
            Transport::Udp => {
                let listener = Arc::new(UdpListener::new(bind_addr, shutdown_rx));
                let socket = listener.bind().await?;
                let local_addr = socket.local_addr()?;
                let metrics = Arc::clone(listener.metrics());
                let task = tokio::spawn(listener.serve(socket, service));
                (local_addr, metrics, task)
            }
        };

        info!(transport = transport.as_str(), addr = %local_addr, "KDC listening");
        Ok(Self {
            transport,
            local_addr,
            metrics,
            shutdown_tx,
            task: Some(task),
        })
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// The bound address, with the OS-assigned port when port 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn metrics(&self) -> &Arc<ListenerMetrics> {
        &self.metrics
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop accepting, finish in-flight work and release the port.
    pub async fn stop(&mut self) -> KdcResult<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        let _ = self.shutdown_tx.send(true);
        task.await.map_err(|e| KdcError::Teardown {
            component: format!("{} listener", self.transport.as_str()),
            message: e.to_string(),
        })?;
        debug!(
            transport = self.transport.as_str(),
            addr = %self.local_addr,
            requests = self.metrics.requests(),
            "KDC listener stopped"
        );
        Ok(())
    }
}

impl Drop for KdcServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = self.shutdown_tx.send(true);
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::KdcConfig;
    use crate::crypto::KeySet;
    use crate::protocol::{KdcPolicy, PrincipalStore};

    struct EmptyStore;

    impl PrincipalStore for EmptyStore {
        fn find_principal(&self, _principal: &str) -> KdcResult<Option<KeySet>> {
            Ok(None)
        }
    }

    fn service() -> Arc<KdcService> {
        Arc::new(KdcService::new(
            KdcPolicy::from_config(&KdcConfig::defaults()),
            Arc::new(EmptyStore),
        ))
    }

    #[tokio::test]
    async fn ephemeral_port_is_frozen_and_released() {
        for transport in [Transport::Tcp, Transport::Udp] {
            let mut server = KdcServer::start(
                SocketAddr::from(([127, 0, 0, 1], 0)),
                transport,
                service(),
            )
            .await
            .unwrap();
            let addr = server.local_addr();
            assert_ne!(addr.port(), 0);
            assert!(server.is_running());

            server.stop().await.unwrap();
            assert!(!server.is_running());
            server.stop().await.unwrap();

            match transport {
                Transport::Tcp => drop(tokio::net::TcpListener::bind(addr).await.unwrap()),
                Transport::Udp => drop(tokio::net::UdpSocket::bind(addr).await.unwrap()),
            }
        }
    }
}
