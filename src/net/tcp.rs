//! TCP transport.
//!
//! Each connection carries record-marked Kerberos messages. Requests are
//! answered in order; a malformed frame closes the connection.

use super::{ListenerMetrics, ListenerState};
use crate::core::error::{KdcError, KdcResult};
use crate::protocol::{DecodeResult, FrameCodec, KdcService, RecordMarkCodec};
use bytes::BytesMut;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

/// Settings for the stream transport.
#[derive(Debug, Clone)]
pub struct TcpListenerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,

    /// Connections served at once; further clients are dropped.
    pub max_connections: usize,

    /// Close a connection after this long without a complete request.
    pub idle_timeout: Duration,

    /// Read buffer size.
    pub read_buffer_size: usize,

    /// Largest accepted frame.
    pub max_frame: usize,

    /// Send replies without Nagle delay.
    pub nodelay: bool,
}

impl TcpListenerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }
}

impl Default for TcpListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            max_connections: 256,
            idle_timeout: Duration::from_secs(30),
            read_buffer_size: 8 * 1024,
            max_frame: crate::protocol::codec::DEFAULT_MAX_FRAME,
            nodelay: true,
        }
    }
}

/// Per-listener connection number, used in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepted TCP connection with metadata.
pub struct TcpConnection {
    pub id: ConnectionId,
    pub remote_addr: SocketAddr,
    stream: TcpStream,
}

impl TcpConnection {
    pub fn new(id: ConnectionId, stream: TcpStream, remote_addr: SocketAddr) -> Self {
        Self {
            id,
            remote_addr,
            stream,
        }
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

/// Kerberos TCP listener.
pub struct TcpListener {
    config: TcpListenerConfig,
    state: RwLock<ListenerState>,
    next_conn_id: AtomicU64,
    shutting_down: AtomicBool,
    shutdown_rx: watch::Receiver<bool>,
    metrics: Arc<ListenerMetrics>,
}

impl TcpListener {
    pub fn new(config: TcpListenerConfig, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            config,
            state: RwLock::new(ListenerState::Created),
            next_conn_id: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
            shutdown_rx,
            metrics: Arc::new(ListenerMetrics::default()),
        }
    }

    pub fn config(&self) -> &TcpListenerConfig {
        &self.config
    }

    pub fn state(&self) -> ListenerState {
        *self.state.read()
    }

    pub fn metrics(&self) -> &Arc<ListenerMetrics> {
        &self.metrics
    }

    /// Whether another client would exceed `max_connections`.
    pub fn at_capacity(&self) -> bool {
        self.metrics.active_connections() >= self.config.max_connections as u64
    }

    fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_conn_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> KdcResult<TokioTcpListener> {
        *self.state.write() = ListenerState::Binding;

        let listener = TokioTcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|source| {
                *self.state.write() = ListenerState::Stopped;
                KdcError::Bind {
                    transport: "tcp".to_string(),
                    address: self.config.bind_addr.to_string(),
                    source,
                }
            })?;

        *self.state.write() = ListenerState::Listening;
        Ok(listener)
    }

    /// Accept a connection, or `None` once shutdown is signalled.
    pub async fn accept(&self, listener: &TokioTcpListener) -> KdcResult<Option<TcpConnection>> {
        if self.shutting_down.load(Ordering::Relaxed) || *self.shutdown_rx.borrow() {
            return Ok(None);
        }

        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::select! {
            result = listener.accept() => {
                let (stream, addr) = result?;
                if self.at_capacity() {
                    self.metrics.connection_rejected();
                    drop(stream);
                    return Err(KdcError::protocol(format!(
                        "connection limit reached, dropped {addr}"
                    )));
                }
                if self.config.nodelay {
                    let _ = stream.set_nodelay(true);
                }
                let id = self.next_connection_id();
                self.metrics.connection_accepted();
                Ok(Some(TcpConnection::new(id, stream, addr)))
            }
            _ = shutdown_rx.changed() => {
                Ok(None)
            }
        }
    }

    /// Accept connections until shutdown, answering each on its own task.
    pub async fn serve(self: Arc<Self>, listener: TokioTcpListener, service: Arc<KdcService>) {
        let mut connections = JoinSet::new();
        loop {
            match self.accept(&listener).await {
                Ok(Some(conn)) => {
                    let this = Arc::clone(&self);
                    let service = Arc::clone(&service);
                    connections.spawn(async move {
                        let id = conn.id;
                        let remote = conn.remote_addr;
                        if let Err(e) = this.handle_connection(conn, &service).await {
                            debug!(conn = %id, remote = %remote, error = %e, "connection ended with error");
                        }
                        this.metrics.connection_closed();
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
            while connections.try_join_next().is_some() {}
        }

        self.shutdown();
        drop(listener);
        connections.shutdown().await;
        self.stopped();
    }

    async fn handle_connection(&self, conn: TcpConnection, service: &KdcService) -> KdcResult<()> {
        let id = conn.id;
        let mut stream = conn.into_stream();
        let codec = RecordMarkCodec::new(self.config.max_frame);
        let mut buffer = BytesMut::with_capacity(self.config.read_buffer_size);
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            loop {
                match codec.decode(&mut buffer) {
                    DecodeResult::Complete(frame) => {
                        let reply = service.handle(&frame);
                        let framed = codec.encode(&reply);
                        stream.write_all(&framed).await?;
                        self.metrics.request(frame.len(), framed.len());
                        trace!(conn = %id, request = frame.len(), reply = reply.len(), "answered");
                    }
                    DecodeResult::Incomplete => break,
                    DecodeResult::Invalid(reason) => {
                        self.metrics.invalid_request();
                        return Err(KdcError::protocol(reason));
                    }
                }
            }

            let read = tokio::select! {
                read = tokio::time::timeout(self.config.idle_timeout, stream.read_buf(&mut buffer)) => read,
                _ = shutdown_rx.changed() => return Ok(()),
            };
            match read {
                Ok(Ok(0)) => return Ok(()),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    debug!(conn = %id, "idle timeout");
                    return Ok(());
                }
            }
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        *self.state.write() = ListenerState::ShuttingDown;
    }

    /// Mark as stopped.
    pub fn stopped(&self) {
        *self.state.write() = ListenerState::Stopped;
    }
}
