//! Networking layer.
//!
//! - [`tcp`] - Stream transport with record-marking framing
//! - [`udp`] - Datagram transport, one message per datagram
//! - [`server`] - The KDC protocol server over either transport

pub mod server;
pub mod tcp;
pub mod udp;

pub use server::KdcServer;

use crate::core::error::{KdcError, KdcResult};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Listener lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Not yet started.
    Created,
    /// Binding to address.
    Binding,
    /// Serving requests.
    Listening,
    /// Shutting down.
    ShuttingDown,
    /// Stopped.
    Stopped,
}

/// Request counters shared by both transports.
#[derive(Debug, Default)]
pub struct ListenerMetrics {
    /// Total connections accepted (TCP only).
    pub connections_total: AtomicU64,
    /// Currently open connections (TCP only).
    pub connections_active: AtomicU64,
    /// Connections refused at capacity.
    pub connections_rejected: AtomicU64,
    /// Requests answered.
    pub requests_total: AtomicU64,
    /// Frames or datagrams that could not be processed.
    pub requests_invalid: AtomicU64,
    /// Total bytes received.
    pub bytes_received: AtomicU64,
    /// Total bytes sent.
    pub bytes_sent: AtomicU64,
}

impl ListenerMetrics {
    pub fn connection_accepted(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one answered request.
    pub fn request(&self, received: usize, sent: usize) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(received as u64, Ordering::Relaxed);
        self.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
    }

    pub fn invalid_request(&self) {
        self.requests_invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> u64 {
        self.connections_active.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }
}

/// Resolve `host:port`, preferring IPv4 results.
pub async fn resolve_bind_addr(host: &str, port: u16) -> KdcResult<SocketAddr> {
    let resolution_err = |message: String| KdcError::AddressResolution {
        address: format!("{host}:{port}"),
        message,
    };
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| resolution_err(e.to_string()))?
        .collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| resolution_err("no addresses".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_counters() {
        let metrics = ListenerMetrics::default();
        metrics.connection_accepted();
        metrics.connection_accepted();
        metrics.connection_closed();
        assert_eq!(metrics.active_connections(), 1);

        metrics.request(100, 200);
        metrics.invalid_request();
        assert_eq!(metrics.requests(), 1);
        assert_eq!(metrics.bytes_sent.load(Ordering::Relaxed), 200);
        assert_eq!(metrics.requests_invalid.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn resolves_localhost() {
        let addr = resolve_bind_addr("localhost", 0).await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 0);
    }

    #[tokio::test]
    async fn unresolvable_host() {
        let err = resolve_bind_addr("no-such-host.invalid", 88).await.unwrap_err();
        assert!(matches!(err, KdcError::AddressResolution { .. }));
    }
}
