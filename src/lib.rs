//! MiniKdc - an embeddable, ephemeral Kerberos KDC for integration tests.
//!
//! A [`MiniKdc`] stands up a small identity store, serves the Kerberos AS and
//! TGS exchanges on a real (or OS-assigned) port, provisions principals and
//! keytabs, and publishes a generated `krb5.conf` so co-located clients find it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     MiniKdc (core::runtime)                     │
//! │   start: workdir → identity store → server → client config      │
//! │   stop:  client config → server → identity store → workdir      │
//! └─────────────────────────────────────────────────────────────────┘
//!        │                    │                      │
//! ┌──────────────┐  ┌──────────────────┐  ┌──────────────────────┐
//! │  provision   │  │ net + protocol   │  │       client         │
//! │ principals,  │  │ TCP/UDP, AS/TGS  │  │ krb5.conf, ambient   │
//! │ keytabs      │  │ exchanges        │  │ context, AS/TGS      │
//! └──────────────┘  └──────────────────┘  └──────────────────────┘
//!        │                    │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │       storage (directory, schema, partitions)  │  crypto        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> minikdc::KdcResult<()> {
//! use minikdc::{KdcConfig, MiniKdc};
//!
//! let base = std::env::temp_dir();
//! let kdc = MiniKdc::new(KdcConfig::defaults(), &base);
//! kdc.start().await?;
//! let password = kdc
//!     .create_principals_with_keytab(&base.join("test.keytab"), &["alice", "HTTP/localhost"])
//!     .await?;
//! let tgt = kdc.client()?.request_tgt("alice", &password).await?;
//! println!("{}", tgt.client_principal());
//! kdc.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Single instance per process
//!
//! The process environment (`KRB5_CONFIG`, `KRB5_DEBUG`) can be owned by one
//! running instance at a time. Run several instances with
//! [`MiniKdc::with_context`] and an [`InMemoryContext`].

// Harness infrastructure
pub mod core;

// Key derivation and encryption
pub mod crypto;

// Identity store
pub mod storage;

// Kerberos messages and ticket issuance
pub mod protocol;

// Listeners
pub mod net;

// Client configuration and in-process client
pub mod client;

// Principal and keytab provisioning
pub mod provision;

// Standalone runner
pub mod cli;

pub use self::core::config::{KdcConfig, Transport};
pub use self::core::error::{ErrorKind, KdcError, KdcResult};
pub use self::core::runtime::{KdcState, MiniKdc};
pub use self::core::{config, error, runtime};
pub use client::{AmbientClientContext, InMemoryContext, KdcClient, Krb5Conf, ProcessEnvironment};
pub use provision::{Keytab, KeytabEntry};
