//! Kerberos v5 protocol.
//!
//! - [`der`] - ASN.1 DER encoding
//! - [`messages`] - Message types for the AS and TGS exchanges
//! - [`codec`] - Stream framing
//! - [`kdc`] - Ticket issuance

pub mod codec;
pub mod der;
pub mod kdc;
pub mod messages;

pub use codec::{DecodeResult, FrameCodec, RecordMarkCodec};
pub use kdc::{KdcPolicy, KdcService, PrincipalStore};
