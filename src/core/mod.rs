//! Core harness infrastructure.
//!
//! - [`config`] - Property loading, defaults and validation
//! - [`error`] - Error taxonomy
//! - [`runtime`] - The [`MiniKdc`](runtime::MiniKdc) lifecycle
//! - [`template`] - `${token}` substitution
//! - [`time`] - Kerberos timestamps
//! - [`cleanup`] - Working-directory removal

pub mod cleanup;
pub mod config;
pub mod error;
pub mod runtime;
pub mod template;
pub mod time;
