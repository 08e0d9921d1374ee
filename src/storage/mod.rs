//! Identity store.
//!
//! A small hierarchical directory holding the realm's principals and the
//! structural entries around them.
//!
//! # Modules
//!
//! - [`dn`] - Distinguished names
//! - [`entry`] - Entries and attributes
//! - [`ldif`] - Entry-description parsing for seeding
//! - [`schema`] - Object classes and attribute types
//! - [`journal`] - Append-only partition journal
//! - [`partition`] - Naming contexts with attribute indexes
//! - [`directory`] - The directory service and its bootstrapper
//!
//! # Invariants
//!
//! - Every stored entry passed the schema and has an existing parent
//! - A partition's journal is written before its in-memory view changes
//! - Principal entries carry keys derived from their password at add time

pub mod directory;
pub mod dn;
pub mod entry;
pub mod journal;
pub mod ldif;
pub mod partition;
pub mod schema;

pub use directory::{bootstrap, DirectoryService, Interceptor, KeyDerivationInterceptor};
pub use dn::Dn;
pub use entry::Entry;
