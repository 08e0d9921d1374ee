//! Principal and keytab provisioning.

pub mod keytab;
pub mod principal;

pub use keytab::{Keytab, KeytabEntry};
pub use principal::Provisioner;
