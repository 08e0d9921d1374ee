//! Client-facing configuration and a minimal Kerberos client.
//!
//! - [`krb5conf`] - Generated client configuration
//! - [`ambient`] - Process-wide client context handoff
//! - [`kinit`] - AS and TGS exchanges against a running KDC

pub mod ambient;
pub mod kinit;
pub mod krb5conf;

pub use ambient::{active_client_config, AmbientClientContext, InMemoryContext, ProcessEnvironment};
pub use kinit::{Credentials, KdcClient, TicketOptions};
pub use krb5conf::Krb5Conf;
