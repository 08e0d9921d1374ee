//! Error types and classification.
//!
//! Every fallible operation in the crate returns [`KdcError`]. Each variant
//! belongs to exactly one [`ErrorKind`], which callers can use to decide how
//! to react (fix configuration, retry with a fresh instance, give up).

use std::path::PathBuf;
use thiserror::Error;

/// Common MiniKdc error conditions.
#[derive(Debug, Error)]
pub enum KdcError {
    /// One or more required configuration properties are absent.
    #[error("missing configuration properties: {}", keys.join(", "))]
    MissingProperties { keys: Vec<String> },

    /// A configuration property holds a value that cannot be used.
    #[error("invalid configuration property {key}={value:?}: {reason}")]
    InvalidProperty {
        key: String,
        value: String,
        reason: String,
    },

    /// The configuration source could not be read or parsed.
    #[error("failed to load configuration from {}: {message}", path.display())]
    ConfigSource { path: PathBuf, message: String },

    /// Schema could not be extracted or loaded.
    #[error("schema load failed: {message}")]
    SchemaLoad { message: String },

    /// A directory partition could not be started.
    #[error("partition {partition} failed to start: {message}")]
    PartitionStart { partition: String, message: String },

    /// The instance working directory could not be created.
    #[error("cannot create working directory {}: {source}", path.display())]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An entry violates the loaded schema.
    #[error("schema violation for {dn}: {message}")]
    SchemaViolation { dn: String, message: String },

    /// Baseline entry template is malformed.
    #[error("invalid entry description at line {line}: {message}")]
    Ldif { line: usize, message: String },

    /// The bind address could not be resolved.
    #[error("cannot resolve bind address {address}: {message}")]
    AddressResolution { address: String, message: String },

    /// The protocol server could not bind its transport.
    #[error("failed to bind {transport} transport on {address}: {source}")]
    Bind {
        transport: String,
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// `start()` called on a running instance.
    #[error("MiniKdc already started")]
    AlreadyStarted,

    /// `start()` called on an instance that has been stopped.
    #[error("MiniKdc already stopped; create a new instance")]
    AlreadyStopped,

    /// Operation requires a running instance.
    #[error("MiniKdc is not running")]
    NotRunning,

    /// The process-wide client context is owned by another instance.
    #[error("Kerberos client context already owned by another MiniKdc instance")]
    AmbientContextBusy,

    /// An entry with the same distinguished name already exists.
    #[error("entry already exists: {dn}")]
    DuplicateEntry { dn: String },

    /// No partition accepts the entry's distinguished name.
    #[error("no partition for {dn}")]
    NoSuchPartition { dn: String },

    /// A cipher suite has no key-derivation support.
    #[error("unsupported encryption type {etype}")]
    UnsupportedCipher { etype: i32 },

    /// Cryptographic operation failed (bad key length, integrity failure).
    #[error("crypto failure: {message}")]
    Crypto { message: String },

    /// Keytab or client configuration file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Keytab bytes are malformed.
    #[error("invalid keytab: {message}")]
    InvalidKeytab { message: String },

    /// Malformed or unexpected protocol data.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// KDC answered with a KRB-ERROR.
    #[error("KDC returned error {code}: {text}")]
    KdcReply { code: i32, text: String },

    /// Shutdown of a component failed.
    #[error("teardown of {component} failed: {message}")]
    Teardown { component: String, message: String },

    /// Generic I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification of [`KdcError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or missing configuration, fatal at construction.
    Configuration,
    /// Identity store bootstrap failure, fatal before any port is bound.
    Bootstrap,
    /// Transport bind failure, fatal at start.
    Bind,
    /// Principal or keytab provisioning failure.
    Provisioning,
    /// Lifecycle misuse (double start, not running, context busy).
    Lifecycle,
    /// Malformed wire data or KDC error reply.
    Protocol,
    /// Component shutdown failure; logged only.
    Teardown,
}

impl KdcError {
    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a crypto error.
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create an invalid property error.
    pub fn invalid_property(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidProperty {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingProperties { .. }
            | Self::InvalidProperty { .. }
            | Self::ConfigSource { .. } => ErrorKind::Configuration,
            Self::SchemaLoad { .. }
            | Self::PartitionStart { .. }
            | Self::WorkDir { .. }
            | Self::Ldif { .. } => ErrorKind::Bootstrap,
            Self::AddressResolution { .. } | Self::Bind { .. } => ErrorKind::Bind,
            Self::AlreadyStarted
            | Self::AlreadyStopped
            | Self::NotRunning
            | Self::AmbientContextBusy => ErrorKind::Lifecycle,
            Self::SchemaViolation { .. }
            | Self::DuplicateEntry { .. }
            | Self::NoSuchPartition { .. }
            | Self::UnsupportedCipher { .. }
            | Self::Crypto { .. }
            | Self::FileWrite { .. }
            | Self::InvalidKeytab { .. }
            | Self::Io(_) => ErrorKind::Provisioning,
            Self::Protocol { .. } | Self::KdcReply { .. } => ErrorKind::Protocol,
            Self::Teardown { .. } => ErrorKind::Teardown,
        }
    }

    /// Whether a fresh instance may succeed where this one failed.
    ///
    /// Only bind failures qualify: a port probed free can be taken by another
    /// process before the server binds it.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Bind { .. })
    }
}

/// Result type using KdcError.
pub type KdcResult<T> = Result<T, KdcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_properties_lists_every_key() {
        let err = KdcError::MissingProperties {
            keys: vec!["kdc.port".to_string(), "org.name".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "missing configuration properties: kdc.port, org.name"
        );
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn kinds() {
        assert_eq!(KdcError::AlreadyStarted.kind(), ErrorKind::Lifecycle);
        assert_eq!(
            KdcError::DuplicateEntry { dn: "uid=a".into() }.kind(),
            ErrorKind::Provisioning
        );
        assert_eq!(
            KdcError::UnsupportedCipher { etype: 3 }.kind(),
            ErrorKind::Provisioning
        );
        assert_eq!(KdcError::protocol("x").kind(), ErrorKind::Protocol);
    }

    #[test]
    fn only_bind_is_retriable() {
        let bind = KdcError::Bind {
            transport: "TCP".into(),
            address: "127.0.0.1:88".into(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(bind.is_retriable());
        assert_eq!(bind.kind(), ErrorKind::Bind);
        assert!(!KdcError::NotRunning.is_retriable());
    }
}
