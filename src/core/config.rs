//! Configuration parsing and validation.
//!
//! MiniKdc configuration is a flat, string-keyed property set. Defaults from
//! [`KdcConfig::default_properties`] are overlaid with user properties (loaded
//! from a `.properties` or `.toml` file, or built in code) and then validated
//! by [`KdcConfig::from_properties`]. The resulting [`KdcConfig`] is immutable.

use crate::core::error::{KdcError, KdcResult};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Organization name, first half of the realm.
pub const ORG_NAME: &str = "org.name";
/// Organization domain, second half of the realm.
pub const ORG_DOMAIN: &str = "org.domain";
/// Host name or address the KDC binds to.
pub const KDC_BIND_ADDRESS: &str = "kdc.bind.address";
/// KDC port; `0` selects an ephemeral port.
pub const KDC_PORT: &str = "kdc.port";
/// Directory service instance and KDC service name.
pub const INSTANCE: &str = "instance";
/// Maximum ticket lifetime in milliseconds.
pub const MAX_TICKET_LIFETIME: &str = "max.ticket.lifetime";
/// Maximum renewable lifetime in milliseconds.
pub const MAX_RENEWABLE_LIFETIME: &str = "max.renewable.lifetime";
/// `TCP` or `UDP`.
pub const TRANSPORT: &str = "transport";
/// Kerberos client debug flag published to the ambient client context.
pub const DEBUG: &str = "debug";
/// Require PA-ENC-TIMESTAMP pre-authentication.
pub const PREAUTH_REQUIRED: &str = "kdc.preauth.required";
/// Verify the TGS-REQ authenticator checksum over the request body.
pub const BODY_CHECKSUM_VERIFIED: &str = "kdc.body.checksum.verified";

/// Keys that must be present before a configuration can be built.
pub const REQUIRED_PROPERTIES: [&str; 8] = [
    ORG_NAME,
    ORG_DOMAIN,
    KDC_BIND_ADDRESS,
    KDC_PORT,
    INSTANCE,
    TRANSPORT,
    MAX_TICKET_LIFETIME,
    MAX_RENEWABLE_LIFETIME,
];

/// String-keyed configuration properties.
pub type Properties = BTreeMap<String, String>;

/// Transport the protocol server binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Stream transport with 4-byte record marking.
    Tcp,
    /// Datagram transport, one message per datagram.
    Udp,
}

impl Transport {
    /// Property value for this transport.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = KdcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TCP" => Ok(Self::Tcp),
            "UDP" => Ok(Self::Udp),
            _ => Err(KdcError::invalid_property(
                TRANSPORT,
                s,
                "must be 'TCP' or 'UDP'",
            )),
        }
    }
}

/// Validated MiniKdc configuration.
#[derive(Debug, Clone)]
pub struct KdcConfig {
    org_name: String,
    org_domain: String,
    bind_address: String,
    port: u16,
    instance: String,
    max_ticket_lifetime: Duration,
    max_renewable_lifetime: Duration,
    transport: Transport,
    debug: bool,
    preauth_required: bool,
    body_checksum_verified: bool,
    realm: String,
    properties: Properties,
}

impl KdcConfig {
    /// Default configuration properties.
    ///
    /// The returned map is a fresh copy and can be customized before being
    /// passed to [`KdcConfig::from_properties`].
    pub fn default_properties() -> Properties {
        [
            (KDC_BIND_ADDRESS, "localhost"),
            (KDC_PORT, "0"),
            (INSTANCE, "DefaultKrbServer"),
            (ORG_NAME, "EXAMPLE"),
            (ORG_DOMAIN, "COM"),
            (TRANSPORT, "TCP"),
            (MAX_TICKET_LIFETIME, "86400000"),
            (MAX_RENEWABLE_LIFETIME, "604800000"),
            (DEBUG, "false"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    /// Default configuration.
    pub fn defaults() -> Self {
        // The default property set always satisfies validation.
        match Self::from_properties(&Self::default_properties()) {
            Ok(config) => config,
            Err(e) => unreachable!("default properties are invalid: {e}"),
        }
    }

    /// Build a configuration from properties.
    ///
    /// Fails with [`KdcError::MissingProperties`] naming every absent required
    /// key, or [`KdcError::InvalidProperty`] for the first unusable value.
    pub fn from_properties(props: &Properties) -> KdcResult<Self> {
        let missing: Vec<String> = REQUIRED_PROPERTIES
            .iter()
            .filter(|key| !props.contains_key(**key))
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(KdcError::MissingProperties { keys: missing });
        }

        let org_name = non_empty(props, ORG_NAME)?;
        let org_domain = non_empty(props, ORG_DOMAIN)?;
        let bind_address = non_empty(props, KDC_BIND_ADDRESS)?;
        let instance = non_empty(props, INSTANCE)?;
        let port: u16 = parse_value(props, KDC_PORT, "must be a port number (0-65535)")?;
        let transport: Transport = props[TRANSPORT].parse()?;
        let max_ticket_lifetime = lifetime(props, MAX_TICKET_LIFETIME)?;
        let mut max_renewable_lifetime = lifetime(props, MAX_RENEWABLE_LIFETIME)?;
        if max_renewable_lifetime < max_ticket_lifetime {
            warn!(
                renewable_ms = max_renewable_lifetime.as_millis() as u64,
                ticket_ms = max_ticket_lifetime.as_millis() as u64,
                "renewable lifetime below ticket lifetime, raising it to the ticket lifetime"
            );
            max_renewable_lifetime = max_ticket_lifetime;
        }
        let debug = boolean(props, DEBUG)?;
        let preauth_required = boolean(props, PREAUTH_REQUIRED)?;
        let body_checksum_verified = boolean(props, BODY_CHECKSUM_VERIFIED)?;

        let realm = format!(
            "{}.{}",
            org_name.to_uppercase(),
            org_domain.to_uppercase()
        );

        Ok(Self {
            org_name,
            org_domain,
            bind_address,
            port,
            instance,
            max_ticket_lifetime,
            max_renewable_lifetime,
            transport,
            debug,
            preauth_required,
            body_checksum_verified,
            realm,
            properties: props.clone(),
        })
    }

    /// Organization name as configured.
    pub fn org_name(&self) -> &str {
        &self.org_name
    }

    /// Organization domain as configured.
    pub fn org_domain(&self) -> &str {
        &self.org_domain
    }

    /// Realm, `ORGNAME.ORGDOMAIN` in upper case.
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Bind host.
    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    /// Configured port (`0` = ephemeral).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Instance / service name.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Hard ceiling on issued ticket lifetimes.
    pub fn max_ticket_lifetime(&self) -> Duration {
        self.max_ticket_lifetime
    }

    /// Hard ceiling on renewable lifetimes.
    pub fn max_renewable_lifetime(&self) -> Duration {
        self.max_renewable_lifetime
    }

    /// Transport kind.
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Client debug flag.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Whether AS-REQs must carry encrypted-timestamp pre-authentication.
    pub fn preauth_required(&self) -> bool {
        self.preauth_required
    }

    /// Whether TGS-REQ body checksums are verified.
    pub fn body_checksum_verified(&self) -> bool {
        self.body_checksum_verified
    }

    /// Naming root of the organization partition, `dc=<name>,dc=<domain>`.
    pub fn base_dn(&self) -> String {
        format!(
            "dc={},dc={}",
            self.org_name.to_lowercase(),
            self.org_domain.to_lowercase()
        )
    }

    /// All properties this configuration was built from.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }
}

fn non_empty(props: &Properties, key: &str) -> KdcResult<String> {
    let value = props[key].trim();
    if value.is_empty() {
        return Err(KdcError::invalid_property(key, value, "must not be empty"));
    }
    Ok(value.to_string())
}

fn parse_value<T: FromStr>(props: &Properties, key: &str, reason: &str) -> KdcResult<T> {
    let raw = &props[key];
    raw.trim()
        .parse()
        .map_err(|_| KdcError::invalid_property(key, raw, reason))
}

fn lifetime(props: &Properties, key: &str) -> KdcResult<Duration> {
    let ms: u64 = parse_value(props, key, "must be a number of milliseconds")?;
    if ms == 0 {
        warn!(key, "zero lifetime configured, the KDC will refuse to issue tickets");
    }
    Ok(Duration::from_millis(ms))
}

fn boolean(props: &Properties, key: &str) -> KdcResult<bool> {
    match props.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if v == "true" => Ok(true),
        Some(v) if v == "false" => Ok(false),
        Some(_) => Err(KdcError::invalid_property(
            key,
            &props[key],
            "must be 'true' or 'false'",
        )),
    }
}

/// Load user properties from a file.
///
/// Files ending in `.toml` are parsed as TOML, with nested tables flattened
/// into dotted keys (`[org] name = "X"` becomes `org.name`). Anything else is
/// read as Java-style properties.
pub fn load_properties_file(path: &Path) -> KdcResult<Properties> {
    let content = std::fs::read_to_string(path).map_err(|e| KdcError::ConfigSource {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);

    if is_toml {
        parse_toml_properties(&content).map_err(|message| KdcError::ConfigSource {
            path: path.to_path_buf(),
            message,
        })
    } else {
        Ok(parse_properties(&content))
    }
}

/// Parse Java-style properties text.
///
/// Supports `key=value`, `key: value` and `key value` separators, `#` and `!`
/// comment lines, and trailing-backslash line continuation.
pub fn parse_properties(content: &str) -> Properties {
    let mut props = Properties::new();
    let mut logical = String::new();

    for raw in content.lines() {
        let line = raw.trim_start();
        if logical.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!'))
        {
            continue;
        }

        if let Some(stripped) = line.strip_suffix('\\') {
            logical.push_str(stripped);
            continue;
        }
        logical.push_str(line);

        if let Some((key, value)) = split_property(&logical) {
            props.insert(key, value);
        }
        logical.clear();
    }

    if !logical.is_empty() {
        if let Some((key, value)) = split_property(&logical) {
            props.insert(key, value);
        }
    }

    props
}

fn split_property(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let sep = line.find(|c: char| c == '=' || c == ':' || c.is_whitespace());
    match sep {
        Some(idx) => {
            let key = line[..idx].trim_end();
            let rest = line[idx..].trim_start();
            let value = rest
                .strip_prefix('=')
                .or_else(|| rest.strip_prefix(':'))
                .unwrap_or(rest)
                .trim();
            Some((key.to_string(), value.to_string()))
        }
        None => Some((line.to_string(), String::new())),
    }
}

fn parse_toml_properties(content: &str) -> Result<Properties, String> {
    let table: toml::Table = toml::from_str(content).map_err(|e| e.to_string())?;
    let mut props = Properties::new();
    flatten_toml("", &table, &mut props)?;
    Ok(props)
}

fn flatten_toml(prefix: &str, table: &toml::Table, out: &mut Properties) -> Result<(), String> {
    for (key, value) in table {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            toml::Value::Table(inner) => flatten_toml(&full, inner, out)?,
            toml::Value::String(s) => {
                out.insert(full, s.clone());
            }
            toml::Value::Integer(i) => {
                out.insert(full, i.to_string());
            }
            toml::Value::Boolean(b) => {
                out.insert(full, b.to_string());
            }
            other => {
                return Err(format!(
                    "unsupported value type for {}: {}",
                    full,
                    other.type_str()
                ))
            }
        }
    }
    Ok(())
}
