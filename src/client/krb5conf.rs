//! Client-side `krb5.conf` generation and parsing.

use crate::core::config::Transport;
use crate::core::error::{KdcError, KdcResult};
use crate::core::template::{self, Bindings};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Embedded client configuration template.
pub const KRB5_CONF_TEMPLATE: &str = include_str!("../resources/krb5.conf");

/// File name of the generated client configuration.
pub const KRB5_CONF_FILE: &str = "krb5.conf";

/// Platform line separator used in generated files.
pub const LINE_SEPARATOR: &str = if cfg!(windows) { "\r\n" } else { "\n" };

/// `udp_preference_limit` that forces clients onto TCP.
pub const UDP_LIMIT_FORCE_TCP: u32 = 1;

/// Client library default `udp_preference_limit`.
pub const UDP_LIMIT_DEFAULT: u32 = 1465;

/// The parts of a client configuration this crate reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Krb5Conf {
    pub default_realm: String,
    /// Realm name to its `kdc` entries (`host:port`).
    pub realms: BTreeMap<String, Vec<String>>,
    pub udp_preference_limit: u32,
}

impl Krb5Conf {
    /// Configuration pointing `realm` at a single KDC.
    pub fn for_kdc(realm: &str, host: &str, port: u16, transport: Transport) -> Self {
        let udp_preference_limit = match transport {
            Transport::Tcp => UDP_LIMIT_FORCE_TCP,
            Transport::Udp => UDP_LIMIT_DEFAULT,
        };
        Self {
            default_realm: realm.to_string(),
            realms: BTreeMap::from([(realm.to_string(), vec![format!("{host}:{port}")])]),
            udp_preference_limit,
        }
    }

    /// Render the embedded template for `realm` served at `host:port`.
    pub fn render(realm: &str, host: &str, port: u16, transport: Transport) -> String {
        let conf = Self::for_kdc(realm, host, port, transport);
        let mut bindings = Bindings::new();
        bindings.insert("realm", realm.to_string());
        bindings.insert("host", host.to_string());
        bindings.insert("port", port.to_string());
        bindings.insert("udp_limit", conf.udp_preference_limit.to_string());

        let rendered = template::render(KRB5_CONF_TEMPLATE, &bindings);
        let mut out = rendered
            .lines()
            .collect::<Vec<_>>()
            .join(LINE_SEPARATOR);
        out.push_str(LINE_SEPARATOR);
        out
    }

    /// Parse the `[libdefaults]` and `[realms]` sections.
    pub fn parse(content: &str) -> KdcResult<Self> {
        let invalid = |line: usize, message: &str| KdcError::ConfigSource {
            path: PathBuf::from(KRB5_CONF_FILE),
            message: format!("line {line}: {message}"),
        };

        let mut section = String::new();
        let mut current_realm: Option<String> = None;
        let mut default_realm = None;
        let mut udp_preference_limit = UDP_LIMIT_DEFAULT;
        let mut realms: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = name.trim().to_string();
                current_realm = None;
                continue;
            }
            if line == "}" {
                if current_realm.take().is_none() {
                    return Err(invalid(idx + 1, "unbalanced '}'"));
                }
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .ok_or_else(|| invalid(idx + 1, "expected 'key = value'"))?;

            match (section.as_str(), current_realm.clone()) {
                ("libdefaults", _) => match key {
                    "default_realm" => default_realm = Some(value.to_string()),
                    "udp_preference_limit" => {
                        udp_preference_limit = value
                            .parse()
                            .map_err(|_| invalid(idx + 1, "udp_preference_limit is not a number"))?;
                    }
                    _ => {}
                },
                ("realms", None) if value == "{" => {
                    realms.entry(key.to_string()).or_default();
                    current_realm = Some(key.to_string());
                }
                ("realms", Some(realm)) if key == "kdc" => {
                    realms.entry(realm).or_default().push(value.to_string());
                }
                _ => {}
            }
        }

        if current_realm.is_some() {
            return Err(invalid(content.lines().count(), "unterminated realm block"));
        }
        let default_realm =
            default_realm.ok_or_else(|| invalid(0, "no default_realm in [libdefaults]"))?;
        Ok(Self {
            default_realm,
            realms,
            udp_preference_limit,
        })
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> KdcResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| KdcError::ConfigSource {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&content).map_err(|e| match e {
            KdcError::ConfigSource { message, .. } => KdcError::ConfigSource {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// KDC addresses for `realm`.
    pub fn kdcs(&self, realm: &str) -> &[String] {
        self.realms.get(realm).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Transport a client should use for a message of `len` bytes.
    pub fn transport_for(&self, len: usize) -> Transport {
        if len >= self.udp_preference_limit as usize {
            Transport::Tcp
        } else {
            Transport::Udp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_then_parse() {
        let rendered = Krb5Conf::render("EXAMPLE.COM", "localhost", 54321, Transport::Tcp);
        assert!(rendered.contains("default_realm = EXAMPLE.COM"));
        assert!(rendered.contains("kdc = localhost:54321"));
        assert!(!rendered.contains("${"));
        assert!(rendered.ends_with(LINE_SEPARATOR));

        let conf = Krb5Conf::parse(&rendered).unwrap();
        assert_eq!(
            conf,
            Krb5Conf::for_kdc("EXAMPLE.COM", "localhost", 54321, Transport::Tcp)
        );
        assert_eq!(conf.kdcs("EXAMPLE.COM"), ["localhost:54321".to_string()]);
        assert!(conf.kdcs("OTHER.ORG").is_empty());
    }

    #[test]
    fn transport_preference() {
        let tcp = Krb5Conf::for_kdc("R", "h", 1, Transport::Tcp);
        assert_eq!(tcp.transport_for(10), Transport::Tcp);

        let udp = Krb5Conf::for_kdc("R", "h", 1, Transport::Udp);
        assert_eq!(udp.transport_for(200), Transport::Udp);
        assert_eq!(udp.transport_for(4000), Transport::Tcp);
    }

    #[test]
    fn parse_ignores_unrelated_settings() {
        let conf = Krb5Conf::parse(
            "# comment\n[libdefaults]\n  default_realm = A.B\n  forwardable = true\n\
             [realms]\n  A.B = {\n    kdc = k1:88\n    kdc = k2:88\n    admin_server = k1\n  }\n\
             [domain_realm]\n  .a.b = A.B\n",
        )
        .unwrap();
        assert_eq!(conf.kdcs("A.B").len(), 2);
        assert_eq!(conf.udp_preference_limit, UDP_LIMIT_DEFAULT);
    }

    #[test]
    fn parse_errors() {
        assert!(Krb5Conf::parse("[libdefaults]\n").is_err());
        assert!(Krb5Conf::parse("[libdefaults]\ndefault_realm = A\n[realms]\nA = {\n").is_err());
        assert!(Krb5Conf::parse("[libdefaults]\nnonsense\n").is_err());
    }

    #[test]
    fn load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.conf");
        let err = Krb5Conf::load(&missing).unwrap_err();
        assert!(err.to_string().contains("absent.conf"), "{err}");
    }
}
