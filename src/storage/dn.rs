//! Distinguished names.
//!
//! A DN is a sequence of `attr=value` RDNs, most specific first. Attribute
//! names and values compare case-insensitively, which matches the matching
//! rules of every attribute this directory uses in a DN.

use crate::core::error::{KdcError, KdcResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One `attr=value` component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rdn {
    pub attr: String,
    pub value: String,
}

impl Rdn {
    fn normalized(&self) -> String {
        format!(
            "{}={}",
            self.attr.to_ascii_lowercase(),
            self.value.to_lowercase()
        )
    }
}

/// A parsed distinguished name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

impl Dn {
    /// Parse `uid=alice,ou=users,dc=example,dc=com`.
    ///
    /// Values use RFC 4514 escaping: a backslash before a special character
    /// or before two hex digits.
    pub fn parse(s: &str) -> KdcResult<Self> {
        let mut rdns = Vec::new();
        for part in split_unescaped(s) {
            let part = part.trim_start();
            let (attr, value) = part.split_once('=').ok_or_else(|| KdcError::SchemaViolation {
                dn: s.to_string(),
                message: format!("RDN {part:?} is not attr=value"),
            })?;
            let (attr, value) = (attr.trim(), trim_value(value));
            if attr.is_empty() || value.is_empty() {
                return Err(KdcError::SchemaViolation {
                    dn: s.to_string(),
                    message: format!("RDN {part:?} has an empty side"),
                });
            }
            let value = unescape_value(value).ok_or_else(|| KdcError::SchemaViolation {
                dn: s.to_string(),
                message: format!("RDN {part:?} has a bad escape sequence"),
            })?;
            rdns.push(Rdn {
                attr: attr.to_string(),
                value,
            });
        }
        if rdns.is_empty() {
            return Err(KdcError::SchemaViolation {
                dn: s.to_string(),
                message: "empty DN".to_string(),
            });
        }
        Ok(Self { rdns })
    }

    /// The leftmost RDN.
    pub fn rdn(&self) -> &Rdn {
        &self.rdns[0]
    }

    /// The DN with the leftmost RDN removed.
    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.len() < 2 {
            return None;
        }
        Some(Self {
            rdns: self.rdns[1..].to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Whether `self` equals `ancestor` or lies beneath it.
    pub fn is_within(&self, ancestor: &Dn) -> bool {
        if ancestor.rdns.len() > self.rdns.len() {
            return false;
        }
        let offset = self.rdns.len() - ancestor.rdns.len();
        self.rdns[offset..]
            .iter()
            .zip(&ancestor.rdns)
            .all(|(a, b)| a.normalized() == b.normalized())
    }

    /// Case-folded form used as a map key.
    pub fn normalized(&self) -> String {
        self.rdns
            .iter()
            .map(Rdn::normalized)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for Dn {}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .rdns
            .iter()
            .map(|r| format!("{}={}", r.attr, escape_value(&r.value)))
            .collect();
        f.write_str(&parts.join(","))
    }
}

/// Escape an attribute value for use in a DN string (RFC 4514).
pub fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                out.push('\\');
                out.push(c);
            }
            '#' if i == 0 => out.push_str("\\#"),
            ' ' if i == 0 || i == last => out.push_str("\\ "),
            '\0' => out.push_str("\\00"),
            _ => out.push(c),
        }
    }
    out
}

/// Undo [`escape_value`]; also accepts `\HH` for any byte. `None` on a
/// dangling backslash or a result that is not UTF-8.
fn unescape_value(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let pair = bytes
            .get(i + 1..i + 3)
            .filter(|h| h.iter().all(u8::is_ascii_hexdigit))
            .and_then(|h| std::str::from_utf8(h).ok())
            .and_then(|h| u8::from_str_radix(h, 16).ok());
        match (pair, bytes.get(i + 1)) {
            (Some(b), _) => {
                out.push(b);
                i += 3;
            }
            (None, Some(&b)) => {
                out.push(b);
                i += 2;
            }
            (None, None) => return None,
        }
    }
    String::from_utf8(out).ok()
}

/// Trim surrounding whitespace, keeping a trailing space that is escaped.
fn trim_value(value: &str) -> &str {
    let value = value.trim_start();
    let mut end = value.trim_end().len();
    let backslashes = value[..end].bytes().rev().take_while(|b| *b == b'\\').count();
    if backslashes % 2 == 1 {
        end += value[end..].chars().next().map_or(0, char::len_utf8);
    }
    &value[..end]
}

fn split_unescaped(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            ',' if !escaped => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => escaped = false,
        }
    }
    parts.push(&s[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let dn = Dn::parse("uid=alice, ou=users,dc=example,dc=com").unwrap();
        assert_eq!(dn.len(), 4);
        assert_eq!(dn.rdn().attr, "uid");
        assert_eq!(dn.rdn().value, "alice");
        assert_eq!(dn.to_string(), "uid=alice,ou=users,dc=example,dc=com");
    }

    #[test]
    fn comparisons_ignore_case() {
        let a = Dn::parse("OU=Users,DC=Example,DC=COM").unwrap();
        let b = Dn::parse("ou=users,dc=example,dc=com").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.normalized(), "ou=users,dc=example,dc=com");
    }

    #[test]
    fn ancestry() {
        let base = Dn::parse("dc=example,dc=com").unwrap();
        let user = Dn::parse("uid=bob,ou=users,dc=example,dc=com").unwrap();
        assert!(user.is_within(&base));
        assert!(base.is_within(&base));
        assert!(!base.is_within(&user));
        assert!(!Dn::parse("ou=system").unwrap().is_within(&base));
        assert_eq!(user.parent().unwrap().to_string(), "ou=users,dc=example,dc=com");
        assert!(Dn::parse("ou=system").unwrap().parent().is_none());
    }

    #[test]
    fn escaped_commas() {
        let dn = Dn::parse("cn=Doe\\, John,ou=users").unwrap();
        assert_eq!(dn.rdn().value, "Doe, John");
        assert_eq!(dn.len(), 2);
        assert_eq!(dn.to_string(), "cn=Doe\\, John,ou=users");
    }

    #[test]
    fn special_characters_survive_display_and_parse() {
        for value in ["a+b", "x=y", "q\"t", "back\\slash", "<a>;b", "#tag", " lead", "trail ", "ü,ö"] {
            let dn = Dn::parse(&format!("uid={},ou=users", escape_value(value))).unwrap();
            assert_eq!(dn.rdn().value, value, "value {value:?}");
            assert_eq!(dn.len(), 2);
            assert_eq!(Dn::parse(&dn.to_string()).unwrap().rdn().value, value);
        }
    }

    #[test]
    fn escape_value_follows_rfc4514() {
        assert_eq!(escape_value("a,b+c"), "a\\,b\\+c");
        assert_eq!(escape_value("#x#"), "\\#x#");
        assert_eq!(escape_value(" x "), "\\ x\\ ");
        assert_eq!(escape_value("a\\b"), "a\\\\b");
        assert_eq!(escape_value("plain"), "plain");
    }

    #[test]
    fn hex_pairs_are_decoded() {
        let dn = Dn::parse("cn=caf\\C3\\A9\\2C x,ou=users").unwrap();
        assert_eq!(dn.rdn().value, "café, x");
        assert!(Dn::parse("cn=bad\\").is_err());
    }

    #[test]
    fn rejects_malformed() {
        assert!(Dn::parse("").is_err());
        assert!(Dn::parse("uid").is_err());
        assert!(Dn::parse("uid=,dc=x").is_err());
    }
}
