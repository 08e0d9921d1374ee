//! Directory entries.

use super::dn::Dn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known attribute names.
pub mod attr {
    pub const OBJECT_CLASS: &str = "objectClass";
    pub const USER_PASSWORD: &str = "userPassword";
    pub const KRB5_PRINCIPAL_NAME: &str = "krb5PrincipalName";
    pub const KRB5_KEY_VERSION_NUMBER: &str = "krb5KeyVersionNumber";
    pub const KRB5_KEY: &str = "krb5Key";
}

/// An attribute with its name as first written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Attribute {
    name: String,
    values: Vec<String>,
}

/// A DN plus a set of multi-valued attributes.
///
/// Attribute names are case-insensitive; values keep their case and order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    dn: Dn,
    attributes: BTreeMap<String, Attribute>,
}

impl Entry {
    pub fn new(dn: Dn) -> Self {
        Self {
            dn,
            attributes: BTreeMap::new(),
        }
    }

    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    /// Add a value, ignoring exact duplicates.
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        let attribute = self
            .attributes
            .entry(name.to_ascii_lowercase())
            .or_insert_with(|| Attribute {
                name: name.to_string(),
                values: Vec::new(),
            });
        if !attribute.values.contains(&value) {
            attribute.values.push(value);
        }
    }

    /// Builder form of [`Entry::add`].
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.add(name, value);
        self
    }

    /// Replace all values of an attribute.
    pub fn set(&mut self, name: &str, values: Vec<String>) {
        self.attributes.insert(
            name.to_ascii_lowercase(),
            Attribute {
                name: name.to_string(),
                values,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.attributes
            .get(&name.to_ascii_lowercase())
            .map(|a| a.values.as_slice())
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| !v.is_empty())
    }

    pub fn object_classes(&self) -> &[String] {
        self.get(attr::OBJECT_CLASS).unwrap_or(&[])
    }

    pub fn has_object_class(&self, class: &str) -> bool {
        self.object_classes()
            .iter()
            .any(|c| c.eq_ignore_ascii_case(class))
    }

    /// Attribute names as first written, with their values.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.attributes
            .values()
            .map(|a| (a.name.as_str(), a.values.as_slice()))
    }
}
