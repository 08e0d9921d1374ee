//! Directory schema.
//!
//! The schema ships as an embedded TOML resource. At startup it is extracted
//! into the instance's schema partition directory and loaded back from there,
//! so a run's working directory holds everything the store used.

use super::entry::{attr, Entry};
use crate::core::error::{KdcError, KdcResult};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Embedded schema resource.
pub const SCHEMA_RESOURCE: &str = include_str!("../resources/schema.toml");

/// File name of the extracted schema.
pub const SCHEMA_FILE: &str = "schema.toml";

#[derive(Debug, Deserialize)]
struct SchemaFile {
    attribute_types: Vec<String>,
    object_classes: Vec<ObjectClassDef>,
}

/// An object class definition.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectClassDef {
    pub name: String,
    #[serde(default)]
    pub sup: Option<String>,
    #[serde(default)]
    pub must: Vec<String>,
    #[serde(default)]
    pub may: Vec<String>,
}

/// Loaded schema, keyed by lowercase names.
#[derive(Debug, Clone)]
pub struct Schema {
    attribute_types: BTreeSet<String>,
    object_classes: BTreeMap<String, ObjectClassDef>,
}

impl Schema {
    /// Write the embedded schema into `dir` and return the file path.
    pub fn extract(dir: &Path) -> KdcResult<PathBuf> {
        let load_err = |e: std::io::Error| KdcError::SchemaLoad {
            message: format!("cannot extract schema into {}: {e}", dir.display()),
        };
        std::fs::create_dir_all(dir).map_err(load_err)?;
        let path = dir.join(SCHEMA_FILE);
        std::fs::write(&path, SCHEMA_RESOURCE).map_err(load_err)?;
        Ok(path)
    }

    /// Load a schema file.
    pub fn load(path: &Path) -> KdcResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| KdcError::SchemaLoad {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> KdcResult<Self> {
        let file: SchemaFile = toml::from_str(content).map_err(|e| KdcError::SchemaLoad {
            message: e.to_string(),
        })?;

        let attribute_types: BTreeSet<String> = file
            .attribute_types
            .iter()
            .map(|a| a.to_ascii_lowercase())
            .collect();
        let object_classes: BTreeMap<String, ObjectClassDef> = file
            .object_classes
            .into_iter()
            .map(|oc| (oc.name.to_ascii_lowercase(), oc))
            .collect();

        for oc in object_classes.values() {
            if let Some(sup) = &oc.sup {
                if !object_classes.contains_key(&sup.to_ascii_lowercase()) {
                    return Err(KdcError::SchemaLoad {
                        message: format!("object class {} has unknown superior {sup}", oc.name),
                    });
                }
            }
            for a in oc.must.iter().chain(&oc.may) {
                if !attribute_types.contains(&a.to_ascii_lowercase()) {
                    return Err(KdcError::SchemaLoad {
                        message: format!("object class {} uses unknown attribute {a}", oc.name),
                    });
                }
            }
        }

        Ok(Self {
            attribute_types,
            object_classes,
        })
    }

    pub fn object_class(&self, name: &str) -> Option<&ObjectClassDef> {
        self.object_classes.get(&name.to_ascii_lowercase())
    }

    pub fn has_attribute_type(&self, name: &str) -> bool {
        self.attribute_types.contains(&name.to_ascii_lowercase())
    }

    /// MUST attributes of `class` and all its superiors.
    fn required(&self, class: &str) -> Vec<&str> {
        let mut out = Vec::new();
        let mut next = self.object_class(class);
        let mut seen = BTreeSet::new();
        while let Some(oc) = next {
            if !seen.insert(oc.name.to_ascii_lowercase()) {
                break;
            }
            out.extend(oc.must.iter().map(String::as_str));
            next = oc.sup.as_deref().and_then(|s| self.object_class(s));
        }
        out
    }

    /// Check an entry against the schema.
    pub fn validate(&self, entry: &Entry) -> KdcResult<()> {
        let violation = |message: String| KdcError::SchemaViolation {
            dn: entry.dn().to_string(),
            message,
        };

        if entry.object_classes().is_empty() {
            return Err(violation(format!("no {}", attr::OBJECT_CLASS)));
        }
        for class in entry.object_classes() {
            if self.object_class(class).is_none() {
                return Err(violation(format!("unknown object class {class}")));
            }
            for required in self.required(class) {
                if !entry.has(required) {
                    return Err(violation(format!(
                        "object class {class} requires attribute {required}"
                    )));
                }
            }
        }
        for (name, _) in entry.attributes() {
            if !self.has_attribute_type(name) {
                return Err(violation(format!("unknown attribute {name}")));
            }
        }
        Ok(())
    }
}
