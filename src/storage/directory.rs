//! Directory service: schema, partitions, interceptors and principal lookup.
//!
//! Layout under the instance working directory:
//!
//! ```text
//! partitions/
//!   schema/schema.toml      extracted schema resource
//!   system/entries.journal  system partition (ou=system)
//!   <org>/entries.journal   organization partition (dc=<org>,dc=<domain>)
//! ```

use super::dn::Dn;
use super::entry::{attr, Entry};
use super::ldif;
use super::partition::Partition;
use super::schema::Schema;
use crate::core::config::KdcConfig;
use crate::core::error::{KdcError, KdcResult};
use crate::core::template::{self, Bindings};
use crate::crypto::{self, KeySet, DEFAULT_ENCTYPES};
use crate::protocol::der;
use crate::protocol::kdc::PrincipalStore;
use crate::protocol::messages::{decode_key, encode_key};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Baseline entry template.
pub const BASELINE_LDIF: &str = include_str!("../resources/minikdc.ldif");

/// Suffix of the system partition.
pub const SYSTEM_SUFFIX: &str = "ou=system";

const SYSTEM_INDEXES: [&str; 2] = ["objectClass", "ou"];
const ORG_INDEXES: [&str; 4] = ["objectClass", "dc", "ou", attr::KRB5_PRINCIPAL_NAME];

/// Hook run on every entry before it is validated and stored.
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &'static str;
    fn before_add(&self, entry: &mut Entry) -> KdcResult<()>;
}

/// Derives Kerberos keys for principal entries carrying a password.
///
/// Keys are stored as `krb5Key` values, each the hex encoding of a DER
/// `EncryptionKey`.
#[derive(Debug, Default)]
pub struct KeyDerivationInterceptor;

impl Interceptor for KeyDerivationInterceptor {
    fn name(&self) -> &'static str {
        "key-derivation"
    }

    fn before_add(&self, entry: &mut Entry) -> KdcResult<()> {
        if !entry.has_object_class("krb5Principal") {
            return Ok(());
        }
        let (Some(principal), Some(password)) = (
            entry.first(attr::KRB5_PRINCIPAL_NAME),
            entry.first(attr::USER_PASSWORD),
        ) else {
            return Ok(());
        };

        let keys = crypto::derive_key_set(principal, password, &DEFAULT_ENCTYPES)?;
        debug!(principal, etypes = keys.len(), "derived principal keys");
        let encoded = keys
            .iter()
            .map(|k| encode_key(k).map(hex::encode))
            .collect::<KdcResult<Vec<_>>>()?;
        entry.set(attr::KRB5_KEY, encoded);
        if !entry.has(attr::KRB5_KEY_VERSION_NUMBER) {
            entry.add(attr::KRB5_KEY_VERSION_NUMBER, keys.kvno().to_string());
        }
        Ok(())
    }
}

/// The identity store.
pub struct DirectoryService {
    instance: String,
    partitions_dir: PathBuf,
    schema: Schema,
    partitions: RwLock<Vec<Partition>>,
    interceptors: Vec<Box<dyn Interceptor>>,
    running: AtomicBool,
}

impl std::fmt::Debug for DirectoryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryService")
            .field("instance", &self.instance)
            .field("partitions_dir", &self.partitions_dir)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl DirectoryService {
    /// Load the schema, open the system and organization partitions and
    /// create the organization's context entry.
    pub fn startup(config: &KdcConfig, work_dir: &Path) -> KdcResult<Self> {
        let partitions_dir = work_dir.join("partitions");
        let schema_path = Schema::extract(&partitions_dir.join("schema"))?;
        let schema = Schema::load(&schema_path)?;

        let system = Partition::open(
            "system",
            Dn::parse(SYSTEM_SUFFIX)?,
            &partitions_dir.join("system"),
            &SYSTEM_INDEXES,
        )?;
        let org_id = config.org_name().to_lowercase();
        let org = Partition::open(
            &org_id,
            Dn::parse(&config.base_dn())?,
            &partitions_dir.join(&org_id),
            &ORG_INDEXES,
        )?;

        let service = Self {
            instance: config.instance().to_string(),
            partitions_dir,
            schema,
            partitions: RwLock::new(vec![system, org]),
            interceptors: vec![Box::new(KeyDerivationInterceptor)],
            running: AtomicBool::new(true),
        };

        let system_entry = Entry::new(Dn::parse(SYSTEM_SUFFIX)?)
            .with(attr::OBJECT_CLASS, "top")
            .with(attr::OBJECT_CLASS, "organizationalUnit")
            .with("ou", "system");
        service.add_if_absent(system_entry)?;

        let context_entry = Entry::new(Dn::parse(&config.base_dn())?)
            .with(attr::OBJECT_CLASS, "top")
            .with(attr::OBJECT_CLASS, "domain")
            .with("dc", config.org_name().to_lowercase());
        service.add_if_absent(context_entry)?;

        info!(
            instance = %service.instance,
            base_dn = %config.base_dn(),
            "directory service started"
        );
        Ok(service)
    }

    fn add_if_absent(&self, entry: Entry) -> KdcResult<()> {
        if self.lookup(&entry.dn().to_string())?.is_some() {
            return Ok(());
        }
        self.add(entry)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn partitions_dir(&self) -> &Path {
        &self.partitions_dir
    }

    fn ensure_running(&self) -> KdcResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(KdcError::NotRunning)
        }
    }

    /// Add an entry after running interceptors and schema checks.
    pub fn add(&self, mut entry: Entry) -> KdcResult<()> {
        self.ensure_running()?;
        for interceptor in &self.interceptors {
            interceptor.before_add(&mut entry)?;
        }
        self.schema.validate(&entry)?;

        let mut partitions = self.partitions.write();
        let partition = partitions
            .iter_mut()
            .find(|p| p.holds(entry.dn()))
            .ok_or_else(|| KdcError::NoSuchPartition {
                dn: entry.dn().to_string(),
            })?;
        debug!(dn = %entry.dn(), partition = partition.id(), "adding entry");
        partition.add(entry)
    }

    /// Entry by DN.
    pub fn lookup(&self, dn: &str) -> KdcResult<Option<Entry>> {
        self.ensure_running()?;
        let dn = Dn::parse(dn)?;
        let partitions = self.partitions.read();
        Ok(partitions
            .iter()
            .find(|p| p.holds(&dn))
            .and_then(|p| p.lookup(&dn))
            .cloned())
    }

    /// Entries at or below `base` with `attr` equal to `value`.
    pub fn search(&self, base: &str, attr: &str, value: &str) -> KdcResult<Vec<Entry>> {
        self.ensure_running()?;
        let base = Dn::parse(base)?;
        let partitions = self.partitions.read();
        Ok(partitions
            .iter()
            .filter(|p| p.holds(&base) || p.suffix().is_within(&base))
            .flat_map(|p| p.search(&base, attr, value))
            .cloned()
            .collect())
    }

    /// Keys of `principal` (`name@REALM`) from its `krb5Key` values.
    pub fn find_principal(&self, principal: &str) -> KdcResult<Option<KeySet>> {
        self.ensure_running()?;
        let partitions = self.partitions.read();
        let entry = partitions
            .iter()
            .flat_map(|p| p.search(p.suffix(), attr::KRB5_PRINCIPAL_NAME, principal))
            .find(|e| e.first(attr::KRB5_PRINCIPAL_NAME) == Some(principal));
        let Some(entry) = entry else {
            return Ok(None);
        };

        let kvno = entry
            .first(attr::KRB5_KEY_VERSION_NUMBER)
            .and_then(|v| v.parse::<u8>().ok())
            .unwrap_or(0);
        let mut keys = KeySet::new(kvno);
        for encoded in entry.get(attr::KRB5_KEY).unwrap_or(&[]) {
            let bytes = hex::decode(encoded)
                .map_err(|e| KdcError::protocol(format!("bad krb5Key on {}: {e}", entry.dn())))?;
            keys.insert(decode_key(der::parse_sequence(&bytes)?)?);
        }
        Ok(Some(keys))
    }

    /// Close every partition.
    ///
    /// All partitions are closed even when one fails; the first failure is
    /// returned as a teardown error.
    pub fn shutdown(&self) -> KdcResult<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let mut failures = Vec::new();
        for partition in self.partitions.write().iter_mut() {
            if let Err(e) = partition.close() {
                failures.push(format!("{}: {e}", partition.id()));
            }
        }
        if failures.is_empty() {
            info!(instance = %self.instance, "directory service stopped");
            Ok(())
        } else {
            Err(KdcError::Teardown {
                component: "directory service".to_string(),
                message: failures.join("; "),
            })
        }
    }
}

#[cfg(test)]
impl DirectoryService {
    /// Make every partition journal fail its next close.
    pub(crate) fn jam_journals(&self) -> std::io::Result<()> {
        for partition in self.partitions.write().iter_mut() {
            partition.journal_mut().jam_writer()?;
        }
        Ok(())
    }
}

impl PrincipalStore for DirectoryService {
    fn find_principal(&self, principal: &str) -> KdcResult<Option<KeySet>> {
        DirectoryService::find_principal(self, principal)
    }
}

/// Token bindings for the baseline template.
pub fn baseline_bindings(config: &KdcConfig) -> Bindings {
    let mut b = Bindings::new();
    b.insert("org_name_lower", config.org_name().to_lowercase());
    b.insert("org_domain_lower", config.org_domain().to_lowercase());
    b.insert("org_name_upper", config.org_name().to_uppercase());
    b.insert("org_domain_upper", config.org_domain().to_uppercase());
    b.insert("bind_address", config.bind_address().to_string());
    b
}

/// Start the directory service and seed it with the baseline entries.
pub fn bootstrap(config: &KdcConfig, work_dir: &Path) -> KdcResult<DirectoryService> {
    let service = DirectoryService::startup(config, work_dir)?;
    let rendered = template::render(BASELINE_LDIF, &baseline_bindings(config));
    let entries = ldif::parse(&rendered)?;
    let count = entries.len();
    for entry in entries {
        service.add(entry)?;
    }
    info!(entries = count, realm = %config.realm(), "identity store seeded");
    Ok(service)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(dir: &Path) -> DirectoryService {
        bootstrap(&KdcConfig::defaults(), dir).unwrap()
    }

    #[test]
    fn bootstrap_seeds_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let ds = started(dir.path());

        assert!(ds.lookup("dc=example,dc=com").unwrap().is_some());
        assert!(ds.lookup("ou=users,dc=example,dc=com").unwrap().is_some());
        assert!(ds.lookup("ou=system").unwrap().is_some());
        assert!(dir.path().join("partitions/schema/schema.toml").exists());
        assert!(dir.path().join("partitions/example/entries.journal").exists());

        let tgs = ds.find_principal("krbtgt/EXAMPLE.COM@EXAMPLE.COM").unwrap().unwrap();
        assert_eq!(tgs.len(), DEFAULT_ENCTYPES.len());
        assert_eq!(tgs.kvno(), 0);
        assert!(ds.find_principal("ldap/localhost@EXAMPLE.COM").unwrap().is_some());
        assert!(ds.find_principal("nobody@EXAMPLE.COM").unwrap().is_none());
    }

    #[test]
    fn stored_keys_match_derivation() {
        let dir = tempfile::tempdir().unwrap();
        let ds = started(dir.path());
        let stored = ds.find_principal("krbtgt/EXAMPLE.COM@EXAMPLE.COM").unwrap().unwrap();
        let derived = crypto::derive_key_set(
            "krbtgt/EXAMPLE.COM@EXAMPLE.COM",
            "secret",
            &DEFAULT_ENCTYPES,
        )
        .unwrap();
        assert_eq!(stored, derived);
    }

    #[test]
    fn entries_outside_partitions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ds = started(dir.path());
        let entry = Entry::new(Dn::parse("ou=x,dc=other,dc=org").unwrap())
            .with("objectClass", "organizationalUnit")
            .with("objectClass", "top")
            .with("ou", "x");
        assert!(matches!(ds.add(entry), Err(KdcError::NoSuchPartition { .. })));
    }

    #[test]
    fn search_by_indexed_attribute() {
        let dir = tempfile::tempdir().unwrap();
        let ds = started(dir.path());
        let ous = ds
            .search("dc=example,dc=com", "objectClass", "organizationalUnit")
            .unwrap();
        assert_eq!(ous.len(), 3);
    }

    #[test]
    fn shutdown_stops_service() {
        let dir = tempfile::tempdir().unwrap();
        let ds = started(dir.path());
        ds.shutdown().unwrap();
        assert!(!ds.is_running());
        assert!(matches!(ds.lookup("ou=system"), Err(KdcError::NotRunning)));
        // Second shutdown is a no-op.
        ds.shutdown().unwrap();
    }
}
