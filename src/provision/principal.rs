//! Principal and keytab provisioning.

use super::keytab::{Keytab, KeytabEntry};
use crate::core::error::KdcResult;
use crate::crypto::{self, DEFAULT_ENCTYPES};
use crate::storage::dn::escape_value;
use crate::storage::entry::attr;
use crate::storage::{DirectoryService, Dn, Entry};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Key version used for every provisioned principal.
pub const INITIAL_KVNO: u32 = 0;

/// Creates principal entries and keytabs in one realm.
#[derive(Debug, Clone)]
pub struct Provisioner {
    directory: Arc<DirectoryService>,
    realm: String,
    users_dn: String,
}

impl Provisioner {
    pub fn new(directory: Arc<DirectoryService>, realm: &str, base_dn: &str) -> Self {
        Self {
            directory,
            realm: realm.to_string(),
            users_dn: format!("ou=users,{base_dn}"),
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// `name@REALM`, leaving an existing realm suffix alone.
    pub fn qualify(&self, name: &str) -> String {
        if name.contains('@') {
            name.to_string()
        } else {
            format!("{name}@{}", self.realm)
        }
    }

    fn local_name<'a>(&self, name: &'a str) -> &'a str {
        name.strip_suffix(&format!("@{}", self.realm)).unwrap_or(name)
    }

    /// Add a person entry that is also a Kerberos principal.
    ///
    /// Names are not checked for uniqueness up front; adding an existing
    /// name fails with a duplicate-entry error.
    pub fn create_principal(&self, name: &str, password: &str) -> KdcResult<()> {
        let local = self.local_name(name);
        let principal = self.qualify(local);
        let dn = Dn::parse(&format!("uid={},{}", escape_value(local), self.users_dn))?;

        let entry = Entry::new(dn)
            .with(attr::OBJECT_CLASS, "top")
            .with(attr::OBJECT_CLASS, "person")
            .with(attr::OBJECT_CLASS, "inetOrgPerson")
            .with(attr::OBJECT_CLASS, "krb5principal")
            .with(attr::OBJECT_CLASS, "krb5kdcentry")
            .with("cn", local)
            .with("sn", local)
            .with("uid", local)
            .with(attr::USER_PASSWORD, password)
            .with(attr::KRB5_PRINCIPAL_NAME, principal.as_str())
            .with(attr::KRB5_KEY_VERSION_NUMBER, INITIAL_KVNO.to_string());
        self.directory.add(entry)?;
        info!(principal = %principal, "created principal");
        Ok(())
    }

    /// Create every principal in `names` with one generated password and
    /// write all their keys to `keytab_file`.
    ///
    /// The password is shared by all principals of the call and returned.
    pub fn create_principals_with_keytab(
        &self,
        keytab_file: &Path,
        names: &[&str],
    ) -> KdcResult<String> {
        let password = uuid::Uuid::new_v4().to_string();
        let timestamp = keytab_timestamp();
        let mut keytab = Keytab::new();

        for name in names {
            self.create_principal(name, &password)?;
            self.append_keys(&mut keytab, &self.qualify(self.local_name(name)), &password, timestamp)?;
        }

        keytab.write_atomic(keytab_file)?;
        info!(
            path = %keytab_file.display(),
            principals = names.len(),
            entries = keytab.len(),
            "wrote keytab"
        );
        Ok(password)
    }

    /// Write a keytab for an existing `(name, password)` pair without
    /// touching the directory.
    pub fn create_keytab_file(&self, keytab_file: &Path, name: &str, password: &str) -> KdcResult<()> {
        let mut keytab = Keytab::new();
        self.append_keys(&mut keytab, &self.qualify(name), password, keytab_timestamp())?;
        keytab.write_atomic(keytab_file)?;
        info!(path = %keytab_file.display(), principal = %self.qualify(name), "wrote keytab");
        Ok(())
    }

    fn append_keys(
        &self,
        keytab: &mut Keytab,
        principal: &str,
        password: &str,
        timestamp: u32,
    ) -> KdcResult<()> {
        let keys = crypto::derive_key_set(principal, password, &DEFAULT_ENCTYPES)?;
        for key in keys.iter() {
            keytab.push(KeytabEntry::new(principal, timestamp, INITIAL_KVNO, key));
        }
        debug!(principal, etypes = keys.len(), "added keytab entries");
        Ok(())
    }
}

fn keytab_timestamp() -> u32 {
    u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(u32::MAX)
}
