//! MiniKdc lifecycle orchestration.
//!
//! The harness coordinates component lifecycle:
//! - Start order: working directory → identity store → protocol server → client configuration
//! - Stop order: client configuration → protocol server → identity store → working directory
//!
//! States move `NotStarted → Running → Stopped`. A stopped instance cannot be
//! restarted. Lifecycle and provisioning calls are serialized.
//!
//! Only one instance per process may publish to [`ProcessEnvironment`]; use
//! [`MiniKdc::with_context`] and an [`InMemoryContext`] to run several.
//!
//! [`InMemoryContext`]: crate::client::InMemoryContext

use crate::client::ambient::{AmbientClientContext, ProcessEnvironment};
use crate::client::kinit::KdcClient;
use crate::client::krb5conf::{Krb5Conf, KRB5_CONF_FILE};
use crate::core::cleanup::{delete_tree, LocalFs};
use crate::core::config::{KdcConfig, Transport};
use crate::core::error::{KdcError, KdcResult};
use crate::net::{resolve_bind_addr, KdcServer};
use crate::protocol::{KdcPolicy, KdcService};
use crate::provision::Provisioner;
use crate::storage::{bootstrap, DirectoryService};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Harness lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdcState {
    /// Constructed, nothing bound.
    NotStarted,
    /// Identity store up, port bound, client configuration published.
    Running,
    /// Torn down; terminal.
    Stopped,
}

/// Components owned while running.
#[derive(Default)]
struct Components {
    directory: Option<Arc<DirectoryService>>,
    server: Option<KdcServer>,
    provisioner: Option<Provisioner>,
}

/// State readable without waiting on a lifecycle operation.
#[derive(Debug, Clone)]
struct Snapshot {
    state: KdcState,
    port: Option<u16>,
    krb5_conf: Option<PathBuf>,
}

/// An embeddable, ephemeral Kerberos KDC.
pub struct MiniKdc {
    config: KdcConfig,
    work_dir: PathBuf,
    ambient: Arc<dyn AmbientClientContext>,
    components: Mutex<Components>,
    snapshot: RwLock<Snapshot>,
}

impl std::fmt::Debug for MiniKdc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiniKdc")
            .field("realm", &self.config.realm())
            .field("work_dir", &self.work_dir)
            .field("snapshot", &*self.snapshot.read())
            .finish_non_exhaustive()
    }
}

impl MiniKdc {
    /// Create a harness that publishes to the process environment.
    ///
    /// The instance works in a fresh `<base_dir>/<millis>` directory, created
    /// on start and deleted on stop.
    pub fn new(config: KdcConfig, base_dir: &Path) -> Self {
        Self::with_context(config, base_dir, Arc::new(ProcessEnvironment::new()))
    }

    /// Create a harness with an explicit client context.
    pub fn with_context(
        config: KdcConfig,
        base_dir: &Path,
        ambient: Arc<dyn AmbientClientContext>,
    ) -> Self {
        let work_dir = unique_work_dir(base_dir);

        info!("---------------------------------------------------------------");
        info!("  Configuration:");
        for (key, value) in config.properties() {
            info!("    {key}: {value}");
        }
        info!("---------------------------------------------------------------");
        debug!(
            realm = %config.realm(),
            host = %config.bind_address(),
            work_dir = %work_dir.display(),
            "MiniKdc created"
        );

        Self {
            config,
            work_dir,
            ambient,
            components: Mutex::new(Components::default()),
            snapshot: RwLock::new(Snapshot {
                state: KdcState::NotStarted,
                port: None,
                krb5_conf: None,
            }),
        }
    }

    pub fn config(&self) -> &KdcConfig {
        &self.config
    }

    pub fn realm(&self) -> &str {
        self.config.realm()
    }

    /// Host clients use to reach the KDC.
    pub fn host(&self) -> &str {
        self.config.bind_address()
    }

    /// Bound port while running, otherwise the configured one.
    pub fn port(&self) -> u16 {
        self.snapshot.read().port.unwrap_or(self.config.port())
    }

    pub fn transport(&self) -> Transport {
        self.config.transport()
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Published client configuration file, while running.
    pub fn krb5_conf_path(&self) -> Option<PathBuf> {
        self.snapshot.read().krb5_conf.clone()
    }

    pub fn state(&self) -> KdcState {
        self.snapshot.read().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == KdcState::Running
    }

    /// Start the identity store, bind the protocol server and publish the
    /// client configuration.
    ///
    /// A failed start releases whatever it acquired and leaves the instance
    /// `NotStarted`.
    pub async fn start(&self) -> KdcResult<()> {
        let mut components = self.components.lock().await;
        match self.state() {
            KdcState::Running => return Err(KdcError::AlreadyStarted),
            KdcState::Stopped => return Err(KdcError::AlreadyStopped),
            KdcState::NotStarted => {}
        }

        info!(
            realm = %self.realm(),
            work_dir = %self.work_dir.display(),
            transport = %self.transport(),
            "starting MiniKdc"
        );

        match self.start_components(&mut components).await {
            Ok((port, krb5_conf)) => {
                *self.snapshot.write() = Snapshot {
                    state: KdcState::Running,
                    port: Some(port),
                    krb5_conf: Some(krb5_conf),
                };
                info!(
                    realm = %self.realm(),
                    host = %self.host(),
                    port,
                    "MiniKdc listening"
                );
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "MiniKdc failed to start");
                self.teardown(&mut components).await;
                Err(e)
            }
        }
    }

    async fn start_components(&self, components: &mut Components) -> KdcResult<(u16, PathBuf)> {
        std::fs::create_dir_all(&self.work_dir).map_err(|source| KdcError::WorkDir {
            path: self.work_dir.clone(),
            source,
        })?;

        // 1. Identity store
        let directory = Arc::new(bootstrap(&self.config, &self.work_dir)?);
        components.directory = Some(Arc::clone(&directory));
        components.provisioner = Some(Provisioner::new(
            Arc::clone(&directory),
            self.realm(),
            &self.config.base_dn(),
        ));

        // 2. Protocol server
        let bind_addr = resolve_bind_addr(self.config.bind_address(), self.config.port()).await?;
        let service = Arc::new(KdcService::new(KdcPolicy::from_config(&self.config), directory));
        let server = KdcServer::start(bind_addr, self.transport(), service).await?;
        let port = server.port();
        components.server = Some(server);

        // 3. Client configuration
        let krb5_conf = self.work_dir.join(KRB5_CONF_FILE);
        let rendered = Krb5Conf::render(self.realm(), self.host(), port, self.transport());
        std::fs::write(&krb5_conf, rendered).map_err(|source| KdcError::FileWrite {
            path: krb5_conf.clone(),
            source,
        })?;
        self.ambient.publish(&krb5_conf, self.config.debug())?;

        Ok((port, krb5_conf))
    }

    /// Stop everything and delete the working directory.
    ///
    /// Teardown failures are logged, never returned. Stopping a stopped
    /// instance does nothing; stopping one that never started only removes
    /// its working directory.
    pub async fn stop(&self) -> KdcResult<()> {
        let mut components = self.components.lock().await;
        match self.state() {
            KdcState::Stopped => return Ok(()),
            KdcState::NotStarted => {
                self.delete_work_dir();
                return Ok(());
            }
            KdcState::Running => {}
        }

        info!(realm = %self.realm(), "stopping MiniKdc");
        self.teardown(&mut components).await;
        *self.snapshot.write() = Snapshot {
            state: KdcState::Stopped,
            port: None,
            krb5_conf: None,
        };
        info!("MiniKdc stopped");
        Ok(())
    }

    /// Release components in reverse start order, then the working directory.
    async fn teardown(&self, components: &mut Components) {
        if let Err(e) = self.ambient.withdraw() {
            warn!(error = %e, "failed to withdraw client configuration");
        }

        if let Some(mut server) = components.server.take() {
            if let Err(e) = server.stop().await {
                warn!(error = %e, "protocol server did not stop cleanly");
            }
        }

        components.provisioner = None;
        if let Some(directory) = components.directory.take() {
            if let Err(e) = directory.shutdown() {
                warn!(error = %e, "identity store did not shut down cleanly");
            }
        }

        self.delete_work_dir();
    }

    fn delete_work_dir(&self) {
        let report = delete_tree(&LocalFs, &self.work_dir);
        report.log_failures(&self.work_dir);
        debug!(
            work_dir = %self.work_dir.display(),
            removed = report.removed,
            "working directory deleted"
        );
    }

    async fn provisioner(&self) -> KdcResult<(tokio::sync::MutexGuard<'_, Components>, Provisioner)> {
        let components = self.components.lock().await;
        let provisioner = components
            .provisioner
            .clone()
            .ok_or(KdcError::NotRunning)?;
        Ok((components, provisioner))
    }

    /// Create a principal `name@REALM` with `password`.
    pub async fn create_principal(&self, name: &str, password: &str) -> KdcResult<()> {
        let (_guard, provisioner) = self.provisioner().await?;
        provisioner.create_principal(name, password)
    }

    /// Create principals sharing one generated password and write their keys
    /// to `keytab_file`. Returns the password.
    pub async fn create_principals_with_keytab(
        &self,
        keytab_file: &Path,
        names: &[&str],
    ) -> KdcResult<String> {
        let (_guard, provisioner) = self.provisioner().await?;
        provisioner.create_principals_with_keytab(keytab_file, names)
    }

    /// Write a keytab for `(name, password)` without creating a principal.
    pub async fn create_keytab_file(
        &self,
        keytab_file: &Path,
        name: &str,
        password: &str,
    ) -> KdcResult<()> {
        let (_guard, provisioner) = self.provisioner().await?;
        provisioner.create_keytab_file(keytab_file, name, password)
    }

    /// Move the published client configuration to `dest` and re-publish it.
    pub async fn relocate_krb5_conf(&self, dest: &Path) -> KdcResult<()> {
        let _guard = self.components.lock().await;
        let current = self.krb5_conf_path().ok_or(KdcError::NotRunning)?;

        std::fs::rename(&current, dest).map_err(|source| KdcError::FileWrite {
            path: dest.to_path_buf(),
            source,
        })?;
        self.snapshot.write().krb5_conf = Some(dest.to_path_buf());
        self.ambient.publish(dest, self.config.debug())?;
        info!(from = %current.display(), to = %dest.display(), "relocated client configuration");
        Ok(())
    }

    /// A client for this KDC built from its published configuration.
    pub fn client(&self) -> KdcResult<KdcClient> {
        let path = self.krb5_conf_path().ok_or(KdcError::NotRunning)?;
        KdcClient::from_conf(&Krb5Conf::load(&path)?)
    }
}

impl Drop for MiniKdc {
    fn drop(&mut self) {
        if self.is_running() {
            warn!(
                work_dir = %self.work_dir.display(),
                "MiniKdc dropped while running; call stop() to release the working directory"
            );
        }
    }
}

/// `<base>/<millis>`, suffixed when that name is already taken.
fn unique_work_dir(base_dir: &Path) -> PathBuf {
    let stamp = chrono::Utc::now().timestamp_millis().to_string();
    let mut candidate = base_dir.join(&stamp);
    let mut n = 1;
    while candidate.exists() {
        candidate = base_dir.join(format!("{stamp}-{n}"));
        n += 1;
    }
    candidate
}
