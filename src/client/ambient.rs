//! Process-wide Kerberos client context.
//!
//! Client libraries locate their configuration through process-global state.
//! A running MiniKdc publishes its generated `krb5.conf` there and withdraws it
//! on stop. Only one instance can own the process context at a time; a second
//! owner is refused with [`KdcError::AmbientContextBusy`].
//!
//! Withdrawing clears the settings. Values present before `publish` are not
//! restored.

use super::krb5conf::Krb5Conf;
use crate::core::error::{KdcError, KdcResult};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Environment variable naming the client configuration file.
pub const KRB5_CONFIG_ENV: &str = "KRB5_CONFIG";

/// Environment variable carrying the client debug flag.
pub const KRB5_DEBUG_ENV: &str = "KRB5_DEBUG";

/// Exclusive handle on the settings a co-located client reads.
pub trait AmbientClientContext: Send + Sync {
    /// Point clients at `krb5_conf`, then reload.
    ///
    /// Publishing again from the same owner re-points the settings.
    fn publish(&self, krb5_conf: &Path, debug: bool) -> KdcResult<()>;

    /// Clear the settings and release ownership. No-op when not published.
    fn withdraw(&self) -> KdcResult<()>;

    /// Make in-process clients re-read the published configuration.
    fn refresh(&self) -> KdcResult<()>;
}

static PROCESS_OWNED: AtomicBool = AtomicBool::new(false);
static ACTIVE_CONFIG: RwLock<Option<Krb5Conf>> = parking_lot::const_rwlock(None);

/// Client configuration most recently loaded by the process reload hook.
pub fn active_client_config() -> Option<Krb5Conf> {
    ACTIVE_CONFIG.read().clone()
}

/// Reload hook: re-read the file named by [`KRB5_CONFIG_ENV`].
pub fn reload_process_config() -> KdcResult<()> {
    let loaded = match std::env::var_os(KRB5_CONFIG_ENV) {
        Some(path) => Some(Krb5Conf::load(Path::new(&path))?),
        None => None,
    };
    debug!(realm = ?loaded.as_ref().map(|c| c.default_realm.as_str()), "client configuration reloaded");
    *ACTIVE_CONFIG.write() = loaded;
    Ok(())
}

/// The real process environment.
#[derive(Debug, Default)]
pub struct ProcessEnvironment {
    owner: AtomicBool,
}

impl ProcessEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this handle currently owns the process context.
    pub fn is_owner(&self) -> bool {
        self.owner.load(Ordering::Acquire)
    }

    fn acquire(&self) -> KdcResult<()> {
        if self.is_owner() {
            return Ok(());
        }
        PROCESS_OWNED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| KdcError::AmbientContextBusy)?;
        self.owner.store(true, Ordering::Release);
        Ok(())
    }
}

impl AmbientClientContext for ProcessEnvironment {
    fn publish(&self, krb5_conf: &Path, debug: bool) -> KdcResult<()> {
        self.acquire()?;
        std::env::set_var(KRB5_CONFIG_ENV, krb5_conf);
        std::env::set_var(KRB5_DEBUG_ENV, if debug { "true" } else { "false" });
        let flag = debug;
        info!(path = %krb5_conf.display(), debug = flag, "published client configuration");
        self.refresh()
    }

    fn withdraw(&self) -> KdcResult<()> {
        if !self.is_owner() {
            return Ok(());
        }
        std::env::remove_var(KRB5_CONFIG_ENV);
        std::env::remove_var(KRB5_DEBUG_ENV);
        *ACTIVE_CONFIG.write() = None;
        self.owner.store(false, Ordering::Release);
        PROCESS_OWNED.store(false, Ordering::Release);
        info!("withdrew client configuration");
        Ok(())
    }

    fn refresh(&self) -> KdcResult<()> {
        reload_process_config()
    }
}

impl Drop for ProcessEnvironment {
    fn drop(&mut self) {
        if self.is_owner() {
            if let Err(e) = self.withdraw() {
                warn!(error = %e, "failed to withdraw client configuration");
            }
        }
    }
}

/// In-memory context for tests and multi-instance embedding.
#[derive(Debug, Default)]
pub struct InMemoryContext {
    published: Mutex<Option<(PathBuf, bool)>>,
    loaded: RwLock<Option<Krb5Conf>>,
}

impl InMemoryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Published path and debug flag, if any.
    pub fn published(&self) -> Option<(PathBuf, bool)> {
        self.published.lock().clone()
    }

    /// Configuration loaded by the last refresh.
    pub fn loaded(&self) -> Option<Krb5Conf> {
        self.loaded.read().clone()
    }
}

impl AmbientClientContext for InMemoryContext {
    fn publish(&self, krb5_conf: &Path, debug: bool) -> KdcResult<()> {
        *self.published.lock() = Some((krb5_conf.to_path_buf(), debug));
        self.refresh()
    }

    fn withdraw(&self) -> KdcResult<()> {
        *self.published.lock() = None;
        *self.loaded.write() = None;
        Ok(())
    }

    fn refresh(&self) -> KdcResult<()> {
        let loaded = match self.published() {
            Some((path, _)) => Some(Krb5Conf::load(&path)?),
            None => None,
        };
        *self.loaded.write() = loaded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Transport;

    fn write_conf(dir: &Path, port: u16) -> PathBuf {
        let path = dir.join("krb5.conf");
        std::fs::write(
            &path,
            Krb5Conf::render("EXAMPLE.COM", "localhost", port, Transport::Tcp),
        )
        .unwrap();
        path
    }

    #[test]
    fn in_memory_publish_refresh_withdraw() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_conf(dir.path(), 1088);
        let ctx = InMemoryContext::new();

        ctx.publish(&path, true).unwrap();
        assert_eq!(ctx.published(), Some((path.clone(), true)));
        assert_eq!(ctx.loaded().unwrap().kdcs("EXAMPLE.COM"), ["localhost:1088"]);

        write_conf(dir.path(), 2088);
        ctx.refresh().unwrap();
        assert_eq!(ctx.loaded().unwrap().kdcs("EXAMPLE.COM"), ["localhost:2088"]);

        ctx.withdraw().unwrap();
        assert!(ctx.published().is_none());
        assert!(ctx.loaded().is_none());
    }

    #[test]
    fn in_memory_publish_of_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = InMemoryContext::new();
        assert!(ctx.publish(&dir.path().join("nope"), false).is_err());
    }

    #[test]
    fn withdraw_without_publish_is_noop() {
        let env = ProcessEnvironment::new();
        env.withdraw().unwrap();
        assert!(!env.is_owner());
    }
}
