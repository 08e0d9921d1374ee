//! Command-line interface.
//!
//! Runs a standalone MiniKdc until the process is told to stop:
//!
//! ```text
//! minikdc <workdir> <config-properties-file> <keytab-file> <principal>...
//! ```

use crate::client::krb5conf::KRB5_CONF_FILE;
use crate::core::config::{load_properties_file, KdcConfig};
use crate::core::runtime::MiniKdc;
use anyhow::{ensure, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

/// MiniKdc - ephemeral Kerberos KDC for integration tests.
#[derive(Parser, Debug)]
#[command(name = "minikdc")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Existing directory that holds the instance working directory.
    pub workdir: PathBuf,

    /// Properties overriding the defaults (`.properties` or `.toml`).
    pub config: PathBuf,

    /// Keytab file to write for the given principals.
    pub keytab: PathBuf,

    /// Principals to create, e.g. `alice` or `HTTP/localhost`.
    #[arg(required = true, num_args = 1..)]
    pub principals: Vec<String>,
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
#[cfg(feature = "telemetry")]
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[cfg(not(feature = "telemetry"))]
pub fn init_tracing() {}

/// Load defaults overlaid with the user's properties file.
pub fn load_config(path: &Path) -> Result<KdcConfig> {
    ensure!(path.is_file(), "config file {} does not exist", path.display());
    let mut props = KdcConfig::default_properties();
    props.extend(
        load_properties_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
    );
    KdcConfig::from_properties(&props).context("invalid configuration")
}

/// Start a KDC, provision the requested principals and print a summary.
///
/// The caller owns the returned instance and must stop it.
pub async fn launch(cli: &Cli) -> Result<MiniKdc> {
    ensure!(
        cli.workdir.is_dir(),
        "working directory {} does not exist",
        cli.workdir.display()
    );
    let config = load_config(&cli.config)?;

    let kdc = MiniKdc::new(config, &cli.workdir);
    kdc.start().await.context("failed to start MiniKdc")?;

    let krb5_conf = cli.workdir.join(KRB5_CONF_FILE);
    kdc.relocate_krb5_conf(&krb5_conf)
        .await
        .with_context(|| format!("cannot rename generated krb5.conf to {}", krb5_conf.display()))?;

    let names: Vec<&str> = cli.principals.iter().map(String::as_str).collect();
    kdc.create_principals_with_keytab(&cli.keytab, &names)
        .await
        .with_context(|| format!("failed to write keytab {}", cli.keytab.display()))?;

    println!("{}", summary(&kdc, cli));
    Ok(kdc)
}

fn summary(kdc: &MiniKdc, cli: &Cli) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str("Standalone MiniKdc Running\n");
    out.push_str("---------------------------------------------------\n");
    out.push_str(&format!("  Realm           : {}\n", kdc.realm()));
    out.push_str(&format!("  Running at      : {}:{}\n", kdc.host(), kdc.port()));
    out.push_str(&format!("  krb5conf        : {}\n", cli.workdir.join(KRB5_CONF_FILE).display()));
    out.push('\n');
    out.push_str(&format!("  created keytab  : {}\n", cli.keytab.display()));
    out.push_str("  with principals : [");
    out.push_str(&cli.principals.join(", "));
    out.push_str("]\n\n");
    out.push_str(" Do <CTRL-C> or kill <PID> to stop it\n");
    out.push_str("---------------------------------------------------\n");
    out
}

/// Run until SIGINT or SIGTERM, then stop the KDC.
pub async fn run(cli: Cli) -> Result<()> {
    let kdc = launch(&cli).await?;
    wait_for_shutdown().await?;
    tracing::info!("shutdown signal received");
    kdc.stop().await.context("failed to stop MiniKdc")?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).context("cannot install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("cannot listen for ctrl-c")?,
        _ = term.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for ctrl-c")
}
