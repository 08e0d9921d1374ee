//! Process environment handoff.
//!
//! Everything touching `KRB5_CONFIG` lives in this one test so no other test
//! in this binary observes the process-wide settings.

use minikdc::client::ambient::{KRB5_CONFIG_ENV, KRB5_DEBUG_ENV};
use minikdc::client::active_client_config;
use minikdc::{KdcClient, KdcConfig, KdcError, KdcState, MiniKdc};

#[tokio::test]
async fn single_instance_owns_process_environment() {
    let base = tempfile::tempdir().unwrap();
    let kdc = MiniKdc::new(KdcConfig::defaults(), base.path());
    kdc.start().await.unwrap();

    let published = std::env::var_os(KRB5_CONFIG_ENV).expect("KRB5_CONFIG set");
    assert_eq!(Some(published.into()), kdc.krb5_conf_path());
    assert_eq!(std::env::var(KRB5_DEBUG_ENV).unwrap(), "false");
    let active = active_client_config().expect("reloaded on publish");
    assert_eq!(active.kdcs("EXAMPLE.COM"), [format!("localhost:{}", kdc.port())]);

    // A second instance cannot take over the environment.
    let other_base = tempfile::tempdir().unwrap();
    let other = MiniKdc::new(KdcConfig::defaults(), other_base.path());
    let err = other.start().await.unwrap_err();
    assert!(matches!(err, KdcError::AmbientContextBusy), "{err}");
    assert_eq!(other.state(), KdcState::NotStarted);
    assert_eq!(
        std::env::var_os(KRB5_CONFIG_ENV).map(Into::into),
        kdc.krb5_conf_path()
    );

    // Relocation re-points the environment.
    let moved = base.path().join("krb5.conf");
    kdc.relocate_krb5_conf(&moved).await.unwrap();
    assert_eq!(std::env::var_os(KRB5_CONFIG_ENV), Some(moved.clone().into()));

    let password = kdc
        .create_principals_with_keytab(&base.path().join("k.keytab"), &["alice"])
        .await
        .unwrap();
    let client = KdcClient::from_active().unwrap();
    let tgt = client.request_tgt("alice", &password).await.unwrap();
    assert_eq!(tgt.client_principal(), "alice@EXAMPLE.COM");

    kdc.stop().await.unwrap();
    assert!(std::env::var_os(KRB5_CONFIG_ENV).is_none());
    assert!(std::env::var_os(KRB5_DEBUG_ENV).is_none());
    assert!(active_client_config().is_none());

    // Ownership is released on stop.
    let third_base = tempfile::tempdir().unwrap();
    let third = MiniKdc::new(KdcConfig::defaults(), third_base.path());
    third.start().await.unwrap();
    third.stop().await.unwrap();
}
