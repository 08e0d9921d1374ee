//! Configuration and lifecycle tests.

mod common;

use common::{config, properties, properties_file, start_kdc};
use minikdc::config::{
    load_properties_file, KDC_PORT, MAX_RENEWABLE_LIFETIME, MAX_TICKET_LIFETIME, ORG_NAME, TRANSPORT,
};
use minikdc::{ErrorKind, InMemoryContext, KdcConfig, KdcError, KdcState, Krb5Conf, MiniKdc, Transport};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Config tests
// ============================================================================

#[test]
fn defaults_describe_example_realm() {
    let config = KdcConfig::defaults();
    assert_eq!(config.realm(), "EXAMPLE.COM");
    assert_eq!(config.bind_address(), "localhost");
    assert_eq!(config.port(), 0);
    assert_eq!(config.transport(), Transport::Tcp);
    assert_eq!(config.max_ticket_lifetime(), Duration::from_secs(86_400));
    assert_eq!(config.max_renewable_lifetime(), Duration::from_secs(604_800));
    assert!(!config.debug());
}

#[test]
fn missing_keys_are_all_reported() {
    let mut props = KdcConfig::default_properties();
    props.remove(TRANSPORT);
    props.remove(ORG_NAME);

    let err = KdcConfig::from_properties(&props).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    match err {
        KdcError::MissingProperties { keys } => {
            assert_eq!(keys.len(), 2);
            assert!(keys.contains(&ORG_NAME.to_string()));
            assert!(keys.contains(&TRANSPORT.to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn invalid_values_are_rejected() {
    for (key, value) in [
        (TRANSPORT, "SCTP"),
        (KDC_PORT, "seventy"),
        (MAX_TICKET_LIFETIME, "-5"),
    ] {
        let err = KdcConfig::from_properties(&properties(&[(key, value)])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration, "{key}={value}: {err}");
    }
}

#[test]
fn short_renewable_lifetime_is_capped_not_rejected() {
    let config =
        KdcConfig::from_properties(&properties(&[(MAX_RENEWABLE_LIFETIME, "1000")])).unwrap();
    assert_eq!(config.max_renewable_lifetime(), config.max_ticket_lifetime());
}

#[test]
fn transport_is_case_insensitive() {
    let config = KdcConfig::from_properties(&properties(&[(TRANSPORT, "udp")])).unwrap();
    assert_eq!(config.transport(), Transport::Udp);
}

#[test]
fn properties_file_overlays_defaults() {
    let file = properties_file("# test realm\norg.name = Acme\norg.domain: Org\ndebug=true\n");
    let mut props = KdcConfig::default_properties();
    props.extend(load_properties_file(file.path()).unwrap());

    let config = KdcConfig::from_properties(&props).unwrap();
    assert_eq!(config.realm(), "ACME.ORG");
    assert_eq!(config.base_dn(), "dc=acme,dc=org");
    assert!(config.debug());
}

// ============================================================================
// Lifecycle tests
// ============================================================================

#[tokio::test]
async fn start_publishes_config_for_bound_port() {
    let t = start_kdc(config(Transport::Tcp, &[])).await;
    let port = t.kdc.port();
    assert_ne!(port, 0);

    let path = t.kdc.krb5_conf_path().unwrap();
    assert!(path.starts_with(t.kdc.work_dir()));
    let conf = Krb5Conf::load(&path).unwrap();
    assert_eq!(conf.default_realm, "EXAMPLE.COM");
    assert_eq!(conf.kdcs("EXAMPLE.COM"), [format!("localhost:{port}")]);
    assert_eq!(conf.udp_preference_limit, 1);

    let (published, debug) = t.context.published().unwrap();
    assert_eq!(published, path);
    assert!(!debug);

    t.kdc.stop().await.unwrap();
}

#[tokio::test]
async fn double_start_is_rejected() {
    let t = start_kdc(config(Transport::Tcp, &[])).await;
    let port = t.kdc.port();
    let err = t.kdc.start().await.unwrap_err();
    assert!(matches!(err, KdcError::AlreadyStarted));
    assert_eq!(err.kind(), ErrorKind::Lifecycle);
    assert!(t.kdc.is_running());
    assert_eq!(t.kdc.port(), port);
    t.kdc.stop().await.unwrap();
}

#[tokio::test]
async fn stop_removes_work_dir_and_withdraws() {
    let t = start_kdc(config(Transport::Udp, &[])).await;
    let work_dir = t.kdc.work_dir().to_path_buf();
    assert!(work_dir.join("krb5.conf").exists());

    t.kdc.stop().await.unwrap();
    assert_eq!(t.kdc.state(), KdcState::Stopped);
    assert!(!work_dir.exists());
    assert!(t.context.published().is_none());
    assert!(t.base.path().exists());

    // Stopping twice is harmless; restarting is not allowed.
    t.kdc.stop().await.unwrap();
    assert!(matches!(t.kdc.start().await.unwrap_err(), KdcError::AlreadyStopped));
}

#[tokio::test]
async fn port_is_released_after_stop() {
    let t = start_kdc(config(Transport::Tcp, &[])).await;
    let port = t.kdc.port();
    t.kdc.stop().await.unwrap();

    let rebound = tokio::net::TcpListener::bind(("127.0.0.1", port)).await;
    assert!(rebound.is_ok(), "port {port} still held");
}

#[tokio::test]
async fn fixed_port_in_use_is_a_bind_error() {
    let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port().to_string();
    let base = tempfile::tempdir().unwrap();
    let kdc = MiniKdc::with_context(
        config(Transport::Tcp, &[("kdc.bind.address", "127.0.0.1"), (KDC_PORT, port.as_str())]),
        base.path(),
        Arc::new(InMemoryContext::new()),
    );

    let err = kdc.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Bind);
    assert!(err.is_retriable());
    assert_eq!(kdc.state(), KdcState::NotStarted);
}

#[tokio::test]
async fn independent_instances_with_in_memory_contexts() {
    let a = start_kdc(config(Transport::Tcp, &[])).await;
    let b = start_kdc(config(Transport::Tcp, &[(ORG_NAME, "OTHER")])).await;
    assert_ne!(a.kdc.port(), b.kdc.port());
    assert_eq!(b.context.loaded().unwrap().default_realm, "OTHER.COM");

    a.kdc.stop().await.unwrap();
    assert!(b.kdc.is_running());
    b.kdc.stop().await.unwrap();
}
