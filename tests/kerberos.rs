//! End-to-end AS and TGS exchanges against a running MiniKdc.

mod common;

use common::{config, start_kdc};
use minikdc::client::TicketOptions;
use minikdc::config::{MAX_TICKET_LIFETIME, PREAUTH_REQUIRED};
use minikdc::crypto::{EncryptionType, USAGE_TICKET};
use minikdc::protocol::messages::{error_code, EncTicketPart, KerberosFlags};
use minikdc::{KdcError, Keytab, Transport};
use std::time::Duration;

#[tokio::test]
async fn keytab_password_obtains_tgt_and_service_ticket() {
    let t = start_kdc(config(Transport::Tcp, &[])).await;
    let keytab_path = t.base.path().join("test.keytab");
    let password = t
        .kdc
        .create_principals_with_keytab(&keytab_path, &["alice", "HTTP/localhost"])
        .await
        .unwrap();

    let client = t.kdc.client().unwrap();
    let tgt = client.request_tgt("alice", &password).await.unwrap();
    assert_eq!(tgt.client_principal(), "alice@EXAMPLE.COM");
    assert_eq!(tgt.server_principal(), "krbtgt/EXAMPLE.COM@EXAMPLE.COM");
    assert!(tgt.flags.contains(KerberosFlags::INITIAL));

    let service = client
        .request_service_ticket(&tgt, "HTTP/localhost")
        .await
        .unwrap();
    assert_eq!(service.server_principal(), "HTTP/localhost@EXAMPLE.COM");
    assert!(service.endtime <= tgt.endtime);

    // The service decrypts its ticket with the key from the keytab.
    let keytab = Keytab::read(&keytab_path).unwrap();
    let etype = service.ticket.enc_part.etype;
    let key = keytab
        .entries_for("HTTP/localhost@EXAMPLE.COM")
        .find(|e| e.etype == etype)
        .and_then(|e| e.encryption_key())
        .expect("keytab holds the ticket's key");
    let part = EncTicketPart::decode(&service.ticket.enc_part.open(&key, USAGE_TICKET).unwrap()).unwrap();
    assert_eq!(part.crealm, "EXAMPLE.COM");
    assert_eq!(part.cname, tgt.client);
    assert_eq!(part.key, service.session_key);

    t.kdc.stop().await.unwrap();
}

#[tokio::test]
async fn udp_transport_serves_exchanges() {
    let t = start_kdc(config(Transport::Udp, &[])).await;
    t.kdc.create_principal("bob", "bob-secret").await.unwrap();

    let client = t.kdc.client().unwrap();
    let tgt = client.request_tgt("bob@EXAMPLE.COM", "bob-secret").await.unwrap();
    assert_eq!(tgt.realm, "EXAMPLE.COM");

    // Baseline service principal seeded at bootstrap.
    let ldap = client.request_service_ticket(&tgt, "ldap/localhost").await.unwrap();
    assert_eq!(ldap.server_principal(), "ldap/localhost@EXAMPLE.COM");

    t.kdc.stop().await.unwrap();
}

#[tokio::test]
async fn unknown_principals_are_reported() {
    let t = start_kdc(config(Transport::Tcp, &[])).await;
    t.kdc.create_principal("carol", "pw").await.unwrap();
    let client = t.kdc.client().unwrap();

    let err = client.request_tgt("nobody", "pw").await.unwrap_err();
    assert!(
        matches!(err, KdcError::KdcReply { code, .. } if code == error_code::KDC_ERR_C_PRINCIPAL_UNKNOWN),
        "{err}"
    );

    let tgt = client.request_tgt("carol", "pw").await.unwrap();
    let err = client.request_service_ticket(&tgt, "HTTP/nowhere").await.unwrap_err();
    assert!(
        matches!(err, KdcError::KdcReply { code, .. } if code == error_code::KDC_ERR_S_PRINCIPAL_UNKNOWN),
        "{err}"
    );

    t.kdc.stop().await.unwrap();
}

#[tokio::test]
async fn required_preauth_rejects_wrong_password() {
    let t = start_kdc(config(Transport::Tcp, &[(PREAUTH_REQUIRED, "true")])).await;
    t.kdc.create_principal("dave", "right").await.unwrap();
    let client = t.kdc.client().unwrap();

    let tgt = client.request_tgt("dave", "right").await.unwrap();
    assert!(tgt.flags.contains(KerberosFlags::PRE_AUTHENT));

    let err = client.request_tgt("dave", "wrong").await.unwrap_err();
    assert!(
        matches!(err, KdcError::KdcReply { code, .. } if code == error_code::KDC_ERR_PREAUTH_FAILED),
        "{err}"
    );

    t.kdc.stop().await.unwrap();
}

#[tokio::test]
async fn lifetimes_are_capped() {
    let t = start_kdc(config(Transport::Tcp, &[(MAX_TICKET_LIFETIME, "3600000")])).await;
    t.kdc.create_principal("erin", "pw").await.unwrap();
    let client = t.kdc.client().unwrap();

    let options = TicketOptions {
        lifetime: Some(Duration::from_secs(48 * 3600)),
        renewable: Some(Duration::from_secs(30 * 24 * 3600)),
        ..TicketOptions::default()
    };
    let tgt = client.request_tgt_with("erin", "pw", &options).await.unwrap();
    assert!(tgt.lifetime() <= Duration::from_secs(3600));
    assert!(tgt.flags.contains(KerberosFlags::RENEWABLE));
    let renew_till = tgt.renew_till.expect("renewable ticket");
    assert!(renew_till.abs_diff(tgt.authtime) <= Duration::from_secs(7 * 24 * 3600));

    t.kdc.stop().await.unwrap();
}

#[tokio::test]
async fn aes128_only_client_is_served() {
    let t = start_kdc(config(Transport::Tcp, &[])).await;
    t.kdc.create_principal("frank", "pw").await.unwrap();

    let client = t
        .kdc
        .client()
        .unwrap()
        .with_etypes(vec![EncryptionType::Aes128CtsHmacSha196]);
    let tgt = client.request_tgt("frank", "pw").await.unwrap();
    assert_eq!(tgt.session_key.etype(), EncryptionType::Aes128CtsHmacSha196);

    t.kdc.stop().await.unwrap();
}
