//! Networking integration tests.
//!
//! Raw wire exchanges against the TCP and UDP listeners.

mod common;

use common::{config, start_kdc};
use minikdc::protocol::messages::{error_code, KdcResponse};
use minikdc::Transport;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

const NOT_A_REQUEST: &[u8] = &[0x30, 0x00];

fn expect_generic_error(reply: &[u8]) {
    match KdcResponse::decode(reply).unwrap() {
        KdcResponse::Error(err) => assert_eq!(err.error_code, error_code::KRB_ERR_GENERIC),
        other => panic!("expected KRB-ERROR, got {other:?}"),
    }
}

async fn read_record(stream: &mut TcpStream) -> Vec<u8> {
    let len = stream.read_u32().await.unwrap();
    let mut reply = vec![0u8; len as usize];
    stream.read_exact(&mut reply).await.unwrap();
    reply
}

#[tokio::test]
async fn tcp_answers_each_record_on_one_connection() {
    let t = start_kdc(config(Transport::Tcp, &[])).await;
    let mut stream = TcpStream::connect(("127.0.0.1", t.kdc.port())).await.unwrap();

    for _ in 0..2 {
        stream.write_u32(NOT_A_REQUEST.len() as u32).await.unwrap();
        stream.write_all(NOT_A_REQUEST).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), read_record(&mut stream))
            .await
            .unwrap();
        expect_generic_error(&reply);
    }

    t.kdc.stop().await.unwrap();
}

#[tokio::test]
async fn tcp_connection_closed_on_stop() {
    let t = start_kdc(config(Transport::Tcp, &[])).await;
    let mut stream = TcpStream::connect(("127.0.0.1", t.kdc.port())).await.unwrap();

    t.kdc.stop().await.unwrap();
    let mut buf = [0u8; 4];
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn udp_answers_each_datagram() {
    let t = start_kdc(config(Transport::Udp, &[])).await;
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(("127.0.0.1", t.kdc.port())).await.unwrap();

    socket.send(NOT_A_REQUEST).await.unwrap();
    let mut buf = vec![0u8; 65_535];
    let n = tokio::time::timeout(Duration::from_secs(5), socket.recv(&mut buf))
        .await
        .unwrap()
        .unwrap();
    expect_generic_error(&buf[..n]);

    t.kdc.stop().await.unwrap();
}
