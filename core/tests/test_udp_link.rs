// UdpLink against a loopback fake companion

use deskbridge_core::{
    DatagramLink, PacketCodec, SharedKeyCrypto, SystemClock, TransportError, UdpLink,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

#[tokio::test]
async fn test_request_gets_pong() {
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = peer.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 64];
        let (len, from) = peer.recv_from(&mut buf).await.unwrap();
        if &buf[..len] == b"PING" {
            peer.send_to(b"PONG", from).await.unwrap();
        }
    });

    let reply = UdpLink::new()
        .request(addr, b"PING", Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(reply, b"PONG");
}

#[tokio::test]
async fn test_request_times_out_on_silent_peer() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = silent.local_addr().unwrap();

    let result = UdpLink::new()
        .request(addr, b"PING", Duration::from_millis(150))
        .await;
    assert_eq!(result, Err(TransportError::Timeout(Duration::from_millis(150))));
}

#[tokio::test]
async fn test_request_to_closed_port_fails() {
    let addr = {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.local_addr().unwrap()
    };

    // Either the port-unreachable error or the timeout, never a reply
    let result = UdpLink::new()
        .request(addr, b"PING", Duration::from_millis(200))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_signed_packet_arrives_intact() {
    let crypto = Arc::new(
        SharedKeyCrypto::from_secrets("my_secret_16byte", "my_hmac_secret_key")
            .with_encryption(true),
    );
    let codec = PacketCodec::new(crypto.clone(), Arc::new(SystemClock));

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = peer.local_addr().unwrap();

    let wire = codec.encode("NOTE_ADD:{\"title\":\"a|b\"}").unwrap().to_wire();
    UdpLink::new().send(addr, wire.as_bytes()).await.unwrap();

    let mut buf = vec![0u8; 8192];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let received = String::from_utf8(buf[..len].to_vec()).unwrap();

    let companion = PacketCodec::new(crypto, Arc::new(SystemClock));
    assert_eq!(companion.open(&received).unwrap(), "NOTE_ADD:{\"title\":\"a|b\"}");
}
