// Discovery against loopback responders
//
// The probe target is a fake companion on loopback instead of the broadcast
// address; replies go to the configured listen port exactly as on a LAN.

use deskbridge_core::transport::{DiscoveryConfig, DiscoveryReply, DiscoveryService};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr, UdpSocket as StdUdpSocket};
use std::time::Duration;
use tokio::net::UdpSocket;

fn free_port() -> u16 {
    let socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

fn config(listen_port: u16, probe_target: SocketAddr) -> DiscoveryConfig {
    DiscoveryConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], listen_port)),
        probe_target,
        window: Duration::from_millis(800),
        poll_interval: Duration::from_millis(100),
    }
}

/// Waits for the probe, then answers `replies` times to the listen port
async fn spawn_responder(bind: &str, reply: &'static str, replies: usize, listen_port: u16) -> SocketAddr {
    let socket = UdpSocket::bind(bind).await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 64];
        let (len, from) = socket.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"DISCOVERY_REQUEST");
        let reply_to = SocketAddr::new(from.ip(), listen_port);
        for _ in 0..replies {
            socket.send_to(reply.as_bytes(), reply_to).await.unwrap();
        }
    });
    addr
}

#[tokio::test]
async fn test_discovers_responder_once() {
    let listen_port = free_port();
    let target = spawn_responder("127.0.0.1:0", "LAPTOP_SERVER_ACTIVE", 3, listen_port).await;

    let found = DiscoveryService::new(config(listen_port, target))
        .discover()
        .await;

    let expected: HashSet<IpAddr> = ["127.0.0.1".parse().unwrap()].into_iter().collect();
    assert_eq!(found, expected);
}

#[tokio::test]
async fn test_distinct_responders_are_all_found() {
    let listen_port = free_port();
    let target = spawn_responder("127.0.0.1:0", "LAPTOP_IP_FOUND", 1, listen_port).await;

    // A second companion that announces itself without seeing the probe
    let other = UdpSocket::bind("127.0.0.2:0").await.unwrap();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let listen = SocketAddr::from(([127, 0, 0, 1], listen_port));
        other.send_to(b"NOT_A_REPLY", listen).await.unwrap();
        other.send_to(b"LAPTOP_SERVER_ACTIVE", listen).await.unwrap();
    });

    let found = DiscoveryService::new(config(listen_port, target))
        .discover_peers()
        .await;

    assert_eq!(found.len(), 2);
    assert_eq!(
        found.get(&"127.0.0.1".parse::<IpAddr>().unwrap()),
        Some(&DiscoveryReply::IpFound)
    );
    assert_eq!(
        found.get(&"127.0.0.2".parse::<IpAddr>().unwrap()),
        Some(&DiscoveryReply::ServerActive)
    );
}

#[tokio::test]
async fn test_no_responders_yields_empty_set() {
    let listen_port = free_port();
    let silent = StdUdpSocket::bind("127.0.0.1:0").unwrap();
    let target = silent.local_addr().unwrap();

    let service = DiscoveryService::new(DiscoveryConfig {
        window: Duration::from_millis(300),
        ..config(listen_port, target)
    });
    assert!(service.discover().await.is_empty());
}

#[tokio::test]
async fn test_bind_failure_yields_empty_set() {
    // Held without SO_REUSEADDR, so the listener cannot share it
    let occupied = StdUdpSocket::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let service = DiscoveryService::new(config(port, "127.0.0.1:9".parse().unwrap()));

    assert!(service.try_discover().await.is_err());
    assert!(service.discover().await.is_empty());
}
