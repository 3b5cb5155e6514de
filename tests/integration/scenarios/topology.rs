//! Topology integration tests
//!
//! Membership notifications published on the bus change which backends
//! live clients are sent to.

use crate::integration::{refused_addr, MockBackend, TestClient, TestProxy};
use gantry::{Channel, TopologyBus};
use std::time::Duration;

#[tokio::test]
async fn test_added_backend_receives_traffic() {
    let proxy = TestProxy::start(&[]).await;
    let backend = MockBackend::echo().await.unwrap();

    proxy.bus.publish(Channel::AddServer, backend.addr());
    assert!(proxy.wait_for_pool(&[backend.addr()]).await);

    let mut client = TestClient::connect(proxy.addr()).await.unwrap();
    assert_eq!(client.round_trip(b"new").await.unwrap(), b"new");
    assert_eq!(
        proxy.bus.load_snapshot().await.unwrap(),
        vec![backend.addr().to_string()]
    );

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_removed_backend_receives_no_traffic() {
    let removed = MockBackend::echo().await.unwrap();
    let kept = MockBackend::echo().await.unwrap();
    let proxy = TestProxy::start(&[removed.addr(), kept.addr()]).await;

    proxy.bus.publish(Channel::RemoveServer, removed.addr());
    assert!(proxy.wait_for_pool(&[kept.addr()]).await);

    for _ in 0..4 {
        let mut client = TestClient::connect(proxy.addr()).await.unwrap();
        assert_eq!(client.round_trip(b"hi").await.unwrap(), b"hi");
    }

    assert_eq!(removed.stats().connections, 0);
    assert_eq!(kept.stats().connections, 4);
    proxy.shutdown().await;
}

#[tokio::test]
async fn test_remove_during_quarantine_wins() {
    let dead = refused_addr().await;
    let backend = MockBackend::echo().await.unwrap();
    let proxy = TestProxy::start_with(
        &[dead.as_str(), backend.addr()],
        "round_robin",
        Duration::from_millis(200),
    )
    .await;

    let mut client = TestClient::connect(proxy.addr()).await.unwrap();
    client.round_trip(b"x").await.unwrap();
    assert_eq!(proxy.topology().retired().await, vec![dead.clone()]);

    proxy.bus.publish(Channel::RemoveServer, dead.as_str());
    for _ in 0..100 {
        if proxy.topology().retired().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(proxy.topology().retired().await.is_empty());

    // Well past the quarantine period the removed backend stays out
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(proxy.topology().get_pool().await, vec![backend.addr().to_string()]);
    assert_eq!(
        proxy.bus.load_snapshot().await.unwrap(),
        vec![backend.addr().to_string()]
    );

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_unknown_remove_is_ignored() {
    let backend = MockBackend::echo().await.unwrap();
    let proxy = TestProxy::start(&[backend.addr()]).await;

    proxy.bus.publish(Channel::RemoveServer, "192.0.2.1:9");
    proxy.bus.publish(Channel::AddServer, backend.addr());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(proxy.topology().get_pool().await, vec![backend.addr().to_string()]);
    proxy.shutdown().await;
}
