//! Policy integration tests
//!
//! Selection order as observed by the backends behind the proxy.

use crate::integration::{MockBackend, TestClient, TestProxy};
use std::time::Duration;

#[tokio::test]
async fn test_round_robin_spreads_clients_evenly() {
    let backends = vec![
        MockBackend::echo().await.unwrap(),
        MockBackend::echo().await.unwrap(),
        MockBackend::echo().await.unwrap(),
    ];
    let addrs: Vec<&str> = backends.iter().map(|b| b.addr()).collect();
    let proxy = TestProxy::start(&addrs).await;

    for round in 0..2 {
        for _ in 0..backends.len() {
            let mut client = TestClient::connect(proxy.addr()).await.unwrap();
            client.round_trip(b"rr").await.unwrap();
        }
        for backend in &backends {
            assert_eq!(backend.stats().connections, round + 1);
        }
    }

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_least_connections_prefers_idle_backend() {
    let b1 = MockBackend::echo().await.unwrap();
    let b2 = MockBackend::echo().await.unwrap();
    let proxy = TestProxy::start_with(
        &[b1.addr(), b2.addr()],
        "least_connections",
        Duration::from_secs(60),
    )
    .await;

    // Held open so their sessions keep counting
    let mut c1 = TestClient::connect(proxy.addr()).await.unwrap();
    c1.round_trip(b"1").await.unwrap();
    let mut c2 = TestClient::connect(proxy.addr()).await.unwrap();
    c2.round_trip(b"2").await.unwrap();
    assert_eq!(b1.stats().connections, 1);
    assert_eq!(b2.stats().connections, 1);

    // Tie goes to pool order
    let mut c3 = TestClient::connect(proxy.addr()).await.unwrap();
    c3.round_trip(b"3").await.unwrap();
    assert_eq!(b1.stats().connections, 2);

    // b1 now has two sessions, b2 one
    let mut c4 = TestClient::connect(proxy.addr()).await.unwrap();
    c4.round_trip(b"4").await.unwrap();
    assert_eq!(b2.stats().connections, 2);
    assert_eq!(proxy.active_sessions(), 4);

    proxy.shutdown().await;
}
