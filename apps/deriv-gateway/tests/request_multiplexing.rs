//! Concurrent request/response multiplexing over one connection.

mod common;

use std::sync::Arc;
use std::time::Duration;

use deriv_gateway::{
    ConnectionLifecycle, ConnectionSettings, KeepaliveConfig, ReconnectConfig, RequestError,
    TenantKey,
};

use common::{ChannelConnector, FakeServer};

fn test_settings(request_timeout: Duration) -> ConnectionSettings {
    ConnectionSettings {
        url: "wss://fake.invalid/ws".to_string(),
        request_timeout,
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: 3,
        },
        keepalive: KeepaliveConfig {
            interval: Duration::from_secs(60),
            ping_timeout: Duration::from_secs(1),
            max_failures: 3,
        },
        history_capacity: 32,
    }
}

#[tokio::test]
async fn concurrent_requests_each_get_their_own_response() {
    let server = FakeServer::new();
    let lifecycle = ConnectionLifecycle::new(
        TenantKey::Anonymous,
        test_settings(Duration::from_secs(2)),
        Arc::new(ChannelConnector::new(Arc::clone(&server))),
    );
    lifecycle.connect().await.unwrap();

    // 16 snapshots in flight at once; the fake server staggers replies
    // so responses interleave out of request order.
    let mut tasks = Vec::new();
    for i in 0..16 {
        let lifecycle = Arc::clone(&lifecycle);
        let symbol = format!("R_{i}");
        tasks.push(tokio::spawn(async move {
            let sample = lifecycle.tick_snapshot(&symbol).await.unwrap();
            (symbol, sample)
        }));
    }

    for task in tasks {
        let (symbol, sample) = task.await.unwrap();
        assert_eq!(sample.symbol, symbol);
    }
    assert_eq!(lifecycle.pending_requests(), 0);
}

#[tokio::test]
async fn timed_out_requests_leave_no_pending_state() {
    let server = FakeServer::new();
    server.set_silent(true);
    let lifecycle = ConnectionLifecycle::new(
        TenantKey::Anonymous,
        test_settings(Duration::from_millis(30)),
        Arc::new(ChannelConnector::new(Arc::clone(&server))),
    );
    lifecycle.connect().await.unwrap();

    for _ in 0..5 {
        let err = lifecycle.balance().await.unwrap_err();
        assert!(matches!(err, RequestError::Timeout(_)));
    }
    assert_eq!(lifecycle.pending_requests(), 0);

    // The connection recovers once the server starts answering again.
    server.set_silent(false);
    let balance = lifecycle.balance().await.unwrap();
    assert_eq!(balance.currency, "USD");
}

#[tokio::test]
async fn typed_queries_parse_their_payloads() {
    let server = FakeServer::new();
    let lifecycle = ConnectionLifecycle::new(
        TenantKey::Anonymous,
        test_settings(Duration::from_secs(2)),
        Arc::new(ChannelConnector::new(Arc::clone(&server))),
    );
    lifecycle.connect().await.unwrap();

    let balance = lifecycle.balance().await.unwrap();
    assert!((balance.balance - 1000.0).abs() < f64::EPSILON);
    assert_eq!(balance.currency, "USD");

    let symbols = lifecycle.active_symbols().await.unwrap();
    assert_eq!(symbols.len(), 2);
    assert_eq!(symbols[0].symbol, "R_100");
    assert_eq!(symbols[1].market, "forex");
}
