//! End-to-end tests of the command/event key layout over Zenoh.
//!
//! Note: Zenoh requires multi-thread tokio runtime.
//! Each test uses a unique key prefix to avoid interference.

use std::time::Duration;
use telebridge_common::{
    BridgeCommand, BridgeEvent, ClientKeys, Format, SessionState, decode_auto, encode,
};

/// Generate a unique test prefix to avoid test interference.
fn unique_prefix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("test_{}/device", nanos)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_commands_reach_wildcard_subscriber() {
    let keys = ClientKeys::new(unique_prefix());

    let session = zenoh::open(zenoh::Config::default())
        .await
        .expect("Failed to open Zenoh session");

    let subscriber = session
        .declare_subscriber(keys.all_commands_wildcard())
        .await
        .expect("Failed to create subscriber");

    tokio::time::sleep(Duration::from_millis(100)).await;

    let cmd = BridgeCommand::ListDevices;
    let payload = encode(&cmd, Format::Json).unwrap();
    session
        .put(keys.command_key("panel-1"), payload)
        .await
        .expect("Failed to publish");

    let sample = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
        .await
        .expect("Timeout waiting for command")
        .expect("Failed to receive command");

    let key = sample.key_expr().as_str().to_string();
    assert_eq!(keys.parse_client_id(&key), Some("panel-1"));

    let decoded: BridgeCommand = decode_auto(&sample.payload().to_bytes()).unwrap();
    assert!(matches!(decoded, BridgeCommand::ListDevices));

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_events_only_reach_their_client() {
    let keys = ClientKeys::new(unique_prefix());

    let session = zenoh::open(zenoh::Config::default())
        .await
        .expect("Failed to open Zenoh session");

    let subscriber = session
        .declare_subscriber(keys.client_events_wildcard("a"))
        .await
        .expect("Failed to create subscriber");

    tokio::time::sleep(Duration::from_millis(100)).await;

    let for_b = BridgeEvent::status(SessionState::Connected, "b");
    let for_a = BridgeEvent::status(SessionState::Connecting, "a");

    session
        .put(
            keys.event_key("b", for_b.kind()),
            encode(&for_b, Format::Cbor).unwrap(),
        )
        .await
        .unwrap();
    session
        .put(
            keys.event_key("a", for_a.kind()),
            encode(&for_a, Format::Cbor).unwrap(),
        )
        .await
        .unwrap();

    let sample = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
        .await
        .expect("Timeout waiting for event")
        .unwrap();

    let decoded: BridgeEvent = decode_auto(&sample.payload().to_bytes()).unwrap();
    assert_eq!(decoded, for_a);

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}
