mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tally_client::{
    Callback, ConnectionEvent, ConnectionState, Envelope, EventKind, RealtimeClient,
    RealtimeConfig, SendOutcome, Topic,
};

use common::{advance, config, settle, EventLog, Inbox, MockConnector, MOCK_URL};

fn ping(n: u32) -> Envelope {
    Envelope::new("ping", json!({ "n": n }))
}

#[tokio::test(start_paused = true)]
async fn send_before_connected_is_queued_then_flushed() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    let log = EventLog::attach(&client);

    client.connect(None);
    assert_eq!(client.send(Envelope::new("ping", serde_json::Value::Null)), SendOutcome::Queued);
    assert_eq!(client.queued_len(), 1);

    settle().await;
    let mut server = connector.accept();
    assert_eq!(log.kinds(), vec![EventKind::Connected]);
    let frames = server.received();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].r#type, "ping");
    assert_eq!(client.queued_len(), 0);
    assert_eq!(connector.urls(), vec![MOCK_URL.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn send_while_connected_goes_straight_out() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    client.connect(None);
    settle().await;
    let mut server = connector.accept();

    assert!(client.send(ping(1)).is_sent());
    assert_eq!(server.received_types(), vec!["ping"]);
}

#[tokio::test(start_paused = true)]
async fn queue_preserves_order_across_reconnect() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    let log = EventLog::attach(&client);
    client.connect(None);
    settle().await;
    let first = connector.accept();

    first.drop_link("network gone");
    settle().await;
    assert_eq!(client.state(), ConnectionState::Reconnecting { attempt: 1 });

    for n in 0..5 {
        assert_eq!(client.send(ping(n)), SendOutcome::Queued);
    }

    advance(1_000).await;
    let mut second = connector.accept();
    let order: Vec<_> = second
        .received()
        .into_iter()
        .map(|e| e.payload["n"].as_u64().unwrap())
        .collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
    assert_eq!(
        log.kinds(),
        vec![
            EventKind::Connected,
            EventKind::Disconnected,
            EventKind::Reconnecting,
            EventKind::Reconnected,
        ]
    );
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn channel_listener_receives_its_messages() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    let reports = Inbox::default();
    let _sub = client.subscribe("reports", reports.callback());
    client.connect(None);
    settle().await;
    let mut server = connector.accept();

    let subscribes = server.received();
    assert_eq!(subscribes.len(), 1);
    assert_eq!(subscribes[0].r#type, "SUBSCRIBE");
    assert_eq!(subscribes[0].payload["channel"], "reports");

    server.push(json!({ "type": "message", "channel": "reports", "payload": { "id": 1 } }));
    server.push(json!({ "type": "message", "channel": "invoices", "payload": { "id": 2 } }));
    settle().await;

    let got = reports.messages();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].payload, json!({ "id": 1 }));
}

#[tokio::test(start_paused = true)]
async fn subscribe_acks_are_not_channel_traffic() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    let reports = Inbox::default();
    let _sub = client.subscribe("reports", reports.callback());
    client.connect(None);
    settle().await;
    let server = connector.accept();

    server.push(json!({ "type": "SUBSCRIBE", "channel": "reports", "payload": { "channel": "reports" } }));
    server.push(json!({ "type": "HEARTBEAT", "payload": { "timestamp": 1, "serverTime": 2 } }));
    settle().await;
    assert_eq!(reports.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn unsubscribing_one_listener_keeps_the_other() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    client.connect(None);
    settle().await;
    let mut server = connector.accept();

    let a = Inbox::default();
    let b = Inbox::default();
    let sub_a = client.subscribe("reports", a.callback());
    let sub_b = client.subscribe("reports", b.callback());
    // Only the first listener on a channel subscribes on the wire.
    assert_eq!(server.received_types(), vec!["SUBSCRIBE"]);

    sub_a.unsubscribe();
    assert!(server.received().is_empty());

    server.push(json!({ "type": "message", "channel": "reports", "payload": 1 }));
    settle().await;
    assert_eq!(a.len(), 0);
    assert_eq!(b.len(), 1);

    client.off(sub_b);
    let frames = server.received();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].r#type, "UNSUBSCRIBE");
    assert_eq!(frames[0].payload["channel"], "reports");
    assert!(client.active_channels().is_empty());
}

#[tokio::test(start_paused = true)]
async fn registering_the_same_callback_twice_delivers_once() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    client.connect(None);
    settle().await;
    let server = connector.accept();

    let inbox = Inbox::default();
    let callback = inbox.callback();
    let first = client.subscribe("reports", callback.clone());
    let second = client.subscribe("reports", callback);

    server.push(json!({ "type": "message", "channel": "reports" }));
    settle().await;
    assert_eq!(inbox.len(), 1);

    first.unsubscribe();
    server.push(json!({ "type": "message", "channel": "reports" }));
    settle().await;
    assert_eq!(inbox.len(), 1);
    second.unsubscribe();
}

#[tokio::test(start_paused = true)]
async fn subscriptions_are_replayed_once_after_reconnect() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    let a1 = Inbox::default();
    let a2 = Inbox::default();
    let b = Inbox::default();
    let _subs = [
        client.subscribe("A", a1.callback()),
        client.subscribe("A", a2.callback()),
        client.subscribe("B", b.callback()),
    ];
    client.connect(None);
    settle().await;
    let mut first = connector.accept();
    assert_eq!(first.received().len(), 2);

    first.drop_link("reset");
    settle().await;
    client.send(ping(7));
    advance(1_000).await;

    let mut second = connector.accept();
    let frames = second.received();
    let subscribed: Vec<_> = frames
        .iter()
        .filter(|f| f.r#type == "SUBSCRIBE")
        .map(|f| f.payload["channel"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(subscribed, vec!["A", "B"]);
    // Resubscribe before flushing.
    assert_eq!(frames.last().map(|f| f.r#type.as_str()), Some("ping"));
}

#[tokio::test(start_paused = true)]
async fn type_listeners_run_before_channel_listeners_and_after_generic_ones() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let o = order.clone();
    let _generic = client.on(
        EventKind::Message,
        Callback::new(move |_: &ConnectionEvent| o.lock().unwrap().push("generic")),
    );
    let o = order.clone();
    let _channel = client.subscribe(
        "reports",
        Callback::new(move |_: &Envelope| o.lock().unwrap().push("channel")),
    );
    let o = order.clone();
    let _typed = client.subscribe(
        Topic::message_type("report:status_update"),
        Callback::new(move |_: &Envelope| o.lock().unwrap().push("type")),
    );

    client.connect(None);
    settle().await;
    let server = connector.accept();
    server.push(json!({ "type": "report:status_update", "channel": "reports", "payload": {} }));
    settle().await;

    assert_eq!(*order.lock().unwrap(), vec!["generic", "type", "channel"]);
}

#[tokio::test(start_paused = true)]
async fn panicking_listener_does_not_starve_the_next_one() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    let log = EventLog::attach(&client);

    let _bad = client.subscribe(
        Topic::message_type("report:status_update"),
        Callback::new(|_: &Envelope| panic!("listener bug")),
    );
    let good = Inbox::default();
    let _good = client.subscribe(Topic::message_type("report:status_update"), good.callback());

    client.connect(None);
    settle().await;
    let mut server = connector.accept();
    server.push(json!({ "type": "report:status_update", "payload": { "reportId": "r1" } }));
    settle().await;

    assert_eq!(good.len(), 1);
    assert!(client.is_connected());
    assert!(!server.close_requested());
    assert_eq!(log.count(EventKind::Disconnected), 0);
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_dropped_without_closing() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let _all = client.on(
        EventKind::Message,
        Callback::new(move |_: &ConnectionEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    client.connect(None);
    settle().await;
    let server = connector.accept();
    server.push_raw("not json");
    server.push_raw(r#"{"payload": 1}"#);
    server.push_raw(r#"{"type": "  "}"#);
    server.push(json!({ "type": "something:new" }));
    settle().await;

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn fractional_timestamps_still_reach_listeners() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    let inbox = Inbox::default();
    let _status = client.subscribe(Topic::message_type("report:status_update"), inbox.callback());

    client.connect(None);
    settle().await;
    let server = connector.accept();
    server.push_raw(r#"{"type":"report:status_update","payload":{"reportId":"r1"},"timestamp":1700000000123.5}"#);
    server.push_raw(r#"{"type":"report:status_update","payload":{"reportId":"r2"},"timestamp":1700000000123}"#);
    settle().await;

    let messages = inbox.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].payload["reportId"], "r1");
    assert_eq!(messages[0].timestamp, Some(1_700_000_000_123));
    assert_eq!(messages[1].timestamp, Some(1_700_000_000_123));
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_and_gives_up_after_max_attempts() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    let log = EventLog::attach(&client);
    client.connect(None);
    settle().await;
    let first = connector.accept();

    connector.refuse_all(true);
    first.drop_link("server restart");
    advance(60_000).await;

    assert_eq!(
        log.reconnect_delays(),
        [1, 2, 4, 8, 16]
            .into_iter()
            .map(|s| Duration::from_secs(s))
            .collect::<Vec<_>>()
    );
    assert_eq!(log.count(EventKind::MaxReconnectAttemptsReached), 1);
    // One initial connection plus five retries.
    assert_eq!(connector.attempts(), 6);
    assert!(matches!(client.state(), ConnectionState::Error { .. }));

    advance(600_000).await;
    assert_eq!(connector.attempts(), 6);
    assert_eq!(log.count(EventKind::MaxReconnectAttemptsReached), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_waits_for_the_full_delay() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    client.connect(None);
    settle().await;
    let first = connector.accept();
    first.drop_link("blip");
    settle().await;

    advance(999).await;
    assert_eq!(connector.attempts(), 1);
    advance(1).await;
    assert_eq!(connector.attempts(), 2);
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn manual_reconnect_after_exhaustion_starts_fresh() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    let log = EventLog::attach(&client);
    client.connect(None);
    settle().await;
    let first = connector.accept();
    connector.refuse_all(true);
    first.drop_link("gone");
    advance(60_000).await;
    assert_eq!(log.count(EventKind::MaxReconnectAttemptsReached), 1);

    connector.refuse_all(false);
    log.clear();
    client.reconnect();
    settle().await;
    let _second = connector.accept();
    assert_eq!(log.kinds(), vec![EventKind::Reconnected]);
    assert_eq!(client.connection().reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn initial_failures_then_success_is_a_first_connection() {
    let connector = MockConnector::new();
    connector.refuse_next(2);
    let client = RealtimeClient::with_connector(config(), connector.clone());
    let log = EventLog::attach(&client);
    client.connect(None);
    advance(10_000).await;

    let _server = connector.accept();
    assert_eq!(connector.attempts(), 3);
    assert_eq!(log.count(EventKind::Error), 2);
    assert_eq!(log.count(EventKind::Connected), 1);
    assert_eq!(log.count(EventKind::Reconnected), 0);
    assert_eq!(client.connection().last_error, None);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_scheduled_retries() {
    let connector = MockConnector::new();
    connector.refuse_all(true);
    let client = RealtimeClient::with_connector(config(), connector.clone());
    let log = EventLog::attach(&client);
    client.connect(None);
    advance(1_000).await;
    advance(500).await;
    // Initial attempt plus retry #1 failed; retry #2 is scheduled.
    assert_eq!(connector.attempts(), 2);
    assert_eq!(client.state(), ConnectionState::Reconnecting { attempt: 2 });

    client.disconnect();
    advance(120_000).await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(log.count(EventKind::MaxReconnectAttemptsReached), 0);
}

#[tokio::test(start_paused = true)]
async fn clean_disconnect_closes_and_does_not_retry() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    let log = EventLog::attach(&client);
    client.connect(None);
    settle().await;
    let mut server = connector.accept();

    client.disconnect();
    settle().await;
    assert!(server.close_requested());
    assert_eq!(
        log.events().last(),
        Some(&ConnectionEvent::Disconnected {
            clean: true,
            reason: None
        })
    );

    advance(60_000).await;
    assert_eq!(connector.attempts(), 1);

    // Messages sent while disconnected wait for the next connect.
    assert_eq!(client.send(ping(1)), SendOutcome::Queued);
    client.connect(None);
    settle().await;
    let mut again = connector.accept();
    assert_eq!(again.received_types(), vec!["ping"]);
    // A fresh session after an explicit disconnect.
    assert_eq!(log.count(EventKind::Connected), 2);
}

#[tokio::test(start_paused = true)]
async fn connect_is_idempotent() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    client.connect(None);
    client.connect(None);
    settle().await;
    client.connect(None);
    settle().await;
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn heartbeats_are_sent_on_the_interval() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    client.connect(None);
    settle().await;
    let mut server = connector.accept();

    advance(29_000).await;
    assert!(server.received().is_empty());
    advance(1_000).await;
    let frames = server.received();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].r#type, "HEARTBEAT");
    assert!(frames[0].payload["timestamp"].is_i64());
}

#[tokio::test(start_paused = true)]
async fn silent_link_is_treated_as_dropped() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    let log = EventLog::attach(&client);
    client.connect(None);
    settle().await;
    let _server = connector.accept();

    // Ticks at 30s and 60s are within the 60s timeout; 90s is not.
    advance(89_000).await;
    assert_eq!(log.count(EventKind::Disconnected), 0);
    advance(1_000).await;
    assert_eq!(
        log.events().iter().find(|e| e.kind() == EventKind::Disconnected),
        Some(&ConnectionEvent::Disconnected {
            clean: false,
            reason: Some("heartbeat timeout".to_string())
        })
    );
    assert_eq!(log.count(EventKind::Reconnecting), 1);
}

#[tokio::test(start_paused = true)]
async fn inbound_traffic_keeps_the_link_alive() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    let log = EventLog::attach(&client);
    client.connect(None);
    settle().await;
    let server = connector.accept();

    for _ in 0..10 {
        advance(20_000).await;
        server.push(json!({ "type": "HEARTBEAT", "payload": { "timestamp": 0 } }));
    }
    settle().await;
    assert_eq!(log.count(EventKind::Disconnected), 0);
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn disabled_client_never_connects() {
    let connector = MockConnector::new();
    let config = RealtimeConfig {
        enabled: false,
        ..config()
    };
    let client = RealtimeClient::with_connector(config, connector.clone());
    client.connect(Some("ws://elsewhere.test/ws"));
    client.reconnect();
    advance(10_000).await;

    assert_eq!(connector.attempts(), 0);
    assert_eq!(client.state(), ConnectionState::Disabled);
    assert_eq!(client.send(ping(1)), SendOutcome::Queued);
}

#[tokio::test(start_paused = true)]
async fn no_endpoint_parks_in_disabled_until_one_is_given() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(RealtimeConfig::default(), connector.clone());
    client.connect(None);
    settle().await;
    assert_eq!(client.state(), ConnectionState::Disabled);
    assert_eq!(connector.attempts(), 0);

    client.connect(Some(MOCK_URL));
    settle().await;
    assert!(client.is_connected());
    assert_eq!(client.connection().url.as_deref(), Some(MOCK_URL));
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_driver() {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(config(), connector.clone());
    client.connect(None);
    settle().await;
    let mut server = connector.accept();

    client.shutdown();
    settle().await;
    assert!(server.close_requested());

    client.connect(None);
    advance(5_000).await;
    assert_eq!(connector.attempts(), 1);
}
