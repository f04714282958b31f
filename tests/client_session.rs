//! Session behavior against scripted transports: handshake polling, publish
//! retry accounting, subscription delivery, disconnect rules.

mod common;

use probemq::client::transport::{Dial, Session, SessionEvent, Transport};
use probemq::client::BrokerClient;
use probemq::config::BrokerConfig;
use probemq::core::error::ProbeError;
use probemq::util::wait::wait_until;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const POLL: Duration = Duration::from_millis(10);
const WINDOW: Duration = Duration::from_secs(2);

/// Transport whose publish outcomes are scripted: the first `fail_first`
/// attempts are rejected, every later one accepted.
struct StubTransport {
    attempts: Arc<AtomicU32>,
    fail_first: u32,
}

impl Transport for StubTransport {
    fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<(), ProbeError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_first {
            Err(ProbeError::Transport("stub rejected publish".to_string()))
        } else {
            Ok(())
        }
    }

    fn subscribe(&self, _topic: &str) -> Result<(), ProbeError> {
        Ok(())
    }

    fn disconnect(&self) -> Result<(), ProbeError> {
        Ok(())
    }
}

/// Hands out one pre-built session; the test keeps the event sender to play
/// the broker side.
struct StubDialer {
    attempts: Arc<AtomicU32>,
    fail_first: u32,
    events: Mutex<Option<flume::Receiver<SessionEvent>>>,
}

impl Dial for StubDialer {
    fn dial(&self, _config: &BrokerConfig, client_id: &str) -> Result<Session, ProbeError> {
        assert!(client_id.starts_with("client-"));
        let events = self
            .events
            .lock()
            .unwrap()
            .take()
            .expect("dial called twice");
        Ok(Session {
            transport: Box::new(StubTransport {
                attempts: Arc::clone(&self.attempts),
                fail_first: self.fail_first,
            }),
            events,
        })
    }
}

fn stub_client(
    fail_first: u32,
) -> (
    BrokerClient,
    flume::Sender<SessionEvent>,
    Arc<AtomicU32>,
) {
    common::init_logging();
    let (event_tx, event_rx) = flume::unbounded();
    let attempts = Arc::new(AtomicU32::new(0));
    let dialer = StubDialer {
        attempts: Arc::clone(&attempts),
        fail_first,
        events: Mutex::new(Some(event_rx)),
    };
    let client = BrokerClient::new(BrokerConfig::default(), Box::new(dialer));
    (client, event_tx, attempts)
}

async fn connect_and_ack(client: &mut BrokerClient, events: &flume::Sender<SessionEvent>) {
    client.connect().expect("connect");
    events.send(SessionEvent::ConnAck { code: 0 }).unwrap();
    assert!(wait_until(|| client.is_connected(), WINDOW, POLL).await);
}

#[tokio::test]
async fn connect_publish_disconnect_round() {
    let (mut client, events, attempts) = stub_client(0);
    connect_and_ack(&mut client, &events).await;

    client
        .publish("/test/req", r#"{"command":"hello"}"#, 3)
        .expect("publish");
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    client.disconnect().expect("disconnect");
    assert!(!client.is_connected());
}

#[tokio::test]
async fn connect_is_idempotent_once_connected() {
    let (mut client, events, _attempts) = stub_client(0);
    connect_and_ack(&mut client, &events).await;

    // The stub dialer panics on a second dial; a no-op proves it never runs.
    client.connect().expect("reconnect is a no-op");
    assert!(client.is_connected());
}

#[tokio::test]
async fn repeated_success_acks_stay_connected() {
    let (mut client, events, _attempts) = stub_client(0);
    connect_and_ack(&mut client, &events).await;

    events.send(SessionEvent::ConnAck { code: 0 }).unwrap();
    events.send(SessionEvent::ConnAck { code: 0 }).unwrap();
    assert!(wait_until(|| client.is_connected(), WINDOW, POLL).await);
}

#[tokio::test]
async fn refused_handshake_never_connects() {
    let (mut client, events, _attempts) = stub_client(0);
    client.connect().expect("connect");
    events.send(SessionEvent::ConnAck { code: 5 }).unwrap();

    assert!(!wait_until(|| client.is_connected(), Duration::from_millis(150), POLL).await);
    assert!(matches!(
        client.publish("req", "msg", 3),
        Err(ProbeError::NotConnected)
    ));
}

#[tokio::test]
async fn publish_gives_up_after_retry_budget() {
    let (mut client, events, attempts) = stub_client(u32::MAX);
    connect_and_ack(&mut client, &events).await;

    let err = client.publish("req", "msg", 3).unwrap_err();
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(matches!(
        err,
        ProbeError::PublishRejected { attempts: 3, .. }
    ));
}

#[tokio::test]
async fn publish_stops_on_first_success() {
    let (mut client, events, attempts) = stub_client(1);
    connect_and_ack(&mut client, &events).await;

    client.publish("req", "msg", 3).expect("second attempt lands");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn subscribe_records_delivered_payloads() {
    let (mut client, events, _attempts) = stub_client(0);
    connect_and_ack(&mut client, &events).await;

    client.subscribe("/test/#").expect("subscribe");
    events
        .send(SessionEvent::Message {
            topic: "/test/req".to_string(),
            payload: b"ping".to_vec(),
        })
        .unwrap();

    assert!(wait_until(|| client.message_count() > 0, WINDOW, POLL).await);
    assert_eq!(client.messages(), vec!["ping".to_string()]);

    client.clear_messages();
    assert_eq!(client.message_count(), 0);
}

#[tokio::test]
async fn custom_handler_bypasses_the_store() {
    let (mut client, events, _attempts) = stub_client(0);
    connect_and_ack(&mut client, &events).await;

    let (seen_tx, seen_rx) = flume::unbounded::<(String, String)>();
    client
        .subscribe_with(
            "/test/#",
            Box::new(move |topic, payload| {
                let _ = seen_tx.send((topic.to_string(), payload.to_string()));
            }),
        )
        .expect("subscribe");

    events
        .send(SessionEvent::Message {
            topic: "/test/req".to_string(),
            payload: b"pong".to_vec(),
        })
        .unwrap();

    let (topic, payload) = tokio::time::timeout(WINDOW, seen_rx.recv_async())
        .await
        .expect("handler ran")
        .unwrap();
    assert_eq!(topic, "/test/req");
    assert_eq!(payload, "pong");
    assert_eq!(client.message_count(), 0);
}

#[tokio::test]
async fn operations_before_connect_are_rejected() {
    let (mut client, _events, attempts) = stub_client(0);

    assert!(matches!(
        client.publish("req", "msg", 3),
        Err(ProbeError::NotConnected)
    ));
    assert!(matches!(
        client.subscribe("req"),
        Err(ProbeError::NotConnected)
    ));
    assert!(matches!(client.disconnect(), Err(ProbeError::NotConnected)));
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn disconnect_event_drops_the_connected_flag() {
    let (mut client, events, _attempts) = stub_client(0);
    connect_and_ack(&mut client, &events).await;

    events
        .send(SessionEvent::Disconnected {
            reason: "keep-alive lapsed".to_string(),
        })
        .unwrap();

    assert!(wait_until(|| !client.is_connected(), WINDOW, POLL).await);
}
