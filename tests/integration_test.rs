//! Integration tests for the full chat flow over the loopback network.

use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::UnboundedReceiver;

use rfcomm_chat::bluetooth::{
    Adapter, Framing, MemoryAdapter, MemoryNetwork, RemoteEndpoint, ServiceListener,
    ServiceRecord, SERVICE_UUID,
};
use rfcomm_chat::{Config, ConnectionState, Role, Session, SessionEvent, SessionOptions};

async fn next_event(rx: &mut UnboundedReceiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

async fn next_message(rx: &mut UnboundedReceiver<SessionEvent>) -> (String, Role) {
    loop {
        if let SessionEvent::MessageReceived(message) = next_event(rx).await {
            return (message.content, message.sender);
        }
    }
}

async fn wait_for_state(rx: &mut UnboundedReceiver<SessionEvent>, wanted: ConnectionState) {
    loop {
        if next_event(rx).await == SessionEvent::StateChanged(wanted) {
            return;
        }
    }
}

async fn wait_until_bound(network: &MemoryNetwork, address: &str) {
    while !network.is_bound(address, SERVICE_UUID) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

struct Peer {
    session: Session<MemoryAdapter>,
    events: UnboundedReceiver<SessionEvent>,
}

fn peer(network: &MemoryNetwork, address: &str, options: SessionOptions) -> Peer {
    let session = Session::new(network.adapter(address), options);
    let events = session.take_event_receiver().unwrap();
    Peer { session, events }
}

async fn pair(network: &MemoryNetwork, server: &mut Peer, client: &mut Peer) {
    let listening = server.session.listen().unwrap();
    wait_until_bound(network, "AA:AA").await;
    let connecting = client
        .session
        .connect(RemoteEndpoint::new("AA:AA").with_name("server"))
        .unwrap();

    assert_eq!(listening.wait().await, Some(ConnectionState::ServerConnected));
    assert_eq!(connecting.wait().await, Some(ConnectionState::ClientConnected));
    wait_for_state(&mut server.events, ConnectionState::ServerConnected).await;
    wait_for_state(&mut client.events, ConnectionState::ClientConnected).await;
}

#[tokio::test]
async fn test_chat_both_ways() {
    let network = MemoryNetwork::new();
    let mut server = peer(&network, "AA:AA", SessionOptions::default());
    let mut client = peer(&network, "BB:BB", SessionOptions::default());
    pair(&network, &mut server, &mut client).await;

    assert!(client.session.send("hi").await.unwrap());
    assert_eq!(
        next_message(&mut server.events).await,
        ("hi".to_string(), Role::Client)
    );

    assert!(server.session.send("hello").await.unwrap());
    assert_eq!(
        next_message(&mut client.events).await,
        ("hello".to_string(), Role::Server)
    );

    let senders: Vec<Role> = server.session.history().iter().map(|m| m.sender).collect();
    assert_eq!(senders, vec![Role::Client, Role::Server]);
    let contents: Vec<String> = client
        .session
        .history()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, vec!["hi", "hello"]);
}

#[tokio::test]
async fn test_default_config_speaks_legacy_wire_format() {
    let network = MemoryNetwork::new();
    let mut listener = network
        .adapter("AA:AA")
        .bind(&ServiceRecord::default())
        .await
        .unwrap();

    let client = Session::new(
        network.adapter("BB:BB"),
        Config::default().session_options(),
    );
    let attempt = client.connect(RemoteEndpoint::new("AA:AA")).unwrap();
    let mut remote = listener.accept().await.unwrap();
    assert_eq!(attempt.wait().await, Some(ConnectionState::ClientConnected));

    assert!(client.send("hi").await.unwrap());
    let mut buf = [0u8; 16];
    let n = remote.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"hi0");
}

#[tokio::test]
async fn test_reconnect_after_remote_disconnect() {
    let network = MemoryNetwork::new();
    let mut server = peer(&network, "AA:AA", SessionOptions::default());
    let mut client = peer(&network, "BB:BB", SessionOptions::default());
    pair(&network, &mut server, &mut client).await;

    client.session.disconnect();
    assert_eq!(client.session.state(), Some(ConnectionState::Disconnected));
    wait_for_state(&mut server.events, ConnectionState::Disconnected).await;
    assert!(!server.session.has_active_pump());
    assert!(!server.session.send("anyone?").await.unwrap());

    assert!(server.session.can_start());
    assert!(client.session.can_start());
    pair(&network, &mut server, &mut client).await;

    assert!(server.session.send("welcome back").await.unwrap());
    assert_eq!(
        next_message(&mut client.events).await,
        ("welcome back".to_string(), Role::Server)
    );
}

#[tokio::test]
async fn test_length_prefixed_keeps_message_boundaries() {
    let network = MemoryNetwork::new();
    let mut options = SessionOptions::default();
    options.pump.framing = Framing::LengthPrefixed;

    let mut server = peer(&network, "AA:AA", options.clone());
    let mut client = peer(&network, "BB:BB", options);
    pair(&network, &mut server, &mut client).await;

    for text in ["one", "two", "three"] {
        assert!(client.session.send(text).await.unwrap());
    }

    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(next_message(&mut server.events).await.0);
    }
    assert_eq!(received, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn test_configured_timeout_fails_listen() {
    let mut config = Config::default();
    config.connection.connect_timeout_secs = Some(1);

    let network = MemoryNetwork::new();
    let mut server = peer(&network, "AA:AA", config.session_options());

    let attempt = server.session.listen().unwrap();
    assert_eq!(
        attempt.wait().await,
        Some(ConnectionState::ServerConnectionFailed)
    );
    wait_for_state(&mut server.events, ConnectionState::ServerConnectionFailed).await;
    assert!(!network.is_bound("AA:AA", SERVICE_UUID));
    assert!(server.session.can_start());
}

#[tokio::test]
async fn test_cancelled_connect_allows_retry() {
    let network = MemoryNetwork::new();
    network.stall("AA:AA");
    let mut client = peer(&network, "BB:BB", SessionOptions::default());

    let attempt = client.session.connect(RemoteEndpoint::new("AA:AA")).unwrap();
    wait_for_state(&mut client.events, ConnectionState::ClientConnecting).await;
    assert!(!client.session.can_start());

    attempt.cancel();
    assert_eq!(
        attempt.wait().await,
        Some(ConnectionState::ClientConnectionFailed)
    );
    assert!(client.session.can_start());
    assert_eq!(client.session.adapter().discovery_cancellations(), 1);
}
