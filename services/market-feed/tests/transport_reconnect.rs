//! Transport lifecycle against a local WebSocket server

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use market_feed::metrics::FeedMetrics;
use market_feed::transport::{ConnectionState, Transport, TransportEvent};

const WAIT: Duration = Duration::from_secs(5);

/// Accept connections forever. Each session echoes the first text frame
/// back with an `echo:` prefix and then closes.
async fn spawn_echo_once_server() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    if let Message::Text(text) = message {
                        let _ = ws.send(Message::Text(format!("echo:{}", text))).await;
                        let _ = ws.close(None).await;
                        break;
                    }
                }
            });
        }
    });

    Url::parse(&format!("ws://{}", addr)).unwrap()
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("transport event channel closed")
}

#[tokio::test]
async fn test_open_message_close_then_reconnect() {
    let url = spawn_echo_once_server().await;
    let metrics = Arc::new(FeedMetrics::new());
    let (transport, mut events) = Transport::new(
        url,
        Duration::from_millis(20),
        Duration::from_secs(30),
        metrics.clone(),
    );
    transport.connect();

    assert_eq!(next_event(&mut events).await, TransportEvent::Open);
    assert_eq!(transport.state(), ConnectionState::Connected);

    transport.send_text("hello".to_string());
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Message("echo:hello".to_string())
    );
    assert_eq!(next_event(&mut events).await, TransportEvent::Close);

    // The loop reconnects on its own after the delay
    assert_eq!(next_event(&mut events).await, TransportEvent::Open);

    let exported = metrics.export();
    assert_eq!(exported["connects"], 2);
    assert_eq!(exported["disconnects"], 1);
    assert_eq!(exported["messages_sent"], 1);
}

/// Accept connections and hold them open without ever sending a frame.
async fn spawn_silent_server() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                // Drain until the client goes away
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    Url::parse(&format!("ws://{}", addr)).unwrap()
}

#[tokio::test]
async fn test_silent_connection_is_dropped_and_reopened() {
    let url = spawn_silent_server().await;
    let metrics = Arc::new(FeedMetrics::new());
    let (transport, mut events) = Transport::new(
        url,
        Duration::from_millis(20),
        Duration::from_millis(150),
        metrics.clone(),
    );
    transport.connect();

    assert_eq!(next_event(&mut events).await, TransportEvent::Open);
    assert_eq!(next_event(&mut events).await, TransportEvent::Close);
    assert_eq!(next_event(&mut events).await, TransportEvent::Open);
    assert!(metrics.export()["disconnects"] >= 1);
}

/// Ping each client once, count the pongs that come back within a short
/// window, and report the count as a text frame.
async fn spawn_ping_server() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut ws) = accept_async(stream).await else {
            return;
        };
        ws.send(Message::Ping(b"feed".to_vec())).await.unwrap();

        let mut pongs = 0;
        while let Ok(Some(Ok(message))) = timeout(Duration::from_millis(300), ws.next()).await {
            if matches!(message, Message::Pong(_)) {
                pongs += 1;
            }
        }
        let _ = ws.send(Message::Text(format!("pongs:{}", pongs))).await;
    });

    Url::parse(&format!("ws://{}", addr)).unwrap()
}

#[tokio::test]
async fn test_ping_answered_with_single_pong() {
    let url = spawn_ping_server().await;
    let metrics = Arc::new(FeedMetrics::new());
    let (transport, mut events) = Transport::new(
        url,
        Duration::from_millis(20),
        Duration::from_secs(30),
        metrics,
    );
    transport.connect();

    assert_eq!(next_event(&mut events).await, TransportEvent::Open);
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Message("pongs:1".to_string())
    );
}

#[tokio::test]
async fn test_refused_connection_emits_no_events() {
    // Bind then drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let metrics = Arc::new(FeedMetrics::new());
    let url = Url::parse(&format!("ws://{}", addr)).unwrap();
    let (transport, mut events) = Transport::new(
        url,
        Duration::from_millis(10),
        Duration::from_secs(30),
        metrics.clone(),
    );
    transport.connect();

    assert!(timeout(Duration::from_millis(100), events.recv()).await.is_err());
    assert!(metrics.export()["connect_failures"] >= 1);
    assert_eq!(metrics.export()["connects"], 0);
}
