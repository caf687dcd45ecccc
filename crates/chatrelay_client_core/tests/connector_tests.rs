#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chatrelay_client_core::{ConnectorConfig, ConnectorEvent, HubConnector};
use chatrelay_protocol::{ChatInbound, Namespace};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

fn test_config(port: u16) -> ConnectorConfig {
	let mut cfg = ConnectorConfig::from_ws_endpoint(&format!("ws://127.0.0.1:{port}"), Namespace::Chat).unwrap();
	cfg.reconnect_min_delay = Duration::from_millis(20);
	cfg.reconnect_max_delay = Duration::from_millis(100);
	cfg
}

async fn next_event(rx: &mut mpsc::Receiver<ConnectorEvent<serde_json::Value>>) -> ConnectorEvent<serde_json::Value> {
	timeout(Duration::from_secs(5), rx.recv())
		.await
		.expect("timed out waiting for connector event")
		.expect("connector event stream ended")
}

#[tokio::test]
async fn reconnects_after_server_closes() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let port = listener.local_addr().unwrap().port();

	tokio::spawn(async move {
		for n in 0..2 {
			let (stream, _) = listener.accept().await.unwrap();
			let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
			let frame = format!(r#"{{"event":"lagged","data":{n}}}"#);
			ws.send(Message::Text(frame.into())).await.unwrap();
			if n == 0 {
				ws.close(None).await.unwrap();
			} else {
				// Keep the second connection open until the client leaves.
				while let Some(Ok(_)) = ws.next().await {}
			}
		}
	});

	let (connector, mut events, task) = HubConnector::<ChatInbound>::spawn::<serde_json::Value>(test_config(port));

	assert_eq!(next_event(&mut events).await, ConnectorEvent::Connected);
	match next_event(&mut events).await {
		ConnectorEvent::Message(v) => assert_eq!(v["data"], 0),
		other => panic!("expected first frame, got: {other:?}"),
	}
	assert!(matches!(next_event(&mut events).await, ConnectorEvent::Disconnected { .. }));

	assert_eq!(next_event(&mut events).await, ConnectorEvent::Connected);
	match next_event(&mut events).await {
		ConnectorEvent::Message(v) => assert_eq!(v["data"], 1),
		other => panic!("expected second frame, got: {other:?}"),
	}

	connector.close();
	timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}

#[tokio::test]
async fn dropped_sessions_reconnect_with_growing_delay() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let port = listener.local_addr().unwrap().port();
	let handshakes = Arc::new(AtomicUsize::new(0));

	let counter = Arc::clone(&handshakes);
	tokio::spawn(async move {
		loop {
			let (stream, _) = listener.accept().await.unwrap();
			if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
				counter.fetch_add(1, Ordering::SeqCst);
				drop(ws);
			}
		}
	});

	let mut cfg = test_config(port);
	cfg.reconnect_min_delay = Duration::from_millis(50);
	cfg.reconnect_max_delay = Duration::from_millis(400);
	let (connector, mut events, task) = HubConnector::<ChatInbound>::spawn::<serde_json::Value>(cfg);

	let drain = tokio::spawn(async move { while events.recv().await.is_some() {} });
	tokio::time::sleep(Duration::from_secs(1)).await;

	// 50 + 100 + 200 + 400 + 400 ms: at most a handful of handshakes per second.
	let n = handshakes.load(Ordering::SeqCst);
	assert!(n >= 2, "expected the connector to keep retrying, got {n} handshakes");
	assert!(n <= 8, "reconnected without backing off: {n} handshakes in 1s");

	connector.close();
	timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
	drain.await.unwrap();
}

#[tokio::test]
async fn events_queued_while_disconnected_are_sent_in_order() {
	// Reserve a port, then start listening only after events are queued.
	let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = probe.local_addr().unwrap();
	drop(probe);

	let (connector, mut events, _task) = HubConnector::<ChatInbound>::spawn::<serde_json::Value>(test_config(addr.port()));
	connector.send(ChatInbound::HighlightMessage("m-1".to_string())).unwrap();
	connector.send(ChatInbound::ClearHighlight).unwrap();

	tokio::time::sleep(Duration::from_millis(50)).await;
	let listener = TcpListener::bind(addr).await.unwrap();
	let (stream, _) = listener.accept().await.unwrap();
	let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

	assert_eq!(next_event(&mut events).await, ConnectorEvent::Connected);

	let mut received = Vec::new();
	while received.len() < 2 {
		match timeout(Duration::from_secs(5), ws.next()).await.unwrap() {
			Some(Ok(Message::Text(t))) => received.push(serde_json::from_str::<serde_json::Value>(t.as_str()).unwrap()),
			Some(Ok(_)) => {}
			other => panic!("unexpected server read: {other:?}"),
		}
	}

	assert_eq!(received[0]["event"], "highlight-message");
	assert_eq!(received[0]["data"], "m-1");
	assert_eq!(received[1]["event"], "clear-highlight");
}

#[test]
fn rejects_invalid_endpoint() {
	assert!(ConnectorConfig::from_ws_endpoint("quic://127.0.0.1:1", Namespace::Chat).is_err());
	let cfg = ConnectorConfig::from_ws_endpoint("ws://127.0.0.1:18210", Namespace::Highlight).unwrap();
	assert_eq!(cfg.url(), "ws://127.0.0.1:18210/highlight");
}
