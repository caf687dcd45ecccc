#![forbid(unsafe_code)]

use std::time::Duration;

use chatrelay_protocol::framing::{DEFAULT_MAX_FRAME_SIZE, FramingError, MAX_SERVER_FRAME_SIZE, decode_frame, encode_frame};
use chatrelay_protocol::Namespace;
use chatrelay_util::backoff::backoff_delay;
use chatrelay_util::endpoint::WsEndpoint;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Default relay endpoint for local development.
pub const DEFAULT_SERVER_ENDPOINT_WS: &str = "ws://127.0.0.1:18210";

/// Connector configuration for one namespace.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
	/// Relay endpoint (`ws://host:port`).
	pub endpoint: WsEndpoint,

	/// Namespace to join; selects the request path.
	pub namespace: Namespace,

	/// Timeout for TCP connect + WebSocket handshake.
	pub connect_timeout: Duration,

	/// First reconnect delay.
	pub reconnect_min_delay: Duration,

	/// Reconnect delay ceiling.
	pub reconnect_max_delay: Duration,

	/// A session that stayed up this long resets the backoff to
	/// `reconnect_min_delay`; shorter sessions keep growing it.
	pub reconnect_reset_after: Duration,

	/// Outbound events buffered while disconnected.
	pub outbound_queue_capacity: usize,

	pub inbound_queue_capacity: usize,

	/// Maximum outbound frame size.
	pub max_frame_bytes: usize,

	/// Maximum inbound frame size; relay frames such as `chat-history`
	/// aggregate many events.
	pub max_inbound_frame_bytes: usize,
}

impl ConnectorConfig {
	/// Convenience: a config from `ws://host:port` with defaults.
	pub fn from_ws_endpoint(endpoint: &str, namespace: Namespace) -> Result<Self, ClientCoreError> {
		let endpoint = WsEndpoint::parse(endpoint).map_err(ClientCoreError::Endpoint)?;
		Ok(Self {
			endpoint,
			namespace,
			connect_timeout: Duration::from_secs(10),
			reconnect_min_delay: Duration::from_millis(250),
			reconnect_max_delay: Duration::from_secs(10),
			reconnect_reset_after: Duration::from_secs(30),
			outbound_queue_capacity: 256,
			inbound_queue_capacity: 1_024,
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			max_inbound_frame_bytes: MAX_SERVER_FRAME_SIZE,
		})
	}

	/// Full URL this connector dials.
	pub fn url(&self) -> String {
		self.endpoint.url_for(self.namespace.path())
	}
}

/// Errors for client core operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientCoreError {
	/// Endpoint string could not be parsed.
	#[error("invalid endpoint: {0}")]
	Endpoint(String),

	/// Protocol framing error.
	#[error(transparent)]
	Framing(#[from] FramingError),

	/// The outbound queue is full; the event was not queued.
	#[error("outbound queue full")]
	QueueFull,

	/// The connector task has stopped.
	#[error("connector closed")]
	Closed,
}

/// What the connector reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorEvent<I> {
	Connected,
	Disconnected { reason: String },
	Message(I),
}

/// Reconnecting WebSocket client for one relay namespace.
///
/// `O` is the namespace's inbound event type (what the relay consumes); the
/// event stream yields `I`, usually the namespace's outbound type.
/// Dropping the connector stops it.
#[derive(Debug)]
pub struct HubConnector<O> {
	out_tx: mpsc::Sender<O>,
	shutdown_tx: watch::Sender<bool>,
}

impl<O> HubConnector<O>
where
	O: Serialize + Send + 'static,
{
	/// Start the connection task.
	pub fn spawn<I>(cfg: ConnectorConfig) -> (Self, mpsc::Receiver<ConnectorEvent<I>>, JoinHandle<()>)
	where
		I: DeserializeOwned + Send + 'static,
	{
		let (out_tx, out_rx) = mpsc::channel(cfg.outbound_queue_capacity.max(1));
		let (events_tx, events_rx) = mpsc::channel(cfg.inbound_queue_capacity.max(1));
		let (shutdown_tx, shutdown_rx) = watch::channel(false);

		let task = tokio::spawn(run_connector(cfg, out_rx, events_tx, shutdown_rx));

		(Self { out_tx, shutdown_tx }, events_rx, task)
	}

	/// Queue an event. Queued events are sent in order once connected.
	pub fn send(&self, ev: O) -> Result<(), ClientCoreError> {
		self.out_tx.try_send(ev).map_err(|e| match e {
			mpsc::error::TrySendError::Full(_) => ClientCoreError::QueueFull,
			mpsc::error::TrySendError::Closed(_) => ClientCoreError::Closed,
		})
	}

	/// Stop after flushing whatever is queued on the live connection.
	pub fn close(&self) {
		let _ = self.shutdown_tx.send(true);
	}
}

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum SessionEnd {
	/// Owner asked to stop, or dropped the connector or event receiver.
	Stop,
	Lost(String),
}

async fn run_connector<O, I>(
	cfg: ConnectorConfig,
	mut out_rx: mpsc::Receiver<O>,
	events_tx: mpsc::Sender<ConnectorEvent<I>>,
	mut shutdown_rx: watch::Receiver<bool>,
) where
	O: Serialize + Send + 'static,
	I: DeserializeOwned + Send + 'static,
{
	let url = cfg.url();
	let ws_config = WebSocketConfig::default()
		.max_message_size(Some(cfg.max_inbound_frame_bytes))
		.max_frame_size(Some(cfg.max_inbound_frame_bytes));
	let mut attempt: u32 = 0;

	loop {
		if *shutdown_rx.borrow() {
			break;
		}

		debug!(%url, attempt, "connecting");
		let connect = tokio_tungstenite::connect_async_with_config(url.as_str(), Some(ws_config), false);
		let failure = match tokio::time::timeout(cfg.connect_timeout, connect).await {
			Ok(Ok((ws, _resp))) => {
				info!(%url, "connected");
				let connected_at = Instant::now();
				if events_tx.send(ConnectorEvent::Connected).await.is_err() {
					break;
				}

				match run_session(ws, &cfg, &mut out_rx, &events_tx, &mut shutdown_rx).await {
					SessionEnd::Stop => break,
					SessionEnd::Lost(reason) => {
						warn!(%url, %reason, "connection lost");
						if connected_at.elapsed() >= cfg.reconnect_reset_after {
							attempt = 0;
						}
						if events_tx
							.send(ConnectorEvent::Disconnected { reason: reason.clone() })
							.await
							.is_err()
						{
							break;
						}
						reason
					}
				}
			}
			Ok(Err(e)) => format!("connect failed: {e}"),
			Err(_) => format!("connect timeout after {:?}", cfg.connect_timeout),
		};

		let delay = backoff_delay(attempt, cfg.reconnect_min_delay, cfg.reconnect_max_delay);
		attempt = attempt.saturating_add(1);
		debug!(%url, error = %failure, ?delay, "reconnecting after delay");

		tokio::select! {
			_ = tokio::time::sleep(delay) => {}
			changed = shutdown_rx.changed() => {
				if changed.is_err() || *shutdown_rx.borrow() {
					break;
				}
			}
		}
	}

	debug!(%url, "connector stopped");
}

async fn run_session<O, I>(
	ws: Ws,
	cfg: &ConnectorConfig,
	out_rx: &mut mpsc::Receiver<O>,
	events_tx: &mpsc::Sender<ConnectorEvent<I>>,
	shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd
where
	O: Serialize,
	I: DeserializeOwned,
{
	let (mut sink, mut stream) = ws.split();

	let end = loop {
		tokio::select! {
			biased;

			out = out_rx.recv() => {
				let Some(out) = out else {
					break SessionEnd::Stop;
				};
				let text = match encode_frame(&out, cfg.max_frame_bytes) {
					Ok(t) => t,
					Err(e) => {
						warn!(error = %e, "dropping unencodable outbound event");
						continue;
					}
				};
				if let Err(e) = sink.send(Message::Text(text.into())).await {
					break SessionEnd::Lost(format!("send failed: {e}"));
				}
			}

			changed = shutdown_rx.changed() => {
				if changed.is_err() || *shutdown_rx.borrow() {
					break SessionEnd::Stop;
				}
			}

			msg = stream.next() => {
				let msg = match msg {
					Some(Ok(m)) => m,
					Some(Err(e)) => break SessionEnd::Lost(format!("read failed: {e}")),
					None => break SessionEnd::Lost("stream ended".to_string()),
				};

				match msg {
					Message::Text(text) => match decode_frame::<I>(text.as_str(), cfg.max_inbound_frame_bytes) {
						Ok(ev) => {
							if events_tx.send(ConnectorEvent::Message(ev)).await.is_err() {
								break SessionEnd::Stop;
							}
						}
						Err(e) => debug!(error = %e, "ignoring undecodable frame"),
					},
					Message::Ping(p) => {
						if let Err(e) = sink.send(Message::Pong(p)).await {
							break SessionEnd::Lost(format!("pong failed: {e}"));
						}
					}
					Message::Close(frame) => {
						let reason = frame
							.map(|f| format!("closed by server: {}", f.reason.as_str()))
							.unwrap_or_else(|| "closed by server".to_string());
						break SessionEnd::Lost(reason);
					}
					_ => {}
				}
			}
		}
	};

	let _ = sink.close().await;
	end
}
