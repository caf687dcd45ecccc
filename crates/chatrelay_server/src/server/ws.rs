#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use chatrelay_protocol::{
	ChatInbound, ChatOutbound, DashboardInbound, DashboardOutbound, HighlightInbound, HighlightOutbound,
	MAX_SERVER_FRAME_SIZE, Namespace, decode_frame, encode_frame,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, info, warn};

use crate::server::chat_hub::ChatHubHandle;
use crate::server::dashboard::DashboardHandle;
use crate::server::highlight_hub::HighlightHubHandle;
use crate::server::settings_store::SettingsSync;
use crate::server::source_manager::SourceManager;
use crate::util::net::accept_next;

/// Everything a WebSocket connection may talk to.
#[derive(Debug, Clone)]
pub struct WsContext {
	pub chat: ChatHubHandle,
	pub highlight: HighlightHubHandle,
	pub dashboard: DashboardHandle,
	pub settings: SettingsSync,
	pub sources: Arc<SourceManager>,
	/// Inbound frame limit. Outbound frames use `MAX_SERVER_FRAME_SIZE`.
	pub max_frame_bytes: usize,
}

/// Accept loop. Each connection is routed to a namespace by request path.
pub async fn serve_ws(listener: TcpListener, ctx: WsContext) -> anyhow::Result<()> {
	let local = listener.local_addr().context("ws listener local_addr")?;
	info!(%local, "websocket listener ready");

	loop {
		let (stream, peer) = accept_next("ws", || listener.accept()).await;
		let ctx = ctx.clone();
		tokio::spawn(async move {
			if let Err(e) = handle_connection(stream, peer, ctx).await {
				debug!(%peer, error = %e, "websocket connection ended with error");
			}
		});
	}
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: WsContext) -> anyhow::Result<()> {
	let mut namespace: Option<Namespace> = None;
	let route = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
		match Namespace::from_path(req.uri().path()) {
			Some(ns) => {
				namespace = Some(ns);
				Ok(resp)
			}
			None => {
				let mut err = ErrorResponse::new(Some(format!("unknown namespace: {}", req.uri().path())));
				*err.status_mut() = StatusCode::NOT_FOUND;
				Err(err)
			}
		}
	};

	let ws = tokio_tungstenite::accept_hdr_async(stream, route)
		.await
		.context("websocket handshake")?;
	let ns = namespace.ok_or_else(|| anyhow!("handshake completed without a namespace"))?;

	info!(%peer, namespace = %ns, "client connected");
	metrics::counter!("chatrelay_ws_connections_total", "namespace" => ns.as_str()).increment(1);
	metrics::gauge!("chatrelay_ws_connections_active", "namespace" => ns.as_str()).increment(1.0);

	let result = serve_namespace(ns, ws, ctx).await;

	metrics::gauge!("chatrelay_ws_connections_active", "namespace" => ns.as_str()).decrement(1.0);
	info!(%peer, namespace = %ns, "client disconnected");
	result
}

async fn serve_namespace(ns: Namespace, ws: WebSocketStream<TcpStream>, ctx: WsContext) -> anyhow::Result<()> {
	let max = ctx.max_frame_bytes;
	match ns {
		Namespace::Chat => {
			let outbound = ctx.chat.subscribe().await?;
			let session = ChatSession {
				chat: ctx.chat,
				settings: ctx.settings,
				sources: ctx.sources,
			};
			pump(ws, session, outbound, max, ns).await
		}
		Namespace::Highlight => {
			let outbound = ctx.highlight.subscribe().await?;
			let session = HighlightSession {
				highlight: ctx.highlight,
				settings: ctx.settings,
			};
			pump(ws, session, outbound, max, ns).await
		}
		Namespace::Dashboard => {
			let outbound = ctx.dashboard.subscribe().await?;
			let session = DashboardSession {
				dashboard: ctx.dashboard,
			};
			pump(ws, session, outbound, max, ns).await
		}
	}
}

/// Per-namespace handling of inbound events.
#[async_trait]
trait Session: Send {
	type In: DeserializeOwned + Send;
	type Out: Serialize + Send + Sync + 'static;

	/// Handle one inbound event; the returned events go to this client only.
	async fn on_event(&mut self, ev: Self::In) -> Vec<Self::Out>;
}

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

async fn pump<S: Session>(
	ws: WebSocketStream<TcpStream>,
	mut session: S,
	mut outbound: mpsc::Receiver<S::Out>,
	max_frame_bytes: usize,
	ns: Namespace,
) -> anyhow::Result<()> {
	let (mut sink, mut stream) = ws.split();

	loop {
		tokio::select! {
			item = outbound.recv() => {
				let Some(item) = item else {
					debug!(namespace = %ns, "hub closed subscription");
					break;
				};
				send_event(&mut sink, &item, ns).await?;
			}

			msg = stream.next() => {
				let Some(msg) = msg else {
					break;
				};

				match msg.context("websocket read")? {
					Message::Text(text) => {
						let ev = match decode_frame::<S::In>(text.as_str(), max_frame_bytes) {
							Ok(ev) => ev,
							Err(e) => {
								metrics::counter!("chatrelay_ws_decode_errors_total", "namespace" => ns.as_str()).increment(1);
								warn!(namespace = %ns, error = %e, "dropping undecodable frame");
								continue;
							}
						};
						for reply in session.on_event(ev).await {
							send_event(&mut sink, &reply, ns).await?;
						}
					}
					Message::Ping(p) => {
						sink.send(Message::Pong(p)).await.context("websocket pong")?;
					}
					Message::Close(frame) => {
						debug!(namespace = %ns, ?frame, "client sent close");
						break;
					}
					Message::Binary(_) => {
						debug!(namespace = %ns, "ignoring binary frame");
					}
					_ => {}
				}
			}
		}
	}

	let _ = sink.close().await;
	Ok(())
}

async fn send_event<T: Serialize>(sink: &mut WsSink, ev: &T, ns: Namespace) -> anyhow::Result<()> {
	let text = match encode_frame(ev, MAX_SERVER_FRAME_SIZE) {
		Ok(t) => t,
		Err(e) => {
			metrics::counter!("chatrelay_ws_encode_errors_total", "namespace" => ns.as_str()).increment(1);
			warn!(namespace = %ns, error = %e, "dropping unencodable outbound event");
			return Ok(());
		}
	};
	sink.send(Message::Text(text.into())).await.context("websocket send")
}

struct ChatSession {
	chat: ChatHubHandle,
	settings: SettingsSync,
	sources: Arc<SourceManager>,
}

#[async_trait]
impl Session for ChatSession {
	type In = ChatInbound;
	type Out = ChatOutbound;

	async fn on_event(&mut self, ev: ChatInbound) -> Vec<ChatOutbound> {
		match ev {
			ChatInbound::ChatMessage(incoming) => match self.chat.ingest(incoming).await {
				Ok(accepted) => self.sources.note_activity(accepted.platform).await,
				Err(e) => debug!(error = %e, "chat-message not accepted"),
			},
			ChatInbound::HighlightMessage(id) => {
				if let Err(e) = self.chat.request_highlight(id).await {
					debug!(error = %e, "highlight-message not forwarded");
				}
			}
			ChatInbound::ClearHighlight => {
				if let Err(e) = self.chat.request_clear_highlight().await {
					warn!(error = %e, "clear-highlight not forwarded");
				}
			}
			ChatInbound::GetSettings => match self.chat.settings().await {
				Ok(s) => return vec![ChatOutbound::Settings(s)],
				Err(e) => warn!(error = %e, "get-settings failed"),
			},
			ChatInbound::SettingsUpdated(value) => {
				if let Err(e) = self.settings.update_json(value).await {
					warn!(error = %e, "settings-updated from chat client not applied");
				}
			}
		}
		Vec::new()
	}
}

struct HighlightSession {
	highlight: HighlightHubHandle,
	settings: SettingsSync,
}

#[async_trait]
impl Session for HighlightSession {
	type In = HighlightInbound;
	type Out = HighlightOutbound;

	async fn on_event(&mut self, ev: HighlightInbound) -> Vec<HighlightOutbound> {
		match ev {
			HighlightInbound::HighlightMessage(incoming) => {
				if let Err(e) = self.highlight.highlight(incoming) {
					warn!(error = %e, "highlight-message not delivered");
				}
			}
			HighlightInbound::ClearHighlight => {
				if let Err(e) = self.highlight.clear() {
					warn!(error = %e, "clear-highlight not delivered");
				}
			}
			HighlightInbound::GetSettings => match self.highlight.settings().await {
				Ok(s) => return vec![HighlightOutbound::Settings(s)],
				Err(e) => warn!(error = %e, "get-settings failed"),
			},
			HighlightInbound::SettingsUpdated(value) => {
				if let Err(e) = self.settings.update_json(value).await {
					warn!(error = %e, "settings-updated from popout not applied");
				}
			}
		}
		Vec::new()
	}
}

struct DashboardSession {
	dashboard: DashboardHandle,
}

#[async_trait]
impl Session for DashboardSession {
	type In = DashboardInbound;
	type Out = DashboardOutbound;

	async fn on_event(&mut self, ev: DashboardInbound) -> Vec<DashboardOutbound> {
		let reply = match ev {
			DashboardInbound::GetSettings => DashboardOutbound::Settings(self.dashboard.get_settings().await),
			DashboardInbound::UpdateSettings(value) => {
				DashboardOutbound::OperationResult(self.dashboard.update_settings(value).await.body)
			}
			DashboardInbound::GetChatSources => {
				DashboardOutbound::ChatSourceStatus(self.dashboard.chat_source_status().await)
			}
			DashboardInbound::UpdateChatSources(value) => {
				DashboardOutbound::OperationResult(self.dashboard.update_chat_sources(value).await.body)
			}
		};
		vec![reply]
	}
}
