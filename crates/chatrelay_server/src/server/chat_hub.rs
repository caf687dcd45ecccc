#![forbid(unsafe_code)]

use chatrelay_domain::{ChatEvent, IncomingChatEvent, RelayError, Settings, SettingsPatch, ValidationError};
use chatrelay_protocol::ChatOutbound;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::server::fanout::{Fanout, FanoutConfig, LagMarker};
use crate::server::highlight_hub::HighlightHubHandle;
use crate::server::history::History;
use crate::server::settings_store::{SettingsSync, SettingsUpdate};

impl LagMarker for ChatOutbound {
	fn lagged(dropped: u64) -> Self {
		ChatOutbound::Lagged { dropped }
	}
}

#[derive(Debug, Clone)]
pub struct ChatHubConfig {
	pub command_channel_capacity: usize,
	pub fanout: FanoutConfig,
}

impl Default for ChatHubConfig {
	fn default() -> Self {
		Self {
			command_channel_capacity: 1024,
			fanout: FanoutConfig::default(),
		}
	}
}

type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
pub enum ChatCommand {
	Ingest {
		event: IncomingChatEvent,
		resp: Option<Reply<Result<ChatEvent, ValidationError>>>,
	},
	RequestHighlight {
		id: String,
		resp: Reply<Result<(), RelayError>>,
	},
	ClearHighlight {
		resp: Reply<Result<(), RelayError>>,
	},
	Snapshot(Reply<Vec<ChatEvent>>),
	Subscribe(Reply<mpsc::Receiver<ChatOutbound>>),
	Settings(Reply<Settings>),
}

/// Cloneable entry point to the chat hub actor.
#[derive(Debug, Clone)]
pub struct ChatHubHandle {
	tx: mpsc::Sender<ChatCommand>,
}

impl ChatHubHandle {
	/// Validate and append an event, returning the accepted form.
	pub async fn ingest(&self, event: IncomingChatEvent) -> Result<ChatEvent, RelayError> {
		let accepted = self.request(|resp| ChatCommand::Ingest { event, resp: Some(resp) }).await?;
		Ok(accepted?)
	}

	/// Queue an event without waiting; fails only when the hub is full or gone.
	pub fn try_ingest(&self, event: IncomingChatEvent) -> Result<(), RelayError> {
		self.tx
			.try_send(ChatCommand::Ingest { event, resp: None })
			.map_err(|e| RelayError::Transport(format!("chat hub: {e}")))
	}

	/// Forward the History entry `id` to the highlight hub.
	pub async fn request_highlight(&self, id: impl Into<String>) -> Result<(), RelayError> {
		let id = id.into();
		self.request(|resp| ChatCommand::RequestHighlight { id, resp }).await?
	}

	pub async fn request_clear_highlight(&self) -> Result<(), RelayError> {
		self.request(|resp| ChatCommand::ClearHighlight { resp }).await?
	}

	/// History contents, oldest first.
	pub async fn snapshot(&self) -> Result<Vec<ChatEvent>, RelayError> {
		self.request(ChatCommand::Snapshot).await
	}

	/// Register a display client. The receiver starts with the current
	/// settings followed by the history snapshot.
	pub async fn subscribe(&self) -> Result<mpsc::Receiver<ChatOutbound>, RelayError> {
		self.request(ChatCommand::Subscribe).await
	}

	pub async fn settings(&self) -> Result<Settings, RelayError> {
		self.request(ChatCommand::Settings).await
	}

	async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> ChatCommand) -> Result<T, RelayError> {
		let (tx, rx) = oneshot::channel();
		self.tx
			.send(make(tx))
			.await
			.map_err(|_| RelayError::Transport("chat hub stopped".to_string()))?;
		rx.await
			.map_err(|_| RelayError::Transport("chat hub dropped request".to_string()))
	}
}

struct ChatHub {
	history: History,
	settings: Settings,
	fanout: Fanout<ChatOutbound>,
	highlight: HighlightHubHandle,
	sync: SettingsSync,
}

/// Start the chat hub actor.
pub async fn spawn_chat_hub(
	cfg: ChatHubConfig,
	sync: SettingsSync,
	highlight: HighlightHubHandle,
) -> (ChatHubHandle, JoinHandle<()>) {
	let updates = sync.subscribe();
	let settings = sync.get().await;
	let (tx, rx) = mpsc::channel(cfg.command_channel_capacity.max(1));

	let hub = ChatHub {
		history: History::new(settings.message_limit),
		settings,
		fanout: Fanout::new("chat", cfg.fanout),
		highlight,
		sync,
	};

	let join = tokio::spawn(hub.run(rx, updates));
	(ChatHubHandle { tx }, join)
}

impl ChatHub {
	async fn run(mut self, mut rx: mpsc::Receiver<ChatCommand>, mut updates: broadcast::Receiver<SettingsUpdate>) {
		info!(limit = self.history.limit(), "chat hub started");
		let mut updates_open = true;

		loop {
			tokio::select! {
				biased;

				upd = updates.recv(), if updates_open => match upd {
					Ok(u) => self.apply_settings(&u.patch),
					Err(RecvError::Lagged(n)) => {
						warn!(skipped = n, "chat hub lagged on settings updates; resyncing");
						let full = self.sync.get().await;
						self.apply_settings(&SettingsPatch::from(&full));
					}
					Err(RecvError::Closed) => updates_open = false,
				},

				cmd = rx.recv() => match cmd {
					Some(cmd) => self.handle(cmd),
					None => break,
				},
			}
		}

		info!("chat hub stopped");
	}

	fn handle(&mut self, cmd: ChatCommand) {
		match cmd {
			ChatCommand::Ingest { event, resp } => {
				let result = self.ingest(event);
				if let Some(resp) = resp {
					let _ = resp.send(result);
				}
			}
			ChatCommand::RequestHighlight { id, resp } => {
				let _ = resp.send(self.request_highlight(&id));
			}
			ChatCommand::ClearHighlight { resp } => {
				let _ = resp.send(self.highlight.clear());
			}
			ChatCommand::Snapshot(resp) => {
				let _ = resp.send(self.history.snapshot());
			}
			ChatCommand::Subscribe(resp) => {
				let initial = vec![
					ChatOutbound::Settings(self.settings.clone()),
					ChatOutbound::ChatHistory(self.history.snapshot()),
				];
				let _ = resp.send(self.fanout.subscribe(initial));
			}
			ChatCommand::Settings(resp) => {
				let _ = resp.send(self.settings.clone());
			}
		}
	}

	fn ingest(&mut self, event: IncomingChatEvent) -> Result<ChatEvent, ValidationError> {
		let ev = match event.normalize() {
			Ok(ev) => ev,
			Err(e) => {
				debug!(error = %e, "chat event rejected");
				metrics::counter!("chatrelay_chat_rejected_total").increment(1);
				return Err(e);
			}
		};

		let evicted = self.history.push(ev.clone());
		metrics::counter!("chatrelay_chat_ingested_total", "platform" => ev.platform.as_str()).increment(1);
		let delivered = self.fanout.publish(ChatOutbound::ChatMessage(ev.clone()));
		debug!(id = %ev.id, platform = %ev.platform, evicted, delivered, "chat event accepted");

		Ok(ev)
	}

	fn request_highlight(&self, id: &str) -> Result<(), RelayError> {
		let Some(ev) = self.history.find(id) else {
			debug!(id, "highlight requested for unknown message");
			return Err(RelayError::NotFound(format!("message {id} is not in history")));
		};

		self.highlight.highlight(ev.clone()).inspect_err(|e| {
			warn!(error = %e, id, "failed to forward highlight");
		})
	}

	fn apply_settings(&mut self, patch: &SettingsPatch) {
		self.settings.apply(patch);

		if patch.message_limit.is_some() {
			let trimmed = self.history.set_limit(self.settings.message_limit);
			if trimmed > 0 {
				debug!(trimmed, limit = self.history.limit(), "history trimmed to new limit");
			}
		}

		self.fanout.publish(ChatOutbound::SettingsUpdated(self.settings.clone()));
	}
}
