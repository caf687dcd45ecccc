#![forbid(unsafe_code)]

//! Chat sources: producers that feed the chat hub from outside the relay.

pub mod demo;
pub mod extension;

use core::fmt;

use async_trait::async_trait;
use chatrelay_domain::{IncomingChatEvent, Platform, SourceConfig};
use tokio::sync::mpsc;

/// Control messages sent to a running source.
#[derive(Debug, Clone)]
pub enum SourceControl {
	/// Replace the source's configuration (enable, disable, change channel).
	Configure(SourceConfig),
	Shutdown,
}

/// Events produced by a running source.
#[derive(Debug, Clone)]
pub enum SourceEvent {
	Message(Box<IncomingChatEvent>),
	Status(SourceReport),
}

/// Connection state reported by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
	pub platform: Platform,
	pub connected: bool,
	pub detail: String,
	pub last_error: Option<String>,
}

pub type SourceControlRx = mpsc::Receiver<SourceControl>;
pub type SourceEventTx = mpsc::Sender<SourceEvent>;
pub type SourceEventRx = mpsc::Receiver<SourceEvent>;

/// A runnable chat source.
#[async_trait]
pub trait ChatSource: Send + Sync + 'static {
	/// Platform this source produces messages for.
	fn platform(&self) -> Platform;

	/// Connection-method tag shown in the dashboard status.
	fn method(&self) -> &'static str;

	/// Run until shutdown or fatal error.
	async fn run(self: Box<Self>, control_rx: SourceControlRx, events_tx: SourceEventTx) -> anyhow::Result<()>;
}

/// Build a status event.
pub fn status(platform: Platform, connected: bool, detail: impl Into<String>) -> SourceEvent {
	SourceEvent::Status(SourceReport {
		platform,
		connected,
		detail: detail.into(),
		last_error: None,
	})
}

/// Build an error status event.
pub fn status_error(platform: Platform, detail: impl Into<String>, err: impl fmt::Display) -> SourceEvent {
	SourceEvent::Status(SourceReport {
		platform,
		connected: false,
		detail: detail.into(),
		last_error: Some(err.to_string()),
	})
}

/// Opaque id for one source run, used in logs.
pub fn new_session_id() -> String {
	uuid::Uuid::new_v4().to_string()
}
