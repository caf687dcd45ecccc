#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::Context as _;
use chatrelay_client_core::{ConnectorConfig, ConnectorEvent, DEFAULT_SERVER_ENDPOINT_WS, HubConnector};
use chatrelay_domain::IncomingChatEvent;
use chatrelay_protocol::{ChatInbound, Namespace};
use tracing::{info, warn};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: chatrelay_client [--connect ws://host:port] <command>\n\
\n\
Commands:\n\
	send --platform p --user name --text msg [--color #hex] [--badge b]...\n\
	            Publish a chat message on the chat namespace\n\
	highlight <message-id>\n\
	            Ask the chat hub to highlight a message from its history\n\
	clear       Clear the current highlight\n\
	tail <chat|highlight|dashboard>\n\
	            Print every event pushed on a namespace (reconnects on loss)\n\
\n\
Options:\n\
	--connect   Relay endpoint (alias: --endpoint) (default: ws://127.0.0.1:18210)\n\
	--help      Show this help\n\
\n\
Examples:\n\
	chatrelay_client send --platform twitch --user alice --text hello\n\
	chatrelay_client --connect ws://127.0.0.1:18210 tail highlight\n"
	);
	std::process::exit(2)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,chatrelay_client_core=debug".to_string());
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_writer(std::io::stderr)
		.init();
}

enum Command {
	Send(IncomingChatEvent),
	Highlight(String),
	Clear,
	Tail(Namespace),
}

fn next_value(it: &mut impl Iterator<Item = String>, flag: &str) -> String {
	let v = it.next().unwrap_or_else(|| usage_and_exit());
	if v.trim().is_empty() {
		eprintln!("{flag} must be non-empty");
		usage_and_exit();
	}
	v
}

fn parse_send(it: &mut impl Iterator<Item = String>) -> IncomingChatEvent {
	let mut ev = IncomingChatEvent::default();
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--platform" => ev.platform = Some(next_value(it, "--platform")),
			"--user" => ev.username = Some(next_value(it, "--user")),
			"--text" => ev.content = Some(next_value(it, "--text")),
			"--color" => ev.color = Some(next_value(it, "--color")),
			"--badge" => ev.badges.push(next_value(it, "--badge")),
			other => {
				eprintln!("Unknown send argument: {other}");
				usage_and_exit();
			}
		}
	}

	if ev.platform.is_none() || ev.username.is_none() || ev.content.is_none() {
		eprintln!("send requires --platform, --user and --text");
		usage_and_exit();
	}
	ev
}

fn parse_args() -> (String, Command) {
	let mut endpoint = DEFAULT_SERVER_ENDPOINT_WS.to_string();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--connect" | "--endpoint" => endpoint = next_value(&mut it, "--connect"),
			"send" => return (endpoint, Command::Send(parse_send(&mut it))),
			"highlight" => return (endpoint, Command::Highlight(next_value(&mut it, "highlight"))),
			"clear" => return (endpoint, Command::Clear),
			"tail" => {
				let ns = next_value(&mut it, "tail").parse::<Namespace>().unwrap_or_else(|e| {
					eprintln!("{e}");
					usage_and_exit();
				});
				return (endpoint, Command::Tail(ns));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	usage_and_exit()
}

/// Connect to the chat namespace, send one event, then close.
async fn send_one(endpoint: &str, ev: ChatInbound) -> anyhow::Result<()> {
	let cfg = ConnectorConfig::from_ws_endpoint(endpoint, Namespace::Chat)?;
	let url = cfg.url();
	let (connector, mut events, task) = HubConnector::<ChatInbound>::spawn::<serde_json::Value>(cfg);

	let connected = tokio::time::timeout(Duration::from_secs(10), async {
		while let Some(ev) = events.recv().await {
			match ev {
				ConnectorEvent::Connected => return true,
				ConnectorEvent::Disconnected { reason } => warn!(%reason, "disconnected before send"),
				ConnectorEvent::Message(_) => {}
			}
		}
		false
	})
	.await
	.unwrap_or(false);

	if !connected {
		connector.close();
		anyhow::bail!("could not connect to {url}");
	}

	connector.send(ev)?;
	connector.close();
	task.await.context("connector task")?;
	info!(%url, "sent");
	Ok(())
}

async fn tail(endpoint: &str, ns: Namespace) -> anyhow::Result<()> {
	let cfg = ConnectorConfig::from_ws_endpoint(endpoint, ns)?;
	info!(url = %cfg.url(), "tailing");
	let (_connector, mut events, _task) = HubConnector::<serde_json::Value>::spawn::<serde_json::Value>(cfg);

	while let Some(ev) = events.recv().await {
		match ev {
			ConnectorEvent::Connected => info!(namespace = %ns, "connected"),
			ConnectorEvent::Disconnected { reason } => warn!(namespace = %ns, %reason, "disconnected; retrying"),
			ConnectorEvent::Message(v) => println!("{v}"),
		}
	}

	Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();
	let (endpoint, command) = parse_args();

	match command {
		Command::Send(ev) => send_one(&endpoint, ChatInbound::ChatMessage(ev)).await,
		Command::Highlight(id) => send_one(&endpoint, ChatInbound::HighlightMessage(id)).await,
		Command::Clear => send_one(&endpoint, ChatInbound::ClearHighlight).await,
		Command::Tail(ns) => tail(&endpoint, ns).await,
	}
}
