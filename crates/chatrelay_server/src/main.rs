#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context as _;
use chatrelay_server::config::{ServerConfig, default_config_path, load_server_config_from_path};
use chatrelay_server::server::relay::start_relay;
use chatrelay_util::endpoint::WsEndpoint;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: chatrelay_server [--ws-bind ws://host:port] [--http-bind host:port] [--config path]\n\
\n\
Options:\n\
\t--ws-bind    WebSocket endpoint (default: ws://127.0.0.1:18210)\n\
\t             Clients connect to /chat, /highlight or /dashboard\n\
\t--http-bind  Settings API and health probes (default: 127.0.0.1:18211)\n\
\t--config     Config file (default: ~/.chatrelay/config.toml)\n\
\t--help       Show this help\n\
"
	);
	std::process::exit(2)
}

#[derive(Debug, Default)]
struct Args {
	ws_bind: Option<SocketAddr>,
	http_bind: Option<SocketAddr>,
	config: Option<PathBuf>,
}

fn parse_args() -> Args {
	let mut args = Args::default();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--ws-bind" | "--bind" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				let endpoint = WsEndpoint::parse(&v).unwrap_or_else(|e| {
					eprintln!("{e}");
					usage_and_exit();
				});
				if endpoint.secure {
					eprintln!("--ws-bind serves plain ws:// only; terminate TLS in front of the relay");
					usage_and_exit();
				}
				let addr = endpoint.to_socket_addr_if_ip_literal().unwrap_or_else(|e| {
					eprintln!("{e}");
					usage_and_exit();
				});
				args.ws_bind = Some(addr);
			}
			"--http-bind" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				let addr = v.trim().parse::<SocketAddr>().unwrap_or_else(|e| {
					eprintln!("--http-bind expects host:port with an IP literal host: {e}");
					usage_and_exit();
				});
				args.http_bind = Some(addr);
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				args.config = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	args
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,chatrelay_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("chatrelay_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

fn resolve_bind(cli: Option<SocketAddr>, configured: &str, what: &str) -> anyhow::Result<SocketAddr> {
	match cli {
		Some(addr) => Ok(addr),
		None => configured
			.parse::<SocketAddr>()
			.with_context(|| format!("invalid {what} in config (expected host:port): {configured}")),
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let config_path = match args.config.clone() {
		Some(p) => p,
		None => default_config_path()?,
	};
	let server_cfg: ServerConfig = load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let ws_bind = resolve_bind(args.ws_bind, &server_cfg.server.ws_bind, "server.ws_bind")?;
	let http_bind = resolve_bind(args.http_bind, &server_cfg.server.http_bind, "server.http_bind")?;

	let ws_listener = TcpListener::bind(ws_bind)
		.await
		.with_context(|| format!("bind websocket listener on {ws_bind}"))?;
	let http_listener = TcpListener::bind(http_bind)
		.await
		.with_context(|| format!("bind http listener on {http_bind}"))?;

	let relay = start_relay(&server_cfg, ws_listener, http_listener).await?;
	info!(
		ws = %relay.ws_addr,
		http = %relay.http_addr,
		"chatrelay_server: listening (ws namespaces /chat /highlight /dashboard)"
	);

	tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
	info!("shutdown requested");
	relay.shutdown().await;

	Ok(())
}
