#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::server::dashboard::{DashboardHandle, Outcome, OutcomeKind};
use crate::util::net::accept_next;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Default)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
}

impl HealthState {
	pub fn new() -> Self {
		Self {
			ready: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Relaxed)
	}
}

#[derive(Clone)]
pub struct HttpApiState {
	pub dashboard: DashboardHandle,
	pub health: HealthState,
}

/// Serve the settings and chat-source API plus health probes.
pub async fn serve_http(listener: TcpListener, state: HttpApiState) -> anyhow::Result<()> {
	if let Ok(local) = listener.local_addr() {
		info!(%local, "http api listening");
	}

	loop {
		let (stream, _addr) = accept_next("http", || listener.accept()).await;
		let io = TokioIo::new(stream);
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_request(req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "http connection error");
			}
		});
	}
}

async fn handle_request(req: Request<Incoming>, state: HttpApiState) -> Result<Response<Full<Bytes>>, hyper::Error> {
	let method = req.method().clone();
	let path = req.uri().path().to_string();
	debug!(%method, %path, "http request");
	metrics::counter!("chatrelay_http_requests_total").increment(1);

	let resp = match (&method, path.as_str()) {
		(&Method::OPTIONS, _) => empty(StatusCode::NO_CONTENT),

		(&Method::GET, "/healthz") => text(StatusCode::OK, "ok"),
		(&Method::GET, "/readyz") => {
			if state.health.is_ready() {
				text(StatusCode::OK, "ready")
			} else {
				text(StatusCode::SERVICE_UNAVAILABLE, "not-ready")
			}
		}

		(&Method::GET, "/settings") => json(StatusCode::OK, &state.dashboard.get_settings().await),
		(&Method::POST, "/settings") => match read_json_body(req).await {
			Ok(value) => outcome(state.dashboard.update_settings(value).await),
			Err(resp) => resp,
		},

		(&Method::GET, "/chat-sources") => json(StatusCode::OK, &state.dashboard.chat_source_status().await),
		(&Method::POST, "/chat-sources") => match read_json_body(req).await {
			Ok(value) => outcome(state.dashboard.update_chat_sources(value).await),
			Err(resp) => resp,
		},

		(_, "/healthz" | "/readyz" | "/settings" | "/chat-sources") => empty(StatusCode::METHOD_NOT_ALLOWED),
		_ => empty(StatusCode::NOT_FOUND),
	};

	Ok(with_cors(resp))
}

/// Collect and parse a JSON body, or produce the error response.
async fn read_json_body(req: Request<Incoming>) -> Result<serde_json::Value, Response<Full<Bytes>>> {
	let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
		Ok(collected) => collected.to_bytes(),
		Err(e) => {
			debug!(error = %e, "request body rejected");
			return Err(json(
				StatusCode::PAYLOAD_TOO_LARGE,
				&chatrelay_protocol::ApiResponse::error("request body too large or unreadable"),
			));
		}
	};

	serde_json::from_slice(&body).map_err(|e| {
		json(
			StatusCode::BAD_REQUEST,
			&chatrelay_protocol::ApiResponse::error(format!("invalid JSON body: {e}")),
		)
	})
}

fn outcome(o: Outcome) -> Response<Full<Bytes>> {
	let status = match o.kind {
		OutcomeKind::Ok => StatusCode::OK,
		OutcomeKind::Rejected => StatusCode::BAD_REQUEST,
		OutcomeKind::Failed => StatusCode::INTERNAL_SERVER_ERROR,
	};
	json(status, &o.body)
}

fn json<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
	match serde_json::to_vec(body) {
		Ok(bytes) => {
			let mut resp = Response::new(Full::new(Bytes::from(bytes)));
			*resp.status_mut() = status;
			resp.headers_mut()
				.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
			resp
		}
		Err(e) => {
			warn!(error = %e, "failed to encode response body");
			empty(StatusCode::INTERNAL_SERVER_ERROR)
		}
	}
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
	let mut resp = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
	*resp.status_mut() = status;
	resp
}

fn empty(status: StatusCode) -> Response<Full<Bytes>> {
	let mut resp = Response::new(Full::new(Bytes::new()));
	*resp.status_mut() = status;
	resp
}

/// The dashboard page is served from another origin.
fn with_cors(mut resp: Response<Full<Bytes>>) -> Response<Full<Bytes>> {
	let headers = resp.headers_mut();
	headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
	headers.insert(
		header::ACCESS_CONTROL_ALLOW_METHODS,
		HeaderValue::from_static("GET, POST, OPTIONS"),
	);
	headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("content-type"));
	resp
}
