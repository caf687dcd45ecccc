#![forbid(unsafe_code)]

use std::future::Future;
use std::io;
use std::time::Duration;

use tracing::warn;

/// Pause after a failed `accept` (EMFILE, ECONNABORTED, ...).
pub const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// Run `accept` until it yields a connection. Errors are logged, counted
/// and retried after `ACCEPT_ERROR_DELAY`; the listener never stops.
pub async fn accept_next<A, Fut, S>(listener: &'static str, mut accept: A) -> S
where
	A: FnMut() -> Fut,
	Fut: Future<Output = io::Result<S>>,
{
	loop {
		match accept().await {
			Ok(conn) => return conn,
			Err(e) => {
				metrics::counter!("chatrelay_accept_errors_total", "listener" => listener).increment(1);
				warn!(listener, error = %e, "accept failed; retrying");
				tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::cell::Cell;

	use super::*;

	#[tokio::test(start_paused = true)]
	async fn accept_errors_do_not_end_the_loop() {
		let calls = Cell::new(0u32);
		let started = tokio::time::Instant::now();

		let conn = accept_next("test", || {
			calls.set(calls.get() + 1);
			let n = calls.get();
			async move {
				match n {
					1 => Err(io::Error::other("too many open files")),
					2 => Err(io::Error::from(io::ErrorKind::ConnectionAborted)),
					_ => Ok(n),
				}
			}
		})
		.await;

		assert_eq!(conn, 3);
		assert_eq!(calls.get(), 3);
		assert!(started.elapsed() >= ACCEPT_ERROR_DELAY * 2);
	}
}
