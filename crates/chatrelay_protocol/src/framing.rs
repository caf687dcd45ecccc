#![forbid(unsafe_code)]

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Default maximum size of a single producer or control frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 256 * 1024; // 256 KiB

/// Maximum size of a relay-originated frame.
///
/// `chat-history` bundles up to `messageLimit` events of up to
/// `DEFAULT_MAX_FRAME_SIZE` each, so server frames are only bounded by the
/// WebSocket message cap.
pub const MAX_SERVER_FRAME_SIZE: usize = 64 << 20; // 64 MiB

#[derive(Debug, Error)]
pub enum FramingError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("json decode error: {0}")]
	Decode(#[source] serde_json::Error),

	#[error("json encode error: {0}")]
	Encode(#[source] serde_json::Error),
}

/// Encode an event into a JSON text frame.
pub fn encode_frame<M: Serialize>(msg: &M, max_frame_size: usize) -> Result<String, FramingError> {
	let out = serde_json::to_string(msg).map_err(FramingError::Encode)?;
	if out.len() > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len: out.len(),
			max: max_frame_size,
		});
	}
	Ok(out)
}

/// Encode a frame using `DEFAULT_MAX_FRAME_SIZE`.
pub fn encode_frame_default<M: Serialize>(msg: &M) -> Result<String, FramingError> {
	encode_frame(msg, DEFAULT_MAX_FRAME_SIZE)
}

/// Decode a JSON text frame. The size check runs before parsing.
pub fn decode_frame<M: DeserializeOwned>(src: &str, max_frame_size: usize) -> Result<M, FramingError> {
	if src.len() > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len: src.len(),
			max: max_frame_size,
		});
	}
	serde_json::from_str(src).map_err(FramingError::Decode)
}
