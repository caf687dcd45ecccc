#![forbid(unsafe_code)]

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Write `value` as pretty JSON by writing a sibling temp file and renaming it
/// over `path`, so readers never observe a partial document.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
	let json = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;

	if let Some(parent) = path.parent()
		&& !parent.as_os_str().is_empty()
	{
		tokio::fs::create_dir_all(parent).await?;
	}

	let tmp = tmp_path(path);
	tokio::fs::write(&tmp, &json).await?;
	if let Err(e) = tokio::fs::rename(&tmp, path).await {
		let _ = tokio::fs::remove_file(&tmp).await;
		return Err(e);
	}
	Ok(())
}

/// Read a JSON document; `Ok(None)` when the file does not exist.
pub fn read_json_if_exists(path: &Path) -> io::Result<Option<serde_json::Value>> {
	let data = match std::fs::read_to_string(path) {
		Ok(d) => d,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
		Err(e) => return Err(e),
	};
	serde_json::from_str(&data)
		.map(Some)
		.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn tmp_path(path: &Path) -> PathBuf {
	let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
	name.push(".tmp");
	path.with_file_name(name)
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[tokio::test]
	async fn write_then_read_back() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested").join("doc.json");

		write_json_atomic(&path, &json!({ "a": 1 })).await.unwrap();
		let v = read_json_if_exists(&path).unwrap().unwrap();
		assert_eq!(v["a"], 1);
		assert!(!tmp_path(&path).exists());
	}

	#[test]
	fn missing_file_is_none_and_garbage_is_invalid_data() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("doc.json");
		assert!(read_json_if_exists(&path).unwrap().is_none());

		std::fs::write(&path, "{not json").unwrap();
		let err = read_json_if_exists(&path).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::InvalidData);
	}
}
