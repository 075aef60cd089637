//! Crash-safe incremental append to a file holding a single JSON array.
//!
//! Live chat capture can run for many hours, so records are appended as they
//! arrive instead of being buffered. Each append only touches the tail of the
//! file: the closing `]` is located in the last [`TAIL_WINDOW`] bytes, the
//! file is truncated there and `,<record>\n]` is written back. After every
//! completed append the file parses as a JSON array.
//!
//! Appends hold an exclusive advisory lock (`flock`) for the whole critical
//! section, so concurrent appenders are serialized. Only pure appends are
//! supported; earlier records are never rewritten.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;

use crate::utils::fs::io_error;
use crate::{Error, Result};

/// Bytes read from the end of the file when looking for the closing bracket.
const TAIL_WINDOW: u64 = 1024;

/// Append one JSON record to the array stored at `path`.
///
/// Blocking; use [`append_json_record`] from async code.
pub fn append_json_record_sync<T: Serialize + ?Sized>(path: &Path, record: &T) -> Result<()> {
    let encoded = serde_json::to_vec(record)?;
    append_encoded(path, &encoded)
}

fn append_encoded(path: &Path, encoded: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| io_error("opening", path, e))?;

    file.lock_exclusive()
        .map_err(|e| io_error("locking", path, e))?;
    let result = append_locked(&mut file, encoded);
    let unlocked = FileExt::unlock(&file);

    result.map_err(|e| io_error("appending to", path, e))?;
    unlocked.map_err(|e| io_error("unlocking", path, e))
}

fn append_locked(file: &mut File, encoded: &[u8]) -> io::Result<()> {
    let len = file.metadata()?.len();

    if len == 0 {
        let mut buf = Vec::with_capacity(encoded.len() + 3);
        buf.push(b'[');
        buf.extend_from_slice(encoded);
        buf.extend_from_slice(b"\n]");
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&buf)?;
        return file.sync_all();
    }

    let window = len.min(TAIL_WINDOW);
    let window_start = len - window;
    let mut tail = vec![0u8; window as usize];
    file.seek(SeekFrom::Start(window_start))?;
    file.read_exact(&mut tail)?;

    let close_idx = tail.iter().rposition(|b| *b == b']').ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "closing ']' not found in file tail")
    })?;

    let has_elements = match tail[..close_idx]
        .iter()
        .rev()
        .find(|b| !b.is_ascii_whitespace())
    {
        Some(b'[') => false,
        Some(_) => true,
        None if window_start == 0 => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "file does not start with '['",
            ));
        }
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "only whitespace before closing ']' in file tail",
            ));
        }
    };

    file.set_len(window_start + close_idx as u64)?;
    file.seek(SeekFrom::End(0))?;

    let mut buf = Vec::with_capacity(encoded.len() + 3);
    if has_elements {
        buf.push(b',');
    }
    buf.extend_from_slice(encoded);
    buf.extend_from_slice(b"\n]");
    file.write_all(&buf)?;
    file.sync_all()
}

/// Read every record back. A missing or empty file is an empty array.
pub async fn read_json_array(path: &Path) -> Result<Vec<serde_json::Value>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error("reading", path, e)),
    };
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_slice(&bytes)?)
}

/// Append one record from async code. Serialization happens on the
/// caller's task; the locked file work runs on the blocking pool.
pub async fn append_json_record<T: Serialize + ?Sized>(path: &Path, record: &T) -> Result<()> {
    let encoded = serde_json::to_vec(record)?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || append_encoded(&path, &encoded))
        .await
        .map_err(|e| Error::Other(format!("append task failed: {e}")))?
}

/// Async handle for appending records to one capture file.
#[derive(Debug, Clone)]
pub struct JsonArrayAppender {
    path: PathBuf,
}

impl JsonArrayAppender {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append<T: Serialize + ?Sized>(&self, record: &T) -> Result<()> {
        append_json_record(&self.path, record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_untouched_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.json");
        assert!(read_json_array(&path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_record_has_no_separator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.json");
        let appender = JsonArrayAppender::new(&path);

        appender.append(&json!({"id": 1})).await.unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!raw.contains(','));
        assert_eq!(read_json_array(&path).await.unwrap(), vec![json!({"id": 1})]);
    }

    #[tokio::test]
    async fn test_sequential_appends_preserve_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.json");
        let appender = JsonArrayAppender::new(&path);

        let records: Vec<_> = (0..50)
            .map(|i| json!({"id": i, "body": format!("message {i}"), "nested": [i, [i]]}))
            .collect();
        for r in &records {
            appender.append(r).await.unwrap();
        }

        assert_eq!(read_json_array(&path).await.unwrap(), records);
    }

    #[tokio::test]
    async fn test_append_to_existing_empty_array_with_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.json");
        tokio::fs::write(&path, b"[ \n ]\n").await.unwrap();

        JsonArrayAppender::new(&path).append(&json!("a")).await.unwrap();
        JsonArrayAppender::new(&path).append(&json!("b")).await.unwrap();

        assert_eq!(
            read_json_array(&path).await.unwrap(),
            vec![json!("a"), json!("b")]
        );
    }

    #[tokio::test]
    async fn test_records_larger_than_tail_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.json");
        let appender = JsonArrayAppender::new(&path);
        let big = "x".repeat(4096);

        appender.append(&json!({"body": big})).await.unwrap();
        appender.append(&json!({"body": big})).await.unwrap();
        appender.append(&json!({"body": "small"})).await.unwrap();

        let parsed = read_json_array(&path).await.unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[2]["body"], "small");
    }

    #[tokio::test]
    async fn test_corrupt_tail_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.json");
        tokio::fs::write(&path, b"{\"not\": \"an array\"}").await.unwrap();

        let err = JsonArrayAppender::new(&path)
            .append(&json!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IoPath { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appenders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.json");

        let mut handles = Vec::new();
        for i in 0..32 {
            let appender = JsonArrayAppender::new(&path);
            handles.push(tokio::spawn(async move {
                appender.append(&json!({"writer": i})).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let parsed = read_json_array(&path).await.unwrap();
        assert_eq!(parsed.len(), 32);
        let mut writers: Vec<i64> = parsed
            .iter()
            .map(|v| v["writer"].as_i64().unwrap())
            .collect();
        writers.sort_unstable();
        assert_eq!(writers, (0..32).collect::<Vec<_>>());
    }
}
