//! JSON document storage + HTTP fetch utilities for the page data backend.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "pagedata-storage";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Two-space indented JSON, the layout every fixture and the aggregate use on disk.
pub fn to_pretty_bytes(value: &Value) -> anyhow::Result<Vec<u8>> {
    serde_json::to_vec_pretty(value).context("serializing json document")
}

/// Replace `path` with `bytes` through a sibling temp file and a rename, so readers
/// never observe a half-written document.
pub async fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| format!("writing temp file {}", temp_path.display()));
    }

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

/// Pretty-print `value` to `path`, creating parent directories. Returns the bytes written.
pub async fn write_json_pretty(path: &Path, value: &Value) -> anyhow::Result<Vec<u8>> {
    let bytes = to_pretty_bytes(value)?;
    write_bytes_atomic(path, &bytes).await?;
    debug!(path = %path.display(), bytes = bytes.len(), "wrote json document");
    Ok(bytes)
}

pub async fn read_json(path: &Path) -> anyhow::Result<Value> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

/// `None` when the file does not exist; any other I/O failure is an error.
pub async fn read_optional_bytes(path: &Path) -> anyhow::Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
    }
}

/// Load a JSON object document, treating a missing file as `{}`.
pub async fn read_json_object_or_empty(path: &Path) -> anyhow::Result<Map<String, Value>> {
    let Some(bytes) = read_optional_bytes(path).await? else {
        return Ok(Map::new());
    };
    match serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!(
            "{} holds a json {} instead of an object",
            path.display(),
            json_kind(&other)
        ),
    }
}

/// Put `previous` back at `path`, or remove the file if there was nothing before.
pub async fn restore_previous(path: &Path, previous: Option<&[u8]>) -> anyhow::Result<()> {
    match previous {
        Some(bytes) => write_bytes_atomic(path, bytes).await,
        None => match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("removing {}", path.display())),
        },
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_in_flight: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: None,
            max_in_flight: 16,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid json from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Single-attempt JSON GETs with a bound on concurrent requests.
#[derive(Debug, Clone)]
pub struct JsonFetcher {
    client: reqwest::Client,
    in_flight: Arc<Semaphore>,
}

impl JsonFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
        })
    }

    pub async fn fetch_json(&self, url: &str) -> Result<Value, FetchError> {
        let span = info_span!("fetch_json", url);
        async {
            // The semaphore is owned by this fetcher and never closed.
            let _permit = self.in_flight.acquire().await.ok();

            let request_error = |source| FetchError::Request {
                url: url.to_string(),
                source,
            };
            let resp = self.client.get(url).send().await.map_err(request_error)?;
            let status = resp.status();
            if !status.is_success() {
                return Err(http_status_error(status, resp.url().as_str()));
            }
            let body = resp.bytes().await.map_err(request_error)?;
            serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
                url: url.to_string(),
                source,
            })
        }
        .instrument(span)
        .await
    }
}

fn http_status_error(status: StatusCode, url: &str) -> FetchError {
    FetchError::HttpStatus {
        status: status.as_u16(),
        url: url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn content_hashing_is_stable() {
        let hash = sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn pretty_write_creates_parents_and_uses_two_space_indent() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested/deeper/doc.json");
        write_json_pretty(&path, &json!({"b": 1, "a": [true]}))
            .await
            .expect("write");

        let text = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(text, "{\n  \"b\": 1,\n  \"a\": [\n    true\n  ]\n}");
        let leftovers = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn missing_object_document_reads_as_empty() {
        let dir = tempdir().expect("tempdir");
        let map = read_json_object_or_empty(&dir.path().join("db.json"))
            .await
            .expect("read");
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn non_object_document_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("db.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        let err = read_json_object_or_empty(&path).await.unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[tokio::test]
    async fn restore_previous_rewrites_or_removes() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("payroll.json");

        std::fs::write(&path, "{\"new\": true}").unwrap();
        restore_previous(&path, Some(&b"{\"old\": true}"[..])).await.expect("restore");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"old\": true}");

        restore_previous(&path, None).await.expect("remove");
        assert!(!path.exists());
        restore_previous(&path, None).await.expect("remove is idempotent");
    }
}
