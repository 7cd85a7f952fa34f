//! Rebuilds the aggregate database document from per-domain fixture files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pagedata_core::{EndpointName, RenameTable, SiteCatalog, SiteConfig};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "pagedata-sync";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub data_dir: PathBuf,
    pub output_path: PathBuf,
}

impl SyncConfig {
    pub fn from_site(site: &SiteConfig) -> Self {
        Self {
            data_dir: site.data_dir.clone(),
            output_path: site.db_path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Merged { endpoint: EndpointName },
    Failed { reason: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub file: String,
    #[serde(flatten)]
    pub status: FileStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub data_dir: String,
    pub output_path: String,
    pub files: Vec<FileOutcome>,
    pub endpoints_written: usize,
    pub output_bytes: usize,
    pub output_sha256: String,
}

impl SyncRunSummary {
    pub fn failed_files(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::Failed { .. }))
            .count()
    }
}

pub struct DatabaseSynchronizer {
    renames: RenameTable,
}

impl DatabaseSynchronizer {
    pub fn new(renames: RenameTable) -> Self {
        Self { renames }
    }

    pub fn endpoint_for_file(&self, path: &Path) -> Option<EndpointName> {
        let stem = path.file_stem()?.to_str()?;
        Some(self.renames.endpoint_for_stem(stem))
    }

    /// Single pass over `data_dir`. The output is written once, after every file
    /// has been read, so an interrupted run leaves the previous document intact.
    pub async fn run_once(&self, data_dir: &Path, output_path: &Path) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("db_sync", %run_id, data_dir = %data_dir.display());

        async {
            let output_canonical = std::fs::canonicalize(output_path).ok();
            let files = list_json_files(data_dir).await?;

            let mut aggregate = Map::new();
            let mut outcomes = Vec::with_capacity(files.len());

            for path in files {
                let file = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string());

                if output_canonical.is_some() && std::fs::canonicalize(&path).ok() == output_canonical {
                    info!(file = %file, "skipping aggregate output file");
                    outcomes.push(FileOutcome {
                        file,
                        status: FileStatus::Skipped {
                            reason: "aggregate output file".to_string(),
                        },
                    });
                    continue;
                }

                let Some(endpoint) = self.endpoint_for_file(&path) else {
                    warn!(file = %file, "skipping file with non utf-8 name");
                    outcomes.push(FileOutcome {
                        file,
                        status: FileStatus::Skipped {
                            reason: "file name is not valid utf-8".to_string(),
                        },
                    });
                    continue;
                };

                match pagedata_storage::read_json(&path).await {
                    Ok(value) => {
                        if aggregate.insert(endpoint.to_string(), value).is_some() {
                            warn!(file = %file, %endpoint, "endpoint produced by more than one file; keeping the later one");
                        }
                        info!(file = %file, %endpoint, "merged fixture");
                        outcomes.push(FileOutcome {
                            file,
                            status: FileStatus::Merged { endpoint },
                        });
                    }
                    Err(err) => {
                        warn!(file = %file, error = %format!("{err:#}"), "skipping unreadable fixture");
                        outcomes.push(FileOutcome {
                            file,
                            status: FileStatus::Failed {
                                reason: format!("{err:#}"),
                            },
                        });
                    }
                }
            }

            let endpoints_written = aggregate.len();
            let bytes = pagedata_storage::write_json_pretty(output_path, &Value::Object(aggregate))
                .await
                .with_context(|| format!("writing aggregate database {}", output_path.display()))?;
            info!(
                endpoints = endpoints_written,
                output = %output_path.display(),
                "aggregate database written"
            );

            Ok(SyncRunSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                data_dir: data_dir.display().to_string(),
                output_path: output_path.display().to_string(),
                files: outcomes,
                endpoints_written,
                output_bytes: bytes.len(),
                output_sha256: pagedata_storage::sha256_hex(&bytes),
            })
        }
        .instrument(span)
        .await
    }
}

pub async fn run_sync_once(config: &SyncConfig, catalog: &SiteCatalog) -> Result<SyncRunSummary> {
    DatabaseSynchronizer::new(catalog.renames.clone())
        .run_once(&config.data_dir, &config.output_path)
        .await
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let site = SiteConfig::from_env();
    let catalog = site
        .load_catalog()
        .with_context(|| format!("loading catalog {}", site.catalog_path.display()))?;
    run_sync_once(&SyncConfig::from_site(&site), &catalog).await
}

/// Regular `*.json` files directly under `dir`, ordered by file name.
async fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("reading data directory {}", dir.display()))?;
    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("listing {}", dir.display()))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let is_file = fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if is_file {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn synchronizer() -> DatabaseSynchronizer {
        DatabaseSynchronizer::new(RenameTable::builtin())
    }

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).expect("write fixture");
    }

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).expect("read output")).expect("parse output")
    }

    #[tokio::test]
    async fn renamed_and_verbatim_stems_become_endpoint_keys() {
        let data = tempdir().expect("tempdir");
        let out = tempdir().expect("tempdir");
        write(data.path(), "homeData.json", r#"{"a":1}"#);
        write(data.path(), "foo.json", r#"{"b":2}"#);
        write(data.path(), "netSuiteConsulting.json", r#"[1]"#);
        let output = out.path().join("db.json");

        let summary = synchronizer().run_once(data.path(), &output).await.expect("sync");

        assert_eq!(summary.endpoints_written, 3);
        assert_eq!(summary.failed_files(), 0);
        assert_eq!(
            read_json(&output),
            json!({"foo": {"b": 2}, "home": {"a": 1}, "netsuite-consulting": [1]})
        );
    }

    #[tokio::test]
    async fn rerun_on_unchanged_inputs_is_byte_identical() {
        let data = tempdir().expect("tempdir");
        let out = tempdir().expect("tempdir");
        write(data.path(), "payroll.json", r#"{"hero":{"title":"Payroll"},"faq":[]}"#);
        write(data.path(), "retail-data.json", r#"{"stats":[1,2,3]}"#);
        let output = out.path().join("db.json");

        let first = synchronizer().run_once(data.path(), &output).await.expect("first");
        let first_bytes = std::fs::read(&output).unwrap();
        let second = synchronizer().run_once(data.path(), &output).await.expect("second");
        let second_bytes = std::fs::read(&output).unwrap();

        assert_eq!(first_bytes, second_bytes);
        assert_eq!(first.output_sha256, second.output_sha256);
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn unparseable_file_is_reported_and_skipped() {
        let data = tempdir().expect("tempdir");
        let out = tempdir().expect("tempdir");
        write(data.path(), "good.json", r#"{"ok":true}"#);
        write(data.path(), "bad.json", "{ not json");
        let output = out.path().join("db.json");

        let summary = synchronizer().run_once(data.path(), &output).await.expect("sync");

        assert_eq!(summary.endpoints_written, 1);
        assert_eq!(summary.failed_files(), 1);
        let bad = summary.files.iter().find(|f| f.file == "bad.json").unwrap();
        assert!(matches!(bad.status, FileStatus::Failed { .. }));
        assert_eq!(read_json(&output), json!({"good": {"ok": true}}));
    }

    #[tokio::test]
    async fn ignores_subdirectories_and_non_json_files() {
        let data = tempdir().expect("tempdir");
        let out = tempdir().expect("tempdir");
        write(data.path(), "hr.json", r#"{"x":1}"#);
        write(data.path(), "notes.txt", "hello");
        std::fs::create_dir_all(data.path().join("payroll")).unwrap();
        write(&data.path().join("payroll"), "hero.json", r#"{"nested":true}"#);
        std::fs::create_dir_all(data.path().join("dir.json")).unwrap();
        let output = out.path().join("db.json");

        let summary = synchronizer().run_once(data.path(), &output).await.expect("sync");

        assert_eq!(summary.files.len(), 1);
        assert_eq!(read_json(&output), json!({"hr": {"x": 1}}));
    }

    #[tokio::test]
    async fn output_inside_data_dir_is_not_merged_into_itself() {
        let data = tempdir().expect("tempdir");
        write(data.path(), "about.json", r#"{"team":[]}"#);
        let output = data.path().join("db.json");

        synchronizer().run_once(data.path(), &output).await.expect("first");
        let summary = synchronizer().run_once(data.path(), &output).await.expect("second");

        assert_eq!(summary.endpoints_written, 1);
        assert!(summary
            .files
            .iter()
            .any(|f| f.file == "db.json" && matches!(f.status, FileStatus::Skipped { .. })));
        assert_eq!(read_json(&output), json!({"about": {"team": []}}));
    }

    #[tokio::test]
    async fn output_is_fully_overwritten() {
        let data = tempdir().expect("tempdir");
        let out = tempdir().expect("tempdir");
        let output = out.path().join("db.json");
        std::fs::write(&output, r#"{"stale": {"gone": true}}"#).unwrap();
        write(data.path(), "home.json", r#"{"fresh":1}"#);

        synchronizer().run_once(data.path(), &output).await.expect("sync");
        assert_eq!(read_json(&output), json!({"home": {"fresh": 1}}));
    }

    #[tokio::test]
    async fn missing_data_dir_fails_without_touching_output() {
        let out = tempdir().expect("tempdir");
        let output = out.path().join("db.json");
        std::fs::write(&output, "{}").unwrap();

        let err = synchronizer()
            .run_once(&out.path().join("absent"), &output)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("reading data directory"));
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "{}");
    }
}
