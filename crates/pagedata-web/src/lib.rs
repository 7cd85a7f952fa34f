//! Axum sync service and mock JSON read API.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pagedata_core::{EndpointName, EndpointRegistry, FixturePath, SiteCatalog, SiteConfig};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "pagedata-web";

/// Body of `POST /sync-file`. Both fields are optional at the wire level so a
/// missing one is reported as a client error instead of a decode failure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SyncFileRequest {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncFileResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("both endpoint and data are required")]
    MissingFields,
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),
    #[error("failed to write fixture for {endpoint}: {reason}")]
    FixtureWrite { endpoint: EndpointName, reason: String },
    #[error("failed to update aggregate database for {endpoint}: {reason} (fixture restored: {restored})")]
    AggregateWrite {
        endpoint: EndpointName,
        reason: String,
        restored: bool,
    },
}

impl PersistError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingFields | Self::UnknownEndpoint(_) => StatusCode::BAD_REQUEST,
            Self::FixtureWrite { .. } | Self::AggregateWrite { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersistOutcome {
    pub endpoint: EndpointName,
    pub fixture_path: PathBuf,
}

/// The only writer of fixture files and the aggregate database.
pub struct SyncService {
    data_dir: PathBuf,
    db_path: PathBuf,
    endpoints: EndpointRegistry,
    write_lock: Mutex<()>,
}

impl SyncService {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        db_path: impl Into<PathBuf>,
        endpoints: EndpointRegistry,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            db_path: db_path.into(),
            endpoints,
            write_lock: Mutex::new(()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Write `data` to the endpoint's fixture file, then patch the endpoint's key
    /// in the aggregate database. A failed aggregate update puts the fixture
    /// file back the way it was.
    pub async fn persist(&self, request: SyncFileRequest) -> Result<PersistOutcome, PersistError> {
        let endpoint = request
            .endpoint
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());
        let (Some(endpoint), Some(data)) = (endpoint, request.data) else {
            return Err(PersistError::MissingFields);
        };
        let Some(fixture) = self.endpoints.fixture_path(&endpoint) else {
            return Err(PersistError::UnknownEndpoint(endpoint));
        };
        let endpoint = EndpointName::new(endpoint);
        let fixture_path = fixture.under(&self.data_dir);

        // Writes from concurrent requests are applied one at a time so no
        // request's aggregate key is lost to another's read-modify-write.
        let _guard = self.write_lock.lock().await;

        let previous = pagedata_storage::read_optional_bytes(&fixture_path)
            .await
            .map_err(|err| PersistError::FixtureWrite {
                endpoint: endpoint.clone(),
                reason: format!("{err:#}"),
            })?;
        pagedata_storage::write_json_pretty(&fixture_path, &data)
            .await
            .map_err(|err| PersistError::FixtureWrite {
                endpoint: endpoint.clone(),
                reason: format!("{err:#}"),
            })?;

        if let Err(err) = self.patch_aggregate(&endpoint, data).await {
            let restored =
                match pagedata_storage::restore_previous(&fixture_path, previous.as_deref()).await {
                    Ok(()) => true,
                    Err(restore_err) => {
                        error!(
                            %endpoint,
                            error = %format!("{restore_err:#}"),
                            "failed to restore fixture after aggregate write failure"
                        );
                        false
                    }
                };
            return Err(PersistError::AggregateWrite {
                endpoint,
                reason: format!("{err:#}"),
                restored,
            });
        }

        info!(%endpoint, fixture = %fixture_path.display(), "persisted endpoint data");
        Ok(PersistOutcome {
            endpoint,
            fixture_path,
        })
    }

    async fn patch_aggregate(&self, endpoint: &EndpointName, data: Value) -> anyhow::Result<()> {
        let mut aggregate = pagedata_storage::read_json_object_or_empty(&self.db_path).await?;
        aggregate.insert(endpoint.to_string(), data);
        pagedata_storage::write_json_pretty(&self.db_path, &Value::Object(aggregate)).await?;
        Ok(())
    }
}

pub struct AppState {
    pub sync: SyncService,
}

impl AppState {
    pub fn new(data_dir: impl Into<PathBuf>, db_path: impl Into<PathBuf>, catalog: &SiteCatalog) -> Self {
        Self {
            sync: SyncService::new(data_dir, db_path, catalog.endpoints.clone()),
        }
    }

    pub fn from_config(config: &SiteConfig, catalog: &SiteCatalog) -> Self {
        Self::new(config.data_dir.clone(), config.db_path.clone(), catalog)
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/sync-file", post(sync_file_handler))
        .route("/data/{*path}", get(fixture_handler))
        .route("/db", get(db_handler))
        .route("/db/{endpoint}", get(db_endpoint_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(config: &SiteConfig, catalog: &SiteCatalog) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(
        addr = %listener.local_addr()?,
        data_dir = %config.data_dir.display(),
        db = %config.db_path.display(),
        "sync service listening"
    );
    axum::serve(listener, app(AppState::from_config(config, catalog))).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SiteConfig::from_env();
    let catalog = config.load_catalog()?;
    serve(&config, &catalog).await
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn sync_file_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SyncFileRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return json_error(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    match state.sync.persist(request).await {
        Ok(outcome) => Json(SyncFileResponse {
            success: true,
            message: format!(
                "Updated {} at {} and in the database",
                outcome.endpoint,
                outcome.fixture_path.display()
            ),
        })
        .into_response(),
        Err(err) => {
            let status = err.status();
            if status.is_server_error() {
                error!(error = %err, "sync-file failed");
            } else {
                warn!(error = %err, "sync-file rejected");
            }
            json_error(status, err.to_string())
        }
    }
}

async fn fixture_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(path): AxumPath<String>,
) -> Response {
    let fixture = match FixturePath::parse(&path) {
        Ok(fixture) => fixture,
        Err(err) => return json_error(StatusCode::BAD_REQUEST, err.to_string()),
    };
    let full = fixture.under(state.sync.data_dir());
    match pagedata_storage::read_optional_bytes(&full).await {
        Ok(Some(bytes)) => match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => Json(value).into_response(),
            Err(err) => json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("fixture {fixture} is not valid json: {err}"),
            ),
        },
        Ok(None) => json_error(StatusCode::NOT_FOUND, format!("fixture {fixture} not found")),
        Err(err) => server_error(err),
    }
}

async fn db_handler(State(state): State<Arc<AppState>>) -> Response {
    match pagedata_storage::read_json_object_or_empty(state.sync.db_path()).await {
        Ok(aggregate) => Json(Value::Object(aggregate)).into_response(),
        Err(err) => server_error(err),
    }
}

async fn db_endpoint_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(endpoint): AxumPath<String>,
) -> Response {
    match pagedata_storage::read_json_object_or_empty(state.sync.db_path()).await {
        Ok(mut aggregate) => match aggregate.remove(&endpoint) {
            Some(value) => Json(value).into_response(),
            None => json_error(StatusCode::NOT_FOUND, format!("unknown endpoint: {endpoint}")),
        },
        Err(err) => server_error(err),
    }
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn server_error(err: anyhow::Error) -> Response {
    error!(error = %format!("{err:#}"), "request failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
}
