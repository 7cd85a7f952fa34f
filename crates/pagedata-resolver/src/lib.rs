//! Default-data resolution for page-builder components.
//!
//! A component instance renders either the admin-authored content blob it was
//! given or, failing that, the fallback fixture named by the default-data map.
//! [`DataSlot`] wraps the resolver for one component instance and keeps the
//! latest resolution, discarding results of superseded requests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pagedata_core::{ComponentName, DefaultDataMap, FixturePath, SiteConfig};
use pagedata_storage::{FetchError, HttpClientConfig, JsonFetcher};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "pagedata-resolver";

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("fixture {path} not found")]
    NotFound { path: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("reading fixture {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("fixture {path} is not valid json: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Where fallback fixtures come from.
#[async_trait]
pub trait FixtureSource: Send + Sync {
    async fn load(&self, path: &FixturePath) -> Result<Value, FixtureError>;
}

/// Fetches `GET <base_url>/data/<fixture path>` from the mock JSON backend.
pub struct HttpFixtureSource {
    fetcher: JsonFetcher,
    base_url: String,
}

impl HttpFixtureSource {
    pub fn new(base_url: impl Into<String>, fetcher: JsonFetcher) -> Self {
        Self {
            fetcher,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &SiteConfig) -> anyhow::Result<Self> {
        let fetcher = JsonFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(format!("pagedata/{}", env!("CARGO_PKG_VERSION"))),
            ..Default::default()
        })?;
        Ok(Self::new(config.base_url.clone(), fetcher))
    }

    pub fn url_for(&self, path: &FixturePath) -> String {
        format!("{}/data/{}", self.base_url, path)
    }
}

#[async_trait]
impl FixtureSource for HttpFixtureSource {
    async fn load(&self, path: &FixturePath) -> Result<Value, FixtureError> {
        Ok(self.fetcher.fetch_json(&self.url_for(path)).await?)
    }
}

/// Reads fixtures straight from the data root.
pub struct FsFixtureSource {
    root: PathBuf,
}

impl FsFixtureSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FixtureSource for FsFixtureSource {
    async fn load(&self, path: &FixturePath) -> Result<Value, FixtureError> {
        let full = path.under(&self.root);
        let bytes = match tokio::fs::read(&full).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(FixtureError::NotFound {
                    path: path.to_string(),
                })
            }
            Err(source) => return Err(FixtureError::Io { path: full, source }),
        };
        serde_json::from_slice(&bytes).map_err(|source| FixtureError::Decode {
            path: path.to_string(),
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no default data mapping for component {component}")]
    NoMapping { component: ComponentName },
    #[error("default data for {component} unavailable from {path}: {reason}")]
    Unavailable {
        component: ComponentName,
        path: FixturePath,
        reason: String,
    },
}

impl ResolveError {
    /// Configuration gaps render a neutral placeholder rather than an error banner.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NoMapping { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum DataOrigin {
    Pending,
    Inline,
    Fixture(FixturePath),
    Empty,
}

/// What a renderer consumes: `{data, loading, error}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub data: Value,
    pub loading: bool,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ResolveError>,
    pub origin: DataOrigin,
}

fn serialize_error<S: Serializer>(error: &Option<ResolveError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(err) => s.serialize_some(&err.to_string()),
        None => s.serialize_none(),
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Resolution {
    pub fn pending() -> Self {
        Self {
            data: empty_object(),
            loading: true,
            error: None,
            origin: DataOrigin::Pending,
        }
    }

    fn ready(data: Value, origin: DataOrigin) -> Self {
        Self {
            data,
            loading: false,
            error: None,
            origin,
        }
    }

    fn failed(error: ResolveError) -> Self {
        Self {
            data: empty_object(),
            loading: false,
            error: Some(error),
            origin: DataOrigin::Empty,
        }
    }
}

/// Parse an admin-authored content blob; blank or malformed blobs yield `None`.
pub fn parse_content_blob(component: &str, blob: Option<&str>) -> Option<Value> {
    let blob = blob.map(str::trim).filter(|b| !b.is_empty())?;
    match serde_json::from_str(blob) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(component, error = %err, "ignoring unparseable content blob");
            None
        }
    }
}

/// Stateless: concurrent resolutions share nothing but the fixture source.
pub struct DefaultDataResolver {
    defaults: DefaultDataMap,
    source: Arc<dyn FixtureSource>,
}

impl DefaultDataResolver {
    pub fn new(defaults: DefaultDataMap, source: Arc<dyn FixtureSource>) -> Self {
        Self { defaults, source }
    }

    pub fn defaults(&self) -> &DefaultDataMap {
        &self.defaults
    }

    pub async fn resolve(&self, component: &str, content: Option<&str>) -> Resolution {
        match parse_content_blob(component, content) {
            Some(data) => Resolution::ready(data, DataOrigin::Inline),
            None => self.resolve_default(component).await,
        }
    }

    pub async fn resolve_default(&self, component: &str) -> Resolution {
        let Some(path) = self.defaults.lookup(component) else {
            debug!(component, "no default data mapping");
            return Resolution::failed(ResolveError::NoMapping {
                component: ComponentName::new(component),
            });
        };

        match self.source.load(path).await {
            Ok(data) => Resolution::ready(data, DataOrigin::Fixture(path.clone())),
            Err(err) => {
                warn!(component, path = %path, error = %err, "default data unavailable");
                Resolution::failed(ResolveError::Unavailable {
                    component: ComponentName::new(component),
                    path: path.clone(),
                    reason: err.to_string(),
                })
            }
        }
    }
}

/// Latest resolution for one component instance.
///
/// Every [`DataSlot::request`] takes a fresh generation token; a result is only
/// applied while its token is still the newest, so a slow fetch for an old key
/// never overwrites data for the key that replaced it.
pub struct DataSlot {
    resolver: Arc<DefaultDataResolver>,
    generation: AtomicU64,
    state: watch::Sender<Resolution>,
}

impl DataSlot {
    pub fn new(resolver: Arc<DefaultDataResolver>) -> Self {
        let (state, _) = watch::channel(Resolution::pending());
        Self {
            resolver,
            generation: AtomicU64::new(0),
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Resolution> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> Resolution {
        self.state.borrow().clone()
    }

    /// Re-resolve for a new `(component, content)` key. Returns `false` when a
    /// newer request superseded this one before its result arrived.
    pub async fn request(&self, component: &str, content: Option<&str>) -> bool {
        let token = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(data) = parse_content_blob(component, content) {
            return self.apply(token, Resolution::ready(data, DataOrigin::Inline));
        }

        self.apply(token, Resolution::pending());
        let resolution = self.resolver.resolve_default(component).await;
        let applied = self.apply(token, resolution);
        if !applied {
            debug!(component, token, "discarding superseded resolution");
        }
        applied
    }

    fn apply(&self, token: u64, resolution: Resolution) -> bool {
        let mut applied = false;
        self.state.send_if_modified(|current| {
            if self.generation.load(Ordering::SeqCst) != token {
                return false;
            }
            applied = true;
            if *current == resolution {
                return false;
            }
            *current = resolution;
            true
        });
        applied
    }
}
