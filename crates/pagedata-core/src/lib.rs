//! Core naming types, lookup tables and configuration for the page data backend.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "pagedata-core";

macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

name_type!(
    /// Identifier of a visual section type in the page-builder catalog.
    ComponentName
);

name_type!(
    /// Logical domain name used as a key of the aggregate database.
    EndpointName
);

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid fixture path {path:?}: {reason}")]
    InvalidFixturePath { path: String, reason: &'static str },
    #[error("reading catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing catalog {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Relative location of a JSON fixture beneath the data root.
///
/// Only plain path segments are accepted, so a fixture path can never escape
/// the root it is joined onto.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FixturePath(String);

impl FixturePath {
    pub fn parse(raw: &str) -> Result<Self, CatalogError> {
        let trimmed = raw.trim().trim_start_matches("./");
        let invalid = |reason| CatalogError::InvalidFixturePath {
            path: raw.to_string(),
            reason,
        };
        if trimmed.is_empty() {
            return Err(invalid("empty path"));
        }
        if trimmed.contains('\\') {
            return Err(invalid("backslash separators are not allowed"));
        }
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(_) => {}
                Component::ParentDir => return Err(invalid("parent directory segment")),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid("path must be relative"))
                }
                Component::CurDir => return Err(invalid("current directory segment")),
            }
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn under(&self, root: &Path) -> PathBuf {
        root.join(&self.0)
    }
}

impl fmt::Display for FixturePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FixturePath {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FixturePath> for String {
    fn from(value: FixturePath) -> Self {
        value.0
    }
}

fn fixture(raw: &str) -> FixturePath {
    FixturePath(raw.to_string())
}

/// Component name -> fallback fixture rendered when no content blob is supplied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefaultDataMap {
    entries: BTreeMap<ComponentName, FixturePath>,
}

impl DefaultDataMap {
    pub fn builtin() -> Self {
        [
            ("AboutHeroSection", "about/hero.json"),
            ("CTASection", "common/cta.json"),
            ("CustomizationPage", "customization.json"),
            ("FAQSection", "common/faq.json"),
            ("HRHeroSection", "hr/hero.json"),
            ("IndustriesGridSection", "industries/grid.json"),
            ("PayrollHeroSection", "payroll/hero.json"),
            ("PayrollPainPointsSection", "payroll/pain-points.json"),
            ("StatsGridSection", "common/stats.json"),
        ]
        .into_iter()
        .map(|(name, path)| (ComponentName::new(name), fixture(path)))
        .collect()
    }

    pub fn lookup(&self, component: &str) -> Option<&FixturePath> {
        self.entries.get(component)
    }

    pub fn insert(&mut self, component: ComponentName, path: FixturePath) -> Option<FixturePath> {
        self.entries.insert(component, path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ComponentName, &FixturePath)> {
        self.entries.iter()
    }
}

impl FromIterator<(ComponentName, FixturePath)> for DefaultDataMap {
    fn from_iter<I: IntoIterator<Item = (ComponentName, FixturePath)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Endpoint name -> per-domain fixture file written by the sync service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointRegistry {
    entries: BTreeMap<EndpointName, FixturePath>,
}

impl EndpointRegistry {
    pub fn builtin() -> Self {
        [
            ("about", "about.json"),
            ("home", "homeData.json"),
            ("hr", "hr.json"),
            ("industries", "industries.json"),
            ("integration", "integration-data.json"),
            ("manufacturing", "manufacturing-data.json"),
            ("netsuite-consulting", "netSuiteConsulting.json"),
            ("payroll", "payroll.json"),
            ("retail", "retail-data.json"),
        ]
        .into_iter()
        .map(|(name, path)| (EndpointName::new(name), fixture(path)))
        .collect()
    }

    pub fn fixture_path(&self, endpoint: &str) -> Option<&FixturePath> {
        self.entries.get(endpoint)
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.entries.contains_key(endpoint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EndpointName, &FixturePath)> {
        self.entries.iter()
    }
}

impl FromIterator<(EndpointName, FixturePath)> for EndpointRegistry {
    fn from_iter<I: IntoIterator<Item = (EndpointName, FixturePath)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Fixture file stem -> endpoint name it is published under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenameTable {
    entries: BTreeMap<String, EndpointName>,
}

impl RenameTable {
    pub fn builtin() -> Self {
        [
            ("homeData", "home"),
            ("integration-data", "integration"),
            ("manufacturing-data", "manufacturing"),
            ("netSuiteConsulting", "netsuite-consulting"),
            ("retail-data", "retail"),
        ]
        .into_iter()
        .map(|(stem, endpoint)| (stem.to_string(), EndpointName::new(endpoint)))
        .collect()
    }

    /// Unmapped stems are used verbatim.
    pub fn endpoint_for_stem(&self, stem: &str) -> EndpointName {
        self.entries
            .get(stem)
            .cloned()
            .unwrap_or_else(|| EndpointName::new(stem))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, EndpointName)> for RenameTable {
    fn from_iter<I: IntoIterator<Item = (String, EndpointName)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// All lookup tables, loaded once and handed to the components that need them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteCatalog {
    #[serde(default = "DefaultDataMap::builtin")]
    pub components: DefaultDataMap,
    #[serde(default = "EndpointRegistry::builtin")]
    pub endpoints: EndpointRegistry,
    #[serde(default = "RenameTable::builtin")]
    pub renames: RenameTable,
}

impl Default for SiteCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SiteCatalog {
    pub fn builtin() -> Self {
        Self {
            components: DefaultDataMap::builtin(),
            endpoints: EndpointRegistry::builtin(),
            renames: RenameTable::builtin(),
        }
    }

    pub fn from_yaml_path(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| CatalogError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Falls back to the compiled-in tables when `path` does not exist.
    pub fn load_or_builtin(path: &Path) -> Result<Self, CatalogError> {
        if path.exists() {
            Self::from_yaml_path(path)
        } else {
            Ok(Self::builtin())
        }
    }
}

#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub root: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub catalog_path: PathBuf,
    pub port: u16,
    pub base_url: String,
    pub http_timeout_secs: u64,
}

impl SiteConfig {
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            data_dir: root.join("data"),
            db_path: root.join("db.json"),
            catalog_path: root.join("site.yaml"),
            port: 3001,
            base_url: "http://localhost:3001".to_string(),
            http_timeout_secs: 10,
            root,
        }
    }

    pub fn from_env() -> Self {
        let root = std::env::var("PAGEDATA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        let defaults = Self::for_root(root);
        Self {
            data_dir: std::env::var("PAGEDATA_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            db_path: std::env::var("PAGEDATA_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            catalog_path: std::env::var("PAGEDATA_CATALOG")
                .map(PathBuf::from)
                .unwrap_or(defaults.catalog_path),
            port: std::env::var("PAGEDATA_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            base_url: std::env::var("PAGEDATA_BASE_URL").unwrap_or(defaults.base_url),
            http_timeout_secs: std::env::var("PAGEDATA_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            root: defaults.root,
        }
    }

    pub fn load_catalog(&self) -> Result<SiteCatalog, CatalogError> {
        SiteCatalog::load_or_builtin(&self.catalog_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fixture_paths_stay_under_root() {
        assert_eq!(FixturePath::parse("payroll/hero.json").unwrap().as_str(), "payroll/hero.json");
        assert_eq!(FixturePath::parse("./faq.json").unwrap().as_str(), "faq.json");
        assert!(FixturePath::parse("").is_err());
        assert!(FixturePath::parse("../secrets.json").is_err());
        assert!(FixturePath::parse("payroll/../../x.json").is_err());
        assert!(FixturePath::parse("/etc/passwd").is_err());
        assert!(FixturePath::parse("a\\b.json").is_err());
    }

    #[test]
    fn builtin_tables_cover_known_names() {
        let catalog = SiteCatalog::builtin();
        assert_eq!(
            catalog.components.lookup("PayrollHeroSection").map(FixturePath::as_str),
            Some("payroll/hero.json")
        );
        assert!(catalog.components.lookup("UnknownSection").is_none());
        assert_eq!(
            catalog.endpoints.fixture_path("payroll").map(FixturePath::as_str),
            Some("payroll.json")
        );
        assert!(!catalog.endpoints.contains("bogus"));
    }

    #[test]
    fn rename_table_maps_known_stems_and_passes_others_through() {
        let renames = RenameTable::builtin();
        assert_eq!(renames.endpoint_for_stem("homeData").as_str(), "home");
        assert_eq!(renames.endpoint_for_stem("manufacturing-data").as_str(), "manufacturing");
        assert_eq!(renames.endpoint_for_stem("integration-data").as_str(), "integration");
        assert_eq!(renames.endpoint_for_stem("retail-data").as_str(), "retail");
        assert_eq!(
            renames.endpoint_for_stem("netSuiteConsulting").as_str(),
            "netsuite-consulting"
        );
        assert_eq!(renames.endpoint_for_stem("foo").as_str(), "foo");
    }

    #[test]
    fn yaml_catalog_overrides_sections_it_names() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("site.yaml");
        std::fs::write(
            &path,
            "components:\n  PricingSection: pricing/table.json\nrenames:\n  blogData: blog\n",
        )
        .expect("write yaml");

        let catalog = SiteCatalog::from_yaml_path(&path).expect("load catalog");
        assert_eq!(catalog.components.len(), 1);
        assert_eq!(
            catalog.components.lookup("PricingSection").map(FixturePath::as_str),
            Some("pricing/table.json")
        );
        assert_eq!(catalog.renames.endpoint_for_stem("blogData").as_str(), "blog");
        assert_eq!(catalog.endpoints, EndpointRegistry::builtin());
    }

    #[test]
    fn yaml_catalog_rejects_escaping_fixture_paths() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("site.yaml");
        std::fs::write(&path, "endpoints:\n  payroll: ../payroll.json\n").expect("write yaml");

        let err = SiteCatalog::from_yaml_path(&path).unwrap_err();
        assert!(matches!(err, CatalogError::Yaml { .. }));
    }

    #[test]
    fn workspace_catalog_matches_builtin_tables() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../site.yaml");
        let catalog = SiteCatalog::from_yaml_path(&path).expect("load workspace catalog");
        assert_eq!(catalog, SiteCatalog::builtin());
    }

    #[test]
    fn missing_catalog_file_uses_builtin_tables() {
        let dir = tempdir().expect("tempdir");
        let catalog = SiteCatalog::load_or_builtin(&dir.path().join("absent.yaml")).expect("load");
        assert_eq!(catalog, SiteCatalog::builtin());
    }
}
