use std::sync::Arc;

use pagedata_core::{ComponentName, DefaultDataMap, FixturePath, SiteCatalog};
use pagedata_resolver::{DataSlot, DefaultDataResolver, HttpFixtureSource};
use pagedata_storage::{HttpClientConfig, JsonFetcher};
use pagedata_web::{app, AppState};
use serde_json::json;
use tempfile::tempdir;
use tokio::net::TcpListener;

async fn spawn_backend(data_dir: std::path::PathBuf, db_path: std::path::PathBuf) -> String {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let router = app(AppState::new(data_dir, db_path, &SiteCatalog::builtin()));
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    format!("http://{addr}")
}

fn defaults() -> DefaultDataMap {
    [
        ("PayrollHeroSection", "payroll/hero.json"),
        ("PayrollPainPointsSection", "payroll/pain-points.json"),
    ]
    .into_iter()
    .map(|(c, p)| (ComponentName::new(c), FixturePath::parse(p).unwrap()))
    .collect()
}

fn resolver(base_url: &str) -> DefaultDataResolver {
    let fetcher = JsonFetcher::new(HttpClientConfig::default()).expect("fetcher");
    DefaultDataResolver::new(defaults(), Arc::new(HttpFixtureSource::new(base_url, fetcher)))
}

#[tokio::test]
async fn resolver_fetches_fixture_from_data_route() {
    let dir = tempdir().expect("tempdir");
    let data_dir = dir.path().join("data");
    std::fs::create_dir_all(data_dir.join("payroll")).unwrap();
    std::fs::write(
        data_dir.join("payroll/hero.json"),
        r#"{"title":"Payroll without the headaches"}"#,
    )
    .unwrap();
    let base_url = spawn_backend(data_dir, dir.path().join("db.json")).await;

    let res = resolver(&base_url).resolve("PayrollHeroSection", None).await;

    assert!(res.error.is_none(), "unexpected error: {:?}", res.error);
    assert!(!res.loading);
    assert_eq!(res.data, json!({"title": "Payroll without the headaches"}));
}

#[tokio::test]
async fn missing_fixture_404_resolves_to_empty_data_with_error() {
    let dir = tempdir().expect("tempdir");
    let data_dir = dir.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();
    let base_url = spawn_backend(data_dir, dir.path().join("db.json")).await;

    let slot = DataSlot::new(Arc::new(resolver(&base_url)));
    let mut rx = slot.subscribe();
    assert!(rx.borrow_and_update().loading);

    assert!(slot.request("PayrollPainPointsSection", None).await);

    let res = rx.borrow_and_update().clone();
    assert!(!res.loading);
    assert_eq!(res.data, json!({}));
    let err = res.error.expect("fixture unavailable");
    assert!(!err.is_configuration());
    assert!(err.to_string().contains("404"), "{err}");
    assert!(!rx.has_changed().unwrap());
}
