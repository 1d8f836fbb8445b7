use std::sync::Arc;

use atlas_engine::Config;
use atlas_server::{ApiCredentials, Opts, Server};
use atlas_store::Database;
use atlas_util_error::BoxedErrorResult;
use tempfile::tempdir;

async fn spawn_server() -> BoxedErrorResult<(tempfile::TempDir, String, tokio::task::JoinHandle<()>)>
{
    let dir = tempdir()?;
    let db = Arc::new(Database::open(dir.path().join("atlas.redb")).await?);

    let server = Server::init(
        Opts {
            listen: "127.0.0.1:0".to_owned(),
            reuseport: false,
        },
        db,
        Config::default(),
        ApiCredentials {
            api_key: "test".to_owned(),
            fallback_bearer_token: None,
        },
    )
    .await?;
    let addr = server.addr()?;

    let handle = tokio::spawn(async move {
        let _ = server.run().await;
    });

    Ok((dir, format!("http://{addr}"), handle))
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn liveness_and_error_mapping() -> BoxedErrorResult<()> {
    let (_dir, base, handle) = spawn_server().await?;
    let http = reqwest::Client::new();

    // Liveness
    let body: serde_json::Value = http.get(format!("{base}/")).send().await?.json().await?;
    assert_eq!(body["service"], "atlas");
    assert_eq!(body["status"], "ok");

    // Unknown identifier → 404
    let response = http.get(format!("{base}/runs/999")).send().await?;
    assert_eq!(response.status(), 404);

    // Invalid enum value → 422 with machine-readable field errors
    let response = http
        .get(format!("{base}/snapshots?kind=friends"))
        .send()
        .await?;
    assert_eq!(response.status(), 422);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["errors"][0]["field"], "kind");

    // Collect without a target → 422, no run created
    let response = http
        .post(format!("{base}/collect"))
        .json(&serde_json::json!({}))
        .send()
        .await?;
    assert_eq!(response.status(), 422);
    let runs: serde_json::Value = http.get(format!("{base}/runs")).send().await?.json().await?;
    assert_eq!(runs.as_array().map(Vec::len), Some(0));

    handle.abort();
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn empty_store_serves_empty_structures() -> BoxedErrorResult<()> {
    let (_dir, base, handle) = spawn_server().await?;
    let http = reqwest::Client::new();

    // /graph always answers, with an empty frame before any build.
    let body: serde_json::Value = http
        .get(format!("{base}/graph?timeframe_window=30"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["stats"]["nodeCount"], 0);
    assert_eq!(body["timeframe_days"], 30);

    // /frames/latest has nothing to serve yet.
    let response = http.get(format!("{base}/frames/latest")).send().await?;
    assert_eq!(response.status(), 404);

    let stats: serde_json::Value = http.get(format!("{base}/stats")).send().await?.json().await?;
    assert_eq!(stats["accounts"], 0);
    assert_eq!(stats["runs"]["total"], 0);

    // Position history requires an account id.
    let response = http.get(format!("{base}/positions/history")).send().await?;
    assert_eq!(response.status(), 422);

    handle.abort();
    Ok(())
}
