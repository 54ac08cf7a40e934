//! Container actions through the orchestrator: resource validation,
//! per-organization defaults and protection of platform containers.

use std::collections::HashMap;

use anyhow::Result;
use axum::http::{Method, StatusCode};
use nixopus::containers::engine::INFRA_LABEL;
use serde_json::json;
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{FakeEngine, TestApp, json_request, request, test_config};

const MIB: i64 = 1024 * 1024;

async fn admin_app(engine: FakeEngine) -> Result<(TestApp, String, Uuid)> {
    let app = TestApp::with(test_config(), engine).await?;
    let (token, _) = app.register("admin@example.com", "admin").await?;
    let org = app.first_organization(&token).await?;
    Ok((app, token, org))
}

#[tokio::test]
async fn resource_limits_are_validated_before_the_engine() -> Result<()> {
    let (app, token, org) = admin_app(FakeEngine::with_running("c1", "web")).await?;

    let rejected = [
        (json!({ "memory": 5 * MIB }), "memory must be 0 or >= 6MB"),
        (
            json!({ "memory": 64 * MIB, "memory_swap": 64 * MIB - 1 }),
            "memory_swap must be >= memory, 0 (unlimited), or -1 (unlimited swap)",
        ),
        (json!({ "cpu_shares": 1 }), "cpu_shares must be 0 or >= 2"),
    ];
    for (limits, message) in rejected {
        let (status, body) = app
            .send(json_request(
                Method::PATCH,
                "/api/v1/containers/c1/resources",
                Some(&token),
                Some(org),
                limits,
            ))
            .await?;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], message);
    }
    assert!(app.engine.calls().is_empty());

    let (status, body) = app
        .send(json_request(
            Method::PATCH,
            "/api/v1/containers/c1/resources",
            Some(&token),
            Some(org),
            json!({ "memory": 64 * MIB, "memory_swap": -1, "cpu_shares": 512 }),
        ))
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["success"], true);
    assert_eq!(
        app.engine.calls(),
        vec![format!("update c1 {} -1 512", 64 * MIB)]
    );
    Ok(())
}

#[tokio::test]
async fn stopped_container_cannot_take_resource_updates() -> Result<()> {
    let engine = FakeEngine::default();
    engine.add("c2", "worker", false, HashMap::new());
    let (app, token, org) = admin_app(engine).await?;

    let (status, body) = app
        .send(json_request(
            Method::PATCH,
            "/api/v1/containers/c2/resources",
            Some(&token),
            Some(org),
            json!({ "memory": 0, "memory_swap": 0, "cpu_shares": 0 }),
        ))
        .await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "container must be running to update resources");
    Ok(())
}

#[tokio::test]
async fn stop_uses_the_organization_default_timeout() -> Result<()> {
    let (app, token, org) = admin_app(FakeEngine::with_running("c1", "web")).await?;

    let (status, _) = app
        .send(request(Method::POST, "/api/v1/containers/c1/stop", Some(&token), Some(org)))
        .await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .send(request(
            Method::POST,
            "/api/v1/containers/c1/stop?timeout=2",
            Some(&token),
            Some(org),
        ))
        .await?;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        app.engine.calls(),
        vec!["stop c1 10".to_string(), "stop c1 2".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn platform_containers_are_never_touched() -> Result<()> {
    let engine = FakeEngine::default();
    engine.add(
        "db1",
        "nixopus-db",
        true,
        HashMap::from([(INFRA_LABEL.to_string(), "true".to_string())]),
    );
    let (app, token, org) = admin_app(engine).await?;

    let (status, body) = app
        .send(request(Method::DELETE, "/api/v1/containers/db1", Some(&token), Some(org)))
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["success"], false);
    assert!(app.engine.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_container_is_an_engine_failure() -> Result<()> {
    let (app, token, org) = admin_app(FakeEngine::default()).await?;

    let (status, body) = app
        .send(request(Method::POST, "/api/v1/containers/missing/start", Some(&token), Some(org)))
        .await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "error");
    Ok(())
}
