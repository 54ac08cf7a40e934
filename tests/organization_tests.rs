//! Organization lifecycle and settings-driven defaults.

use anyhow::Result;
use axum::http::{Method, StatusCode};
use serde_json::json;
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{FakeEngine, TestApp, json_request, request, test_config};

#[tokio::test]
async fn create_update_and_delete_an_organization() -> Result<()> {
    let app = TestApp::new().await?;
    let (token, _) = app.register("admin@example.com", "admin").await?;

    let (status, body) = app
        .send(json_request(
            Method::POST,
            "/api/v1/organizations",
            Some(&token),
            None,
            json!({ "name": "Acme", "description": "Staging" }),
        ))
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let org: Uuid = body["data"]["id"].as_str().unwrap().parse()?;

    let (status, body) = app
        .send(json_request(
            Method::PUT,
            "/api/v1/organizations",
            Some(&token),
            Some(org),
            json!({ "name": "Acme Inc" }),
        ))
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["name"], "Acme Inc");

    let (_, body) = app
        .send(request(Method::GET, "/api/v1/user/organizations", Some(&token), None))
        .await?;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(2));

    let (status, body) = app
        .send(request(Method::DELETE, "/api/v1/organizations", Some(&token), Some(org)))
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (_, body) = app
        .send(request(Method::GET, "/api/v1/user/organizations", Some(&token), None))
        .await?;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));

    // Membership is gone with the organization.
    let (status, _) = app
        .send(request(Method::GET, "/api/v1/organizations", Some(&token), Some(org)))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn organization_with_other_members_cannot_be_deleted() -> Result<()> {
    let app = TestApp::new().await?;
    let (admin, _) = app.register("admin@example.com", "admin").await?;
    let org = app.first_organization(&admin).await?;
    app.register("bob@example.com", "bob").await?;

    let (status, _) = app
        .send(json_request(
            Method::POST,
            "/api/v1/organizations/members",
            Some(&admin),
            Some(org),
            json!({ "email": "bob@example.com", "role": "member" }),
        ))
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .send(request(Method::DELETE, "/api/v1/organizations", Some(&admin), Some(org)))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "organization still has members");
    Ok(())
}

#[tokio::test]
async fn settings_change_container_defaults() -> Result<()> {
    let app = TestApp::with(test_config(), FakeEngine::with_running("c1", "web")).await?;
    let (token, _) = app.register("admin@example.com", "admin").await?;
    let org = app.first_organization(&token).await?;

    let (status, body) = app
        .send(json_request(
            Method::PUT,
            "/api/v1/organizations",
            Some(&token),
            Some(org),
            json!({ "settings": { "container_stop_timeout": 25 } }),
        ))
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, _) = app
        .send(request(Method::POST, "/api/v1/containers/c1/restart", Some(&token), Some(org)))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.engine.calls(), vec!["restart c1 25".to_string()]);
    Ok(())
}
