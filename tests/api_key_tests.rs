//! API-key issuance, use, listing and revocation through the router.

use anyhow::Result;
use axum::http::{Method, StatusCode};
use nixopus::models::api_key;
use sea_orm::EntityTrait;
use serde_json::json;
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{FakeEngine, TestApp, json_request, request, test_config};

async fn issue_key(app: &TestApp, token: &str, org: Uuid) -> Result<(String, String)> {
    let (status, body) = app
        .send(json_request(
            Method::POST,
            "/api/v1/api-keys",
            Some(token),
            Some(org),
            json!({ "name": "ci-deploy" }),
        ))
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let display = body["data"]["api_key"].as_str().unwrap().to_string();
    let id = body["data"]["key"]["id"].as_str().unwrap().to_string();
    Ok((display, id))
}

#[tokio::test]
async fn issued_key_authenticates_within_its_organization() -> Result<()> {
    let app = TestApp::with(test_config(), FakeEngine::with_running("c1", "web")).await?;
    let (token, _) = app.register("admin@example.com", "admin").await?;
    let org = app.first_organization(&token).await?;

    let (display, _) = issue_key(&app, &token, org).await?;
    let parts: Vec<&str> = display.splitn(3, '_').collect();
    assert_eq!(parts[0], "nixopus");
    assert_eq!(parts[1].len(), 8);

    // No organization header: the key's own organization is adopted.
    let (status, body) = app
        .send(request(Method::GET, "/api/v1/containers", Some(&display), None))
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["containers"][0]["id"], "c1");

    let (status, _) = app
        .send(request(Method::GET, "/api/v1/containers", Some(&display), Some(org)))
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .send(request(
            Method::GET,
            "/api/v1/containers",
            Some(&display),
            Some(Uuid::new_v4()),
        ))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn storage_never_holds_the_display_string() -> Result<()> {
    let app = TestApp::new().await?;
    let (token, _) = app.register("admin@example.com", "admin").await?;
    let org = app.first_organization(&token).await?;
    let (display, _) = issue_key(&app, &token, org).await?;

    let rows = api_key::Entity::find().all(&app.state.db).await?;
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_ne!(row.key_hash, display);
    assert!(!row.key_hash.contains(&display));
    assert_eq!(row.key_hash.len(), 64);
    assert!(display.contains(&row.prefix));
    assert!(row.last_used_at.is_none());

    let (status, body) = app
        .send(request(Method::GET, "/api/v1/api-keys", Some(&token), Some(org)))
        .await?;
    assert_eq!(status, StatusCode::OK);
    let listed = &body["data"][0];
    assert_eq!(listed["name"], "ci-deploy");
    assert!(listed.get("api_key").is_none());
    assert!(!body.to_string().contains(&display));
    Ok(())
}

#[tokio::test]
async fn revoked_key_is_rejected_immediately() -> Result<()> {
    let app = TestApp::new().await?;
    let (token, _) = app.register("admin@example.com", "admin").await?;
    let org = app.first_organization(&token).await?;
    let (display, id) = issue_key(&app, &token, org).await?;

    // Warm the verification cache before revoking.
    let (status, _) = app
        .send(request(Method::GET, "/api/v1/containers", Some(&display), None))
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(request(
            Method::DELETE,
            &format!("/api/v1/api-keys/{id}"),
            Some(&token),
            Some(org),
        ))
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = app
        .send(request(Method::GET, "/api/v1/containers", Some(&display), None))
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "error");

    let (status, _) = app
        .send(request(
            Method::DELETE,
            &format!("/api/v1/api-keys/{}", Uuid::new_v4()),
            Some(&token),
            Some(org),
        ))
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn cli_validation_and_project_init() -> Result<()> {
    let app = TestApp::new().await?;
    let (token, _) = app.register("admin@example.com", "admin").await?;
    let org = app.first_organization(&token).await?;
    let (display, _) = issue_key(&app, &token, org).await?;

    let (status, body) = app
        .send(json_request(
            Method::POST,
            "/api/v1/auth/validate-api-key",
            None,
            None,
            json!({ "api_key": display }),
        ))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);

    let (status, body) = app
        .send(json_request(
            Method::POST,
            "/api/v1/auth/validate-api-key",
            None,
            None,
            json!({ "api_key": "nixopus_deadbeef_nope" }),
        ))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);

    let (status, body) = app
        .send(json_request(
            Method::POST,
            "/api/v1/auth/cli-init",
            None,
            None,
            json!({
                "api_key": display,
                "name": "storefront",
                "repository": "https://github.com/acme/storefront",
                "environment_variables": { "PORT": "3000" }
            }),
        ))
        .await?;
    assert!(status.is_success(), "{body}");
    let project_id = body["data"]["project_id"].as_str().unwrap().to_string();
    let domain = body["data"]["domain"].as_str().unwrap();
    assert_eq!(domain, format!("{}.nixopus.com", &project_id.replace('-', "")[..8]));
    assert!(body["data"]["family_id"].is_string());

    let (status, body) = app
        .send(request(
            Method::GET,
            "/api/v1/deploy/applications",
            Some(&token),
            Some(org),
        ))
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"][0]["name"], "storefront");
    assert_eq!(body["data"][0]["branch"], "main");
    Ok(())
}
