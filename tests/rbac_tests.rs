//! Role-based access: method-to-action mapping, role changes taking effect
//! and audit capture of permitted writes.

use anyhow::Result;
use axum::http::{Method, StatusCode};
use nixopus::models::AuditLog;
use nixopus::notifications::Notification;
use sea_orm::EntityTrait;
use serde_json::json;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{FakeEngine, TestApp, json_request, request, test_config};

#[tokio::test]
async fn viewer_reads_but_cannot_write_until_promoted() -> Result<()> {
    let mut app = TestApp::with(test_config(), FakeEngine::with_running("c1", "web")).await?;
    let (admin, _) = app.register("admin@example.com", "admin").await?;
    let org = app.first_organization(&admin).await?;
    let (bob, bob_id) = app.register("bob@example.com", "bob").await?;

    // Not yet a member.
    let (status, _) = app
        .send(request(Method::GET, "/api/v1/containers", Some(&bob), Some(org)))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(json_request(
            Method::POST,
            "/api/v1/organizations/members",
            Some(&admin),
            Some(org),
            json!({ "email": "bob@example.com", "role": "viewer" }),
        ))
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let mut invited = false;
    while let Ok(notification) = app.notifications.try_recv() {
        if let Notification::OrganizationInvite { email, role, .. } = notification {
            assert_eq!(email, "bob@example.com");
            assert_eq!(role, "viewer");
            invited = true;
        }
    }
    assert!(invited, "invite notification queued");

    let (status, _) = app
        .send(request(Method::GET, "/api/v1/containers", Some(&bob), Some(org)))
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(request(Method::POST, "/api/v1/containers/c1/start", Some(&bob), Some(org)))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body["message"],
        "User does not have permission to create container"
    );
    assert!(app.engine.calls().is_empty());

    let (status, body) = app
        .send(json_request(
            Method::PUT,
            &format!("/api/v1/organizations/members/{bob_id}/role"),
            Some(&admin),
            Some(org),
            json!({ "role": "member" }),
        ))
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = app
        .send(request(Method::POST, "/api/v1/containers/c1/start", Some(&bob), Some(org)))
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(app.engine.calls(), vec!["start c1".to_string()]);

    // Members still only read organization settings.
    let (status, body) = app
        .send(json_request(
            Method::PUT,
            "/api/v1/organizations",
            Some(&bob),
            Some(org),
            json!({ "name": "Renamed" }),
        ))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body["message"],
        "User does not have permission to update organization"
    );
    Ok(())
}

#[tokio::test]
async fn removed_member_loses_access() -> Result<()> {
    let app = TestApp::new().await?;
    let (admin, _) = app.register("admin@example.com", "admin").await?;
    let org = app.first_organization(&admin).await?;
    let (bob, bob_id) = app.register("bob@example.com", "bob").await?;

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
        .send(request(Method::GET, "/api/v1/organizations/members", Some(&admin), Some(org)))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(2));

    let (status, _) = app
        .send(request(Method::GET, "/api/v1/containers", Some(&bob), Some(org)))
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(request(
            Method::DELETE,
            &format!("/api/v1/organizations/members/{bob_id}"),
            Some(&admin),
            Some(org),
        ))
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, _) = app
        .send(request(Method::GET, "/api/v1/containers", Some(&bob), Some(org)))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn permitted_writes_are_audited() -> Result<()> {
    let app = TestApp::with(test_config(), FakeEngine::with_running("c1", "web")).await?;
    let (admin, admin_id) = app.register("admin@example.com", "admin").await?;
    let org = app.first_organization(&admin).await?;

    let (status, _) = app
        .send(request(
            Method::POST,
            "/api/v1/containers/c1/restart?timeout=3",
            Some(&admin),
            Some(org),
        ))
        .await?;
    assert_eq!(status, StatusCode::OK);

    // Denied and read-only requests leave no trail.
    let (status, _) = app
        .send(request(Method::GET, "/api/v1/containers", Some(&admin), Some(org)))
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(request(Method::GET, "/api/v1/audit/logs", Some(&admin), Some(org)))
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    let items = body["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1, "{body}");
    assert_eq!(items[0]["action"], "create");
    assert_eq!(items[0]["resource_type"], "container");
    assert_eq!(items[0]["user_id"], admin_id.to_string());
    assert_eq!(body["data"]["total"], 1);
    Ok(())
}

#[tokio::test]
async fn admins_edit_role_permissions() -> Result<()> {
    let app = TestApp::new().await?;
    let (admin, _) = app.register("admin@example.com", "admin").await?;
    let org = app.first_organization(&admin).await?;

    let (status, body) = app
        .send(request(Method::GET, "/api/v1/organizations/roles", Some(&admin), Some(org)))
        .await?;
    assert_eq!(status, StatusCode::OK);
    let viewer_id = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|role| role["name"] == "viewer")
        .and_then(|role| role["id"].as_str())
        .unwrap()
        .to_string();

    let (status, body) = app
        .send(json_request(
            Method::PUT,
            &format!("/api/v1/organizations/roles/{viewer_id}/permissions"),
            Some(&admin),
            Some(org),
            json!({ "permissions": [
                { "resource": "container", "action": "read" },
                { "resource": "container", "action": "update" }
            ] }),
        ))
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"].as_array().map(Vec::len), Some(2));
    Ok(())
}

#[tokio::test]
async fn audit_rows_hide_credentials_and_skip_reads() -> Result<()> {
    let app = TestApp::new().await?;
    let (admin, admin_id) = app.register("admin@example.com", "admin").await?;
    let org = app.first_organization(&admin).await?;

    let (status, _) = app
        .send(request(Method::GET, "/api/v1/feature-flags", Some(&admin), Some(org)))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert!(AuditLog::find().all(&app.state.db).await?.is_empty());

    let (status, body) = app
        .send(json_request(
            Method::PUT,
            "/api/v1/feature-flags",
            Some(&admin),
            Some(org),
            json!({
                "feature_name": "terminal",
                "is_enabled": false,
                "secret": "s3cr3t",
                "nested": { "password": "hunter2", "note": "kept" }
            }),
        ))
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");

    let rows = AuditLog::find().all(&app.state.db).await?;
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.user_id, admin_id);
    assert_eq!(row.organization_id, org);
    assert_eq!(row.action, "update");
    assert_eq!(row.resource_type, "feature_flag");
    assert!(!row.request_id.is_empty());

    let recorded = row.new_values.clone().unwrap();
    assert_eq!(recorded["feature_name"], "terminal");
    assert_eq!(recorded["secret"], "[REDACTED]");
    assert_eq!(recorded["nested"]["password"], "[REDACTED]");
    assert_eq!(recorded["nested"]["note"], "kept");
    assert!(!recorded.to_string().contains("hunter2"));
    assert_eq!(row.metadata.clone().unwrap()["status"], 200);
    Ok(())
}
