//! Test utilities for driving the API router against an in-memory database.
//!
//! Every test gets its own SQLite database with the real SQL migrations
//! applied and the default roles seeded, plus a fake container engine.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use nixopus::{
    config::AppConfig,
    containers::{
        ContainerEngine, EngineError,
        engine::{
            ContainerDetails, ContainerSummary, ImageFilter, ImageSummary, LogsQuery, PruneReport,
            ResourceLimits,
        },
    },
    db,
    notifications::{Notification, NotificationQueue},
    seeds,
    server::{AppState, create_app},
};
use sea_orm::{Database, DatabaseConnection};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const PASSWORD: &str = "Sup3r-secret-pass";

pub fn migrations_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations")
}

/// Sets up an in-memory SQLite database with all migrations applied and
/// the default roles seeded.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    db::run_migrations(&db, migrations_dir()).await?;
    seeds::seed_roles(&db).await?;
    Ok(db)
}

/// Configuration with a rate limit generous enough not to interfere.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.profile = "test".to_string();
    config.admission.rate_limit_capacity = 1000;
    config.admission.rate_limit_refill_per_second = 1000.0;
    config
}

/// Engine whose containers live in memory; actions are recorded.
#[derive(Default)]
pub struct FakeEngine {
    containers: Mutex<Vec<ContainerDetails>>,
    calls: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn with_running(id: &str, name: &str) -> Self {
        let engine = Self::default();
        engine.add(id, name, true, HashMap::new());
        engine
    }

    pub fn add(&self, id: &str, name: &str, running: bool, labels: HashMap<String, String>) {
        self.containers.lock().unwrap().push(ContainerDetails {
            id: id.to_string(),
            name: name.to_string(),
            image: format!("{name}:latest"),
            state: if running { "running" } else { "exited" }.to_string(),
            running,
            created: "2025-01-01T00:00:00Z".to_string(),
            labels,
            memory: 0,
            memory_swap: 0,
            cpu_shares: 0,
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn find(&self, id: &str) -> Result<ContainerDetails, EngineError> {
        self.containers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id || c.name == id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, EngineError> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .iter()
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                name: c.name.clone(),
                image: c.image.clone(),
                state: c.state.clone(),
                status: c.state.clone(),
                created: 0,
                labels: c.labels.clone(),
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, EngineError> {
        self.find(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.record(format!("start {id}"));
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout_secs: i64) -> Result<(), EngineError> {
        self.record(format!("stop {id} {timeout_secs}"));
        Ok(())
    }

    async fn restart_container(&self, id: &str, timeout_secs: i64) -> Result<(), EngineError> {
        self.record(format!("restart {id} {timeout_secs}"));
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError> {
        self.record(format!("remove {id} {force}"));
        Ok(())
    }

    async fn update_resources(&self, id: &str, limits: ResourceLimits) -> Result<(), EngineError> {
        self.record(format!(
            "update {id} {} {} {}",
            limits.memory, limits.memory_swap, limits.cpu_shares
        ));
        Ok(())
    }

    async fn container_logs(&self, _id: &str, _query: &LogsQuery) -> Result<Vec<u8>, EngineError> {
        Ok(Vec::new())
    }

    async fn list_images(&self, _filter: &ImageFilter) -> Result<Vec<ImageSummary>, EngineError> {
        Ok(Vec::new())
    }

    async fn prune_images(&self, _filter: &ImageFilter) -> Result<PruneReport, EngineError> {
        Ok(PruneReport::default())
    }

    async fn prune_build_cache(&self, _filter: &ImageFilter) -> Result<PruneReport, EngineError> {
        Ok(PruneReport::default())
    }
}

/// A router wired to a fresh database and a fake engine.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub engine: Arc<FakeEngine>,
    pub notifications: mpsc::Receiver<Notification>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        Self::with(test_config(), FakeEngine::default()).await
    }

    pub async fn with(config: AppConfig, engine: FakeEngine) -> Result<Self> {
        let db = setup_test_db().await?;
        let engine = Arc::new(engine);
        let (queue, notifications) = NotificationQueue::channel(64);
        let state = AppState::build(config, db, engine.clone(), queue)?;
        Ok(Self {
            router: create_app(state.clone()),
            state,
            engine,
            notifications,
        })
    }

    /// Send a request and decode the JSON body (`Null` when empty).
    pub async fn send(&self, request: Request<Body>) -> Result<(StatusCode, Value)> {
        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, body))
    }

    /// Register an account and return `(access_token, user_id)`.
    pub async fn register(&self, email: &str, username: &str) -> Result<(String, Uuid)> {
        let (status, body) = self
            .send(json_request(
                Method::POST,
                "/api/v1/auth/register",
                None,
                None,
                serde_json::json!({ "email": email, "password": PASSWORD, "username": username }),
            ))
            .await?;
        if status != StatusCode::CREATED {
            return Err(anyhow!("register failed with {status}: {body}"));
        }
        let token = body["data"]["access_token"]
            .as_str()
            .ok_or_else(|| anyhow!("missing access token: {body}"))?
            .to_string();
        let user_id = body["data"]["user"]["id"]
            .as_str()
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| anyhow!("missing user id: {body}"))?;
        Ok((token, user_id))
    }

    /// The first organization the token's user belongs to.
    pub async fn first_organization(&self, token: &str) -> Result<Uuid> {
        let (status, body) = self
            .send(request(Method::GET, "/api/v1/user/organizations", Some(token), None))
            .await?;
        if status != StatusCode::OK {
            return Err(anyhow!("listing organizations failed with {status}: {body}"));
        }
        body["data"][0]["organization"]["id"]
            .as_str()
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| anyhow!("no organization: {body}"))
    }
}

pub fn request(method: Method, uri: &str, token: Option<&str>, org: Option<Uuid>) -> Request<Body> {
    builder(method, uri, token, org).body(Body::empty()).unwrap()
}

pub fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    org: Option<Uuid>,
    body: Value,
) -> Request<Body> {
    builder(method, uri, token, org)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn builder(
    method: Method,
    uri: &str,
    token: Option<&str>,
    org: Option<Uuid>,
) -> axum::http::request::Builder {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    if let Some(org) = org {
        builder = builder.header("X-Organization-Id", org.to_string());
    }
    builder
}
