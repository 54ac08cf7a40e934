//! Container engine abstraction.
//!
//! The orchestrator talks to the engine only through [`ContainerEngine`];
//! the Docker adapter implements it over a local or tunneled socket and
//! tests substitute an in-memory fake.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::{IntoParams, ToSchema};

/// Label marking platform infrastructure containers
pub const INFRA_LABEL: &str = "com.nixopus.infra";
pub const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";
/// Compose services that run the platform itself
pub const PROTECTED_SERVICES: &[&str] = &[
    "nixopus-api",
    "nixopus-db",
    "nixopus-redis",
    "nixopus-caddy",
    "nixopus-view",
];

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("container {0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("container engine unavailable: {0}")]
    Unavailable(String),
    #[error("container engine call timed out")]
    Timeout,
    #[error("container engine error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Engine state, e.g. `running`, `exited`
    pub state: String,
    /// Human readable status, e.g. `Up 2 hours`
    pub status: String,
    /// Unix seconds
    pub created: i64,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub running: bool,
    pub created: String,
    pub labels: HashMap<String, String>,
    pub memory: i64,
    pub memory_swap: i64,
    pub cpu_shares: i64,
}

/// Resource limits applied by an update. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct ResourceLimits {
    #[serde(default)]
    pub memory: i64,
    #[serde(default)]
    pub memory_swap: i64,
    #[serde(default)]
    pub cpu_shares: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogsQuery {
    pub follow: bool,
    pub tail: i64,
    pub since: i64,
    pub until: i64,
    pub stdout: bool,
    pub stderr: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct ImageSummary {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub size: i64,
    pub created: i64,
    pub labels: HashMap<String, String>,
}

/// Filters accepted by image listing and pruning
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, IntoParams, PartialEq, Eq)]
#[into_params(parameter_in = Query)]
pub struct ImageFilter {
    /// `key` or `key=value`
    pub label: Option<String>,
    /// Timestamp or duration accepted by the engine
    pub until: Option<String>,
    pub dangling: Option<bool>,
    #[serde(default)]
    pub all: bool,
}

impl ImageFilter {
    pub fn to_engine_filters(&self) -> HashMap<String, Vec<String>> {
        let mut filters = HashMap::new();
        if let Some(label) = self.label.as_ref().filter(|l| !l.is_empty()) {
            filters.insert("label".to_string(), vec![label.clone()]);
        }
        if let Some(until) = self.until.as_ref().filter(|u| !u.is_empty()) {
            filters.insert("until".to_string(), vec![until.clone()]);
        }
        if let Some(dangling) = self.dangling {
            filters.insert("dangling".to_string(), vec![dangling.to_string()]);
        }
        filters
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct PruneReport {
    pub deleted: Vec<String>,
    pub space_reclaimed: i64,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn ping(&self) -> Result<(), EngineError>;

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, EngineError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    async fn stop_container(&self, id: &str, timeout_secs: i64) -> Result<(), EngineError>;

    async fn restart_container(&self, id: &str, timeout_secs: i64) -> Result<(), EngineError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError>;

    async fn update_resources(&self, id: &str, limits: ResourceLimits) -> Result<(), EngineError>;

    /// Raw multiplexed log frames, see [`super::logs`].
    async fn container_logs(&self, id: &str, query: &LogsQuery) -> Result<Vec<u8>, EngineError>;

    async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<ImageSummary>, EngineError>;

    async fn prune_images(&self, filter: &ImageFilter) -> Result<PruneReport, EngineError>;

    async fn prune_build_cache(&self, filter: &ImageFilter) -> Result<PruneReport, EngineError>;
}

/// Platform infrastructure that actions must never touch.
pub fn is_protected(labels: &HashMap<String, String>) -> bool {
    if labels.get(INFRA_LABEL).is_some_and(|v| v == "true") {
        return true;
    }
    labels
        .get(COMPOSE_SERVICE_LABEL)
        .is_some_and(|service| PROTECTED_SERVICES.contains(&service.as_str()))
}
