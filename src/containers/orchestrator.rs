//! Validated container actions with bounded engine concurrency.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use utoipa::{IntoParams, ToSchema};

use super::engine::{
    ContainerDetails, ContainerEngine, ContainerSummary, EngineError, ImageFilter, ImageSummary,
    LogsQuery, PruneReport, ResourceLimits, is_protected,
};
use super::logs::decode_frames;
use crate::error::{ApiError, bad_request, internal_with_message};
use crate::models::organization;

/// Smallest memory limit the engine accepts.
pub const MIN_MEMORY_BYTES: i64 = 6 * 1024 * 1024;
const DEFAULT_PAGE_SIZE: u64 = 10;
const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Rejected resource update; surfaced as a 500 with the message.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    InvalidQuery(String),
    #[error("failed to {action}: {source}")]
    Engine {
        action: &'static str,
        #[source]
        source: EngineError,
    },
    #[error("container engine is busy")]
    Closed,
}

impl From<OrchestratorError> for ApiError {
    fn from(error: OrchestratorError) -> Self {
        match error {
            OrchestratorError::InvalidQuery(msg) => bad_request(&msg),
            OrchestratorError::Validation(msg) => internal_with_message(&msg),
            other => internal_with_message(&other.to_string()),
        }
    }
}

/// Per-organization defaults read from organization settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerDefaults {
    pub stop_timeout_secs: i64,
    pub log_tail_lines: i64,
}

impl Default for ContainerDefaults {
    fn default() -> Self {
        Self {
            stop_timeout_secs: organization::DEFAULT_CONTAINER_STOP_TIMEOUT_SECS,
            log_tail_lines: organization::DEFAULT_CONTAINER_LOG_TAIL_LINES,
        }
    }
}

impl From<&organization::Model> for ContainerDefaults {
    fn from(org: &organization::Model) -> Self {
        Self {
            stop_timeout_secs: org.container_stop_timeout(),
            log_tail_lines: org.container_log_tail_lines(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerAction {
    Start,
    Stop { timeout_secs: Option<i64> },
    Restart { timeout_secs: Option<i64> },
    Remove,
    UpdateResources(ResourceLimits),
}

impl ContainerAction {
    pub fn name(&self) -> &'static str {
        match self {
            ContainerAction::Start => "start",
            ContainerAction::Stop { .. } => "stop",
            ContainerAction::Restart { .. } => "restart",
            ContainerAction::Remove => "remove",
            ContainerAction::UpdateResources(_) => "update",
        }
    }

    fn past_tense(&self) -> &'static str {
        match self {
            ContainerAction::Start => "started",
            ContainerAction::Stop { .. } => "stopped",
            ContainerAction::Restart { .. } => "restarted",
            ContainerAction::Remove => "removed",
            ContainerAction::UpdateResources(_) => "updated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct ActionOutcome {
    pub success: bool,
    pub container_id: String,
    pub message: String,
    /// Container state after the action, or the unchanged state when skipped
    pub status: String,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListContainersQuery {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    pub search: Option<String>,
    /// `name`, `status` or `created`
    pub sort_by: Option<String>,
    /// `asc` or `desc`
    pub sort_order: Option<String>,
    pub status: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ContainerPage {
    pub containers: Vec<ContainerSummary>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LogsRequest {
    #[serde(default)]
    pub follow: bool,
    pub tail: Option<i64>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub stdout: Option<bool>,
    pub stderr: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortKey {
    Name,
    Status,
    Created,
}

/// Runs container operations against one engine.
pub struct ContainerOrchestrator {
    engine: Arc<dyn ContainerEngine>,
    permits: Semaphore,
    call_timeout: Duration,
}

impl ContainerOrchestrator {
    pub fn new(engine: Arc<dyn ContainerEngine>, max_concurrency: usize, call_timeout: Duration) -> Self {
        Self {
            engine,
            permits: Semaphore::new(max_concurrency.max(1)),
            call_timeout,
        }
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    async fn call<T, F>(&self, action: &'static str, fut: F) -> Result<T, OrchestratorError>
    where
        F: std::future::Future<Output = Result<T, EngineError>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| OrchestratorError::Closed)?;
        let started = Instant::now();
        let result = match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout),
        };
        metrics::histogram!("container_engine_action_seconds", "action" => action)
            .record(started.elapsed().as_secs_f64());
        result.map_err(|source| OrchestratorError::Engine { action, source })
    }

    pub async fn ping(&self) -> Result<(), OrchestratorError> {
        self.call("ping engine", self.engine.ping()).await
    }

    pub async fn list(&self, query: &ListContainersQuery) -> Result<ContainerPage, OrchestratorError> {
        let sort_key = match query.sort_by.as_deref().unwrap_or("name") {
            "name" => SortKey::Name,
            "status" => SortKey::Status,
            "created" => SortKey::Created,
            other => {
                return Err(OrchestratorError::InvalidQuery(format!(
                    "invalid sort_by '{other}': expected name, status or created"
                )));
            }
        };
        let descending = match query.sort_order.as_deref().unwrap_or("asc") {
            "asc" => false,
            "desc" => true,
            other => {
                return Err(OrchestratorError::InvalidQuery(format!(
                    "invalid sort_order '{other}': expected asc or desc"
                )));
            }
        };
        let page = query.page.unwrap_or(1).max(1);
        let page_size = query
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        let containers = self
            .call("list containers", self.engine.list_containers())
            .await?;
        let mut matching: Vec<ContainerSummary> = containers
            .into_iter()
            .filter(|c| matches_query(c, query))
            .collect();

        matching.sort_by(|a, b| {
            let ordering = compare(a, b, sort_key);
            let ordering = if descending { ordering.reverse() } else { ordering };
            ordering.then_with(|| a.id.cmp(&b.id))
        });

        let total = matching.len() as u64;
        let start = ((page - 1) * page_size).min(total) as usize;
        let end = (start + page_size as usize).min(matching.len());
        Ok(ContainerPage {
            containers: matching[start..end].to_vec(),
            total,
            page,
            page_size,
        })
    }

    pub async fn get(&self, id: &str) -> Result<ContainerDetails, OrchestratorError> {
        self.call("inspect container", self.engine.inspect_container(id))
            .await
    }

    /// Apply `action` unless the container is platform infrastructure.
    pub async fn perform(
        &self,
        id: &str,
        action: ContainerAction,
        defaults: ContainerDefaults,
    ) -> Result<ActionOutcome, OrchestratorError> {
        let details = self.get(id).await?;
        if is_protected(&details.labels) {
            tracing::info!(container_id = %id, action = action.name(), "skipping protected container");
            return Ok(ActionOutcome {
                success: false,
                container_id: details.id,
                message: format!(
                    "Container {} is protected and was not {}",
                    details.name,
                    action.past_tense()
                ),
                status: details.state,
            });
        }

        match action {
            ContainerAction::Start => {
                self.call("start container", self.engine.start_container(id))
                    .await?
            }
            ContainerAction::Stop { timeout_secs } => {
                let timeout = timeout_secs.unwrap_or(defaults.stop_timeout_secs);
                self.call("stop container", self.engine.stop_container(id, timeout))
                    .await?
            }
            ContainerAction::Restart { timeout_secs } => {
                let timeout = timeout_secs.unwrap_or(defaults.stop_timeout_secs);
                self.call(
                    "restart container",
                    self.engine.restart_container(id, timeout),
                )
                .await?
            }
            ContainerAction::Remove => {
                self.call("remove container", self.engine.remove_container(id, true))
                    .await?;
                return Ok(ActionOutcome {
                    success: true,
                    container_id: details.id,
                    message: "Container removed successfully".to_string(),
                    status: "removed".to_string(),
                });
            }
            ContainerAction::UpdateResources(limits) => {
                validate_limits(&limits)?;
                if !details.running {
                    return Err(OrchestratorError::Validation(
                        "container must be running to update resources".to_string(),
                    ));
                }
                self.call(
                    "update container resources",
                    self.engine.update_resources(id, limits),
                )
                .await?
            }
        }

        let status = self.get(id).await.map(|d| d.state).unwrap_or_default();
        Ok(ActionOutcome {
            success: true,
            container_id: details.id,
            message: format!("Container {} successfully", action.past_tense()),
            status,
        })
    }

    pub async fn logs(
        &self,
        id: &str,
        request: &LogsRequest,
        defaults: ContainerDefaults,
    ) -> Result<String, OrchestratorError> {
        let query = LogsQuery {
            follow: request.follow,
            tail: request.tail.unwrap_or(defaults.log_tail_lines),
            since: log_timestamp("since", request.since)?,
            until: log_timestamp("until", request.until)?,
            stdout: request.stdout.unwrap_or(true),
            stderr: request.stderr.unwrap_or(true),
        };
        let frames = self
            .call("read container logs", self.engine.container_logs(id, &query))
            .await?;
        Ok(decode_frames(&frames))
    }

    pub async fn images(&self, filter: &ImageFilter) -> Result<Vec<ImageSummary>, OrchestratorError> {
        self.call("list images", self.engine.list_images(filter))
            .await
    }

    pub async fn prune_images(&self, filter: &ImageFilter) -> Result<PruneReport, OrchestratorError> {
        self.call("prune images", self.engine.prune_images(filter))
            .await
    }

    pub async fn prune_build_cache(
        &self,
        filter: &ImageFilter,
    ) -> Result<PruneReport, OrchestratorError> {
        self.call("prune build cache", self.engine.prune_build_cache(filter))
            .await
    }
}

/// Check resource limits before they reach the engine.
/// Engine log bounds are 32-bit unix seconds.
fn log_timestamp(name: &str, value: Option<i64>) -> Result<i64, OrchestratorError> {
    match value.unwrap_or(0) {
        secs @ 0..=0x7fff_ffff => Ok(secs),
        _ => Err(OrchestratorError::InvalidQuery(format!(
            "{name} must be a unix timestamp between 0 and {}",
            i32::MAX
        ))),
    }
}

pub fn validate_limits(limits: &ResourceLimits) -> Result<(), OrchestratorError> {
    if limits.memory != 0 && limits.memory < MIN_MEMORY_BYTES {
        return Err(OrchestratorError::Validation(
            "memory must be 0 or >= 6MB".to_string(),
        ));
    }
    if limits.memory_swap != 0 && limits.memory_swap != -1 && limits.memory_swap < limits.memory {
        return Err(OrchestratorError::Validation(
            "memory_swap must be >= memory, 0 (unlimited), or -1 (unlimited swap)".to_string(),
        ));
    }
    if limits.cpu_shares != 0 && limits.cpu_shares < 2 {
        return Err(OrchestratorError::Validation(
            "cpu_shares must be 0 or >= 2".to_string(),
        ));
    }
    Ok(())
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn matches_query(container: &ContainerSummary, query: &ListContainersQuery) -> bool {
    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty())
        && !(contains_ci(&container.name, search)
            || contains_ci(&container.image, search)
            || container.id.starts_with(search))
    {
        return false;
    }
    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty())
        && !container.state.eq_ignore_ascii_case(status)
    {
        return false;
    }
    if let Some(name) = query.name.as_deref().filter(|s| !s.is_empty())
        && !contains_ci(&container.name, name)
    {
        return false;
    }
    if let Some(image) = query.image.as_deref().filter(|s| !s.is_empty())
        && !contains_ci(&container.image, image)
    {
        return false;
    }
    true
}

fn compare(a: &ContainerSummary, b: &ContainerSummary, key: SortKey) -> Ordering {
    match key {
        SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        SortKey::Status => a.state.cmp(&b.state),
        SortKey::Created => a.created.cmp(&b.created),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::containers::engine::{COMPOSE_SERVICE_LABEL, INFRA_LABEL};
    use crate::containers::logs::{STDERR, STDOUT, encode_frame};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeEngine {
        containers: Mutex<Vec<(ContainerSummary, bool)>>,
        calls: Mutex<Vec<String>>,
        last_logs_query: Mutex<Option<LogsQuery>>,
    }

    impl FakeEngine {
        fn with(containers: Vec<(ContainerSummary, bool)>) -> Self {
            Self {
                containers: Mutex::new(containers),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    fn summary(id: &str, name: &str, state: &str, created: i64) -> ContainerSummary {
        ContainerSummary {
            id: id.to_string(),
            name: name.to_string(),
            image: format!("{name}:latest"),
            state: state.to_string(),
            status: state.to_string(),
            created,
            labels: HashMap::new(),
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
                .map(|(c, _)| c.clone())
                .collect())
        }

        async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, EngineError> {
            let containers = self.containers.lock().unwrap();
            let (c, running) = containers
                .iter()
                .find(|(c, _)| c.id == id)
                .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
            Ok(ContainerDetails {
                id: c.id.clone(),
                name: c.name.clone(),
                image: c.image.clone(),
                state: c.state.clone(),
                running: *running,
                created: String::new(),
                labels: c.labels.clone(),
                memory: 0,
                memory_swap: 0,
                cpu_shares: 0,
            })
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
            self.record(format!("update {id} {}", limits.memory));
            Ok(())
        }

        async fn container_logs(&self, _id: &str, query: &LogsQuery) -> Result<Vec<u8>, EngineError> {
            *self.last_logs_query.lock().unwrap() = Some(query.clone());
            let mut frames = Vec::new();
            encode_frame(&mut frames, STDOUT, b"ready\n");
            encode_frame(&mut frames, STDERR, b"warning\n");
            Ok(frames)
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

    fn orchestrator(engine: Arc<FakeEngine>) -> ContainerOrchestrator {
        ContainerOrchestrator::new(engine, 2, Duration::from_secs(5))
    }

    #[test]
    fn limit_boundaries() {
        let mib = 1024 * 1024;
        let limits = |memory, memory_swap, cpu_shares| ResourceLimits {
            memory,
            memory_swap,
            cpu_shares,
        };

        assert!(validate_limits(&limits(0, 0, 0)).is_ok());
        assert!(validate_limits(&limits(6 * mib, -1, 2)).is_ok());

        let err = validate_limits(&limits(5 * mib, 0, 0)).unwrap_err();
        assert_eq!(err.to_string(), "memory must be 0 or >= 6MB");

        let err = validate_limits(&limits(64 * mib, 64 * mib - 1, 0)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "memory_swap must be >= memory, 0 (unlimited), or -1 (unlimited swap)"
        );

        assert!(validate_limits(&limits(0, 0, 1)).is_err());
    }

    #[test]
    fn validation_errors_render_as_server_errors() {
        let api: ApiError = OrchestratorError::Validation("memory must be 0 or >= 6MB".into()).into();
        assert_eq!(api.status, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.message.as_ref(), "memory must be 0 or >= 6MB");
    }

    #[tokio::test]
    async fn list_filters_sorts_and_pages() {
        let engine = Arc::new(FakeEngine::with(vec![
            (summary("c3", "web", "running", 30), true),
            (summary("c1", "api", "running", 10), true),
            (summary("c2", "worker", "exited", 20), false),
        ]));
        let orchestrator = orchestrator(engine);

        let page = orchestrator
            .list(&ListContainersQuery {
                sort_by: Some("created".into()),
                sort_order: Some("desc".into()),
                page_size: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<_> = page.containers.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c3", "c2"]);
        assert_eq!(page.total, 3);

        let second = orchestrator
            .list(&ListContainersQuery {
                sort_by: Some("created".into()),
                sort_order: Some("desc".into()),
                page: Some(2),
                page_size: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(second.containers.len(), 1);
        assert_eq!(second.containers[0].id, "c1");

        let running = orchestrator
            .list(&ListContainersQuery {
                status: Some("running".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let names: Vec<_> = running.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["api", "web"]);

        let bad = orchestrator
            .list(&ListContainersQuery {
                sort_by: Some("size".into()),
                ..Default::default()
            })
            .await;
        assert!(matches!(bad, Err(OrchestratorError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn protected_containers_are_skipped() {
        let mut infra = summary("db1", "nixopus-db", "running", 1);
        infra
            .labels
            .insert(COMPOSE_SERVICE_LABEL.to_string(), "nixopus-db".to_string());
        let mut labelled = summary("x1", "proxy", "running", 2);
        labelled
            .labels
            .insert(INFRA_LABEL.to_string(), "true".to_string());
        let engine = Arc::new(FakeEngine::with(vec![(infra, true), (labelled, true)]));
        let orchestrator = orchestrator(engine.clone());

        let outcome = orchestrator
            .perform("db1", ContainerAction::Stop { timeout_secs: None }, ContainerDefaults::default())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.status, "running");
        assert!(outcome.message.contains("protected"));

        let outcome = orchestrator
            .perform("x1", ContainerAction::Remove, ContainerDefaults::default())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn stop_uses_organization_default_timeout() {
        let engine = Arc::new(FakeEngine::with(vec![(summary("c1", "web", "running", 1), true)]));
        let orchestrator = orchestrator(engine.clone());
        let defaults = ContainerDefaults {
            stop_timeout_secs: 42,
            log_tail_lines: 100,
        };

        let outcome = orchestrator
            .perform("c1", ContainerAction::Stop { timeout_secs: None }, defaults)
            .await
            .unwrap();
        assert!(outcome.success);
        orchestrator
            .perform("c1", ContainerAction::Restart { timeout_secs: Some(3) }, defaults)
            .await
            .unwrap();
        assert_eq!(engine.calls(), vec!["stop c1 42", "restart c1 3"]);
    }

    #[tokio::test]
    async fn update_requires_valid_limits_and_running_container() {
        let engine = Arc::new(FakeEngine::with(vec![
            (summary("up", "web", "running", 1), true),
            (summary("down", "job", "exited", 2), false),
        ]));
        let orchestrator = orchestrator(engine.clone());
        let limits = ResourceLimits {
            memory: 5 * 1024 * 1024,
            memory_swap: 0,
            cpu_shares: 0,
        };

        let err = orchestrator
            .perform("up", ContainerAction::UpdateResources(limits), ContainerDefaults::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "memory must be 0 or >= 6MB");

        let err = orchestrator
            .perform(
                "down",
                ContainerAction::UpdateResources(ResourceLimits::default()),
                ContainerDefaults::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert!(engine.calls().is_empty());

        let ok = orchestrator
            .perform(
                "up",
                ContainerAction::UpdateResources(ResourceLimits {
                    memory: 64 * 1024 * 1024,
                    memory_swap: -1,
                    cpu_shares: 512,
                }),
                ContainerDefaults::default(),
            )
            .await
            .unwrap();
        assert!(ok.success);
    }

    #[tokio::test]
    async fn missing_container_is_an_engine_error() {
        let orchestrator = orchestrator(Arc::new(FakeEngine::default()));
        let err = orchestrator.get("nope").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Engine {
                source: EngineError::NotFound(_),
                ..
            }
        ));
        let api: ApiError = err.into();
        assert_eq!(api.status, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert!(api.message.contains("not found"));
    }

    #[tokio::test]
    async fn logs_use_default_tail_and_decode_frames() {
        let engine = Arc::new(FakeEngine::default());
        let orchestrator = orchestrator(engine.clone());

        let text = orchestrator
            .logs("c1", &LogsRequest::default(), ContainerDefaults::default())
            .await
            .unwrap();
        assert_eq!(text, "ready\nwarning\n");
        let query = engine.last_logs_query.lock().unwrap().clone().unwrap();
        assert_eq!(query.tail, 100);
        assert!(query.stdout && query.stderr);
    }

    #[tokio::test]
    async fn logs_reject_out_of_range_timestamps() {
        let engine = Arc::new(FakeEngine::default());
        let orchestrator = orchestrator(engine.clone());

        let request = LogsRequest {
            since: Some(i64::from(i32::MAX) + 1),
            ..Default::default()
        };
        let err = orchestrator
            .logs("c1", &request, ContainerDefaults::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidQuery(ref msg) if msg.starts_with("since")));

        let request = LogsRequest {
            until: Some(-5),
            ..Default::default()
        };
        assert!(orchestrator
            .logs("c1", &request, ContainerDefaults::default())
            .await
            .is_err());
        assert!(engine.last_logs_query.lock().unwrap().is_none());
    }
}
