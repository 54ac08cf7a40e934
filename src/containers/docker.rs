//! [`ContainerEngine`] over the Docker Engine API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::errors::Error as BollardError;
use bollard::models::ContainerUpdateBody;
use bollard::query_parameters::{
    InspectContainerOptions, ListContainersOptions, ListImagesOptions, LogsOptions,
    PruneBuildOptions, PruneImagesOptions, RemoveContainerOptions, RestartContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::container::LogOutput;
use futures_util::StreamExt;
use serde_json::Value;

use super::engine::{
    ContainerDetails, ContainerEngine, ContainerSummary, EngineError, ImageFilter, ImageSummary,
    LogsQuery, PruneReport, ResourceLimits,
};
use super::logs::{STDERR, STDOUT, encode_frame};

/// Follow-mode log streams are cut off after this long.
const FOLLOW_CAP: Duration = Duration::from_secs(30);

pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect to `docker_host` (`unix://` path) or the platform default.
    pub fn connect(docker_host: Option<&str>, timeout_secs: u64) -> Result<Self, EngineError> {
        let docker = match docker_host {
            Some(host) => {
                let path = host.strip_prefix("unix://").unwrap_or(host);
                Docker::connect_with_socket(path, timeout_secs, bollard::API_DEFAULT_VERSION)
            }
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Connect through a local socket, e.g. an SSH tunnel endpoint.
    pub fn connect_socket(path: &str, timeout_secs: u64) -> Result<Self, EngineError> {
        Self::connect(Some(path), timeout_secs)
    }
}

fn map_error(id: &str, error: BollardError) -> EngineError {
    match error {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => EngineError::NotFound(id.to_string()),
        BollardError::DockerResponseServerError {
            status_code: 304 | 409,
            message,
        } => EngineError::Conflict(message),
        BollardError::DockerResponseServerError { message, .. } => EngineError::Other(message),
        BollardError::RequestTimeoutError => EngineError::Timeout,
        other => {
            tracing::warn!(error = %other, "engine transport failure");
            EngineError::Unavailable("engine connection failed".to_string())
        }
    }
}

fn unix_seconds(name: &str, secs: i64) -> Result<i32, EngineError> {
    i32::try_from(secs).map_err(|_| EngineError::Other(format!("{name} {secs} is out of range")))
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn i64_field(value: &Value, key: &str) -> i64 {
    value.get(key).and_then(Value::as_i64).unwrap_or_default()
}

fn labels_field(value: &Value) -> HashMap<String, String> {
    value
        .get("Labels")
        .and_then(Value::as_object)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn summary_from_value(value: &Value) -> ContainerSummary {
    let name = value
        .get("Names")
        .and_then(Value::as_array)
        .and_then(|names| names.first())
        .and_then(Value::as_str)
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();
    ContainerSummary {
        id: str_field(value, "Id"),
        name,
        image: str_field(value, "Image"),
        state: str_field(value, "State"),
        status: str_field(value, "Status"),
        created: i64_field(value, "Created"),
        labels: labels_field(value),
    }
}

fn details_from_value(value: &Value) -> ContainerDetails {
    let null = Value::Null;
    let config = value.get("Config").unwrap_or(&null);
    let state = value.get("State").unwrap_or(&null);
    let host = value.get("HostConfig").unwrap_or(&null);
    ContainerDetails {
        id: str_field(value, "Id"),
        name: str_field(value, "Name").trim_start_matches('/').to_string(),
        image: str_field(config, "Image"),
        state: str_field(state, "Status"),
        running: state
            .get("Running")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        created: str_field(value, "Created"),
        labels: labels_field(config),
        memory: i64_field(host, "Memory"),
        memory_swap: i64_field(host, "MemorySwap"),
        cpu_shares: i64_field(host, "CpuShares"),
    }
}

fn image_from_value(value: &Value) -> ImageSummary {
    ImageSummary {
        id: str_field(value, "Id"),
        repo_tags: value
            .get("RepoTags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        size: i64_field(value, "Size"),
        created: i64_field(value, "Created"),
        labels: labels_field(value),
    }
}

fn prune_from_value(value: &Value, deleted_key: &str) -> PruneReport {
    let deleted = value
        .get(deleted_key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(map) => map
                        .get("Deleted")
                        .or_else(|| map.get("Untagged"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    PruneReport {
        deleted,
        space_reclaimed: i64_field(value, "SpaceReclaimed"),
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| map_error("", e))
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, EngineError> {
        let options = ListContainersOptions {
            all: true,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| map_error("", e))?;
        Ok(containers
            .iter()
            .map(|c| summary_from_value(&to_value(c)))
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, EngineError> {
        let inspected = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_error(id, e))?;
        Ok(details_from_value(&to_value(&inspected)))
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| map_error(id, e))
    }

    async fn stop_container(&self, id: &str, timeout_secs: i64) -> Result<(), EngineError> {
        let options = StopContainerOptions {
            t: Some(i32::try_from(timeout_secs).unwrap_or(i32::MAX)),
            ..Default::default()
        };
        self.docker
            .stop_container(id, Some(options))
            .await
            .map_err(|e| map_error(id, e))
    }

    async fn restart_container(&self, id: &str, timeout_secs: i64) -> Result<(), EngineError> {
        let options = RestartContainerOptions {
            t: Some(i32::try_from(timeout_secs).unwrap_or(i32::MAX)),
            ..Default::default()
        };
        self.docker
            .restart_container(id, Some(options))
            .await
            .map_err(|e| map_error(id, e))
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| map_error(id, e))
    }

    async fn update_resources(&self, id: &str, limits: ResourceLimits) -> Result<(), EngineError> {
        let body = ContainerUpdateBody {
            memory: Some(limits.memory),
            memory_swap: Some(limits.memory_swap),
            cpu_shares: Some(limits.cpu_shares),
            ..Default::default()
        };
        self.docker
            .update_container(id, body)
            .await
            .map(|_| ())
            .map_err(|e| map_error(id, e))
    }

    async fn container_logs(&self, id: &str, query: &LogsQuery) -> Result<Vec<u8>, EngineError> {
        let options = LogsOptions {
            follow: query.follow,
            stdout: query.stdout,
            stderr: query.stderr,
            since: unix_seconds("since", query.since)?,
            until: unix_seconds("until", query.until)?,
            tail: if query.tail > 0 {
                query.tail.to_string()
            } else {
                "all".to_string()
            },
            ..Default::default()
        };
        let mut stream = self.docker.logs(id, Some(options));
        let mut frames = Vec::new();
        let deadline = tokio::time::Instant::now() + FOLLOW_CAP;

        loop {
            let next = if query.follow {
                match tokio::time::timeout_at(deadline, stream.next()).await {
                    Ok(next) => next,
                    Err(_) => break,
                }
            } else {
                stream.next().await
            };
            match next {
                Some(Ok(LogOutput::StdOut { message })) => {
                    encode_frame(&mut frames, STDOUT, &message)
                }
                Some(Ok(LogOutput::StdErr { message })) => {
                    encode_frame(&mut frames, STDERR, &message)
                }
                Some(Ok(LogOutput::Console { message })) => {
                    encode_frame(&mut frames, STDOUT, &message)
                }
                Some(Ok(LogOutput::StdIn { .. })) => {}
                Some(Err(e)) => return Err(map_error(id, e)),
                None => break,
            }
        }
        Ok(frames)
    }

    async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<ImageSummary>, EngineError> {
        let options = ListImagesOptions {
            all: filter.all,
            filters: Some(filter.to_engine_filters()),
            ..Default::default()
        };
        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(|e| map_error("", e))?;
        Ok(images
            .iter()
            .map(|image| image_from_value(&to_value(image)))
            .collect())
    }

    async fn prune_images(&self, filter: &ImageFilter) -> Result<PruneReport, EngineError> {
        let options = PruneImagesOptions {
            filters: Some(filter.to_engine_filters()),
        };
        let pruned = self
            .docker
            .prune_images(Some(options))
            .await
            .map_err(|e| map_error("", e))?;
        Ok(prune_from_value(&to_value(&pruned), "ImagesDeleted"))
    }

    async fn prune_build_cache(&self, filter: &ImageFilter) -> Result<PruneReport, EngineError> {
        let mut filters = filter.to_engine_filters();
        filters.remove("dangling");
        let options = PruneBuildOptions {
            all: Some(filter.all),
            filters: Some(filters),
            ..Default::default()
        };
        let pruned = self
            .docker
            .prune_build(Some(options))
            .await
            .map_err(|e| map_error("", e))?;
        Ok(prune_from_value(&to_value(&pruned), "CachesDeleted"))
    }
}
