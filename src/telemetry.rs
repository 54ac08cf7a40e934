//! Tracing subscriber setup and the request-id context shared by the admission pipeline.

use std::any::type_name_of_val;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use log::LevelFilter;
use thiserror::Error;
use tokio::task_local;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};
use uuid::Uuid;

use crate::config::AppConfig;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Identifies one inbound request across every pipeline stage, the handler and the audit row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

task_local! {
    static ACTIVE_REQUEST_ID: RequestId;
}

/// Errors that can occur while initializing global telemetry.
#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install log tracer bridge: {0}")]
    LogTracer(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static TELEMETRY_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize global tracing exactly once, routing `log::` records (sqlx, sea-orm) through it.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if TELEMETRY_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        let logger_type = type_name_of_val(log::logger());
        if !logger_type.contains("LogTracer") {
            eprintln!("Warning: failed to install log tracer bridge: {err}");
        }
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        _ => fmt::layer().json().boxed(),
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        TELEMETRY_INITIALIZED.store(false, Ordering::SeqCst);
        eprintln!("Warning: failed to set global tracing subscriber: {err}");
    }

    Ok(())
}

/// Run `future` with `request_id` visible through [`current_request_id`].
pub async fn with_request_id<Fut, R>(request_id: RequestId, future: Fut) -> R
where
    Fut: std::future::Future<Output = R>,
{
    ACTIVE_REQUEST_ID.scope(request_id, future).await
}

/// The request id of the running task, if any.
pub fn current_request_id() -> Option<String> {
    ACTIVE_REQUEST_ID.try_with(|id| id.0.clone()).ok()
}

/// Outermost stage: assigns the request id, measures duration and body size.
///
/// The id is stored as a request extension, scoped task-locally for error
/// envelopes and echoed in `X-Request-Id`.
pub async fn request_context(mut request: Request, next: Next) -> Response {
    let request_id = RequestId::generate();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_bytes = content_length(request.headers());
    request.extensions_mut().insert(request_id.clone());

    let started = Instant::now();
    let mut response = with_request_id(request_id.clone(), next.run(request)).await;
    let elapsed = started.elapsed();

    let status = response.status().as_u16();
    tracing::info!(
        request_id = %request_id.0,
        %method,
        path = %path,
        status,
        duration_ms = elapsed.as_millis() as u64,
        request_bytes,
        response_bytes = content_length(response.headers()),
        "request completed"
    );
    metrics::histogram!("http_request_duration_seconds", "status" => status.to_string())
        .record(elapsed.as_secs_f64());

    if let Ok(value) = HeaderValue::from_str(&request_id.0) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn content_length(headers: &axum::http::HeaderMap) -> u64 {
    headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}
