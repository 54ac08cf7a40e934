//! # Server Configuration
//!
//! Shared application state, the router with its admission pipeline, and the
//! serve loop with its background maintenance tasks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, patch, post, put},
};
use sea_orm::DatabaseConnection;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::{ApiKeyCache, ApiKeyService, AuthService, JwtKeys, MembershipCache, UserCache};
use crate::auth::cache::TtlCache;
use crate::config::AppConfig;
use crate::containers::{ContainerEngine, ContainerOrchestrator, DockerEngine};
use crate::crypto::CryptoKey;
use crate::device_grant::DeviceGrantService;
use crate::handlers::{
    self, api_keys, audit as audit_handlers, auth, cli, containers, deploy, device,
    feature_flags, health, organizations, users,
};
use crate::middleware::{
    FeatureGate, PermissionGuard, RateLimiter, audit, authenticate, bind_organization,
    cors_layer, panic_response, rate_limit, require_feature, require_permission,
};
use crate::notifications::{self, DEFAULT_QUEUE_CAPACITY, NotificationQueue};
use crate::ssh::{DockerTunnel, SshManager, SshTarget};
use crate::telemetry::request_context;
use crate::{db, seeds};

const DEVICE_GRANT_PURGE_INTERVAL: Duration = Duration::from_secs(300);

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub jwt: Arc<JwtKeys>,
    pub auth: AuthService,
    pub api_keys: ApiKeyService,
    pub user_cache: Arc<UserCache>,
    pub membership_cache: Arc<MembershipCache>,
    pub rate_limiter: Arc<RateLimiter>,
    pub notifications: NotificationQueue,
    pub orchestrator: Arc<ContainerOrchestrator>,
    pub device_grants: DeviceGrantService,
}

impl AppState {
    /// Wire every service from configuration around an existing pool and engine.
    pub fn build(
        config: AppConfig,
        db: DatabaseConnection,
        engine: Arc<dyn ContainerEngine>,
        notifications: NotificationQueue,
    ) -> Result<Self> {
        let crypto_key = match &config.auth.crypto_key {
            Some(bytes) => CryptoKey::new(bytes.clone()).context("invalid NIXOPUS_CRYPTO_KEY")?,
            None => CryptoKey::derive_from(&config.auth.jwt_secret),
        };
        let jwt = Arc::new(JwtKeys::from_config(&config.auth));
        let auth = AuthService::new(
            db.clone(),
            jwt.clone(),
            crypto_key,
            notifications.clone(),
            &config.auth,
        );
        let api_keys = ApiKeyService::new(
            db.clone(),
            Arc::new(ApiKeyCache::from_config(&config.api_key_cache)),
        );
        let admission = &config.admission;
        let user_cache = Arc::new(TtlCache::new(
            admission.cache_capacity,
            Duration::from_secs(admission.user_cache_ttl_seconds),
        ));
        let membership_cache = Arc::new(TtlCache::new(
            admission.cache_capacity,
            Duration::from_secs(admission.membership_cache_ttl_seconds),
        ));
        let rate_limiter = Arc::new(RateLimiter::from_config(admission));
        let orchestrator = Arc::new(ContainerOrchestrator::new(
            engine,
            config.engine.max_concurrency,
            Duration::from_secs(config.engine.timeout_seconds),
        ));
        let device_grants = DeviceGrantService::new(db.clone(), auth.clone(), &config.device);

        Ok(Self {
            config: Arc::new(config),
            db,
            jwt,
            auth,
            api_keys,
            user_cache,
            membership_cache,
            rate_limiter,
            notifications,
            orchestrator,
            device_grants,
        })
    }
}

/// Attach audit, RBAC and optionally a feature gate to a route group.
///
/// Later `route_layer` calls wrap earlier ones, so requests pass the feature
/// gate, then RBAC, then reach audit capture around the handler.
fn guarded(
    router: Router<AppState>,
    state: &AppState,
    resource: &'static str,
    feature: Option<&'static str>,
) -> Router<AppState> {
    let router = router
        .route_layer(from_fn_with_state(state.clone(), audit))
        .route_layer(from_fn_with_state(
            PermissionGuard::new(state.clone(), resource),
            require_permission,
        ));
    match feature {
        Some(feature) => router.route_layer(from_fn_with_state(
            FeatureGate::new(state.clone(), feature),
            require_feature,
        )),
        None => router,
    }
}

fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/api/v1/auth/register", post(auth::register))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/2fa-login", post(auth::two_factor_login))
        .route("/api/v1/auth/refresh-token", post(auth::refresh_token))
        .route(
            "/api/v1/auth/request-password-reset",
            post(auth::request_password_reset),
        )
        .route("/api/v1/auth/reset-password", post(auth::reset_password))
        .route("/api/v1/auth/verify-email", post(auth::verify_email))
        .route("/api/v1/auth/cli-init", post(cli::cli_init))
        .route("/api/v1/auth/validate-api-key", post(cli::validate_api_key))
        .route("/api/auth/device/code", post(device::device_code))
        .route("/api/auth/device/token", post(device::device_token))
}

/// Authenticated routes that run without an organization.
fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/auth/logout", post(auth::logout))
        .route("/api/v1/auth/setup-2fa", post(auth::setup_two_factor))
        .route("/api/v1/auth/verify-2fa", post(auth::verify_two_factor))
        .route("/api/v1/auth/disable-2fa", post(auth::disable_two_factor))
        .route("/api/v1/auth/send-verification", post(auth::send_verification))
        .route("/api/v1/user", get(users::get_profile))
        .route("/api/v1/user/organizations", get(users::list_my_organizations))
        .route("/api/v1/user/name", patch(users::update_name))
        .route("/api/auth/device/approve", post(device::approve_device))
        .route("/api/auth/device/deny", post(device::deny_device))
        .route("/api/v1/organizations", post(organizations::create_organization))
}

fn organization_routes(state: &AppState) -> Router<AppState> {
    let containers = guarded(
        Router::new()
            .route("/api/v1/containers", get(containers::list_containers))
            .route("/api/v1/containers/images", get(containers::list_images))
            .route("/api/v1/containers/images/prune", post(containers::prune_images))
            .route(
                "/api/v1/containers/prune/build-cache",
                post(containers::prune_build_cache),
            )
            .route(
                "/api/v1/containers/{id}",
                get(containers::get_container).delete(containers::remove_container),
            )
            .route("/api/v1/containers/{id}/start", post(containers::start_container))
            .route("/api/v1/containers/{id}/stop", post(containers::stop_container))
            .route(
                "/api/v1/containers/{id}/restart",
                post(containers::restart_container),
            )
            .route(
                "/api/v1/containers/{id}/resources",
                patch(containers::update_container_resources),
            )
            .route("/api/v1/containers/{id}/logs", get(containers::container_logs)),
        state,
        "container",
        Some("container"),
    );

    // Reads are open to every member; only writes go through RBAC.
    let flag_reads = Router::new()
        .route("/api/v1/feature-flags", get(feature_flags::list_feature_flags))
        .route(
            "/api/v1/feature-flags/check",
            get(feature_flags::check_feature_flag),
        );
    let flag_writes = guarded(
        Router::new().route(
            "/api/v1/feature-flags",
            put(feature_flags::update_feature_flag).post(feature_flags::update_feature_flag),
        ),
        state,
        "feature_flag",
        None,
    );

    let audit_logs = guarded(
        Router::new().route("/api/v1/audit/logs", get(audit_handlers::list_audit_logs)),
        state,
        "audit",
        Some("audit"),
    );

    let organization = guarded(
        Router::new()
            .route(
                "/api/v1/organizations",
                get(organizations::get_organization)
                    .put(organizations::update_organization)
                    .delete(organizations::delete_organization),
            )
            .route(
                "/api/v1/organizations/members",
                get(organizations::list_members).post(organizations::add_member),
            )
            .route(
                "/api/v1/organizations/members/{user_id}",
                delete(organizations::remove_member),
            )
            .route(
                "/api/v1/organizations/members/{user_id}/role",
                put(organizations::change_member_role),
            ),
        state,
        "organization",
        None,
    );

    let roles = guarded(
        Router::new()
            .route("/api/v1/organizations/roles", get(organizations::list_roles))
            .route(
                "/api/v1/organizations/roles/{role_id}/permissions",
                put(organizations::set_role_permissions),
            ),
        state,
        "role",
        None,
    );

    let keys = guarded(
        Router::new()
            .route(
                "/api/v1/api-keys",
                get(api_keys::list_api_keys).post(api_keys::create_api_key),
            )
            .route("/api/v1/api-keys/{id}", delete(api_keys::revoke_api_key)),
        state,
        "api_key",
        None,
    );

    let applications = guarded(
        Router::new()
            .route("/api/v1/deploy/applications", get(deploy::list_applications))
            .route(
                "/api/v1/deploy/application/project/add-to-family",
                post(deploy::add_to_family),
            ),
        state,
        "application",
        Some("deploy"),
    );

    Router::new()
        .merge(containers)
        .merge(flag_reads)
        .merge(flag_writes)
        .merge(audit_logs)
        .merge(organization)
        .merge(roles)
        .merge(keys)
        .merge(applications)
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .merge(account_routes())
        .merge(organization_routes(&state))
        .route_layer(from_fn_with_state(state.clone(), bind_organization))
        .route_layer(from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .merge(public_routes())
        .merge(protected)
        .with_state(state.clone())
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(from_fn_with_state(state.rate_limiter.clone(), rate_limit))
        .layer(cors_layer(&state.config.admission))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(from_fn(request_context))
}

/// Connect to the configured engine, through an SSH tunnel when one is set.
///
/// The tunnel, if any, must outlive the engine client.
pub fn connect_engine(
    config: &AppConfig,
) -> Result<(Arc<dyn ContainerEngine>, Option<DockerTunnel>)> {
    let timeout = config.engine.timeout_seconds;
    match &config.engine.ssh {
        Some(settings) => {
            let manager = Arc::new(SshManager::new());
            let tunnel = DockerTunnel::open(
                manager,
                SshTarget::from_settings(settings),
                settings.remote_socket.clone(),
            )
            .context("failed to open docker ssh tunnel")?;
            let socket = tunnel.socket_path().to_string_lossy().into_owned();
            let engine = DockerEngine::connect_socket(&socket, timeout)
                .context("failed to connect to tunnelled docker engine")?;
            Ok((Arc::new(engine), Some(tunnel)))
        }
        None => {
            let engine = DockerEngine::connect(config.engine.docker_host.as_deref(), timeout)
                .context("failed to connect to docker engine")?;
            Ok((Arc::new(engine), None))
        }
    }
}

fn spawn_device_grant_purge(
    grants: DeviceGrantService,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(DEVICE_GRANT_PURGE_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => match grants.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => tracing::info!(purged, "purged expired device grants"),
                    Err(err) => tracing::warn!(error = %err, "device grant purge failed"),
                },
            }
        }
    })
}

/// Starts the server with the given configuration
pub async fn run_server(config: AppConfig) -> Result<()> {
    let addr = config
        .bind_addr()
        .with_context(|| format!("Invalid server address: {}", config.api_bind_addr))?;

    let db = db::init_pool(&config).await?;
    if config.auto_migrate {
        db::run_migrations(&db, &config.migrations_dir).await?;
    }
    seeds::seed_roles(&db).await?;

    let (engine, tunnel) = connect_engine(&config)?;
    let shutdown = CancellationToken::new();
    let (queue, rx) = NotificationQueue::channel(DEFAULT_QUEUE_CAPACITY);
    let state = AppState::build(config, db, engine, queue)?;

    let admission = &state.config.admission;
    let tasks = vec![
        notifications::spawn_dispatcher(rx, shutdown.clone()),
        state.rate_limiter.clone().spawn_sweeper(
            Duration::from_secs(admission.rate_limit_sweep_interval_seconds),
            shutdown.clone(),
        ),
        state.api_keys.cache().clone().spawn_sweeper(
            Duration::from_secs(state.config.api_key_cache.sweep_interval_seconds),
            shutdown.clone(),
        ),
        spawn_device_grant_purge(state.device_grants.clone(), shutdown.clone()),
    ];

    if let Err(err) = state.orchestrator.ping().await {
        tracing::warn!(error = %err, "container engine not reachable at startup");
    }

    let profile = state.config.profile.clone();
    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, %profile, "server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown.cancel();
    for task in tasks {
        let _ = task.await;
    }
    if let Some(tunnel) = tunnel {
        tunnel.close();
    }
    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("Received shutdown signal");
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT or nixopus_ API key")
                    .build(),
            ),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health::healthz,
        crate::handlers::health::readyz,
        crate::handlers::auth::register,
        crate::handlers::auth::login,
        crate::handlers::auth::two_factor_login,
        crate::handlers::auth::refresh_token,
        crate::handlers::auth::logout,
        crate::handlers::auth::request_password_reset,
        crate::handlers::auth::reset_password,
        crate::handlers::auth::setup_two_factor,
        crate::handlers::auth::verify_two_factor,
        crate::handlers::auth::disable_two_factor,
        crate::handlers::auth::send_verification,
        crate::handlers::auth::verify_email,
        crate::handlers::cli::cli_init,
        crate::handlers::cli::validate_api_key,
        crate::handlers::device::device_code,
        crate::handlers::device::device_token,
        crate::handlers::device::approve_device,
        crate::handlers::device::deny_device,
        crate::handlers::api_keys::create_api_key,
        crate::handlers::api_keys::list_api_keys,
        crate::handlers::api_keys::revoke_api_key,
        crate::handlers::containers::list_containers,
        crate::handlers::containers::get_container,
        crate::handlers::containers::start_container,
        crate::handlers::containers::stop_container,
        crate::handlers::containers::restart_container,
        crate::handlers::containers::remove_container,
        crate::handlers::containers::update_container_resources,
        crate::handlers::containers::container_logs,
        crate::handlers::containers::list_images,
        crate::handlers::containers::prune_images,
        crate::handlers::containers::prune_build_cache,
        crate::handlers::feature_flags::list_feature_flags,
        crate::handlers::feature_flags::update_feature_flag,
        crate::handlers::feature_flags::check_feature_flag,
        crate::handlers::audit::list_audit_logs,
        crate::handlers::organizations::create_organization,
        crate::handlers::organizations::get_organization,
        crate::handlers::organizations::update_organization,
        crate::handlers::organizations::delete_organization,
        crate::handlers::organizations::list_members,
        crate::handlers::organizations::add_member,
        crate::handlers::organizations::change_member_role,
        crate::handlers::organizations::remove_member,
        crate::handlers::organizations::list_roles,
        crate::handlers::organizations::set_role_permissions,
        crate::handlers::users::get_profile,
        crate::handlers::users::list_my_organizations,
        crate::handlers::users::update_name,
        crate::handlers::deploy::list_applications,
        crate::handlers::deploy::add_to_family,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ErrorEnvelope,
            crate::handlers::types::MessageResponse,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Nixopus API",
        description = "Control plane for Nixopus: accounts, organizations, API keys, CLI device login and container operations",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
