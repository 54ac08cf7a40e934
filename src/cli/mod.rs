//! Client-side library for the `nixopus` CLI: project configuration and the
//! HTTP calls the CLI makes against the control plane.

pub mod api;
pub mod config;

use thiserror::Error;

pub use api::ApiClient;
pub use config::ProjectConfig;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("not inside a git repository; run this command from your project")]
    NotInRepository,
    #[error("no .nixopus config found at {0}")]
    MissingConfig(String),
    #[error("api_key is required in .nixopus")]
    MissingApiKey,
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0}")]
    Transport(String),
    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("device code expired")]
    DeviceCodeExpired,
    #[error("login was denied in the browser")]
    AccessDenied,
    #[error("device login failed: {0}")]
    DeviceLogin(String),
}
