//! The `.nixopus` project file.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::CliError;

pub const CONFIG_FILE_NAME: &str = ".nixopus";
pub const SERVER_ENV: &str = "NIXOPUS_SERVER";
pub const DEFAULT_SERVER: &str = "https://api.nixopus.com";
const DEFAULT_DEBOUNCE_MS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            exclude: default_exclude(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_exclude() -> Vec<String> {
    ["*.log", ".git", "node_modules", "__pycache__", ".env"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Never persisted; resolved from `NIXOPUS_SERVER` or the default.
    #[serde(skip)]
    pub server: String,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,
    /// Application name to application id
    #[serde(default)]
    pub applications: BTreeMap<String, String>,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_path: Option<String>,
}

impl ProjectConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            server: resolve_server(),
            api_key: api_key.into(),
            family_id: None,
            applications: BTreeMap::new(),
            sync: SyncConfig::default(),
            env_path: None,
        }
    }

    /// Load the config of the project containing `start`.
    pub fn load(start: &Path) -> Result<Self, CliError> {
        let path = config_path(start)?;
        if !path.exists() {
            return Err(CliError::MissingConfig(path.display().to_string()));
        }
        Self::load_file(&path)
    }

    pub fn load_file(path: &Path) -> Result<Self, CliError> {
        let raw = fs::read_to_string(path)?;
        let mut config: ProjectConfig = serde_json::from_str(&raw)?;
        if config.api_key.trim().is_empty() {
            return Err(CliError::MissingApiKey);
        }
        config.server = resolve_server();
        config.normalize();
        Ok(config)
    }

    /// Write the config into the project containing `start`.
    pub fn save(&mut self, start: &Path) -> Result<PathBuf, CliError> {
        let path = config_path(start)?;
        self.save_file(&path)?;
        Ok(path)
    }

    pub fn save_file(&mut self, path: &Path) -> Result<(), CliError> {
        self.normalize();
        let body = serde_json::to_string_pretty(self)?;
        write_private(path, body.as_bytes())?;
        Ok(())
    }

    /// The env file is synced on purpose, so it must not stay excluded.
    pub fn normalize(&mut self) {
        if let Some(env_path) = self.env_path.as_deref() {
            self.sync.exclude.retain(|pattern| pattern != env_path);
        }
    }

    pub fn application_id(&self, name: &str) -> Option<&str> {
        self.applications.get(name).map(String::as_str)
    }
}

fn resolve_server() -> String {
    std::env::var(SERVER_ENV)
        .ok()
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SERVER.to_string())
}

/// Nearest ancestor of `start` (inclusive) that contains `.git`.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

pub fn config_path(start: &Path) -> Result<PathBuf, CliError> {
    find_project_root(start)
        .map(|root| root.join(CONFIG_FILE_NAME))
        .ok_or(CliError::NotInRepository)
}

#[cfg(unix)]
fn write_private(path: &Path, body: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(body)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn write_private(path: &Path, body: &[u8]) -> std::io::Result<()> {
    fs::write(path, body)
}
