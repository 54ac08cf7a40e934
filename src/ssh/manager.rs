//! Pooled SSH sessions keyed by address and credential digest.

use std::collections::HashMap;
use std::io;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sha2::{Digest, Sha256};
use ssh2::Session;
use thiserror::Error;

use crate::config::SshSettings;

const MAX_ATTEMPTS: usize = 3;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SshError {
    #[error("ssh io error: {0}")]
    Io(#[from] io::Error),
    #[error("ssh protocol error: {0}")]
    Protocol(#[from] ssh2::Error),
    #[error("ssh authentication failed for {0}")]
    Auth(String),
    #[error("ssh worker failed: {0}")]
    Worker(String),
}

/// libssh2 transport failures: SOCKET_SEND, SOCKET_DISCONNECT, SOCKET_RECV.
const DEAD_TRANSPORT_CODES: [i32; 3] = [-7, -13, -43];

impl SshError {
    /// Errors after which the pooled session must be discarded.
    pub fn is_closed_connection(&self) -> bool {
        let by_kind = match self {
            SshError::Protocol(err) => matches!(
                err.code(),
                ssh2::ErrorCode::Session(code) if DEAD_TRANSPORT_CODES.contains(&code)
            ),
            SshError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::UnexpectedEof
            ),
            SshError::Auth(_) | SshError::Worker(_) => false,
        };
        by_kind || is_closed_connection_error(&self.to_string())
    }
}

/// Matches the messages a dead transport surfaces as.
pub fn is_closed_connection_error(message: &str) -> bool {
    let message = message.to_lowercase();
    ["eof", "broken pipe", "connection reset", "use of closed network connection"]
        .iter()
        .any(|needle| message.contains(needle))
}

#[derive(Clone)]
pub enum SshAuth {
    Password(String),
    PrivateKey {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl std::fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SshAuth::Password(_) => f.write_str("Password([REDACTED])"),
            SshAuth::PrivateKey { path, .. } => f
                .debug_struct("PrivateKey")
                .field("path", path)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: SshAuth,
}

impl SshTarget {
    pub fn from_settings(settings: &SshSettings) -> Self {
        let auth = match (&settings.private_key_path, &settings.password) {
            (Some(path), _) => SshAuth::PrivateKey {
                path: PathBuf::from(path),
                passphrase: settings.passphrase.clone(),
            },
            (None, password) => SshAuth::Password(password.clone().unwrap_or_default()),
        };
        Self {
            host: settings.host.clone(),
            port: settings.port,
            user: settings.user.clone(),
            auth,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Address plus a digest of the credentials; secrets never appear in the key.
    pub fn pool_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.user.as_bytes());
        match &self.auth {
            SshAuth::Password(password) => {
                hasher.update(b"password:");
                hasher.update(password.as_bytes());
            }
            SshAuth::PrivateKey { path, passphrase } => {
                hasher.update(b"key:");
                hasher.update(path.to_string_lossy().as_bytes());
                hasher.update(passphrase.as_deref().unwrap_or_default().as_bytes());
            }
        }
        format!("{}#{}", self.addr(), hex::encode(hasher.finalize()))
    }

    fn connect(&self) -> Result<Session, SshError> {
        let addr = self.addr();
        let socket_addr = std::net::ToSocketAddrs::to_socket_addrs(&addr)?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such host"))?;
        let tcp = TcpStream::connect_timeout(&socket_addr, CONNECT_TIMEOUT)?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;
        match &self.auth {
            SshAuth::Password(password) => session.userauth_password(&self.user, password)?,
            SshAuth::PrivateKey { path, passphrase } => session.userauth_pubkey_file(
                &self.user,
                None,
                path,
                passphrase.as_deref(),
            )?,
        }
        if !session.authenticated() {
            return Err(SshError::Auth(addr));
        }
        session.set_keepalive(true, 30);
        // Tunnel pumps share the session and must never park inside libssh2.
        session.set_blocking(false);
        Ok(session)
    }
}

/// Reuses one authenticated session per target.
#[derive(Default)]
pub struct SshManager {
    pool: Mutex<HashMap<String, Arc<Session>>>,
}

impl SshManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pooled session for `target`, dialing a new one when absent.
    pub async fn session(&self, target: &SshTarget) -> Result<Arc<Session>, SshError> {
        let key = target.pool_key();
        if let Some(session) = self.cached(&key) {
            return Ok(session);
        }

        let dial = target.clone();
        let session = tokio::task::spawn_blocking(move || dial.connect())
            .await
            .map_err(|e| SshError::Worker(e.to_string()))??;
        let session = Arc::new(session);

        let mut pool = self.pool.lock().map_err(|e| SshError::Worker(e.to_string()))?;
        let session = pool.entry(key).or_insert(session).clone();
        tracing::debug!(addr = %target.addr(), "ssh session established");
        Ok(session)
    }

    fn cached(&self, key: &str) -> Option<Arc<Session>> {
        self.pool.lock().ok()?.get(key).cloned()
    }

    /// Drop the pooled session for `key`; holders keep their reference until done.
    pub fn close_connection(&self, key: &str) {
        if let Ok(mut pool) = self.pool.lock()
            && pool.remove(key).is_some()
        {
            tracing::info!(key = %key.split('#').next().unwrap_or_default(), "evicted ssh session");
        }
    }

    pub fn pooled(&self) -> usize {
        self.pool.lock().map(|pool| pool.len()).unwrap_or(0)
    }

    /// Run `op` on a pooled session, redialing after closed-connection errors.
    pub async fn with_session<T, F>(&self, target: &SshTarget, op: F) -> Result<T, SshError>
    where
        T: Send + 'static,
        F: Fn(&Session) -> Result<T, SshError> + Clone + Send + 'static,
    {
        let key = target.pool_key();
        let mut last_error = None;
        for attempt in 1..=MAX_ATTEMPTS {
            let session = self.session(target).await?;
            let op = op.clone();
            let result = tokio::task::spawn_blocking(move || op(&session))
                .await
                .map_err(|e| SshError::Worker(e.to_string()))?;
            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_closed_connection() => {
                    tracing::warn!(attempt, error = %err, "ssh connection closed, retrying");
                    self.close_connection(&key);
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or_else(|| SshError::Worker("ssh retries exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(password: &str) -> SshTarget {
        SshTarget {
            host: "engine.internal".to_string(),
            port: 22,
            user: "deploy".to_string(),
            auth: SshAuth::Password(password.to_string()),
        }
    }

    #[test]
    fn closed_connection_messages() {
        assert!(is_closed_connection_error("unexpected EOF"));
        assert!(is_closed_connection_error("write: Broken pipe"));
        assert!(is_closed_connection_error("read: connection reset by peer"));
        assert!(is_closed_connection_error("use of closed network connection"));
        assert!(!is_closed_connection_error("permission denied"));

        let err = SshError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        assert!(err.is_closed_connection());
    }

    #[test]
    fn dead_transport_codes_are_closed_connections() {
        for code in DEAD_TRANSPORT_CODES {
            let err = SshError::Protocol(ssh2::Error::new(
                ssh2::ErrorCode::Session(code),
                "Unable to send channel-open request",
            ));
            assert!(err.is_closed_connection(), "code {code}");
        }

        let auth = SshError::Protocol(ssh2::Error::new(
            ssh2::ErrorCode::Session(-18),
            "Authentication failed",
        ));
        assert!(!auth.is_closed_connection());

        let aborted = SshError::Io(io::Error::new(io::ErrorKind::ConnectionAborted, "aborted"));
        assert!(aborted.is_closed_connection());
    }

    #[tokio::test]
    async fn closed_session_is_evicted_and_redialed() {
        let manager = SshManager::new();
        let unreachable = SshTarget {
            host: "127.0.0.1".into(),
            port: 1,
            ..target("pw")
        };
        manager
            .pool
            .lock()
            .unwrap()
            .insert(unreachable.pool_key(), Arc::new(Session::new().unwrap()));

        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let result = manager
            .with_session(&unreachable, move |_session| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err::<(), _>(SshError::Protocol(ssh2::Error::new(
                    ssh2::ErrorCode::Session(-7),
                    "Unable to send channel-open request",
                )))
            })
            .await;

        // The dead session is dropped and the retry dials the target, which
        // refuses the connection.
        assert!(matches!(result, Err(SshError::Io(_))));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(manager.pooled(), 0);
    }

    #[test]
    fn pool_key_separates_credentials_without_leaking_them() {
        let a = target("first-secret");
        let b = target("second-secret");
        assert_ne!(a.pool_key(), b.pool_key());
        assert_eq!(a.pool_key(), target("first-secret").pool_key());
        assert!(a.pool_key().starts_with("engine.internal:22#"));
        assert!(!a.pool_key().contains("first-secret"));
        assert!(!format!("{:?}", a.auth).contains("first-secret"));
    }

    #[test]
    fn settings_prefer_private_key() {
        let settings = SshSettings {
            host: "h".into(),
            port: 2222,
            user: "u".into(),
            password: Some("pw".into()),
            private_key_path: Some("/keys/id_ed25519".into()),
            passphrase: None,
            remote_socket: "/var/run/docker.sock".into(),
        };
        let target = SshTarget::from_settings(&settings);
        assert!(matches!(target.auth, SshAuth::PrivateKey { .. }));
        assert_eq!(target.addr(), "h:2222");
    }

    #[tokio::test]
    async fn dial_failure_leaves_pool_empty() {
        let manager = SshManager::new();
        let unreachable = SshTarget {
            host: "127.0.0.1".into(),
            port: 1,
            ..target("pw")
        };
        assert!(manager.session(&unreachable).await.is_err());
        assert_eq!(manager.pooled(), 0);
        manager.close_connection(&unreachable.pool_key());
    }
}
