//! Local Unix socket forwarding engine traffic to a remote socket over SSH.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ssh2::{Channel, Session};
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;

use super::manager::{SshError, SshManager, SshTarget};

const IDLE_BACKOFF: Duration = Duration::from_millis(5);
const BUFFER_SIZE: usize = 32 * 1024;
const LIBSSH2_ERROR_EAGAIN: i32 = -37;

/// Listener on `<dir>/docker-ssh-<nanos>.sock`.
pub struct DockerTunnel {
    socket_path: PathBuf,
    shutdown: CancellationToken,
}

impl DockerTunnel {
    /// Bind in the system temp directory and start accepting.
    pub fn open(
        manager: Arc<SshManager>,
        target: SshTarget,
        remote_socket: String,
    ) -> Result<Self, SshError> {
        Self::open_in(&std::env::temp_dir(), manager, target, remote_socket)
    }

    pub fn open_in(
        dir: &Path,
        manager: Arc<SshManager>,
        target: SshTarget,
        remote_socket: String,
    ) -> Result<Self, SshError> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let socket_path = dir.join(format!("docker-ssh-{nanos}.sock"));
        let listener = UnixListener::bind(&socket_path)?;
        let shutdown = CancellationToken::new();

        tokio::spawn(accept_loop(
            listener,
            manager,
            target,
            remote_socket,
            shutdown.clone(),
        ));
        tracing::info!(socket = %socket_path.display(), "docker ssh tunnel listening");

        Ok(Self {
            socket_path,
            shutdown,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stop accepting and remove the socket file.
    pub fn close(&self) {
        self.shutdown.cancel();
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(error = %e, "failed to remove tunnel socket"),
        }
    }
}

impl Drop for DockerTunnel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_loop(
    listener: UnixListener,
    manager: Arc<SshManager>,
    target: SshTarget,
    remote_socket: String,
    shutdown: CancellationToken,
) {
    loop {
        let stream = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "tunnel accept failed");
                    continue;
                }
            },
        };

        let manager = manager.clone();
        let target = target.clone();
        let remote_socket = remote_socket.clone();
        tokio::spawn(async move {
            if let Err(e) = forward(stream, &manager, &target, remote_socket).await {
                tracing::warn!(error = %e, "tunnel connection failed");
            }
        });
    }
}

async fn forward(
    stream: tokio::net::UnixStream,
    manager: &SshManager,
    target: &SshTarget,
    remote_socket: String,
) -> Result<(), SshError> {
    let channel = manager
        .with_session(target, move |session| open_channel(session, &remote_socket))
        .await?;

    let local = stream.into_std()?;
    local.set_nonblocking(false)?;
    let inbound = local.try_clone()?;
    let channel = Arc::new(Mutex::new(channel));
    let done = Arc::new(AtomicBool::new(false));

    let upstream = {
        let channel = channel.clone();
        let done = done.clone();
        let local = local.try_clone()?;
        tokio::task::spawn_blocking(move || {
            let result = pump_local_to_channel(inbound, &channel);
            finish(&local, &done);
            result
        })
    };
    let downstream = {
        let channel = channel.clone();
        let done = done.clone();
        tokio::task::spawn_blocking(move || {
            let result = pump_channel_to_local(&channel, &local, &done);
            finish(&local, &done);
            result
        })
    };

    let (up, down) = tokio::join!(upstream, downstream);
    let closing = tokio::task::spawn_blocking(move || {
        let mut guard = lock(&channel)?;
        retry(|| guard.close())
    });
    if let Ok(Err(e)) = closing.await {
        tracing::debug!(error = %e, "tunnel channel close failed");
    }
    for result in [up, down] {
        match result {
            Ok(Err(e)) if !e.is_closed_connection() => return Err(e),
            Err(e) => return Err(SshError::Worker(e.to_string())),
            _ => {}
        }
    }
    Ok(())
}

fn open_channel(session: &Session, remote_socket: &str) -> Result<Channel, SshError> {
    retry(|| session.channel_direct_streamlocal(remote_socket, None))
}

/// Repeat a non-blocking libssh2 call until it stops reporting EAGAIN.
fn retry<T>(mut op: impl FnMut() -> Result<T, ssh2::Error>) -> Result<T, SshError> {
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if matches!(e.code(), ssh2::ErrorCode::Session(LIBSSH2_ERROR_EAGAIN)) => {
                std::thread::sleep(IDLE_BACKOFF)
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn finish(local: &StdUnixStream, done: &AtomicBool) {
    done.store(true, Ordering::SeqCst);
    let _ = local.shutdown(std::net::Shutdown::Both);
}

fn pump_local_to_channel(
    mut local: StdUnixStream,
    channel: &Mutex<Channel>,
) -> Result<(), SshError> {
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = match local.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        let mut written = 0;
        while written < n {
            let mut channel = lock(channel)?;
            match channel.write(&buf[written..n]) {
                Ok(w) => written += w,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    drop(channel);
                    std::thread::sleep(IDLE_BACKOFF);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    let mut channel = lock(channel)?;
    retry(|| channel.send_eof())
}

fn pump_channel_to_local(
    channel: &Mutex<Channel>,
    mut local: &StdUnixStream,
    done: &AtomicBool,
) -> Result<(), SshError> {
    let mut buf = vec![0u8; BUFFER_SIZE];
    while !done.load(Ordering::SeqCst) {
        let read = {
            let mut channel = lock(channel)?;
            if channel.eof() {
                break;
            }
            channel.read(&mut buf)
        };
        match read {
            Ok(0) => std::thread::sleep(IDLE_BACKOFF),
            Ok(n) => local.write_all(&buf[..n])?,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::sleep(IDLE_BACKOFF),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn lock(channel: &Mutex<Channel>) -> Result<std::sync::MutexGuard<'_, Channel>, SshError> {
    channel
        .lock()
        .map_err(|_| SshError::Worker("tunnel channel lock poisoned".to_string()))
}
