use nixopus::config::ConfigLoader;
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

const TEST_CRYPTO_KEY: &str = "YWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWE=";

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    unsafe {
        for key in [
            "NIXOPUS_PROFILE",
            "NIXOPUS_API_BIND_ADDR",
            "NIXOPUS_LOG_LEVEL",
            "NIXOPUS_CRYPTO_KEY",
            "NIXOPUS_JWT_SECRET",
            "NIXOPUS_RATE_LIMIT_CAPACITY",
            "NIXOPUS_CORS_ALLOWED_ORIGINS",
            "NIXOPUS_SSH_HOST",
            "NIXOPUS_SSH_PASSWORD",
        ] {
            env::remove_var(key);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.admission.rate_limit_capacity, 5);
    assert_eq!(cfg.admission.rate_limit_idle_eviction_seconds, 180);
    assert_eq!(cfg.default_domain_suffix, "nixopus.com");
    assert!(cfg.engine.ssh.is_none());
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "NIXOPUS_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "NIXOPUS_API_BIND_ADDR=192.168.0.10:5000\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "NIXOPUS_API_BIND_ADDR=10.0.0.5:6000\n",
    );
    // Profile chosen in .env.local before the profile files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        &format!(
            "NIXOPUS_PROFILE=test\nNIXOPUS_API_BIND_ADDR=127.0.0.1:4000\nNIXOPUS_CRYPTO_KEY={TEST_CRYPTO_KEY}\n"
        ),
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.auth.crypto_key.as_deref().map(<[u8]>::len), Some(32));
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "NIXOPUS_API_BIND_ADDR=127.0.0.1:3000\nNIXOPUS_RATE_LIMIT_CAPACITY=10\n",
    );

    unsafe {
        env::set_var("NIXOPUS_API_BIND_ADDR", "0.0.0.0:9090");
        env::set_var("NIXOPUS_CORS_ALLOWED_ORIGINS", "https://a.example, https://b.example");
    }

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");
    assert_eq!(cfg.admission.rate_limit_capacity, 10);
    assert_eq!(
        cfg.admission.cors_allowed_origins,
        vec!["https://a.example", "https://b.example"]
    );

    clear_env();
}

#[test]
fn invalid_bind_addr_returns_error() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("NIXOPUS_API_BIND_ADDR", "not-an-addr");
    }
    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("invalid bind addr should fail");
    assert!(format!("{}", err).contains("invalid api bind address"));

    clear_env();
}

#[test]
fn production_profile_requires_a_strong_jwt_secret() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("NIXOPUS_PROFILE", "prod");
    }
    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("missing secret should fail in prod");
    assert!(err.to_string().contains("jwt secret"));

    unsafe {
        env::set_var("NIXOPUS_JWT_SECRET", "an-adequately-long-production-secret-value");
    }
    let cfg = loader.load().expect("strong secret accepted");
    assert_eq!(cfg.profile, "prod");

    clear_env();
}

#[test]
fn ssh_host_without_credentials_is_rejected() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("NIXOPUS_SSH_HOST", "203.0.113.7");
    }
    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("ssh host needs credentials");
    assert!(err.to_string().contains("NIXOPUS_SSH_PASSWORD"));

    unsafe {
        env::set_var("NIXOPUS_SSH_PASSWORD", "hunter2");
    }
    let cfg = loader.load().expect("password auth accepted");
    let ssh = cfg.engine.ssh.expect("ssh settings present");
    assert_eq!(ssh.port, 22);
    assert_eq!(ssh.remote_socket, "/var/run/docker.sock");

    clear_env();
}
