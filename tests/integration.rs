//! Integration tests for cachewarden
//!
//! These run the real controller against a fake engine (a shell script
//! standing in for the supervised binary) and a TCP fixture speaking
//! the admin session on the engine's behalf.

#![cfg(unix)]

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cachewarden::config::ControllerConfig;
use cachewarden::controller::Controller;
use cachewarden::endpoints::{Endpoint, EndpointConfig};
use cachewarden::render::TextRenderer;
use cachewarden::signaller::EndpointSignaller;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};

const SECRET: &[u8] = b"integration-secret\n";

fn auth_digest(challenge: &str, secret: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(challenge.as_bytes());
    hasher.update(secret);
    hasher.update(challenge.as_bytes());
    hex::encode(hasher.finalize())
}

/// Engine-side admin fixture: challenge auth, then record commands.
/// When `reject_reloads` is set every command is answered with `err`.
async fn spawn_admin_fixture(
    reject_reloads: bool,
) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let commands = Arc::new(Mutex::new(Vec::new()));

    let seen = Arc::clone(&commands);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                let (read_half, mut write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);

                let challenge = "integration-challenge";
                if write_half
                    .write_all(format!("auth {}\n", challenge).as_bytes())
                    .await
                    .is_err()
                {
                    return;
                }

                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    return;
                }
                let expected = format!("auth {}", auth_digest(challenge, SECRET));
                if line.trim_end() != expected {
                    let _ = write_half.write_all(b"err bad auth\n").await;
                    return;
                }
                if write_half.write_all(b"ok\n").await.is_err() {
                    return;
                }

                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    seen.lock().await.push(line.trim_end().to_string());
                    let reply: &[u8] = if reject_reloads { b"err refused\n" } else { b"ok\n" };
                    if write_half.write_all(reply).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    (addr, commands)
}

/// Write an executable fake-engine script that ignores its flags.
fn fake_engine(dir: &Path, body: &str) -> PathBuf {
    let script = dir.join("fake-engine.sh");
    std::fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

/// A long-running fake engine that records its pid, so tests can check
/// the process is actually reaped and not orphaned.
fn fake_engine_with_pidfile(dir: &Path) -> (PathBuf, PathBuf) {
    let pid_file = dir.join("engine.pid");
    let script = fake_engine(
        dir,
        &format!("echo $$ > {}\nexec sleep 60", pid_file.display()),
    );
    (script, pid_file)
}

/// Wait for the fake engine to write its pid file.
async fn read_engine_pid(pid_file: &Path) -> i32 {
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_secs(5) {
        if let Ok(contents) = std::fs::read_to_string(pid_file) {
            if let Ok(pid) = contents.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("fake engine never wrote its pid file");
}

fn process_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

fn test_config(dir: &Path, engine: &Path, admin: SocketAddr) -> ControllerConfig {
    let secret_file = dir.join("secret");
    std::fs::write(&secret_file, SECRET).unwrap();

    let toml = format!(
        r#"
            engine_binary = "{}"
            config_file = "{}"
            secret_file = "{}"
            frontend_addr = "127.0.0.1"
            frontend_port = 0
            admin_addr = "{}"
            admin_port = {}
            max_retries = 2
            retry_backoff_secs = 0
            admin_timeout_secs = 5
        "#,
        engine.display(),
        dir.join("engine.cfg").display(),
        secret_file.display(),
        admin.ip(),
        admin.port(),
    );
    toml::from_str(&toml).unwrap()
}

/// Poll until the recorded command count reaches `count`.
async fn wait_for_commands(
    commands: &Arc<Mutex<Vec<String>>>,
    count: usize,
    timeout: Duration,
) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if commands.lock().await.len() >= count {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

struct CountingSignaller {
    calls: AtomicUsize,
}

impl EndpointSignaller for CountingSignaller {
    fn set_endpoints(&self, _frontend: &EndpointConfig) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_clean_engine_exit_completes_run() {
    let dir = tempfile::tempdir().unwrap();
    let (admin, commands) = spawn_admin_fixture(false).await;
    let engine = fake_engine(dir.path(), "sleep 1; exit 0");
    let config = Arc::new(test_config(dir.path(), &engine, admin));

    // No update sources: both sides start empty with no blocking wait.
    let controller = Controller::new(Arc::clone(&config), Arc::new(TextRenderer));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let start = std::time::Instant::now();
    controller.run(shutdown_rx).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(10));

    // The initial config was written (empty topology renders empty).
    let rendered = std::fs::read_to_string(&config.config_file).unwrap();
    assert!(rendered.is_empty());

    // No reload was ever pushed: the watcher loop saw no updates.
    assert!(commands.lock().await.is_empty());
}

#[tokio::test]
async fn test_interleaved_updates_rerender_full_pair() {
    let dir = tempfile::tempdir().unwrap();
    let (admin, commands) = spawn_admin_fixture(false).await;
    let engine = fake_engine(dir.path(), "sleep 60");
    let config = Arc::new(test_config(dir.path(), &engine, admin));

    let (frontend_tx, frontend_rx) = tokio::sync::mpsc::channel(4);
    let (backend_tx, backend_rx) = tokio::sync::mpsc::channel(4);
    let signaller = Arc::new(CountingSignaller {
        calls: AtomicUsize::new(0),
    });

    let controller = Controller::new(Arc::clone(&config), Arc::new(TextRenderer))
        .with_frontend_updates(frontend_rx)
        .with_backend_updates(backend_rx)
        .with_signaller(Arc::clone(&signaller) as Arc<dyn EndpointSignaller>);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Initial snapshots consumed by bootstrap.
    frontend_tx
        .send(EndpointConfig::new(vec![Endpoint::new("10.1.0.1", 6081)]))
        .await
        .unwrap();
    backend_tx
        .send(EndpointConfig::new(vec![Endpoint::new("10.2.0.1", 8080)]))
        .await
        .unwrap();

    let run = tokio::spawn(Controller::run(controller, shutdown_rx));

    // One update per side; each triggers a full re-render + reload.
    frontend_tx
        .send(EndpointConfig::new(vec![Endpoint::new("10.1.0.2", 6081)]))
        .await
        .unwrap();
    backend_tx
        .send(EndpointConfig::new(vec![Endpoint::new("10.2.0.2", 8080)]))
        .await
        .unwrap();

    assert!(wait_for_commands(&commands, 2, Duration::from_secs(10)).await);
    {
        let seen = commands.lock().await;
        assert_eq!(seen.len(), 2);
        let expected = format!("reload {}", config.config_file.display());
        assert!(seen.iter().all(|c| c == &expected));
    }

    // Each side kept the other's last-known value.
    let rendered = std::fs::read_to_string(&config.config_file).unwrap();
    assert!(rendered.contains("10.1.0.2"));
    assert!(rendered.contains("10.2.0.2"));
    assert!(!rendered.contains("10.1.0.1"));
    assert!(!rendered.contains("10.2.0.1"));

    // Signalled at bootstrap and on the frontend update, not for the
    // backend update.
    assert_eq!(signaller.calls.load(Ordering::SeqCst), 2);

    shutdown_tx.send(true).unwrap();
    let start = std::time::Instant::now();
    let _ = run.await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_reload_failure_runs_bounded_retry_episode() {
    let dir = tempfile::tempdir().unwrap();
    let (admin, commands) = spawn_admin_fixture(true).await;
    let engine = fake_engine(dir.path(), "sleep 60");
    // max_retries = 2, zero backoff (from test_config)
    let config = Arc::new(test_config(dir.path(), &engine, admin));

    let (backend_tx, backend_rx) = tokio::sync::mpsc::channel(4);
    let controller = Controller::new(Arc::clone(&config), Arc::new(TextRenderer))
        .with_backend_updates(backend_rx);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    backend_tx
        .send(EndpointConfig::new(vec![Endpoint::new("10.2.0.1", 8080)]))
        .await
        .unwrap();
    let run = tokio::spawn(Controller::run(controller, shutdown_rx));

    backend_tx
        .send(EndpointConfig::new(vec![Endpoint::new("10.2.0.2", 8080)]))
        .await
        .unwrap();

    // One watcher attempt plus two retry attempts, then the episode
    // ends without escalation.
    assert!(wait_for_commands(&commands, 3, Duration::from_secs(10)).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(commands.lock().await.len(), 3);

    // The run is still alive on stale configuration.
    assert!(!run.is_finished());

    shutdown_tx.send(true).unwrap();
    let _ = run.await.unwrap();
}

#[tokio::test]
async fn test_cancellation_during_admin_gate_terminates_run() {
    let dir = tempfile::tempdir().unwrap();

    // A port nothing listens on: the gate polls until cancelled.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let (engine, pid_file) = fake_engine_with_pidfile(dir.path());
    let mut config = test_config(dir.path(), &engine, dead);
    config.admin_timeout_secs = 60;
    let config = Arc::new(config);

    let controller = Controller::new(Arc::clone(&config), Arc::new(TextRenderer));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(Controller::run(controller, shutdown_rx));

    let pid = read_engine_pid(&pid_file).await;
    assert!(process_alive(pid));

    tokio::time::sleep(Duration::from_millis(300)).await;
    shutdown_tx.send(true).unwrap();

    let start = std::time::Instant::now();
    let result = run.await.unwrap();
    assert!(result.is_err());
    assert!(start.elapsed() < Duration::from_secs(10));

    // The engine was terminated and reaped before the run returned.
    assert!(!process_alive(pid));
}

#[tokio::test]
async fn test_admin_gate_timeout_is_fatal() {
    let dir = tempfile::tempdir().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let (engine, pid_file) = fake_engine_with_pidfile(dir.path());
    let mut config = test_config(dir.path(), &engine, dead);
    config.admin_timeout_secs = 1;
    let config = Arc::new(config);

    let controller = Controller::new(Arc::clone(&config), Arc::new(TextRenderer));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(Controller::run(controller, shutdown_rx));

    let pid = read_engine_pid(&pid_file).await;
    assert!(process_alive(pid));

    let err = run.await.unwrap().unwrap_err();
    assert!(err.to_string().contains("not ready"));

    // A fatal gate failure must not orphan the engine: the run only
    // returns once the exit signal has resolved.
    assert!(!process_alive(pid));
}

#[tokio::test]
async fn test_unwritable_config_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let (admin, _) = spawn_admin_fixture(false).await;
    let engine = fake_engine(dir.path(), "sleep 60");

    let mut config = test_config(dir.path(), &engine, admin);
    config.config_file = dir.path().join("missing-dir").join("engine.cfg");
    let config = Arc::new(config);

    let controller = Controller::new(Arc::clone(&config), Arc::new(TextRenderer));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let err = controller.run(shutdown_rx).await.unwrap_err();
    assert!(err.to_string().contains("failed to create configuration file"));
}
