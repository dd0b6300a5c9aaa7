//! Supervision of the cache engine subprocess
//!
//! The supervisor owns exactly one engine child process: it assembles
//! the argument list from the static configuration, spawns the child
//! with pass-through stdio, and exposes a single-resolution exit
//! signal. Engine exit for any reason ends the controller's run; the
//! process itself is never restarted here, only its configuration is
//! retried elsewhere.

use crate::config::ControllerConfig;
use crate::error::StartupError;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

/// Grace period between SIGTERM and SIGKILL on shutdown
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Single-resolution exit signal for the supervised engine.
///
/// Resolves exactly once: with `Ok(())` on clean exit, or an error
/// describing the abnormal exit.
#[derive(Debug)]
pub struct EngineExit {
    rx: oneshot::Receiver<anyhow::Result<()>>,
}

impl EngineExit {
    /// Wait for the engine to exit.
    pub async fn wait(self) -> anyhow::Result<()> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("engine supervision task dropped")),
        }
    }
}

/// Spawns and supervises the engine subprocess.
pub struct EngineSupervisor {
    config: Arc<ControllerConfig>,
}

impl EngineSupervisor {
    pub fn new(config: Arc<ControllerConfig>) -> Self {
        Self { config }
    }

    /// Engine argument list per the varnishd CLI contract: foreground
    /// mode, config and secret files, both storage bindings, the
    /// client and admin listen addresses, then any extra parameters
    /// and the optional named working directory.
    pub fn args(&self) -> Vec<String> {
        let c = &self.config;
        let mut args = vec![
            "-F".to_string(),
            "-f".to_string(),
            c.config_file.display().to_string(),
            "-S".to_string(),
            c.secret_file.display().to_string(),
            "-s".to_string(),
            format!("Cache={}", c.storage),
            "-s".to_string(),
            format!("Transient={}", c.transient_storage),
            "-a".to_string(),
            format!("{}:{}", c.frontend_addr, c.frontend_port),
            "-T".to_string(),
            format!("{}:{}", c.admin_addr, c.admin_port),
        ];

        for param in c.extra_parameters() {
            args.push("-p".to_string());
            args.push(param.to_string());
        }

        if let Some(dir) = &c.working_dir {
            args.push("-n".to_string());
            args.push(dir.clone());
        }

        args
    }

    /// Spawn the engine and return its exit signal.
    ///
    /// The child inherits the controller's stdout/stderr unfiltered.
    /// When `shutdown` fires (or its sender is dropped) the child is
    /// terminated promptly: SIGTERM, a bounded grace period, then
    /// SIGKILL.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Result<EngineExit, StartupError> {
        let args = self.args();
        info!(binary = %self.config.engine_binary, ?args, "starting engine");

        let child = Command::new(&self.config.engine_binary)
            .args(&args)
            .current_dir("/")
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| StartupError::Spawn {
                binary: self.config.engine_binary.clone(),
                source: e,
            })?;

        if let Some(pid) = child.id() {
            info!(pid, "engine process spawned");
        }

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = supervise(child, shutdown).await;
            let _ = tx.send(result);
        });

        Ok(EngineExit { rx })
    }
}

/// Wait for the child to exit on its own or terminate it on shutdown.
async fn supervise(mut child: Child, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            status = child.wait() => {
                return exit_result(status?);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    terminate(child).await
}

fn exit_result(status: std::process::ExitStatus) -> anyhow::Result<()> {
    if status.success() {
        info!("engine exited cleanly");
        Ok(())
    } else {
        Err(anyhow::anyhow!("engine exited with {}", status))
    }
}

/// SIGTERM, bounded grace period, then SIGKILL.
async fn terminate(mut child: Child) -> anyhow::Result<()> {
    if let Some(pid) = child.id() {
        info!(pid, "terminating engine");

        #[cfg(unix)]
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }

        #[cfg(not(unix))]
        let _ = child.start_kill();
    }

    match tokio::time::timeout(STOP_GRACE_PERIOD, child.wait()).await {
        Ok(Ok(status)) => exit_result(status),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            warn!(
                grace_secs = STOP_GRACE_PERIOD.as_secs(),
                "grace period exceeded, killing engine"
            );
            child.kill().await?;
            Err(anyhow::anyhow!("engine killed after grace period"))
        }
    }
}
