//! Client side of the engine's admin channel
//!
//! The admin channel is a line-oriented TCP session authenticated with
//! a shared secret file. The engine greets each connection with either
//! `ready` or `auth <challenge>`; in the latter case the client answers
//! with the hex SHA-256 digest of `challenge || secret || challenge`
//! and expects `ok`. Commands are single lines answered with a single
//! `ok ...` or `err ...` line. The controller only ever needs two
//! things from this channel: a readiness probe and the reload command.

use crate::error::StartupError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

/// Interval between readiness probes while the engine boots
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Per-probe connect/auth deadline
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Client for the engine's admin channel.
#[derive(Debug, Clone)]
pub struct AdminClient {
    endpoint: String,
    secret_file: PathBuf,
    ready_timeout: Duration,
}

impl AdminClient {
    pub fn new(endpoint: String, secret_file: PathBuf, ready_timeout: Duration) -> Self {
        Self {
            endpoint,
            secret_file,
            ready_timeout,
        }
    }

    /// Block until the admin channel accepts an authenticated session,
    /// the deadline elapses, or shutdown is requested.
    ///
    /// A deadline expiry is fatal to the whole run: without the admin
    /// channel there is no reload path, so the caller aborts and tears
    /// the engine down.
    pub async fn wait_ready(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let deadline = Instant::now() + self.ready_timeout;
        info!(endpoint = %self.endpoint, "waiting for admin channel");

        loop {
            match tokio::time::timeout(PROBE_TIMEOUT, self.open_session()).await {
                Ok(Ok(_session)) => {
                    info!(endpoint = %self.endpoint, "admin channel ready");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    debug!(endpoint = %self.endpoint, error = %e, "admin probe failed");
                }
                Err(_) => {
                    debug!(endpoint = %self.endpoint, "admin probe timed out");
                }
            }

            if Instant::now() >= deadline {
                return Err(StartupError::AdminNeverReady {
                    endpoint: self.endpoint.clone(),
                    timeout_secs: self.ready_timeout.as_secs(),
                }
                .into());
            }

            tokio::select! {
                _ = tokio::time::sleep(READY_POLL_INTERVAL) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        anyhow::bail!("shutdown requested while waiting for admin channel");
                    }
                }
            }
        }
    }

    /// Instruct the live engine to reload its configuration from `path`.
    pub async fn reload(&self, path: &Path) -> anyhow::Result<()> {
        let mut session = self.open_session().await?;
        session
            .command(&format!("reload {}", path.display()))
            .await?;
        debug!(endpoint = %self.endpoint, path = %path.display(), "engine configuration reloaded");
        Ok(())
    }

    /// Connect and authenticate one admin session.
    async fn open_session(&self) -> anyhow::Result<AdminSession> {
        let stream = TcpStream::connect(&self.endpoint).await?;
        let (read_half, write_half) = stream.into_split();
        let mut session = AdminSession {
            reader: BufReader::new(read_half),
            writer: write_half,
        };

        let greeting = session.read_line().await?;
        if let Some(challenge) = greeting.strip_prefix("auth ") {
            let secret = tokio::fs::read(&self.secret_file).await.map_err(|e| {
                anyhow::anyhow!(
                    "failed to read secret file '{}': {}",
                    self.secret_file.display(),
                    e
                )
            })?;
            let digest = auth_digest(challenge, &secret);
            session.command(&format!("auth {}", digest)).await?;
        } else if !greeting.starts_with("ready") && !greeting.starts_with("ok") {
            anyhow::bail!("unexpected admin greeting: {}", greeting);
        }

        Ok(session)
    }
}

/// Digest binding an auth challenge to the shared secret.
fn auth_digest(challenge: &str, secret: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(challenge.as_bytes());
    hasher.update(secret);
    hasher.update(challenge.as_bytes());
    hex::encode(hasher.finalize())
}

/// One authenticated admin session.
struct AdminSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl AdminSession {
    async fn read_line(&mut self) -> anyhow::Result<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            anyhow::bail!("admin channel closed");
        }
        Ok(line.trim_end().to_string())
    }

    /// Send one command line and check for an `ok` response.
    async fn command(&mut self, line: &str) -> anyhow::Result<String> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;

        let response = self.read_line().await?;
        if response.starts_with("ok") {
            Ok(response)
        } else {
            anyhow::bail!("admin command '{}' rejected: {}", line, response)
        }
    }
}
