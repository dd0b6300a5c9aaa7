//! Controller orchestration
//!
//! Composes the supervisor, renderer, admin client, watcher loop and
//! retry policy into the startup and steady-state control flow:
//!
//! 1. Wait for the first frontend and backend snapshots (sides without
//!    an update source start empty immediately).
//! 2. Render the initial configuration; file creation or render
//!    failure is fatal.
//! 3. Spawn the engine and gate on the admin channel becoming ready.
//! 4. Run the watcher loop and error-forwarding task concurrently.
//! 5. Return when the engine's exit signal resolves; engine exit of
//!    any kind ends the run.
//!
//! Watcher-triggered reload failures are contained by the retry policy
//! and never propagate out of [`Controller::run`]; only startup
//! failures and the final exit result do.

use crate::admin::AdminClient;
use crate::config::ControllerConfig;
use crate::endpoints::EndpointConfig;
use crate::error::StartupError;
use crate::render::ConfigRenderer;
use crate::retry::RetryPolicy;
use crate::signaller::EndpointSignaller;
use crate::supervisor::EngineSupervisor;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// The two most recently applied topology snapshots.
///
/// Written only by the watcher loop (bootstrap writes happen before
/// any task starts); read by the watcher loop and retry episodes.
#[derive(Default)]
struct TopologyPair {
    frontend: EndpointConfig,
    backend: EndpointConfig,
}

/// Shared render-and-reload state used by the watcher loop and the
/// retry policy. A rebuild always uses the full current pair, never a
/// partial update.
struct Reconfigure {
    config: Arc<ControllerConfig>,
    renderer: Arc<dyn ConfigRenderer>,
    state: RwLock<TopologyPair>,
    admin: AdminClient,
}

impl Reconfigure {
    fn set_frontend(&self, cfg: EndpointConfig) {
        self.state.write().frontend = cfg;
    }

    fn set_backend(&self, cfg: EndpointConfig) {
        self.state.write().backend = cfg;
    }

    fn current(&self) -> (EndpointConfig, EndpointConfig) {
        let state = self.state.read();
        (state.frontend.clone(), state.backend.clone())
    }

    /// Re-render the full current pair and push a live reload.
    async fn rebuild(&self) -> anyhow::Result<()> {
        let (frontend, backend) = self.current();
        self.renderer
            .render_to_file(&frontend, &backend, &self.config.config_file)?;
        self.admin.reload(&self.config.config_file).await
    }
}

/// Sidecar controller for one cache engine process.
pub struct Controller {
    config: Arc<ControllerConfig>,
    renderer: Arc<dyn ConfigRenderer>,
    frontend_updates: Option<mpsc::Receiver<EndpointConfig>>,
    backend_updates: Option<mpsc::Receiver<EndpointConfig>>,
    signaller: Option<Arc<dyn EndpointSignaller>>,
}

impl Controller {
    pub fn new(config: Arc<ControllerConfig>, renderer: Arc<dyn ConfigRenderer>) -> Self {
        Self {
            config,
            renderer,
            frontend_updates: None,
            backend_updates: None,
            signaller: None,
        }
    }

    /// Attach the frontend (peer) topology update source.
    pub fn with_frontend_updates(mut self, rx: mpsc::Receiver<EndpointConfig>) -> Self {
        self.frontend_updates = Some(rx);
        self
    }

    /// Attach the backend (origin) topology update source.
    pub fn with_backend_updates(mut self, rx: mpsc::Receiver<EndpointConfig>) -> Self {
        self.backend_updates = Some(rx);
        self
    }

    /// Attach a signaller notified with the frontend set at bootstrap
    /// and on every frontend update.
    pub fn with_signaller(mut self, signaller: Arc<dyn EndpointSignaller>) -> Self {
        self.signaller = Some(signaller);
        self
    }

    /// Run the controller until the engine exits or startup fails.
    ///
    /// Returns the engine's exit result, or the startup error that
    /// aborted the run. Cancelling `shutdown` terminates the engine,
    /// which in turn resolves this call through the exit signal.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!("waiting for initial configuration before starting engine");

        let frontend = initial_snapshot(&mut self.frontend_updates, "frontend").await;
        let backend = initial_snapshot(&mut self.backend_updates, "backend").await;
        if let Some(signaller) = &self.signaller {
            signaller.set_endpoints(&frontend);
        }

        let admin = AdminClient::new(
            self.config.admin_endpoint(),
            self.config.secret_file.clone(),
            self.config.admin_timeout(),
        );
        let recon = Arc::new(Reconfigure {
            config: Arc::clone(&self.config),
            renderer: Arc::clone(&self.renderer),
            state: RwLock::new(TopologyPair { frontend, backend }),
            admin: admin.clone(),
        });

        info!(path = %self.config.config_file.display(), "creating initial configuration");
        let mut target = std::fs::File::create(&self.config.config_file).map_err(|e| {
            StartupError::ConfigFileCreate {
                path: self.config.config_file.clone(),
                source: e,
            }
        })?;
        {
            let (frontend, backend) = recon.current();
            self.renderer
                .render(&frontend, &backend, &mut target)
                .map_err(StartupError::InitialRender)?;
        }
        drop(target);

        // One stop channel governs the child process; the external
        // shutdown is forwarded into it so both a cancelled run and an
        // internal startup failure terminate the engine promptly.
        let (engine_stop_tx, engine_stop_rx) = watch::channel(false);
        {
            let mut external = shutdown.clone();
            let tx = engine_stop_tx.clone();
            tokio::spawn(async move {
                loop {
                    match external.changed().await {
                        Err(_) => break,
                        Ok(()) if *external.borrow() => break,
                        Ok(()) => {}
                    }
                }
                let _ = tx.send(true);
            });
        }

        let supervisor = EngineSupervisor::new(Arc::clone(&self.config));
        let exit = supervisor.spawn(engine_stop_rx)?;

        if let Err(e) = admin.wait_ready(shutdown.clone()).await {
            // No reload path without the admin channel; tear the
            // engine down and wait for the exit signal before
            // surfacing the failure, so no child outlives the run.
            let _ = engine_stop_tx.send(true);
            if let Err(exit_err) = exit.wait().await {
                warn!(error = %exit_err, "engine terminated after admin gate failure");
            }
            return Err(e);
        }

        let (error_tx, error_rx) = mpsc::channel(16);
        self.spawn_watcher_loop(Arc::clone(&recon), error_tx, shutdown.clone());
        self.spawn_error_forwarder(Arc::clone(&recon), error_rx);

        let result = exit.wait().await;
        match &result {
            Ok(()) => info!("engine exited, controller run complete"),
            Err(e) => warn!(error = %e, "engine exited, controller run complete"),
        }
        result
    }

    /// Long-lived task handling topology updates in arrival order.
    ///
    /// Each update supersedes one side of the pair, then triggers a
    /// full rebuild. Rebuild failures go to the error channel; the
    /// loop itself keeps listening regardless of any single outcome.
    fn spawn_watcher_loop(
        &mut self,
        recon: Arc<Reconfigure>,
        errors: mpsc::Sender<anyhow::Error>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut frontend_rx = self.frontend_updates.take();
        let mut backend_rx = self.backend_updates.take();
        let signaller = self.signaller.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = recv_or_pending(&mut frontend_rx) => match update {
                        Some(cfg) => {
                            info!(endpoints = cfg.len(), "frontend topology updated");
                            if let Some(signaller) = &signaller {
                                signaller.set_endpoints(&cfg);
                            }
                            recon.set_frontend(cfg);
                            if let Err(e) = recon.rebuild().await {
                                if errors.send(e).await.is_err() {
                                    return;
                                }
                            }
                        }
                        None => frontend_rx = None,
                    },
                    update = recv_or_pending(&mut backend_rx) => match update {
                        Some(cfg) => {
                            info!(endpoints = cfg.len(), "backend topology updated");
                            recon.set_backend(cfg);
                            if let Err(e) = recon.rebuild().await {
                                if errors.send(e).await.is_err() {
                                    return;
                                }
                            }
                        }
                        None => backend_rx = None,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("watcher loop shutting down");
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Consumes watcher errors one at a time, running one retry
    /// episode per error. Ends when the watcher loop drops its sender.
    fn spawn_error_forwarder(
        &self,
        recon: Arc<Reconfigure>,
        mut errors: mpsc::Receiver<anyhow::Error>,
    ) {
        let retry = RetryPolicy::new(self.config.max_retries, self.config.retry_backoff());

        tokio::spawn(async move {
            while let Some(err) = errors.recv().await {
                warn!(error = %err, "error while watching for updates");
                let recon = Arc::clone(&recon);
                retry
                    .run(move || {
                        let recon = Arc::clone(&recon);
                        async move { recon.rebuild().await }
                    })
                    .await;
            }
        });
    }
}

/// Bootstrap receive for one topology side: block for the first
/// snapshot when an update source is configured (no timeout by
/// design), otherwise start empty immediately.
async fn initial_snapshot(
    rx: &mut Option<mpsc::Receiver<EndpointConfig>>,
    side: &str,
) -> EndpointConfig {
    match rx {
        Some(rx) => match rx.recv().await {
            Some(cfg) => {
                info!(side, endpoints = cfg.len(), "received initial topology");
                cfg
            }
            None => {
                warn!(side, "update channel closed before first snapshot, starting empty");
                EndpointConfig::empty()
            }
        },
        None => {
            info!(side, "no update source configured, starting empty");
            EndpointConfig::empty()
        }
    }
}

/// Receive from an optional channel; an absent channel never yields.
async fn recv_or_pending(
    rx: &mut Option<mpsc::Receiver<EndpointConfig>>,
) -> Option<EndpointConfig> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
