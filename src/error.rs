//! Startup error taxonomy for the controller
//!
//! These are the fatal-at-startup cases: each aborts the run
//! immediately with no retry. Steady-state reload failures never show
//! up here; they are contained by the retry policy and logged.

use crate::render::RenderError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The target configuration file could not be created.
    #[error("failed to create configuration file '{path}': {source}")]
    ConfigFileCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The initial configuration could not be rendered.
    #[error("failed to render initial configuration: {0}")]
    InitialRender(#[from] RenderError),

    /// The engine process could not be spawned.
    #[error("failed to spawn engine '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// The admin channel never became ready within the deadline.
    #[error("admin channel at {endpoint} not ready after {timeout_secs}s")]
    AdminNeverReady { endpoint: String, timeout_secs: u64 },
}
