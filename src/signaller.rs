//! Push notification of frontend topology to interested collaborators
//!
//! The controller notifies a signaller with the frontend endpoint set
//! at bootstrap and on every frontend update. This is fire-and-forget:
//! the controller never blocks on or inspects the outcome.

use crate::endpoints::EndpointConfig;
use tracing::info;

/// Receives the current frontend endpoint set whenever it changes.
pub trait EndpointSignaller: Send + Sync {
    fn set_endpoints(&self, frontend: &EndpointConfig);
}

/// Default signaller that only logs the new frontend set.
#[derive(Debug, Default)]
pub struct LogSignaller;

impl EndpointSignaller for LogSignaller {
    fn set_endpoints(&self, frontend: &EndpointConfig) {
        info!(
            endpoints = frontend.len(),
            primary = ?frontend.primary,
            "frontend endpoints updated"
        );
    }
}
