//! Topology snapshots consumed by the controller
//!
//! An [`EndpointConfig`] is an immutable snapshot of one topology side
//! (frontend peers or backend origins). Update sources publish a fresh
//! snapshot on every observation; the controller supersedes its current
//! value wholesale and never mutates a snapshot in place, so the watcher
//! loop and a retry episode can never see a torn update.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A single network address in `host:port` form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Immutable snapshot of a peer or origin set plus an optional primary.
///
/// The set is kept ordered so that rendering the same topology always
/// walks the endpoints in the same order, which the renderer contract
/// relies on for byte-identical output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// The endpoints of this topology side.
    #[serde(default)]
    pub endpoints: BTreeSet<Endpoint>,
    /// Optional designated primary; must be a member of `endpoints`.
    #[serde(default)]
    pub primary: Option<Endpoint>,
}

impl EndpointConfig {
    /// An empty snapshot: no endpoints, no primary. Used for topology
    /// sides that have no update source configured.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        Self {
            endpoints: endpoints.into_iter().collect(),
            primary: None,
        }
    }

    /// Set the designated primary. Membership is validated at render
    /// time, not here, so update sources can construct snapshots
    /// without ordering constraints between the two fields.
    pub fn with_primary(mut self, primary: Endpoint) -> Self {
        self.primary = Some(primary);
        self
    }

    /// Whether the primary, if set, is a member of the endpoint set.
    pub fn primary_is_member(&self) -> bool {
        match &self.primary {
            Some(primary) => self.endpoints.contains(primary),
            None => true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Endpoints in their deterministic (sorted) order.
    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }
}
