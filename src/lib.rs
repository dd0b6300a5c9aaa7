//! Cachewarden - a sidecar controller for an HTTP cache engine
//!
//! This library keeps a running cache engine process correctly
//! configured as its upstream topology changes:
//! - Gates startup on the first frontend and backend topology snapshots
//! - Renders engine configuration deterministically from the full pair
//! - Supervises exactly one engine subprocess with pass-through stdio
//! - Waits for the engine's admin channel before watching for updates
//! - Pushes live reloads over the authenticated admin channel
//! - Contains reload failures with a bounded, backoff-delayed retry

pub mod admin;
pub mod config;
pub mod controller;
pub mod endpoints;
pub mod error;
pub mod render;
pub mod retry;
pub mod signaller;
pub mod supervisor;
