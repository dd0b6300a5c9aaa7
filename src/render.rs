//! Configuration rendering for the cache engine
//!
//! The controller treats rendering as a pluggable pure function of the
//! full `(frontend, backend)` pair. Implementations must be
//! deterministic (the same pair always yields byte-identical output)
//! and total over valid inputs (an empty endpoint set renders fine).
//! A snapshot whose primary is not a member of its own endpoint set is
//! invalid and must be rejected, never silently accepted.

use crate::endpoints::EndpointConfig;
use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

/// Rendering failures.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// A snapshot's primary is not contained in its endpoint set.
    #[error("{side} primary {primary} is not a member of its endpoint set")]
    PrimaryNotMember { side: &'static str, primary: String },

    /// Writing the rendered text to the configuration file failed.
    #[error("failed to write configuration file: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns an endpoint pair into engine configuration text.
///
/// Implementations must not keep state between calls; the controller
/// re-renders the full pair on every topology change and relies on
/// identical input producing identical output.
pub trait ConfigRenderer: Send + Sync {
    /// Render the configuration for the given pair into `out`.
    fn render(
        &self,
        frontend: &EndpointConfig,
        backend: &EndpointConfig,
        out: &mut dyn Write,
    ) -> Result<(), RenderError>;

    /// Render to a file path, overwriting any previous contents.
    fn render_to_file(
        &self,
        frontend: &EndpointConfig,
        backend: &EndpointConfig,
        path: &Path,
    ) -> Result<(), RenderError> {
        let mut text = Vec::new();
        self.render(frontend, backend, &mut text)?;
        // Buffer first so a validation failure never truncates the
        // previous config on disk.
        std::fs::write(path, &text)?;
        Ok(())
    }
}

/// Built-in renderer producing a flat, line-oriented engine config.
///
/// Output lists backends then frontends, each in sorted address order,
/// with the primary marked on its own line. The engine's own config
/// language is owned by whichever renderer is plugged in; this one is
/// deliberately plain so tests can assert on it.
#[derive(Debug, Default, Clone)]
pub struct TextRenderer;

impl TextRenderer {
    fn validate(side: &'static str, config: &EndpointConfig) -> Result<(), RenderError> {
        if !config.primary_is_member() {
            let primary = config
                .primary
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_default();
            return Err(RenderError::PrimaryNotMember { side, primary });
        }
        Ok(())
    }

    fn render_side(section: &str, config: &EndpointConfig, text: &mut String) {
        for (i, endpoint) in config.iter().enumerate() {
            let _ = writeln!(text, "{} {} {} {}", section, i, endpoint.host, endpoint.port);
        }
        if let Some(primary) = &config.primary {
            let _ = writeln!(text, "{} primary {} {}", section, primary.host, primary.port);
        }
    }
}

impl ConfigRenderer for TextRenderer {
    fn render(
        &self,
        frontend: &EndpointConfig,
        backend: &EndpointConfig,
        out: &mut dyn Write,
    ) -> Result<(), RenderError> {
        Self::validate("frontend", frontend)?;
        Self::validate("backend", backend)?;

        let mut text = String::new();
        Self::render_side("backend", backend, &mut text);
        Self::render_side("frontend", frontend, &mut text);

        out.write_all(text.as_bytes())?;
        Ok(())
    }
}
