//! Configuration for artifact-sync
//! This is useful when using artifact-sync as a library

use std::{fmt, sync::Arc};

use crate::transform::GeneratedSourceStripper;

/// Global configuration for updating artifact directories
#[derive(Clone, Default)]
pub struct Configuration {
    /// Whether artifacts marked for generated source stripping are stripped.
    /// When disabled they are copied unchanged.
    pub strip_generated_sources: bool,

    /// The implementation that strips generated sources. Stripping falls back
    /// to a plain copy if this is not set.
    pub stripper: Option<Arc<dyn GeneratedSourceStripper>>,
}

impl Configuration {
    /// Enable generated source stripping with the given implementation
    pub fn with_stripper(mut self, stripper: Arc<dyn GeneratedSourceStripper>) -> Self {
        self.strip_generated_sources = true;
        self.stripper = Some(stripper);
        self
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("strip_generated_sources", &self.strip_generated_sources)
            .field("stripper", &self.stripper.as_ref().map(|_| ".."))
            .finish()
    }
}
