//! Injectable logging handle.

use std::fmt::Display;
use std::sync::Arc;

/// Leveled logging sink handed to managed objects.
///
/// Every event is emitted through `tracing` with a `component` field set to
/// the owning instance's canonical name, so subscriber filters and JSON output
/// can attribute lines to individual managed objects.
#[derive(Debug, Clone)]
pub struct Logger {
    component: Arc<str>,
}

impl Logger {
    #[must_use]
    pub fn new(component: impl Into<Arc<str>>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Name this logger attributes its events to.
    #[must_use]
    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn trace(&self, message: impl Display) {
        tracing::trace!(component = %self.component, "{message}");
    }

    pub fn debug(&self, message: impl Display) {
        tracing::debug!(component = %self.component, "{message}");
    }

    pub fn info(&self, message: impl Display) {
        tracing::info!(component = %self.component, "{message}");
    }

    pub fn warn(&self, message: impl Display) {
        tracing::warn!(component = %self.component, "{message}");
    }

    pub fn error(&self, message: impl Display) {
        tracing::error!(component = %self.component, "{message}");
    }
}
