//! Shared import context

use std::sync::Arc;

use crate::config::ImporterConfig;
use crate::dispatch::{TaskDispatcher, WorkerPoolDispatcher};
use crate::formats::FormatRegistry;
use crate::metrics::ImportMetrics;

/// Everything an import needs besides its listeners: configuration, known
/// formats, the dispatcher for collection children and process metrics.
///
/// Cloning is cheap; clones share the same registry, dispatcher and metrics.
#[derive(Clone)]
pub struct ImportContext {
    config: Arc<ImporterConfig>,
    formats: Arc<FormatRegistry>,
    dispatcher: Arc<dyn TaskDispatcher>,
    metrics: Arc<ImportMetrics>,
}

impl ImportContext {
    /// Storage paths of `config` are made absolute.
    pub fn new(config: ImporterConfig) -> Self {
        let config = config.absolutized();
        let dispatcher = Arc::new(WorkerPoolDispatcher::new(config.worker_threads));
        Self {
            config: Arc::new(config),
            formats: Arc::new(FormatRegistry::new()),
            dispatcher,
            metrics: ImportMetrics::new(),
        }
    }

    pub fn with_formats(mut self, formats: FormatRegistry) -> Self {
        self.formats = Arc::new(formats);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn config(&self) -> &ImporterConfig {
        &self.config
    }

    pub fn formats(&self) -> &FormatRegistry {
        &self.formats
    }

    pub fn dispatcher(&self) -> &Arc<dyn TaskDispatcher> {
        &self.dispatcher
    }

    pub fn metrics(&self) -> &Arc<ImportMetrics> {
        &self.metrics
    }
}

impl std::fmt::Debug for ImportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportContext")
            .field("config", &self.config)
            .field("formats", &self.formats)
            .field("dispatcher", &self.dispatcher.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_root_made_absolute() {
        let ctx = ImportContext::new(ImporterConfig::with_root("store/images"));
        let cwd = std::env::current_dir().unwrap();

        assert_eq!(ctx.config().root, cwd.join("store/images"));
        assert_eq!(ctx.config().pending_path, cwd.join("store/pending"));
        assert_eq!(ctx.config().writing_path, cwd.join("store/writing"));
    }
}
