use std::sync::Arc;

use crate::core::config::Settings;
use crate::services::ai_grading::ScoringOracle;
use crate::services::text_extraction::TextExtractor;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    extractor: Arc<dyn TextExtractor>,
    oracle: Arc<dyn ScoringOracle>,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        extractor: Arc<dyn TextExtractor>,
        oracle: Arc<dyn ScoringOracle>,
    ) -> Self {
        Self { inner: Arc::new(InnerState { settings, extractor, oracle }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn extractor(&self) -> &dyn TextExtractor {
        self.inner.extractor.as_ref()
    }

    pub(crate) fn oracle(&self) -> &dyn ScoringOracle {
        self.inner.oracle.as_ref()
    }
}
