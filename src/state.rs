//! Shared application state.

use std::sync::Arc;

use crate::orchestrator::Orchestrator;
use crate::store::RecordStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>, orchestrator: Orchestrator) -> Self {
        Self {
            store,
            orchestrator: Arc::new(orchestrator),
        }
    }
}
