use std::sync::Arc;

use crate::config::DiagnosisConfig;
use crate::diagnosis::registry::AttemptRegistry;
use crate::diagnosis::store::DiagnosisStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Pluggable store. Production: `PgDiagnosisStore`.
    pub store: Arc<dyn DiagnosisStore>,
    pub attempts: AttemptRegistry,
}

impl AppState {
    pub fn new(store: Arc<dyn DiagnosisStore>, config: &DiagnosisConfig) -> Self {
        Self {
            attempts: AttemptRegistry::new(Arc::clone(&store), config),
            store,
        }
    }
}
