use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::diagnosis::store::{DiagnosisStore, StoreError, CALCULATE_PROCEDURE};

/// Asks the backend to score a session. Advisory: callers poll for the result whether
/// or not this succeeds, since an earlier or queued computation may still land.
pub struct ComputationTrigger {
    store: Arc<dyn DiagnosisStore>,
}

impl ComputationTrigger {
    pub fn new(store: Arc<dyn DiagnosisStore>) -> Self {
        Self { store }
    }

    pub async fn trigger(&self, session_id: Uuid) -> Result<(), StoreError> {
        match self.store.calculate_diagnosis(session_id).await {
            Ok(()) => {
                info!("Requested {CALCULATE_PROCEDURE} for session {session_id}");
                Ok(())
            }
            Err(e) => {
                warn!("{CALCULATE_PROCEDURE} failed for session {session_id}, polling anyway: {e}");
                Err(e)
            }
        }
    }
}
