use std::sync::Arc;

use tracing::{debug, error, info};
use uuid::Uuid;

use crate::diagnosis::store::{DiagnosisStore, StoreError};

/// Binds at most one session to the current diagnosis attempt.
pub struct SessionManager {
    store: Arc<dyn DiagnosisStore>,
    bound: Option<Uuid>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn DiagnosisStore>) -> Self {
        Self { store, bound: None }
    }

    /// Returns the bound session id, inserting a session row first if none is bound.
    /// A store failure here is fatal for the attempt: nothing can be persisted without it.
    pub async fn ensure_session(&mut self, diagnosis_type: &str) -> Result<Uuid, StoreError> {
        if let Some(id) = self.bound {
            debug!("Reusing session {id} for '{diagnosis_type}'");
            return Ok(id);
        }

        let id = self.store.insert_session(diagnosis_type).await.map_err(|e| {
            error!("Could not start '{diagnosis_type}' session: {e}");
            e
        })?;

        info!("Started session {id} for '{diagnosis_type}'");
        self.bound = Some(id);
        Ok(id)
    }

    pub fn current(&self) -> Option<Uuid> {
        self.bound
    }

    /// Forgets the bound session so the next `ensure_session` starts a fresh one.
    pub fn release(&mut self) -> Option<Uuid> {
        self.bound.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnosis::memory::MemoryStore;

    #[tokio::test]
    async fn test_ensure_session_is_idempotent_within_attempt() {
        let store = Arc::new(MemoryStore::new());
        let mut sessions = SessionManager::new(store.clone());

        let first = sessions.ensure_session("career").await.unwrap();
        let second = sessions.ensure_session("career").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.session_count(), 1);
        assert_eq!(sessions.current(), Some(first));
    }

    #[tokio::test]
    async fn test_release_starts_new_session() {
        let store = Arc::new(MemoryStore::new());
        let mut sessions = SessionManager::new(store.clone());

        let first = sessions.ensure_session("career").await.unwrap();
        assert_eq!(sessions.release(), Some(first));
        let second = sessions.ensure_session("career").await.unwrap();

        assert_ne!(first, second);
        assert_eq!(store.session_count(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_store_binds_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.set_session_error(Some(StoreError::Unreachable("connection refused".into())));
        let mut sessions = SessionManager::new(store.clone());

        let err = sessions.ensure_session("career").await.unwrap_err();

        assert!(matches!(err, StoreError::Unreachable(_)));
        assert_eq!(sessions.current(), None);
    }
}
