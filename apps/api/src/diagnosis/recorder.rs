//! Background answer persistence.
//!
//! `record_async` never suspends its caller: the upsert runs on a spawned task that
//! first yields to the scheduler, so it only proceeds once the answering flow is idle.
//! A failed write is logged and dropped. There is no retry and the user is not told.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::diagnosis::store::DiagnosisStore;
use crate::models::diagnosis::{AnswerRow, AnswerValue};

pub struct AnswerRecorder {
    store: Arc<dyn DiagnosisStore>,
    cancel: CancellationToken,
}

impl AnswerRecorder {
    pub fn new(store: Arc<dyn DiagnosisStore>) -> Self {
        Self {
            store,
            cancel: CancellationToken::new(),
        }
    }

    /// Schedules an upsert and returns at once. The handle may be awaited or dropped;
    /// dropping it detaches the write, it does not cancel it.
    pub fn record_async(
        &self,
        session_id: Uuid,
        question_id: Uuid,
        value: AnswerValue,
    ) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let cancel = self.cancel.clone();
        let row = AnswerRow {
            session_id,
            question_id,
            value: value.get(),
        };

        tokio::spawn(async move {
            tokio::task::yield_now().await;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Answer write for question {question_id} in session {session_id} cancelled");
                }
                res = store.upsert_answer(&row) => match res {
                    Ok(()) => debug!("Saved answer {value} for question {question_id} in session {session_id}"),
                    Err(e) => warn!("Dropped answer for question {question_id} in session {session_id}: {e}"),
                },
            }
        })
    }

    /// Aborts every write scheduled so far that has not completed. Later writes are
    /// unaffected.
    pub fn cancel_pending(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
    }
}
