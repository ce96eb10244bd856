//! The diagnosis flow as an explicit state machine.
//!
//! ```text
//! SelectingType ─► LoadingQuestions ─► Answering ─► Computing ─► Ready
//!                        │                ▲ │           │
//!                        ▼                └─┘           ▼
//!                      Failed                         Failed (recoverable)
//! ```
//!
//! `reset` returns to `SelectingType` from anywhere. It drops the session binding but
//! leaves in-flight writes and polls to finish unobserved; everything they touch is keyed
//! by the abandoned session id.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::diagnosis::poller::{ResultPoller, RetryPolicy};
use crate::diagnosis::recorder::AnswerRecorder;
use crate::diagnosis::session::SessionManager;
use crate::diagnosis::store::DiagnosisStore;
use crate::diagnosis::trigger::ComputationTrigger;
use crate::models::diagnosis::{AnswerValue, DiagnosisResultRow, QuestionRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisPhase {
    SelectingType,
    LoadingQuestions,
    Answering,
    Computing,
    Ready,
    Failed,
}

impl DiagnosisPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosisPhase::SelectingType => "selecting_type",
            DiagnosisPhase::LoadingQuestions => "loading_questions",
            DiagnosisPhase::Answering => "answering",
            DiagnosisPhase::Computing => "computing",
            DiagnosisPhase::Ready => "ready",
            DiagnosisPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for DiagnosisPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    /// Store unreachable while creating the session.
    SessionUnavailable(String),
    /// The diagnosis type has no questions.
    NotConfigured(String),
    QuestionsUnavailable(String),
    /// Polling gave up. The computation may still finish; retrying can succeed.
    ResultDelayed,
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::SessionUnavailable(_) => "session_unavailable",
            FailureReason::NotConfigured(_) => "not_configured",
            FailureReason::QuestionsUnavailable(_) => "questions_unavailable",
            FailureReason::ResultDelayed => "result_delayed",
        }
    }

    pub fn message(&self) -> String {
        match self {
            FailureReason::SessionUnavailable(_) => "Could not start session".to_string(),
            FailureReason::NotConfigured(t) => {
                format!("Diagnosis type '{t}' is not configured yet")
            }
            FailureReason::QuestionsUnavailable(_) => "Could not load questions".to_string(),
            FailureReason::ResultDelayed => {
                "Results are delayed, please try again shortly".to_string()
            }
        }
    }

    /// Underlying cause, for logs and clients that want more than the message.
    pub fn detail(&self) -> Option<&str> {
        match self {
            FailureReason::SessionUnavailable(d)
            | FailureReason::NotConfigured(d)
            | FailureReason::QuestionsUnavailable(d) => Some(d.as_str()),
            FailureReason::ResultDelayed => None,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, FailureReason::ResultDelayed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosisState {
    SelectingType,
    LoadingQuestions,
    Answering,
    Computing,
    Ready(Box<DiagnosisResultRow>),
    Failed(FailureReason),
}

impl DiagnosisState {
    pub fn phase(&self) -> DiagnosisPhase {
        match self {
            DiagnosisState::SelectingType => DiagnosisPhase::SelectingType,
            DiagnosisState::LoadingQuestions => DiagnosisPhase::LoadingQuestions,
            DiagnosisState::Answering => DiagnosisPhase::Answering,
            DiagnosisState::Computing => DiagnosisPhase::Computing,
            DiagnosisState::Ready(_) => DiagnosisPhase::Ready,
            DiagnosisState::Failed(_) => DiagnosisPhase::Failed,
        }
    }
}

#[derive(Debug, Error)]
pub enum DiagnosisError {
    #[error("cannot {action} while {phase}")]
    InvalidTransition {
        action: &'static str,
        phase: DiagnosisPhase,
    },

    #[error("answer {0} is outside the 1-5 scale")]
    InvalidAnswer(i64),

    #[error("diagnosis type must not be empty")]
    EmptyDiagnosisType,
}

/// In-memory state of one attempt. Replaced wholesale on reset.
#[derive(Debug, Clone, Default)]
pub struct DiagnosisSession {
    pub session_id: Option<Uuid>,
    pub diagnosis_type: Option<String>,
    pub questions: Vec<QuestionRow>,
    pub cursor: usize,
    pub answers: HashMap<Uuid, AnswerValue>,
}

impl DiagnosisSession {
    pub fn current_question(&self) -> Option<&QuestionRow> {
        self.questions.get(self.cursor)
    }

    pub fn answered(&self) -> usize {
        self.questions
            .iter()
            .filter(|q| self.answers.contains_key(&q.id))
            .count()
    }

    fn first_unanswered(&self) -> Option<usize> {
        self.questions
            .iter()
            .position(|q| !self.answers.contains_key(&q.id))
    }
}

pub struct DiagnosisStateMachine {
    store: Arc<dyn DiagnosisStore>,
    sessions: SessionManager,
    recorder: AnswerRecorder,
    trigger: ComputationTrigger,
    poller: ResultPoller,
    cancel_writes_on_reset: bool,
    state: DiagnosisState,
    session: DiagnosisSession,
    pending_writes: Vec<JoinHandle<()>>,
}

impl DiagnosisStateMachine {
    pub fn new(store: Arc<dyn DiagnosisStore>, policy: RetryPolicy) -> Self {
        Self {
            sessions: SessionManager::new(Arc::clone(&store)),
            recorder: AnswerRecorder::new(Arc::clone(&store)),
            trigger: ComputationTrigger::new(Arc::clone(&store)),
            poller: ResultPoller::new(Arc::clone(&store), policy),
            store,
            cancel_writes_on_reset: false,
            state: DiagnosisState::SelectingType,
            session: DiagnosisSession::default(),
            pending_writes: Vec::new(),
        }
    }

    /// Abort outstanding answer writes on reset instead of letting them finish.
    pub fn with_cancel_writes_on_reset(mut self, cancel: bool) -> Self {
        self.cancel_writes_on_reset = cancel;
        self
    }

    pub fn state(&self) -> &DiagnosisState {
        &self.state
    }

    pub fn phase(&self) -> DiagnosisPhase {
        self.state.phase()
    }

    pub fn session(&self) -> &DiagnosisSession {
        &self.session
    }

    fn transition(&mut self, next: DiagnosisState) {
        let (from, to) = (self.state.phase(), next.phase());
        match (&next, self.session.session_id) {
            (DiagnosisState::Failed(reason), sid) => warn!(
                "Diagnosis {from} -> {to} ({}) session={sid:?}",
                reason.code()
            ),
            (_, sid) => info!("Diagnosis {from} -> {to} session={sid:?}"),
        }
        self.state = next;
    }

    fn expect_phase(
        &self,
        action: &'static str,
        allowed: &[DiagnosisPhase],
    ) -> Result<(), DiagnosisError> {
        let phase = self.phase();
        if allowed.contains(&phase) {
            Ok(())
        } else {
            Err(DiagnosisError::InvalidTransition { action, phase })
        }
    }

    /// SelectingType → LoadingQuestions → Answering | Failed.
    pub async fn select_type(
        &mut self,
        diagnosis_type: &str,
    ) -> Result<&DiagnosisState, DiagnosisError> {
        self.expect_phase("select a diagnosis type", &[DiagnosisPhase::SelectingType])?;
        let diagnosis_type = diagnosis_type.trim();
        if diagnosis_type.is_empty() {
            return Err(DiagnosisError::EmptyDiagnosisType);
        }

        self.session.diagnosis_type = Some(diagnosis_type.to_string());
        self.transition(DiagnosisState::LoadingQuestions);
        self.load(diagnosis_type).await;
        Ok(&self.state)
    }

    /// The external "refresh requested" signal: reloads questions for the bound session
    /// without discarding answers already given.
    pub async fn refresh(&mut self) -> Result<&DiagnosisState, DiagnosisError> {
        let diagnosis_type = match (&self.state, &self.session.diagnosis_type) {
            (DiagnosisState::SelectingType, _) | (_, None) => {
                return Err(DiagnosisError::InvalidTransition {
                    action: "refresh",
                    phase: self.phase(),
                })
            }
            (_, Some(t)) => t.clone(),
        };

        self.transition(DiagnosisState::LoadingQuestions);
        self.load(&diagnosis_type).await;
        Ok(&self.state)
    }

    async fn load(&mut self, diagnosis_type: &str) {
        let (session, questions) = tokio::join!(
            self.sessions.ensure_session(diagnosis_type),
            self.store.list_questions(diagnosis_type),
        );

        let session_id = match session {
            Ok(id) => id,
            Err(e) => {
                self.transition(DiagnosisState::Failed(FailureReason::SessionUnavailable(
                    e.to_string(),
                )));
                return;
            }
        };
        self.session.session_id = Some(session_id);

        let questions = match questions {
            Ok(q) => q,
            Err(e) => {
                self.transition(DiagnosisState::Failed(FailureReason::QuestionsUnavailable(
                    e.to_string(),
                )));
                return;
            }
        };
        if questions.is_empty() {
            self.transition(DiagnosisState::Failed(FailureReason::NotConfigured(
                diagnosis_type.to_string(),
            )));
            return;
        }

        info!(
            "Loaded {} '{diagnosis_type}' questions for session {session_id}",
            questions.len()
        );
        self.session.questions = questions;
        match self.session.first_unanswered() {
            Some(index) => {
                self.session.cursor = index;
                self.transition(DiagnosisState::Answering);
            }
            None => {
                self.session.cursor = self.session.questions.len();
                self.transition(DiagnosisState::Computing);
            }
        }
    }

    /// Answers the question under the cursor and advances. The write happens in the
    /// background. `Answering` is only entered with a bound session.
    pub async fn answer(&mut self, value: i64) -> Result<&DiagnosisState, DiagnosisError> {
        self.expect_phase("answer", &[DiagnosisPhase::Answering])?;
        let value = AnswerValue::new(value).ok_or(DiagnosisError::InvalidAnswer(value))?;
        let session_id = self.bound_session("answer")?;

        let question_id = match self.session.current_question() {
            Some(q) => q.id,
            None => {
                return Err(DiagnosisError::InvalidTransition {
                    action: "answer",
                    phase: self.phase(),
                })
            }
        };

        self.pending_writes.retain(|h| !h.is_finished());
        self.pending_writes
            .push(self.recorder.record_async(session_id, question_id, value));
        self.session.answers.insert(question_id, value);
        self.session.cursor += 1;

        if self.session.cursor >= self.session.questions.len() {
            self.transition(DiagnosisState::Computing);
        }
        Ok(&self.state)
    }

    /// Steps back one question so it can be answered again.
    pub fn back(&mut self) -> Result<&DiagnosisState, DiagnosisError> {
        self.expect_phase("go back", &[DiagnosisPhase::Answering])?;
        if self.session.cursor == 0 {
            return Err(DiagnosisError::InvalidTransition {
                action: "go back from the first question",
                phase: self.phase(),
            });
        }
        self.session.cursor -= 1;
        Ok(&self.state)
    }

    /// Computing → Ready | Failed(ResultDelayed).
    pub async fn compute(&mut self) -> Result<&DiagnosisState, DiagnosisError> {
        self.expect_phase("compute results", &[DiagnosisPhase::Computing])?;
        let session_id = self.bound_session("compute results")?;

        // Advisory: a result from an earlier or queued computation may still show up.
        let _ = self.trigger.trigger(session_id).await;
        self.await_result(session_id).await;
        Ok(&self.state)
    }

    /// Polls again after a delayed result without re-triggering the computation.
    pub async fn retry_results(&mut self) -> Result<&DiagnosisState, DiagnosisError> {
        match &self.state {
            DiagnosisState::Failed(reason) if reason.is_recoverable() => {}
            _ => {
                return Err(DiagnosisError::InvalidTransition {
                    action: "retry results",
                    phase: self.phase(),
                })
            }
        }
        let session_id = self.bound_session("retry results")?;

        self.transition(DiagnosisState::Computing);
        self.await_result(session_id).await;
        Ok(&self.state)
    }

    async fn await_result(&mut self, session_id: Uuid) {
        match self.poller.poll(session_id).await {
            Ok(row) => self.transition(DiagnosisState::Ready(Box::new(row))),
            Err(e) => {
                warn!("No result for session {session_id}: {e}");
                self.transition(DiagnosisState::Failed(FailureReason::ResultDelayed));
            }
        }
    }

    fn bound_session(&self, action: &'static str) -> Result<Uuid, DiagnosisError> {
        self.session
            .session_id
            .ok_or(DiagnosisError::InvalidTransition {
                action,
                phase: self.phase(),
            })
    }

    /// Any state → SelectingType. The next attempt gets a new session.
    pub fn reset(&mut self) -> &DiagnosisState {
        let abandoned = self.sessions.release();
        if self.cancel_writes_on_reset {
            self.recorder.cancel_pending();
        }
        // Dropping the handles detaches the writes; they still complete.
        self.pending_writes.clear();
        self.session = DiagnosisSession::default();
        if let Some(id) = abandoned {
            info!("Abandoned session {id}");
        }
        self.transition(DiagnosisState::SelectingType);
        &self.state
    }

    /// Waits for every answer write scheduled in this attempt. Never needed on the
    /// answering path.
    pub async fn settle_writes(&mut self) {
        for handle in self.pending_writes.drain(..) {
            if let Err(e) = handle.await {
                warn!("Answer write task failed: {e}");
            }
        }
    }
}
