//! Axum route handlers for the Diagnosis API.
//!
//! Each attempt is a `DiagnosisStateMachine` held in the `AttemptRegistry`. Handlers
//! lock one attempt, drive a single transition (plus `compute` when the transition lands
//! in `Computing`) and return a snapshot of where the attempt ended up.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::diagnosis::machine::{
    DiagnosisError, DiagnosisPhase, DiagnosisState, DiagnosisStateMachine,
};
use crate::diagnosis::registry::AttemptHandle;
use crate::errors::AppError;
use crate::models::diagnosis::{DiagnosisResultRow, QuestionRow};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CreateAttemptRequest {
    pub diagnosis_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SelectTypeRequest {
    pub diagnosis_type: String,
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub value: i64,
}

#[derive(Debug, Serialize)]
pub struct FailureView {
    pub code: &'static str,
    pub message: String,
    pub detail: Option<String>,
    pub recoverable: bool,
}

#[derive(Debug, Serialize)]
pub struct AttemptSnapshot {
    pub attempt_id: Uuid,
    pub phase: DiagnosisPhase,
    pub session_id: Option<Uuid>,
    pub diagnosis_type: Option<String>,
    pub current_question: Option<QuestionRow>,
    pub answered: usize,
    pub total: usize,
    pub result: Option<DiagnosisResultRow>,
    pub failure: Option<FailureView>,
}

impl AttemptSnapshot {
    pub fn capture(attempt_id: Uuid, machine: &DiagnosisStateMachine) -> Self {
        let session = machine.session();
        let (result, failure) = match machine.state() {
            DiagnosisState::Ready(row) => (Some((**row).clone()), None),
            DiagnosisState::Failed(reason) => (
                None,
                Some(FailureView {
                    code: reason.code(),
                    message: reason.message(),
                    detail: reason.detail().map(str::to_string),
                    recoverable: reason.is_recoverable(),
                }),
            ),
            _ => (None, None),
        };
        let current_question = match machine.phase() {
            DiagnosisPhase::Answering => session.current_question().cloned(),
            _ => None,
        };

        Self {
            attempt_id,
            phase: machine.phase(),
            session_id: session.session_id,
            diagnosis_type: session.diagnosis_type.clone(),
            current_question,
            answered: session.answered(),
            total: session.questions.len(),
            result,
            failure,
        }
    }
}

async fn attempt(state: &AppState, id: Uuid) -> Result<AttemptHandle, AppError> {
    state
        .attempts
        .get(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Diagnosis attempt {id} not found")))
}

fn parse_create_request(body: &[u8]) -> Result<CreateAttemptRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CreateAttemptRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Invalid request body: {e}")))
}

/// Runs the result computation if the last transition entered `Computing`.
async fn compute_if_due(machine: &mut DiagnosisStateMachine) -> Result<(), AppError> {
    if machine.phase() == DiagnosisPhase::Computing {
        machine.compute().await?;
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/diagnosis/attempts
///
/// Opens a new attempt. Selects the diagnosis type straight away when one is given.
/// An empty body opens an attempt waiting for a type; a body that is not valid JSON,
/// or names a blank type, is rejected before anything is registered.
pub async fn handle_create_attempt(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<AttemptSnapshot>), AppError> {
    let request = parse_create_request(&body)?;
    let diagnosis_type = match request.diagnosis_type.as_deref().map(str::trim) {
        Some("") => return Err(DiagnosisError::EmptyDiagnosisType.into()),
        other => other,
    };

    let (id, handle) = state.attempts.create().await;
    let mut machine = handle.lock().await;

    if let Some(diagnosis_type) = diagnosis_type {
        machine.select_type(diagnosis_type).await?;
    }

    Ok((
        StatusCode::CREATED,
        Json(AttemptSnapshot::capture(id, &machine)),
    ))
}

/// GET /api/v1/diagnosis/attempts/:id
pub async fn handle_get_attempt(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AttemptSnapshot>, AppError> {
    let handle = attempt(&state, id).await?;
    let machine = handle.lock().await;
    Ok(Json(AttemptSnapshot::capture(id, &machine)))
}

/// POST /api/v1/diagnosis/attempts/:id/type
pub async fn handle_select_type(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SelectTypeRequest>,
) -> Result<Json<AttemptSnapshot>, AppError> {
    let handle = attempt(&state, id).await?;
    let mut machine = handle.lock().await;
    machine.select_type(&request.diagnosis_type).await?;
    Ok(Json(AttemptSnapshot::capture(id, &machine)))
}

/// POST /api/v1/diagnosis/attempts/:id/answers
///
/// Answers the current question. The answer is persisted in the background; on the
/// last question the result is computed before responding.
pub async fn handle_answer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<AttemptSnapshot>, AppError> {
    let handle = attempt(&state, id).await?;
    let mut machine = handle.lock().await;
    machine.answer(request.value).await?;
    compute_if_due(&mut machine).await?;
    Ok(Json(AttemptSnapshot::capture(id, &machine)))
}

/// POST /api/v1/diagnosis/attempts/:id/back
pub async fn handle_back(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AttemptSnapshot>, AppError> {
    let handle = attempt(&state, id).await?;
    let mut machine = handle.lock().await;
    machine.back()?;
    Ok(Json(AttemptSnapshot::capture(id, &machine)))
}

/// POST /api/v1/diagnosis/attempts/:id/refresh
pub async fn handle_refresh(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AttemptSnapshot>, AppError> {
    let handle = attempt(&state, id).await?;
    let mut machine = handle.lock().await;
    machine.refresh().await?;
    compute_if_due(&mut machine).await?;
    Ok(Json(AttemptSnapshot::capture(id, &machine)))
}

/// POST /api/v1/diagnosis/attempts/:id/results/retry
pub async fn handle_retry_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AttemptSnapshot>, AppError> {
    let handle = attempt(&state, id).await?;
    let mut machine = handle.lock().await;
    machine.retry_results().await?;
    Ok(Json(AttemptSnapshot::capture(id, &machine)))
}

/// POST /api/v1/diagnosis/attempts/:id/reset
pub async fn handle_reset(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AttemptSnapshot>, AppError> {
    let handle = attempt(&state, id).await?;
    let mut machine = handle.lock().await;
    machine.reset();
    Ok(Json(AttemptSnapshot::capture(id, &machine)))
}

/// DELETE /api/v1/diagnosis/attempts/:id
///
/// Forgets the attempt once its outstanding answer writes have landed.
pub async fn handle_close_attempt(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let handle = attempt(&state, id).await?;
    state.attempts.remove(id).await;
    handle.lock().await.settle_writes().await;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/diagnosis/sessions/:session_id/result
///
/// Latest stored result for a session, independent of any live attempt.
pub async fn handle_get_session_result(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<DiagnosisResultRow>, AppError> {
    let row = state
        .store
        .latest_result(session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No result for session {session_id} yet")))?;
    Ok(Json(row))
}
