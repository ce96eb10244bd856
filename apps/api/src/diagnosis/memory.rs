//! In-memory `DiagnosisStore` used by the engine tests.
//!
//! Faults are injected per operation, and the remote computation can be simulated
//! by making a result row appear only after a given number of result fetches.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use crate::diagnosis::store::{DiagnosisStore, StoreError};
use crate::models::diagnosis::{AnswerRow, DiagnosisResultRow, QuestionRow, SessionRow};

#[derive(Default)]
struct Inner {
    sessions: Vec<SessionRow>,
    questions: HashMap<String, Vec<QuestionRow>>,
    answers: HashMap<(Uuid, Uuid), i16>,
    results: Vec<DiagnosisResultRow>,
    /// (session_id, visible once fetch count reaches this, row)
    pending: Vec<(Uuid, u32, DiagnosisResultRow)>,
    fetches: HashMap<Uuid, u32>,
    calculate_calls: Vec<Uuid>,
    produce_on_calculate: Option<u32>,
    answer_delay: Option<Duration>,
    session_error: Option<StoreError>,
    questions_error: Option<StoreError>,
    answer_error: Option<StoreError>,
    calculate_error: Option<StoreError>,
    fetch_error: Option<StoreError>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

pub fn result_row(session_id: Uuid, created_at: DateTime<Utc>) -> DiagnosisResultRow {
    let mut scores = BTreeMap::new();
    scores.insert("analytical".to_string(), 4.2);
    scores.insert("social".to_string(), 3.1);
    DiagnosisResultRow {
        id: Uuid::new_v4(),
        session_id,
        diagnosis_type: "career".to_string(),
        scores: Json(scores),
        strengths: vec!["analytical".to_string()],
        growth_areas: vec!["social".to_string()],
        recommendations: Json(vec![]),
        insights: vec![],
        created_at,
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_questions(&self, diagnosis_type: &str, count: usize) -> Vec<QuestionRow> {
        let questions: Vec<QuestionRow> = (0..count)
            .map(|i| QuestionRow {
                id: Uuid::new_v4(),
                text: format!("Question {}", i + 1),
                category: if i % 2 == 0 { "analytical" } else { "social" }.to_string(),
                diagnosis_type: diagnosis_type.to_string(),
                order: i as i32 + 1,
            })
            .collect();
        self.inner
            .lock()
            .unwrap()
            .questions
            .insert(diagnosis_type.to_string(), questions.clone());
        questions
    }

    pub fn insert_result(&self, row: DiagnosisResultRow) {
        self.inner.lock().unwrap().results.push(row);
    }

    /// Every `calculate_diagnosis` call schedules a result that becomes visible on the
    /// `visible_on_fetch`-th `latest_result` call for that session.
    pub fn produce_result_on_calculate(&self, visible_on_fetch: u32) {
        self.inner.lock().unwrap().produce_on_calculate = Some(visible_on_fetch);
    }

    pub fn set_answer_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().answer_delay = Some(delay);
    }

    pub fn set_session_error(&self, err: Option<StoreError>) {
        self.inner.lock().unwrap().session_error = err;
    }

    pub fn set_questions_error(&self, err: Option<StoreError>) {
        self.inner.lock().unwrap().questions_error = err;
    }

    pub fn set_answer_error(&self, err: Option<StoreError>) {
        self.inner.lock().unwrap().answer_error = err;
    }

    pub fn set_calculate_error(&self, err: Option<StoreError>) {
        self.inner.lock().unwrap().calculate_error = err;
    }

    pub fn set_fetch_error(&self, err: Option<StoreError>) {
        self.inner.lock().unwrap().fetch_error = err;
    }

    pub fn answers_for(&self, session_id: Uuid) -> Vec<AnswerRow> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<AnswerRow> = inner
            .answers
            .iter()
            .filter(|((sid, _), _)| *sid == session_id)
            .map(|((sid, qid), value)| AnswerRow {
                session_id: *sid,
                question_id: *qid,
                value: *value,
            })
            .collect();
        rows.sort_by_key(|r| r.question_id);
        rows
    }

    pub fn result_fetches(&self, session_id: Uuid) -> u32 {
        self.inner
            .lock()
            .unwrap()
            .fetches
            .get(&session_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn calculate_calls(&self) -> Vec<Uuid> {
        self.inner.lock().unwrap().calculate_calls.clone()
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }
}

#[async_trait]
impl DiagnosisStore for MemoryStore {
    async fn insert_session(&self, diagnosis_type: &str) -> Result<Uuid, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = inner.session_error.clone() {
            return Err(err);
        }
        let id = Uuid::new_v4();
        inner.sessions.push(SessionRow {
            id,
            diagnosis_type: diagnosis_type.to_string(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn list_questions(&self, diagnosis_type: &str) -> Result<Vec<QuestionRow>, StoreError> {
        let inner = self.inner.lock().unwrap();
        if let Some(err) = inner.questions_error.clone() {
            return Err(err);
        }
        let mut questions = inner
            .questions
            .get(diagnosis_type)
            .cloned()
            .unwrap_or_default();
        questions.sort_by_key(|q| q.order);
        Ok(questions)
    }

    async fn upsert_answer(&self, answer: &AnswerRow) -> Result<(), StoreError> {
        let delay = self.inner.lock().unwrap().answer_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = inner.answer_error.clone() {
            return Err(err);
        }
        inner
            .answers
            .insert((answer.session_id, answer.question_id), answer.value);
        Ok(())
    }

    async fn latest_result(
        &self,
        session_id: Uuid,
    ) -> Result<Option<DiagnosisResultRow>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let fetches = {
            let count = inner.fetches.entry(session_id).or_insert(0);
            *count += 1;
            *count
        };
        if let Some(err) = inner.fetch_error.clone() {
            return Err(err);
        }

        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.pending)
            .into_iter()
            .partition(|(sid, visible_on, _)| *sid == session_id && *visible_on <= fetches);
        inner.pending = waiting;
        inner.results.extend(ready.into_iter().map(|(_, _, row)| row));

        Ok(inner
            .results
            .iter()
            .filter(|r| r.session_id == session_id)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn calculate_diagnosis(&self, session_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calculate_calls.push(session_id);
        if let Some(err) = inner.calculate_error.clone() {
            return Err(err);
        }
        if let Some(visible_on) = inner.produce_on_calculate {
            inner
                .pending
                .push((session_id, visible_on, result_row(session_id, Utc::now())));
        }
        Ok(())
    }
}
