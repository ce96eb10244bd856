//! Persistence boundary for the diagnosis engine.
//!
//! The engine never talks to Postgres directly: every read and write goes through
//! `DiagnosisStore`, carried as `Arc<dyn DiagnosisStore>`. `PgDiagnosisStore` is the
//! production backend; tests use the in-memory double in `diagnosis::memory`.

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::diagnosis::{AnswerRow, DiagnosisResultRow, QuestionRow, SessionRow};

/// Name of the server-side procedure that scores a session.
pub const CALCULATE_PROCEDURE: &str = "calculate_diagnosis";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),

    #[error("query failed ({code}): {message}")]
    Query { code: String, message: String },
}

impl StoreError {
    pub fn query(code: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Query {
            code: code.into(),
            message: message.into(),
        }
    }

    /// SQLSTATE or symbolic code; `None` when the store could not be reached at all.
    pub fn code(&self) -> Option<&str> {
        match self {
            StoreError::Unreachable(_) => None,
            StoreError::Query { code, .. } => Some(code),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(db) => {
                let code = db
                    .code()
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|| "unknown".to_string());
                StoreError::query(code, db.message())
            }
            sqlx::Error::RowNotFound => StoreError::query("no_rows", "no rows returned"),
            sqlx::Error::ColumnNotFound(col) => {
                StoreError::query("column_not_found", format!("column '{col}' not found"))
            }
            e @ (sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. }
            | sqlx::Error::ColumnIndexOutOfBounds { .. }) => {
                StoreError::query("decode", e.to_string())
            }
            e @ (sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_)) => StoreError::Unreachable(e.to_string()),
            other => StoreError::query("unknown", other.to_string()),
        }
    }
}

/// The table-like operations the engine needs from the backend.
#[async_trait]
pub trait DiagnosisStore: Send + Sync {
    /// Inserts a new session row and returns its server-issued id.
    async fn insert_session(&self, diagnosis_type: &str) -> Result<Uuid, StoreError>;

    /// Questions for a diagnosis type, ascending by `order`.
    async fn list_questions(&self, diagnosis_type: &str) -> Result<Vec<QuestionRow>, StoreError>;

    /// Insert-or-update keyed by `(session_id, question_id)`. Last write wins.
    async fn upsert_answer(&self, answer: &AnswerRow) -> Result<(), StoreError>;

    /// The newest result row for a session by `created_at`, if any.
    async fn latest_result(
        &self,
        session_id: Uuid,
    ) -> Result<Option<DiagnosisResultRow>, StoreError>;

    /// Asks the backend to compute a result. May only enqueue work.
    async fn calculate_diagnosis(&self, session_id: Uuid) -> Result<(), StoreError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Postgres backend
// ────────────────────────────────────────────────────────────────────────────

pub struct PgDiagnosisStore {
    pool: PgPool,
}

impl PgDiagnosisStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DiagnosisStore for PgDiagnosisStore {
    async fn insert_session(&self, diagnosis_type: &str) -> Result<Uuid, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            INSERT INTO diagnosis_sessions (diagnosis_type)
            VALUES ($1)
            RETURNING id, diagnosis_type, created_at
            "#,
        )
        .bind(diagnosis_type)
        .fetch_one(&self.pool)
        .await?;
        debug!("Inserted session {} at {}", row.id, row.created_at);
        Ok(row.id)
    }

    async fn list_questions(&self, diagnosis_type: &str) -> Result<Vec<QuestionRow>, StoreError> {
        Ok(sqlx::query_as::<_, QuestionRow>(
            r#"
            SELECT id, text, category, diagnosis_type, "order"
            FROM diagnosis_questions
            WHERE diagnosis_type = $1
            ORDER BY "order" ASC
            "#,
        )
        .bind(diagnosis_type)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn upsert_answer(&self, answer: &AnswerRow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO diagnosis_answers (session_id, question_id, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (session_id, question_id)
            DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(answer.session_id)
        .bind(answer.question_id)
        .bind(answer.value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_result(
        &self,
        session_id: Uuid,
    ) -> Result<Option<DiagnosisResultRow>, StoreError> {
        Ok(sqlx::query_as::<_, DiagnosisResultRow>(
            r#"
            SELECT id, session_id, diagnosis_type, scores, strengths, growth_areas,
                   recommendations, insights, created_at
            FROM diagnosis_results
            WHERE session_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn calculate_diagnosis(&self, session_id: Uuid) -> Result<(), StoreError> {
        // Returns void; the backend may only queue the computation.
        let sql = format!("SELECT {CALCULATE_PROCEDURE}($1)");
        sqlx::query(&sql)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
