use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// One attempt at a diagnosis type. Immutable once inserted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub diagnosis_type: String,
    pub created_at: DateTime<Utc>,
}

/// Read-only reference data, ordered by `order` within a diagnosis type.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct QuestionRow {
    pub id: Uuid,
    pub text: String,
    pub category: String,
    pub diagnosis_type: String,
    pub order: i32,
}

/// Unique on `(session_id, question_id)`; writes are upserts.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct AnswerRow {
    pub session_id: Uuid,
    pub question_id: Uuid,
    pub value: i16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub title: String,
    pub match_percent: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub required_skills: Vec<String>,
    #[serde(default)]
    pub salary_band: String,
    #[serde(default)]
    pub growth_rate: String,
}

/// Written by the remote `calculate_diagnosis` procedure, only ever read here.
/// Several rows may exist per session; the newest `created_at` is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct DiagnosisResultRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub diagnosis_type: String,
    pub scores: Json<BTreeMap<String, f64>>,
    pub strengths: Vec<String>,
    pub growth_areas: Vec<String>,
    pub recommendations: Json<Vec<Recommendation>>,
    pub insights: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A single answer on the fixed 1–5 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnswerValue(i16);

impl AnswerValue {
    pub const MIN: i16 = 1;
    pub const MAX: i16 = 5;

    pub fn new(value: i64) -> Option<Self> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&value) {
            Some(Self(value as i16))
        } else {
            None
        }
    }

    pub fn get(self) -> i16 {
        self.0
    }
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
