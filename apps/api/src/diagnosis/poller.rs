//! Bounded polling for the eventually-consistent diagnosis result.
//!
//! The remote computation gives no completion signal, so the only way to observe it is
//! to re-query `diagnosis_results`. Each attempt reads the newest row for the session;
//! the policy decides how many attempts to make, how long to wait between them, and
//! which store errors end polling early.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::diagnosis::store::{DiagnosisStore, StoreError};
use crate::models::diagnosis::DiagnosisResultRow;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(300);

/// Schema/shape mismatches. Retrying cannot fix these.
pub const DEFAULT_NON_RETRYABLE_CODES: &[&str] = &[
    "42P01", // undefined_table
    "42703", // undefined_column
    "42804", // datatype_mismatch
    "column_not_found",
    "decode",
];

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub non_retryable_codes: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
            non_retryable_codes: DEFAULT_NON_RETRYABLE_CODES
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// Zero-delay policy with the default error whitelist.
    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            interval: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn is_retryable(&self, err: &StoreError) -> bool {
        match err.code() {
            None => true,
            Some(code) => !self.non_retryable_codes.iter().any(|c| c == code),
        }
    }

    /// Upper bound on time spent sleeping across a fully exhausted poll.
    pub fn total_wait(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// Outcome of a single result fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultFetch {
    Ready(DiagnosisResultRow),
    NotFound,
    RetryableError(String),
    FatalError(String),
}

impl ResultFetch {
    pub fn classify(
        res: Result<Option<DiagnosisResultRow>, StoreError>,
        policy: &RetryPolicy,
    ) -> Self {
        match res {
            Ok(Some(row)) => ResultFetch::Ready(row),
            Ok(None) => ResultFetch::NotFound,
            Err(e) => {
                let code = e.code().unwrap_or("unreachable").to_string();
                if policy.is_retryable(&e) {
                    ResultFetch::RetryableError(code)
                } else {
                    ResultFetch::FatalError(code)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PollError {
    #[error("result not ready after {attempts} attempts")]
    NotReady { attempts: u32 },

    #[error("result fetch failed with non-retryable code {code}")]
    Fatal { code: String },
}

pub struct ResultPoller {
    store: Arc<dyn DiagnosisStore>,
    policy: RetryPolicy,
}

impl ResultPoller {
    pub fn new(store: Arc<dyn DiagnosisStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub async fn fetch(&self, session_id: Uuid) -> ResultFetch {
        ResultFetch::classify(self.store.latest_result(session_id).await, &self.policy)
    }

    /// Returns the newest result for the session, retrying while it is absent.
    /// Giving up does not cancel the remote computation; a later poll may still see it.
    pub async fn poll(&self, session_id: Uuid) -> Result<DiagnosisResultRow, PollError> {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.fetch(session_id).await {
                ResultFetch::Ready(row) => {
                    info!("Result for session {session_id} ready on attempt {attempt}");
                    return Ok(row);
                }
                ResultFetch::FatalError(code) => {
                    warn!("Result fetch for session {session_id} failed ({code}), not retrying");
                    return Err(PollError::Fatal { code });
                }
                ResultFetch::RetryableError(code) => {
                    debug!("Result fetch {attempt}/{max_attempts} for session {session_id} failed ({code})");
                }
                ResultFetch::NotFound => {
                    debug!("Result for session {session_id} not ready ({attempt}/{max_attempts})");
                }
            }

            if attempt < max_attempts && !self.policy.interval.is_zero() {
                tokio::time::sleep(self.policy.interval).await;
            }
        }

        warn!("Result for session {session_id} still not ready after {max_attempts} attempts");
        Err(PollError::NotReady {
            attempts: max_attempts,
        })
    }
}
