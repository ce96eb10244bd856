use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DiagnosisConfig;
use crate::diagnosis::machine::DiagnosisStateMachine;
use crate::diagnosis::poller::RetryPolicy;
use crate::diagnosis::store::DiagnosisStore;

pub type AttemptHandle = Arc<Mutex<DiagnosisStateMachine>>;

struct Entry {
    handle: AttemptHandle,
    last_touched: Instant,
}

impl Entry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.last_touched.elapsed() >= ttl
    }
}

/// Live diagnosis attempts keyed by attempt id. Each attempt has its own lock, so a
/// slow poll on one attempt never holds up another. Attempts untouched for longer
/// than the TTL are swept; their sessions stay in the store.
#[derive(Clone)]
pub struct AttemptRegistry {
    store: Arc<dyn DiagnosisStore>,
    policy: RetryPolicy,
    cancel_writes_on_reset: bool,
    ttl: Duration,
    attempts: Arc<RwLock<HashMap<Uuid, Entry>>>,
}

impl AttemptRegistry {
    pub fn new(store: Arc<dyn DiagnosisStore>, config: &DiagnosisConfig) -> Self {
        Self {
            store,
            policy: config.retry_policy(),
            cancel_writes_on_reset: config.cancel_writes_on_reset,
            ttl: config.attempt_ttl(),
            attempts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn create(&self) -> (Uuid, AttemptHandle) {
        self.sweep_expired().await;

        let id = Uuid::new_v4();
        let machine = DiagnosisStateMachine::new(Arc::clone(&self.store), self.policy.clone())
            .with_cancel_writes_on_reset(self.cancel_writes_on_reset);
        let handle = Arc::new(Mutex::new(machine));
        self.attempts.write().await.insert(
            id,
            Entry {
                handle: Arc::clone(&handle),
                last_touched: Instant::now(),
            },
        );
        info!("Opened diagnosis attempt {id}");
        (id, handle)
    }

    /// Looks up an attempt and marks it as used.
    pub async fn get(&self, id: Uuid) -> Option<AttemptHandle> {
        let mut attempts = self.attempts.write().await;
        let entry = attempts.get_mut(&id)?;
        if entry.is_expired(self.ttl) {
            attempts.remove(&id);
            debug!("Diagnosis attempt {id} expired");
            return None;
        }
        entry.last_touched = Instant::now();
        Some(Arc::clone(&entry.handle))
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        let removed = self.attempts.write().await.remove(&id).is_some();
        if removed {
            info!("Closed diagnosis attempt {id}");
        }
        removed
    }

    /// Drops every attempt idle for at least the TTL. Returns how many were dropped.
    pub async fn sweep_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut attempts = self.attempts.write().await;
        let before = attempts.len();
        attempts.retain(|_, entry| !entry.is_expired(ttl));
        let swept = before - attempts.len();
        if swept > 0 {
            info!("Swept {swept} idle diagnosis attempts");
        }
        swept
    }

    /// Runs `sweep_expired` every `every` until the runtime shuts down.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                registry.sweep_expired().await;
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.attempts.read().await.len()
    }
}
