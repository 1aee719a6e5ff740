//! In-memory result sink for tests and throwaway sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use proctor_core::traits::ResultSink;
use proctor_core::{SessionResult, SinkError};

/// Keeps results in a map keyed by session id.
///
/// Counts every call and can be told to fail the next N calls, which makes it
/// the test double for exercising retry paths.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<HashMap<Uuid, SessionResult>>,
    call_count: AtomicU32,
    failures_remaining: AtomicU32,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls fail with `SinkError::Unavailable`.
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Number of `persist` calls made, including failed ones.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Number of distinct sessions stored.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, session_id: Uuid) -> Option<SessionResult> {
        self.lock().get(&session_id).cloned()
    }

    /// All stored results, oldest completion first.
    pub fn results(&self) -> Vec<SessionResult> {
        let mut results: Vec<_> = self.lock().values().cloned().collect();
        results.sort_by_key(|r| r.completed_at);
        results
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, SessionResult>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn persist(&self, result: &SessionResult, session_id: Uuid) -> Result<(), SinkError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        let inject = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if inject {
            return Err(SinkError::Unavailable("injected failure".into()));
        }

        self.lock()
            .entry(session_id)
            .or_insert_with(|| result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proctor_core::answers::AnswerStore;
    use proctor_core::SubmitTrigger;

    fn result(score: u8) -> SessionResult {
        SessionResult {
            session_id: Uuid::new_v4(),
            question_set_id: "set".into(),
            score,
            correct_count: 1,
            answered_count: 1,
            total_questions: 2,
            elapsed_ms: 1_000,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            trigger: SubmitTrigger::Manual,
            answers: AnswerStore::new(),
        }
    }

    #[tokio::test]
    async fn persist_is_idempotent_per_session() {
        let sink = MemorySink::new();
        let first = result(50);
        let id = first.session_id;

        sink.persist(&first, id).await.unwrap();
        sink.persist(&result(100), id).await.unwrap();

        assert_eq!(sink.call_count(), 2);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.get(id).unwrap().score, 50);
    }

    #[tokio::test]
    async fn injected_failures_then_success() {
        let sink = MemorySink::new();
        sink.fail_next(2);
        let r = result(75);

        let err = sink.persist(&r, r.session_id).await.unwrap_err();
        assert!(!err.is_permanent());
        assert!(sink.persist(&r, r.session_id).await.is_err());
        sink.persist(&r, r.session_id).await.unwrap();

        assert_eq!(sink.call_count(), 3);
        assert_eq!(sink.results().len(), 1);
    }
}
