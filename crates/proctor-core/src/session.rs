//! Session state, the shared session handle and the final result.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::answers::AnswerStore;
use crate::error::SessionError;
use crate::model::QuestionSet;
use crate::timer::Countdown;

/// Lifecycle of a session.
///
/// `NotStarted → Running → Finalizing → {Completed, SubmitFailed}`, and
/// `Running → Abandoned`. A failed submission may re-enter `Finalizing` to
/// retry persistence only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    NotStarted = 0,
    Running = 1,
    Finalizing = 2,
    Completed = 3,
    SubmitFailed = 4,
    Abandoned = 5,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SessionState::NotStarted,
            1 => SessionState::Running,
            2 => SessionState::Finalizing,
            3 => SessionState::Completed,
            4 => SessionState::SubmitFailed,
            _ => SessionState::Abandoned,
        }
    }

    /// No further answers or navigation are accepted.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::SubmitFailed | SessionState::Abandoned
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::NotStarted => write!(f, "not started"),
            SessionState::Running => write!(f, "running"),
            SessionState::Finalizing => write!(f, "finalizing"),
            SessionState::Completed => write!(f, "completed"),
            SessionState::SubmitFailed => write!(f, "submit failed"),
            SessionState::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// What ended the running phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitTrigger {
    /// The user submitted.
    Manual,
    /// The countdown ran out.
    Expired,
}

impl SubmitTrigger {
    pub(crate) fn operation(self) -> &'static str {
        match self {
            SubmitTrigger::Manual => "submit",
            SubmitTrigger::Expired => "expire",
        }
    }
}

/// The scored outcome of a session. Produced once, never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResult {
    pub session_id: Uuid,
    pub question_set_id: String,
    /// 0–100, rounded half up.
    pub score: u8,
    pub correct_count: usize,
    pub answered_count: usize,
    pub total_questions: usize,
    /// Wall-clock time between start and the finalizing transition.
    pub elapsed_ms: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub trigger: SubmitTrigger,
    /// The answers the score was computed from.
    pub answers: AnswerStore,
}

impl SessionResult {
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    /// Elapsed time in whole minutes, counting a started minute as taken.
    pub fn minutes_taken(&self) -> u64 {
        self.elapsed_ms.div_ceil(60_000)
    }
}

/// Mutable progress, guarded by one short-lived lock.
#[derive(Debug, Default)]
pub(crate) struct Progress {
    pub(crate) answers: AnswerStore,
    pub(crate) cursor: usize,
    pub(crate) started_at: Option<DateTime<Utc>>,
}

/// One attempt at a question set.
///
/// Sessions are created by [`crate::controller::SessionController::create`]
/// and shared as `Arc<Session>`; all mutation goes through the controller.
/// Everything here is readable at any time.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    questions: Arc<QuestionSet>,
    duration: Option<Duration>,
    state: AtomicU8,
    attempts: AtomicU64,
    progress: Mutex<Progress>,
    outcome: watch::Sender<Option<Arc<SessionResult>>>,
    countdown: Mutex<Option<Countdown>>,
}

impl Session {
    pub(crate) fn new(questions: Arc<QuestionSet>, duration: Option<Duration>) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            id: Uuid::new_v4(),
            questions,
            duration,
            state: AtomicU8::new(SessionState::NotStarted as u8),
            attempts: AtomicU64::new(0),
            progress: Mutex::new(Progress::default()),
            outcome,
            countdown: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn question_set(&self) -> &QuestionSet {
        &self.questions
    }

    /// Configured time limit, if any.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Current question position.
    pub fn cursor(&self) -> usize {
        self.lock_progress().cursor
    }

    pub fn answered_count(&self) -> usize {
        self.lock_progress().answers.answered_count()
    }

    /// The option selected for `position`, if any.
    pub fn answer(&self, position: usize) -> Option<usize> {
        self.lock_progress().answers.get(position)
    }

    /// A copy of the current answers.
    pub fn answers(&self) -> AnswerStore {
        self.lock_progress().answers.clone()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lock_progress().started_at
    }

    /// Deadline of the countdown, once armed.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.lock_countdown().as_ref().map(Countdown::deadline)
    }

    /// Whether a countdown is armed and can still fire.
    pub fn is_timer_armed(&self) -> bool {
        self.lock_countdown()
            .as_ref()
            .is_some_and(Countdown::is_armed)
    }

    /// Number of `submit`/`expire` calls seen so far.
    pub fn submit_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Acquire)
    }

    /// The result, once computed.
    pub fn result(&self) -> Option<Arc<SessionResult>> {
        self.outcome.borrow().clone()
    }

    /// Wait until the session settles in a terminal state.
    ///
    /// Resolves to the result for `Completed`/`SubmitFailed` and to `None`
    /// for `Abandoned`. Useful for callers that need to observe a
    /// timer-driven submission.
    pub async fn wait_for_outcome(&self) -> Option<Arc<SessionResult>> {
        let mut rx = self.outcome.subscribe();
        let settled = rx
            .wait_for(|result| match self.state() {
                SessionState::Abandoned => true,
                SessionState::Completed | SessionState::SubmitFailed => result.is_some(),
                _ => false,
            })
            .await;
        match settled {
            Ok(result) => result.clone(),
            Err(_) => None,
        }
    }

    pub(crate) fn lock_progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_countdown(&self) -> MutexGuard<'_, Option<Countdown>> {
        self.countdown.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically move `from → to`. Returns the observed state on failure.
    pub(crate) fn transition(
        &self,
        from: SessionState,
        to: SessionState,
    ) -> Result<(), SessionState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| self.outcome.send_modify(|_| {}))
            .map_err(SessionState::from_u8)
    }

    /// Fail with `InvalidState` unless the session is in `expected`.
    pub(crate) fn ensure_state(
        &self,
        expected: SessionState,
        operation: &'static str,
    ) -> Result<(), SessionError> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState { operation, state })
        }
    }

    pub(crate) fn record_attempt(&self) -> u64 {
        self.attempts.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Store the single result. Later calls are ignored.
    pub(crate) fn publish_result(&self, result: Arc<SessionResult>) {
        self.outcome.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
            true
        });
    }

    pub(crate) fn install_countdown(&self, countdown: Countdown) {
        *self.lock_countdown() = Some(countdown);
    }

    /// Disarm the countdown if one is armed. Idempotent.
    pub(crate) fn stop_timer(&self) -> bool {
        self.lock_countdown().as_ref().is_some_and(Countdown::stop)
    }
}
