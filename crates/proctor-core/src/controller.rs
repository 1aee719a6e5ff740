//! Session controller: the state machine that runs an assessment.
//!
//! Manual submission and countdown expiry race for the same guarded
//! transition `Running → Finalizing`. Whichever caller wins the
//! compare-and-set scores the answers and hands the result to the sink; every
//! other caller waits for that result and returns it unchanged.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::answers::AnswerStore;
use crate::clock::{remaining_until, Clock};
use crate::error::{IndexTarget, SessionError};
use crate::model::QuestionSet;
use crate::scorer;
use crate::session::{Session, SessionResult, SessionState, SubmitTrigger};
use crate::timer::{Countdown, ExpiryCallback};
use crate::traits::ResultSink;

/// Configuration for the session controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// How often an armed countdown checks the clock.
    pub tick_interval: Duration,
    /// Cap recorded elapsed time at the session's duration.
    pub clamp_elapsed_to_duration: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(250),
            clamp_elapsed_to_duration: true,
        }
    }
}

/// Drives sessions through their lifecycle.
///
/// Cheap to clone; clones share the clock and sink. Each armed countdown
/// holds a clone so it can call [`SessionController::expire`].
#[derive(Clone)]
pub struct SessionController {
    sink: Arc<dyn ResultSink>,
    clock: Arc<dyn Clock>,
    config: ControllerConfig,
}

impl SessionController {
    pub fn new(
        sink: Arc<dyn ResultSink>,
        clock: Arc<dyn Clock>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            sink,
            clock,
            config,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Create a session in `NotStarted`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::EmptyQuestionSet` if the set has no questions.
    pub fn create(
        &self,
        questions: impl Into<Arc<QuestionSet>>,
        duration: Option<Duration>,
    ) -> Result<Arc<Session>, SessionError> {
        let questions = questions.into();
        if questions.is_empty() {
            return Err(SessionError::EmptyQuestionSet);
        }
        let duration = duration.filter(|d| !d.is_zero());
        let session = Arc::new(Session::new(questions, duration));
        debug!(
            session_id = %session.id(),
            question_set = %session.question_set().id,
            questions = session.question_set().len(),
            ?duration,
            "session created"
        );
        Ok(session)
    }

    /// Start the session and arm its countdown, if it has a duration.
    ///
    /// Must be called from within a Tokio runtime when a duration is set.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless the session is `NotStarted`,
    /// and `SessionError::TimerUnavailable` if no runtime is available to run
    /// the countdown (the session then stays `NotStarted`).
    pub fn start(&self, session: &Arc<Session>) -> Result<(), SessionError> {
        let mut progress = session.lock_progress();
        session
            .transition(SessionState::NotStarted, SessionState::Running)
            .map_err(|state| SessionError::InvalidState {
                operation: "start",
                state,
            })?;

        let started_at = self.clock.now();
        progress.started_at = Some(started_at);

        if let Some(duration) = session.duration() {
            let deadline = TimeDelta::from_std(duration)
                .ok()
                .and_then(|delta| started_at.checked_add_signed(delta))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            let armed = Countdown::arm(
                Arc::clone(&self.clock),
                deadline,
                self.config.tick_interval,
                self.expiry_callback(session),
            );
            match armed {
                Ok(countdown) => session.install_countdown(countdown),
                Err(err) => {
                    progress.started_at = None;
                    let _ = session.transition(SessionState::Running, SessionState::NotStarted);
                    return Err(err);
                }
            }
        }

        info!(
            session_id = %session.id(),
            %started_at,
            deadline = ?session.deadline(),
            "session started"
        );
        Ok(())
    }

    /// Record `option` as the answer for `position`. The cursor is unchanged.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless running, and
    /// `SessionError::InvalidIndex` for an out-of-range position or option.
    pub fn select_answer(
        &self,
        session: &Session,
        position: usize,
        option: usize,
    ) -> Result<(), SessionError> {
        let mut progress = session.lock_progress();
        session.ensure_state(SessionState::Running, "select an answer")?;

        let set = session.question_set();
        let question = set.get(position).ok_or(SessionError::InvalidIndex {
            target: IndexTarget::Question,
            index: position,
            len: set.len(),
        })?;
        if option >= question.option_count() {
            return Err(SessionError::InvalidIndex {
                target: IndexTarget::Option,
                index: option,
                len: question.option_count(),
            });
        }

        let previous = progress.answers.set(position, option);
        debug!(session_id = %session.id(), position, option, ?previous, "answer selected");
        Ok(())
    }

    /// Move the cursor to `position`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless running, and
    /// `SessionError::InvalidIndex` for an out-of-range position.
    pub fn navigate(&self, session: &Session, position: usize) -> Result<(), SessionError> {
        let mut progress = session.lock_progress();
        session.ensure_state(SessionState::Running, "navigate")?;

        let len = session.question_set().len();
        if position >= len {
            return Err(SessionError::InvalidIndex {
                target: IndexTarget::Question,
                index: position,
                len,
            });
        }
        progress.cursor = position;
        Ok(())
    }

    /// Advance the cursor, stopping at the last question. Returns the new cursor.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless running.
    pub fn next(&self, session: &Session) -> Result<usize, SessionError> {
        let mut progress = session.lock_progress();
        session.ensure_state(SessionState::Running, "navigate")?;
        let last = session.question_set().len().saturating_sub(1);
        progress.cursor = (progress.cursor + 1).min(last);
        Ok(progress.cursor)
    }

    /// Move the cursor back, stopping at the first question. Returns the new cursor.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless running.
    pub fn previous(&self, session: &Session) -> Result<usize, SessionError> {
        let mut progress = session.lock_progress();
        session.ensure_state(SessionState::Running, "navigate")?;
        progress.cursor = progress.cursor.saturating_sub(1);
        Ok(progress.cursor)
    }

    /// Time left on the countdown, if the session has one and is running.
    pub fn remaining(&self, session: &Session) -> Option<Duration> {
        if session.state() != SessionState::Running {
            return None;
        }
        session
            .deadline()
            .map(|deadline| remaining_until(deadline, self.clock.now()))
    }

    /// Submit the session manually.
    ///
    /// If another call already finalized the session, returns that call's
    /// result without scoring or persisting again. In `SubmitFailed`, retries
    /// persistence of the stored result.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` if the session was never started
    /// or was abandoned, and `SessionError::Persistence` if the sink fails.
    pub async fn submit(&self, session: &Session) -> Result<Arc<SessionResult>, SessionError> {
        self.finalize(session, SubmitTrigger::Manual).await
    }

    /// Finalize the session because its time ran out.
    ///
    /// Normally invoked by the countdown; exposed so callers and tests can
    /// drive expiry deterministically. Same semantics as [`Self::submit`].
    ///
    /// # Errors
    ///
    /// See [`Self::submit`].
    pub async fn expire(&self, session: &Session) -> Result<Arc<SessionResult>, SessionError> {
        self.finalize(session, SubmitTrigger::Expired).await
    }

    /// Abandon a running session. No result is produced or persisted.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless running.
    pub fn abandon(&self, session: &Session) -> Result<(), SessionError> {
        {
            let _progress = session.lock_progress();
            session
                .transition(SessionState::Running, SessionState::Abandoned)
                .map_err(|state| SessionError::InvalidState {
                    operation: "abandon",
                    state,
                })?;
        }
        session.stop_timer();
        info!(
            session_id = %session.id(),
            answered = session.answered_count(),
            "session abandoned"
        );
        Ok(())
    }

    async fn finalize(
        &self,
        session: &Session,
        trigger: SubmitTrigger,
    ) -> Result<Arc<SessionResult>, SessionError> {
        let attempt = session.record_attempt();

        if session
            .transition(SessionState::SubmitFailed, SessionState::Finalizing)
            .is_ok()
        {
            return match session.result() {
                Some(result) => {
                    debug!(session_id = %session.id(), attempt, "retrying persistence");
                    self.persist(session, result).await
                }
                None => {
                    let _ =
                        session.transition(SessionState::Finalizing, SessionState::SubmitFailed);
                    Err(SessionError::InvalidState {
                        operation: trigger.operation(),
                        state: SessionState::SubmitFailed,
                    })
                }
            };
        }

        // The transition and the snapshot happen under the progress lock, so
        // the score reflects exactly the answers present at that instant.
        let won = {
            let progress = session.lock_progress();
            match session.transition(SessionState::Running, SessionState::Finalizing) {
                Ok(()) => Ok((progress.answers.clone(), progress.started_at)),
                Err(state) => Err(state),
            }
        };

        let (answers, started_at) = match won {
            Ok(snapshot) => snapshot,
            Err(state @ (SessionState::NotStarted | SessionState::Abandoned)) => {
                return Err(SessionError::InvalidState {
                    operation: trigger.operation(),
                    state,
                });
            }
            Err(state) => {
                debug!(session_id = %session.id(), attempt, %state, ?trigger, "lost finalize race");
                return session
                    .wait_for_outcome()
                    .await
                    .ok_or(SessionError::InvalidState {
                        operation: trigger.operation(),
                        state: session.state(),
                    });
            }
        };

        session.stop_timer();
        let completed_at = self.clock.now();
        let result = Arc::new(self.build_result(
            session,
            answers,
            started_at.unwrap_or(completed_at),
            completed_at,
            trigger,
        ));
        session.publish_result(Arc::clone(&result));
        info!(
            session_id = %session.id(),
            attempt,
            ?trigger,
            score = result.score,
            answered = result.answered_count,
            total = result.total_questions,
            elapsed_ms = result.elapsed_ms,
            "session scored"
        );

        self.persist(session, result).await
    }

    fn build_result(
        &self,
        session: &Session,
        answers: AnswerStore,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        trigger: SubmitTrigger,
    ) -> SessionResult {
        let score = scorer::score(session.question_set(), &answers);

        let mut elapsed = (completed_at - started_at).to_std().unwrap_or(Duration::ZERO);
        if self.config.clamp_elapsed_to_duration {
            if let Some(limit) = session.duration() {
                elapsed = elapsed.min(limit);
            }
        }

        SessionResult {
            session_id: session.id(),
            question_set_id: session.question_set().id.clone(),
            score: score.percent,
            correct_count: score.correct,
            answered_count: score.answered,
            total_questions: score.total,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            started_at,
            completed_at,
            trigger,
            answers,
        }
    }

    async fn persist(
        &self,
        session: &Session,
        result: Arc<SessionResult>,
    ) -> Result<Arc<SessionResult>, SessionError> {
        let guard = FinalizeGuard::new(session);
        let outcome = self.sink.persist(&result, session.id()).await;
        guard.disarm();

        match outcome {
            Ok(()) => {
                let _ = session.transition(SessionState::Finalizing, SessionState::Completed);
                info!(session_id = %session.id(), sink = self.sink.name(), "result persisted");
                Ok(result)
            }
            Err(source) => {
                let _ = session.transition(SessionState::Finalizing, SessionState::SubmitFailed);
                warn!(
                    session_id = %session.id(),
                    sink = self.sink.name(),
                    "failed to persist result: {source}"
                );
                Err(SessionError::Persistence {
                    session_id: session.id(),
                    source,
                })
            }
        }
    }

    fn expiry_callback(&self, session: &Arc<Session>) -> ExpiryCallback {
        let controller = self.clone();
        let handle: Weak<Session> = Arc::downgrade(session);
        Box::new(move || {
            Box::pin(async move {
                let Some(session) = handle.upgrade() else {
                    return;
                };
                match controller.expire(&session).await {
                    Ok(_) => {}
                    Err(SessionError::InvalidState { state, .. }) => {
                        debug!(session_id = %session.id(), %state, "expiry ignored");
                    }
                    Err(err) => {
                        warn!(session_id = %session.id(), "timed submission failed: {err}");
                    }
                }
            })
        })
    }
}

/// Puts a `Finalizing` session back into `SubmitFailed` if the future that
/// owns the persist call is dropped before the sink answers.
struct FinalizeGuard<'a> {
    session: &'a Session,
    armed: bool,
}

impl<'a> FinalizeGuard<'a> {
    fn new(session: &'a Session) -> Self {
        Self {
            session,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for FinalizeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self
            .session
            .transition(SessionState::Finalizing, SessionState::SubmitFailed)
            .is_ok()
        {
            warn!(
                session_id = %self.session.id(),
                "submission cancelled while persisting; result kept for retry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::SinkError;
    use crate::model::Question;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Sink that records calls and can be told to fail or to stall.
    #[derive(Default)]
    struct RecordingSink {
        calls: AtomicU32,
        failures_left: AtomicU32,
        stored: Mutex<Vec<(Uuid, SessionResult)>>,
        delay: Option<Duration>,
    }

    impl RecordingSink {
        fn failing(times: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(times),
                ..Default::default()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Default::default()
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn stored(&self) -> Vec<(Uuid, SessionResult)> {
            self.stored.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ResultSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn persist(&self, result: &SessionResult, session_id: Uuid) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(SinkError::Unavailable("injected failure".into()));
            }
            self.stored.lock().unwrap().push((session_id, result.clone()));
            Ok(())
        }
    }

    fn make_set(correct: &[usize]) -> QuestionSet {
        QuestionSet {
            id: "aptitude-1".into(),
            title: "Aptitude".into(),
            description: String::new(),
            test_type: Some("aptitude".into()),
            duration_minutes: None,
            max_score: None,
            questions: correct
                .iter()
                .enumerate()
                .map(|(i, c)| Question {
                    id: format!("q{}", i + 1),
                    prompt: format!("Question {}", i + 1),
                    options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
                    correct_option: *c,
                    explanation: None,
                })
                .collect(),
        }
    }

    fn setup(sink: RecordingSink) -> (SessionController, Arc<RecordingSink>, ManualClock) {
        let sink = Arc::new(sink);
        let clock = ManualClock::fixed();
        let controller = SessionController::new(
            sink.clone(),
            Arc::new(clock.clone()),
            ControllerConfig {
                tick_interval: Duration::from_millis(100),
                ..Default::default()
            },
        );
        (controller, sink, clock)
    }

    #[test]
    fn create_rejects_empty_set() {
        let (controller, _, _) = setup(RecordingSink::default());
        let err = controller.create(make_set(&[]), None).unwrap_err();
        assert!(matches!(err, SessionError::EmptyQuestionSet));
    }

    #[test]
    fn start_only_from_not_started() {
        let (controller, _, _) = setup(RecordingSink::default());
        let session = controller.create(make_set(&[0]), None).unwrap();
        assert_eq!(session.state(), SessionState::NotStarted);

        controller.start(&session).unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert!(session.started_at().is_some());

        let err = controller.start(&session).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                state: SessionState::Running,
                ..
            }
        ));
    }

    #[test]
    fn start_with_duration_outside_runtime_stays_not_started() {
        let (controller, _, _) = setup(RecordingSink::default());
        let session = controller
            .create(make_set(&[0]), Some(Duration::from_secs(30)))
            .unwrap();
        let err = controller.start(&session).unwrap_err();
        assert!(matches!(err, SessionError::TimerUnavailable));
        assert_eq!(session.state(), SessionState::NotStarted);
        assert!(session.started_at().is_none());
    }

    #[test]
    fn select_answer_validates_state_and_bounds() {
        let (controller, _, _) = setup(RecordingSink::default());
        let session = controller.create(make_set(&[0, 1]), None).unwrap();

        let err = controller.select_answer(&session, 0, 0).unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));

        controller.start(&session).unwrap();
        let err = controller.select_answer(&session, 2, 0).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidIndex {
                target: IndexTarget::Question,
                index: 2,
                len: 2
            }
        ));
        let err = controller.select_answer(&session, 1, 4).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidIndex {
                target: IndexTarget::Option,
                index: 4,
                len: 4
            }
        ));
        assert_eq!(session.answered_count(), 0);

        controller.select_answer(&session, 1, 2).unwrap();
        controller.select_answer(&session, 1, 3).unwrap();
        assert_eq!(session.answer(1), Some(3));
        assert_eq!(session.answered_count(), 1);
        assert_eq!(session.cursor(), 0);
    }

    #[test]
    fn navigation_moves_cursor_only() {
        let (controller, _, _) = setup(RecordingSink::default());
        let session = controller.create(make_set(&[0, 1, 2]), None).unwrap();
        controller.start(&session).unwrap();

        controller.navigate(&session, 2).unwrap();
        assert_eq!(session.cursor(), 2);
        assert_eq!(controller.next(&session).unwrap(), 2);
        assert_eq!(controller.previous(&session).unwrap(), 1);
        assert_eq!(controller.previous(&session).unwrap(), 0);
        assert_eq!(controller.previous(&session).unwrap(), 0);

        let err = controller.navigate(&session, 3).unwrap_err();
        assert!(matches!(err, SessionError::InvalidIndex { .. }));
        assert_eq!(session.cursor(), 0);
        assert_eq!(session.answered_count(), 0);
    }

    #[tokio::test]
    async fn submit_scores_and_persists_once() {
        let (controller, sink, _) = setup(RecordingSink::default());
        let session = controller.create(make_set(&[0, 1, 2, 3]), None).unwrap();
        controller.start(&session).unwrap();
        for (position, option) in [(0, 0), (1, 1), (2, 3), (3, 3)] {
            controller.select_answer(&session, position, option).unwrap();
        }

        let result = controller.submit(&session).await.unwrap();
        assert_eq!(result.score, 75);
        assert_eq!(result.correct_count, 3);
        assert_eq!(result.answered_count, 4);
        assert_eq!(result.total_questions, 4);
        assert_eq!(result.trigger, SubmitTrigger::Manual);
        assert_eq!(session.state(), SessionState::Completed);

        let again = controller.submit(&session).await.unwrap();
        assert!(Arc::ptr_eq(&result, &again));
        assert_eq!(sink.calls(), 1);
        assert_eq!(session.submit_attempts(), 2);
        assert_eq!(sink.stored()[0].0, session.id());
    }

    #[tokio::test]
    async fn concurrent_submit_and_expire_finalize_once() {
        let (controller, sink, _) = setup(RecordingSink::slow(Duration::from_millis(50)));
        let session = controller.create(make_set(&[1, 1]), None).unwrap();
        controller.start(&session).unwrap();
        controller.select_answer(&session, 0, 1).unwrap();

        let (a, b, c) = tokio::join!(
            controller.submit(&session),
            controller.expire(&session),
            controller.submit(&session),
        );
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&b, &c));
        assert_eq!(a.score, 50);
        assert_eq!(sink.calls(), 1);
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.submit_attempts(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_tasks_on_many_threads_finalize_once() {
        let (controller, sink, _) = setup(RecordingSink::default());
        let session = controller.create(make_set(&[0, 0, 0]), None).unwrap();
        controller.start(&session).unwrap();
        controller.select_answer(&session, 2, 0).unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let controller = controller.clone();
            let session = Arc::clone(&session);
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    controller.submit(&session).await
                } else {
                    controller.expire(&session).await
                }
            }));
        }

        let mut scores = Vec::new();
        for handle in handles {
            scores.push(handle.await.unwrap().unwrap().score);
        }
        assert!(scores.iter().all(|s| *s == 33));
        assert_eq!(sink.calls(), 1);
        assert_eq!(sink.stored().len(), 1);
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_expiry_finalizes_with_current_answers() {
        let (controller, sink, clock) = setup(RecordingSink::default());
        let session = controller
            .create(make_set(&[0, 1, 2, 3]), Some(Duration::from_secs(60)))
            .unwrap();
        controller.start(&session).unwrap();
        assert!(session.is_timer_armed());

        controller.select_answer(&session, 0, 0).unwrap();
        clock.advance(Duration::from_secs(30));
        assert_eq!(controller.remaining(&session), Some(Duration::from_secs(30)));
        controller.select_answer(&session, 1, 1).unwrap();

        clock.advance(Duration::from_secs(30));
        let result = session.wait_for_outcome().await.unwrap();

        assert_eq!(result.trigger, SubmitTrigger::Expired);
        assert_eq!(result.score, 50);
        assert_eq!(result.answered_count, 2);
        assert_eq!(result.elapsed(), Duration::from_secs(60));
        assert_eq!(session.state(), SessionState::Completed);
        assert!(!session.is_timer_armed());
        assert_eq!(sink.calls(), 1);

        let err = controller.select_answer(&session, 2, 2).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                state: SessionState::Completed,
                ..
            }
        ));
        assert!(Arc::ptr_eq(&session.result().unwrap(), &result));
        assert_eq!(session.answer(2), None);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_submit_before_expiry() {
        let (controller, sink, clock) = setup(RecordingSink::default());
        let session = controller
            .create(make_set(&[0, 1, 2, 3]), Some(Duration::from_secs(5)))
            .unwrap();
        controller.start(&session).unwrap();
        controller.select_answer(&session, 0, 0).unwrap();
        controller.select_answer(&session, 1, 1).unwrap();
        controller.select_answer(&session, 2, 0).unwrap();

        clock.advance(Duration::from_secs(3));
        let result = controller.submit(&session).await.unwrap();
        assert_eq!(result.score, 50);
        assert_eq!(result.elapsed(), Duration::from_secs(3));
        assert!(!session.is_timer_armed());

        clock.advance(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(sink.calls(), 1);
        assert_eq!(session.state(), SessionState::Completed);
        let stored = session.result().unwrap();
        assert!(Arc::ptr_eq(&stored, &result));
        assert_eq!(stored.trigger, SubmitTrigger::Manual);
    }

    #[tokio::test]
    async fn elapsed_is_clamped_to_duration() {
        let (controller, _, clock) = setup(RecordingSink::default());
        let session = controller
            .create(make_set(&[0]), Some(Duration::from_secs(10)))
            .unwrap();
        controller.start(&session).unwrap();

        // Submitted late, e.g. the process was suspended past the deadline.
        clock.advance(Duration::from_secs(45));
        let result = controller.submit(&session).await.unwrap();
        assert_eq!(result.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn failed_persistence_retries_without_rescoring() {
        let (controller, sink, clock) = setup(RecordingSink::failing(1));
        let session = controller.create(make_set(&[0, 1]), None).unwrap();
        controller.start(&session).unwrap();
        controller.select_answer(&session, 0, 0).unwrap();
        clock.advance(Duration::from_secs(7));

        let err = controller.submit(&session).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(session.state(), SessionState::SubmitFailed);
        let first = session.result().unwrap();
        assert_eq!(first.score, 50);

        let err = controller.select_answer(&session, 1, 1).unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));

        clock.advance(Duration::from_secs(60));
        let retried = controller.submit(&session).await.unwrap();
        assert!(Arc::ptr_eq(&first, &retried));
        assert_eq!(retried.elapsed(), Duration::from_secs(7));
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(sink.calls(), 2);
        assert_eq!(sink.stored().len(), 1);
    }

    #[tokio::test]
    async fn expire_after_failed_submission_only_retries_persistence() {
        let (controller, sink, clock) = setup(RecordingSink::failing(1));
        let session = controller.create(make_set(&[0, 1]), None).unwrap();
        controller.start(&session).unwrap();
        controller.select_answer(&session, 1, 1).unwrap();

        assert!(controller.submit(&session).await.is_err());
        let first = session.result().unwrap();

        clock.advance(Duration::from_secs(30));
        let retried = controller.expire(&session).await.unwrap();
        assert!(Arc::ptr_eq(&first, &retried));
        assert_eq!(retried.trigger, SubmitTrigger::Manual);
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(sink.calls(), 2);
        assert_eq!(sink.stored().len(), 1);
    }

    #[tokio::test]
    async fn finished_session_rejects_every_mutation() {
        let (controller, sink, _) = setup(RecordingSink::failing(1));
        let session = controller.create(make_set(&[0, 1, 2]), None).unwrap();
        controller.start(&session).unwrap();
        controller.select_answer(&session, 0, 0).unwrap();
        controller.navigate(&session, 1).unwrap();

        assert!(controller.submit(&session).await.is_err());
        let failed = session.result().unwrap();

        let assert_rejected = |session: &Session, expected: SessionState| {
            for err in [
                controller.select_answer(session, 2, 2).unwrap_err(),
                controller.navigate(session, 2).unwrap_err(),
                controller.next(session).unwrap_err(),
                controller.previous(session).unwrap_err(),
                controller.abandon(session).unwrap_err(),
            ] {
                assert!(
                    matches!(err, SessionError::InvalidState { state, .. } if state == expected),
                    "got: {err}"
                );
            }
            assert_eq!(session.cursor(), 1);
            assert_eq!(session.answered_count(), 1);
        };

        assert_rejected(&*session, SessionState::SubmitFailed);
        assert!(Arc::ptr_eq(&session.result().unwrap(), &failed));

        let stored = controller.submit(&session).await.unwrap();
        assert!(Arc::ptr_eq(&stored, &failed));

        assert_rejected(&*session, SessionState::Completed);
        assert!(Arc::ptr_eq(&session.result().unwrap(), &failed));
        assert_eq!(controller.remaining(&session), None);
        assert_eq!(sink.stored().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_submission_stays_retryable() {
        let (controller, sink, _) = setup(RecordingSink::slow(Duration::from_millis(200)));
        let session = controller.create(make_set(&[0, 1]), None).unwrap();
        controller.start(&session).unwrap();
        controller.select_answer(&session, 0, 0).unwrap();

        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), controller.submit(&session)).await;
        assert!(cancelled.is_err());
        assert_eq!(session.state(), SessionState::SubmitFailed);
        let first = session.result().unwrap();
        assert_eq!(first.score, 50);

        // A cancelled retry falls back the same way.
        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), controller.expire(&session)).await;
        assert!(cancelled.is_err());
        assert_eq!(session.state(), SessionState::SubmitFailed);

        let stored = tokio::time::timeout(Duration::from_secs(2), controller.submit(&session))
            .await
            .expect("retry should not hang")
            .unwrap();
        assert!(Arc::ptr_eq(&first, &stored));
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(sink.calls(), 3);
        assert_eq!(sink.stored().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandon_stops_timer_and_never_persists() {
        let (controller, sink, clock) = setup(RecordingSink::default());
        let session = controller
            .create(make_set(&[0, 1]), Some(Duration::from_secs(20)))
            .unwrap();
        controller.start(&session).unwrap();
        controller.select_answer(&session, 0, 0).unwrap();

        controller.abandon(&session).unwrap();
        assert_eq!(session.state(), SessionState::Abandoned);
        assert!(!session.is_timer_armed());
        assert!(session.wait_for_outcome().await.is_none());

        clock.advance(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.calls(), 0);
        assert!(session.result().is_none());

        let err = controller.submit(&session).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                state: SessionState::Abandoned,
                ..
            }
        ));
        assert!(controller.abandon(&session).is_err());
    }

    #[tokio::test]
    async fn submit_before_start_is_invalid() {
        let (controller, sink, _) = setup(RecordingSink::default());
        let session = controller.create(make_set(&[0]), None).unwrap();
        let err = controller.submit(&session).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                state: SessionState::NotStarted,
                ..
            }
        ));
        assert_eq!(sink.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_session_cancels_countdown() {
        let (controller, sink, clock) = setup(RecordingSink::default());
        let session = controller
            .create(make_set(&[0]), Some(Duration::from_secs(5)))
            .unwrap();
        controller.start(&session).unwrap();
        drop(session);

        clock.advance(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.calls(), 0);
    }
}
