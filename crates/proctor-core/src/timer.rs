//! Countdown that fires a session's expiry exactly once.
//!
//! The countdown runs on its own Tokio task and polls the injected clock
//! against an absolute deadline on every tick. Expiry is therefore decided by
//! elapsed wall-clock time, never by counting ticks, so a suspended process
//! fires on its first tick after resuming.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::{remaining_until, Clock};
use crate::error::SessionError;

/// Lower bound on the polling interval.
pub const MIN_TICK: Duration = Duration::from_millis(10);

/// Work to run when the deadline passes.
pub type ExpiryCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Handle to an armed countdown.
///
/// Dropping the handle stops the countdown and cancels its task.
#[derive(Debug)]
pub struct Countdown {
    deadline: DateTime<Utc>,
    stopped: Arc<AtomicBool>,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

impl Countdown {
    /// Spawn a countdown on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::TimerUnavailable` when called outside a runtime.
    pub fn arm(
        clock: Arc<dyn Clock>,
        deadline: DateTime<Utc>,
        tick: Duration,
        on_expire: ExpiryCallback,
    ) -> Result<Self, SessionError> {
        let runtime = Handle::try_current().map_err(|_| SessionError::TimerUnavailable)?;
        let stopped = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());

        let task = runtime.spawn(run(
            clock,
            deadline,
            tick.max(MIN_TICK),
            Arc::clone(&stopped),
            Arc::clone(&wake),
            on_expire,
        ));

        Ok(Self {
            deadline,
            stopped,
            wake,
            task,
        })
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    /// Time left before the deadline according to `now`.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        remaining_until(self.deadline, now)
    }

    /// Whether the countdown can still fire.
    pub fn is_armed(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    /// Disarm the countdown. Returns `true` if this call disarmed it.
    ///
    /// Never blocks and never waits for the task: the expiry callback itself
    /// runs on the countdown task and calls back into `stop`.
    pub fn stop(&self) -> bool {
        let was_armed = !self.stopped.swap(true, Ordering::AcqRel);
        if was_armed {
            self.wake.notify_one();
        }
        was_armed
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.stop();
        self.task.abort();
    }
}

async fn run(
    clock: Arc<dyn Clock>,
    deadline: DateTime<Utc>,
    tick: Duration,
    stopped: Arc<AtomicBool>,
    wake: Arc<Notify>,
    on_expire: ExpiryCallback,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = wake.notified() => {}
            _ = ticker.tick() => {}
        }

        if stopped.load(Ordering::Acquire) {
            return;
        }
        if clock.now() < deadline {
            continue;
        }
        // Claim the single firing. A concurrent stop() either won already or
        // becomes a no-op.
        if stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::debug!(%deadline, "countdown elapsed");
        on_expire().await;
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::AtomicU32;

    fn counting_callback(fired: &Arc<AtomicU32>) -> ExpiryCallback {
        let fired = Arc::clone(fired);
        Box::new(move || {
            Box::pin(async move {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    async fn let_ticks_run() {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_when_clock_passes_deadline() {
        let clock = ManualClock::fixed();
        let deadline = clock.now() + chrono::TimeDelta::seconds(60);
        let fired = Arc::new(AtomicU32::new(0));

        let countdown = Countdown::arm(
            Arc::new(clock.clone()),
            deadline,
            Duration::from_millis(100),
            counting_callback(&fired),
        )
        .unwrap();

        let_ticks_run().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(countdown.is_armed());

        clock.advance(Duration::from_secs(60));
        let_ticks_run().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!countdown.is_armed());

        clock.advance(Duration::from_secs(60));
        let_ticks_run().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_deadline_suppresses_expiry() {
        let clock = ManualClock::fixed();
        let deadline = clock.now() + chrono::TimeDelta::seconds(5);
        let fired = Arc::new(AtomicU32::new(0));

        let countdown = Countdown::arm(
            Arc::new(clock.clone()),
            deadline,
            Duration::from_millis(100),
            counting_callback(&fired),
        )
        .unwrap();

        assert!(countdown.stop());
        assert!(!countdown.stop());

        clock.advance(Duration::from_secs(10));
        let_ticks_run().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn long_suspension_fires_on_next_tick() {
        // A single clock jump far beyond the deadline stands in for a
        // suspended process: only one tick elapses, yet expiry fires.
        let clock = ManualClock::fixed();
        let deadline = clock.now() + chrono::TimeDelta::seconds(30);
        let fired = Arc::new(AtomicU32::new(0));

        let _countdown = Countdown::arm(
            Arc::new(clock.clone()),
            deadline,
            Duration::from_secs(1),
            counting_callback(&fired),
        )
        .unwrap();

        clock.advance(Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_cancels() {
        let clock = ManualClock::fixed();
        let deadline = clock.now() + chrono::TimeDelta::seconds(1);
        let fired = Arc::new(AtomicU32::new(0));

        let countdown = Countdown::arm(
            Arc::new(clock.clone()),
            deadline,
            Duration::from_millis(100),
            counting_callback(&fired),
        )
        .unwrap();
        drop(countdown);

        clock.advance(Duration::from_secs(5));
        let_ticks_run().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn arm_outside_runtime_fails() {
        let clock = ManualClock::fixed();
        let deadline = clock.now();
        let result = Countdown::arm(
            Arc::new(clock),
            deadline,
            Duration::from_millis(100),
            Box::new(|| Box::pin(async {})),
        );
        assert!(matches!(result, Err(SessionError::TimerUnavailable)));
    }
}
