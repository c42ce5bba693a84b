#[cfg(test)]
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// Clock is the source of "now" for idle tracking and morgue quarantine. Bounded waits on
/// channels still use tokio's timer directly; only decisions that compare ages go through here,
/// which lets tests jump time forward without sleeping.
#[async_trait::async_trait]
pub(crate) trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
    async fn sleep_until(&mut self, deadline: Instant);

    async fn sleep(&mut self, duration: Duration) {
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await;
    }

    /// Time elapsed since `earlier`, saturating at zero.
    fn since(&self, earlier: Instant) -> Duration {
        self.now().saturating_duration_since(earlier)
    }
}

#[derive(Copy, Clone)]
pub(crate) struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

/// A clock that only moves when its controller says so. Cloned clocks share the same time.
#[cfg(test)]
pub(crate) fn mocked_clock() -> (MockClock, MockClockController) {
    let (now_tx, now_rx) = watch::channel(Instant::now());
    (MockClock { now: now_rx }, MockClockController { now: now_tx })
}

#[cfg(test)]
#[derive(Clone)]
pub(crate) struct MockClock {
    now: watch::Receiver<Instant>,
}

#[cfg(test)]
#[async_trait::async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.now.borrow()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        while self.now() < deadline {
            if self.now.changed().await.is_err() {
                // The controller is gone, time stands still.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
pub(crate) struct MockClockController {
    now: watch::Sender<Instant>,
}

#[cfg(test)]
impl MockClockController {
    /// Moves every clock of this controller forward. Sleepers whose deadline is now in the past
    /// all wake, however many of their periods were skipped.
    pub(crate) fn advance(&mut self, duration: Duration) {
        self.now.send_modify(|now| *now += duration);
    }
}
