//! Bounded-time polling with an injectable clock.
//!
//! [`poll_until`] runs a probe immediately and then once per tick until the
//! probe settles or the timeout elapses. Time is read and spent through a
//! [`Clock`], so tests can drive the loop with [`ManualClock`] instead of
//! sleeping for real.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Source of time for polling loops.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock whose time only moves when someone sleeps on it or calls
/// [`ManualClock::advance`].
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
    sleeps: AtomicUsize,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: AtomicUsize::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed += by;
    }

    /// Virtual time spent so far.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of `sleep` calls made against this clock.
    pub fn sleeps(&self) -> usize {
        self.sleeps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Verdict of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Condition met, stop polling.
    Ready,
    /// Not yet, poll again on the next tick.
    Pending,
    /// Give up without waiting for the timeout.
    Abort,
}

/// How a [`poll_until`] loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    Aborted,
    /// The timeout elapsed; `on_timeout` has run.
    TimedOut,
}

/// Probe now and then every `tick` until the probe returns [`Probe::Ready`] or
/// [`Probe::Abort`], or until `timeout` has elapsed. On timeout, `on_timeout`
/// runs exactly once before returning.
pub async fn poll_until<P, PFut, T, TFut>(
    clock: &dyn Clock,
    tick: Duration,
    timeout: Duration,
    mut probe: P,
    on_timeout: T,
) -> PollOutcome
where
    P: FnMut() -> PFut,
    PFut: Future<Output = Probe>,
    T: FnOnce() -> TFut,
    TFut: Future<Output = ()>,
{
    // `None` when the deadline lies beyond what `Instant` can represent.
    let deadline = clock.now().checked_add(timeout);
    loop {
        match probe().await {
            Probe::Ready => return PollOutcome::Ready,
            Probe::Abort => return PollOutcome::Aborted,
            Probe::Pending => {}
        }

        let now = clock.now();
        let nap = match deadline {
            Some(deadline) if now >= deadline => {
                on_timeout().await;
                return PollOutcome::TimedOut;
            }
            Some(deadline) => tick.min(deadline - now),
            None => tick,
        };
        clock.sleep(nap).await;
    }
}
