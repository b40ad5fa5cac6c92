//! Independent repeating timers, one per periodic action.
//!
//! Every timer runs as its own task and launches each firing as a separate
//! task, so a slow invocation never pushes back another timer's schedule.
//! Each timer is single-flight: a firing is skipped while the previous
//! invocation of the same action is still running.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::status::{BotEvent, EventSender};

/// tokio intervals reject a zero period.
const MIN_PERIOD: Duration = Duration::from_millis(1);
/// Deadlines past this would overflow `Instant` arithmetic.
const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 3600);

pub type ActionFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub struct PeriodicAction {
    name: String,
    every: Duration,
    run_immediately: bool,
    run: ActionFn,
}

impl PeriodicAction {
    pub fn new<F, Fut>(name: impl Into<String>, every: Duration, run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            every: every.clamp(MIN_PERIOD, MAX_PERIOD),
            run_immediately: false,
            run: Arc::new(move || run().boxed()),
        }
    }

    /// Execute once during [`Scheduler::start`] instead of waiting a full
    /// period for the first firing.
    pub fn run_immediately(mut self) -> Self {
        self.run_immediately = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct TimerHandle {
    name: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prevents any further firing. An invocation already in flight runs to
    /// completion.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// The timers belonging to one session. Dropping the set cancels them.
#[derive(Default)]
pub struct TimerSet {
    timers: Vec<TimerHandle>,
}

impl TimerSet {
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.timers.iter().map(TimerHandle::name).collect()
    }

    /// Cancels every timer and empties the set. Calling it again is a no-op.
    ///
    /// No new firing starts once this returns: a timer task checks its token
    /// after every tick, and a cancelled token is visible to it from then on.
    /// On a current-thread runtime the task is also never mid-tick here.
    pub fn stop_all(&mut self) {
        for timer in self.timers.drain(..) {
            tracing::debug!(timer = timer.name(), "timer cancelled");
            timer.cancel();
        }
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Clears the single-flight flag when an invocation finishes, panics included.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Scheduler {
    events: EventSender,
}

impl Scheduler {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }

    /// Runs the `run_immediately` actions once, in order, then registers a
    /// timer per action. If an immediate run fails, nothing is registered.
    pub async fn start(&self, actions: Vec<PeriodicAction>) -> Result<TimerSet> {
        for action in actions.iter().filter(|a| a.run_immediately) {
            tracing::info!(action = action.name(), "running first invocation now");
            (action.run)().await?;
        }

        let mut timers = TimerSet::default();
        for action in actions {
            timers.timers.push(self.spawn(action));
        }
        Ok(timers)
    }

    fn spawn(&self, action: PeriodicAction) -> TimerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let events = self.events.clone();
        let name = action.name.clone();
        let first = Instant::now() + action.every;

        tracing::info!(action = %name, every = ?action.every, "timer registered");

        let task = tokio::spawn(async move {
            let in_flight = Arc::new(AtomicBool::new(false));
            let mut ticker = interval_at(first, action.every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if token.is_cancelled() {
                    break;
                }

                if in_flight.swap(true, Ordering::SeqCst) {
                    tracing::debug!(action = %action.name, "previous run still in flight, skipping");
                    continue;
                }
                let flight = InFlight(in_flight.clone());
                let invocation = (action.run)();
                let name = action.name.clone();
                let events = events.clone();
                tokio::spawn(async move {
                    let _flight = flight;
                    if let Err(e) = invocation.await {
                        tracing::warn!(action = %name, error = %e, "periodic action failed");
                        let _ = events.send(BotEvent::ActionFailed {
                            action: name,
                            message: e.to_string(),
                        });
                    }
                });
            }
        });

        TimerHandle { name, cancel, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BotError;
    use crate::status::event_channel;
    use std::sync::atomic::AtomicU32;
    use tokio::time::sleep;

    fn counting(name: &str, every: Duration, fired: &Arc<AtomicU32>) -> PeriodicAction {
        let fired = fired.clone();
        PeriodicAction::new(name, every, move || {
            let fired = fired.clone();
            async move {
                fired.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BotError>(())
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn each_timer_fires_at_its_own_interval() {
        let scheduler = Scheduler::new(event_channel());
        let fast = Arc::new(AtomicU32::new(0));
        let slow = Arc::new(AtomicU32::new(0));

        let mut timers = scheduler
            .start(vec![
                counting("fast", Duration::from_secs(2), &fast),
                counting("slow", Duration::from_secs(5), &slow),
            ])
            .await
            .unwrap();
        assert_eq!(timers.names(), vec!["fast", "slow"]);

        sleep(Duration::from_millis(10_500)).await;
        assert_eq!(fast.load(Ordering::SeqCst), 5);
        assert_eq!(slow.load(Ordering::SeqCst), 2);

        timers.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_actions_run_before_start_returns() {
        let scheduler = Scheduler::new(event_channel());
        let fired = Arc::new(AtomicU32::new(0));

        let _timers = scheduler
            .start(vec![counting("debuff", Duration::from_secs(300), &fired).run_immediately()])
            .await
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_immediate_run_registers_nothing() {
        let scheduler = Scheduler::new(event_channel());
        let other = Arc::new(AtomicU32::new(0));
        let failing = PeriodicAction::new("debuff", Duration::from_secs(1), || async {
            Err::<(), _>(BotError::Command("error: device offline".into()))
        })
        .run_immediately();

        let result = scheduler
            .start(vec![counting("camera", Duration::from_secs(1), &other), failing])
            .await;
        assert!(matches!(result, Err(BotError::Command(_))));

        sleep(Duration::from_secs(5)).await;
        assert_eq!(other.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_invocations_are_single_flight() {
        let scheduler = Scheduler::new(event_channel());
        let started = Arc::new(AtomicU32::new(0));
        let counter = started.clone();
        let slow = PeriodicAction::new("slow", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(4500)).await;
                Ok::<(), BotError>(())
            }
        });
        let fast = Arc::new(AtomicU32::new(0));

        let _timers = scheduler
            .start(vec![slow, counting("fast", Duration::from_secs(1), &fast)])
            .await
            .unwrap();

        // slow runs at 1s (until 5.5s) and 6s (until 10.5s); fast never waits
        sleep(Duration::from_millis(10_200)).await;
        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(fast.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_is_final_and_idempotent() {
        let scheduler = Scheduler::new(event_channel());
        let fired = Arc::new(AtomicU32::new(0));
        let mut timers = scheduler
            .start(vec![counting("camera", Duration::from_secs(1), &fired)])
            .await
            .unwrap();

        sleep(Duration::from_millis(3500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);

        timers.stop_all();
        assert!(timers.is_empty());
        timers.stop_all();

        sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);

        let mut empty = TimerSet::default();
        empty.stop_all();
        assert_eq!(empty.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_does_not_interrupt_an_invocation_in_flight() {
        let scheduler = Scheduler::new(event_channel());
        let completed = Arc::new(AtomicU32::new(0));
        let counter = completed.clone();
        let action = PeriodicAction::new("debuff", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                sleep(Duration::from_secs(3)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BotError>(())
            }
        });

        let mut timers = scheduler.start(vec![action]).await.unwrap();
        sleep(Duration::from_millis(1500)).await;
        timers.stop_all();

        sleep(Duration::from_secs(10)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_reported_and_the_timer_keeps_going() {
        let events = event_channel();
        let mut rx = events.subscribe();
        let scheduler = Scheduler::new(events);
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let action = PeriodicAction::new("berserker", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(BotError::Command("error: device offline".into()))
            }
        });

        let _timers = scheduler.start(vec![action]).await.unwrap();
        sleep(Duration::from_millis(3500)).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(matches!(
            rx.try_recv().unwrap(),
            BotEvent::ActionFailed { action, .. } if action == "berserker"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_periods_are_clamped_instead_of_overflowing() {
        let scheduler = Scheduler::new(event_channel());
        let fired = Arc::new(AtomicU32::new(0));
        let mut timers = scheduler
            .start(vec![
                counting("camera", Duration::MAX, &fired),
                counting("berserker", Duration::from_secs(u64::MAX / 2), &fired),
            ])
            .await
            .unwrap();
        assert_eq!(timers.len(), 2);

        sleep(Duration::from_secs(3600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        timers.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_set_cancels_its_timers() {
        let scheduler = Scheduler::new(event_channel());
        let fired = Arc::new(AtomicU32::new(0));
        let timers = scheduler
            .start(vec![counting("lure", Duration::from_secs(1), &fired)])
            .await
            .unwrap();
        drop(timers);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
