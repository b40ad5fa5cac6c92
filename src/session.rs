//! The single authority over whether automation is running.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::time::sleep;

use crate::actions::{self, secs};
use crate::config::{BotConfig, TapConfig};
use crate::device::Device;
use crate::error::{BotError, Result};
use crate::scheduler::{PeriodicAction, Scheduler, TimerSet};
use crate::status::{BotEvent, ClickCounter, EventSender, SessionStatus};

/// Time the game needs to register the auto-play toggle on start.
pub const GAME_START_SETTLE: Duration = Duration::from_secs(1);
/// Time the game needs to register the auto-play toggle on stop.
pub const GAME_STOP_SETTLE: Duration = Duration::from_millis(500);
/// Period of the timer that sweeps the click list.
pub const CLICK_SWEEP_PERIOD: Duration = Duration::from_secs(1);

pub struct Session {
    device: Arc<dyn Device>,
    events: EventSender,
    clicks: ClickCounter,
    scheduler: Scheduler,
    debuff_gate: Arc<Mutex<()>>,
    running: Arc<AtomicBool>,
    /// Held across start and stop so the two never interleave.
    timers: Mutex<TimerSet>,
}

impl Session {
    pub fn new(device: Arc<dyn Device>, events: EventSender) -> Self {
        Self {
            clicks: ClickCounter::new(events.clone()),
            scheduler: Scheduler::new(events.clone()),
            device,
            events,
            debuff_gate: Arc::new(Mutex::new(())),
            running: Arc::new(AtomicBool::new(false)),
            timers: Mutex::new(TimerSet::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            running: self.is_running(),
            click_count: self.clicks.get(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.events.subscribe()
    }

    /// Names of the timers currently registered.
    pub async fn active_timers(&self) -> Vec<String> {
        let timers = self.timers.lock().await;
        timers.names().into_iter().map(String::from).collect()
    }

    /// Starts every enabled periodic action plus the click sweep.
    ///
    /// Nothing is left running if the game-start tap or the first debuff
    /// combo fails.
    pub async fn start(&self, config: &BotConfig) -> Result<()> {
        let mut timers = self.timers.lock().await;
        if self.is_running() {
            return Err(BotError::AlreadySessionRunning);
        }
        config.validate()?;

        if config.game_start.enabled {
            tracing::info!(x = config.game_start.x, y = config.game_start.y, "tapping in-game start");
            self.device
                .tap(config.game_start.x, config.game_start.y)
                .await?;
            sleep(GAME_START_SETTLE).await;
        }

        self.clicks.reset();
        *timers = self.scheduler.start(self.periodic_actions(config)).await?;
        self.running.store(true, Ordering::SeqCst);

        tracing::info!(timers = ?timers.names(), "session started");
        let _ = self.events.send(BotEvent::SessionStarted);
        Ok(())
    }

    /// Taps the in-game toggle off (when configured) and cancels every timer.
    ///
    /// The timers are cancelled even if the toggle tap fails; that failure
    /// is still returned so the caller knows the game may not have noticed.
    pub async fn stop(&self, config: &BotConfig) -> Result<()> {
        let mut timers = self.timers.lock().await;

        let toggle = if config.game_start.enabled {
            tracing::info!(x = config.game_start.x, y = config.game_start.y, "tapping in-game stop");
            let tapped = self
                .device
                .tap(config.game_start.x, config.game_start.y)
                .await;
            if tapped.is_ok() {
                sleep(GAME_STOP_SETTLE).await;
            }
            tapped
        } else {
            Ok(())
        };

        timers.stop_all();
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!(clicks = self.clicks.get(), "session stopped");
            let _ = self.events.send(BotEvent::SessionStopped);
        }
        toggle
    }

    fn periodic_actions(&self, config: &BotConfig) -> Vec<PeriodicAction> {
        let mut periodic = Vec::new();

        for (name, tap) in [
            ("camera_reset", &config.camera_reset),
            ("berserker", &config.berserker),
        ] {
            if tap.enabled {
                periodic.push(self.tap_timer(name, tap));
            }
        }

        if config.debuff.enabled {
            let device = self.device.clone();
            let gate = self.debuff_gate.clone();
            let debuff = config.debuff.clone();
            periodic.push(
                PeriodicAction::new("debuff", secs(debuff.interval), move || {
                    let device = device.clone();
                    let gate = gate.clone();
                    let debuff = debuff.clone();
                    async move { actions::debuff_combo(device.as_ref(), &debuff, &gate).await }
                })
                .run_immediately(),
            );
        }

        if config.lure.enabled {
            periodic.push(self.tap_timer("lure", &config.lure));
        }

        let device = self.device.clone();
        let clicks: Arc<[_]> = config.clicks.clone().into();
        let counter = self.clicks.clone();
        let running = self.running.clone();
        periodic.push(PeriodicAction::new(
            "click_sequence",
            CLICK_SWEEP_PERIOD,
            move || {
                let device = device.clone();
                let clicks = clicks.clone();
                let counter = counter.clone();
                let running = running.clone();
                async move {
                    if !running.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    actions::click_sequence(device.as_ref(), &clicks, &counter).await
                }
            },
        ));

        periodic
    }

    fn tap_timer(&self, name: &str, tap: &TapConfig) -> PeriodicAction {
        let device = self.device.clone();
        let (x, y) = (tap.x, tap.y);
        PeriodicAction::new(name, secs(tap.interval), move || {
            let device = device.clone();
            async move { actions::tap(device.as_ref(), x, y).await }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClickConfig;
    use crate::device::fake::{Cmd, FakeDevice};
    use crate::status::event_channel;

    fn setup() -> (Arc<FakeDevice>, Session) {
        let device = Arc::new(FakeDevice::new());
        let session = Session::new(device.clone(), event_channel());
        (device, session)
    }

    fn with_camera(every: f64) -> BotConfig {
        let mut config = BotConfig::default();
        config.camera_reset.enabled = true;
        config.camera_reset.interval = every;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_actions_issue_no_commands() {
        let (device, session) = setup();
        session.start(&BotConfig::default()).await.unwrap();
        assert!(session.is_running());

        sleep(Duration::from_secs(60)).await;
        assert!(device.commands().is_empty());
        assert_eq!(session.active_timers().await, vec!["click_sequence"]);
    }

    #[tokio::test(start_paused = true)]
    async fn enabled_actions_get_one_timer_each() {
        let (_device, session) = setup();
        let mut config = with_camera(8.0);
        config.berserker.enabled = true;
        config.lure.enabled = true;
        config.debuff.enabled = true;
        session.start(&config).await.unwrap();

        assert_eq!(
            session.active_timers().await,
            vec!["camera_reset", "berserker", "debuff", "lure", "click_sequence"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_twice_is_harmless() {
        let (device, session) = setup();
        let config = with_camera(1.0);

        session.stop(&config).await.unwrap();
        session.start(&config).await.unwrap();
        session.stop(&config).await.unwrap();
        session.stop(&config).await.unwrap();

        assert!(!session.is_running());
        assert!(session.active_timers().await.is_empty());
        sleep(Duration::from_secs(10)).await;
        assert!(device.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_fails_and_keeps_timers() {
        let (device, session) = setup();
        let config = with_camera(8.0);
        session.start(&config).await.unwrap();

        sleep(Duration::from_secs(20)).await;
        assert_eq!(device.taps().len(), 2);

        assert!(matches!(
            session.start(&config).await,
            Err(BotError::AlreadySessionRunning)
        ));
        assert!(session.is_running());

        sleep(Duration::from_secs(5)).await;
        assert_eq!(device.taps(), vec![(67, 146); 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn click_sweep_taps_waits_and_counts() {
        let (device, session) = setup();
        let mut rx = session.subscribe();
        let mut config = BotConfig::default();
        config.clicks = vec![
            ClickConfig {
                x: 10,
                y: 20,
                interval: 2.0,
            },
            ClickConfig {
                x: 30,
                y: 40,
                interval: 1.0,
            },
        ];
        session.start(&config).await.unwrap();

        sleep(Duration::from_millis(3500)).await;
        assert_eq!(
            device.timed(),
            vec![
                (Duration::from_secs(1), Cmd::Tap(10, 20)),
                (Duration::from_secs(3), Cmd::Tap(30, 40)),
            ]
        );
        assert_eq!(session.status().click_count, 1);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(session.status().click_count, 2);

        assert_eq!(rx.try_recv().unwrap(), BotEvent::SessionStarted);
        assert_eq!(rx.try_recv().unwrap(), BotEvent::ClickCount { count: 1 });
        assert_eq!(rx.try_recv().unwrap(), BotEvent::ClickCount { count: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn click_count_resets_for_each_session() {
        let (_device, session) = setup();
        let mut config = BotConfig::default();
        config.clicks = vec![ClickConfig {
            x: 1,
            y: 1,
            interval: 0.5,
        }];

        session.start(&config).await.unwrap();
        sleep(Duration::from_millis(3200)).await;
        assert!(session.status().click_count > 0);

        session.stop(&config).await.unwrap();
        session.start(&config).await.unwrap();
        assert_eq!(session.status().click_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn game_start_tap_precedes_the_timers() {
        let (device, session) = setup();
        let mut config = with_camera(1.0);
        config.game_start.enabled = true;

        session.start(&config).await.unwrap();
        sleep(Duration::from_millis(2500)).await;

        let timed = device.timed();
        assert_eq!(timed[0], (Duration::ZERO, Cmd::Tap(1728, 803)));
        assert_eq!(timed[1], (Duration::from_secs(2), Cmd::Tap(67, 146)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_game_start_leaves_the_session_stopped() {
        let (device, session) = setup();
        device.fail_taps(true);
        let mut config = with_camera(1.0);
        config.game_start.enabled = true;

        assert!(matches!(
            session.start(&config).await,
            Err(BotError::Command(_))
        ));
        assert!(!session.is_running());
        assert!(session.active_timers().await.is_empty());

        sleep(Duration::from_secs(10)).await;
        assert_eq!(device.taps().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn debuff_runs_first_and_leaves_clicks_alone() {
        let (device, session) = setup();
        let mut config = BotConfig::default();
        config.debuff.enabled = true;
        config.debuff.delay = 3.0;

        session.start(&config).await.unwrap();
        assert_eq!(
            device.timed(),
            vec![
                (Duration::ZERO, Cmd::Tap(1200, 800)),
                (Duration::from_secs(3), Cmd::Tap(1000, 600)),
            ]
        );
        assert_eq!(session.status().click_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_toggles_the_game_off_first() {
        let (device, session) = setup();
        let mut config = BotConfig::default();
        config.game_start.enabled = true;
        session.start(&config).await.unwrap();

        let before = tokio::time::Instant::now();
        session.stop(&config).await.unwrap();
        assert_eq!(before.elapsed(), GAME_STOP_SETTLE);
        assert_eq!(device.taps(), vec![(1728, 803), (1728, 803)]);
        assert!(!session.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_stop_toggle_still_stops_the_timers() {
        let (device, session) = setup();
        let mut config = with_camera(1.0);
        session.start(&config).await.unwrap();

        config.game_start.enabled = true;
        device.fail_taps(true);
        assert!(session.stop(&config).await.is_err());
        assert!(!session.is_running());
        assert!(session.active_timers().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_interval_is_rejected_up_front() {
        let (device, session) = setup();
        for every in [0.0, 1e19] {
            assert!(matches!(
                session.start(&with_camera(every)).await,
                Err(BotError::Config(_))
            ));
        }
        assert!(!session.is_running());
        assert!(session.active_timers().await.is_empty());
        assert!(device.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn debuff_combos_stay_serialized_across_a_restart() {
        let (device, session) = setup();
        let mut config = BotConfig::default();
        config.debuff.enabled = true;
        config.debuff.delay = 3.0;
        config.debuff.interval = 5.0;
        let echo = (config.debuff.echo_x, config.debuff.echo_y);
        let weapon = (config.debuff.weapon_x, config.debuff.weapon_y);

        // first combo runs inside start (0s to 3s); the timer fires at 8s
        session.start(&config).await.unwrap();
        sleep(Duration::from_secs(6)).await;
        assert_eq!(device.taps(), vec![echo, weapon, echo]);

        // stop mid-delay; the restarted session's first combo must wait
        session.stop(&config).await.unwrap();
        session.start(&config).await.unwrap();
        assert_eq!(device.taps(), vec![echo, weapon, echo, weapon, echo, weapon]);

        let times: Vec<Duration> = device.timed().iter().map(|(at, _)| *at).collect();
        assert_eq!(
            times,
            [0, 3, 8, 11, 11, 14].map(Duration::from_secs).to_vec()
        );
        session.stop(&config).await.unwrap();
    }
}
