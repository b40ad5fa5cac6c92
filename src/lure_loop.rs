//! Repeats the lure movement until told to stop, independent of any session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::actions;
use crate::config::JoystickConfig;
use crate::device::Device;
use crate::error::{BotError, Result};
use crate::status::{BotEvent, EventSender};

/// Rest between two complete lure movements.
pub const CYCLE_PAUSE: Duration = Duration::from_secs(2);

#[derive(Default)]
struct LoopState {
    running: bool,
    /// Bumped on every stop; a cycle from an older generation must not
    /// schedule another one.
    generation: u64,
    cancel: Option<CancellationToken>,
}

pub struct LureLoop {
    device: Arc<dyn Device>,
    events: EventSender,
    state: Arc<Mutex<LoopState>>,
}

fn lock(state: &Mutex<LoopState>) -> MutexGuard<'_, LoopState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LureLoop {
    pub fn new(device: Arc<dyn Device>, events: EventSender) -> Self {
        Self {
            device,
            events,
            state: Arc::new(Mutex::new(LoopState::default())),
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    pub fn generation(&self) -> u64 {
        lock(&self.state).generation
    }

    /// Starts cycling `joystick`. Fails with [`BotError::AlreadyRunning`]
    /// while a loop is live.
    pub fn start(&self, joystick: JoystickConfig) -> Result<()> {
        let mut state = lock(&self.state);
        if state.running {
            return Err(BotError::AlreadyRunning);
        }
        let cancel = CancellationToken::new();
        state.running = true;
        state.cancel = Some(cancel.clone());
        let generation = state.generation;
        drop(state);

        tracing::info!(generation, pattern = ?joystick.pattern, "lure loop started");
        tokio::spawn(run_cycles(
            self.device.clone(),
            self.events.clone(),
            self.state.clone(),
            generation,
            cancel,
            joystick,
        ));
        let _ = self.events.send(BotEvent::LoopStarted);
        Ok(())
    }

    /// Returns at once. A movement in progress finishes, then its chain ends.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        if !state.running {
            return;
        }
        state.running = false;
        state.generation += 1;
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
        tracing::info!(generation = state.generation, "lure loop stopped");
        drop(state);
        let _ = self.events.send(BotEvent::LoopStopped);
    }
}

impl Drop for LureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_stale(state: &Mutex<LoopState>, generation: u64, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return true;
    }
    let state = lock(state);
    !state.running || state.generation != generation
}

async fn run_cycles(
    device: Arc<dyn Device>,
    events: EventSender,
    state: Arc<Mutex<LoopState>>,
    generation: u64,
    cancel: CancellationToken,
    joystick: JoystickConfig,
) {
    let mut cycle: u64 = 0;
    loop {
        cycle += 1;
        if let Err(e) = actions::lure_movement(device.as_ref(), &joystick).await {
            tracing::warn!(cycle, error = %e, "lure cycle failed, retrying");
            let _ = events.send(BotEvent::ActionFailed {
                action: "lure_loop".into(),
                message: e.to_string(),
            });
        }

        if is_stale(&state, generation, &cancel) {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(CYCLE_PAUSE) => {}
        }
        if is_stale(&state, generation, &cancel) {
            break;
        }
    }
    tracing::debug!(generation, cycles = cycle, "lure loop chain ended");
}
