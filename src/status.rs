use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of the event channel; slow observers lose the oldest events.
pub const EVENT_CAPACITY: usize = 256;

/// Events published to whoever renders the engine's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BotEvent {
    SessionStarted,
    SessionStopped,
    /// Total completed click steps since the session started.
    ClickCount { count: u64 },
    LoopStarted,
    LoopStopped,
    /// A timer firing or loop cycle failed; the timer keeps running.
    ActionFailed { action: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub running: bool,
    pub click_count: u64,
}

pub type EventSender = broadcast::Sender<BotEvent>;

pub fn event_channel() -> EventSender {
    let (tx, _) = broadcast::channel(EVENT_CAPACITY);
    tx
}

/// Completed click-sequence steps. Only the click sequence task increments
/// it; everyone else reads.
#[derive(Clone)]
pub struct ClickCounter {
    count: Arc<AtomicU64>,
    events: EventSender,
}

impl ClickCounter {
    pub fn new(events: EventSender) -> Self {
        Self {
            count: Arc::new(AtomicU64::new(0)),
            events,
        }
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }

    /// Bumps the count and publishes the new value.
    pub fn increment(&self) -> u64 {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        // no subscribers is fine
        let _ = self.events.send(BotEvent::ClickCount { count });
        count
    }
}
