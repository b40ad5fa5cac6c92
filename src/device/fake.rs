//! Recording device used by the engine's tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::Device;
use crate::error::{BotError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Cmd {
    Tap(i32, i32),
    Swipe {
        from: (i32, i32),
        to: (i32, i32),
        duration_ms: u32,
    },
    Connect(String),
    Disconnect(String),
    Pointer(bool),
}

pub struct FakeDevice {
    started: Instant,
    log: Mutex<Vec<(Duration, Cmd)>>,
    attached: Mutex<Vec<String>>,
    target: Mutex<String>,
    fail_taps: AtomicBool,
    fail_swipes: AtomicBool,
    refuse_connect: AtomicBool,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            log: Mutex::new(Vec::new()),
            attached: Mutex::new(Vec::new()),
            target: Mutex::new(String::new()),
            fail_taps: AtomicBool::new(false),
            fail_swipes: AtomicBool::new(false),
            refuse_connect: AtomicBool::new(false),
        }
    }

    pub fn attach(&self, serial: &str) {
        self.attached.lock().unwrap().push(serial.to_string());
    }

    pub fn fail_taps(&self, fail: bool) {
        self.fail_taps.store(fail, Ordering::SeqCst);
    }

    pub fn fail_swipes(&self, fail: bool) {
        self.fail_swipes.store(fail, Ordering::SeqCst);
    }

    pub fn refuse_connect(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Every command with its offset from the device's creation.
    pub fn timed(&self) -> Vec<(Duration, Cmd)> {
        self.log.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<Cmd> {
        self.timed().into_iter().map(|(_, cmd)| cmd).collect()
    }

    pub fn taps(&self) -> Vec<(i32, i32)> {
        self.commands()
            .into_iter()
            .filter_map(|cmd| match cmd {
                Cmd::Tap(x, y) => Some((x, y)),
                _ => None,
            })
            .collect()
    }

    pub fn swipe_ends(&self) -> Vec<(i32, i32)> {
        self.commands()
            .into_iter()
            .filter_map(|cmd| match cmd {
                Cmd::Swipe { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }

    fn record(&self, cmd: Cmd) {
        self.log
            .lock()
            .unwrap()
            .push((self.started.elapsed(), cmd));
    }
}

#[async_trait]
impl Device for FakeDevice {
    fn set_target(&self, serial: &str) {
        *self.target.lock().unwrap() = serial.to_string();
    }

    fn target(&self) -> String {
        self.target.lock().unwrap().clone()
    }

    async fn tap(&self, x: i32, y: i32) -> Result<()> {
        self.record(Cmd::Tap(x, y));
        if self.fail_taps.load(Ordering::SeqCst) {
            return Err(BotError::Command("error: device offline".into()));
        }
        Ok(())
    }

    async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32) -> Result<()> {
        self.record(Cmd::Swipe {
            from: (x1, y1),
            to: (x2, y2),
            duration_ms,
        });
        if self.fail_swipes.load(Ordering::SeqCst) {
            return Err(BotError::Command("error: device offline".into()));
        }
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<String>> {
        Ok(self.attached.lock().unwrap().clone())
    }

    async fn connect(&self, address: &str) -> Result<()> {
        self.record(Cmd::Connect(address.to_string()));
        if !self.refuse_connect.load(Ordering::SeqCst) {
            self.attach(address);
        }
        Ok(())
    }

    async fn disconnect(&self, address: &str) -> Result<()> {
        self.record(Cmd::Disconnect(address.to_string()));
        self.attached.lock().unwrap().retain(|serial| serial != address);
        Ok(())
    }

    async fn set_pointer_overlay(&self, enabled: bool) -> Result<()> {
        self.record(Cmd::Pointer(enabled));
        Ok(())
    }
}
