//! Stateless touch patterns. Each function is one complete action execution;
//! suspension happens at every device command and every explicit sleep.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::config::{ClickConfig, DebuffConfig, JoystickConfig, LurePattern};
use crate::device::Device;
use crate::error::Result;
use crate::status::ClickCounter;

/// Converts user-entered seconds, treating negative or unrepresentable
/// values as zero.
pub fn secs(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Right,
    Down,
    Left,
}

impl Direction {
    /// Screen offset of a drag of length `radius` in this direction.
    pub fn offset(self, radius: i32) -> (i32, i32) {
        match self {
            Direction::Up => (0, radius.saturating_neg()),
            Direction::Right => (radius, 0),
            Direction::Down => (0, radius),
            Direction::Left => (radius.saturating_neg(), 0),
        }
    }
}

/// Order of the joystick drags making up one lure movement.
pub fn lure_plan(pattern: LurePattern, repetitions: u32) -> Vec<Direction> {
    let legs: &[Direction] = match pattern {
        LurePattern::Square => &[
            Direction::Up,
            Direction::Right,
            Direction::Down,
            Direction::Left,
        ],
        LurePattern::Straight => &[Direction::Up, Direction::Down],
    };
    legs.iter()
        .flat_map(|dir| std::iter::repeat_n(*dir, repetitions as usize))
        .collect()
}

pub async fn tap(device: &dyn Device, x: i32, y: i32) -> Result<()> {
    device.tap(x, y).await
}

pub async fn swipe(
    device: &dyn Device,
    from: (i32, i32),
    to: (i32, i32),
    duration_ms: u32,
) -> Result<()> {
    device.swipe(from.0, from.1, to.0, to.1, duration_ms).await
}

/// Taps the echo, holds it for `delay` seconds, then taps back to the
/// weapon. `gate` serializes combos so two never interleave.
pub async fn debuff_combo(device: &dyn Device, debuff: &DebuffConfig, gate: &Mutex<()>) -> Result<()> {
    let _held = gate.lock().await;
    tracing::info!("debuff: switching to echo");
    tap(device, debuff.echo_x, debuff.echo_y).await?;
    sleep(secs(debuff.delay)).await;
    tracing::info!("debuff: back to weapon");
    tap(device, debuff.weapon_x, debuff.weapon_y).await?;
    Ok(())
}

/// One full lure movement. Every drag starts at the joystick centre and is
/// followed by the `pause` sleep and then the `movement_interval` sleep.
pub async fn lure_movement(device: &dyn Device, joystick: &JoystickConfig) -> Result<()> {
    let center = (joystick.center_x, joystick.center_y);
    for direction in lure_plan(joystick.pattern, joystick.repetitions) {
        let (dx, dy) = direction.offset(joystick.radius);
        let to = (center.0.saturating_add(dx), center.1.saturating_add(dy));
        swipe(device, center, to, joystick.duration).await?;
        sleep(secs(joystick.pause)).await;
        sleep(secs(joystick.movement_interval)).await;
    }
    Ok(())
}

pub async fn click_step(device: &dyn Device, click: &ClickConfig, counter: &ClickCounter) -> Result<()> {
    tap(device, click.x, click.y).await?;
    sleep(secs(click.interval)).await;
    let count = counter.increment();
    tracing::debug!(count, "click step done");
    Ok(())
}

/// Walks the whole click list once, stopping at the first failed tap.
pub async fn click_sequence(device: &dyn Device, clicks: &[ClickConfig], counter: &ClickCounter) -> Result<()> {
    for click in clicks {
        click_step(device, click, counter).await?;
    }
    Ok(())
}
