use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BotError, Result};

pub const CONFIG_FILE: &str = "bot_config.json";

/// Longest timer period accepted: one week.
pub const MAX_INTERVAL_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// A tap at fixed coordinates, optionally repeated on a timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapConfig {
    pub enabled: bool,
    pub x: i32,
    pub y: i32,
    /// Seconds between taps.
    pub interval: f64,
}

impl TapConfig {
    fn disabled(x: i32, y: i32, interval: f64) -> Self {
        Self {
            enabled: false,
            x,
            y,
            interval,
        }
    }
}

/// The in-game "auto" toggle tapped when a session starts and stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStartConfig {
    pub enabled: bool,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebuffConfig {
    pub enabled: bool,
    pub echo_x: i32,
    pub echo_y: i32,
    pub weapon_x: i32,
    pub weapon_y: i32,
    /// Seconds to hold the echo before switching back to the weapon.
    pub delay: f64,
    /// Seconds between combos.
    pub interval: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickConfig {
    pub x: i32,
    pub y: i32,
    #[serde(default = "default_click_interval")]
    pub interval: f64,
}

fn default_click_interval() -> f64 {
    2.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LurePattern {
    /// Up, right, down, left.
    Square,
    /// Forward then back along the vertical axis. Unknown names land here.
    #[default]
    #[serde(other)]
    Straight,
}

/// Virtual joystick drags used to lure mobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoystickConfig {
    pub pattern: LurePattern,
    pub center_x: i32,
    pub center_y: i32,
    pub radius: i32,
    /// Swipe duration in milliseconds.
    pub duration: u32,
    pub pause: f64,
    pub movement_interval: f64,
    pub repetitions: u32,
    pub loop_enabled: bool,
}

impl Default for JoystickConfig {
    fn default() -> Self {
        Self {
            pattern: LurePattern::Straight,
            center_x: 193,
            center_y: 903,
            radius: 60,
            duration: 100,
            pause: 0.2,
            movement_interval: 0.5,
            repetitions: 1,
            loop_enabled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    /// adb serial, or `host:port` for a network device.
    pub device: String,
    pub game_start: GameStartConfig,
    pub camera_reset: TapConfig,
    pub berserker: TapConfig,
    pub debuff: DebuffConfig,
    pub lure: TapConfig,
    pub clicks: Vec<ClickConfig>,
    pub joystick: JoystickConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            game_start: GameStartConfig {
                enabled: false,
                x: 1728,
                y: 803,
            },
            camera_reset: TapConfig::disabled(67, 146, 8.0),
            berserker: TapConfig::disabled(1500, 700, 10.0),
            debuff: DebuffConfig {
                enabled: false,
                echo_x: 1200,
                echo_y: 800,
                weapon_x: 1000,
                weapon_y: 600,
                delay: 3.0,
                interval: 300.0,
            },
            lure: TapConfig::disabled(1728, 803, 3.0),
            clicks: Vec::new(),
            joystick: JoystickConfig::default(),
        }
    }
}

impl BotConfig {
    /// Parses a saved record, filling every missing section or field from
    /// [`BotConfig::default`].
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let saved: Value = serde_json::from_str(raw)?;
        Self::from_value(saved)
    }

    pub fn from_value(saved: Value) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;
        merge_defaults(&mut merged, saved);
        Ok(serde_json::from_value(merged)?)
    }

    /// Rejects timers that could never fire sensibly.
    pub fn validate(&self) -> Result<()> {
        let timers = [
            ("camera_reset", self.camera_reset.enabled, self.camera_reset.interval),
            ("berserker", self.berserker.enabled, self.berserker.interval),
            ("debuff", self.debuff.enabled, self.debuff.interval),
            ("lure", self.lure.enabled, self.lure.interval),
        ];
        for (name, enabled, interval) in timers {
            if enabled && !(interval > 0.0 && interval <= MAX_INTERVAL_SECS) {
                return Err(BotError::Config(format!(
                    "{name}.interval must be between 0 and {MAX_INTERVAL_SECS} seconds, got {interval}"
                )));
            }
        }
        Ok(())
    }
}

/// Overlays `saved` onto `defaults` key by key. Objects merge recursively,
/// `null` keeps the default, anything else replaces it wholesale.
fn merge_defaults(defaults: &mut Value, saved: Value) {
    match (defaults, saved) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_defaults(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (slot, value) => *slot = value,
    }
}

/// Unit the debuff interval is edited in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Seconds,
    Minutes,
}

impl IntervalUnit {
    /// Picks the unit a stored number of seconds is displayed in.
    pub fn split(seconds: f64) -> (f64, IntervalUnit) {
        if seconds >= 60.0 {
            (seconds / 60.0, IntervalUnit::Minutes)
        } else {
            (seconds, IntervalUnit::Seconds)
        }
    }

    pub fn to_seconds(self, value: f64) -> f64 {
        match self {
            IntervalUnit::Seconds => value,
            IntervalUnit::Minutes => value * 60.0,
        }
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("farmbot").join(CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}

/// Loads the config at `path`, or the defaults when no file exists yet.
pub fn load_config(path: &Path) -> Result<BotConfig> {
    if !path.exists() {
        return Ok(BotConfig::default());
    }
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let saved: Value = serde_json::from_reader(reader)?;
    BotConfig::from_value(saved)
}

pub fn save_config(path: &Path, config: &BotConfig) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;

    serde_json::to_writer_pretty(file, config)?;
    Ok(())
}
