//! Timer-driven tap/swipe automation for an Android device reached over adb.
//!
//! The library owns the automation engine; the `farmbot` binary wraps it in
//! an egui control panel and the `launcher` binary supervises an external
//! farming script.

pub mod actions;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod lure_loop;
pub mod scheduler;
pub mod session;
pub mod status;

pub use config::{BotConfig, load_config, save_config};
pub use device::{AdbDevice, Device};
pub use engine::{Engine, Request, Response};
pub use error::{BotError, Result};
pub use lure_loop::LureLoop;
pub use session::Session;
pub use status::{BotEvent, SessionStatus};
