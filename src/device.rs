//! Device command channel: touch input and housekeeping commands sent to an
//! Android device through the `adb` executable.

use std::process::Output;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{BotError, Result};

#[cfg(test)]
pub(crate) mod fake;

/// Notice adb prints on stderr the first time its server is spawned.
const DAEMON_STARTED: &str = "daemon started";

/// Anything that can receive touch commands.
#[async_trait]
pub trait Device: Send + Sync {
    /// Selects the serial that subsequent shell commands address.
    fn set_target(&self, _serial: &str) {}

    /// The serial shell commands currently address; empty for adb's default.
    fn target(&self) -> String {
        String::new()
    }

    async fn tap(&self, x: i32, y: i32) -> Result<()>;

    async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32) -> Result<()>;

    /// Serials currently in the `device` state.
    async fn list_devices(&self) -> Result<Vec<String>>;

    async fn connect(&self, address: &str) -> Result<()>;

    async fn disconnect(&self, address: &str) -> Result<()>;

    /// Toggles Android's "pointer location" developer overlay.
    async fn set_pointer_overlay(&self, enabled: bool) -> Result<()>;
}

/// Network devices are addressed as `host:port` and need `adb connect`.
pub fn is_network_address(address: &str) -> bool {
    address.contains(':')
}

/// `adb` child-process backend.
pub struct AdbDevice {
    program: String,
    target: RwLock<String>,
}

impl AdbDevice {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            target: RwLock::new(String::new()),
        }
    }

    /// Runs a shell command on the selected device.
    async fn shell(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        let target = self.target();
        if !target.is_empty() {
            cmd.arg("-s").arg(target);
        }
        cmd.arg("shell").args(args);
        self.run(cmd).await
    }

    /// Runs a server-level command (`devices`, `connect`, ...) that ignores `-s`.
    async fn host(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        self.run(cmd).await
    }

    async fn run(&self, mut cmd: Command) -> Result<String> {
        tracing::trace!(command = ?cmd.as_std(), "adb");
        let output = cmd
            .output()
            .await
            .map_err(|e| BotError::Command(format!("failed to run {}: {e}", self.program)))?;
        classify_output(&output)
    }
}

#[async_trait]
impl Device for AdbDevice {
    fn set_target(&self, serial: &str) {
        match self.target.write() {
            Ok(mut target) => *target = serial.to_string(),
            Err(poisoned) => *poisoned.into_inner() = serial.to_string(),
        }
    }

    fn target(&self) -> String {
        match self.target.read() {
            Ok(target) => target.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn tap(&self, x: i32, y: i32) -> Result<()> {
        tracing::debug!(x, y, "tap");
        self.shell(&["input", "tap", &x.to_string(), &y.to_string()])
            .await?;
        Ok(())
    }

    async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32) -> Result<()> {
        tracing::debug!(x1, y1, x2, y2, duration_ms, "swipe");
        self.shell(&[
            "input",
            "swipe",
            &x1.to_string(),
            &y1.to_string(),
            &x2.to_string(),
            &y2.to_string(),
            &duration_ms.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<String>> {
        let output = self.host(&["devices"]).await?;
        Ok(parse_device_list(&output))
    }

    async fn connect(&self, address: &str) -> Result<()> {
        let output = self.host(&["connect", address]).await?;
        tracing::info!(address, %output, "adb connect");
        Ok(())
    }

    async fn disconnect(&self, address: &str) -> Result<()> {
        self.host(&["disconnect", address]).await?;
        Ok(())
    }

    async fn set_pointer_overlay(&self, enabled: bool) -> Result<()> {
        let value = if enabled { "1" } else { "0" };
        self.shell(&["settings", "put", "system", "pointer_location", value])
            .await?;
        Ok(())
    }
}

/// Turns a finished adb invocation into its trimmed stdout, or a
/// [`BotError::Command`] carrying whatever adb complained about.
pub fn classify_output(output: &Output) -> Result<String> {
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if !stderr.is_empty() && !stderr.contains(DAEMON_STARTED) {
        return Err(BotError::Command(stderr));
    }
    if !output.status.success() {
        let detail = if stdout.is_empty() {
            format!("adb exited with {}", output.status)
        } else {
            stdout
        };
        return Err(BotError::Command(detail));
    }
    Ok(stdout)
}

/// Extracts the serials of ready devices from `adb devices` output.
pub fn parse_device_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .filter(|(_, state)| state.trim() == "device")
        .map(|(serial, _)| serial.trim().to_string())
        .collect()
}
