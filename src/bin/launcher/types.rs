use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Ports tried after the requested one when it is taken.
pub const PORT_FALLBACKS: u16 = 9;

pub const EVENT_CAPACITY: usize = 256;

/// How long output may keep flowing after the bot process has exited.
pub const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

/// What gets spawned on `POST /start`.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
}

/// Events streamed to the browser via SSE.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LauncherEvent {
    Started { pid: Option<u32> },
    /// One line of the bot's stdout or stderr, or a launcher notice.
    Log { line: String },
    Finished { code: Option<i32> },
}

impl LauncherEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LauncherEvent::Started { .. } => "started",
            LauncherEvent::Log { .. } => "log",
            LauncherEvent::Finished { .. } => "finished",
        }
    }
}

pub fn finished_line(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("finished (code {code})"),
        None => "finished (killed)".to_string(),
    }
}
