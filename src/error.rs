use thiserror::Error;

/// Everything the automation engine can fail with.
#[derive(Debug, Error)]
pub enum BotError {
    /// adb returned an error stream or a failing exit status.
    #[error("device command failed: {0}")]
    Command(String),

    /// The target device is missing from `adb devices` after connecting.
    #[error("device {0} not found")]
    Connection(String),

    #[error("lure loop is already running")]
    AlreadyRunning,

    #[error("a session is already running")]
    AlreadySessionRunning,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BotError>;
