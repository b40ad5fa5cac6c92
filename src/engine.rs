//! Request surface shared by the UI shells.
//!
//! Every request resolves to a [`Response`] or a [`BotError`]; nothing the
//! engine does panics across this boundary.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc};

use crate::actions;
use crate::config::{BotConfig, JoystickConfig, save_config};
use crate::device::{Device, is_network_address};
use crate::error::{BotError, Result};
use crate::lure_loop::LureLoop;
use crate::session::Session;
use crate::status::{BotEvent, SessionStatus, event_channel};

#[derive(Debug, Clone)]
pub enum Request {
    Connect(String),
    Disconnect,
    ListDevices,
    SetPointer(bool),
    StartSession(Box<BotConfig>),
    StopSession(Box<BotConfig>),
    /// Run the lure movement once.
    ExecuteLure(JoystickConfig),
    StartLureLoop(JoystickConfig),
    StopLureLoop,
    Status,
    SaveConfig(Box<BotConfig>),
}

impl Request {
    pub fn label(&self) -> &'static str {
        match self {
            Request::Connect(_) => "connect",
            Request::Disconnect => "disconnect",
            Request::ListDevices => "list devices",
            Request::SetPointer(_) => "pointer overlay",
            Request::StartSession(_) => "start session",
            Request::StopSession(_) => "stop session",
            Request::ExecuteLure(_) => "lure movement",
            Request::StartLureLoop(_) => "start lure loop",
            Request::StopLureLoop => "stop lure loop",
            Request::Status => "status",
            Request::SaveConfig(_) => "save config",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Done,
    Connected(String),
    Devices(Vec<String>),
    Status(SessionStatus),
}

/// Outcome of a request sent through [`Engine::serve`].
#[derive(Debug, Clone)]
pub struct Reply {
    pub request: &'static str,
    pub result: std::result::Result<Response, String>,
}

pub struct Engine {
    device: Arc<dyn Device>,
    session: Session,
    lure: LureLoop,
    config_path: PathBuf,
    connected: Mutex<Option<String>>,
}

impl Engine {
    pub fn new(device: Arc<dyn Device>, config_path: PathBuf) -> Self {
        let events = event_channel();
        Self {
            session: Session::new(device.clone(), events.clone()),
            lure: LureLoop::new(device.clone(), events),
            device,
            config_path,
            connected: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn lure_loop(&self) -> &LureLoop {
        &self.lure
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.session.subscribe()
    }

    pub async fn handle(&self, request: Request) -> Result<Response> {
        match request {
            Request::Connect(address) => self.connect(&address).await,
            Request::Disconnect => {
                self.disconnect().await?;
                Ok(Response::Done)
            }
            Request::ListDevices => Ok(Response::Devices(self.device.list_devices().await?)),
            Request::SetPointer(enabled) => {
                self.device.set_pointer_overlay(enabled).await?;
                Ok(Response::Done)
            }
            Request::StartSession(config) => {
                self.session.start(&config).await?;
                Ok(Response::Done)
            }
            Request::StopSession(config) => {
                self.session.stop(&config).await?;
                Ok(Response::Done)
            }
            Request::ExecuteLure(joystick) => {
                actions::lure_movement(self.device.as_ref(), &joystick).await?;
                Ok(Response::Done)
            }
            Request::StartLureLoop(joystick) => {
                self.lure.start(joystick)?;
                Ok(Response::Done)
            }
            Request::StopLureLoop => {
                self.lure.stop();
                Ok(Response::Done)
            }
            Request::Status => Ok(Response::Status(self.session.status())),
            Request::SaveConfig(config) => {
                save_config(&self.config_path, &config)?;
                tracing::info!(path = %self.config_path.display(), "config saved");
                Ok(Response::Done)
            }
        }
    }

    /// Targets `address`, running `adb connect` first for network devices,
    /// and checks it shows up as a ready device.
    pub async fn connect(&self, address: &str) -> Result<Response> {
        let address = address.trim();
        if address.is_empty() {
            return Err(BotError::Connection("(no address)".into()));
        }
        let previous = self.device.target();
        self.device.set_target(address);
        if let Err(e) = self.reach(address).await {
            self.device.set_target(&previous);
            return Err(e);
        }

        tracing::info!(address, "device connected");
        *self.connected.lock().unwrap_or_else(PoisonError::into_inner) = Some(address.to_string());
        Ok(Response::Connected(address.to_string()))
    }

    async fn reach(&self, address: &str) -> Result<()> {
        if is_network_address(address) {
            self.device.connect(address).await?;
        }
        let devices = self.device.list_devices().await?;
        if !devices.iter().any(|serial| serial == address) {
            return Err(BotError::Connection(address.to_string()));
        }
        Ok(())
    }

    /// Stops all automation, then drops the network link if there is one.
    pub async fn disconnect(&self) -> Result<()> {
        self.session.stop(&BotConfig::default()).await?;
        self.lure.stop();

        let address = self
            .connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(address) = address.filter(|a| is_network_address(a)) {
            self.device.disconnect(&address).await?;
            tracing::info!(%address, "device disconnected");
        }
        Ok(())
    }

    /// Handles requests concurrently, one task each, until the sender side
    /// closes.
    pub async fn serve(
        self: Arc<Self>,
        mut requests: mpsc::UnboundedReceiver<Request>,
        replies: mpsc::UnboundedSender<Reply>,
    ) {
        while let Some(request) = requests.recv().await {
            let engine = self.clone();
            let replies = replies.clone();
            tokio::spawn(async move {
                let label = request.label();
                let result = engine.handle(request).await.map_err(|e| {
                    tracing::warn!(request = label, error = %e, "request failed");
                    e.to_string()
                });
                let _ = replies.send(Reply {
                    request: label,
                    result,
                });
            });
        }
        tracing::debug!("request channel closed");
    }
}
