use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use eframe::egui;
use farmbot::config::{
    ClickConfig, IntervalUnit, LurePattern, TapConfig, default_config_path, load_config,
};
use farmbot::engine::Reply;
use farmbot::{AdbDevice, BotConfig, BotEvent, Device, Engine, Request, Response};
use global_hotkey::hotkey::{Code, HotKey};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use tokio::sync::{broadcast, mpsc};

/// Desktop control panel for the adb farming bot.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Config file (defaults to the per-user config directory).
    #[arg(long, env = "FARMBOT_CONFIG")]
    config: Option<PathBuf>,

    /// adb executable.
    #[arg(long, env = "FARMBOT_ADB", default_value = "adb")]
    adb: String,
}

const MAX_LOG_LINES: usize = 500;

#[derive(Clone, Copy, PartialEq)]
enum Level {
    Info,
    Success,
    Warning,
    Error,
}

impl Level {
    fn color(self) -> egui::Color32 {
        match self {
            Level::Info => egui::Color32::LIGHT_GRAY,
            Level::Success => egui::Color32::GREEN,
            Level::Warning => egui::Color32::YELLOW,
            Level::Error => egui::Color32::from_rgb(239, 68, 68),
        }
    }
}

struct LogLine {
    at: Duration,
    level: Level,
    text: String,
}

#[derive(Clone, Copy, PartialEq)]
enum Tab {
    Automation,
    Lure,
}

/// F8 stops everything even while the game window has focus.
struct StopHotkey {
    _manager: GlobalHotKeyManager,
    id: u32,
}

impl StopHotkey {
    fn register() -> Option<Self> {
        let manager = match GlobalHotKeyManager::new() {
            Ok(manager) => manager,
            Err(e) => {
                tracing::warn!(error = %e, "global hotkeys unavailable");
                return None;
            }
        };
        let hotkey = HotKey::new(None, Code::F8);
        if let Err(e) = manager.register(hotkey) {
            tracing::warn!(error = %e, "could not register F8");
            return None;
        }
        Some(Self {
            _manager: manager,
            id: hotkey.id(),
        })
    }
}

struct PanelApp {
    config: BotConfig,
    config_path: PathBuf,
    requests: mpsc::UnboundedSender<Request>,
    replies: mpsc::UnboundedReceiver<Reply>,
    events: broadcast::Receiver<BotEvent>,
    opened_at: Instant,
    connected: bool,
    devices: Vec<String>,
    running: bool,
    loop_running: bool,
    click_count: u64,
    session_started: Option<Instant>,
    debuff_interval: f64,
    debuff_unit: IntervalUnit,
    new_click: ClickConfig,
    tab: Tab,
    log: Vec<LogLine>,
    hotkey: Option<StopHotkey>,
}

impl PanelApp {
    fn new(
        cc: &eframe::CreationContext<'_>,
        config: BotConfig,
        config_path: PathBuf,
        requests: mpsc::UnboundedSender<Request>,
        replies: mpsc::UnboundedReceiver<Reply>,
        events: broadcast::Receiver<BotEvent>,
    ) -> Self {
        cc.egui_ctx.set_visuals(egui::Visuals::dark());

        let (debuff_interval, debuff_unit) = IntervalUnit::split(config.debuff.interval);
        let mut app = Self {
            config,
            config_path,
            requests,
            replies,
            events,
            opened_at: Instant::now(),
            connected: false,
            devices: Vec::new(),
            running: false,
            loop_running: false,
            click_count: 0,
            session_started: None,
            debuff_interval,
            debuff_unit,
            new_click: ClickConfig {
                x: 0,
                y: 0,
                interval: 2.0,
            },
            tab: Tab::Automation,
            log: Vec::new(),
            hotkey: StopHotkey::register(),
        };
        let hint = if app.hotkey.is_some() {
            "Panel ready. F8 stops all automation."
        } else {
            "Panel ready."
        };
        app.push_log(Level::Info, hint);
        app.push_log(
            Level::Info,
            format!("Config: {}", app.config_path.display()),
        );
        app.send(Request::Status);
        app
    }

    fn push_log(&mut self, level: Level, text: impl Into<String>) {
        self.log.push(LogLine {
            at: self.opened_at.elapsed(),
            level,
            text: text.into(),
        });
        if self.log.len() > MAX_LOG_LINES {
            let excess = self.log.len() - MAX_LOG_LINES;
            self.log.drain(..excess);
        }
    }

    fn send(&mut self, request: Request) {
        if self.requests.send(request).is_err() {
            self.push_log(Level::Error, "Engine thread is gone; restart the panel.");
        }
    }

    fn save(&mut self) {
        self.config.debuff.interval = self.debuff_unit.to_seconds(self.debuff_interval);
        self.send(Request::SaveConfig(Box::new(self.config.clone())));
    }

    fn stop_everything(&mut self) {
        if self.running {
            self.send(Request::StopSession(Box::new(self.config.clone())));
        }
        self.send(Request::StopLureLoop);
    }

    fn drain_replies(&mut self) {
        while let Ok(reply) = self.replies.try_recv() {
            match reply.result {
                Ok(Response::Connected(address)) => {
                    self.connected = true;
                    self.config.device = address.clone();
                    self.push_log(Level::Success, format!("Connected to {address}"));
                    self.save();
                }
                Ok(Response::Devices(devices)) => {
                    let text = if devices.is_empty() {
                        "No devices found".to_string()
                    } else {
                        format!("Devices: {}", devices.join(", "))
                    };
                    self.devices = devices;
                    self.push_log(Level::Info, text);
                }
                Ok(Response::Status(status)) => {
                    self.running = status.running;
                    self.click_count = status.click_count;
                }
                Ok(Response::Done) => {
                    if reply.request == "disconnect" {
                        self.connected = false;
                    }
                    self.push_log(Level::Success, format!("{} ok", reply.request));
                }
                Err(message) => {
                    self.push_log(Level::Error, format!("{} failed: {message}", reply.request));
                }
            }
        }
    }

    fn drain_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.apply_event(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "panel fell behind on events");
                }
                Err(_) => break,
            }
        }
    }

    fn apply_event(&mut self, event: BotEvent) {
        match event {
            BotEvent::SessionStarted => {
                self.running = true;
                self.click_count = 0;
                self.session_started = Some(Instant::now());
                self.push_log(Level::Success, "Bot started");
            }
            BotEvent::SessionStopped => {
                self.running = false;
                self.session_started = None;
                self.push_log(Level::Warning, "Bot stopped");
            }
            BotEvent::ClickCount { count } => self.click_count = count,
            BotEvent::LoopStarted => {
                self.loop_running = true;
                self.push_log(Level::Success, "Lure loop started");
            }
            BotEvent::LoopStopped => {
                self.loop_running = false;
                self.push_log(Level::Warning, "Lure loop stopped");
            }
            BotEvent::ActionFailed { action, message } => {
                self.push_log(Level::Error, format!("{action}: {message}"));
            }
        }
    }

    fn poll_hotkey(&mut self) {
        let Some(id) = self.hotkey.as_ref().map(|h| h.id) else {
            return;
        };
        while let Ok(event) = GlobalHotKeyEvent::receiver().try_recv() {
            if event.id == id && event.state == HotKeyState::Pressed {
                self.push_log(Level::Warning, "F8 pressed, stopping everything");
                self.stop_everything();
            }
        }
    }

    fn render_header(&self, ui: &mut egui::Ui) {
        ui.vertical_centered(|ui| {
            ui.add_space(12.0);
            ui.heading(
                egui::RichText::new("Farm Bot")
                    .size(28.0)
                    .strong()
                    .color(egui::Color32::from_rgb(100, 149, 237)),
            );
            ui.add_space(8.0);
        });
    }

    fn render_dashboard(&self, ui: &mut egui::Ui) {
        let runtime = self
            .session_started
            .map(|started| format_hms(started.elapsed()))
            .unwrap_or_else(|| "00:00:00".to_string());
        let (status, status_color) = if self.running {
            ("Running", egui::Color32::GREEN)
        } else {
            ("Stopped", egui::Color32::from_rgb(239, 68, 68))
        };
        let (lure, lure_color) = if self.loop_running {
            ("Active", egui::Color32::GREEN)
        } else {
            ("Idle", egui::Color32::GRAY)
        };

        egui::Frame::new()
            .fill(egui::Color32::from_rgb(25, 25, 25))
            .corner_radius(8.0)
            .inner_margin(15.0)
            .show(ui, |ui| {
                ui.columns(4, |cols| {
                    stat(&mut cols[0], status, "Bot", status_color);
                    stat(
                        &mut cols[1],
                        &self.click_count.to_string(),
                        "Clicks",
                        egui::Color32::YELLOW,
                    );
                    stat(&mut cols[2], &runtime, "Runtime", egui::Color32::WHITE);
                    stat(&mut cols[3], lure, "Lure loop", lure_color);
                });
            });
    }

    fn render_device(&mut self, ui: &mut egui::Ui) {
        card(ui, |ui| {
            ui.horizontal(|ui| {
                ui.label("Device");
                ui.add(
                    egui::TextEdit::singleline(&mut self.config.device)
                        .hint_text("192.168.0.10:5555 or serial")
                        .desired_width(220.0),
                );
                if ui.button("Connect").clicked() {
                    let address = self.config.device.clone();
                    self.send(Request::Connect(address));
                }
                if ui
                    .add_enabled(self.connected, egui::Button::new("Disconnect"))
                    .clicked()
                {
                    self.send(Request::Disconnect);
                }
                if ui.button("List devices").clicked() {
                    self.send(Request::ListDevices);
                }
            });
            if !self.devices.is_empty() {
                ui.horizontal_wrapped(|ui| {
                    let mut picked = None;
                    for serial in &self.devices {
                        if ui.small_button(serial).clicked() {
                            picked = Some(serial.clone());
                        }
                    }
                    if let Some(serial) = picked {
                        self.config.device = serial;
                    }
                });
            }
            ui.horizontal(|ui| {
                ui.label("Pointer overlay");
                if ui.button("On").clicked() {
                    self.send(Request::SetPointer(true));
                }
                if ui.button("Off").clicked() {
                    self.send(Request::SetPointer(false));
                }
            });
        });
    }

    fn render_automation(&mut self, ui: &mut egui::Ui) {
        card(ui, |ui| {
            ui.label(egui::RichText::new("In-game auto toggle").strong());
            ui.horizontal(|ui| {
                ui.checkbox(&mut self.config.game_start.enabled, "Tap on start/stop");
                coord(ui, &mut self.config.game_start.x, &mut self.config.game_start.y);
            });
        });
        card(ui, |ui| tap_timer(ui, "Camera reset", &mut self.config.camera_reset));
        card(ui, |ui| tap_timer(ui, "Berserker", &mut self.config.berserker));
        card(ui, |ui| tap_timer(ui, "Lure tap", &mut self.config.lure));

        card(ui, |ui| {
            let debuff = &mut self.config.debuff;
            ui.label(egui::RichText::new("Debuff combo").strong());
            ui.checkbox(&mut debuff.enabled, "Enabled");
            ui.horizontal(|ui| {
                ui.label("Echo");
                coord(ui, &mut debuff.echo_x, &mut debuff.echo_y);
                ui.label("Weapon");
                coord(ui, &mut debuff.weapon_x, &mut debuff.weapon_y);
            });
            ui.horizontal(|ui| {
                ui.label("Hold");
                ui.add(seconds(&mut debuff.delay));
                ui.label("Every");
                ui.add(
                    egui::DragValue::new(&mut self.debuff_interval)
                        .speed(0.5)
                        .range(0.0..=10_000.0),
                );
                egui::ComboBox::from_id_salt("debuff_unit")
                    .selected_text(match self.debuff_unit {
                        IntervalUnit::Seconds => "seconds",
                        IntervalUnit::Minutes => "minutes",
                    })
                    .show_ui(ui, |ui| {
                        ui.selectable_value(&mut self.debuff_unit, IntervalUnit::Seconds, "seconds");
                        ui.selectable_value(&mut self.debuff_unit, IntervalUnit::Minutes, "minutes");
                    });
            });
        });
        self.config.debuff.interval = self.debuff_unit.to_seconds(self.debuff_interval);

        card(ui, |ui| {
            ui.label(egui::RichText::new("Click sequence").strong());
            let mut remove = None;
            for (i, click) in self.config.clicks.iter_mut().enumerate() {
                ui.horizontal(|ui| {
                    ui.label(format!("#{}", i + 1));
                    coord(ui, &mut click.x, &mut click.y);
                    ui.add(seconds(&mut click.interval));
                    if ui.small_button("Remove").clicked() {
                        remove = Some(i);
                    }
                });
            }
            if let Some(i) = remove {
                self.config.clicks.remove(i);
            }
            ui.horizontal(|ui| {
                coord(ui, &mut self.new_click.x, &mut self.new_click.y);
                ui.add(seconds(&mut self.new_click.interval));
                if ui.button("Add click").clicked() {
                    self.config.clicks.push(self.new_click.clone());
                }
            });
        });

        ui.add_space(8.0);
        ui.horizontal(|ui| {
            let start = egui::Button::new(egui::RichText::new("Start bot").size(16.0).strong())
                .fill(egui::Color32::from_rgb(34, 139, 34))
                .min_size(egui::vec2(110.0, 32.0));
            if ui.add_enabled(!self.running, start).clicked() {
                self.save();
                self.send(Request::StartSession(Box::new(self.config.clone())));
            }
            let stop = egui::Button::new(egui::RichText::new("Stop bot").size(16.0).strong())
                .fill(egui::Color32::from_rgb(178, 34, 34))
                .min_size(egui::vec2(110.0, 32.0));
            if ui.add_enabled(self.running, stop).clicked() {
                self.send(Request::StopSession(Box::new(self.config.clone())));
            }
            if ui.button("Save config").clicked() {
                self.save();
            }
        });
    }

    fn render_lure(&mut self, ui: &mut egui::Ui) {
        card(ui, |ui| {
            let joystick = &mut self.config.joystick;
            ui.horizontal(|ui| {
                ui.radio_value(&mut joystick.pattern, LurePattern::Straight, "Straight");
                ui.radio_value(&mut joystick.pattern, LurePattern::Square, "Square");
            });
            ui.label(match joystick.pattern {
                LurePattern::Straight => "Forward then back along the vertical axis.",
                LurePattern::Square => "Up, right, down, left around the joystick centre.",
            });
            egui::Grid::new("joystick").num_columns(2).show(ui, |ui| {
                ui.label("Centre");
                ui.horizontal(|ui| coord(ui, &mut joystick.center_x, &mut joystick.center_y));
                ui.end_row();
                ui.label("Radius");
                ui.add(egui::DragValue::new(&mut joystick.radius).range(1..=1000));
                ui.end_row();
                ui.label("Swipe duration");
                ui.add(
                    egui::DragValue::new(&mut joystick.duration)
                        .range(1..=5000)
                        .suffix(" ms"),
                );
                ui.end_row();
                ui.label("Pause");
                ui.add(seconds(&mut joystick.pause));
                ui.end_row();
                ui.label("Movement interval");
                ui.add(seconds(&mut joystick.movement_interval));
                ui.end_row();
                ui.label("Repetitions");
                ui.add(egui::DragValue::new(&mut joystick.repetitions).range(1..=50));
                ui.end_row();
            });
            ui.checkbox(&mut joystick.loop_enabled, "Allow continuous loop");
        });

        ui.horizontal(|ui| {
            if ui.button("Run once").clicked() {
                let joystick = self.config.joystick.clone();
                self.send(Request::ExecuteLure(joystick));
            }
            let can_loop = self.config.joystick.loop_enabled && !self.loop_running;
            if ui
                .add_enabled(can_loop, egui::Button::new("Start loop"))
                .clicked()
            {
                self.save();
                let joystick = self.config.joystick.clone();
                self.send(Request::StartLureLoop(joystick));
            }
            if ui
                .add_enabled(self.loop_running, egui::Button::new("Stop loop"))
                .clicked()
            {
                self.send(Request::StopLureLoop);
            }
        });
    }

    fn render_log(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label(egui::RichText::new("Log").strong());
            if ui.small_button("Clear").clicked() {
                self.log.clear();
            }
        });
        egui::ScrollArea::vertical()
            .stick_to_bottom(true)
            .auto_shrink([false; 2])
            .show(ui, |ui| {
                for line in &self.log {
                    ui.label(
                        egui::RichText::new(format!("[{}] {}", format_hms(line.at), line.text))
                            .monospace()
                            .color(line.level.color()),
                    );
                }
            });
    }
}

impl eframe::App for PanelApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_replies();
        self.drain_events();
        self.poll_hotkey();
        // runtime clock and engine events
        ctx.request_repaint_after(Duration::from_millis(250));

        egui::TopBottomPanel::bottom("log")
            .resizable(true)
            .default_height(160.0)
            .show(ctx, |ui| self.render_log(ui));

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical()
                .auto_shrink([false; 2])
                .show(ui, |ui| {
                    let width = f32::min(900.0, ui.available_width() - 20.0);
                    ui.vertical_centered(|ui| {
                        ui.set_max_width(width);
                        self.render_header(ui);
                        self.render_dashboard(ui);
                        ui.add_space(12.0);
                        self.render_device(ui);
                        ui.add_space(8.0);
                        ui.horizontal(|ui| {
                            ui.selectable_value(&mut self.tab, Tab::Automation, "Automation");
                            ui.selectable_value(&mut self.tab, Tab::Lure, "Lure");
                        });
                        ui.separator();
                        match self.tab {
                            Tab::Automation => self.render_automation(ui),
                            Tab::Lure => self.render_lure(ui),
                        }
                    });
                });
        });
    }
}

fn stat(ui: &mut egui::Ui, value: &str, label: &str, color: egui::Color32) {
    ui.heading(egui::RichText::new(value).size(22.0).strong().color(color));
    ui.label(label);
}

fn card(ui: &mut egui::Ui, add_contents: impl FnOnce(&mut egui::Ui)) {
    egui::Frame::new()
        .fill(egui::Color32::from_rgb(35, 35, 35))
        .corner_radius(8.0)
        .inner_margin(12.0)
        .stroke(egui::Stroke::new(1.0, egui::Color32::from_rgb(50, 50, 50)))
        .show(ui, |ui| {
            ui.set_min_width(ui.available_width());
            add_contents(ui);
        });
    ui.add_space(8.0);
}

fn coord(ui: &mut egui::Ui, x: &mut i32, y: &mut i32) {
    ui.label("X");
    ui.add(egui::DragValue::new(x).range(0..=4000));
    ui.label("Y");
    ui.add(egui::DragValue::new(y).range(0..=4000));
}

fn seconds(value: &mut f64) -> egui::DragValue<'_> {
    egui::DragValue::new(value)
        .speed(0.1)
        .range(0.0..=3600.0)
        .suffix(" s")
}

fn tap_timer(ui: &mut egui::Ui, title: &str, tap: &mut TapConfig) {
    ui.label(egui::RichText::new(title).strong());
    ui.horizontal(|ui| {
        ui.checkbox(&mut tap.enabled, "Enabled");
        coord(ui, &mut tap.x, &mut tap.y);
        ui.label("Every");
        ui.add(seconds(&mut tap.interval));
    });
}

fn format_hms(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn setup_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_tracing();
    let args = Args::parse();

    let config_path = args.config.unwrap_or_else(default_config_path);
    let config = load_config(&config_path).unwrap_or_else(|e| {
        tracing::warn!(path = %config_path.display(), error = %e, "config unreadable, using defaults");
        BotConfig::default()
    });

    let device = Arc::new(AdbDevice::new(args.adb));
    if !config.device.is_empty() {
        device.set_target(&config.device);
    }
    let engine = Arc::new(Engine::new(device, config_path.clone()));
    let events = engine.subscribe();
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();

    // every timer and device command runs on this one thread
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    std::thread::Builder::new()
        .name("engine".into())
        .spawn(move || runtime.block_on(engine.serve(request_rx, reply_tx)))?;

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([900.0, 860.0])
            .with_min_inner_size([640.0, 480.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Farm Bot",
        native_options,
        Box::new(move |cc| {
            Ok(Box::new(PanelApp::new(
                cc,
                config,
                config_path,
                request_tx,
                reply_rx,
                events,
            )))
        }),
    )
    .map_err(|e| anyhow::anyhow!("panel crashed: {e}"))
}
