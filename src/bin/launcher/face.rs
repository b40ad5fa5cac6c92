use anyhow::{Context, Result, anyhow};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use serde_json::Value;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::supervisor::Supervisor;
use crate::types::{LauncherEvent, PORT_FALLBACKS};

fn to_sse_event(event: &LauncherEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.name()).data(data)
}

pub struct AppState {
    pub supervisor: Supervisor,
    pub config_path: PathBuf,
    pub event_tx: broadcast::Sender<LauncherEvent>,
}

type HandlerError = (StatusCode, String);

fn internal(e: anyhow::Error) -> HandlerError {
    tracing::warn!(error = %e, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/start", post(start_handler))
        .route("/stop", post(stop_handler))
        .route("/config", get(get_config_handler).post(save_config_handler))
        .route("/events", get(sse_handler))
        .route(
            "/favicon.ico",
            get(|| async { StatusCode::NO_CONTENT }),
        )
        .with_state(state)
}

/// Binds `port`, or the first free one of the next few.
pub async fn bind(port: u16) -> Result<TcpListener> {
    let last = port.saturating_add(PORT_FALLBACKS);
    for p in port..=last {
        match TcpListener::bind(("127.0.0.1", p)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => tracing::debug!(port = p, error = %e, "port unavailable"),
        }
    }
    Err(anyhow!(
        "could not bind to any port {port}-{last}; is another launcher running?"
    ))
}

/// Reads the bot's flat JSON config. A missing file reads as `{}`.
pub fn load_flat_config(path: &Path) -> Result<Value> {
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw)
            .with_context(|| format!("{} is not valid JSON", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Value::Object(Default::default())),
        Err(e) => Err(e).with_context(|| format!("could not read {}", path.display())),
    }
}

pub fn save_flat_config(path: &Path, config: &Value) -> Result<()> {
    if !config.is_object() {
        return Err(anyhow!("config must be a JSON object"));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let pretty = serde_json::to_string_pretty(config)?;
    std::fs::write(path, pretty).with_context(|| format!("could not write {}", path.display()))
}

async fn index_handler() -> Html<&'static str> {
    tracing::debug!("GET /");
    Html(INDEX_HTML)
}

async fn start_handler(State(state): State<Arc<AppState>>) -> Result<Json<bool>, HandlerError> {
    tracing::info!("POST /start");
    state.supervisor.start().map(Json).map_err(internal)
}

async fn stop_handler(State(state): State<Arc<AppState>>) -> Json<bool> {
    tracing::info!("POST /stop");
    Json(state.supervisor.stop())
}

async fn get_config_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, HandlerError> {
    load_flat_config(&state.config_path).map(Json).map_err(internal)
}

async fn save_config_handler(
    State(state): State<Arc<AppState>>,
    Json(config): Json<Value>,
) -> Result<Json<bool>, HandlerError> {
    if !config.is_object() {
        return Err((StatusCode::BAD_REQUEST, "config must be a JSON object".into()));
    }
    save_flat_config(&state.config_path, &config).map_err(internal)?;
    tracing::info!(path = %state.config_path.display(), "config saved");
    Ok(Json(true))
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|result| match result {
            Ok(event) => Some(Ok::<_, Infallible>(to_sse_event(&event))),
            Err(_) => None,
        });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Farm Bot Launcher</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0a0a0f;
    color: #e0e0e0;
    font-family: 'Segoe UI', system-ui, -apple-system, sans-serif;
    height: 100vh;
    display: flex;
    flex-direction: column;
  }
  header {
    padding: 24px 32px;
    border-bottom: 1px solid #1a1a2e;
    display: flex;
    align-items: center;
    gap: 12px;
  }
  header h1 { font-size: 20px; font-weight: 600; color: #fff; }
  header .dot { width: 8px; height: 8px; border-radius: 50%; background: #555; }
  header .dot.running { background: #22c55e; animation: pulse 2s infinite; }
  @keyframes pulse {
    0%, 100% { opacity: 1; }
    50% { opacity: 0.4; }
  }
  .main {
    flex: 1;
    display: flex;
    flex-direction: column;
    max-width: 800px;
    width: 100%;
    margin: 0 auto;
    padding: 24px 32px;
    gap: 16px;
    overflow: hidden;
  }
  .controls { display: flex; gap: 8px; }
  #config {
    background: #111118;
    border: 1px solid #222;
    border-radius: 8px;
    padding: 12px 16px;
    color: #fff;
    font-family: 'Cascadia Code', 'Fira Code', monospace;
    font-size: 13px;
    height: 180px;
    resize: vertical;
    outline: none;
  }
  #config:focus { border-color: #6366f1; }
  #log {
    flex: 1;
    overflow-y: auto;
    background: #111118;
    border-radius: 8px;
    padding: 12px 14px;
    font-family: 'Cascadia Code', 'Fira Code', monospace;
    font-size: 13px;
    line-height: 1.5;
    white-space: pre-wrap;
  }
  #log .notice { color: #fcd34d; }
  #log .error { color: #fca5a5; }
  button {
    background: #6366f1;
    color: #fff;
    border: none;
    border-radius: 8px;
    padding: 12px 24px;
    font-size: 15px;
    font-weight: 600;
    cursor: pointer;
    transition: background 0.2s;
  }
  button:hover { background: #4f46e5; }
  button.stop { background: #b91c1c; }
  button.stop:hover { background: #991b1b; }
  button.save { background: #1f2937; }
</style>
</head>
<body>
<header>
  <div class="dot" id="dot"></div>
  <h1>Farm Bot Launcher</h1>
</header>
<div class="main">
  <div class="controls">
    <button id="start">Start</button>
    <button id="stop" class="stop">Stop</button>
    <button id="save" class="save">Save config</button>
  </div>
  <textarea id="config" spellcheck="false"></textarea>
  <div id="log"></div>
</div>
<script>
  const log = document.getElementById('log');
  const dot = document.getElementById('dot');
  const config = document.getElementById('config');

  function append(text, cls) {
    const line = document.createElement('div');
    if (cls) line.className = cls;
    line.textContent = text;
    log.appendChild(line);
    log.scrollTop = log.scrollHeight;
  }

  async function post(path, body) {
    const res = await fetch(path, {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: body === undefined ? undefined : JSON.stringify(body),
    });
    if (!res.ok) throw new Error(await res.text());
    return res.json();
  }

  async function loadConfig() {
    const res = await fetch('/config');
    if (!res.ok) { append(await res.text(), 'error'); return; }
    config.value = JSON.stringify(await res.json(), null, 2);
  }

  document.getElementById('start').onclick = async () => {
    try {
      if (!(await post('/start'))) append('bot is already running', 'notice');
    } catch (e) { append(e.message, 'error'); }
  };
  document.getElementById('stop').onclick = async () => {
    try {
      if (!(await post('/stop'))) append('bot is not running', 'notice');
    } catch (e) { append(e.message, 'error'); }
  };
  document.getElementById('save').onclick = async () => {
    try {
      await post('/config', JSON.parse(config.value));
      append('config saved', 'notice');
    } catch (e) { append(e.message, 'error'); }
  };

  const es = new EventSource('/events');
  es.addEventListener('started', e => {
    dot.classList.add('running');
    append('bot started (pid ' + JSON.parse(e.data).pid + ')', 'notice');
  });
  es.addEventListener('log', e => append(JSON.parse(e.data).line));
  es.addEventListener('finished', () => dot.classList.remove('running'));

  loadConfig();
</script>
</body>
</html>
"##;
