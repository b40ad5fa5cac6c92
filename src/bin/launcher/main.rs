mod face;
mod supervisor;
mod types;

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use types::{EVENT_CAPACITY, LaunchSpec};

/// Web launcher: starts and stops an external bot script and streams its
/// output to the browser.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Interpreter used to run the script.
    #[arg(long, env = "FARMBOT_PROGRAM", default_value = "python3")]
    program: String,

    #[arg(long, env = "FARMBOT_SCRIPT", default_value = "main.py")]
    script: String,

    /// Directory the bot runs in.
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    /// Flat JSON config edited from the browser (relative to the workdir).
    #[arg(long, default_value = "config_farming_adb.json")]
    config: PathBuf,

    /// First port to try; the next nine are fallbacks.
    #[arg(long, env = "FARMBOT_LAUNCHER_PORT", default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
    let spec = LaunchSpec {
        program: args.program,
        args: vec![args.script],
        workdir: args.workdir.clone(),
    };
    let state = Arc::new(face::AppState {
        supervisor: supervisor::Supervisor::new(spec, event_tx.clone()),
        config_path: args.workdir.join(&args.config),
        event_tx,
    });

    let listener = face::bind(args.port).await?;
    tracing::info!("launcher running at http://{}", listener.local_addr()?);

    axum::serve(listener, face::router(state.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if state.supervisor.stop() {
        tracing::info!("bot process stopped on shutdown");
    }
    Ok(())
}
