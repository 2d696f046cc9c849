//! CareCircle assistant launcher - starts the chatbot backend
//!
//! Runs the backend script with the platform's Python interpreter from
//! inside the backend directory, so its relative imports and `.env` load.
//!
//! Usage:
//!   carecircle-assistant --backend-dir backend --script app_api.py
//!
//! Environment variables:
//!   ASSISTANT_BACKEND_DIR - backend directory (default: backend)
//!   ASSISTANT_SCRIPT - script inside the backend directory (default: app_api.py)

use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "carecircle-assistant")]
#[command(about = "Start the CareCircle chatbot backend")]
#[command(version)]
struct Args {
    /// Directory holding the backend script
    #[arg(long, env = "ASSISTANT_BACKEND_DIR", default_value = "backend")]
    backend_dir: PathBuf,

    /// Script to run, relative to the backend directory
    #[arg(long, env = "ASSISTANT_SCRIPT", default_value = "app_api.py")]
    script: String,
}

fn interpreter() -> &'static str {
    if cfg!(windows) {
        "python"
    } else {
        "python3"
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

fn command(backend_dir: &Path, script: &str) -> Command {
    let mut cmd = Command::new(interpreter());
    cmd.arg(backend_dir.join(script))
        .current_dir(backend_dir)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    cmd
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!(
        "Starting assistant backend: {} {}",
        interpreter(),
        args.backend_dir.join(&args.script).display()
    );

    let mut child = match command(&args.backend_dir, &args.script).spawn() {
        Ok(child) => child,
        Err(e) => {
            error!("Failed to start Python: {}", e);
            error!("Install Python and make sure `{}` is on PATH", interpreter());
            std::process::exit(1);
        }
    };

    let code = match child.wait().await {
        Ok(status) => exit_code(status),
        Err(e) => {
            error!("Assistant backend wait failed: {}", e);
            1
        }
    };
    std::process::exit(code);
}
