mod access;
mod config;
mod db;
mod error;
mod facts;
mod graph;
mod ipc;
mod model;
mod params;
mod reports;
mod roster;
mod stats;

use clap::Parser;
use log::{info, warn};
use std::io::{self, BufRead, Write};

fn main() -> anyhow::Result<()> {
    let args = config::Args::parse();
    let config = config::load(&args)?;

    // stdout carries the protocol, so logs go to stderr.
    env_logger::builder()
        .target(env_logger::Target::Stderr)
        .filter_level(config.log_filter())
        .parse_default_env()
        .init();

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
        top_n: config.top_n,
    };
    if let Some(path) = config.workspace.clone() {
        ipc::select_workspace(&mut state, path)?;
    }
    info!("schoold {} ready", env!("CARGO_PKG_VERSION"));

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                warn!("unparseable request: {}", e);
                // No id to answer with.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    Ok(())
}
