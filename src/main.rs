//! Line-oriented front end: one JSON command per stdin line, one JSON reply per stdout line.

use std::io::{self, BufRead, Write};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wraith::Engine;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wraith=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run() {
        error!("wraith stopped: {}", e);
        std::process::exit(1);
    }
}

fn run() -> wraith::Result<()> {
    let engine = Engine::new()?;
    info!(version = env!("CARGO_PKG_VERSION"), "wraith ready");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = engine.handle(&line);
        writeln!(out, "{}", reply)?;
        out.flush()?;
    }

    let live = engine.destroy_all();
    info!(live, outstanding = engine.outstanding_responses(), "stdin closed, shutting down");
    Ok(())
}
