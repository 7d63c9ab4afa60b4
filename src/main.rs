use std::io::Write;

use screenpilot::config::{self, AppConfig};
use screenpilot::llm::types::{StreamChunk, StreamChunkKind};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    let task = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let task = task.trim();
    if task.is_empty() {
        eprintln!("usage: screenpilot <task description>");
        std::process::exit(2);
    }

    let cfg = match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load config; using defaults");
            AppConfig::default()
        }
    };

    // Echo streamed planner output to stdout as it arrives.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<StreamChunk>();
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(chunk) = rx.recv().await {
            match chunk.kind {
                StreamChunkKind::Content => {
                    let _ = write!(stdout, "{}", chunk.content);
                    let _ = stdout.flush();
                }
                StreamChunkKind::Done => {
                    let _ = writeln!(stdout);
                }
                _ => {}
            }
        }
    });

    let result = screenpilot::run(task, &cfg, Some(tx)).await;
    // All senders are gone once the registry is dropped; the printer drains and exits.
    let _ = printer.await;

    match result {
        Ok(report) => {
            tracing::info!(reason = ?report.reason, iterations = report.iterations, "done");
            if let Some(path) = report.transcript {
                tracing::info!(path = %path.display(), "transcript written");
            }
        }
        Err(e) => {
            eprintln!("screenpilot: {e} [stage: {}]", e.stage());
            std::process::exit(1);
        }
    }
}
