//! Out-of-process entry point for the compile worker.
//!
//! Reads one JSON `WorkerInput` per line on stdin and answers with one JSON
//! `WorkerOutput` per line on stdout. An optional first argument names a
//! `.json` or `.toml` config file.

use miette::{IntoDiagnostic, Result};
use polyglot_common::Config;
use polyglot_common::config::FileStore;
use polyglot_common::telemetry::{self, TelemetryConfig};
use polyglot_worker::{CompileWorker, WorkerInput};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    telemetry::init(TelemetryConfig::from_env("polyglot-worker"));

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&FileStore::new(path)).await?,
        None => Config::default(),
    };
    let worker = CompileWorker::builtin(&config);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await.into_diagnostic()? {
        if line.trim().is_empty() {
            continue;
        }
        let input: WorkerInput = match serde_json::from_str(&line) {
            Ok(input) => input,
            Err(error) => {
                tracing::warn!(%error, "skipping malformed worker message");
                continue;
            }
        };
        let output = worker.handle(input).await;
        let mut reply = serde_json::to_string(&output).into_diagnostic()?;
        reply.push('\n');
        stdout.write_all(reply.as_bytes()).await.into_diagnostic()?;
        stdout.flush().await.into_diagnostic()?;
    }
    Ok(())
}
