use std::path::PathBuf;
use std::process::Stdio;

use futures_util::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{EngineError, GraphEngine, RenderRequest, Rendered};

const LAYOUTS: &[&str] = &[
    "circo", "dot", "fdp", "sfdp", "neato", "osage", "patchwork", "twopi",
];

/// Renders DOT sources through a local graphviz install.
#[derive(Debug, Clone)]
pub struct GraphvizEngine {
    dot: PathBuf,
}

impl GraphvizEngine {
    pub fn new(dot: impl Into<PathBuf>) -> Self {
        Self { dot: dot.into() }
    }

    /// Find `dot` on the `PATH`.
    pub fn locate() -> Result<Self, String> {
        which::which("dot")
            .map(Self::new)
            .map_err(|e| format!("graphviz `dot` executable not found: {e}"))
    }

    fn layout<'r>(request: &'r RenderRequest<'_>) -> Result<&'r str, EngineError> {
        let layout = request.hints.get("layout").map(String::as_str).unwrap_or("dot");
        if LAYOUTS.contains(&layout) {
            Ok(layout)
        } else {
            Err(EngineError::new(format!("unknown graphviz layout `{layout}`")))
        }
    }
}

impl GraphEngine for GraphvizEngine {
    fn render<'a>(&'a self, request: RenderRequest<'a>) -> BoxFuture<'a, Result<Rendered, EngineError>> {
        Box::pin(async move {
            let layout = Self::layout(&request)?;
            let mut child = Command::new(&self.dot)
                .arg(format!("-K{layout}"))
                .arg("-Tsvg")
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| EngineError::new(format!("failed to start dot: {e}")))?;

            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(request.content.as_bytes())
                    .await
                    .map_err(|e| EngineError::new(format!("failed to write to dot: {e}")))?;
            }

            let output = child
                .wait_with_output()
                .await
                .map_err(|e| EngineError::new(format!("dot did not finish: {e}")))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(EngineError::new(stderr.trim().to_owned()));
            }
            String::from_utf8(output.stdout)
                .map(Rendered::Markup)
                .map_err(|_| EngineError::new("dot produced non-UTF-8 output"))
        })
    }
}
