use std::path::{Path, PathBuf};
use std::process::Stdio;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures_util::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{EngineError, GraphEngine, InputFile, RenderRequest, Rendered};

/// Runs gnuplot scripts through a local gnuplot install.
///
/// Each block runs in a scratch directory holding its input files; the
/// script is expected to `set output` to the block's target reference, and
/// that file is what gets displayed.
///
/// Scripts run with the privileges of this process. gnuplot can start shell
/// commands (`system`, `!`), and the compile worker is a thread in the same
/// process rather than a sandbox, so only feed it scripts you would run
/// yourself. That includes scripts fetched through a block's `src`.
#[derive(Debug, Clone)]
pub struct GnuplotEngine {
    gnuplot: PathBuf,
}

impl GnuplotEngine {
    pub fn new(gnuplot: impl Into<PathBuf>) -> Self {
        Self {
            gnuplot: gnuplot.into(),
        }
    }

    pub fn locate() -> Result<Self, String> {
        which::which("gnuplot")
            .map(Self::new)
            .map_err(|e| format!("gnuplot executable not found: {e}"))
    }

    async fn stage_files(dir: &Path, files: &[InputFile]) -> Result<(), EngineError> {
        for file in files {
            let path = scratch_path(dir, &file.name)?;
            tokio::fs::write(&path, &file.content)
                .await
                .map_err(|e| EngineError::new(format!("failed to stage {}: {e}", file.name)))?;
        }
        Ok(())
    }

    async fn run(&self, dir: &Path, script: &str) -> Result<(), EngineError> {
        let mut child = Command::new(&self.gnuplot)
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::new(format!("failed to start gnuplot: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(script.as_bytes())
                .await
                .map_err(|e| EngineError::new(format!("failed to write to gnuplot: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| EngineError::new(format!("gnuplot did not finish: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::new(stderr.trim().to_owned()));
        }
        Ok(())
    }
}

impl GraphEngine for GnuplotEngine {
    fn render<'a>(&'a self, request: RenderRequest<'a>) -> BoxFuture<'a, Result<Rendered, EngineError>> {
        Box::pin(async move {
            let scratch = tempfile::tempdir()
                .map_err(|e| EngineError::new(format!("failed to create scratch dir: {e}")))?;
            let output_path = scratch_path(scratch.path(), request.output)?;

            Self::stage_files(scratch.path(), request.files).await?;
            self.run(scratch.path(), request.content).await?;

            let bytes = tokio::fs::read(&output_path).await.map_err(|_| {
                EngineError::new(format!("output file \"{}\" was not produced", request.output))
            })?;
            Ok(encode_output(request.output, bytes))
        })
    }
}

/// Join `name` onto the scratch dir, refusing anything that would escape it.
fn scratch_path(dir: &Path, name: &str) -> Result<PathBuf, EngineError> {
    let candidate = Path::new(name);
    let plain = candidate
        .components()
        .all(|c| matches!(c, std::path::Component::Normal(_)));
    if name.is_empty() || !plain {
        return Err(EngineError::new(format!("invalid file name \"{name}\"")));
    }
    Ok(dir.join(candidate))
}

/// Known raster extensions become data URIs; anything else is taken as
/// SVG, gnuplot's usual web terminal.
fn encode_output(name: &str, bytes: Vec<u8>) -> Rendered {
    let extension = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("png") => data_uri("image/png", &bytes),
        Some("jpg" | "jpeg") => data_uri("image/jpeg", &bytes),
        Some("gif") => data_uri("image/gif", &bytes),
        Some("svg") => svg(bytes),
        _ if looks_like_svg(&bytes) => svg(bytes),
        _ => data_uri("image/svg+xml", &bytes),
    }
}

fn svg(bytes: Vec<u8>) -> Rendered {
    match String::from_utf8(bytes) {
        Ok(svg) => Rendered::Markup(svg),
        Err(e) => data_uri("image/svg+xml", e.as_bytes()),
    }
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    let start = bytes.trim_ascii_start();
    start.starts_with(b"<svg") || start.starts_with(b"<?xml")
}

fn data_uri(mime: &str, bytes: &[u8]) -> Rendered {
    Rendered::DataUri(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
}
