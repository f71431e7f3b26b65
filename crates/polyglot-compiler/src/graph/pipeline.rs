use std::collections::HashSet;

use futures_util::future::join;
use n0_future::join_all;
use polyglot_common::ResourceFetcher;
use polyglot_common::perf::TimingGuard;
use smol_str::SmolStr;

use super::cache::{self, ArtifactCache, CACHE_MARKER_TYPE, Restored};
use super::document::{self, Edit, Element};
use super::{GraphHandler, GraphKind, PassContext, PendingInputFile};
use crate::engines::{InputFile, RenderRequest};
use crate::error::{BlockError, EngineLoadError};

/// Where a pass puts its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emit {
    /// Straight into the display targets.
    Substitute,
    /// Into a cache marker for a later restore.
    Serialize,
}

/// Document text after a pass, with the blocks that failed along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassOutput {
    pub text: String,
    pub errors: Vec<BlockError>,
}

impl PassOutput {
    fn unchanged(text: String) -> Self {
        Self {
            text,
            errors: Vec::new(),
        }
    }

    fn absorb(&mut self, pass: PassOutput) {
        self.text = pass.text;
        self.errors.extend(pass.errors);
    }
}

/// The ordered handler table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphPipeline {
    handlers: Vec<GraphHandler>,
}

impl Default for GraphPipeline {
    fn default() -> Self {
        Self::builtin()
    }
}

impl GraphPipeline {
    /// Handlers run in the order given.
    pub fn new(handlers: Vec<GraphHandler>) -> Self {
        Self { handlers }
    }

    /// gnuplot, then mermaid, then graphviz.
    pub fn builtin() -> Self {
        Self::new(vec![
            GraphHandler::gnuplot(),
            GraphHandler::mermaid(),
            GraphHandler::graphviz(),
        ])
    }

    pub fn handlers(&self) -> &[GraphHandler] {
        &self.handlers
    }

    fn input_file_markers(&self) -> Vec<&str> {
        self.handlers
            .iter()
            .filter_map(|handler| handler.caps.input_files.as_deref())
            .collect()
    }

    pub fn restore(&self, doc: &str) -> Restored {
        cache::restore(doc, &self.input_file_markers())
    }

    /// Restore, then every handler in order, substituting results.
    pub async fn run(&self, doc: &str, cx: PassContext<'_>) -> Result<PassOutput, EngineLoadError> {
        self.restore_and_render(doc, cx, |_| true).await
    }

    /// The isolated stage: only isolated handlers, results serialised.
    pub async fn run_isolated(
        &self,
        doc: &str,
        cx: PassContext<'_>,
    ) -> Result<PassOutput, EngineLoadError> {
        let mut output = PassOutput::unchanged(doc.to_owned());
        let satisfied = HashSet::new();
        for handler in self.handlers.iter().filter(|h| h.caps.isolated) {
            let text = std::mem::take(&mut output.text);
            let pass = self
                .render_kind(handler, text, cx, Emit::Serialize, &satisfied)
                .await?;
            output.absorb(pass);
        }
        Ok(output)
    }

    /// The main stage: restore, then the remaining handlers.
    pub async fn run_main(
        &self,
        doc: &str,
        cx: PassContext<'_>,
    ) -> Result<PassOutput, EngineLoadError> {
        self.restore_and_render(doc, cx, |h| !h.caps.isolated).await
    }

    async fn restore_and_render(
        &self,
        doc: &str,
        cx: PassContext<'_>,
        include: impl Fn(&GraphHandler) -> bool,
    ) -> Result<PassOutput, EngineLoadError> {
        let restored = self.restore(doc);
        let mut output = PassOutput {
            text: restored.text,
            errors: restored.errors,
        };
        for handler in self.handlers.iter().filter(|&h| include(h)) {
            let text = std::mem::take(&mut output.text);
            let pass = self
                .render_kind(handler, text, cx, Emit::Substitute, &restored.targets)
                .await?;
            output.absorb(pass);
        }
        output.text = self.strip_input_files(output.text);
        Ok(output)
    }

    /// Drops every input-file marker, whether or not its kind rendered.
    fn strip_input_files(&self, doc: String) -> String {
        let types = self.input_file_markers();
        if types.is_empty() {
            return doc;
        }
        let edits: Vec<Edit> = document::scan(&doc)
            .iter()
            .filter(|el| types.iter().any(|ty| el.is_script_of_type(ty)))
            .map(Edit::remove)
            .collect();
        if edits.is_empty() {
            return doc;
        }
        document::apply(&doc, edits)
    }

    /// One handler's pass over `doc`.
    ///
    /// Markers whose target is in `satisfied` are dropped without rendering.
    /// The engine is only loaded when some marker still needs it.
    pub async fn render_kind(
        &self,
        handler: &GraphHandler,
        doc: String,
        cx: PassContext<'_>,
        emit: Emit,
        satisfied: &HashSet<SmolStr>,
    ) -> Result<PassOutput, EngineLoadError> {
        let elements = document::scan(&doc);
        let mut removals = Vec::new();
        let mut pending = Vec::new();
        for (element, block) in super::blocks_in(&elements, &doc, &handler.kind) {
            if satisfied.contains(&block.output) {
                removals.push(Edit::remove(element));
            } else {
                pending.push((element, block));
            }
        }
        if pending.is_empty() {
            if removals.is_empty() {
                return Ok(PassOutput::unchanged(doc));
            }
            return Ok(PassOutput::unchanged(document::apply(&doc, removals)));
        }

        let _timing = TimingGuard::new("graph pass");
        let engine = handler.engine(cx.loader).await?;
        tracing::debug!(kind = %handler.kind, blocks = pending.len(), "rendering embedded blocks");

        let file_marker = handler.caps.input_files.as_deref();
        let ((files, mut errors), contents) = join(
            input_files(&elements, &doc, file_marker, &handler.kind, cx.fetcher),
            join_all(pending.iter().map(|(_, block)| block.source.resolve(cx.fetcher))),
        )
        .await;

        let mut results = ArtifactCache::new();
        for ((element, block), content) in pending.iter().zip(contents) {
            let content = match content {
                Ok(content) => content,
                Err(error) => {
                    tracing::warn!(kind = %handler.kind, target = %block.output, %error, "block content unavailable");
                    errors.push(BlockError::ResourceFetch {
                        kind: handler.kind.to_string(),
                        target: Some(block.output.to_string()),
                        url: error.url,
                        message: error.message,
                    });
                    continue;
                }
            };
            let request = RenderRequest {
                content: &content,
                hints: &block.hints,
                files: &files,
                output: &block.output,
                index: block.index,
            };
            match engine.render(request).await {
                Ok(rendered) => {
                    results.insert_rendered(block.output.clone(), &rendered);
                    removals.push(Edit::remove(element));
                }
                Err(error) => {
                    tracing::warn!(kind = %handler.kind, target = %block.output, %error, "block failed to render");
                    errors.push(BlockError::Render {
                        kind: handler.kind.to_string(),
                        target: block.output.to_string(),
                        message: error.message,
                    });
                }
            }
        }

        // Target edits go first so they win over a marker nested inside one.
        let mut edits = Vec::new();
        match emit {
            Emit::Substitute => edits.extend(cache::display_all(&elements, &results)),
            Emit::Serialize if !results.is_empty() => {
                let mut merged = ArtifactCache::new();
                for existing in elements
                    .iter()
                    .filter(|el| el.is_script_of_type(CACHE_MARKER_TYPE))
                {
                    // Unreadable markers stay for the restore pass to report.
                    if let Ok(parsed) = ArtifactCache::parse(existing.inner(&doc)) {
                        merged.extend(parsed);
                        removals.push(Edit::remove(existing));
                    }
                }
                merged.extend(results);
                edits.push(Edit::insert(doc.len(), merged.to_marker()));
            }
            Emit::Serialize => {}
        }
        edits.extend(removals);

        Ok(PassOutput {
            text: document::apply(&doc, edits),
            errors,
        })
    }
}

/// Input files for a kind that takes them. Files that can't be fetched are
/// left out and reported.
async fn input_files(
    elements: &[Element],
    doc: &str,
    marker: Option<&str>,
    kind: &GraphKind,
    fetcher: &dyn ResourceFetcher,
) -> (Vec<InputFile>, Vec<BlockError>) {
    let Some(marker) = marker else {
        return (Vec::new(), Vec::new());
    };
    let pending = elements
        .iter()
        .filter(|el| el.is_script_of_type(marker))
        .map(|el| PendingInputFile::from_marker(el, doc));
    let resolved = join_all(pending.map(|file| file.resolve(fetcher))).await;

    let mut files = Vec::with_capacity(resolved.len());
    let mut errors = Vec::new();
    for file in resolved {
        match file {
            Ok(file) => files.push(file),
            Err(error) => {
                tracing::warn!(%kind, %error, "input file unavailable");
                errors.push(BlockError::ResourceFetch {
                    kind: kind.to_string(),
                    target: None,
                    url: error.url,
                    message: error.message,
                });
            }
        }
    }
    (files, errors)
}
