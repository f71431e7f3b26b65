use futures_util::future::BoxFuture;

use super::{EngineError, GraphEngine, RenderRequest, Rendered};

/// Renders mermaid diagrams to SVG in-process.
#[derive(Debug, Clone, Copy, Default)]
pub struct MermaidEngine;

impl GraphEngine for MermaidEngine {
    fn render<'a>(&'a self, request: RenderRequest<'a>) -> BoxFuture<'a, Result<Rendered, EngineError>> {
        Box::pin(async move {
            let source = request.content.trim();
            if source.is_empty() {
                return Err(EngineError::new("empty mermaid diagram"));
            }
            let opts = mermaid_rs_renderer::RenderOptions {
                theme: mermaid_rs_renderer::Theme::modern(),
                layout: mermaid_rs_renderer::LayoutConfig::default(),
            };
            let svg = mermaid_rs_renderer::render_with_options(source, opts)
                .map_err(|e| EngineError::new(e.to_string()))?;
            tracing::trace!(output = request.output, bytes = svg.len(), "mermaid rendered");
            Ok(Rendered::Markup(svg))
        })
    }
}
