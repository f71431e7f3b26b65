use std::sync::Arc;

use futures_util::future::BoxFuture;

use super::parser_plugins;
use crate::compiler::{Compiled, Compiler, CompilerFactory, InvocationContext, SecondaryPass};
use crate::error::CompileError;
use crate::graph::GraphPipeline;
use crate::registry::{CompilerSpec, EditorId, LanguageSpec, ParserSpec};

/// Primary pass for `graph` documents: the isolated handlers, with their
/// results left in a cache marker.
#[derive(Debug, Clone, Default)]
pub struct GraphCompiler {
    pipeline: Arc<GraphPipeline>,
}

impl GraphCompiler {
    pub fn new(pipeline: Arc<GraphPipeline>) -> Self {
        Self { pipeline }
    }
}

impl Compiler for GraphCompiler {
    fn compile<'a>(
        &'a self,
        source: &'a str,
        cx: &'a InvocationContext<'a>,
    ) -> BoxFuture<'a, Result<Compiled, CompileError>> {
        Box::pin(async move {
            let output = self
                .pipeline
                .run_isolated(source, cx.pass_context())
                .await
                .map_err(|e| CompileError::engine(cx.language.name.as_str(), e))?;
            Ok(Compiled::new(output.text).with_warnings(output.errors))
        })
    }
}

impl CompilerFactory for GraphCompiler {
    fn create<'a>(
        &'a self,
        _cx: &'a InvocationContext<'a>,
    ) -> BoxFuture<'a, Result<Arc<dyn Compiler>, CompileError>> {
        Box::pin(async move { Ok(Arc::new(self.clone()) as Arc<dyn Compiler>) })
    }
}

/// Main-context pass for `graph` documents: restore, then the remaining
/// handlers substituting straight into the document.
#[derive(Debug, Clone, Default)]
pub struct GraphSecondary {
    pipeline: Arc<GraphPipeline>,
}

impl GraphSecondary {
    pub fn new(pipeline: Arc<GraphPipeline>) -> Self {
        Self { pipeline }
    }
}

impl SecondaryPass for GraphSecondary {
    fn run<'a>(
        &'a self,
        code: String,
        cx: &'a InvocationContext<'a>,
    ) -> BoxFuture<'a, Result<Compiled, CompileError>> {
        Box::pin(async move {
            let output = self
                .pipeline
                .run_main(&code, cx.pass_context())
                .await
                .map_err(|e| CompileError::engine(cx.language.name.as_str(), e))?;
            Ok(Compiled::new(output.text).with_warnings(output.errors))
        })
    }
}

/// A `graph` language over `pipeline`'s handlers.
pub fn graph_language(pipeline: GraphPipeline) -> LanguageSpec {
    let pipeline = Arc::new(pipeline);
    LanguageSpec {
        name: "graph".into(),
        title: "Graph".into(),
        long_title: None,
        parser: ParserSpec::new("html", &[parser_plugins::HTML]),
        compiler: CompilerSpec::new(Arc::new(GraphCompiler::new(pipeline.clone())))
            .with_secondary(Arc::new(GraphSecondary::new(pipeline)))
            .compiles_to("html"),
        extensions: vec!["graph".into(), "plt".into()],
        editor: EditorId::Markup,
        editor_language: Some("html".into()),
    }
}

pub(super) fn graph() -> LanguageSpec {
    graph_language(GraphPipeline::builtin())
}
