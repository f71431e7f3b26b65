//! Engine capabilities and the in-process engines shipped with the crate.
//!
//! A loaded engine is a [`Module`]: a tagged set of capabilities rather than
//! a type hierarchy. Compilers ask for the capability they need and get an
//! [`EngineLoadError::Capability`](crate::error::EngineLoadError) if the
//! module at that URL provides something else.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::SourceLocation;

#[cfg(feature = "native-engines")]
mod gnuplot;
#[cfg(feature = "native-engines")]
mod graphviz;
#[cfg(feature = "native-engines")]
mod markdown;
#[cfg(feature = "native-engines")]
mod mermaid;

#[cfg(feature = "native-engines")]
pub use gnuplot::GnuplotEngine;
#[cfg(feature = "native-engines")]
pub use graphviz::GraphvizEngine;
#[cfg(feature = "native-engines")]
pub use markdown::MarkdownEngine;
#[cfg(feature = "native-engines")]
pub use mermaid::MermaidEngine;

pub const MARKED_URL: &str = "https://cdn.jsdelivr.net/npm/marked@4.0.10/marked.min.js";
pub const MERMAID_URL: &str = "https://cdn.jsdelivr.net/npm/mermaid@8.13.8/dist/mermaid.min.js";
pub const GRAPHVIZ_URL: &str = "https://cdn.jsdelivr.net/npm/@hpcc-js/wasm/dist/index.min.js";
/// Relative to the configured vendors base URL.
pub const GNUPLOT_URL: &str = "gnuplot/gnuplot_api.js";
/// Relative to the configured vendors base URL.
pub const MDX_URL: &str = "mdx/mdx.js";
pub const TYPESCRIPT_URL: &str = "https://cdn.jsdelivr.net/npm/typescript@4.5.4/lib/typescript.min.js";
pub const SASS_URL: &str = "https://cdn.jsdelivr.net/npm/sass.js@0.11.1/dist/sass.sync.js";

/// Options passed through to graph engines, keyed by the `data-*` attribute
/// name without its prefix (`data-layout` becomes `layout`).
pub type Hints = BTreeMap<SmolStr, String>;

/// A loaded engine.
#[derive(Clone)]
pub enum Module {
    /// Turns source text into text of another language.
    Transform(Arc<dyn TransformEngine>),
    /// Renders diagram sources for the embedded sub-renderer pipeline.
    Graph(Arc<dyn GraphEngine>),
    /// Raw script text, for engines evaluated by the page rather than by us.
    Script(Arc<str>),
}

impl Module {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Module::Transform(_) => "transform",
            Module::Graph(_) => "graph",
            Module::Script(_) => "script",
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Module::Script(text) => write!(f, "Module::Script({} bytes)", text.len()),
            other => write!(f, "Module::{}", other.kind_name()),
        }
    }
}

/// Error raised by an engine while processing input it was given.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.location = Some(SourceLocation { line, column });
        self
    }
}

/// Source-to-source compiler capability.
pub trait TransformEngine: Send + Sync {
    fn transform<'a>(
        &'a self,
        source: &'a str,
        options: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<String, EngineError>>;
}

/// Auxiliary data file supplied to a graph engine alongside the script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    pub name: SmolStr,
    pub content: String,
}

/// One block handed to a graph engine.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub content: &'a str,
    pub hints: &'a Hints,
    pub files: &'a [InputFile],
    /// Target reference the result will be displayed under.
    pub output: &'a str,
    /// Position of the block among the blocks of its kind, starting at 1.
    pub index: usize,
}

/// What a graph engine produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    /// SVG or HTML markup.
    Markup(String),
    /// A complete `data:` URI, for raster output.
    DataUri(String),
}

/// Diagram rendering capability.
pub trait GraphEngine: Send + Sync {
    fn render<'a>(&'a self, request: RenderRequest<'a>) -> BoxFuture<'a, Result<Rendered, EngineError>>;
}

/// Engines we can run in-process, keyed by the URL the language table
/// refers to them by. Anything else is fetched as a script module.
#[cfg(feature = "native-engines")]
pub fn builtin_modules(
    config: &polyglot_common::Config,
    fetcher: Arc<dyn polyglot_common::ResourceFetcher>,
) -> crate::loader::NativeModules {
    use crate::loader::{NativeModules, ScriptModules, resolve_engine_url};

    let base = config.vendors_base_url.as_str();
    NativeModules::new()
        .with_module(
            resolve_engine_url(base, MARKED_URL),
            Module::Transform(Arc::new(MarkdownEngine)),
        )
        .with_module(
            resolve_engine_url(base, MERMAID_URL),
            Module::Graph(Arc::new(MermaidEngine)),
        )
        .with_init(resolve_engine_url(base, GRAPHVIZ_URL), || async {
            GraphvizEngine::locate().map(|engine| Module::Graph(Arc::new(engine)))
        })
        .with_init(resolve_engine_url(base, GNUPLOT_URL), || async {
            GnuplotEngine::locate().map(|engine| Module::Graph(Arc::new(engine)))
        })
        .with_fallback(Arc::new(ScriptModules::new(fetcher)))
}
