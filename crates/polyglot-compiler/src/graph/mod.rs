//! Embedded diagram rendering inside HTML documents.
//!
//! A document carries render requests as typed `<script>` markers:
//!
//! ```html
//! <script type="application/graph-graphviz" data-output="g1" data-layout="neato">
//!   digraph { a -> b }
//! </script>
//! <img data-src="g1">
//! ```
//!
//! Each [`GraphHandler`] owns one marker type. [`GraphPipeline`] restores any
//! serialised results first, then runs the handlers in their fixed order.

pub mod cache;
pub mod document;
mod pipeline;

use std::fmt;
use std::sync::Arc;

use polyglot_common::{FetchError, ResourceFetcher};
use smol_str::SmolStr;

use crate::engines::{self, GraphEngine, Hints, InputFile};
use crate::error::EngineLoadError;
use crate::loader::EngineLoader;

pub use self::cache::{ArtifactCache, CACHE_MARKER_TYPE, Restored};
pub use self::document::{Edit, Element};
pub use self::pipeline::{Emit, GraphPipeline, PassOutput};

pub const GNUPLOT_FILE_MARKER: &str = "application/graph-gnuplot-file";
pub const DEFAULT_INPUT_FILE_NAME: &str = "data.txt";

/// Sub-renderer kinds. Built-ins use `application/graph-<name>` markers;
/// custom kinds carry their marker type verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GraphKind {
    Gnuplot,
    Mermaid,
    Graphviz,
    Custom(SmolStr),
}

impl GraphKind {
    pub fn name(&self) -> &str {
        match self {
            GraphKind::Gnuplot => "gnuplot",
            GraphKind::Mermaid => "mermaid",
            GraphKind::Graphviz => "graphviz",
            GraphKind::Custom(marker) => marker,
        }
    }

    pub fn marker(&self) -> SmolStr {
        match self {
            GraphKind::Custom(marker) => marker.clone(),
            builtin => smol_str::format_smolstr!("application/graph-{}", builtin.name()),
        }
    }
}

impl fmt::Display for GraphKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a handler needs beyond plain rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerCaps {
    /// Runs in the isolated stage and emits a cache marker instead of
    /// touching display targets.
    pub isolated: bool,
    /// Marker type of auxiliary input files for this kind.
    pub input_files: Option<SmolStr>,
}

/// One entry of the dispatch table: a marker kind and the engine that
/// renders it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphHandler {
    pub kind: GraphKind,
    pub engine_url: SmolStr,
    /// Ambient name the engine is registered under, if it expects one.
    pub global: Option<SmolStr>,
    pub caps: HandlerCaps,
}

impl GraphHandler {
    pub fn new(kind: GraphKind, engine_url: impl Into<SmolStr>) -> Self {
        Self {
            kind,
            engine_url: engine_url.into(),
            global: None,
            caps: HandlerCaps::default(),
        }
    }

    pub fn with_global(mut self, name: impl Into<SmolStr>) -> Self {
        self.global = Some(name.into());
        self
    }

    pub fn isolated(mut self) -> Self {
        self.caps.isolated = true;
        self
    }

    pub fn with_input_files(mut self, marker: impl Into<SmolStr>) -> Self {
        self.caps.input_files = Some(marker.into());
        self
    }

    pub fn gnuplot() -> Self {
        Self::new(GraphKind::Gnuplot, engines::GNUPLOT_URL)
            .with_global("Gnuplot")
            .isolated()
            .with_input_files(GNUPLOT_FILE_MARKER)
    }

    pub fn mermaid() -> Self {
        Self::new(GraphKind::Mermaid, engines::MERMAID_URL).with_global("mermaid")
    }

    pub fn graphviz() -> Self {
        Self::new(GraphKind::Graphviz, engines::GRAPHVIZ_URL).with_global("@hpcc-js/wasm")
    }

    pub(crate) async fn engine(
        &self,
        loader: &EngineLoader,
    ) -> Result<Arc<dyn GraphEngine>, EngineLoadError> {
        let handle = match &self.global {
            Some(name) => loader.load_global(&self.engine_url, name).await?,
            None => loader.load(&self.engine_url).await?,
        };
        handle.graph()
    }
}

/// Where a block's content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockSource {
    Inline(String),
    External(String),
}

impl BlockSource {
    fn of(element: &Element, doc: &str) -> Self {
        match element.attr("src").map(str::trim) {
            Some(url) if !url.is_empty() => BlockSource::External(url.to_owned()),
            _ => BlockSource::Inline(element.inner(doc).to_owned()),
        }
    }

    pub async fn resolve(&self, fetcher: &dyn ResourceFetcher) -> Result<String, FetchError> {
        match self {
            BlockSource::Inline(text) => Ok(text.clone()),
            BlockSource::External(url) => fetcher.fetch_text(url).await,
        }
    }
}

/// A render request discovered in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedBlock {
    pub kind: GraphKind,
    /// Target reference from `data-output`.
    pub output: SmolStr,
    /// Remaining `data-*` attributes.
    pub hints: Hints,
    pub source: BlockSource,
    /// Position among the renderable blocks of this kind, from 1.
    pub index: usize,
}

impl EmbeddedBlock {
    /// `None` for markers without a target reference; those are left alone.
    fn from_marker(kind: &GraphKind, element: &Element, doc: &str, index: usize) -> Option<Self> {
        let output = element.attr("data-output").map(str::trim)?;
        if output.is_empty() {
            return None;
        }
        let hints = element
            .data_attrs()
            .filter(|(name, _)| !matches!(*name, "output" | "src"))
            .map(|(name, value)| (SmolStr::new(name), value.to_owned()))
            .collect();
        Some(Self {
            kind: kind.clone(),
            output: SmolStr::new(output),
            hints,
            source: BlockSource::of(element, doc),
            index,
        })
    }
}

/// Render requests of `kind` in `doc`, in document order.
pub fn discover(doc: &str, kind: &GraphKind) -> Vec<EmbeddedBlock> {
    let elements = document::scan(doc);
    blocks_in(&elements, doc, kind)
        .into_iter()
        .map(|(_, block)| block)
        .collect()
}

/// Renderable markers of `kind` among already scanned `elements`, each
/// paired with its block.
pub(crate) fn blocks_in<'e>(
    elements: &'e [Element],
    doc: &str,
    kind: &GraphKind,
) -> Vec<(&'e Element, EmbeddedBlock)> {
    let marker = kind.marker();
    let mut blocks = Vec::new();
    for element in elements.iter().filter(|el| el.is_script_of_type(&marker)) {
        if let Some(block) = EmbeddedBlock::from_marker(kind, element, doc, blocks.len() + 1) {
            blocks.push((element, block));
        }
    }
    blocks
}

/// Whether any script element in `doc` takes its content from a URL.
///
/// Rendering such a document depends on more than its text.
pub fn references_external(doc: &str) -> bool {
    document::scan(doc).iter().any(|element| {
        element.tag == "script" && element.attr("src").is_some_and(|src| !src.trim().is_empty())
    })
}

/// An input-file marker waiting for its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingInputFile {
    pub name: SmolStr,
    pub source: BlockSource,
}

impl PendingInputFile {
    pub(crate) fn from_marker(element: &Element, doc: &str) -> Self {
        let source = BlockSource::of(element, doc);
        let name = element
            .attr("data-file")
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .or_else(|| match &source {
                BlockSource::External(url) => url.rsplit('/').next().filter(|seg| !seg.is_empty()),
                BlockSource::Inline(_) => None,
            })
            .unwrap_or(DEFAULT_INPUT_FILE_NAME);
        Self {
            name: SmolStr::new(name),
            source,
        }
    }

    pub(crate) async fn resolve(self, fetcher: &dyn ResourceFetcher) -> Result<InputFile, FetchError> {
        let content = self.source.resolve(fetcher).await?;
        Ok(InputFile {
            name: self.name,
            content,
        })
    }
}

/// What a pass needs from its surroundings.
#[derive(Clone, Copy)]
pub struct PassContext<'a> {
    pub loader: &'a EngineLoader,
    pub fetcher: &'a dyn ResourceFetcher,
}

impl<'a> PassContext<'a> {
    pub fn new(loader: &'a EngineLoader, fetcher: &'a dyn ResourceFetcher) -> Self {
        Self { loader, fetcher }
    }
}
