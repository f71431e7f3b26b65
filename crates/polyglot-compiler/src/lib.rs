//! Language registry and multi-stage compilation pipeline.
//!
//! A [`CompilerHost`] resolves a language through the [`LanguageRegistry`],
//! builds its compiler on first use (loading engines lazily through the
//! [`EngineLoader`]), runs the primary pass inline or in an isolated worker,
//! then any secondary pass in the calling context. Diagram-bearing HTML
//! documents go through the [`graph`] pipeline.

pub mod compiler;
pub mod engines;
pub mod error;
pub mod graph;
pub mod languages;
pub mod loader;
pub mod registry;

pub use compiler::{
    CompileOutput, CompileRequest, Compiled, Compiler, CompilerFactory, CompilerHost,
    ExecutionContext, Fallback, InvocationContext, IsolatedWorker, Recovered, SecondaryPass,
};
pub use engines::{GraphEngine, Module, Rendered, TransformEngine};
pub use error::{BlockError, CompileError, EngineLoadError, RegistryError};
pub use graph::{GraphHandler, GraphKind, GraphPipeline};
pub use loader::{EngineHandle, EngineLoader, ModuleSource};
pub use registry::{EditorId, LanguageRegistry, LanguageSpec};
