//! Running a language's compiler: factory, primary pass, optional
//! secondary pass, and the error and fallback policy around them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use polyglot_common::perf::TimingGuard;
use polyglot_common::{Config, ResourceFetcher};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tokio::sync::OnceCell;

use crate::error::{BlockError, CompileError};
use crate::graph::PassContext;
use crate::loader::EngineLoader;
use crate::registry::{LanguageRegistry, LanguageSpec};

/// Output of a single pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compiled {
    pub code: String,
    /// Per-block failures the pass recovered from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<BlockError>,
}

impl Compiled {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<BlockError>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// The primary text-to-text function produced by a factory.
pub trait Compiler: Send + Sync {
    fn compile<'a>(
        &'a self,
        source: &'a str,
        cx: &'a InvocationContext<'a>,
    ) -> BoxFuture<'a, Result<Compiled, CompileError>>;
}

/// Builds a language's [`Compiler`], loading whatever engines it needs.
pub trait CompilerFactory: Send + Sync {
    fn create<'a>(
        &'a self,
        cx: &'a InvocationContext<'a>,
    ) -> BoxFuture<'a, Result<Arc<dyn Compiler>, CompileError>>;
}

/// Post-processing that has to happen in the main context. Its only input
/// is the text the primary pass produced.
pub trait SecondaryPass: Send + Sync {
    fn run<'a>(
        &'a self,
        code: String,
        cx: &'a InvocationContext<'a>,
    ) -> BoxFuture<'a, Result<Compiled, CompileError>>;
}

/// An isolated context primary passes can be sent to.
///
/// Only text and configuration cross the boundary.
pub trait IsolatedWorker: Send + Sync {
    fn compile<'a>(
        &'a self,
        language: &'a str,
        source: &'a str,
        config: &'a Config,
    ) -> BoxFuture<'a, Result<Compiled, CompileError>>;
}

/// Whether an isolated worker is available to this request.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    worker: Option<Arc<dyn IsolatedWorker>>,
}

impl ExecutionContext {
    /// Everything runs inline.
    pub fn main() -> Self {
        Self::default()
    }

    pub fn with_worker(worker: Arc<dyn IsolatedWorker>) -> Self {
        Self {
            worker: Some(worker),
        }
    }

    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    pub fn worker(&self) -> Option<&dyn IsolatedWorker> {
        self.worker.as_deref()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("worker", &self.has_worker())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub source: String,
    pub language: SmolStr,
    pub config: Config,
    pub context: ExecutionContext,
}

impl CompileRequest {
    pub fn new(language: impl Into<SmolStr>, source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            language: language.into(),
            config: Config::default(),
            context: ExecutionContext::main(),
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }
}

/// Everything a compiler can see while it runs.
#[derive(Clone, Copy)]
pub struct InvocationContext<'a> {
    pub host: &'a CompilerHost,
    pub language: &'a LanguageSpec,
    pub config: &'a Config,
    pub worker: Option<&'a dyn IsolatedWorker>,
}

impl<'a> InvocationContext<'a> {
    pub fn loader(&self) -> &'a EngineLoader {
        self.host.loader()
    }

    pub fn fetcher(&self) -> &'a dyn ResourceFetcher {
        self.host.fetcher()
    }

    pub fn pass_context(&self) -> PassContext<'a> {
        PassContext::new(self.loader(), self.fetcher())
    }

    /// Custom settings for the language being compiled.
    pub fn settings(&self) -> serde_json::Value {
        self.config.language_settings(&self.language.name)
    }

    /// Run another language's primary pass from inside this one, through
    /// the worker when there is one.
    pub async fn compile_in_compiler(
        &self,
        source: &str,
        language: &str,
    ) -> Result<Compiled, CompileError> {
        let spec = self.host.registry().resolve(language)?;
        if source.is_empty() {
            return Ok(Compiled::default());
        }
        match self.worker {
            Some(worker) => worker.compile(&spec.name, source, self.config).await,
            None => {
                let nested = InvocationContext {
                    language: spec,
                    ..*self
                };
                self.host.run_primary(source, &nested).await
            }
        }
    }
}

/// Final result of a compile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompileOutput {
    pub code: String,
    pub compiled_language: SmolStr,
    pub imports: BTreeMap<SmolStr, String>,
    pub scripts: Vec<String>,
    pub block_errors: Vec<BlockError>,
}

impl CompileOutput {
    fn for_spec(spec: &LanguageSpec, compiled: Compiled) -> Self {
        Self {
            code: compiled.code,
            compiled_language: spec.output_language(),
            imports: spec.compiler.imports.clone(),
            scripts: spec.compiler.scripts.clone(),
            block_errors: compiled.warnings,
        }
    }
}

/// What a caller gets instead of output when a compile fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Fallback {
    /// Empty output.
    #[default]
    Empty,
    /// The last successful output for the language, or empty if none.
    LastGood,
    /// A comment describing the failure, in the output language.
    ErrorMarker,
}

/// A compile that never fails outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovered {
    pub output: CompileOutput,
    pub error: Option<CompileError>,
}

/// Compiles sources by language.
pub struct CompilerHost {
    registry: LanguageRegistry,
    loader: Arc<EngineLoader>,
    fetcher: Arc<dyn ResourceFetcher>,
    compilers: DashMap<SmolStr, Arc<OnceCell<Arc<dyn Compiler>>>>,
    last_good: DashMap<SmolStr, CompileOutput>,
}

impl CompilerHost {
    pub fn new(
        registry: LanguageRegistry,
        loader: Arc<EngineLoader>,
        fetcher: Arc<dyn ResourceFetcher>,
    ) -> Self {
        Self {
            registry,
            loader,
            fetcher,
            compilers: DashMap::new(),
            last_good: DashMap::new(),
        }
    }

    /// Built-in languages and engines, fetching over HTTP.
    #[cfg(feature = "native-engines")]
    pub fn builtin(config: &Config) -> Self {
        let fetcher: Arc<dyn ResourceFetcher> = Arc::new(polyglot_common::HttpFetcher::default());
        Self::builtin_with_fetcher(config, fetcher)
    }

    #[cfg(feature = "native-engines")]
    pub fn builtin_with_fetcher(config: &Config, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        let modules = crate::engines::builtin_modules(config, fetcher.clone());
        let loader =
            EngineLoader::new(Arc::new(modules)).with_base_url(config.vendors_base_url.clone());
        Self::new(LanguageRegistry::builtin(), Arc::new(loader), fetcher)
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn loader(&self) -> &EngineLoader {
        &self.loader
    }

    pub fn fetcher(&self) -> &dyn ResourceFetcher {
        self.fetcher.as_ref()
    }

    /// Compile `request`: primary pass (in the worker when there is one),
    /// then the secondary pass in this context.
    pub async fn compile(&self, request: &CompileRequest) -> Result<CompileOutput, CompileError> {
        let spec = self.registry.resolve(&request.language)?;
        if request.source.is_empty() {
            return Ok(CompileOutput::for_spec(spec, Compiled::default()));
        }

        let timing = TimingGuard::new("compile");
        let cx = InvocationContext {
            host: self,
            language: spec,
            config: &request.config,
            worker: request.context.worker(),
        };
        let primary = match cx.worker {
            Some(worker) => {
                tracing::debug!(language = %spec.name, "compiling in worker");
                worker.compile(&spec.name, &request.source, &request.config).await?
            }
            None => self.run_primary(&request.source, &cx).await?,
        };

        let compiled = match &spec.compiler.secondary {
            Some(pass) => {
                let mut warnings = primary.warnings;
                let secondary = pass.run(primary.code, &cx).await?;
                warnings.extend(secondary.warnings);
                Compiled {
                    code: secondary.code,
                    warnings,
                }
            }
            None => primary,
        };

        let output = CompileOutput::for_spec(spec, compiled);
        tracing::info!(
            language = %spec.name,
            bytes = output.code.len(),
            block_errors = output.block_errors.len(),
            elapsed_ms = timing.elapsed(),
            "compiled"
        );
        self.last_good.insert(spec.name.clone(), output.clone());
        Ok(output)
    }

    /// [`compile`](Self::compile), substituting `fallback` on failure.
    pub async fn compile_or_recover(&self, request: &CompileRequest, fallback: Fallback) -> Recovered {
        match self.compile(request).await {
            Ok(output) => Recovered {
                output,
                error: None,
            },
            Err(error) => {
                tracing::warn!(language = %request.language, %error, retryable = error.is_retryable(), "compile failed");
                Recovered {
                    output: self.fallback_output(&request.language, fallback, &error),
                    error: Some(error),
                }
            }
        }
    }

    fn fallback_output(&self, language: &str, fallback: Fallback, error: &CompileError) -> CompileOutput {
        let empty = match self.registry.resolve(language) {
            Ok(spec) => CompileOutput::for_spec(spec, Compiled::default()),
            Err(_) => CompileOutput {
                compiled_language: SmolStr::new(language),
                ..CompileOutput::default()
            },
        };
        match fallback {
            Fallback::Empty => empty,
            Fallback::LastGood => self
                .last_good
                .get(language)
                .map(|output| output.clone())
                .unwrap_or(empty),
            Fallback::ErrorMarker => CompileOutput {
                code: error_marker(&empty.compiled_language, error),
                ..empty
            },
        }
    }

    /// Primary pass only, in this context. This is what the worker runs.
    pub async fn compile_primary(
        &self,
        language: &str,
        source: &str,
        config: &Config,
    ) -> Result<Compiled, CompileError> {
        let spec = self.registry.resolve(language)?;
        if source.is_empty() {
            return Ok(Compiled::default());
        }
        let cx = InvocationContext {
            host: self,
            language: spec,
            config,
            worker: None,
        };
        self.run_primary(source, &cx).await
    }

    pub(crate) async fn run_primary(
        &self,
        source: &str,
        cx: &InvocationContext<'_>,
    ) -> Result<Compiled, CompileError> {
        let compiler = self.compiler_for(cx).await?;
        compiler.compile(source, cx).await
    }

    /// The language's compiler, created on first use. A failed factory
    /// leaves nothing behind, so the next call tries again.
    async fn compiler_for(&self, cx: &InvocationContext<'_>) -> Result<Arc<dyn Compiler>, CompileError> {
        let cell = self
            .compilers
            .entry(cx.language.name.clone())
            .or_default()
            .clone();
        cell.get_or_try_init(|| cx.language.compiler.factory.create(cx))
            .await
            .cloned()
    }
}

impl fmt::Debug for CompilerHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerHost")
            .field("languages", &self.registry.len())
            .field("loader", &self.loader)
            .field("compilers", &self.compilers.len())
            .finish()
    }
}

/// A comment describing `error` in `language`'s comment syntax.
pub fn error_marker(language: &str, error: &CompileError) -> String {
    let message = error.to_string();
    match language {
        "css" | "scss" | "javascript" | "typescript" | "jsx" | "tsx" => {
            format!("/* {} */", message.replace("*/", "* /"))
        }
        _ => format!("<!-- {} -->", message.replace("--", "- -")),
    }
}
