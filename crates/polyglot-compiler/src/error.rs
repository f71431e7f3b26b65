use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Line/column in the compiled source, both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

/// Failure to bring an engine module into the current execution context.
///
/// Never cached by the loader; a later request retries.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic, Serialize, Deserialize)]
pub enum EngineLoadError {
    #[error("no module source provides {url}")]
    #[diagnostic(code(polyglot::engine::not_found))]
    NotFound { url: String },

    #[error("failed to fetch engine {url}: {message}")]
    #[diagnostic(code(polyglot::engine::fetch))]
    Fetch { url: String, message: String },

    #[error("engine {url} is unavailable: {message}")]
    #[diagnostic(code(polyglot::engine::unavailable))]
    Unavailable { url: String, message: String },

    #[error("engine {url} provides a {found} module, expected {expected}")]
    #[diagnostic(
        code(polyglot::engine::capability),
        help("register a native engine for this URL")
    )]
    Capability {
        url: String,
        expected: String,
        found: String,
    },
}

impl EngineLoadError {
    pub fn url(&self) -> &str {
        match self {
            EngineLoadError::NotFound { url }
            | EngineLoadError::Fetch { url, .. }
            | EngineLoadError::Unavailable { url, .. }
            | EngineLoadError::Capability { url, .. } => url,
        }
    }
}

/// Errors that abort a whole compile invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic, Serialize, Deserialize)]
pub enum CompileError {
    #[error("unsupported language: {language}")]
    #[diagnostic(
        code(polyglot::compile::unsupported_language),
        help("run `polyglot languages` to list the registered languages")
    )]
    UnsupportedLanguage { language: String },

    #[error("failed to load engine for {language}: {source}")]
    #[diagnostic(code(polyglot::compile::engine_load))]
    EngineLoad {
        language: String,
        #[source]
        source: EngineLoadError,
    },

    #[error("{language}: {message}")]
    #[diagnostic(code(polyglot::compile::failed))]
    Compile {
        language: String,
        message: String,
        location: Option<SourceLocation>,
    },

    #[error("compile worker failed: {message}")]
    #[diagnostic(code(polyglot::compile::worker))]
    Worker { message: String },
}

impl CompileError {
    pub fn compile(language: impl Into<String>, message: impl Into<String>) -> Self {
        CompileError::Compile {
            language: language.into(),
            message: message.into(),
            location: None,
        }
    }

    pub fn engine(language: impl Into<String>, source: EngineLoadError) -> Self {
        CompileError::EngineLoad {
            language: language.into(),
            source,
        }
    }

    /// Engine loads and worker round trips can succeed on a second attempt;
    /// everything else needs different input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CompileError::EngineLoad { .. } | CompileError::Worker { .. }
        )
    }

    /// Language the failure belongs to, if any.
    pub fn language(&self) -> Option<&str> {
        match self {
            CompileError::UnsupportedLanguage { language }
            | CompileError::EngineLoad { language, .. }
            | CompileError::Compile { language, .. } => Some(language),
            CompileError::Worker { .. } => None,
        }
    }
}

/// Failure scoped to a single embedded block. The block is left unrendered
/// and the pass carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic, Serialize, Deserialize)]
pub enum BlockError {
    #[error("{kind} block {}: failed to fetch {url}: {message}", target.as_deref().unwrap_or("(no target)"))]
    #[diagnostic(code(polyglot::graph::resource_fetch))]
    ResourceFetch {
        kind: String,
        target: Option<String>,
        url: String,
        message: String,
    },

    #[error("{kind} block {target}: {message}")]
    #[diagnostic(code(polyglot::graph::render))]
    Render {
        kind: String,
        target: String,
        message: String,
    },

    #[error("unreadable render cache: {message}")]
    #[diagnostic(code(polyglot::graph::invalid_cache))]
    InvalidCache { message: String },
}

/// Violations of the registry's uniqueness invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum RegistryError {
    #[error("language {name} is already registered")]
    #[diagnostic(code(polyglot::registry::duplicate_name))]
    DuplicateName { name: String },

    #[error("extension .{extension} already belongs to {existing}, cannot assign it to {name}")]
    #[diagnostic(code(polyglot::registry::duplicate_extension))]
    DuplicateExtension {
        extension: String,
        existing: String,
        name: String,
    },
}
