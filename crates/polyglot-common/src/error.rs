//! Error types shared by the polyglot crates.

use miette::Diagnostic;
use std::path::PathBuf;

/// Failure to read or write a configuration file.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum ConfigError {
    /// The file extension doesn't name a format we know how to parse.
    #[error("unsupported config format for {}", path.display())]
    #[diagnostic(
        code(polyglot::config::unsupported_format),
        help("use a .json or .toml file")
    )]
    UnsupportedFormat { path: PathBuf },

    #[error(transparent)]
    #[diagnostic(code(polyglot::config::io))]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    #[diagnostic(code(polyglot::config::json))]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(code(polyglot::config::toml_read))]
    TomlRead(#[from] toml::de::Error),

    #[error(transparent)]
    #[diagnostic(code(polyglot::config::toml_write))]
    TomlWrite(#[from] toml::ser::Error),
}

/// Failure to retrieve an external resource.
///
/// Carries only strings so it can be cloned into every waiter and sent
/// across the worker boundary.
#[derive(thiserror::Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
#[error("failed to fetch {url}: {message}")]
#[diagnostic(code(polyglot::fetch))]
pub struct FetchError {
    pub url: String,
    pub message: String,
    /// HTTP status when the server answered with an error code.
    pub status: Option<u16>,
}

impl FetchError {
    pub fn new(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}
