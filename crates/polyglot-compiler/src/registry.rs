//! Language identifiers and file extensions to [`LanguageSpec`]s.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::compiler::{CompilerFactory, SecondaryPass};
use crate::error::{CompileError, RegistryError};

/// Which authoring surface a language is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditorId {
    Markup,
    Style,
    Script,
}

impl EditorId {
    /// What a language on this surface compiles to unless it says otherwise.
    pub fn default_output(self) -> &'static str {
        match self {
            EditorId::Markup => "html",
            EditorId::Style => "css",
            EditorId::Script => "javascript",
        }
    }
}

impl fmt::Display for EditorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EditorId::Markup => "markup",
            EditorId::Style => "style",
            EditorId::Script => "script",
        })
    }
}

/// Formatter grammar for a language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserSpec {
    pub name: SmolStr,
    pub plugin_urls: Vec<String>,
}

impl ParserSpec {
    pub fn new(name: impl Into<SmolStr>, plugin_urls: &[&str]) -> Self {
        Self {
            name: name.into(),
            plugin_urls: plugin_urls.iter().map(|url| (*url).to_owned()).collect(),
        }
    }
}

#[derive(Clone)]
pub struct CompilerSpec {
    pub factory: Arc<dyn CompilerFactory>,
    pub secondary: Option<Arc<dyn SecondaryPass>>,
    pub compiled_language: Option<SmolStr>,
    /// Bare import specifier to URL, for the page's import map.
    pub imports: BTreeMap<SmolStr, String>,
    /// Scripts the compiled output expects on the page.
    pub scripts: Vec<String>,
}

impl CompilerSpec {
    pub fn new(factory: Arc<dyn CompilerFactory>) -> Self {
        Self {
            factory,
            secondary: None,
            compiled_language: None,
            imports: BTreeMap::new(),
            scripts: Vec::new(),
        }
    }

    pub fn with_secondary(mut self, pass: Arc<dyn SecondaryPass>) -> Self {
        self.secondary = Some(pass);
        self
    }

    pub fn compiles_to(mut self, language: impl Into<SmolStr>) -> Self {
        self.compiled_language = Some(language.into());
        self
    }

    pub fn with_import(mut self, specifier: impl Into<SmolStr>, url: impl Into<String>) -> Self {
        self.imports.insert(specifier.into(), url.into());
        self
    }

    pub fn with_scripts(mut self, scripts: &[&str]) -> Self {
        self.scripts = scripts.iter().map(|url| (*url).to_owned()).collect();
        self
    }
}

impl fmt::Debug for CompilerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerSpec")
            .field("secondary", &self.secondary.is_some())
            .field("compiled_language", &self.compiled_language)
            .field("imports", &self.imports)
            .field("scripts", &self.scripts)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct LanguageSpec {
    pub name: SmolStr,
    pub title: SmolStr,
    pub long_title: Option<SmolStr>,
    pub parser: ParserSpec,
    pub compiler: CompilerSpec,
    pub extensions: Vec<SmolStr>,
    pub editor: EditorId,
    /// Highlighting grammar; defaults to the language's own name.
    pub editor_language: Option<SmolStr>,
}

impl LanguageSpec {
    pub fn output_language(&self) -> SmolStr {
        self.compiler
            .compiled_language
            .clone()
            .unwrap_or_else(|| SmolStr::new_static(self.editor.default_output()))
    }
}

fn normalize_extension(extension: &str) -> SmolStr {
    SmolStr::new(extension.trim_start_matches('.').to_ascii_lowercase())
}

/// Registered languages in registration order.
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    specs: Vec<LanguageSpec>,
    by_name: HashMap<SmolStr, usize>,
    by_extension: HashMap<SmolStr, usize>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in language table.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for spec in crate::languages::builtin() {
            if let Err(error) = registry.register(spec) {
                tracing::error!(%error, "skipping built-in language");
            }
        }
        registry
    }

    /// Add a language. Names and extensions must not collide with anything
    /// already registered; on error nothing is added.
    pub fn register(&mut self, spec: LanguageSpec) -> Result<(), RegistryError> {
        if self.by_name.contains_key(&spec.name) {
            return Err(RegistryError::DuplicateName {
                name: spec.name.to_string(),
            });
        }
        let mut extensions: Vec<SmolStr> = Vec::with_capacity(spec.extensions.len());
        for extension in spec.extensions.iter().map(|ext| normalize_extension(ext)) {
            if let Some(&existing) = self.by_extension.get(&extension) {
                return Err(RegistryError::DuplicateExtension {
                    extension: extension.to_string(),
                    existing: self.specs[existing].name.to_string(),
                    name: spec.name.to_string(),
                });
            }
            if !extensions.contains(&extension) {
                extensions.push(extension);
            }
        }

        let index = self.specs.len();
        self.by_name.insert(spec.name.clone(), index);
        for extension in extensions {
            self.by_extension.insert(extension, index);
        }
        tracing::trace!(language = %spec.name, "registered language");
        self.specs.push(spec);
        Ok(())
    }

    pub fn resolve(&self, language: &str) -> Result<&LanguageSpec, CompileError> {
        self.by_name
            .get(language)
            .map(|&index| &self.specs[index])
            .ok_or_else(|| CompileError::UnsupportedLanguage {
                language: language.to_owned(),
            })
    }

    /// Leading dot optional, case-insensitive.
    pub fn resolve_by_extension(&self, extension: &str) -> Result<&LanguageSpec, CompileError> {
        self.by_extension
            .get(&normalize_extension(extension))
            .map(|&index| &self.specs[index])
            .ok_or_else(|| CompileError::UnsupportedLanguage {
                language: format!(".{}", extension.trim_start_matches('.')),
            })
    }

    pub fn resolve_path(&self, path: impl AsRef<Path>) -> Result<&LanguageSpec, CompileError> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(extension) => self.resolve_by_extension(extension),
            None => Err(CompileError::UnsupportedLanguage {
                language: path.display().to_string(),
            }),
        }
    }

    pub fn contains(&self, language: &str) -> bool {
        self.by_name.contains_key(language)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LanguageSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
