//! The built-in language table.

mod escape;
mod graph;
mod markup;
mod mdx;
mod script;
mod style;
mod vue;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use smol_str::SmolStr;

use crate::compiler::{Compiled, Compiler, CompilerFactory, InvocationContext};
use crate::engines::TransformEngine;
use crate::error::CompileError;

pub use self::escape::escape_code;
pub use self::graph::{GraphCompiler, GraphSecondary, graph_language};
pub use self::mdx::MdxSecondary;

/// Formatter grammar plugins.
pub(crate) mod parser_plugins {
    pub const HTML: &str = "https://cdn.jsdelivr.net/npm/prettier@2.3.2/parser-html.js";
    pub const MARKDOWN: &str = "https://cdn.jsdelivr.net/npm/prettier@2.3.2/parser-markdown.js";
    pub const POSTCSS: &str = "https://cdn.jsdelivr.net/npm/prettier@2.3.2/parser-postcss.js";
    pub const BABEL: &str = "https://cdn.jsdelivr.net/npm/prettier@2.3.2/parser-babel.js";
    pub const TYPESCRIPT: &str = "https://cdn.jsdelivr.net/npm/prettier@2.3.2/parser-typescript.js";
}

/// Every built-in language, in the order they're listed to users.
pub fn builtin() -> Vec<crate::registry::LanguageSpec> {
    vec![
        markup::html(),
        markup::markdown(),
        markup::richtext(),
        mdx::mdx(),
        graph::graph(),
        style::css(),
        style::scss(),
        script::javascript(),
        script::typescript(),
        script::jsx(),
        script::tsx(),
        vue::vue2(),
    ]
}

/// Compiler for languages that are already in their output form.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityFactory;

struct Identity;

impl Compiler for Identity {
    fn compile<'a>(
        &'a self,
        source: &'a str,
        _cx: &'a InvocationContext<'a>,
    ) -> BoxFuture<'a, Result<Compiled, CompileError>> {
        Box::pin(async move { Ok(Compiled::new(source)) })
    }
}

impl CompilerFactory for IdentityFactory {
    fn create<'a>(
        &'a self,
        _cx: &'a InvocationContext<'a>,
    ) -> BoxFuture<'a, Result<Arc<dyn Compiler>, CompileError>> {
        Box::pin(async move { Ok(Arc::new(Identity) as Arc<dyn Compiler>) })
    }
}

/// Compiler backed by a transform engine loaded from `url`.
#[derive(Debug, Clone)]
pub struct TransformFactory {
    url: SmolStr,
    global: Option<SmolStr>,
    defaults: serde_json::Value,
}

impl TransformFactory {
    pub fn new(url: impl Into<SmolStr>) -> Self {
        Self {
            url: url.into(),
            global: None,
            defaults: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_global(mut self, name: impl Into<SmolStr>) -> Self {
        self.global = Some(name.into());
        self
    }

    /// Engine options the language's custom settings are layered over.
    pub fn with_defaults(mut self, defaults: serde_json::Value) -> Self {
        self.defaults = defaults;
        self
    }
}

impl CompilerFactory for TransformFactory {
    fn create<'a>(
        &'a self,
        cx: &'a InvocationContext<'a>,
    ) -> BoxFuture<'a, Result<Arc<dyn Compiler>, CompileError>> {
        Box::pin(async move {
            let language = cx.language.name.as_str();
            let handle = match &self.global {
                Some(name) => cx.loader().load_global(&self.url, name).await,
                None => cx.loader().load(&self.url).await,
            }
            .map_err(|e| CompileError::engine(language, e))?;
            let engine = handle
                .transform()
                .map_err(|e| CompileError::engine(language, e))?;
            Ok(Arc::new(TransformCompiler {
                engine,
                defaults: self.defaults.clone(),
            }) as Arc<dyn Compiler>)
        })
    }
}

struct TransformCompiler {
    engine: Arc<dyn TransformEngine>,
    defaults: serde_json::Value,
}

impl Compiler for TransformCompiler {
    fn compile<'a>(
        &'a self,
        source: &'a str,
        cx: &'a InvocationContext<'a>,
    ) -> BoxFuture<'a, Result<Compiled, CompileError>> {
        Box::pin(async move {
            let options = merge_settings(&self.defaults, cx.settings());
            self.engine
                .transform(source, &options)
                .await
                .map(Compiled::new)
                .map_err(|e| CompileError::Compile {
                    language: cx.language.name.to_string(),
                    message: e.message,
                    location: e.location,
                })
        })
    }
}

/// `settings` laid over `defaults`, one level deep.
pub(crate) fn merge_settings(
    defaults: &serde_json::Value,
    settings: serde_json::Value,
) -> serde_json::Value {
    match (defaults, settings) {
        (serde_json::Value::Object(defaults), serde_json::Value::Object(settings)) => {
            let mut merged = defaults.clone();
            merged.extend(settings);
            serde_json::Value::Object(merged)
        }
        (defaults, serde_json::Value::Null) => defaults.clone(),
        (_, settings) => settings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_override_defaults() {
        let merged = merge_settings(
            &json!({ "jsx": "react", "target": "es2015" }),
            json!({ "target": "es2020" }),
        );
        assert_eq!(merged, json!({ "jsx": "react", "target": "es2020" }));
        assert_eq!(merge_settings(&json!({ "a": 1 }), json!(null)), json!({ "a": 1 }));
    }

    #[test]
    fn builtin_table_covers_the_playground_languages() {
        let names: Vec<_> = builtin().into_iter().map(|spec| spec.name).collect();
        for expected in [
            "html", "markdown", "richtext", "mdx", "graph", "css", "scss", "javascript",
            "typescript", "jsx", "tsx", "vue2",
        ] {
            assert!(names.iter().any(|name| name == expected), "{expected} missing");
        }
    }
}
