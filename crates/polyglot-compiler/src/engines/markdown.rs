use futures_util::future::BoxFuture;
use pulldown_cmark::{Options, Parser, html};

use super::{EngineError, TransformEngine};

/// CommonMark to HTML, with the GitHub flavoured extensions switched on
/// unless `gfm: false` is passed in the language settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownEngine;

impl MarkdownEngine {
    fn options(settings: &serde_json::Value) -> Options {
        let gfm = settings
            .get("gfm")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true);
        let mut options = Options::empty();
        if gfm {
            options.insert(Options::ENABLE_TABLES);
            options.insert(Options::ENABLE_STRIKETHROUGH);
            options.insert(Options::ENABLE_TASKLISTS);
            options.insert(Options::ENABLE_FOOTNOTES);
        }
        options
    }

    pub fn render(source: &str, settings: &serde_json::Value) -> String {
        let parser = Parser::new_ext(source, Self::options(settings));
        let mut out = String::with_capacity(source.len() * 3 / 2);
        html::push_html(&mut out, parser);
        out
    }
}

impl TransformEngine for MarkdownEngine {
    fn transform<'a>(
        &'a self,
        source: &'a str,
        options: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<String, EngineError>> {
        Box::pin(async move { Ok(Self::render(source, options)) })
    }
}
