use std::sync::Arc;

use serde_json::json;

use super::{IdentityFactory, TransformFactory, parser_plugins};
use crate::engines::MARKED_URL;
use crate::registry::{CompilerSpec, EditorId, LanguageSpec, ParserSpec};

pub(super) fn html() -> LanguageSpec {
    LanguageSpec {
        name: "html".into(),
        title: "HTML".into(),
        long_title: None,
        parser: ParserSpec::new("html", &[parser_plugins::HTML]),
        compiler: CompilerSpec::new(Arc::new(IdentityFactory)),
        extensions: vec!["html".into(), "htm".into()],
        editor: EditorId::Markup,
        editor_language: None,
    }
}

pub(super) fn markdown() -> LanguageSpec {
    let factory = TransformFactory::new(MARKED_URL)
        .with_global("marked")
        .with_defaults(json!({ "gfm": true }));
    LanguageSpec {
        name: "markdown".into(),
        title: "Markdown".into(),
        long_title: None,
        parser: ParserSpec::new("markdown", &[parser_plugins::MARKDOWN]),
        compiler: CompilerSpec::new(Arc::new(factory)).compiles_to("html"),
        extensions: vec!["md".into(), "markdown".into(), "mdown".into(), "mkdn".into()],
        editor: EditorId::Markup,
        editor_language: None,
    }
}

/// Authored in a rich text editor, stored and compiled as HTML.
pub(super) fn richtext() -> LanguageSpec {
    LanguageSpec {
        name: "richtext".into(),
        title: "Rich Text".into(),
        long_title: Some("Rich Text Editor".into()),
        parser: ParserSpec::new("html", &[parser_plugins::HTML]),
        compiler: CompilerSpec::new(Arc::new(IdentityFactory)).compiles_to("html"),
        extensions: vec!["rte".into(), "rich".into()],
        editor: EditorId::Markup,
        editor_language: Some("html".into()),
    }
}
