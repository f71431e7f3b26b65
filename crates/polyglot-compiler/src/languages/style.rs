use std::sync::Arc;

use serde_json::json;

use super::{IdentityFactory, TransformFactory, parser_plugins};
use crate::engines::SASS_URL;
use crate::registry::{CompilerSpec, EditorId, LanguageSpec, ParserSpec};

pub(super) fn css() -> LanguageSpec {
    LanguageSpec {
        name: "css".into(),
        title: "CSS".into(),
        long_title: None,
        parser: ParserSpec::new("css", &[parser_plugins::POSTCSS]),
        compiler: CompilerSpec::new(Arc::new(IdentityFactory)),
        extensions: vec!["css".into()],
        editor: EditorId::Style,
        editor_language: None,
    }
}

pub(super) fn scss() -> LanguageSpec {
    let factory = TransformFactory::new(SASS_URL)
        .with_global("Sass")
        .with_defaults(json!({ "syntax": "scss", "style": "expanded" }));
    LanguageSpec {
        name: "scss".into(),
        title: "SCSS".into(),
        long_title: None,
        parser: ParserSpec::new("scss", &[parser_plugins::POSTCSS]),
        compiler: CompilerSpec::new(Arc::new(factory)).compiles_to("css"),
        extensions: vec!["scss".into()],
        editor: EditorId::Style,
        editor_language: None,
    }
}
