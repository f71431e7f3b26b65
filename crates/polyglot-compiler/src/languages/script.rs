use std::sync::Arc;

use serde_json::json;

use super::{IdentityFactory, TransformFactory, parser_plugins};
use crate::engines::TYPESCRIPT_URL;
use crate::registry::{CompilerSpec, EditorId, LanguageSpec, ParserSpec};

fn typescript_factory(jsx: bool) -> TransformFactory {
    let mut defaults = json!({ "target": "es2015", "module": "esnext" });
    if jsx {
        defaults["jsx"] = json!("react");
    }
    TransformFactory::new(TYPESCRIPT_URL)
        .with_global("ts")
        .with_defaults(defaults)
}

fn script_language(
    name: &str,
    title: &str,
    parser: ParserSpec,
    compiler: CompilerSpec,
    extensions: &[&str],
) -> LanguageSpec {
    LanguageSpec {
        name: name.into(),
        title: title.into(),
        long_title: None,
        parser,
        compiler: compiler.compiles_to("javascript"),
        extensions: extensions.iter().map(|ext| (*ext).into()).collect(),
        editor: EditorId::Script,
        editor_language: None,
    }
}

pub(super) fn javascript() -> LanguageSpec {
    script_language(
        "javascript",
        "JS",
        ParserSpec::new("babel", &[parser_plugins::BABEL]),
        CompilerSpec::new(Arc::new(IdentityFactory)),
        &["js", "mjs"],
    )
}

pub(super) fn typescript() -> LanguageSpec {
    script_language(
        "typescript",
        "TS",
        ParserSpec::new("typescript", &[parser_plugins::TYPESCRIPT]),
        CompilerSpec::new(Arc::new(typescript_factory(false))),
        &["ts", "mts"],
    )
}

pub(super) fn jsx() -> LanguageSpec {
    let mut spec = script_language(
        "jsx",
        "JSX",
        ParserSpec::new("babel", &[parser_plugins::BABEL]),
        CompilerSpec::new(Arc::new(typescript_factory(true))),
        &["jsx"],
    );
    spec.editor_language = Some("javascript".into());
    spec
}

pub(super) fn tsx() -> LanguageSpec {
    let mut spec = script_language(
        "tsx",
        "TSX",
        ParserSpec::new("typescript", &[parser_plugins::TYPESCRIPT]),
        CompilerSpec::new(Arc::new(typescript_factory(true))),
        &["tsx"],
    );
    spec.editor_language = Some("typescript".into());
    spec
}
