use std::sync::{Arc, LazyLock};

use futures_util::future::BoxFuture;
use regex::Regex;

use super::{IdentityFactory, escape_code, merge_settings, parser_plugins};
use crate::compiler::{Compiled, InvocationContext, SecondaryPass};
use crate::engines::MDX_URL;
use crate::error::CompileError;
use crate::registry::{CompilerSpec, EditorId, LanguageSpec, ParserSpec};

static DESTRUCTURED_COMPONENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r", \{[^}]*\} = _components").unwrap());
static PROPS_COMPONENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"const \{[^:]*\} = props\.components[^;]*;").unwrap());

/// Compiles MDX to JSX with the mdx engine, then to a module script
/// through the `jsx` language.
#[derive(Debug, Clone, Copy, Default)]
pub struct MdxSecondary;

impl MdxSecondary {
    /// Component lookups are dropped; components resolve from scope.
    fn strip_component_declarations(jsx: &str) -> String {
        let jsx = DESTRUCTURED_COMPONENTS.replace_all(jsx, "");
        PROPS_COMPONENTS.replace_all(&jsx, "").into_owned()
    }

    fn wrap(jsx: &str) -> String {
        format!(
            "import React from \"react\";\nimport ReactDOM from \"react-dom\";\n{}\nReactDOM.render(<MDXContent />, document.body);\n",
            escape_code(&Self::strip_component_declarations(jsx), false)
        )
    }
}

impl SecondaryPass for MdxSecondary {
    fn run<'a>(
        &'a self,
        code: String,
        cx: &'a InvocationContext<'a>,
    ) -> BoxFuture<'a, Result<Compiled, CompileError>> {
        Box::pin(async move {
            if code.is_empty() {
                return Ok(Compiled::default());
            }
            let engine = cx
                .loader()
                .load(MDX_URL)
                .await
                .and_then(|handle| handle.transform())
                .map_err(|e| CompileError::engine("mdx", e))?;

            let options = merge_settings(
                &serde_json::json!({ "remarkPlugins": ["remark-gfm"] }),
                cx.settings(),
            );
            let jsx = engine
                .transform(&code, &options)
                .await
                .map_err(|e| CompileError::Compile {
                    language: "mdx".into(),
                    message: e.message,
                    location: e.location,
                })?;

            let js = cx.compile_in_compiler(&Self::wrap(&jsx), "jsx").await?;
            Ok(Compiled::new(format!("<script type=\"module\">{}</script>", js.code))
                .with_warnings(js.warnings))
        })
    }
}

pub(super) fn mdx() -> LanguageSpec {
    LanguageSpec {
        name: "mdx".into(),
        title: "MDX".into(),
        long_title: None,
        parser: ParserSpec::new(
            "markdown",
            &[parser_plugins::MARKDOWN, parser_plugins::HTML],
        ),
        compiler: CompilerSpec::new(Arc::new(IdentityFactory))
            .with_secondary(Arc::new(MdxSecondary))
            .compiles_to("javascript")
            .with_import("react/jsx-runtime", "https://esm.sh/react/jsx-runtime"),
        extensions: vec!["mdx".into()],
        editor: EditorId::Markup,
        editor_language: Some("markdown".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_declarations_are_removed() {
        let jsx = "function MDXContent(props) {\n  const _components = Object.assign({h1: \"h1\"}, props.components), {Chart} = _components;\n  const {Box} = props.components || ({});\n  return <Chart />;\n}";
        let stripped = MdxSecondary::strip_component_declarations(jsx);
        assert_eq!(
            stripped,
            "function MDXContent(props) {\n  const _components = Object.assign({h1: \"h1\"}, props.components);\n  \n  return <Chart />;\n}"
        );
    }

    #[test]
    fn wrapper_mounts_the_content() {
        let wrapped = MdxSecondary::wrap("export default function MDXContent() {}");
        insta::assert_snapshot!(wrapped, @r#"
        import React from "react";
        import ReactDOM from "react-dom";
        export default function MDXContent() {}
        ReactDOM.render(<MDXContent />, document.body);
        "#);
    }
}
