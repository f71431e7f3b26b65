use std::sync::Arc;

use futures_util::future::BoxFuture;

use super::{escape_code, parser_plugins};
use crate::compiler::{Compiled, Compiler, CompilerFactory, InvocationContext};
use crate::error::CompileError;
use crate::registry::{CompilerSpec, EditorId, LanguageSpec, ParserSpec};

const VUE2_URL: &str = "https://cdn.jsdelivr.net/npm/vue@2";
const SFC_LOADER_URL: &str = "https://cdn.jsdelivr.net/npm/vue3-sfc-loader@0.8.4/dist/vue2-sfc-loader.js";

/// Wraps a single file component in a bootstrap that mounts it at runtime
/// through the SFC loader.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct Vue2Factory;

struct Vue2Compiler;

impl Vue2Compiler {
    fn bootstrap(component: &str) -> String {
        format!(
            r##"let app = document.querySelector("#app") || document.body.appendChild(document.createElement('div'));

/* <!-- */
let content = `{content}`;
/* --> */
const options = {{
  moduleCache: {{ vue: Vue }},
  async getFile(url) {{
    if (url === '/component.vue') return content;
    const res = await fetch(url);
    if (!res.ok) throw Object.assign(new Error(res.statusText + ' ' + url), {{ res }});
    return await res.text();
  }},
  addStyle: (textContent) => {{
    const style = Object.assign(document.createElement('style'), {{ textContent }});
    const ref = document.head.getElementsByTagName('style')[0] || null;
    document.head.insertBefore(style, ref);
  }},
}};
const {{ loadModule }} = window['vue2-sfc-loader'];
loadModule('/component.vue', options).then((component) => new Vue(component).$mount(app));
"##,
            content = escape_code(component, true)
        )
    }
}

impl Compiler for Vue2Compiler {
    fn compile<'a>(
        &'a self,
        source: &'a str,
        _cx: &'a InvocationContext<'a>,
    ) -> BoxFuture<'a, Result<Compiled, CompileError>> {
        Box::pin(async move { Ok(Compiled::new(Self::bootstrap(source))) })
    }
}

impl CompilerFactory for Vue2Factory {
    fn create<'a>(
        &'a self,
        _cx: &'a InvocationContext<'a>,
    ) -> BoxFuture<'a, Result<Arc<dyn Compiler>, CompileError>> {
        Box::pin(async move { Ok(Arc::new(Vue2Compiler) as Arc<dyn Compiler>) })
    }
}

pub(super) fn vue2() -> LanguageSpec {
    LanguageSpec {
        name: "vue2".into(),
        title: "Vue 2".into(),
        long_title: Some("Vue 2 SFC".into()),
        parser: ParserSpec::new("html", &[parser_plugins::HTML]),
        compiler: CompilerSpec::new(Arc::new(Vue2Factory))
            .compiles_to("javascript")
            .with_scripts(&[VUE2_URL, SFC_LOADER_URL]),
        extensions: vec!["vue2".into()],
        editor: EditorId::Script,
        editor_language: Some("html".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_is_embedded_escaped() {
        let out = Vue2Compiler::bootstrap("<template>`{{ a }}`</template>\n<script>x</script>");
        assert!(out.contains(r"let content = `<template>\`{{ a }}\`</template>"));
        assert!(out.contains(r"<script>x<\/script>`;"));
        assert!(out.contains("loadModule('/component.vue', options)"));
    }
}
