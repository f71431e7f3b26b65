mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::{CallLog, Counting, StubGraph, StubTransform, url};
use futures_util::future::BoxFuture;
use polyglot_common::{Config, MemoryFetcher};
use polyglot_compiler::engines::{MARKED_URL, MDX_URL, TYPESCRIPT_URL};
use polyglot_compiler::languages::graph_language;
use polyglot_compiler::loader::NativeModules;
use polyglot_compiler::{
    CompileError, CompileRequest, Compiled, CompilerHost, EngineLoadError, EngineLoader,
    ExecutionContext, Fallback, GraphHandler, GraphKind, GraphPipeline, IsolatedWorker,
    LanguageRegistry, Module, ModuleSource,
};
use serde_json::json;

fn stub_modules() -> NativeModules {
    NativeModules::new()
        .with_module(
            MARKED_URL,
            StubTransform::module(|source, options| {
                let gfm = if options["gfm"] == json!(true) { "<!--gfm-->" } else { "" };
                format!("<p>{}</p>{gfm}", source.trim())
            }),
        )
        .with_module(
            TYPESCRIPT_URL,
            StubTransform::module(|source, options| {
                let jsx = options["jsx"].as_str().unwrap_or("none");
                format!("/* jsx={jsx} */\n{}", source.replace(": number", ""))
            }),
        )
        .with_module(
            url(MDX_URL),
            StubTransform::module(|source, _| {
                let title = source.trim().trim_start_matches("# ");
                format!("export default function MDXContent() {{ return <h1>{title}</h1>; }}")
            }),
        )
}

fn host_over(source: Arc<dyn ModuleSource>, registry: LanguageRegistry) -> CompilerHost {
    CompilerHost::new(
        registry,
        Arc::new(EngineLoader::new(source)),
        Arc::new(MemoryFetcher::new()),
    )
}

fn stub_host() -> (CompilerHost, Arc<Counting>) {
    let source = Counting::new(stub_modules());
    (host_over(source.clone(), LanguageRegistry::builtin()), source)
}

/// Runs primary passes on a host of its own and records what it was sent.
struct RecordingWorker {
    host: CompilerHost,
    languages: Mutex<Vec<String>>,
}

impl RecordingWorker {
    fn new(host: CompilerHost) -> Arc<Self> {
        Arc::new(Self {
            host,
            languages: Mutex::new(Vec::new()),
        })
    }

    fn languages(&self) -> Vec<String> {
        self.languages.lock().unwrap().clone()
    }
}

impl IsolatedWorker for RecordingWorker {
    fn compile<'a>(
        &'a self,
        language: &'a str,
        source: &'a str,
        config: &'a Config,
    ) -> BoxFuture<'a, Result<Compiled, CompileError>> {
        self.languages.lock().unwrap().push(language.to_owned());
        Box::pin(self.host.compile_primary(language, source, config))
    }
}

#[tokio::test]
async fn empty_source_never_touches_an_engine() {
    let (host, source) = stub_host();

    for spec in host.registry().iter() {
        let output = host
            .compile(&CompileRequest::new(spec.name.clone(), ""))
            .await
            .unwrap();
        assert_eq!(output.code, "", "{}", spec.name);
        assert_eq!(output.compiled_language, spec.output_language());
    }
    assert_eq!(source.count(), 0);
}

#[tokio::test]
async fn unknown_languages_are_rejected() {
    let (host, _) = stub_host();

    let error = host
        .compile(&CompileRequest::new("cobol", "DISPLAY 'HI'."))
        .await
        .unwrap_err();
    assert_eq!(
        error,
        CompileError::UnsupportedLanguage {
            language: "cobol".into()
        }
    );
    assert!(!error.is_retryable());
}

#[tokio::test]
async fn markdown_options_layer_custom_settings_over_defaults() {
    let (host, _) = stub_host();

    let output = host
        .compile(&CompileRequest::new("markdown", "Hello"))
        .await
        .unwrap();
    assert_eq!(output.code, "<p>Hello</p><!--gfm-->");
    assert_eq!(output.compiled_language, "html");

    let mut config = Config::default();
    config
        .custom_settings
        .insert("markdown".into(), json!({ "gfm": false }));
    let output = host
        .compile(&CompileRequest::new("markdown", "Hello").with_config(config))
        .await
        .unwrap();
    assert_eq!(output.code, "<p>Hello</p>");
}

#[tokio::test]
async fn script_languages_share_one_engine_load() {
    let (host, source) = stub_host();

    let ts = host
        .compile(&CompileRequest::new("typescript", "const x: number = 1;"))
        .await
        .unwrap();
    let tsx = host
        .compile(&CompileRequest::new("tsx", "const el = <b />;"))
        .await
        .unwrap();

    assert_eq!(ts.code, "/* jsx=none */\nconst x = 1;");
    assert_eq!(tsx.code, "/* jsx=react */\nconst el = <b />;");
    assert_eq!(source.count(), 1);
    assert!(host.loader().scope().contains("ts"));
}

#[tokio::test]
async fn mdx_compiles_through_jsx_in_the_secondary_pass() {
    let (host, _) = stub_host();

    let output = host
        .compile(&CompileRequest::new("mdx", "# Hi"))
        .await
        .unwrap();

    insta::assert_snapshot!(output.code, @r#"
    <script type="module">/* jsx=react */
    import React from "react";
    import ReactDOM from "react-dom";
    export default function MDXContent() { return <h1>Hi</h1>; }
    ReactDOM.render(<MDXContent />, document.body);
    </script>
    "#);
    assert_eq!(output.compiled_language, "javascript");
    assert_eq!(
        output.imports.get("react/jsx-runtime").map(String::as_str),
        Some("https://esm.sh/react/jsx-runtime")
    );
}

#[tokio::test]
async fn worker_runs_primary_passes_and_nested_compiles() {
    let (host, _) = stub_host();
    let (worker_host, _) = stub_host();
    let worker = RecordingWorker::new(worker_host);

    let inline = host
        .compile(&CompileRequest::new("mdx", "# Hi"))
        .await
        .unwrap();
    let isolated = host
        .compile(
            &CompileRequest::new("mdx", "# Hi")
                .with_context(ExecutionContext::with_worker(worker.clone())),
        )
        .await
        .unwrap();

    assert_eq!(isolated, inline);
    assert_eq!(worker.languages(), ["mdx", "jsx"]);
}

#[tokio::test]
async fn fallbacks_cover_compile_failures() {
    let (host, _) = stub_host();

    let good = host
        .compile(&CompileRequest::new("markdown", "fine"))
        .await
        .unwrap();
    let failing = CompileRequest::new("markdown", "boom");

    let error = host.compile(&failing).await.unwrap_err();
    assert!(matches!(
        &error,
        CompileError::Compile { location: Some(location), .. } if location.line == 1 && location.column == 5
    ));
    assert!(!error.is_retryable());

    let empty = host.compile_or_recover(&failing, Fallback::Empty).await;
    assert_eq!(empty.output.code, "");
    assert_eq!(empty.error.as_ref(), Some(&error));

    let last_good = host.compile_or_recover(&failing, Fallback::LastGood).await;
    assert_eq!(last_good.output, good);

    let marker = host.compile_or_recover(&failing, Fallback::ErrorMarker).await;
    assert_eq!(marker.output.code, "<!-- markdown: unexpected boom -->");
}

#[tokio::test]
async fn unknown_language_recovers_with_a_marker() {
    let (host, _) = stub_host();

    let recovered = host
        .compile_or_recover(&CompileRequest::new("cobol", "x"), Fallback::ErrorMarker)
        .await;

    assert_eq!(
        recovered.output.code,
        "<!-- unsupported language: cobol -->"
    );
    assert_eq!(recovered.output.compiled_language, "cobol");
}

/// Fails the first load, then defers to the stubs.
struct FlakyOnce {
    inner: NativeModules,
    attempts: AtomicUsize,
}

impl ModuleSource for FlakyOnce {
    fn load_module<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Module, EngineLoadError>> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            return Box::pin(async move {
                Err(EngineLoadError::Fetch {
                    url: url.to_owned(),
                    message: "connection reset".into(),
                })
            });
        }
        self.inner.load_module(url)
    }
}

#[tokio::test]
async fn engine_load_failures_are_retryable() {
    let source = Arc::new(FlakyOnce {
        inner: stub_modules(),
        attempts: AtomicUsize::new(0),
    });
    let host = host_over(source.clone(), LanguageRegistry::builtin());
    let request = CompileRequest::new("typescript", "let n: number;");

    let error = host.compile(&request).await.unwrap_err();
    assert!(matches!(
        &error,
        CompileError::EngineLoad { language, source: EngineLoadError::Fetch { .. } } if language == "typescript"
    ));
    assert!(error.is_retryable());

    // Neither the loader nor the compiler table kept the failure.
    let output = host.compile(&request).await.unwrap();
    assert_eq!(output.code, "/* jsx=none */\nlet n;");
    assert_eq!(source.attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn engines_without_a_transform_surface_as_load_errors() {
    let source = Counting::new(
        NativeModules::new().with_module(TYPESCRIPT_URL, Module::Script(Arc::from("// ts"))),
    );
    let host = host_over(source, LanguageRegistry::builtin());

    let error = host
        .compile(&CompileRequest::new("typescript", "let a;"))
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        CompileError::EngineLoad {
            source: EngineLoadError::Capability { .. },
            ..
        }
    ));
}

fn graph_host(calls: &CallLog) -> CompilerHost {
    let modules = NativeModules::new()
        .with_module(
            "https://engines.test/plot.js",
            StubGraph::markup("plot", "<svg>plot</svg>", calls),
        )
        .with_module(
            "https://engines.test/flow.js",
            StubGraph::markup("flow", "<svg>flow</svg>", calls),
        );
    let pipeline = GraphPipeline::new(vec![
        GraphHandler::new(GraphKind::Custom("x/plot".into()), "https://engines.test/plot.js")
            .isolated(),
        GraphHandler::new(GraphKind::Custom("x/flow".into()), "https://engines.test/flow.js"),
    ]);
    let mut registry = LanguageRegistry::new();
    registry.register(graph_language(pipeline)).unwrap();
    host_over(Counting::new(modules), registry)
}

#[tokio::test]
async fn graph_documents_split_across_the_worker_boundary() {
    let main_calls: CallLog = Arc::new(Mutex::new(Vec::new()));
    let worker_calls: CallLog = Arc::new(Mutex::new(Vec::new()));
    let host = graph_host(&main_calls);
    let worker = RecordingWorker::new(graph_host(&worker_calls));

    let doc = concat!(
        r#"<script type="x/flow" data-output="f">a -> b</script>"#,
        r#"<script type="x/plot" data-output="p">plot sin(x)</script>"#,
        r#"<figure data-src="p"></figure><figure data-src="f"></figure>"#,
    );
    let output = host
        .compile(
            &CompileRequest::new("graph", doc)
                .with_context(ExecutionContext::with_worker(worker.clone())),
        )
        .await
        .unwrap();

    assert_eq!(
        output.code,
        r#"<figure data-src="p"><svg>plot</svg></figure><figure data-src="f"><svg>flow</svg></figure>"#
    );
    assert!(output.block_errors.is_empty());
    assert_eq!(worker.languages(), ["graph"]);
    assert_eq!(*worker_calls.lock().unwrap(), ["plot:plot sin(x)"]);
    assert_eq!(*main_calls.lock().unwrap(), ["flow:a -> b"]);
}
