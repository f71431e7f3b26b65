mod common;

use std::sync::{Arc, Mutex};

use common::{CallLog, Counting, StubGraph};
use polyglot_common::MemoryFetcher;
use polyglot_compiler::graph::cache::restore;
use polyglot_compiler::graph::{GraphPipeline, PassContext};
use polyglot_compiler::loader::NativeModules;
use polyglot_compiler::{BlockError, EngineLoadError, EngineLoader, GraphHandler, GraphKind};

const KIND_A: &str = "x/kind-A";
const KIND_B: &str = "x/kind-B";
const ENGINE_A: &str = "https://engines.test/a.js";
const ENGINE_B: &str = "https://engines.test/b.js";

fn handler(marker: &str, url: &str) -> GraphHandler {
    GraphHandler::new(GraphKind::Custom(marker.into()), url)
}

struct Harness {
    source: Arc<Counting>,
    loader: EngineLoader,
    fetcher: MemoryFetcher,
    calls: CallLog,
}

impl Harness {
    fn new(build: impl FnOnce(NativeModules, &CallLog) -> NativeModules) -> Self {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let source = Counting::new(build(NativeModules::new(), &calls));
        Self {
            loader: EngineLoader::new(source.clone()),
            source,
            fetcher: MemoryFetcher::new(),
            calls,
        }
    }

    /// A single kind-A engine that renders `<b>ok</b>`.
    fn kind_a() -> Self {
        Self::new(|modules, calls| {
            modules.with_module(ENGINE_A, StubGraph::markup("A", "<b>ok</b>", calls))
        })
    }

    fn cx(&self) -> PassContext<'_> {
        PassContext::new(&self.loader, &self.fetcher)
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[tokio::test]
async fn marker_output_replaces_target_contents() {
    let harness = Harness::kind_a();
    let pipeline = GraphPipeline::new(vec![handler(KIND_A, ENGINE_A)]);

    let doc = r#"<script type="x/kind-A" data-output="o1">A-CONTENT</script><div data-src="o1"></div>"#;
    let output = pipeline.run(doc, harness.cx()).await.unwrap();

    assert_eq!(output.text, r#"<div data-src="o1"><b>ok</b></div>"#);
    assert!(output.errors.is_empty());
    assert_eq!(harness.calls(), ["A:A-CONTENT"]);
}

#[tokio::test]
async fn documents_without_markers_never_load_an_engine() {
    let harness = Harness::kind_a();
    let pipeline = GraphPipeline::new(vec![handler(KIND_A, ENGINE_A), handler(KIND_B, ENGINE_B)]);

    let doc = r#"<p>plain</p><script type="module">let a = 1;</script><div data-src="o1"></div>"#;
    let output = pipeline.run(doc, harness.cx()).await.unwrap();

    assert_eq!(output.text, doc);
    assert_eq!(harness.source.count(), 0);
    assert!(!harness.loader.is_loaded(ENGINE_A));
}

#[tokio::test]
async fn one_result_fans_out_to_every_target() {
    let harness = Harness::kind_a();
    let pipeline = GraphPipeline::new(vec![handler(KIND_A, ENGINE_A)]);

    let doc = concat!(
        r#"<script type="x/kind-A" data-output="o">x</script>"#,
        r#"<div data-src="o"></div><span data-src="o">stale</span><img data-src="o">"#,
    );
    let output = pipeline.run(doc, harness.cx()).await.unwrap();

    insta::assert_snapshot!(output.text, @r#"<div data-src="o"><b>ok</b></div><span data-src="o"><b>ok</b></span><img data-src="o" src="data:image/svg+xml;base64,PGI+b2s8L2I+">"#);
    assert_eq!(harness.calls().len(), 1);
}

#[tokio::test]
async fn later_kinds_see_markers_produced_by_earlier_ones() {
    let harness = Harness::new(|modules, calls| {
        modules
            .with_module(
                ENGINE_A,
                StubGraph::markup(
                    "A",
                    r#"<script type="x/kind-B" data-output="late">from-A</script>"#,
                    calls,
                ),
            )
            .with_module(ENGINE_B, StubGraph::markup("B", "<i>B</i>", calls))
    });
    let pipeline = GraphPipeline::new(vec![handler(KIND_A, ENGINE_A), handler(KIND_B, ENGINE_B)]);

    let doc = concat!(
        r#"<script type="x/kind-B" data-output="b">b-src</script>"#,
        r#"<script type="x/kind-A" data-output="a">a-src</script>"#,
        r#"<div data-src="a"></div><p data-src="b"></p><p data-src="late"></p>"#,
    );
    let output = pipeline.run(doc, harness.cx()).await.unwrap();

    // Every A block renders before any B block, whatever the text order.
    assert_eq!(harness.calls(), ["A:a-src", "B:b-src", "B:from-A"]);
    assert_eq!(
        output.text,
        r#"<div data-src="a"></div><p data-src="b"><i>B</i></p><p data-src="late"><i>B</i></p>"#
    );
}

#[tokio::test]
async fn one_failing_block_leaves_the_others_rendered() {
    let harness = Harness::kind_a();
    harness
        .fetcher
        .insert("https://data.test/good.txt", "external");
    let pipeline = GraphPipeline::new(vec![handler(KIND_A, ENGINE_A)]);

    let doc = concat!(
        r#"<script type="x/kind-A" data-output="o1" src="https://data.test/good.txt"></script>"#,
        r#"<script type="x/kind-A" data-output="o2" src="https://data.test/missing.txt"></script>"#,
        r#"<script type="x/kind-A" data-output="o3">FAIL</script>"#,
        r#"<div data-src="o1"></div><div data-src="o2"></div><div data-src="o3"></div>"#,
    );
    let output = pipeline.run(doc, harness.cx()).await.unwrap();

    assert_eq!(
        output.text,
        concat!(
            r#"<script type="x/kind-A" data-output="o2" src="https://data.test/missing.txt"></script>"#,
            r#"<script type="x/kind-A" data-output="o3">FAIL</script>"#,
            r#"<div data-src="o1"><b>ok</b></div><div data-src="o2"></div><div data-src="o3"></div>"#,
        )
    );
    assert_eq!(output.errors.len(), 2);
    assert!(matches!(
        &output.errors[0],
        BlockError::ResourceFetch { target: Some(target), url, .. }
            if target == "o2" && url == "https://data.test/missing.txt"
    ));
    assert!(matches!(
        &output.errors[1],
        BlockError::Render { target, .. } if target == "o3"
    ));
}

#[tokio::test]
async fn engine_load_failure_aborts_the_pass() {
    let harness = Harness::new(|modules, _| modules);
    let pipeline = GraphPipeline::new(vec![handler(KIND_A, ENGINE_A)]);

    let doc = r#"<script type="x/kind-A" data-output="o1">x</script><div data-src="o1"></div>"#;
    let error = pipeline.run(doc, harness.cx()).await.unwrap_err();

    assert!(matches!(error, EngineLoadError::NotFound { url } if url == ENGINE_A));
}

#[tokio::test]
async fn rendering_a_rendered_document_changes_nothing() {
    let harness = Harness::kind_a();
    let pipeline = GraphPipeline::new(vec![handler(KIND_A, ENGINE_A)]);

    let doc = r#"<script type="x/kind-A" data-output="o1">x</script><div data-src="o1"></div>"#;
    let once = pipeline.run(doc, harness.cx()).await.unwrap();
    let twice = pipeline.run(&once.text, harness.cx()).await.unwrap();

    assert_eq!(once.text, twice.text);
    assert_eq!(harness.calls().len(), 1);
}

#[tokio::test]
async fn markers_without_a_target_are_left_alone() {
    let harness = Harness::kind_a();
    let pipeline = GraphPipeline::new(vec![handler(KIND_A, ENGINE_A)]);

    let doc = r#"<script type="x/kind-A">x</script><script type="x/kind-A" data-output="">y</script>"#;
    let output = pipeline.run(doc, harness.cx()).await.unwrap();

    assert_eq!(output.text, doc);
    assert!(harness.calls().is_empty());
    assert_eq!(harness.source.count(), 0);
}

#[tokio::test]
async fn serialize_then_restore_matches_direct_substitution() {
    let harness = Harness::new(|modules, calls| {
        modules
            .with_module(ENGINE_A, StubGraph::markup("A", "<svg>a</svg>", calls))
            .with_module(
                ENGINE_B,
                StubGraph::data_uri("B", "data:image/png;base64,AQID", calls),
            )
    });
    let pipeline = GraphPipeline::new(vec![
        handler(KIND_A, ENGINE_A)
            .isolated()
            .with_input_files("x/kind-A-file"),
        handler(KIND_B, ENGINE_B).isolated(),
    ]);

    let doc = concat!(
        r#"<script type="x/kind-A-file" data-file="points.dat">1 2</script>"#,
        r#"<script type="x/kind-A" data-output="inline">plot</script>"#,
        r#"<script type="x/kind-B" data-output="pic">draw</script>"#,
        r#"<div data-src="inline"></div><img data-src="pic"><section data-src="pic"></section>"#,
    );
    let direct = pipeline.run(doc, harness.cx()).await.unwrap();
    let serialized = pipeline.run_isolated(doc, harness.cx()).await.unwrap();
    let restored = pipeline.restore(&serialized.text);

    assert!(serialized.text.contains(r#"<script type="data-urls">"#));
    assert_eq!(restored.text, direct.text);
    assert!(restored.errors.is_empty());
    insta::assert_snapshot!(direct.text, @r#"<div data-src="inline"><svg>a</svg></div><img data-src="pic" src="data:image/png;base64,AQID"><section data-src="pic"><img src="data:image/png;base64,AQID"></section>"#);

    // Input files reached the engine that asked for them.
    assert!(harness.calls().contains(&"A:plot [points.dat=1 2]".to_owned()));
}

#[tokio::test]
async fn restored_targets_are_not_rendered_again() {
    // No kind-A engine at all: a fully restored document must not need one.
    let harness = Harness::new(|modules, _| modules);
    let pipeline = GraphPipeline::new(vec![handler(KIND_A, ENGINE_A)]);

    let doc = concat!(
        r#"<script type="x/kind-A" data-output="o1">x</script><div data-src="o1"></div>"#,
        r#"<script type="data-urls">{"o1":"data:image/svg+xml;base64,PGI+Y2FjaGVkPC9iPg=="}</script>"#,
    );
    let output = pipeline.run_main(doc, harness.cx()).await.unwrap();

    assert_eq!(output.text, r#"<div data-src="o1"><b>cached</b></div>"#);
    assert!(output.errors.is_empty());
    assert_eq!(harness.source.count(), 0);
}

#[tokio::test]
async fn split_stages_drop_input_files_like_a_direct_run() {
    let harness = Harness::kind_a();
    let pipeline = GraphPipeline::new(vec![
        handler(KIND_A, ENGINE_A)
            .isolated()
            .with_input_files("x/kind-A-file"),
    ]);

    let failing = concat!(
        r#"<script type="x/kind-A-file" data-file="d.txt">1 2</script>"#,
        r#"<script type="x/kind-A" data-output="o">FAIL</script><div data-src="o"></div>"#,
    );
    let files_only = r#"<script type="x/kind-A-file" data-file="d.txt">1 2</script><p>text</p>"#;

    for doc in [failing, files_only] {
        let direct = pipeline.run(doc, harness.cx()).await.unwrap();
        let isolated = pipeline.run_isolated(doc, harness.cx()).await.unwrap();
        let split = pipeline.run_main(&isolated.text, harness.cx()).await.unwrap();

        assert_eq!(split.text, direct.text);
        assert!(!split.text.contains("x/kind-A-file"));
    }
    assert_eq!(
        pipeline.run(failing, harness.cx()).await.unwrap().text,
        r#"<script type="x/kind-A" data-output="o">FAIL</script><div data-src="o"></div>"#
    );
}

#[tokio::test]
async fn invalid_cache_markers_are_reported_and_dropped() {
    let restored = restore(
        r#"<div data-src="a"></div><script type="data-urls">[1, 2]</script>"#,
        &[],
    );

    assert_eq!(restored.text, r#"<div data-src="a"></div>"#);
    assert!(matches!(restored.errors[..], [BlockError::InvalidCache { .. }]));
}
