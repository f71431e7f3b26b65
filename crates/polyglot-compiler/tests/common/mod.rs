//! Stub engines and loader plumbing shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use polyglot_common::config::DEFAULT_VENDORS_BASE_URL;
use polyglot_compiler::engines::{EngineError, RenderRequest};
use polyglot_compiler::loader::{NativeModules, resolve_engine_url};
use polyglot_compiler::{EngineLoadError, GraphEngine, Module, ModuleSource, Rendered, TransformEngine};
use smol_str::SmolStr;

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn url(reference: &str) -> SmolStr {
    resolve_engine_url(DEFAULT_VENDORS_BASE_URL, reference)
}

/// Graph engine returning a fixed result and logging `label:content`.
/// Content `FAIL` makes it error.
pub struct StubGraph {
    pub label: &'static str,
    pub reply: Rendered,
    pub calls: CallLog,
}

impl StubGraph {
    pub fn markup(label: &'static str, markup: &str, calls: &CallLog) -> Module {
        Module::Graph(Arc::new(Self {
            label,
            reply: Rendered::Markup(markup.to_owned()),
            calls: calls.clone(),
        }))
    }

    pub fn data_uri(label: &'static str, uri: &str, calls: &CallLog) -> Module {
        Module::Graph(Arc::new(Self {
            label,
            reply: Rendered::DataUri(uri.to_owned()),
            calls: calls.clone(),
        }))
    }
}

impl GraphEngine for StubGraph {
    fn render<'a>(&'a self, request: RenderRequest<'a>) -> BoxFuture<'a, Result<Rendered, EngineError>> {
        Box::pin(async move {
            let mut entry = format!("{}:{}", self.label, request.content.trim());
            for file in request.files {
                entry.push_str(&format!(" [{}={}]", file.name, file.content));
            }
            self.calls.lock().unwrap().push(entry);
            if request.content.trim() == "FAIL" {
                return Err(EngineError::new("stub refused"));
            }
            Ok(self.reply.clone())
        })
    }
}

/// Transform engine applying a plain function. Source `boom` errors.
pub struct StubTransform(pub fn(&str, &serde_json::Value) -> String);

impl StubTransform {
    pub fn module(f: fn(&str, &serde_json::Value) -> String) -> Module {
        Module::Transform(Arc::new(Self(f)))
    }
}

impl TransformEngine for StubTransform {
    fn transform<'a>(
        &'a self,
        source: &'a str,
        options: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<String, EngineError>> {
        Box::pin(async move {
            if source.contains("boom") {
                return Err(EngineError::new("unexpected boom").at(1, 5));
            }
            Ok((self.0)(source, options))
        })
    }
}

/// Counts every load that reaches the wrapped source.
pub struct Counting {
    inner: NativeModules,
    pub loads: AtomicUsize,
}

impl Counting {
    pub fn new(inner: NativeModules) -> Arc<Self> {
        Arc::new(Self {
            inner,
            loads: AtomicUsize::new(0),
        })
    }

    pub fn count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModuleSource for Counting {
    fn load_module<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Module, EngineLoadError>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load_module(url)
    }
}
