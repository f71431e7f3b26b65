//! Lazy, coalescing engine loader.
//!
//! Every engine is identified by a resource URL. The first request for a URL
//! starts the load; concurrent requests for the same URL wait on that same
//! load; later requests get the cached handle. Failed loads are forgotten
//! so the next request retries.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use polyglot_common::ResourceFetcher;
use smol_str::SmolStr;

use crate::engines::{GraphEngine, Module, TransformEngine};
use crate::error::EngineLoadError;

/// Produces engine modules for resource URLs.
pub trait ModuleSource: Send + Sync + 'static {
    fn load_module<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Module, EngineLoadError>>;
}

/// Resolve an engine reference against the vendors base URL.
///
/// Absolute URLs are returned as-is, and so is anything that can't be
/// joined onto `base`.
pub fn resolve_engine_url(base: &str, reference: &str) -> SmolStr {
    if url::Url::parse(reference).is_ok() {
        return SmolStr::new(reference);
    }
    // A base without a trailing slash would drop its last segment on join.
    let base = if base.ends_with('/') {
        base.to_owned()
    } else {
        format!("{base}/")
    };
    url::Url::parse(&base)
        .and_then(|base| base.join(reference))
        .map(|joined| SmolStr::new(joined.as_str()))
        .unwrap_or_else(|_| SmolStr::new(reference))
}

/// A loaded engine, shared by everyone who asked for its URL.
#[derive(Clone)]
pub struct EngineHandle {
    url: SmolStr,
    module: Module,
}

impl EngineHandle {
    pub fn new(url: impl Into<SmolStr>, module: Module) -> Self {
        Self {
            url: url.into(),
            module,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn transform(&self) -> Result<Arc<dyn TransformEngine>, EngineLoadError> {
        match &self.module {
            Module::Transform(engine) => Ok(engine.clone()),
            other => Err(self.capability_error("transform", other)),
        }
    }

    pub fn graph(&self) -> Result<Arc<dyn GraphEngine>, EngineLoadError> {
        match &self.module {
            Module::Graph(engine) => Ok(engine.clone()),
            other => Err(self.capability_error("graph", other)),
        }
    }

    pub fn script(&self) -> Result<Arc<str>, EngineLoadError> {
        match &self.module {
            Module::Script(text) => Ok(text.clone()),
            other => Err(self.capability_error("script", other)),
        }
    }

    fn capability_error(&self, expected: &str, found: &Module) -> EngineLoadError {
        EngineLoadError::Capability {
            url: self.url.to_string(),
            expected: expected.to_owned(),
            found: found.kind_name().to_owned(),
        }
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("url", &self.url)
            .field("module", &self.module)
            .finish()
    }
}

/// Well-known names engines are bound under in an execution context.
///
/// Append-only: the first registration of a name wins and later ones get
/// the existing handle back.
#[derive(Debug, Default)]
pub struct AmbientScope {
    globals: DashMap<SmolStr, EngineHandle>,
}

impl AmbientScope {
    pub fn ensure_registered(&self, name: &str, handle: &EngineHandle) -> EngineHandle {
        self.globals
            .entry(SmolStr::new(name))
            .or_insert_with(|| {
                tracing::debug!(global = name, url = handle.url(), "registering engine global");
                handle.clone()
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<EngineHandle> {
        self.globals.get(name).map(|handle| handle.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.globals.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.globals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }
}

type LoadResult = Result<EngineHandle, EngineLoadError>;
type PendingLoad = Shared<BoxFuture<'static, LoadResult>>;

#[derive(Clone)]
enum Slot {
    Pending { id: u64, load: PendingLoad },
    Ready(EngineHandle),
}

/// Loads engines on first use and keeps them for the life of the context.
pub struct EngineLoader {
    source: Arc<dyn ModuleSource>,
    base_url: String,
    slots: DashMap<SmolStr, Slot>,
    scope: AmbientScope,
    next_load: AtomicU64,
}

impl EngineLoader {
    pub fn new(source: Arc<dyn ModuleSource>) -> Self {
        Self {
            source,
            base_url: polyglot_common::config::DEFAULT_VENDORS_BASE_URL.to_owned(),
            slots: DashMap::new(),
            scope: AmbientScope::default(),
            next_load: AtomicU64::new(0),
        }
    }

    /// Base URL relative engine references are resolved against.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn resolve_url(&self, reference: &str) -> SmolStr {
        resolve_engine_url(&self.base_url, reference)
    }

    pub fn scope(&self) -> &AmbientScope {
        &self.scope
    }

    /// Whether `reference` has finished loading successfully.
    pub fn is_loaded(&self, reference: &str) -> bool {
        let url = self.resolve_url(reference);
        matches!(self.slots.get(&url).as_deref(), Some(Slot::Ready(_)))
    }

    /// Load the engine at `reference`, sharing any load already in flight.
    pub async fn load(&self, reference: &str) -> LoadResult {
        let url = self.resolve_url(reference);
        let (id, load) = match self.slots.entry(url.clone()) {
            Entry::Occupied(entry) => match entry.get() {
                Slot::Ready(handle) => return Ok(handle.clone()),
                Slot::Pending { id, load } => (*id, load.clone()),
            },
            Entry::Vacant(entry) => {
                let id = self.next_load.fetch_add(1, Ordering::Relaxed);
                let source = self.source.clone();
                let key = url.clone();
                let load = async move {
                    tracing::debug!(url = %key, "loading engine module");
                    let module = source.load_module(&key).await?;
                    Ok(EngineHandle::new(key, module))
                }
                .boxed()
                .shared();
                entry.insert(Slot::Pending {
                    id,
                    load: load.clone(),
                });
                (id, load)
            }
        };

        let result = load.await;

        // Only settle the slot this load created; a retry may already own it.
        match &result {
            Ok(handle) => {
                if let Some(mut slot) = self.slots.get_mut(&url) {
                    if matches!(&*slot, Slot::Pending { id: pending, .. } if *pending == id) {
                        *slot = Slot::Ready(handle.clone());
                    }
                }
            }
            Err(error) => {
                tracing::warn!(%url, %error, "engine load failed");
                self.slots.remove_if(&url, |_, slot| {
                    matches!(slot, Slot::Pending { id: pending, .. } if *pending == id)
                });
            }
        }
        result
    }

    /// Load an engine that expects to live under a well-known global name.
    ///
    /// If the name is already bound in this context the bound engine is
    /// returned without touching the network.
    pub async fn load_global(&self, reference: &str, name: &str) -> LoadResult {
        if let Some(handle) = self.scope.get(name) {
            return Ok(handle);
        }
        let handle = self.load(reference).await?;
        Ok(self.scope.ensure_registered(name, &handle))
    }
}

impl fmt::Debug for EngineLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineLoader")
            .field("base_url", &self.base_url)
            .field("slots", &self.slots.len())
            .field("scope", &self.scope)
            .finish()
    }
}

type ModuleInit = Arc<dyn Fn() -> BoxFuture<'static, Result<Module, String>> + Send + Sync>;

/// In-process engines keyed by URL, with an optional fallback source for
/// everything else.
#[derive(Default)]
pub struct NativeModules {
    modules: HashMap<SmolStr, ModuleInit>,
    fallback: Option<Arc<dyn ModuleSource>>,
}

impl NativeModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module that is ready as soon as it's asked for.
    pub fn with_module(self, url: impl Into<SmolStr>, module: Module) -> Self {
        self.with_init(url, move || {
            let module = module.clone();
            async move { Ok(module) }
        })
    }

    /// Register a module built on first load. An `Err` becomes
    /// [`EngineLoadError::Unavailable`].
    pub fn with_init<F, Fut>(mut self, url: impl Into<SmolStr>, init: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Module, String>> + Send + 'static,
    {
        self.modules
            .insert(url.into(), Arc::new(move || init().boxed()));
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn ModuleSource>) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

impl ModuleSource for NativeModules {
    fn load_module<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Module, EngineLoadError>> {
        Box::pin(async move {
            if let Some(init) = self.modules.get(url) {
                return init()
                    .await
                    .map_err(|message| EngineLoadError::Unavailable {
                        url: url.to_owned(),
                        message,
                    });
            }
            match &self.fallback {
                Some(fallback) => fallback.load_module(url).await,
                None => Err(EngineLoadError::NotFound {
                    url: url.to_owned(),
                }),
            }
        })
    }
}

/// Fetches engines as script text.
pub struct ScriptModules {
    fetcher: Arc<dyn ResourceFetcher>,
}

impl ScriptModules {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self { fetcher }
    }
}

impl ModuleSource for ScriptModules {
    fn load_module<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Module, EngineLoadError>> {
        Box::pin(async move {
            let text = self
                .fetcher
                .fetch_text(url)
                .await
                .map_err(|e| EngineLoadError::Fetch {
                    url: url.to_owned(),
                    message: e.message,
                })?;
            Ok(Module::Script(Arc::from(text)))
        })
    }
}
