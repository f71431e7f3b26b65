//! Isolated compile worker.
//!
//! Primary passes run on a dedicated thread with its own runtime, engine
//! loader and TTL result cache. The main context talks to it only through
//! [`WorkerInput`] and [`WorkerOutput`], both plain serialisable data.

mod host;

use std::time::Duration;

use polyglot_common::cache;
use polyglot_common::config::CacheConfig;
use polyglot_common::{Config, perf};
use polyglot_compiler::graph::references_external;
use polyglot_compiler::{CompileError, Compiled, CompilerHost};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

pub use host::WorkerHost;

/// Input messages to the compile worker.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum WorkerInput {
    /// Run the primary pass of `language` over `source`.
    Compile {
        /// Echoed back in the reply.
        id: u64,
        language: String,
        source: String,
        config: Config,
    },
    /// Drop every cached result.
    ClearCache,
}

/// Output messages from the compile worker.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum WorkerOutput {
    Compiled {
        id: u64,
        result: Result<Compiled, CompileError>,
        /// Timing info in milliseconds; zero for cache hits.
        compile_ms: f64,
        cached: bool,
    },
    CacheCleared,
}

/// The worker side: a compiler host plus a cache of clean results.
pub struct CompileWorker {
    host: CompilerHost,
    cache: cache::Cache<SmolStr, Compiled>,
}

impl CompileWorker {
    pub fn new(host: CompilerHost, cache_config: &CacheConfig) -> Self {
        Self {
            host,
            cache: cache::new_cache(
                cache_config.max_capacity,
                Duration::from_secs(cache_config.ttl_secs),
            ),
        }
    }

    /// Built-in languages and engines, configured from `config`.
    pub fn builtin(config: &Config) -> Self {
        Self::new(CompilerHost::builtin(config), &config.cache)
    }

    pub fn host(&self) -> &CompilerHost {
        &self.host
    }

    pub async fn handle(&self, input: WorkerInput) -> WorkerOutput {
        match input {
            WorkerInput::Compile {
                id,
                language,
                source,
                config,
            } => {
                let key = cache_key(&language, &source, &config);
                if let Some(compiled) = cache::get(&self.cache, &key) {
                    tracing::debug!(id, %language, "worker cache hit");
                    return WorkerOutput::Compiled {
                        id,
                        result: Ok(compiled),
                        compile_ms: 0.0,
                        cached: true,
                    };
                }

                let start = perf::now();
                let result = self.host.compile_primary(&language, &source, &config).await;
                let compile_ms = perf::now() - start;
                match &result {
                    // Only clean results whose source is self-contained are
                    // kept; `src` content can change under the same text.
                    Ok(compiled)
                        if compiled.warnings.is_empty() && !references_external(&source) =>
                    {
                        cache::insert(&self.cache, key, compiled.clone());
                    }
                    Ok(_) => {}
                    Err(error) => tracing::debug!(id, %language, %error, "worker compile failed"),
                }
                WorkerOutput::Compiled {
                    id,
                    result,
                    compile_ms,
                    cached: false,
                }
            }
            WorkerInput::ClearCache => {
                cache::clear(&self.cache);
                WorkerOutput::CacheCleared
            }
        }
    }
}

/// Results depend on the language, its source and its engine options.
fn cache_key(language: &str, source: &str, config: &Config) -> SmolStr {
    let settings = config.language_settings(language).to_string();
    cache::content_key([
        language.as_bytes(),
        source.as_bytes(),
        settings.as_bytes(),
    ])
}
