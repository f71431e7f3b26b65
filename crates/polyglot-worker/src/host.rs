//! Host-side management for the compile worker.
//!
//! [`WorkerHost`] owns the channel to the worker thread and implements
//! [`IsolatedWorker`], so a compiler host can hand it primary passes through
//! an `ExecutionContext`.

use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::BoxFuture;
use polyglot_common::Config;
use polyglot_compiler::{CompileError, Compiled, IsolatedWorker};
use tokio::sync::{mpsc, oneshot};

use crate::{CompileWorker, WorkerInput, WorkerOutput};

struct Envelope {
    input: WorkerInput,
    reply: oneshot::Sender<WorkerOutput>,
}

/// Handle to a worker running on its own thread.
///
/// The worker processes one message at a time, in the order sent. It shuts
/// down once every handle is dropped.
///
/// # Example
///
/// ```ignore
/// let worker = WorkerHost::spawn_builtin(&config)?;
/// let request = CompileRequest::new("markdown", source)
///     .with_context(ExecutionContext::with_worker(Arc::new(worker)));
/// let output = host.compile(&request).await?;
/// ```
pub struct WorkerHost {
    tx: mpsc::UnboundedSender<Envelope>,
    next_id: AtomicU64,
}

impl WorkerHost {
    /// Start `worker` on a dedicated thread with a current-thread runtime.
    pub fn spawn(worker: CompileWorker) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        std::thread::Builder::new()
            .name("polyglot-worker".into())
            .spawn(move || {
                runtime.block_on(async move {
                    tracing::debug!("compile worker started");
                    while let Some(Envelope { input, reply }) = rx.recv().await {
                        let output = worker.handle(input).await;
                        if reply.send(output).is_err() {
                            tracing::trace!("requester went away before the reply");
                        }
                    }
                    tracing::debug!("compile worker stopped");
                });
            })?;
        Ok(Self {
            tx,
            next_id: AtomicU64::new(1),
        })
    }

    /// A worker with the built-in languages and engines.
    pub fn spawn_builtin(config: &Config) -> std::io::Result<Self> {
        Self::spawn(CompileWorker::builtin(config))
    }

    /// Send one message and wait for its reply.
    pub async fn request(&self, input: WorkerInput) -> Result<WorkerOutput, CompileError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Envelope { input, reply })
            .map_err(|_| CompileError::Worker {
                message: "worker has shut down".into(),
            })?;
        response.await.map_err(|_| CompileError::Worker {
            message: "worker dropped the request".into(),
        })
    }

    pub async fn clear_cache(&self) -> Result<(), CompileError> {
        match self.request(WorkerInput::ClearCache).await? {
            WorkerOutput::CacheCleared => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(output: &WorkerOutput) -> CompileError {
    CompileError::Worker {
        message: format!("unexpected reply from worker: {output:?}"),
    }
}

impl IsolatedWorker for WorkerHost {
    fn compile<'a>(
        &'a self,
        language: &'a str,
        source: &'a str,
        config: &'a Config,
    ) -> BoxFuture<'a, Result<Compiled, CompileError>> {
        Box::pin(async move {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let output = self
                .request(WorkerInput::Compile {
                    id,
                    language: language.to_owned(),
                    source: source.to_owned(),
                    config: config.clone(),
                })
                .await?;
            match output {
                WorkerOutput::Compiled {
                    id: replied,
                    result,
                    compile_ms,
                    cached,
                } if replied == id => {
                    tracing::debug!(id, %language, compile_ms, cached, "worker round trip");
                    result
                }
                other => Err(unexpected(&other)),
            }
        })
    }
}
