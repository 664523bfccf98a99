//! Worker pool and dispatch
//!
//! Long-lived inference workers run on dedicated blocking threads and are fed
//! through channels. Every dispatch gets a monotonically increasing
//! correlation id tracked in a pending map and settled exactly once: by the
//! matching response, by a wall-clock timeout, or by worker failure. Failed
//! workers reject everything in flight and are recreated after a short
//! backoff. Profiles without worker capability get an in-process handle that
//! honors the same dispatch/timeout contract.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::inference::{InferenceBackend, ModelInfo, NamedTensors};
use crate::{Error, Result};

/// Default wall-clock timeout for a dispatch
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout class for large one-shot calls such as model loading
pub const LONG_DISPATCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Backoff before recreating a failed worker
const RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// What a worker is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    /// Wake word cascade stages
    WakeWord,
    /// Voice activity detection
    Vad,
}

impl WorkerKind {
    /// Short name for logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WakeWord => "wake-word",
            Self::Vad => "vad",
        }
    }
}

/// Request sent to a worker — closed set, exhaustively matched
#[derive(Debug)]
pub enum InferenceRequest {
    /// Load a model blob and return its declared shapes
    LoadModel {
        /// Model identifier
        id: String,
        /// Path to the model blob
        path: PathBuf,
    },
    /// Run a loaded model with named inputs
    Run {
        /// Model identifier
        model: String,
        /// Named input tensors
        inputs: NamedTensors,
    },
    /// Round-trip probe with trivial compute
    Ping,
}

/// Response from a worker — closed set, exhaustively matched
#[derive(Debug)]
pub enum InferenceResponse {
    /// Model loaded; shapes negotiated
    Loaded(ModelInfo),
    /// Named output tensors
    Outputs(NamedTensors),
    /// Ping reply
    Pong,
}

/// Per-worker options
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Run on a dedicated worker thread; false yields an in-process handle
    pub use_worker: bool,
    /// Recreate the worker after failure
    pub auto_restart: bool,
    /// Backoff before recreation
    pub restart_backoff: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            use_worker: true,
            auto_restart: true,
            restart_backoff: RESTART_BACKOFF,
        }
    }
}

type Settle = oneshot::Sender<Result<InferenceResponse>>;
type Pending = Arc<Mutex<HashMap<u64, Settle>>>;

struct Job {
    id: u64,
    request: InferenceRequest,
}

struct WorkerEntry {
    tx: mpsc::UnboundedSender<Job>,
    pending: Pending,
    generation: u32,
}

/// Cheap reference to a created worker
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    name: String,
    kind: WorkerKind,
    inline: bool,
}

impl WorkerHandle {
    /// Worker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Worker kind
    #[must_use]
    pub const fn kind(&self) -> WorkerKind {
        self.kind
    }

    /// Whether dispatches run in-process instead of on a worker thread
    #[must_use]
    pub const fn is_inline(&self) -> bool {
        self.inline
    }
}

struct Inner {
    backend: Arc<dyn InferenceBackend>,
    workers: Mutex<HashMap<String, WorkerEntry>>,
    next_id: AtomicU64,
}

/// Maintains the pool of long-lived inference workers
#[derive(Clone)]
pub struct WorkerOrchestrator {
    inner: Arc<Inner>,
}

impl WorkerOrchestrator {
    /// Create an orchestrator over an inference backend
    #[must_use]
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                workers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Create a worker (or an in-process fallback handle)
    ///
    /// Creating a worker under a name that already exists replaces the old
    /// worker; its in-flight dispatches are cancelled. This holds for the
    /// in-process path too: asking for an inline handle tears down any
    /// dedicated worker of that name so it cannot keep serving stale handles.
    #[must_use]
    pub fn create_worker(&self, name: &str, kind: WorkerKind, options: WorkerOptions) -> WorkerHandle {
        if !options.use_worker {
            self.remove_worker(name);
            tracing::debug!(name, kind = kind.as_str(), "created in-process handle");
            return WorkerHandle {
                name: name.to_string(),
                kind,
                inline: true,
            };
        }

        self.remove_worker(name);
        spawn_worker(&self.inner, name, kind, options, 0);
        tracing::debug!(name, kind = kind.as_str(), "worker created");

        WorkerHandle {
            name: name.to_string(),
            kind,
            inline: false,
        }
    }

    /// Dispatch a request and await its settlement
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] when no response arrives within `timeout`
    /// - [`Error::Worker`] when the worker fails with the dispatch in flight
    /// - [`Error::Cancelled`] when the session flushes pending dispatches
    /// - any error the request itself produced
    pub async fn dispatch(
        &self,
        handle: &WorkerHandle,
        request: InferenceRequest,
        timeout: Duration,
    ) -> Result<InferenceResponse> {
        if handle.inline {
            return self.dispatch_inline(request, timeout).await;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (settle_tx, settle_rx) = oneshot::channel();

        let (job_tx, pending) = {
            let workers = self
                .inner
                .workers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let entry = workers
                .get(&handle.name)
                .ok_or_else(|| Error::Worker(format!("no worker named '{}'", handle.name)))?;
            (entry.tx.clone(), Arc::clone(&entry.pending))
        };

        pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id, settle_tx);

        if job_tx.send(Job { id, request }).is_err() {
            pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .remove(&id);
            return Err(Error::Worker(format!(
                "worker '{}' is not accepting dispatches",
                handle.name
            )));
        }

        match tokio::time::timeout(timeout, settle_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Worker(format!(
                "worker '{}' dropped an in-flight dispatch",
                handle.name
            ))),
            Err(_) => {
                // Settle exactly once: pull our entry so a late response is
                // discarded by the worker loop.
                pending
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .remove(&id);
                tracing::warn!(worker = %handle.name, id, ?timeout, "dispatch timed out");
                Err(Error::Timeout(timeout))
            }
        }
    }

    async fn dispatch_inline(
        &self,
        request: InferenceRequest,
        timeout: Duration,
    ) -> Result<InferenceResponse> {
        let backend = Arc::clone(&self.inner.backend);
        let task = tokio::task::spawn_blocking(move || execute(backend.as_ref(), request));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(Error::Worker(format!("in-process inference panicked: {join}"))),
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    /// Settle every pending dispatch of a worker as cancelled
    pub fn cancel_pending(&self, handle: &WorkerHandle) {
        if handle.inline {
            return;
        }
        let pending = {
            let workers = self
                .inner
                .workers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            workers.get(&handle.name).map(|e| Arc::clone(&e.pending))
        };
        if let Some(pending) = pending {
            let drained: Vec<Settle> = pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .drain()
                .map(|(_, s)| s)
                .collect();
            let count = drained.len();
            for settle in drained {
                let _ = settle.send(Err(Error::Cancelled));
            }
            if count > 0 {
                tracing::debug!(worker = %handle.name, count, "cancelled pending dispatches");
            }
        }
    }

    /// Tear down a worker, cancelling anything in flight
    pub fn remove_worker(&self, name: &str) {
        let entry = self
            .inner
            .workers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(name);
        if let Some(entry) = entry {
            let drained: Vec<Settle> = entry
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .drain()
                .map(|(_, s)| s)
                .collect();
            for settle in drained {
                let _ = settle.send(Err(Error::Cancelled));
            }
            // Dropping the sender ends the worker loop
            drop(entry.tx);
            tracing::debug!(name, "worker removed");
        }
    }

    /// Tear down every worker
    pub fn shutdown(&self) {
        let names: Vec<String> = self
            .inner
            .workers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        for name in names {
            self.remove_worker(&name);
        }
    }

    /// Number of live workers
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.inner
            .workers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Generation counter of a worker (increments on restart)
    #[must_use]
    pub fn worker_generation(&self, name: &str) -> Option<u32> {
        self.inner
            .workers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(name)
            .map(|e| e.generation)
    }
}

/// Run one request against the backend — shared by worker loops and the
/// in-process path
fn execute(backend: &dyn InferenceBackend, request: InferenceRequest) -> Result<InferenceResponse> {
    match request {
        InferenceRequest::LoadModel { id, path } => {
            backend.load(&id, &path).map(InferenceResponse::Loaded)
        }
        InferenceRequest::Run { model, inputs } => {
            backend.run(&model, inputs).map(InferenceResponse::Outputs)
        }
        InferenceRequest::Ping => Ok(InferenceResponse::Pong),
    }
}

fn spawn_worker(
    inner: &Arc<Inner>,
    name: &str,
    kind: WorkerKind,
    options: WorkerOptions,
    generation: u32,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

    let backend = Arc::clone(&inner.backend);
    let loop_pending = Arc::clone(&pending);
    let worker = tokio::task::spawn_blocking(move || {
        while let Some(job) = rx.blocking_recv() {
            let result = execute(backend.as_ref(), job.request);
            let settle = loop_pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .remove(&job.id);
            if let Some(settle) = settle {
                // Receiver may have timed out; a failed send is fine
                let _ = settle.send(result);
            }
        }
    });

    inner
        .workers
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .insert(
            name.to_string(),
            WorkerEntry {
                tx,
                pending: Arc::clone(&pending),
                generation,
            },
        );

    // Supervisor: on abnormal exit, reject in-flight dispatches and recreate
    // after backoff.
    let supervisor_inner = Arc::downgrade(inner);
    let supervisor_name = name.to_string();
    tokio::spawn(async move {
        let failed = match worker.await {
            Ok(()) => false,
            Err(join) => {
                tracing::error!(
                    worker = %supervisor_name,
                    error = %join,
                    "worker failed"
                );
                true
            }
        };
        if !failed {
            return;
        }

        let drained: Vec<Settle> = pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .drain()
            .map(|(_, s)| s)
            .collect();
        for settle in drained {
            let _ = settle.send(Err(Error::Worker(format!(
                "worker '{supervisor_name}' failed"
            ))));
        }

        if !options.auto_restart {
            tracing::warn!(worker = %supervisor_name, "auto-restart disabled, worker stays down");
            if let Some(inner) = supervisor_inner.upgrade() {
                inner
                    .workers
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .remove(&supervisor_name);
            }
            return;
        }

        tokio::time::sleep(options.restart_backoff).await;
        let Some(inner) = supervisor_inner.upgrade() else {
            return; // orchestrator gone, nothing to recreate
        };
        // Only recreate if the entry is still ours (not removed or replaced)
        let still_current = inner
            .workers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&supervisor_name)
            .is_some_and(|e| e.generation == generation);
        if still_current {
            tracing::info!(worker = %supervisor_name, generation = generation + 1, "restarting worker");
            spawn_worker(&inner, &supervisor_name, kind, options, generation + 1);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PingOnlyBackend;

    impl InferenceBackend for PingOnlyBackend {
        fn load(&self, id: &str, _path: &std::path::Path) -> Result<ModelInfo> {
            Err(Error::Model(format!("no such model '{id}'")))
        }

        fn model_info(&self, _id: &str) -> Option<ModelInfo> {
            None
        }

        fn run(&self, id: &str, _inputs: NamedTensors) -> Result<NamedTensors> {
            Err(Error::NotInitialized(format!("model '{id}' not loaded")))
        }
    }

    #[tokio::test]
    async fn ping_round_trips_through_worker() {
        let orchestrator = WorkerOrchestrator::new(Arc::new(PingOnlyBackend));
        let handle = orchestrator.create_worker("test", WorkerKind::WakeWord, WorkerOptions::default());

        let response = orchestrator
            .dispatch(&handle, InferenceRequest::Ping, DEFAULT_DISPATCH_TIMEOUT)
            .await
            .unwrap();
        assert!(matches!(response, InferenceResponse::Pong));
    }

    #[tokio::test]
    async fn inline_handle_honors_the_same_contract() {
        let orchestrator = WorkerOrchestrator::new(Arc::new(PingOnlyBackend));
        let options = WorkerOptions {
            use_worker: false,
            ..WorkerOptions::default()
        };
        let handle = orchestrator.create_worker("inline", WorkerKind::Vad, options);
        assert!(handle.is_inline());

        let response = orchestrator
            .dispatch(&handle, InferenceRequest::Ping, DEFAULT_DISPATCH_TIMEOUT)
            .await
            .unwrap();
        assert!(matches!(response, InferenceResponse::Pong));
    }

    #[tokio::test]
    async fn request_errors_propagate_to_the_caller() {
        let orchestrator = WorkerOrchestrator::new(Arc::new(PingOnlyBackend));
        let handle = orchestrator.create_worker("test", WorkerKind::WakeWord, WorkerOptions::default());

        let result = orchestrator
            .dispatch(
                &handle,
                InferenceRequest::Run {
                    model: "missing".to_string(),
                    inputs: Vec::new(),
                },
                DEFAULT_DISPATCH_TIMEOUT,
            )
            .await;
        assert!(matches!(result, Err(Error::NotInitialized(_))));
    }

    #[tokio::test]
    async fn dispatch_to_removed_worker_is_a_worker_error() {
        let orchestrator = WorkerOrchestrator::new(Arc::new(PingOnlyBackend));
        let handle = orchestrator.create_worker("test", WorkerKind::WakeWord, WorkerOptions::default());
        orchestrator.remove_worker("test");

        let result = orchestrator
            .dispatch(&handle, InferenceRequest::Ping, DEFAULT_DISPATCH_TIMEOUT)
            .await;
        assert!(matches!(result, Err(Error::Worker(_))));
    }
}
