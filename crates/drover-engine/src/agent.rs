//! Public agent facade.
//!
//! Owns the inference worker thread, the request queue, and the promise
//! queue that delivers completed turns back to callers. Pinned once
//! constructed: build through [`AgentBuilder`], stop through
//! [`Agent::stop`] (also run on drop).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use drover_backend::Backend;
use drover_core::{
    Config, Error, ErrorKind, Message, Request, RequestOptions, Response, Result, StreamSink,
};
use drover_memory::{ContextDatabase, Retriever};

use crate::history::{History, TokenEstimator};
use crate::pipeline::TurnPipeline;
use crate::queue::RequestQueue;
use crate::tools::{ToolHandler, ToolRegistry};

/// Completion handle for a submitted turn.
pub struct ResponseHandle {
    rx: Receiver<Result<Response>>,
}

impl ResponseHandle {
    /// Block until the turn completes.
    pub fn wait(&self) -> Result<Response> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(not_running_error()),
        }
    }

    /// Block with an upper bound; `None` means the turn is still
    /// running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Response>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(not_running_error())),
        }
    }

    fn ready(result: Result<Response>) -> Self {
        let (tx, rx) = mpsc::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

pub struct AgentBuilder {
    config: Config,
    backend: Option<Box<dyn Backend>>,
    retriever: Option<Arc<dyn Retriever>>,
    context_db: Option<Arc<ContextDatabase>>,
    estimator: Option<TokenEstimator>,
}

impl AgentBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            backend: None,
            retriever: None,
            context_db: None,
            estimator: None,
        }
    }

    /// The backend to drive. Required: the engine does not pick a
    /// transformer runtime on its own.
    pub fn backend(mut self, backend: Box<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Application-level retriever queried alongside the context
    /// database when RAG is enabled.
    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Durable archive. When unset and `config.context_db_path` is
    /// present, the builder opens it.
    pub fn context_db(mut self, db: Arc<ContextDatabase>) -> Self {
        self.context_db = Some(db);
        self
    }

    /// Replace the token-count heuristic used by history accounting.
    pub fn token_estimator(mut self, estimator: TokenEstimator) -> Self {
        self.estimator = Some(estimator);
        self
    }

    /// Validate config, initialize the backend, and spawn the worker.
    pub fn build(self) -> Result<Agent> {
        let AgentBuilder {
            config,
            backend,
            retriever,
            context_db,
            estimator,
        } = self;

        config.validate()?;

        let mut backend = backend.ok_or_else(|| {
            Error::new(ErrorKind::InvalidConfig, "a backend is required to build an agent")
        })?;
        backend.initialize(&config)?;

        let context_db = match (context_db, &config.context_db_path) {
            (Some(db), _) => Some(db),
            (None, Some(path)) => Some(Arc::new(ContextDatabase::open(path)?)),
            (None, None) => None,
        };

        let mut history = History::with_estimator(
            config.context_size,
            estimator,
            config.template_overhead_tokens,
        );
        if let Some(prompt) = &config.system_prompt {
            history.set_system_prompt(prompt.clone());
        }
        let history = Arc::new(Mutex::new(history));

        let queue = Arc::new(RequestQueue::new(config.queue_capacity));
        let promises: Arc<Mutex<VecDeque<Sender<Result<Response>>>>> =
            Arc::new(Mutex::new(VecDeque::new()));
        let registry = Arc::new(ToolRegistry::new());
        let cancelled = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));

        let mut pipeline = TurnPipeline::new(
            backend,
            Arc::clone(&history),
            Arc::clone(&registry),
            retriever,
            context_db.clone(),
            config.clone(),
            Arc::clone(&cancelled),
        );

        let worker = {
            let queue = Arc::clone(&queue);
            let promises = Arc::clone(&promises);
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("drover-inference".into())
                .spawn(move || {
                    worker_loop(&mut pipeline, &queue, &promises, &running);
                })
                .map_err(|e| {
                    Error::new(ErrorKind::BackendInitFailed, format!("failed to spawn worker: {e}"))
                })?
        };

        info!(context_size = config.context_size, "agent started");

        Ok(Agent {
            config,
            queue,
            promises,
            registry,
            history,
            context_db,
            cancelled,
            running,
            worker: Mutex::new(Some(worker)),
        })
    }
}

/// Thread-safe agent handle. `submit` may be called from any thread;
/// exactly one worker thread performs inference.
pub struct Agent {
    config: Config,
    queue: Arc<RequestQueue<Request>>,
    promises: Arc<Mutex<VecDeque<Sender<Result<Response>>>>>,
    registry: Arc<ToolRegistry>,
    history: Arc<Mutex<History>>,
    context_db: Option<Arc<ContextDatabase>>,
    cancelled: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    pub fn builder(config: Config) -> AgentBuilder {
        AgentBuilder::new(config)
    }

    /// Submit a chat message; per-request options default from config.
    pub fn submit(&self, message: Message, sink: Option<StreamSink>) -> ResponseHandle {
        let options = RequestOptions {
            rag: self.config.rag,
        };
        self.submit_with_options(message, options, sink)
    }

    /// Submit with explicit options.
    ///
    /// The streaming sink runs on the inference thread. Tool handlers
    /// also run there; a handler that (indirectly) submits a new request
    /// and waits on it will deadlock the worker.
    pub fn submit_with_options(
        &self,
        message: Message,
        options: RequestOptions,
        sink: Option<StreamSink>,
    ) -> ResponseHandle {
        if !self.running.load(Ordering::Acquire) {
            return ResponseHandle::ready(Err(not_running_error()));
        }

        let mut request = Request::new(message).with_options(options);
        request.sink = sink;

        // Push the request before enqueuing its promise: the worker may
        // only see a promise whose request is already visible.
        if !self.queue.push(request) {
            return ResponseHandle::ready(Err(Error::new(
                ErrorKind::QueueFull,
                "request queue is full or agent is shutting down",
            )));
        }

        let (tx, rx) = mpsc::channel();
        self.promises.lock().unwrap().push_back(tx);
        ResponseHandle { rx }
    }

    /// Replace or set the system prompt. Thread-safe.
    pub fn set_system_prompt(&self, prompt: impl Into<String>) {
        self.history.lock().unwrap().set_system_prompt(prompt);
    }

    /// Snapshot of the conversation history.
    pub fn history(&self) -> Vec<Message> {
        self.history.lock().unwrap().snapshot()
    }

    /// Clear the conversation. The backend notices the shrunken
    /// rendering on the next turn and drops its KV cache.
    pub fn clear_history(&self) {
        self.history.lock().unwrap().clear();
    }

    pub fn estimated_history_tokens(&self) -> usize {
        self.history.lock().unwrap().estimated_tokens()
    }

    /// Register a local tool available to the model.
    pub fn register_tool(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: serde_json::Value,
        handler: ToolHandler,
    ) {
        self.registry.register_tool(name, description, schema, handler);
    }

    /// The shared tool registry (MCP clients register through this).
    pub fn tool_registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn context_db(&self) -> Option<&Arc<ContextDatabase>> {
        self.context_db.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Graceful shutdown: refuse new work, cancel the in-flight turn at
    /// its next safe boundary, join the worker. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        debug!("stopping agent");
        self.cancelled.store(true, Ordering::Release);
        self.queue.shutdown();
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
        info!("agent stopped");
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    pipeline: &mut TurnPipeline,
    queue: &RequestQueue<Request>,
    promises: &Mutex<VecDeque<Sender<Result<Response>>>>,
    running: &AtomicBool,
) {
    while running.load(Ordering::Acquire) {
        let Some(request) = queue.pop() else {
            break; // queue shut down and drained
        };

        // submit() pushes the request before its promise, so the sender
        // for this request is either queued already or about to be;
        // yield until it shows up (or shutdown wins).
        let sender = loop {
            if let Some(tx) = promises.lock().unwrap().pop_front() {
                break Some(tx);
            }
            if !running.load(Ordering::Acquire) {
                break None;
            }
            std::thread::yield_now();
        };

        let result = pipeline.process_request(request);

        // Fatal errors take the whole agent down: refuse further work
        // before the caller even sees the result, then fall through to
        // the drain below.
        let fatal = result.as_ref().err().map(|e| e.is_fatal()).unwrap_or(false);
        if fatal {
            if let Err(e) = &result {
                warn!(error = %e, "fatal turn error; stopping agent");
            }
            running.store(false, Ordering::Release);
            queue.shutdown();
        }

        if let Some(tx) = sender {
            let _ = tx.send(result);
        }
        if fatal {
            break;
        }
    }

    // Fulfil every remaining promise so no caller blocks forever.
    let mut remaining = promises.lock().unwrap();
    while let Some(tx) = remaining.pop_front() {
        let _ = tx.send(Err(Error::new(
            ErrorKind::AgentNotRunning,
            "agent stopped before the request could be processed",
        )));
    }
}

fn not_running_error() -> Error {
    Error::new(ErrorKind::AgentNotRunning, "agent is not running")
}
