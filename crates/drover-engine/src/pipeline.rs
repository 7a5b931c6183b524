//! The agentic turn pipeline.
//!
//! Runs on the inference thread. One request flows through: history
//! append → retrieved-context injection → pruning with archival →
//! incremental prompt formatting → tokenize → streaming generation →
//! tool parse/validate/execute loop → finalize → metrics.
//!
//! The history lock is held only around mutations and snapshots, never
//! across generation. Ephemeral context (retrieved chunks, tool-retry
//! notes) lives in the turn's scratch message list and is never
//! persisted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::json;
use tracing::{debug, info, warn};

use drover_backend::Backend;
use drover_core::{
    Config, Error, ErrorKind, Message, RagChunk, Request, Response, Result, TokenUsage,
    TurnMetrics,
};
use drover_memory::{ContextDatabase, RagQuery, Retriever};

use crate::history::History;
use crate::recovery::ErrorRecovery;
use crate::tools::{parse_tool_call, ToolRegistry};

pub struct TurnPipeline {
    backend: Box<dyn Backend>,
    history: Arc<Mutex<History>>,
    registry: Arc<ToolRegistry>,
    retriever: Option<Arc<dyn Retriever>>,
    context_db: Option<Arc<ContextDatabase>>,
    recovery: ErrorRecovery,
    config: Config,
    cancelled: Arc<AtomicBool>,
}

impl TurnPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Box<dyn Backend>,
        history: Arc<Mutex<History>>,
        registry: Arc<ToolRegistry>,
        retriever: Option<Arc<dyn Retriever>>,
        context_db: Option<Arc<ContextDatabase>>,
        config: Config,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        let recovery = ErrorRecovery::new(config.max_tool_retries);
        Self {
            backend,
            history,
            registry,
            retriever,
            context_db,
            recovery,
            config,
            cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Process one request end to end. Any failure after the user
    /// message was appended rolls this turn's messages back out of
    /// history before surfacing the error.
    pub fn process_request(&mut self, request: Request) -> Result<Response> {
        if self.is_cancelled() {
            return Err(cancelled_error());
        }

        let started = Instant::now();
        let Request {
            message,
            options,
            mut sink,
        } = request;
        let user_text = message.content.clone();

        let mut pruned: Vec<Message> = Vec::new();
        let mut rag_chunks: Vec<RagChunk> = Vec::new();
        let mut persisted_this_turn = 0usize;

        // History mutation phase, under the lock: append, retrieve,
        // prune, snapshot. The lock is released before any backend work.
        let mut scratch: Vec<Message> = {
            let mut history = self.history.lock().unwrap();
            history.add_message(message)?;
            persisted_this_turn += 1;

            if options.rag.enabled {
                rag_chunks = self.collect_rag_chunks(&user_text, options.rag.top_k);
            }

            if history.is_context_exceeded() {
                let target =
                    (history.context_size() as f64 * self.config.prune_target_ratio) as usize;
                pruned =
                    history.prune_oldest_messages_until(target, self.config.min_messages_to_keep);
            }

            history.snapshot()
        };

        if !rag_chunks.is_empty() {
            debug!(chunks = rag_chunks.len(), "injecting retrieved context");
            scratch.push(build_context_message(&rag_chunks));
        }

        let mut tool_iterations = 0usize;
        let mut prompt_tokens_total = 0usize;
        let mut completion_tokens = 0usize;
        let mut first_piece_at: Option<Instant> = None;

        let generated = loop {
            let prompt = match self.backend.format_prompt(&scratch) {
                Ok(prompt) => prompt,
                Err(e) => return Err(self.rollback(persisted_this_turn, e)),
            };

            let tokens = match self.backend.tokenize(&prompt) {
                Ok(tokens) => tokens,
                Err(e) => return Err(self.rollback(persisted_this_turn, e)),
            };
            prompt_tokens_total += tokens.len();

            // Keep the heuristic estimate calibrated against reality.
            {
                let mut history = self.history.lock().unwrap();
                history.sync_token_estimate(self.backend.kv_cache_token_count() + tokens.len());
            }

            let cancelled = Arc::clone(&self.cancelled);
            let mut on_piece = |piece: &str| -> bool {
                if cancelled.load(Ordering::Acquire) {
                    return false;
                }
                if first_piece_at.is_none() {
                    first_piece_at = Some(Instant::now());
                }
                completion_tokens += 1;
                if let Some(cb) = sink.as_mut() {
                    cb(piece);
                }
                true
            };

            let text = match self.backend.generate(
                &tokens,
                self.config.max_tokens,
                &self.config.stop_sequences,
                Some(&mut on_piece),
            ) {
                Ok(text) => text,
                Err(e) => return Err(self.rollback(persisted_this_turn, e)),
            };

            if self.is_cancelled() {
                return Err(self.rollback(persisted_this_turn, cancelled_error()));
            }

            // Tool phase: a parseable call enters validation even when
            // the tool is unknown, so the model gets a chance to correct
            // the name.
            let Some(call) = parse_tool_call(&text) else {
                break text;
            };

            if let Some(validation_error) = self.recovery.validate_args(&call, &self.registry) {
                if self.recovery.can_retry(&call.name) {
                    self.recovery.record_retry(&call.name);
                    scratch.push(ErrorRecovery::retry_message(&call.name, &validation_error));
                    continue;
                }
                warn!(
                    tool = %call.name,
                    error = %validation_error,
                    "tool retries exhausted; finalizing with raw output"
                );
                break text;
            }

            if tool_iterations >= self.config.max_tool_iterations {
                warn!(
                    max_iterations = self.config.max_tool_iterations,
                    "tool iteration cap reached; finalizing with raw output"
                );
                break text;
            }
            tool_iterations += 1;

            let Some(spec) = self.registry.get(&call.name) else {
                break text;
            };
            debug!(tool = %call.name, iteration = tool_iterations, "executing tool");
            let result_content = match (spec.handler)(&call.arguments) {
                Ok(value) => value.to_string(),
                Err(e) => json!({ "error": e.to_string() }).to_string(),
            };

            let assistant_msg = Message::assistant(text);
            let tool_msg = Message::tool(result_content, call.name.clone(), call.id.clone());

            let mut append_error = None;
            {
                let mut history = self.history.lock().unwrap();
                match history.add_message(assistant_msg.clone()) {
                    Ok(()) => {
                        persisted_this_turn += 1;
                        match history.add_message(tool_msg.clone()) {
                            Ok(()) => persisted_this_turn += 1,
                            Err(e) => append_error = Some(e),
                        }
                    }
                    Err(e) => append_error = Some(e),
                }
            }
            if let Some(e) = append_error {
                return Err(self.rollback(persisted_this_turn, e));
            }

            scratch.push(assistant_msg);
            scratch.push(tool_msg);
        };

        let ended = Instant::now();

        // Finalize: persist the assistant message and move the backend's
        // prompt-cache boundary past it.
        {
            let mut history = self.history.lock().unwrap();
            if let Err(e) = history.add_message(Message::assistant(generated.clone())) {
                drop(history);
                return Err(self.rollback(persisted_this_turn, e));
            }
            let snapshot = history.snapshot();
            self.backend.finalize_response(&snapshot);
        }

        // Durable archival of what pruning removed, now that the turn
        // has committed.
        if !pruned.is_empty() {
            if let Some(db) = &self.context_db {
                match db.add_messages(&pruned, Some("conversation")) {
                    Ok(()) => info!(archived = pruned.len(), "archived pruned messages"),
                    Err(e) => warn!(error = %e, "failed to archive pruned messages"),
                }
            }
        }

        let latency = ended.duration_since(started);
        let time_to_first_token = first_piece_at
            .map(|t| t.duration_since(started))
            .unwrap_or(latency);
        let tokens_per_second = match first_piece_at {
            Some(first) => {
                let generation_secs = ended.duration_since(first).as_secs_f64();
                if generation_secs > 0.0 {
                    completion_tokens as f64 / generation_secs
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        self.recovery.reset();

        Ok(Response {
            text: generated,
            usage: TokenUsage {
                prompt_tokens: prompt_tokens_total,
                completion_tokens,
                total_tokens: prompt_tokens_total + completion_tokens,
            },
            metrics: TurnMetrics {
                latency_ms: latency.as_millis() as u64,
                time_to_first_token_ms: time_to_first_token.as_millis() as u64,
                tokens_per_second,
            },
            rag_chunks,
        })
    }

    fn collect_rag_chunks(&self, query_text: &str, top_k: usize) -> Vec<RagChunk> {
        let query = RagQuery::new(query_text, top_k);
        let mut chunks = Vec::new();

        if let Some(retriever) = &self.retriever {
            match retriever.retrieve(&query) {
                Ok(mut found) => chunks.append(&mut found),
                Err(e) => warn!(error = %e, "application retriever failed"),
            }
        }
        if let Some(db) = &self.context_db {
            match db.retrieve(&query) {
                Ok(mut found) => chunks.append(&mut found),
                Err(e) => warn!(error = %e, "context database retrieval failed"),
            }
        }
        chunks
    }

    /// Remove every message this turn persisted, newest first, and
    /// clear retry state. Returns the error unchanged for `return Err`.
    fn rollback(&mut self, count: usize, error: Error) -> Error {
        if error.kind() != ErrorKind::RequestCancelled {
            warn!(error = %error, rolled_back = count, "turn failed; rolling back");
        }
        let mut history = self.history.lock().unwrap();
        for _ in 0..count {
            if !history.remove_last_message() {
                break;
            }
        }
        drop(history);
        self.recovery.reset();
        error
    }
}

fn cancelled_error() -> Error {
    Error::new(ErrorKind::RequestCancelled, "request cancelled")
}

/// Ephemeral system message carrying retrieved context into the prompt.
fn build_context_message(chunks: &[RagChunk]) -> Message {
    let mut content = String::from("Retrieved Context");
    for chunk in chunks {
        content.push('\n');
        content.push_str(&chunk.id);
        content.push_str(": ");
        content.push_str(&chunk.content);
    }
    Message::system(content)
}
