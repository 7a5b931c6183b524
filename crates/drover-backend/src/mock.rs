//! Scriptable backend for tests.
//!
//! Simulates the backend contract without a model: pre-programmed
//! responses, failure injection, and counters for assertions. Streaming
//! emits the (stop-trimmed) response as a single piece.

use std::collections::VecDeque;
use std::time::Duration;

use drover_core::{Config, Error, ErrorKind, Message, Result};

use crate::{Backend, PieceCallback};

pub struct MockBackend {
    // Failure injection
    pub fail_initialize: Option<Error>,
    pub fail_tokenize: Option<Error>,
    pub fail_generate: Option<Error>,

    // State tracking for assertions
    pub initialized: bool,
    pub kv_tokens: usize,
    pub clear_kv_cache_calls: usize,
    pub generate_calls: usize,
    pub last_prompt_tokens: Vec<i32>,
    pub last_formatted_prompt: String,
    pub streamed_pieces: Vec<String>,

    // Response scripting
    pub responses: VecDeque<String>,
    pub default_response: String,

    // Introspection values
    pub context_size: usize,
    pub training_context_size: usize,
    pub vocab_size: usize,

    /// Artificial latency, for queue backpressure tests.
    pub generation_delay: Option<Duration>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            fail_initialize: None,
            fail_tokenize: None,
            fail_generate: None,
            initialized: false,
            kv_tokens: 0,
            clear_kv_cache_calls: 0,
            generate_calls: 0,
            last_prompt_tokens: Vec::new(),
            last_formatted_prompt: String::new(),
            streamed_pieces: Vec::new(),
            responses: VecDeque::new(),
            default_response: "This is a test response.".to_string(),
            context_size: 8192,
            training_context_size: 4096,
            vocab_size: 32000,
            generation_delay: None,
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response; popped in order by `generate`, falling back to
    /// `default_response` when empty.
    pub fn enqueue_response(&mut self, response: impl Into<String>) {
        self.responses.push_back(response.into());
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.enqueue_response(response);
        self
    }
}

impl Backend for MockBackend {
    fn initialize(&mut self, config: &Config) -> Result<()> {
        if let Some(err) = self.fail_initialize.take() {
            return Err(err);
        }
        self.initialized = true;
        self.context_size = config.context_size;
        Ok(())
    }

    fn tokenize(&mut self, text: &str) -> Result<Vec<i32>> {
        if let Some(err) = self.fail_tokenize.take() {
            return Err(err);
        }
        // Heuristic tokenizer: ~4 chars per token, dummy ids.
        let count = (text.len() / 4).max(1);
        Ok((0..count as i32).map(|i| 100 + i).collect())
    }

    fn format_prompt(&mut self, messages: &[Message]) -> Result<String> {
        let mut out = String::new();
        for msg in messages {
            out.push_str(msg.role.as_str());
            out.push_str(": ");
            out.push_str(&msg.content);
            out.push('\n');
        }
        self.last_formatted_prompt = out.clone();
        Ok(out)
    }

    fn finalize_response(&mut self, _messages: &[Message]) {}

    fn generate(
        &mut self,
        prompt_tokens: &[i32],
        max_tokens: usize,
        stop_sequences: &[String],
        mut on_piece: Option<&mut PieceCallback<'_>>,
    ) -> Result<String> {
        if !self.initialized {
            return Err(Error::new(ErrorKind::BackendInitFailed, "backend not initialized"));
        }
        if let Some(err) = self.fail_generate.take() {
            return Err(err);
        }
        if let Some(delay) = self.generation_delay {
            std::thread::sleep(delay);
        }

        self.generate_calls += 1;
        self.last_prompt_tokens = prompt_tokens.to_vec();
        self.kv_tokens += prompt_tokens.len();

        let mut response = self
            .responses
            .pop_front()
            .unwrap_or_else(|| self.default_response.clone());

        // Trim at the first stop-sequence occurrence before streaming;
        // the stop text itself is never emitted.
        for stop in stop_sequences {
            if stop.is_empty() {
                continue;
            }
            if let Some(pos) = response.find(stop.as_str()) {
                response.truncate(pos);
                break;
            }
        }

        if !response.is_empty() {
            if let Some(cb) = on_piece.as_mut() {
                self.streamed_pieces.push(response.clone());
                cb(&response);
            }
        }

        self.kv_tokens += (response.len() / 4).min(max_tokens);
        Ok(response)
    }

    fn kv_cache_token_count(&self) -> usize {
        self.kv_tokens
    }

    fn clear_kv_cache(&mut self) {
        self.kv_tokens = 0;
        self.clear_kv_cache_calls += 1;
    }

    fn context_size(&self) -> usize {
        self.context_size
    }

    fn training_context_size(&self) -> usize {
        self.training_context_size
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}
