//! Backend capability layer: the contract between the agent engine and a
//! local transformer implementation.
//!
//! The tensor library itself stays behind the [`ModelExecutor`] seam.
//! Everything this engine needs from it (incremental prompt formatting
//! with KV reuse, streaming generation with stop-sequence trimming,
//! sampling, memory sanity) lives here and is exercised by tests with a
//! scripted executor.

pub mod executor;
pub mod gguf;
pub mod local;
pub mod memory;
pub mod mock;
pub mod sampling;
pub mod template;

pub use executor::ModelExecutor;
pub use gguf::{read_gguf_metadata, GgufInfo};
pub use local::LocalBackend;
pub use memory::{available_memory_bytes, estimate_memory, MemoryEstimate};
pub use mock::MockBackend;
pub use sampling::SamplerChain;
pub use template::TemplateEngine;

use drover_core::{Config, Message, Result};

/// Callback fired once per generated UTF-8 piece. Returning `false` asks
/// the backend to stop generation at the next token boundary.
pub type PieceCallback<'a> = dyn FnMut(&str) -> bool + 'a;

/// The backend capability contract.
///
/// One worker thread calls these methods serially; implementations are
/// stateful (KV cache, prompt cache) and are not reentrant.
pub trait Backend: Send {
    /// Validate config, check memory, load the model, build the sampler.
    fn initialize(&mut self, config: &Config) -> Result<()>;

    /// Deterministic tokenization. A beginning-of-sequence token is added
    /// iff this is the first call since the KV state was reset.
    fn tokenize(&mut self, text: &str) -> Result<Vec<i32>>;

    /// Render the full conversation with a generation prompt appended and
    /// return only the suffix added since the previous call. If the new
    /// rendering is shorter than the previous one, the KV cache is
    /// cleared and the whole rendering is returned.
    fn format_prompt(&mut self, messages: &[Message]) -> Result<String>;

    /// Re-render without the generation prompt to move the prompt-cache
    /// boundary past the assistant response. Call after appending the
    /// assistant message to history.
    fn finalize_response(&mut self, messages: &[Message]);

    /// Prefill `prompt_tokens`, then sample and stream tokens until an
    /// end-of-generation token, a stop sequence (trimmed, not emitted),
    /// `max_tokens`, or the callback returns `false`.
    fn generate(
        &mut self,
        prompt_tokens: &[i32],
        max_tokens: usize,
        stop_sequences: &[String],
        on_piece: Option<&mut PieceCallback<'_>>,
    ) -> Result<String>;

    /// Number of tokens currently held in the KV cache.
    fn kv_cache_token_count(&self) -> usize;

    /// Drop all cached tokens; the next generation re-evaluates from
    /// scratch.
    fn clear_kv_cache(&mut self);

    fn context_size(&self) -> usize;

    /// Context length the model was trained with (0 if unknown).
    fn training_context_size(&self) -> usize;

    fn vocab_size(&self) -> usize;
}

/// Locate the longest stop-sequence match at the tail of `text`.
/// Returns the matched length, or 0 when no stop sequence terminates the
/// text.
pub(crate) fn find_stop_sequence(text: &str, stop_sequences: &[String]) -> usize {
    for stop in stop_sequences {
        if !stop.is_empty() && text.ends_with(stop.as_str()) {
            return stop.len();
        }
    }
    0
}
