//! The opaque transformer seam.
//!
//! [`LocalBackend`](crate::LocalBackend) is generic over this trait;
//! a production executor wraps a GGUF tensor runtime, tests use a
//! scripted implementation. The engine never touches tensors directly.

use drover_core::{Config, Message, Result};

/// Minimal capability set a transformer runtime must provide.
///
/// All methods are called from the single inference thread. `decode`
/// advances the runtime's KV state; `logits` exposes the distribution
/// for the last decoded position.
pub trait ModelExecutor: Send {
    /// Process-global runtime initialization (device discovery, kernel
    /// registration). Called by the backend before `load`; must be
    /// idempotent.
    fn init_runtime() -> Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }

    /// Load the model file and create an inference context of
    /// `config.context_size` tokens with the configured KV cache types.
    fn load(&mut self, config: &Config) -> Result<()>;

    /// Evaluate a batch of tokens, extending the KV state.
    ///
    /// Accelerator out-of-memory must surface as a
    /// [`GpuOutOfMemory`](drover_core::ErrorKind::GpuOutOfMemory) error
    /// value; after returning it the executor's cache state is considered
    /// corrupt and the backend performs a full reset.
    fn decode(&mut self, tokens: &[i32]) -> Result<()>;

    /// Logits over the vocabulary for the last decoded position.
    fn logits(&self) -> &[f32];

    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<i32>>;

    fn token_to_piece(&self, token: i32) -> Result<String>;

    /// End-of-generation token (EOS/EOT) detection.
    fn is_eog(&self, token: i32) -> bool;

    /// Number of positions currently held in the KV state.
    fn n_past(&self) -> usize;

    /// Drop the KV state entirely.
    fn clear_cache(&mut self);

    /// Render the conversation with the model's embedded chat template.
    fn render_chat(&self, messages: &[Message], add_generation_prompt: bool) -> Result<String>;

    fn vocab_size(&self) -> usize;

    /// Training context length from model metadata (0 if unknown).
    fn training_context_size(&self) -> usize;
}
