//! Production backend: drives a [`ModelExecutor`] through prefill,
//! sampling, and streaming, and owns the incremental prompt cache that
//! makes KV reuse across turns possible.

use tracing::{debug, warn};

use drover_core::{Config, Error, ErrorKind, Message, Result};

use crate::executor::ModelExecutor;
use crate::memory::available_memory_bytes;
use crate::sampling::SamplerChain;
use crate::template::TemplateEngine;
use crate::{find_stop_sequence, Backend, PieceCallback};

pub struct LocalBackend<E: ModelExecutor> {
    executor: E,
    sampler: Option<SamplerChain>,
    /// Forced template; `None` means the model's embedded template.
    template: Option<TemplateEngine>,
    /// Length of the rendering already covered by the KV cache.
    prev_len: usize,
    context_size: usize,
    repeat_last_n: usize,
    /// Recent token window for the repetition penalty.
    recent_tokens: Vec<i32>,
    initialized: bool,
}

impl<E: ModelExecutor> LocalBackend<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            sampler: None,
            template: None,
            prev_len: 0,
            context_size: 0,
            repeat_last_n: 0,
            recent_tokens: Vec::new(),
            initialized: false,
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.initialized {
            return Err(Error::new(ErrorKind::BackendInitFailed, "backend not initialized"));
        }
        Ok(())
    }

    fn render(&self, messages: &[Message], add_generation_prompt: bool) -> Result<String> {
        match &self.template {
            Some(engine) => {
                // The forced-template renderer appends the assistant
                // header exactly when the last message is not an
                // assistant turn, which is the generation-prompt case.
                let _ = add_generation_prompt;
                engine.render(messages)
            }
            None => self.executor.render_chat(messages, add_generation_prompt),
        }
    }

    /// Pre-load refusal when the model file alone cannot fit in
    /// available physical memory.
    fn memory_sanity_check(config: &Config) -> Result<()> {
        let Ok(meta) = std::fs::metadata(&config.model_path) else {
            // Unreadable file is reported properly by the load step.
            return Ok(());
        };
        let Some(available) = available_memory_bytes() else {
            return Ok(());
        };
        let file_size = meta.len();
        if file_size > available {
            return Err(Error::new(
                ErrorKind::BackendInitFailed,
                format!(
                    "model file ({} MB) may exceed available memory ({} MB); \
                     use a smaller quantization, reduce context_size, or set \
                     kv_cache_type_k/v to q8_0 to shrink the KV cache",
                    file_size / (1024 * 1024),
                    available / (1024 * 1024)
                ),
            )
            .with_context(config.model_path.clone()));
        }
        Ok(())
    }

    fn reset_after_oom(&mut self) {
        warn!("accelerator out of memory; resetting KV state and prompt cache");
        self.executor.clear_cache();
        self.prev_len = 0;
        self.recent_tokens.clear();
    }

    fn push_recent(&mut self, token: i32) {
        self.recent_tokens.push(token);
        if self.recent_tokens.len() > self.repeat_last_n.max(1) {
            self.recent_tokens.remove(0);
        }
    }
}

impl<E: ModelExecutor> Backend for LocalBackend<E> {
    fn initialize(&mut self, config: &Config) -> Result<()> {
        E::init_runtime()?;
        config.validate()?;
        Self::memory_sanity_check(config)?;

        self.executor.load(config)?;

        self.sampler = Some(SamplerChain::new(&config.sampling));
        self.template = config
            .prompt_template
            .map(|t| TemplateEngine::new(t, config.custom_template.clone()));
        self.context_size = config.context_size;
        self.repeat_last_n = config.sampling.repeat_last_n;
        self.prev_len = 0;
        self.recent_tokens.clear();
        self.initialized = true;

        debug!(
            model = %config.model_path,
            context_size = config.context_size,
            "backend initialized"
        );
        Ok(())
    }

    fn tokenize(&mut self, text: &str) -> Result<Vec<i32>> {
        self.ensure_initialized()?;
        let add_bos = self.executor.n_past() == 0;
        self.executor.tokenize(text, add_bos)
    }

    fn format_prompt(&mut self, messages: &[Message]) -> Result<String> {
        self.ensure_initialized()?;
        let rendered = self.render(messages, true)?;

        // A shorter rendering means history shrank (clear, prune beyond
        // what we saw, template change); the cached prefix is invalid.
        if rendered.len() < self.prev_len || !rendered.is_char_boundary(self.prev_len) {
            debug!(
                prev_len = self.prev_len,
                new_len = rendered.len(),
                "rendering shrank; clearing KV cache"
            );
            self.clear_kv_cache();
        }

        Ok(rendered[self.prev_len..].to_string())
    }

    fn finalize_response(&mut self, messages: &[Message]) {
        if !self.initialized {
            return;
        }
        // Dry re-render without the generation prompt to measure the
        // stable boundary including the assistant response.
        match self.render(messages, false) {
            Ok(rendered) if !rendered.is_empty() => self.prev_len = rendered.len(),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "finalize_response render failed; prompt cache unchanged"),
        }
    }

    fn generate(
        &mut self,
        prompt_tokens: &[i32],
        max_tokens: usize,
        stop_sequences: &[String],
        mut on_piece: Option<&mut PieceCallback<'_>>,
    ) -> Result<String> {
        self.ensure_initialized()?;

        let mut text = String::with_capacity(if max_tokens > 0 { max_tokens * 8 } else { 4096 });
        let mut token_count = 0usize;
        let mut batch: Vec<i32> = prompt_tokens.to_vec();

        loop {
            let n_ctx_used = self.executor.n_past();
            if n_ctx_used + batch.len() > self.context_size {
                return Err(Error::new(
                    ErrorKind::ContextWindowExceeded,
                    "batch tokens exceed context size",
                )
                .with_context(format!(
                    "batch_size={} n_ctx_used={} context_size={}",
                    batch.len(),
                    n_ctx_used,
                    self.context_size
                )));
            }

            if let Err(e) = self.executor.decode(&batch) {
                if e.kind() == ErrorKind::GpuOutOfMemory {
                    self.reset_after_oom();
                    return Err(Error::new(
                        ErrorKind::GpuOutOfMemory,
                        format!(
                            "{}; the inference context has been reset. Reduce context_size, \
                             use q8_0 KV cache types, or reduce n_gpu_layers",
                            e.message()
                        ),
                    ));
                }
                return Err(e);
            }

            let Some(sampler) = self.sampler.as_mut() else {
                return Err(Error::new(ErrorKind::BackendInitFailed, "sampler missing"));
            };
            let token = sampler.sample(self.executor.logits(), &self.recent_tokens);

            if self.executor.is_eog(token) {
                break;
            }
            self.push_recent(token);

            let piece = self.executor.token_to_piece(token)?;
            text.push_str(&piece);
            token_count += 1;

            if max_tokens > 0 && token_count >= max_tokens {
                if let Some(cb) = on_piece.as_mut() {
                    cb(&piece);
                }
                break;
            }

            let match_len = find_stop_sequence(&text, stop_sequences);
            if match_len > 0 {
                // The matched tail is never emitted to the sink.
                text.truncate(text.len() - match_len);
                break;
            }

            if let Some(cb) = on_piece.as_mut() {
                if !cb(&piece) {
                    debug!(tokens = token_count, "generation stopped by callback");
                    break;
                }
            }

            batch = vec![token];
        }

        Ok(text)
    }

    fn kv_cache_token_count(&self) -> usize {
        self.executor.n_past()
    }

    fn clear_kv_cache(&mut self) {
        self.executor.clear_cache();
        self.prev_len = 0;
        self.recent_tokens.clear();
    }

    fn context_size(&self) -> usize {
        self.context_size
    }

    fn training_context_size(&self) -> usize {
        self.executor.training_context_size()
    }

    fn vocab_size(&self) -> usize {
        self.executor.vocab_size()
    }
}
