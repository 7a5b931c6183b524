use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};

/// Chat template overhead added per message to the token estimate
/// (role markers, BOS/EOS, turn separators). ~6-10 for most models.
pub const DEFAULT_TEMPLATE_OVERHEAD_TOKENS: usize = 8;

/// Forced prompt template. When unset, the backend renders with the
/// model's embedded chat template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptTemplate {
    Llama3,
    ChatML,
    Custom,
}

/// KV cache element type, used both for backend context creation and
/// pre-load memory estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KvCacheType {
    F32,
    F16,
    Q8_0,
    Q4_0,
    Q4_1,
}

impl KvCacheType {
    /// Approximate bytes per cached element (quantized types amortize
    /// block overhead).
    pub fn bytes_per_element(&self) -> f64 {
        match self {
            KvCacheType::F32 => 4.0,
            KvCacheType::F16 => 2.0,
            KvCacheType::Q8_0 => 1.0,
            KvCacheType::Q4_0 => 0.5,
            KvCacheType::Q4_1 => 0.5,
        }
    }
}

/// Sampling parameters for the backend sampler chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,
    /// Window of recent tokens the repetition penalty looks at.
    #[serde(default = "default_repeat_last_n")]
    pub repeat_last_n: usize,
    /// Negative = seed from entropy.
    #[serde(default = "default_seed")]
    pub seed: i64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_k: default_top_k(),
            top_p: default_top_p(),
            repeat_penalty: default_repeat_penalty(),
            repeat_last_n: default_repeat_last_n(),
            seed: default_seed(),
        }
    }
}

/// Retrieval-augmented generation settings (per request, defaulted from
/// the agent config).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RagSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_rag_top_k")]
    pub top_k: usize,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            top_k: default_rag_top_k(),
        }
    }
}

/// Top-level engine configuration (drover.toml + DROVER_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to a .gguf model file.
    pub model_path: String,
    /// Inference context window in tokens.
    #[serde(default = "default_context_size")]
    pub context_size: usize,
    /// Hard cap on generated tokens per turn.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    /// Force a prompt template instead of the model's embedded one.
    #[serde(default)]
    pub prompt_template: Option<PromptTemplate>,
    /// Template string for `PromptTemplate::Custom` ({{role}}, {{content}}).
    #[serde(default)]
    pub custom_template: Option<String>,
    #[serde(default = "default_n_gpu_layers")]
    pub n_gpu_layers: i32,
    #[serde(default = "default_true")]
    pub use_mmap: bool,
    #[serde(default)]
    pub use_mlock: bool,
    #[serde(default = "default_kv_type")]
    pub kv_cache_type_k: KvCacheType,
    #[serde(default = "default_kv_type")]
    pub kv_cache_type_v: KvCacheType,
    /// Request queue capacity (0 = unbounded).
    #[serde(default)]
    pub queue_capacity: usize,
    #[serde(default)]
    pub sampling: SamplingParams,
    #[serde(default)]
    pub rag: RagSettings,
    /// Prune history down to this share of the context window when the
    /// estimate overflows.
    #[serde(default = "default_prune_target_ratio")]
    pub prune_target_ratio: f64,
    /// Newest messages always kept by pruning.
    #[serde(default = "default_min_messages_to_keep")]
    pub min_messages_to_keep: usize,
    /// Cap on tool-call round trips within one turn.
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
    /// Per-tool argument-validation retries within one turn.
    #[serde(default = "default_max_tool_retries")]
    pub max_tool_retries: u32,
    #[serde(default = "default_template_overhead")]
    pub template_overhead_tokens: usize,
    /// When set, pruned messages are archived to this SQLite database
    /// and become retrievable as context.
    #[serde(default)]
    pub context_db_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_path: String::new(),
            context_size: default_context_size(),
            max_tokens: default_max_tokens(),
            system_prompt: None,
            stop_sequences: Vec::new(),
            prompt_template: None,
            custom_template: None,
            n_gpu_layers: default_n_gpu_layers(),
            use_mmap: true,
            use_mlock: false,
            kv_cache_type_k: default_kv_type(),
            kv_cache_type_v: default_kv_type(),
            queue_capacity: 0,
            sampling: SamplingParams::default(),
            rag: RagSettings::default(),
            prune_target_ratio: default_prune_target_ratio(),
            min_messages_to_keep: default_min_messages_to_keep(),
            max_tool_iterations: default_max_tool_iterations(),
            max_tool_retries: default_max_tool_retries(),
            template_overhead_tokens: default_template_overhead(),
            context_db_path: None,
        }
    }
}

impl Config {
    /// Load from a TOML file with DROVER_* environment overrides
    /// (e.g. DROVER_CONTEXT_SIZE=8192, DROVER_SAMPLING__TOP_K=50).
    pub fn load(path: &str) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("DROVER_").split("__"))
            .extract()
            .map_err(|e| {
                Error::new(ErrorKind::InvalidConfig, format!("failed to load config: {e}"))
                    .with_context(path.to_string())
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Fail-fast validation, called by the agent builder and the backend.
    pub fn validate(&self) -> Result<()> {
        if self.model_path.is_empty() {
            return Err(Error::new(ErrorKind::InvalidConfig, "model_path is required"));
        }
        if self.context_size == 0 {
            return Err(Error::new(ErrorKind::InvalidConfig, "context_size must be > 0"));
        }
        if self.max_tokens == 0 {
            return Err(Error::new(ErrorKind::InvalidConfig, "max_tokens must be > 0"));
        }
        if !(self.prune_target_ratio > 0.0 && self.prune_target_ratio <= 1.0) {
            return Err(Error::new(
                ErrorKind::InvalidConfig,
                "prune_target_ratio must be in (0, 1]",
            ));
        }
        if self.sampling.temperature < 0.0 {
            return Err(Error::new(
                ErrorKind::InvalidConfig,
                "sampling.temperature must be >= 0",
            ));
        }
        if !(self.sampling.top_p > 0.0 && self.sampling.top_p <= 1.0) {
            return Err(Error::new(
                ErrorKind::InvalidConfig,
                "sampling.top_p must be in (0, 1]",
            ));
        }
        if self.rag.top_k == 0 {
            return Err(Error::new(ErrorKind::InvalidConfig, "rag.top_k must be >= 1"));
        }
        if self.prompt_template == Some(PromptTemplate::Custom) && self.custom_template.is_none() {
            return Err(Error::new(
                ErrorKind::InvalidConfig,
                "custom_template is required when prompt_template = \"custom\"",
            ));
        }
        Ok(())
    }
}

fn default_context_size() -> usize {
    4096
}

fn default_max_tokens() -> usize {
    512
}

fn default_n_gpu_layers() -> i32 {
    -1
}

fn default_true() -> bool {
    true
}

fn default_kv_type() -> KvCacheType {
    KvCacheType::F16
}

fn default_temperature() -> f32 {
    0.8
}

fn default_top_k() -> usize {
    40
}

fn default_top_p() -> f32 {
    0.95
}

fn default_repeat_penalty() -> f32 {
    1.1
}

fn default_repeat_last_n() -> usize {
    64
}

fn default_seed() -> i64 {
    -1
}

fn default_rag_top_k() -> usize {
    4
}

fn default_prune_target_ratio() -> f64 {
    0.7
}

fn default_min_messages_to_keep() -> usize {
    4
}

fn default_max_tool_iterations() -> usize {
    5
}

fn default_max_tool_retries() -> u32 {
    2
}

fn default_template_overhead() -> usize {
    DEFAULT_TEMPLATE_OVERHEAD_TOKENS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> Config {
        Config {
            model_path: "model.gguf".into(),
            ..Config::default()
        }
    }

    #[test]
    fn default_config_fails_without_model_path() {
        let err = Config::default().validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn custom_template_requires_string() {
        let mut config = valid_config();
        config.prompt_template = Some(PromptTemplate::Custom);
        assert!(config.validate().is_err());

        config.custom_template = Some("{{role}}: {{content}}\n".into());
        config.validate().unwrap();
    }

    #[test]
    fn rejects_bad_sampling_ranges() {
        let mut config = valid_config();
        config.sampling.top_p = 0.0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.sampling.temperature = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "model_path = \"m.gguf\"\ncontext_size = 2048\n\n[sampling]\ntop_k = 50"
        )
        .unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.context_size, 2048);
        assert_eq!(config.sampling.top_k, 50);
        assert_eq!(config.max_tokens, 512);
    }

    #[test]
    fn kv_cache_type_bytes() {
        assert_eq!(KvCacheType::F32.bytes_per_element(), 4.0);
        assert_eq!(KvCacheType::F16.bytes_per_element(), 2.0);
        assert_eq!(KvCacheType::Q8_0.bytes_per_element(), 1.0);
        assert_eq!(KvCacheType::Q4_0.bytes_per_element(), 0.5);
    }
}
