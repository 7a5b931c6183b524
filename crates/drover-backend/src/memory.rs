//! Pre-load memory estimation.
//!
//! Fast header-only estimate of what loading a model with a given
//! context size will cost, used for OOM refusal before a slow load.

use std::path::Path;

use drover_core::{Error, ErrorKind, KvCacheType, Result};

use crate::gguf::read_gguf_metadata;

/// Memory breakdown for a model + config combination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryEstimate {
    /// Model weights (the GGUF file, mapped into memory).
    pub model_weights_bytes: u64,
    /// KV cache for the requested context size.
    pub kv_cache_bytes: u64,
    /// Scratch/compute buffers (estimated).
    pub compute_buffer_bytes: u64,
    pub total_bytes: u64,
}

impl MemoryEstimate {
    pub fn total_gb(&self) -> f64 {
        self.total_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }

    pub fn model_gb(&self) -> f64 {
        self.model_weights_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }

    pub fn kv_cache_gb(&self) -> f64 {
        self.kv_cache_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// Estimate memory requirements for loading `model_path` with
/// `context_size` tokens of KV cache.
///
/// KV cache: `2 (k+v) · n_layers · n_embd · context_size · bytes_per_element`.
/// Compute buffers: a conservative ~14% of the model size.
pub fn estimate_memory(
    model_path: impl AsRef<Path>,
    context_size: usize,
    kv_type_k: KvCacheType,
    kv_type_v: KvCacheType,
) -> Result<MemoryEstimate> {
    let path = model_path.as_ref();
    let meta = read_gguf_metadata(path)?;

    let file_size = std::fs::metadata(path)
        .map_err(|e| {
            Error::new(
                ErrorKind::ModelLoadFailed,
                format!("cannot determine model file size: {e}"),
            )
            .with_context(path.display().to_string())
        })?
        .len();

    let mut est = MemoryEstimate {
        model_weights_bytes: file_size,
        ..Default::default()
    };

    if meta.n_layers > 0 && meta.n_embd > 0 && context_size > 0 {
        let per_stream = (meta.n_layers * meta.n_embd * context_size) as f64;
        let k_bytes = per_stream * kv_type_k.bytes_per_element();
        let v_bytes = per_stream * kv_type_v.bytes_per_element();
        est.kv_cache_bytes = (k_bytes + v_bytes) as u64;
    }

    est.compute_buffer_bytes = est.model_weights_bytes / 7; // ~14%
    est.total_bytes = est.model_weights_bytes + est.kv_cache_bytes + est.compute_buffer_bytes;
    Ok(est)
}

/// Available physical memory, when the platform exposes it.
///
/// Linux reads `MemAvailable` from /proc/meminfo. Other platforms report
/// `None` and the pre-load sanity check is skipped.
pub fn available_memory_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        for line in meminfo.lines() {
            if let Some(rest) = line.strip_prefix("MemAvailable:") {
                let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
                return Some(kb * 1024);
            }
        }
        None
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}
