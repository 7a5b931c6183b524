//! Token sampler chain.
//!
//! Applied in order: repetition penalty → top-k → top-p → temperature →
//! seeded distribution sampling. A temperature of zero degenerates to
//! greedy argmax.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use drover_core::SamplingParams;

/// One scored vocabulary entry during sampling.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    token: i32,
    logit: f32,
}

/// Stateful sampler built once per backend from [`SamplingParams`].
pub struct SamplerChain {
    params: SamplingParams,
    rng: StdRng,
}

impl SamplerChain {
    pub fn new(params: &SamplingParams) -> Self {
        let rng = if params.seed < 0 {
            StdRng::from_entropy()
        } else {
            StdRng::seed_from_u64(params.seed as u64)
        };
        Self {
            params: params.clone(),
            rng,
        }
    }

    /// Pick the next token from raw logits. `recent_tokens` is the
    /// repetition-penalty window (newest last).
    pub fn sample(&mut self, logits: &[f32], recent_tokens: &[i32]) -> i32 {
        let mut candidates: Vec<Candidate> = logits
            .iter()
            .enumerate()
            .map(|(i, &logit)| Candidate {
                token: i as i32,
                logit,
            })
            .collect();

        self.apply_repetition_penalty(&mut candidates, recent_tokens);

        if self.params.temperature <= 0.0 {
            return greedy(&candidates);
        }

        apply_top_k(&mut candidates, self.params.top_k);
        apply_top_p(&mut candidates, self.params.top_p);

        for c in candidates.iter_mut() {
            c.logit /= self.params.temperature;
        }

        self.sample_distribution(&candidates)
    }

    fn apply_repetition_penalty(&self, candidates: &mut [Candidate], recent_tokens: &[i32]) {
        let penalty = self.params.repeat_penalty;
        if penalty == 1.0 || recent_tokens.is_empty() {
            return;
        }
        let window_start = recent_tokens
            .len()
            .saturating_sub(self.params.repeat_last_n);
        for &token in &recent_tokens[window_start..] {
            if let Some(c) = candidates.get_mut(token as usize) {
                if c.logit > 0.0 {
                    c.logit /= penalty;
                } else {
                    c.logit *= penalty;
                }
            }
        }
    }

    fn sample_distribution(&mut self, candidates: &[Candidate]) -> i32 {
        if candidates.is_empty() {
            return 0;
        }
        let probs = softmax(candidates);
        let roll: f64 = self.rng.gen();
        let mut cumulative = 0.0;
        for (c, p) in candidates.iter().zip(probs.iter()) {
            cumulative += p;
            if roll < cumulative {
                return c.token;
            }
        }
        // Rounding can leave the roll above the final cumulative sum.
        candidates[candidates.len() - 1].token
    }
}

fn greedy(candidates: &[Candidate]) -> i32 {
    candidates
        .iter()
        .max_by(|a, b| a.logit.total_cmp(&b.logit))
        .map(|c| c.token)
        .unwrap_or(0)
}

fn apply_top_k(candidates: &mut Vec<Candidate>, top_k: usize) {
    if top_k == 0 || top_k >= candidates.len() {
        return;
    }
    candidates.sort_by(|a, b| b.logit.total_cmp(&a.logit));
    candidates.truncate(top_k);
}

fn apply_top_p(candidates: &mut Vec<Candidate>, top_p: f32) {
    if top_p >= 1.0 || candidates.len() <= 1 {
        return;
    }
    candidates.sort_by(|a, b| b.logit.total_cmp(&a.logit));
    let probs = softmax(candidates);

    let mut cumulative = 0.0;
    let mut keep = candidates.len();
    for (i, p) in probs.iter().enumerate() {
        cumulative += p;
        if cumulative >= top_p as f64 {
            keep = i + 1;
            break;
        }
    }
    candidates.truncate(keep.max(1));
}

fn softmax(candidates: &[Candidate]) -> Vec<f64> {
    let max_logit = candidates
        .iter()
        .map(|c| c.logit)
        .fold(f32::NEG_INFINITY, f32::max) as f64;
    let exps: Vec<f64> = candidates
        .iter()
        .map(|c| ((c.logit as f64) - max_logit).exp())
        .collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}
