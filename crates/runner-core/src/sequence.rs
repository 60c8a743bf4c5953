//! Per-request state: token ids, sampling parameters, block table, status.

use std::sync::atomic::{AtomicU64, Ordering};

/// Physical index into the KV-cache block pool.
pub type BlockId = usize;

static NEXT_SEQ_ID: AtomicU64 = AtomicU64::new(0);

/// Parameters forwarded to the `Runner`. Only `max_tokens` and `ignore_eos`
/// are inspected by the scheduler; temperature/top_p/top_k are opaque here.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub max_tokens: usize,
    pub ignore_eos: bool,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: 64,
            ignore_eos: false,
            temperature: 1.0,
            top_p: 1.0,
            top_k: -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStatus {
    Waiting,
    Running,
    Finished,
}

#[derive(Debug, Clone)]
pub struct Sequence {
    pub seq_id: u64,
    pub token_ids: Vec<u32>,
    pub num_prompt_tokens: usize,
    pub num_cached_tokens: usize,
    pub block_table: Vec<BlockId>,
    pub status: SequenceStatus,
    pub sampling_params: SamplingParams,
}

impl Sequence {
    pub fn new(prompt_tokens: Vec<u32>, sampling_params: SamplingParams) -> Self {
        let seq_id = NEXT_SEQ_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            seq_id,
            num_prompt_tokens: prompt_tokens.len(),
            token_ids: prompt_tokens,
            num_cached_tokens: 0,
            block_table: Vec::new(),
            status: SequenceStatus::Waiting,
            sampling_params,
        }
    }

    pub fn len(&self) -> usize {
        self.token_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_ids.is_empty()
    }

    pub fn num_completion_tokens(&self) -> usize {
        self.token_ids.len() - self.num_prompt_tokens
    }

    /// Appends one decode-step token. Must be called exactly once per
    /// scheduled decode step.
    pub fn append_token(&mut self, token_id: u32) {
        self.token_ids.push(token_id);
    }

    pub fn num_blocks(&self, block_size: usize) -> usize {
        self.len().div_ceil(block_size)
    }

    pub fn block(&self, i: usize) -> Option<BlockId> {
        self.block_table.get(i).copied()
    }

    pub fn last_block_id(&self) -> Option<BlockId> {
        self.block_table.last().copied()
    }

    /// The slice of `token_ids` covering logical block `i` (full, or partial
    /// for the final block).
    pub fn block_tokens(&self, i: usize, block_size: usize) -> &[u32] {
        let start = i * block_size;
        let end = (start + block_size).min(self.len());
        &self.token_ids[start..end]
    }

    pub fn is_finished(&self) -> bool {
        self.status == SequenceStatus::Finished
    }

    pub fn completion_token_ids(&self) -> &[u32] {
        &self.token_ids[self.num_prompt_tokens..]
    }
}
