//! FIFO prefill/decode scheduler over a fixed KV-cache block pool.
//!
//! `schedule()` is the only entry point that picks a batch; callers run the
//! batch through a `Runner` and hand the produced token ids to `postprocess`.
//! Nothing in this module talks to a clock, a thread, or a channel -- the
//! whole request lifecycle is driven by whoever calls these two methods in a
//! loop.

use std::collections::VecDeque;

use runner_common::{Result, RunnerError};

use crate::block::BlockManager;
use crate::sequence::{Sequence, SequenceStatus};

#[derive(Debug)]
pub struct FinishedOutput {
    pub seq_id: u64,
    pub token_ids: Vec<u32>,
}

pub struct Scheduler {
    max_num_seqs: usize,
    max_num_batched_tokens: usize,
    eos: u32,
    block_manager: BlockManager,
    waiting: VecDeque<Sequence>,
    running: VecDeque<Sequence>,
    step_count: u64,
    last_batch_size: usize,
    last_preemptions: usize,
}

impl Scheduler {
    pub fn new(
        max_num_seqs: usize,
        max_num_batched_tokens: usize,
        eos: u32,
        num_kvcache_blocks: usize,
        kvcache_block_size: usize,
    ) -> Self {
        Self {
            max_num_seqs,
            max_num_batched_tokens,
            eos,
            block_manager: BlockManager::new(num_kvcache_blocks, kvcache_block_size),
            waiting: VecDeque::new(),
            running: VecDeque::new(),
            step_count: 0,
            last_batch_size: 0,
            last_preemptions: 0,
        }
    }

    pub fn last_preemptions(&self) -> usize {
        self.last_preemptions
    }

    /// Admits a new request. Rejects it up front if it could never fit even
    /// with the whole pool free, rather than letting it starve in `waiting`.
    pub fn add(&mut self, seq: Sequence) -> Result<()> {
        let total_blocks = self.block_manager.num_total_blocks();
        let needed_blocks = seq.num_blocks(self.block_manager.block_size());
        if needed_blocks > total_blocks {
            return Err(RunnerError::RequestExceedsCapacity {
                seq_id: seq.seq_id,
                needed_blocks,
                total_blocks,
            });
        }
        self.waiting.push_back(seq);
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.waiting.is_empty() && self.running.is_empty()
    }

    pub fn num_waiting(&self) -> usize {
        self.waiting.len()
    }

    pub fn num_running(&self) -> usize {
        self.running.len()
    }

    pub fn block_manager(&self) -> &BlockManager {
        &self.block_manager
    }

    /// Picks the next batch. Returns the sequences to run and whether this is
    /// a prefill batch (all sequences share `is_prefill`; a batch is never a
    /// mix of the two phases).
    pub fn schedule(&mut self) -> (Vec<Sequence>, bool) {
        self.step_count += 1;

        if let Some(batch) = self.schedule_prefill() {
            self.last_preemptions = 0;
            self.log_step(batch.len(), true, 0);
            return (batch, true);
        }

        let (batch, preemptions) = self.schedule_decode();
        self.last_preemptions = preemptions;
        self.log_step(batch.len(), false, preemptions);
        (batch, false)
    }

    fn schedule_prefill(&mut self) -> Option<Vec<Sequence>> {
        let mut scheduled = Vec::new();
        let mut num_batched_tokens = 0usize;

        while let Some(seq) = self.waiting.front() {
            if scheduled.len() == self.max_num_seqs {
                break;
            }
            let prompt_len = seq.len() - seq.num_cached_tokens;
            if num_batched_tokens + prompt_len > self.max_num_batched_tokens {
                break;
            }
            if !self.block_manager.can_allocate(seq) {
                break;
            }

            let mut seq = self.waiting.pop_front().expect("front just peeked");
            self.block_manager.allocate(&mut seq);
            num_batched_tokens += seq.len() - seq.num_cached_tokens;
            seq.status = SequenceStatus::Running;
            scheduled.push(seq);
        }

        if scheduled.is_empty() {
            return None;
        }

        for seq in scheduled.iter().rev() {
            self.running.push_front(seq.clone());
        }
        Some(scheduled)
    }

    fn schedule_decode(&mut self) -> (Vec<Sequence>, usize) {
        let mut scheduled = Vec::new();
        let mut preemptions = 0;

        'admit: while let Some(mut seq) = self.running.pop_front() {
            if scheduled.len() == self.max_num_seqs {
                self.running.push_front(seq);
                break;
            }

            while !self.block_manager.can_append(&seq) {
                if let Some(victim) = self.running.pop_back() {
                    self.preempt(victim);
                    preemptions += 1;
                } else {
                    // No other sequence left to sacrifice: this one yields
                    // its own blocks and waits for a future round.
                    self.preempt(seq);
                    preemptions += 1;
                    continue 'admit;
                }
            }

            // Catches block_table up with whatever postprocess appended last
            // step, in admission order, so a later candidate in this same
            // batch sees the free list already charged for it -- not just
            // checked independently against a snapshot that's gone stale.
            self.block_manager.may_append(&mut seq);
            scheduled.push(seq);
        }

        // Restore FIFO order: sequences come off the front above and must
        // go back on the front in the same order so the next round sees an
        // unchanged queue for whoever wasn't scheduled this time.
        for seq in scheduled.iter().rev() {
            self.running.push_front(seq.clone());
        }

        (scheduled, preemptions)
    }

    /// Returns a sequence to the front of `waiting`, releasing its blocks.
    /// Used both for genuine preemption and for the pathological case of a
    /// single sequence that cannot make progress even alone.
    fn preempt(&mut self, mut seq: Sequence) {
        self.block_manager.deallocate(&mut seq);
        seq.status = SequenceStatus::Waiting;
        self.waiting.push_front(seq);
    }

    /// Applies the model's output tokens to the batch that produced them.
    /// `token_ids[i]` is the new token for `batch[i]`. Returns the outputs of
    /// any sequence that finished this step; finished sequences are removed
    /// from `running` and their blocks released.
    pub fn postprocess(&mut self, batch: &[Sequence], token_ids: &[u32]) -> Vec<FinishedOutput> {
        for (seq, &token_id) in batch.iter().zip(token_ids) {
            let slot = self
                .running
                .iter_mut()
                .find(|s| s.seq_id == seq.seq_id)
                .expect("scheduled sequence must still be running");

            slot.append_token(token_id);

            let hit_eos = !slot.sampling_params.ignore_eos && token_id == self.eos;
            let hit_max_tokens = slot.num_completion_tokens() >= slot.sampling_params.max_tokens;

            if hit_eos || hit_max_tokens {
                slot.status = SequenceStatus::Finished;
            }
        }

        let mut outputs = Vec::new();
        let block_manager = &mut self.block_manager;
        self.running.retain_mut(|seq| {
            if !seq.is_finished() {
                return true;
            }
            outputs.push(FinishedOutput {
                seq_id: seq.seq_id,
                token_ids: seq.completion_token_ids().to_vec(),
            });
            block_manager.deallocate(seq);
            false
        });

        outputs
    }

    fn log_step(&mut self, batch_size: usize, is_prefill: bool, preemptions: usize) {
        let batch_changed = batch_size != self.last_batch_size;
        self.last_batch_size = batch_size;

        let noteworthy =
            self.step_count == 1 || self.step_count % 10 == 0 || batch_changed || preemptions > 0;

        if noteworthy {
            tracing::info!(
                step = self.step_count,
                phase = if is_prefill { "prefill" } else { "decode" },
                batch_size,
                waiting = self.waiting.len(),
                running = self.running.len(),
                free_blocks = self.block_manager.num_free_blocks(),
                preemptions,
                "scheduler step",
            );
        } else {
            tracing::debug!(
                step = self.step_count,
                phase = if is_prefill { "prefill" } else { "decode" },
                batch_size,
                "scheduler step",
            );
        }
    }
}
