//! Turns the synchronous scheduler core into a service: a single background
//! task owns the `Scheduler` and the `Runner`, ticking `schedule -> run ->
//! postprocess` in a loop, while callers submit work and await completions
//! over channels.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time;

use runner_backend::Runner;
use runner_common::{Result, RunnerError};
use runner_core::{FinishedOutput, SamplingParams, Scheduler, Sequence};
use runner_obs::SchedulerSnapshot;

/// Owns one `Scheduler` and one `Runner`. Synchronous and single-threaded by
/// design -- see `Handle` for the async wrapper that makes this usable from
/// a multi-client server.
pub struct Engine {
    scheduler: Scheduler,
    runner: Arc<dyn Runner>,
}

impl Engine {
    pub fn new(
        max_num_seqs: usize,
        max_num_batched_tokens: usize,
        eos: u32,
        num_kvcache_blocks: usize,
        kvcache_block_size: usize,
        runner: Arc<dyn Runner>,
    ) -> Self {
        Self {
            scheduler: Scheduler::new(
                max_num_seqs,
                max_num_batched_tokens,
                eos,
                num_kvcache_blocks,
                kvcache_block_size,
            ),
            runner,
        }
    }

    pub fn add_request(
        &mut self,
        prompt_tokens: Vec<u32>,
        sampling_params: SamplingParams,
    ) -> Result<u64> {
        let seq = Sequence::new(prompt_tokens, sampling_params);
        let seq_id = seq.seq_id;
        self.scheduler.add(seq)?;
        Ok(seq_id)
    }

    pub fn is_idle(&self) -> bool {
        self.scheduler.is_finished()
    }

    /// Runs one `schedule -> run -> postprocess` cycle. Returns the outputs
    /// of any sequence that finished this step, and records a snapshot of
    /// the pool/queue state for `/metrics`.
    pub fn step(&mut self) -> Result<Vec<FinishedOutput>> {
        let (batch, is_prefill) = self.scheduler.schedule();
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let token_ids = self.runner.run(&batch, is_prefill)?;
        if token_ids.len() != batch.len() {
            return Err(RunnerError::RunnerOutputLengthMismatch {
                expected: batch.len(),
                got: token_ids.len(),
            });
        }

        let outputs = self.scheduler.postprocess(&batch, &token_ids);
        let free_blocks = self.scheduler.block_manager().num_free_blocks();

        runner_obs::observe_scheduler(&SchedulerSnapshot {
            kv_free_blocks: free_blocks,
            kv_used_blocks: self.scheduler.block_manager().num_total_blocks() - free_blocks,
            kv_hash_cache_entries: self.scheduler.block_manager().hash_cache_len(),
            queue_depth: self.scheduler.num_waiting(),
            batch_size: batch.len(),
            preemptions_this_step: self.scheduler.last_preemptions(),
        });

        Ok(outputs)
    }
}

struct PendingRequest {
    prompt_tokens: Vec<u32>,
    sampling_params: SamplingParams,
    respond: oneshot::Sender<Result<Vec<u32>>>,
}

/// A cloneable, cheap-to-send front door onto an `Engine` running on its own
/// background task.
#[derive(Clone)]
pub struct Handle {
    tx: mpsc::Sender<PendingRequest>,
}

impl Handle {
    /// Submits a request and awaits its full completion (all generated
    /// token ids, in order). There is no partial/streaming delivery here --
    /// a streaming façade belongs in `runner-api`, layered on top.
    pub async fn generate(
        &self,
        prompt_tokens: Vec<u32>,
        sampling_params: SamplingParams,
    ) -> Result<Vec<u32>> {
        let (respond, rx) = oneshot::channel();
        let req = PendingRequest {
            prompt_tokens,
            sampling_params,
            respond,
        };
        self.tx
            .send(req)
            .await
            .map_err(|_| RunnerError::Message("engine task is no longer running".into()))?;
        rx.await
            .map_err(|_| RunnerError::Message("engine task dropped the response channel".into()))?
    }
}

/// Spawns `engine` onto a background tokio task and returns a `Handle` to
/// it. The task ticks on a short interval, draining newly submitted
/// requests into the scheduler and running one step per tick whenever
/// there's anything to do.
pub fn spawn(engine: Engine, tick: Duration) -> Handle {
    let (tx, rx) = mpsc::channel::<PendingRequest>(1024);
    tokio::spawn(run_background(engine, rx, tick));
    Handle { tx }
}

async fn run_background(
    mut engine: Engine,
    mut rx: mpsc::Receiver<PendingRequest>,
    tick: Duration,
) {
    let mut pending: HashMap<u64, oneshot::Sender<Result<Vec<u32>>>> = HashMap::new();
    let mut ticker = time::interval(tick);

    loop {
        ticker.tick().await;

        while let Ok(req) = rx.try_recv() {
            match engine.add_request(req.prompt_tokens, req.sampling_params) {
                Ok(seq_id) => {
                    pending.insert(seq_id, req.respond);
                }
                Err(e) => {
                    let _ = req.respond.send(Err(e));
                }
            }
        }

        if engine.is_idle() {
            continue;
        }

        match engine.step() {
            Ok(finished) => {
                for out in finished {
                    if let Some(respond) = pending.remove(&out.seq_id) {
                        let _ = respond.send(Ok(out.token_ids));
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "engine step failed");
            }
        }
    }
}
