//! The model-forward boundary: anything that can turn a scheduled batch of
//! sequences into one next-token id per sequence.
//!
//! This crate intentionally knows nothing about model weights or a specific
//! inference framework -- it is the seam the scheduler calls through, with a
//! deterministic mock standing in for a real forward pass in tests and demos.

use runner_common::Result;
use runner_core::Sequence;

pub mod sampler;

#[cfg(feature = "mock")]
pub mod mock;

/// Produces the next token for every sequence in a scheduled batch.
///
/// `batch` holds the same sequences `Scheduler::schedule` returned; `run`
/// must return exactly one token id per sequence, in the same order.
pub trait Runner: Send + Sync {
    fn run(&self, batch: &[Sequence], is_prefill: bool) -> Result<Vec<u32>>;

    /// Releases any resources the runner holds (loaded weights, device
    /// contexts). A no-op for runners that own nothing persistent.
    fn shutdown(&self) {}
}
