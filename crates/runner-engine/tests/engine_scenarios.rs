use std::sync::Arc;
use std::time::Duration;

use runner_backend::mock::MockRunner;
use runner_backend::Runner;
use runner_common::RunnerError;
use runner_core::{SamplingParams, Sequence};
use runner_engine::{spawn, Engine};

fn params(max_tokens: usize, ignore_eos: bool) -> SamplingParams {
    SamplingParams {
        max_tokens,
        ignore_eos,
        ..SamplingParams::default()
    }
}

#[test]
fn step_is_a_noop_when_idle() {
    let mut engine = Engine::new(4, 32, 2, 8, 4, Arc::new(MockRunner::new(2)));
    assert!(engine.is_idle());
    let outputs = engine.step().unwrap();
    assert!(outputs.is_empty());
}

#[test]
fn step_drives_a_request_to_completion_across_several_ticks() {
    let mut engine = Engine::new(4, 32, 2, 8, 4, Arc::new(MockRunner::new(2)));
    // ignore_eos sidesteps MockRunner's seq-0-specific eos branch, whose
    // seq_id depends on a process-global counter shared with every other
    // test in this binary; max_tokens alone makes this deterministic.
    let seq_id = engine
        .add_request(vec![10, 11, 12, 13], params(3, true))
        .unwrap();

    let mut finished = Vec::new();
    while !engine.is_idle() {
        for out in engine.step().unwrap() {
            if out.seq_id == seq_id {
                finished = out.token_ids;
            }
        }
    }

    assert_eq!(finished.len(), 3);
}

#[test]
fn add_request_rejects_a_prompt_that_cannot_fit_the_pool() {
    let mut engine = Engine::new(4, 32, 2, 1, 4, Arc::new(MockRunner::new(2)));
    let err = engine.add_request(vec![0; 16], params(1, true)).unwrap_err();
    assert!(matches!(err, RunnerError::RequestExceedsCapacity { .. }));
}

#[test]
fn step_surfaces_a_runner_output_length_mismatch() {
    struct BrokenRunner;
    impl Runner for BrokenRunner {
        fn run(&self, _batch: &[Sequence], _is_prefill: bool) -> runner_common::Result<Vec<u32>> {
            Ok(vec![1]) // always wrong length once more than one seq is batched
        }
    }

    let mut engine = Engine::new(4, 32, 2, 8, 4, Arc::new(BrokenRunner));
    engine.add_request(vec![1, 2], params(5, true)).unwrap();
    engine.add_request(vec![3, 4], params(5, true)).unwrap();

    let err = engine.step().unwrap_err();
    assert!(matches!(
        err,
        RunnerError::RunnerOutputLengthMismatch { expected: 2, got: 1 }
    ));
}

#[tokio::test]
async fn handle_generate_round_trips_through_the_background_task() {
    let engine = Engine::new(4, 32, 2, 8, 4, Arc::new(MockRunner::new(2)));
    let handle = spawn(engine, Duration::from_millis(1));

    let token_ids = handle
        .generate(vec![10, 11, 12, 13], params(3, true))
        .await
        .unwrap();

    assert_eq!(token_ids.len(), 3);
}

#[tokio::test]
async fn handle_generate_rejects_oversized_prompt_without_hanging() {
    let engine = Engine::new(4, 32, 2, 1, 4, Arc::new(MockRunner::new(2)));
    let handle = spawn(engine, Duration::from_millis(1));

    let err = handle.generate(vec![0; 16], params(1, true)).await.unwrap_err();
    assert!(matches!(err, RunnerError::RequestExceedsCapacity { .. }));
}

#[tokio::test]
async fn handle_generate_serves_concurrent_requests_independently() {
    let engine = Engine::new(4, 32, 2, 8, 4, Arc::new(MockRunner::new(2)));
    let handle = spawn(engine, Duration::from_millis(1));

    let a = handle.generate(vec![10, 11, 12, 13], params(3, true));
    let b = handle.generate(vec![20, 21, 22, 23], params(3, true));
    let (a, b) = tokio::join!(a, b);

    assert_eq!(a.unwrap().len(), 3);
    assert_eq!(b.unwrap().len(), 3);
}
