//! A deterministic stand-in runner used by tests, demos, and `runner-cli run`
//! when no real model is configured.

use runner_common::Result;
use runner_core::Sequence;

use crate::Runner;

/// Always returns `100 + (seq.len() % 7)`, except that sequence 0 emits
/// `eos` the moment its length would reach `num_prompt_tokens + 3` -- just
/// enough non-determinism-free behavior to exercise eos-triggered
/// completion in tests without needing real logits.
pub struct MockRunner {
    eos: u32,
}

impl MockRunner {
    pub fn new(eos: u32) -> Self {
        Self { eos }
    }
}

impl Runner for MockRunner {
    fn run(&self, batch: &[Sequence], _is_prefill: bool) -> Result<Vec<u32>> {
        Ok(batch
            .iter()
            .map(|seq| {
                let next_len = seq.len() + 1;
                if seq.seq_id == 0 && next_len == seq.num_prompt_tokens + 3 {
                    self.eos
                } else {
                    100 + (seq.len() as u32 % 7)
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runner_core::SamplingParams;

    #[test]
    fn stub_is_deterministic_across_calls() {
        let runner = MockRunner::new(2);
        let seq = Sequence::new(vec![1, 2, 3], SamplingParams::default());
        let a = runner.run(&[seq.clone()], true).unwrap();
        let b = runner.run(&[seq], true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sequence_zero_hits_eos_at_prompt_len_plus_three() {
        let runner = MockRunner::new(2);
        let mut seq = Sequence::new(vec![1, 2, 3, 4], SamplingParams::default());
        seq.append_token(101);
        seq.append_token(102);
        // len is now prompt_len(4) + 2 = 6; next_len would be 7 == 4+3.
        let out = runner.run(&[seq], false).unwrap();
        assert_eq!(out, vec![2]);
    }
}
