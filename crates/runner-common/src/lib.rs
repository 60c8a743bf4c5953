//! Shared error type and configuration loading for the scheduler workspace.

pub type Result<T> = core::result::Result<T, RunnerError>;

#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("sequence {seq_id} needs {needed_blocks} blocks but the pool only has {total_blocks}")]
    RequestExceedsCapacity {
        seq_id: u64,
        needed_blocks: usize,
        total_blocks: usize,
    },
    #[error("runner returned {got} tokens for a batch of {expected}")]
    RunnerOutputLengthMismatch { expected: usize, got: usize },
    #[error("{0}")]
    Message(String),
}

pub mod config {
    use crate::{Result, RunnerError};
    use serde::Deserialize;
    use std::env;

    /// Recognized scheduler/block-manager options (see SPEC_FULL.md section 10).
    #[derive(Debug, Clone, Deserialize)]
    pub struct Config {
        pub max_num_seqs: usize,
        pub max_num_batched_tokens: usize,
        pub kvcache_block_size: usize,
        pub num_kvcache_blocks: usize,
        pub eos: u32,
        pub max_model_len: usize,
    }

    impl Default for Config {
        fn default() -> Self {
            Self {
                max_num_seqs: 4,
                max_num_batched_tokens: 32,
                kvcache_block_size: 4,
                num_kvcache_blocks: 8,
                eos: 2,
                max_model_len: 32,
            }
        }
    }

    impl Config {
        /// Loads from `RUNNER_CONFIG` (YAML) if set, falling back to defaults with
        /// individual env-var overrides, then validates.
        pub fn load() -> Result<Self> {
            let mut cfg = if let Ok(path) = env::var("RUNNER_CONFIG") {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| RunnerError::ConfigInvalid(format!("reading {path}: {e}")))?;
                serde_yaml::from_str(&text)
                    .map_err(|e| RunnerError::ConfigInvalid(format!("parsing {path}: {e}")))?
            } else {
                Self::default()
            };

            if let Some(v) = env_usize("RUNNER_MAX_NUM_SEQS") {
                cfg.max_num_seqs = v;
            }
            if let Some(v) = env_usize("RUNNER_MAX_BATCHED_TOKENS") {
                cfg.max_num_batched_tokens = v;
            }
            if let Some(v) = env_usize("RUNNER_BLOCK_SIZE") {
                cfg.kvcache_block_size = v;
            }
            if let Some(v) = env_usize("RUNNER_NUM_BLOCKS") {
                cfg.num_kvcache_blocks = v;
            }
            if let Some(v) = env_usize("RUNNER_MAX_MODEL_LEN") {
                cfg.max_model_len = v;
            }
            if let Some(v) = env::var("RUNNER_EOS").ok().and_then(|v| v.parse().ok()) {
                cfg.eos = v;
            }

            cfg.validate()?;
            Ok(cfg)
        }

        /// Fails fast when the pool cannot possibly hold one max-length sequence.
        pub fn validate(&self) -> Result<()> {
            if self.kvcache_block_size == 0 {
                return Err(RunnerError::ConfigInvalid(
                    "kvcache_block_size must be > 0".into(),
                ));
            }
            if self.max_num_seqs == 0 {
                return Err(RunnerError::ConfigInvalid("max_num_seqs must be > 0".into()));
            }
            let needed = self.max_model_len.div_ceil(self.kvcache_block_size);
            if self.num_kvcache_blocks < needed {
                return Err(RunnerError::ConfigInvalid(format!(
                    "num_kvcache_blocks={} cannot hold a single max_model_len={} sequence (needs {} blocks)",
                    self.num_kvcache_blocks, self.max_model_len, needed
                )));
            }
            Ok(())
        }
    }

    fn env_usize(key: &str) -> Option<usize> {
        env::var(key).ok().and_then(|v| v.parse().ok())
    }
}
