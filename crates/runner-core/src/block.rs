//! Paged KV-cache block pool with prefix-cache reuse.
//!
//! Blocks are an arena (`Vec<Block>`) addressed by plain `usize` indices;
//! sequences hold those indices, never references into the pool. Sharing is
//! tracked with a ref-count per block, and a content-hash map lets two
//! sequences with an identical token prefix share the same physical blocks.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};

use crate::sequence::{BlockId, Sequence};

const ROOT_HASH: u64 = 0;

#[derive(Debug, Clone)]
struct Block {
    ref_count: usize,
    hash: Option<u64>,
    token_ids: Vec<u32>,
}

impl Block {
    fn new() -> Self {
        Self {
            ref_count: 0,
            hash: None,
            token_ids: Vec::new(),
        }
    }

    fn is_free(&self) -> bool {
        self.ref_count == 0
    }
}

pub struct BlockManager {
    block_size: usize,
    blocks: Vec<Block>,
    free_list: VecDeque<BlockId>,
    hash_to_block: HashMap<u64, BlockId>,
}

impl BlockManager {
    pub fn new(num_blocks: usize, block_size: usize) -> Self {
        Self {
            block_size,
            blocks: (0..num_blocks).map(|_| Block::new()).collect(),
            free_list: (0..num_blocks).collect(),
            hash_to_block: HashMap::new(),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn num_total_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_free_blocks(&self) -> usize {
        self.free_list.len()
    }

    pub fn hash_cache_len(&self) -> usize {
        self.hash_to_block.len()
    }

    pub fn can_allocate(&self, seq: &Sequence) -> bool {
        self.free_list.len() >= seq.num_blocks(self.block_size)
    }

    fn prefix_hash(&self, seq: &Sequence, logical_index: usize) -> u64 {
        if logical_index == 0 {
            ROOT_HASH
        } else {
            self.blocks[seq.block_table[logical_index - 1]]
                .hash
                .expect("preceding full block must already be hashed")
        }
    }

    fn chained_hash(prefix: u64, tokens: &[u32]) -> u64 {
        let mut hasher = DefaultHasher::new();
        prefix.hash(&mut hasher);
        tokens.hash(&mut hasher);
        hasher.finish()
    }

    fn take_free_block(&mut self) -> BlockId {
        let id = self
            .free_list
            .pop_front()
            .expect("caller must check can_allocate/can_append first");
        self.blocks[id].ref_count = 1;
        id
    }

    fn install_hash(&mut self, block_id: BlockId, hash: u64, tokens: &[u32]) {
        let old_hash = self.blocks[block_id].hash;
        if let Some(old_hash) = old_hash {
            if self.hash_to_block.get(&old_hash) == Some(&block_id) {
                self.hash_to_block.remove(&old_hash);
            }
        }

        let block = &mut self.blocks[block_id];
        block.hash = Some(hash);
        block.token_ids = tokens.to_vec();
        self.hash_to_block.insert(hash, block_id);
    }

    /// Allocates `seq.num_blocks()` blocks for a sequence about to run its
    /// prefill, reusing prefix-cache hits where possible.
    pub fn allocate(&mut self, seq: &mut Sequence) {
        debug_assert!(seq.block_table.is_empty());
        let block_size = self.block_size;
        let num_blocks = seq.num_blocks(block_size);
        let full_blocks = seq.len() / block_size;

        for i in 0..num_blocks {
            if i < full_blocks {
                let prefix = self.prefix_hash(seq, i);
                let tokens = seq.block_tokens(i, block_size).to_vec();
                let hash = Self::chained_hash(prefix, &tokens);

                if let Some(&cached_id) = self.hash_to_block.get(&hash) {
                    if self.blocks[cached_id].token_ids == tokens {
                        if self.blocks[cached_id].is_free() {
                            self.free_list.retain(|&id| id != cached_id);
                        }
                        self.blocks[cached_id].ref_count += 1;
                        seq.block_table.push(cached_id);
                        seq.num_cached_tokens += block_size;
                        continue;
                    }
                    // Hash collision with mismatching content: treat as a miss.
                }

                let id = self.take_free_block();
                self.install_hash(id, hash, &tokens);
                seq.block_table.push(id);
            } else {
                // Partial final block: never hashed, never shared.
                let id = self.take_free_block();
                seq.block_table.push(id);
            }
        }

        debug_assert_eq!(seq.block_table.len(), num_blocks);
    }

    /// True iff the bookkeeping for the most recently appended token (the
    /// one `postprocess` pushed onto `seq.token_ids` last step, not yet
    /// reflected in `block_table`) can be completed: either it landed inside
    /// a block that already exists (`len % B != 1`), or it started a fresh
    /// logical block and the pool has one free to give it.
    pub fn can_append(&self, seq: &Sequence) -> bool {
        seq.len() % self.block_size != 1 || !self.free_list.is_empty()
    }

    /// Called once per decode step, from the scheduler's admission loop,
    /// immediately after `can_append` passes for this candidate -- i.e.
    /// serially, one candidate at a time, so a later candidate in the same
    /// round sees a free list already charged for the ones before it.
    /// Catches `block_table` up with whatever `postprocess` appended last
    /// step: a token landing inside the existing last block is a no-op; one
    /// that exactly filled it gets that block hashed and committed to the
    /// prefix cache; one that overflowed past it gets a fresh block.
    pub fn may_append(&mut self, seq: &mut Sequence) {
        let block_size = self.block_size;
        let len = seq.len();

        if len % block_size == 0 {
            let last_index = len / block_size - 1;
            let last_block_id = seq.block_table[last_index];
            let prefix = self.prefix_hash(seq, last_index);
            let tokens = seq.block_tokens(last_index, block_size).to_vec();
            let hash = Self::chained_hash(prefix, &tokens);
            self.install_hash(last_block_id, hash, &tokens);
        } else if len % block_size == 1 {
            let id = self.take_free_block();
            seq.block_table.push(id);
        }
    }

    /// Releases every block this sequence holds, decrementing ref counts and
    /// returning blocks that drop to zero to the free list. The hash entries
    /// for those blocks are left intact so a later `allocate` can rediscover
    /// the prefix.
    pub fn deallocate(&mut self, seq: &mut Sequence) {
        for &block_id in seq.block_table.iter().rev() {
            let block = &mut self.blocks[block_id];
            block.ref_count -= 1;
            if block.ref_count == 0 {
                self.free_list.push_back(block_id);
            }
        }
        seq.block_table.clear();
        seq.num_cached_tokens = 0;
    }

    #[cfg(test)]
    pub(crate) fn ref_count(&self, block_id: BlockId) -> usize {
        self.blocks[block_id].ref_count
    }
}
