//! Pool of freed buffer storage.
//!
//! Avoids allocating and zeroing a fresh frame-sized block per buffer by
//! keeping released storage, keyed by element count, up to a memory budget.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

#[derive(Default)]
struct PoolState {
    /// Free storage blocks keyed by length in `f32` elements.
    free: HashMap<usize, Vec<Vec<f32>>>,
    /// Bytes held by all free blocks.
    total_memory: usize,
    reused: u64,
    allocated: u64,
    recycled: u64,
}

/// Shared pool of reusable buffer storage.
pub struct BufferPool {
    state: Mutex<PoolState>,
    max_memory: usize,
}

/// Counters describing pool traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub allocated: u64,
    pub reused: u64,
    pub recycled: u64,
    pub free_blocks: usize,
    pub free_memory: usize,
}

fn block_bytes(len: usize) -> usize {
    len * std::mem::size_of::<f32>()
}

impl BufferPool {
    /// Create a new pool with the given memory budget in bytes.
    pub fn new(max_memory: usize) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            max_memory,
        }
    }

    /// Zeroed storage of `len` elements, reused from the pool when possible.
    pub fn acquire(&self, len: usize) -> Vec<f32> {
        let mut state = self.state.lock();
        if let Some(mut block) = state.free.get_mut(&len).and_then(Vec::pop) {
            state.total_memory -= block_bytes(len);
            state.reused += 1;
            if state.free.get(&len).is_some_and(Vec::is_empty) {
                state.free.remove(&len);
            }
            drop(state);
            block.fill(0.0);
            return block;
        }
        state.allocated += 1;
        drop(state);
        vec![0.0; len]
    }

    /// Return storage for reuse. Dropped instead when it would exceed the budget.
    pub fn recycle(&self, block: Vec<f32>) {
        let len = block.len();
        let mem = block_bytes(len);
        let mut state = self.state.lock();
        if state.total_memory + mem > self.max_memory {
            debug!(bytes = mem, "buffer pool over budget, dropping block");
            return;
        }
        state.total_memory += mem;
        state.recycled += 1;
        state.free.entry(len).or_default().push(block);
    }

    /// Bytes held by free blocks.
    pub fn memory_usage(&self) -> usize {
        self.state.lock().total_memory
    }

    pub fn block_count(&self) -> usize {
        self.state.lock().free.values().map(Vec::len).sum()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            allocated: state.allocated,
            reused: state.reused,
            recycled: state.recycled,
            free_blocks: state.free.values().map(Vec::len).sum(),
            free_memory: state.total_memory,
        }
    }

    /// Drop every free block.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.free.clear();
        state.total_memory = 0;
    }

    /// Drop free blocks until memory is at or below the target.
    pub fn evict_to(&self, target_memory: usize) {
        let mut state = self.state.lock();
        while state.total_memory > target_memory {
            // take from the size class with the most spare blocks
            let key = state
                .free
                .iter()
                .filter(|(_, v)| !v.is_empty())
                .max_by_key(|(_, v)| v.len())
                .map(|(k, _)| *k);

            let Some(key) = key else { break };
            let mut emptied = false;
            if let Some(blocks) = state.free.get_mut(&key) {
                blocks.pop();
                emptied = blocks.is_empty();
            }
            state.total_memory -= block_bytes(key);
            if emptied {
                state.free.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_returns_zeroed_block() {
        let pool = BufferPool::new(1 << 20);
        let mut block = pool.acquire(16);
        block[3] = 5.0;
        pool.recycle(block);
        assert_eq!(pool.block_count(), 1);
        assert_eq!(pool.memory_usage(), 64);

        let again = pool.acquire(16);
        assert!(again.iter().all(|v| *v == 0.0));
        let stats = pool.stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.free_blocks, 0);
    }

    #[test]
    fn test_budget_drops_excess() {
        let pool = BufferPool::new(100);
        pool.recycle(vec![0.0; 16]); // 64 bytes
        pool.recycle(vec![0.0; 16]); // would be 128
        assert_eq!(pool.block_count(), 1);
    }

    #[test]
    fn test_evict_to_target() {
        let pool = BufferPool::new(1 << 20);
        for _ in 0..4 {
            pool.recycle(vec![0.0; 8]);
        }
        pool.recycle(vec![0.0; 32]);
        pool.evict_to(128);
        assert!(pool.memory_usage() <= 128);
        pool.clear();
        assert_eq!(pool.memory_usage(), 0);
        assert_eq!(pool.block_count(), 0);
    }
}
