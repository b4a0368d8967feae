//! Compiled-block cache: bounded by both block count and total byte size, evicting
//! least-recently-used entries first (`spec.md` §4.6's "the cache has a budget; once it's full,
//! compiling a new block must make room").

use std::collections::VecDeque;

use crate::page_version::PageVersionEntry;

/// Static facts about a compiled block, snapshotted at compile time so a later cache lookup can
/// tell whether the guest pages it was built from have since been rewritten.
#[derive(Debug, Clone)]
pub struct CompiledBlockMeta {
    pub guest_addr: u64,
    pub byte_len: usize,
    pub page_versions: Vec<PageVersionEntry>,
}

/// An entry in the cache: the assembled code plus the table index the dispatcher installed it
/// under and the metadata needed to judge staleness.
#[derive(Debug, Clone)]
pub struct CompiledBlockHandle {
    pub table_index: u32,
    pub code: std::sync::Arc<[u8]>,
    pub meta: CompiledBlockMeta,
}

struct Entry {
    handle: CompiledBlockHandle,
}

/// LRU cache of compiled blocks keyed by `table_index`. Eviction fires whenever an insert would
/// push either the block count or the total byte size over budget; a `cache_max_bytes` of `0`
/// disables the byte-size check (`crate::config::JitConfig`'s `cache_max_bytes: 0` convention).
pub struct CodeCache {
    max_blocks: usize,
    max_bytes: usize,
    current_bytes: usize,
    // Front = least recently used, back = most recently used.
    order: VecDeque<u32>,
    entries: std::collections::HashMap<u32, Entry>,
}

impl CodeCache {
    pub fn new(max_blocks: usize, max_bytes: usize) -> Self {
        CodeCache {
            max_blocks,
            max_bytes,
            current_bytes: 0,
            order: VecDeque::new(),
            entries: std::collections::HashMap::new(),
        }
    }

    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }

    pub fn contains(&self, table_index: u32) -> bool {
        self.entries.contains_key(&table_index)
    }

    pub fn get_cloned(&mut self, table_index: u32) -> Option<CompiledBlockHandle> {
        if self.entries.contains_key(&table_index) {
            self.touch(table_index);
            self.entries.get(&table_index).map(|e| e.handle.clone())
        } else {
            None
        }
    }

    pub fn remove(&mut self, table_index: u32) -> Option<CompiledBlockHandle> {
        let entry = self.entries.remove(&table_index)?;
        self.order.retain(|&idx| idx != table_index);
        self.current_bytes = self.current_bytes.saturating_sub(entry.handle.meta.byte_len);
        Some(entry.handle)
    }

    /// Inserts `handle`, evicting least-recently-used entries until both budgets are satisfied.
    /// Returns the table indices of everything evicted, so the caller can reset the dispatcher
    /// slots those blocks used to occupy.
    pub fn insert(&mut self, handle: CompiledBlockHandle) -> Vec<u32> {
        let mut evicted = Vec::new();

        if let Some(old) = self.remove(handle.table_index) {
            let _ = old;
        }

        let incoming_bytes = handle.meta.byte_len;
        while self.order.len() >= self.max_blocks.max(1)
            || (self.max_bytes != 0 && self.current_bytes + incoming_bytes > self.max_bytes)
        {
            let Some(lru) = self.order.pop_front() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&lru) {
                self.current_bytes = self.current_bytes.saturating_sub(entry.handle.meta.byte_len);
                evicted.push(lru);
            }
        }

        self.current_bytes += incoming_bytes;
        self.order.push_back(handle.table_index);
        self.entries.insert(handle.table_index, Entry { handle });
        evicted
    }

    fn touch(&mut self, table_index: u32) {
        if let Some(pos) = self.order.iter().position(|&idx| idx == table_index) {
            self.order.remove(pos);
            self.order.push_back(table_index);
        }
    }
}
