//! The JIT driver (`spec.md` §4.6): owns the block registry, the edge table used to patch
//! compiled blocks directly into each other, and the cache/page-version bookkeeping that decides
//! when a block needs to be thrown away.
//!
//! The driver is guest-agnostic in the same sense `nova-jit` is: it never calls into
//! `frontend`/`passes`/`backend` itself. A caller (the thing that does own a `GuestAdapter`)
//! performs lift → optimise → emit and hands `jit_compile_block` the resulting bytes; the driver's
//! job starts at "here is a compiled block, make it live."

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::cache::{CodeCache, CompiledBlockHandle, CompiledBlockMeta};
use crate::config::JitConfig;
use crate::error::DriverError;
use crate::page_version::{PageVersionEntry, PageVersionTracker};

/// Everything the frontend/passes/backend pipeline produced for one guest block, handed to
/// [`Driver::jit_compile_block`].
pub struct CompiledBlock {
    pub code: Vec<u8>,
    pub touched_pages: Vec<u64>,
    pub fastmem: bool,
    /// The specialisation flags word `nova_jit::frontend::translate_block` returned
    /// (`spec.md` §4.3's supplemented per-block flags). Re-entering `guest_addr` under a
    /// different flags word is a cache miss even if a block is already installed there.
    pub flags: u64,
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    /// Guest address of the branch instruction that owns this edge.
    site: u64,
    dst: u64,
    patched: bool,
}

struct BlockRecord {
    table_index: u32,
    fastmem: bool,
    flags: u64,
    page_versions: Vec<PageVersionEntry>,
    outgoing_edges: Vec<usize>,
}

/// Block registry keyed both by guest address (for lookup-before-compile and invalidation by
/// address range) and by dispatcher table index (for fault routing, which only knows the index
/// that trapped).
pub struct Driver {
    config: JitConfig,
    cache: CodeCache,
    page_versions: PageVersionTracker,
    blocks: BTreeMap<u64, BlockRecord>,
    table_to_addr: HashMap<u32, u64>,
    edges: Vec<Edge>,
    next_table_index: u32,
    hit_counts: HashMap<(u64, u64), u32>,
}

/// What happened to a guest address handed to [`Driver::jit_run_step`] or
/// [`Driver::lookup_or_request_compile`].
pub enum Dispatch {
    /// Already compiled and fresh; run it at this table index.
    Compiled { table_index: u32 },
    /// Not hot enough yet, or compilation is disabled — fall back to the interpreter.
    Interpret,
    /// Hot enough to compile; caller should lift/optimise/emit and call `jit_compile_block`.
    RequestCompile,
}

impl Driver {
    pub fn new(config: JitConfig, num_pages: u64) -> Self {
        Driver {
            cache: CodeCache::new(config.cache_max_blocks, config.cache_max_bytes),
            page_versions: PageVersionTracker::new(num_pages),
            config,
            blocks: BTreeMap::new(),
            table_to_addr: HashMap::new(),
            edges: Vec::new(),
            next_table_index: 0,
            hit_counts: HashMap::new(),
        }
    }

    pub fn page_versions(&self) -> &PageVersionTracker {
        &self.page_versions
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Counts an execution of `guest_addr` under the given specialisation `flags` word through
    /// the interpreter and reports what the caller should do next
    /// (`spec.md` §4.6's hotness-threshold compile trigger, keyed per §4.3's supplemented
    /// `(address, flags)` cache key so a mode switch can't hit a block built under a stale
    /// assumption).
    pub fn lookup_or_request_compile(&mut self, guest_addr: u64, flags: u64) -> Dispatch {
        if let Some(record) = self.blocks.get(&guest_addr) {
            if record.flags == flags && self.is_fresh(record) {
                return Dispatch::Compiled {
                    table_index: record.table_index,
                };
            }
        }

        if !self.config.enabled {
            return Dispatch::Interpret;
        }

        let count = self.hit_counts.entry((guest_addr, flags)).or_insert(0);
        *count += 1;
        if *count >= self.config.hot_threshold.max(1) {
            Dispatch::RequestCompile
        } else {
            Dispatch::Interpret
        }
    }

    fn is_fresh(&self, record: &BlockRecord) -> bool {
        record
            .page_versions
            .iter()
            .all(|entry| self.page_versions.version(entry.page) == entry.version)
    }

    /// Installs a freshly compiled block, evicting whatever the cache needs to evict and carrying
    /// forward (then freeing) any stale record that previously lived at this address.
    pub fn jit_compile_block(
        &mut self,
        guest_addr: u64,
        compiled: CompiledBlock,
    ) -> Result<u32, DriverError> {
        if self.config.cache_max_bytes != 0 && compiled.code.len() > self.config.cache_max_bytes {
            return Err(DriverError::CodeBufferExhausted { guest_addr });
        }

        if let Some(old) = self.blocks.remove(&guest_addr) {
            self.table_to_addr.remove(&old.table_index);
            self.cache.remove(old.table_index);
            self.detach_edges_from(guest_addr);
        }

        let table_index = self.next_table_index;
        self.next_table_index += 1;

        let mut page_versions = Vec::with_capacity(compiled.touched_pages.len());
        for page in &compiled.touched_pages {
            page_versions.push(PageVersionEntry {
                page: *page,
                version: self.page_versions.version(*page),
            });
        }

        let byte_len = compiled.code.len();
        let handle = CompiledBlockHandle {
            table_index,
            code: Arc::from(compiled.code.into_boxed_slice()),
            meta: CompiledBlockMeta {
                guest_addr,
                byte_len,
                page_versions: page_versions.clone(),
            },
        };

        let evicted = self.cache.insert(handle);
        for table_index in evicted {
            if let Some(addr) = self.table_to_addr.remove(&table_index) {
                if let Some(record) = self.blocks.remove(&addr) {
                    self.detach_edges_from(addr);
                    let _ = record;
                }
            }
        }

        self.table_to_addr.insert(table_index, guest_addr);
        self.blocks.insert(
            guest_addr,
            BlockRecord {
                table_index,
                fastmem: compiled.fastmem,
                flags: compiled.flags,
                page_versions,
                outgoing_edges: Vec::new(),
            },
        );
        self.hit_counts.remove(&(guest_addr, compiled.flags));

        tracing::debug!(guest_addr, table_index, "installed compiled block");
        Ok(table_index)
    }

    /// Fetches the assembled bytes for a table index, for the dispatcher to load into its
    /// wasm module table. `None` means the block has since been evicted or invalidated.
    pub fn code_for(&mut self, table_index: u32) -> Option<Arc<[u8]>> {
        self.cache.get_cloned(table_index).map(|h| h.code)
    }

    pub fn guest_addr_of(&self, table_index: u32) -> Option<u64> {
        self.table_to_addr.get(&table_index).copied()
    }

    /// Registers a static edge from a branch site to its destination. If `dst_addr` is already
    /// compiled and fresh, the edge is recorded patched immediately and `Some(table_index)` is
    /// returned so the caller can rewrite the branch site's `call_indirect` target right away;
    /// otherwise the edge starts unpatched and the caller must call `mark_edge_patched` itself
    /// once `dst_addr` is eventually compiled (the patch rewrite itself is backend-specific, so
    /// the driver never performs it directly — it only tracks whether it's been done).
    pub fn jit_add_edge(&mut self, site_addr: u64, dst_addr: u64) -> Option<u32> {
        let resolved = self
            .blocks
            .get(&dst_addr)
            .filter(|record| self.is_fresh(record))
            .map(|record| record.table_index);

        let edge_index = self.edges.len();
        self.edges.push(Edge {
            site: site_addr,
            dst: dst_addr,
            patched: resolved.is_some(),
        });
        if let Some(record) = self.blocks.get_mut(&site_addr) {
            record.outgoing_edges.push(edge_index);
        }
        resolved
    }

    pub fn mark_edge_patched(&mut self, site_addr: u64, dst_addr: u64) {
        if let Some(edge) = self
            .edges
            .iter_mut()
            .find(|e| e.site == site_addr && e.dst == dst_addr)
        {
            edge.patched = true;
        }
    }

    pub fn is_edge_patched(&self, site_addr: u64, dst_addr: u64) -> bool {
        self.edges
            .iter()
            .any(|e| e.site == site_addr && e.dst == dst_addr && e.patched)
    }

    /// Marks every block touching `addr..addr+len` as needing recompilation by bumping the page
    /// version underneath it — existing records are left in place (so `guest_addr_of` still
    /// resolves faults against them) but `is_fresh` will reject them on next lookup.
    pub fn jit_invalidate_blocks(&mut self, addr: u64, len: usize) {
        self.page_versions.bump_write(addr, len);
    }

    /// Frees every block whose guest address falls in `addr..addr+len`: removes the registry
    /// entry, detaches its edges and evicts it from the cache outright, rather than just marking
    /// it stale. Used for explicit unmap/recycle operations, not ordinary SMC.
    pub fn jit_free_blocks(&mut self, addr: u64, len: usize) {
        let end = addr.saturating_add(len as u64);
        let doomed: Vec<u64> = self
            .blocks
            .range(addr..end)
            .map(|(guest_addr, _)| *guest_addr)
            .collect();
        for guest_addr in doomed {
            if let Some(record) = self.blocks.remove(&guest_addr) {
                self.table_to_addr.remove(&record.table_index);
                self.cache.remove(record.table_index);
            }
            self.detach_edges_from(guest_addr);
            self.hit_counts.retain(|&(addr, _), _| addr != guest_addr);
        }
    }

    fn detach_edges_from(&mut self, site_addr: u64) {
        for edge in &mut self.edges {
            if edge.site == site_addr || edge.dst == site_addr {
                edge.patched = false;
            }
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}
