//! Property tests for the ambient resource-management invariants `SPEC_FULL.md` adds on top of
//! the universal invariants in `spec.md` §8: the page-version table never panics regardless of
//! address/length, and the code cache never exceeds either of its configured budgets.

use proptest::prelude::*;

use nova_runtime::cache::{CodeCache, CompiledBlockHandle, CompiledBlockMeta};
use nova_runtime::page_version::PageVersionTracker;

fn handle(table_index: u32, byte_len: usize) -> CompiledBlockHandle {
    CompiledBlockHandle {
        table_index,
        code: std::sync::Arc::from(vec![0u8; byte_len].into_boxed_slice()),
        meta: CompiledBlockMeta {
            guest_addr: table_index as u64 * 0x100,
            byte_len,
            page_versions: Vec::new(),
        },
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn page_version_tracker_never_panics_on_any_address_or_length(
        num_pages in 0u64..16,
        addr in any::<u64>(),
        len in any::<usize>(),
    ) {
        let tracker = PageVersionTracker::new(num_pages);
        tracker.bump_write(addr, len);
        let _ = tracker.version(addr / 4096);
        let snapshot = tracker.snapshot(addr, (len as u64).min(u32::MAX as u64) as u32);
        prop_assert!(snapshot.len() <= PageVersionTracker::MAX_SNAPSHOT_PAGES);
    }

    #[test]
    fn code_cache_never_exceeds_its_block_or_byte_budget(
        max_blocks in 1usize..8,
        // Keep every single entry well under the smallest possible budget so the byte budget is
        // never impossible to satisfy for a lone insert, which would make the invariant vacuous.
        max_bytes in 64usize..256,
        inserts in prop::collection::vec(1usize..32, 0..40),
    ) {
        let mut cache = CodeCache::new(max_blocks, max_bytes);
        let mut live: std::collections::HashSet<u32> = std::collections::HashSet::new();
        for (i, byte_len) in inserts.into_iter().enumerate() {
            let table_index = i as u32;
            let evicted = cache.insert(handle(table_index, byte_len));
            for idx in evicted {
                live.remove(&idx);
            }
            live.insert(table_index);

            prop_assert!(live.len() <= max_blocks, "block count budget exceeded");
            prop_assert!(cache.current_bytes() <= max_bytes, "byte budget exceeded");
            for &idx in &live {
                prop_assert!(cache.contains(idx), "entry tracked as live but missing from the cache");
            }
        }
    }
}
