//! Driver-wide tunables (`spec.md` §4.6, "the driver is configured, not hardcoded").

/// Controls how eagerly the driver compiles guest blocks and how big the code cache is allowed
/// to grow. `hot_threshold` of `0` means "compile on first execution"; `cache_max_bytes` of `0`
/// means "no byte-size cap, only `cache_max_blocks` applies".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitConfig {
    pub enabled: bool,
    pub hot_threshold: u32,
    pub cache_max_blocks: usize,
    pub cache_max_bytes: usize,
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            enabled: true,
            hot_threshold: 1,
            cache_max_blocks: 4096,
            cache_max_bytes: 64 * 1024 * 1024,
        }
    }
}
