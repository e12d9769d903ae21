//! Caller-configurable knobs for a filter run (spec.md §6).

/// A reasonable default heap capacity (2 GiB) for callers with no sizing
/// preference of their own. Not enforced by [`crate::heap::Heap`] itself:
/// `Heap::new` takes an explicit capacity; this constant is just what
/// `Filter` assumes when a caller hasn't thought about it.
pub const DEFAULT_MAX_HEAP_SIZE: usize = 2 * 1024 * 1024 * 1024;

/// Default number of rows claimed per `fetch_add` in the worker loop.
pub const DEFAULT_ROW_BATCH_SIZE: u32 = 1024;

/// Default worker pool size.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Knobs threaded through [`crate::filter::Filter`]. Mirrors the
/// `maxHeapSize` / `rowBatchSize` / `workerCount` / `maxResultBytes`
/// configuration surface from spec.md §6.
#[derive(Debug, Clone, Copy)]
pub struct FilterConfig {
    /// Advisory cap a caller should respect when sizing the `Heap` the
    /// table and filter run share. `Filter` does not itself allocate the
    /// heap, so this is informational rather than enforced.
    pub max_heap_size: usize,
    /// Row count claimed per atomic `fetch_add` against the batch cursor.
    pub row_batch_size: u32,
    /// Number of worker threads dispatched per run. Clamped to at least 1.
    pub worker_count: usize,
    /// Upper bound on the result region, in bytes. `None` defaults to
    /// `rowCount * rowSize` at `Filter::spawn` time, per spec.md §6.
    pub max_result_bytes: Option<usize>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            max_heap_size: DEFAULT_MAX_HEAP_SIZE,
            row_batch_size: DEFAULT_ROW_BATCH_SIZE,
            worker_count: DEFAULT_WORKER_COUNT,
            max_result_bytes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = FilterConfig::default();
        assert_eq!(config.row_batch_size, 1024);
        assert_eq!(config.worker_count, 4);
        assert!(config.max_result_bytes.is_none());
    }
}
