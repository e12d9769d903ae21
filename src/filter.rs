//! The parallel filter executor: per-worker claim/evaluate/project loop
//! (spec.md §4.5) plus the coordinator that dispatches and joins the
//! worker pool (spec.md §4.6).
//!
//! Workers are real OS threads (`std::thread`), sharing one [`Heap`]
//! through `Arc` clones and a single [`ControlBlock`] of atomic counters.
//! No pointers cross a thread boundary: each worker reconstructs its table
//! and result views from `(heap, offset, size)`, exactly as spec.md §9
//! ("worker dispatch without pointers") describes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use crate::config::FilterConfig;
use crate::error::{KradataError, Result};
use crate::heap::{Heap, MemoryBlock};
use crate::rule::{self, CompiledPredicate, RuleTree};
use crate::table::{Row, Table};
use crate::types::{ColumnType, Value};

/// One item of a [`Filter`] projection: either a column reference (copied
/// verbatim from the source row) or the `column: null` sentinel that
/// projects the matching row's index as a `uint32`.
#[derive(Debug, Clone)]
pub struct ResultItem {
    pub column: Option<String>,
    pub ty: ColumnType,
    pub size: u32,
}

enum Source {
    RowIndex,
    Column { ordinal: usize, ty: ColumnType },
}

struct ProjectionWriter {
    target_offset: usize,
    size: u32,
    source: Source,
}

impl ProjectionWriter {
    /// Copies this item's field for `row`'s current index into
    /// `result_view` at `slot_offset + target_offset`.
    fn write(&self, row: &Row, result_view: &mut [u8], slot_offset: usize) -> Result<()> {
        let dest = slot_offset + self.target_offset;
        match self.source {
            Source::RowIndex => {
                ColumnType::UInt32.set(result_view, dest, self.size, &Value::U32(row.index()))
            }
            Source::Column { ordinal, ty } => {
                let value = row.get(ordinal)?;
                ty.set(result_view, dest, self.size, &value)
            }
        }
    }
}

fn compile_projection(table: &Table, items: &[ResultItem]) -> Result<(Vec<ProjectionWriter>, u32)> {
    let mut writers = Vec::with_capacity(items.len());
    let mut offset = 0u32;
    for item in items {
        match &item.column {
            None => {
                if item.ty != ColumnType::UInt32 || item.size != 4 {
                    return Err(KradataError::RuleError(
                        "row-index projection (column: null) must be uint32 of size 4".into(),
                    ));
                }
                writers.push(ProjectionWriter {
                    target_offset: offset as usize,
                    size: item.size,
                    source: Source::RowIndex,
                });
            }
            Some(name) => {
                let ordinal = table.column_ordinal(name).ok_or_else(|| {
                    KradataError::RuleError(format!("unknown projection column {name:?}"))
                })?;
                let column = &table.columns()[ordinal];
                if column.ty != item.ty || column.size != item.size {
                    return Err(KradataError::RuleError(format!(
                        "projection column {name:?} declares {}/{} but table column is {}/{}",
                        item.ty.name(),
                        item.size,
                        column.ty.name(),
                        column.size
                    )));
                }
                writers.push(ProjectionWriter {
                    target_offset: offset as usize,
                    size: item.size,
                    source: Source::Column { ordinal, ty: column.ty },
                });
            }
        }
        offset += item.size;
    }
    Ok((writers, offset))
}

/// The shared batch/slot atomic counters plus the overflow/cancel flags
/// from spec.md §3 ("Indices block") and §9 ("Control block layout"),
/// folded into one four-`u32` [`MemoryBlock`] so the worker dispatch
/// message still needs only a single address.
struct ControlBlock {
    block: MemoryBlock,
}

impl ControlBlock {
    pub const SIZE: usize = 16;
    const BATCH: usize = 0;
    const SLOT: usize = 4;
    const OVERFLOW: usize = 8;
    const CANCEL: usize = 12;

    fn at(heap: Heap, offset: usize, size: usize) -> Result<ControlBlock> {
        Ok(ControlBlock { block: MemoryBlock::at(heap, offset, size)? })
    }

    fn atomic(&self, offset: usize) -> &AtomicU32 {
        let view = self.block.view();
        // SAFETY: `offset` is always one of the four 4-byte-aligned
        // constants above, within an 8-byte-aligned allocation of
        // `Self::SIZE` bytes, so the cast target is in-bounds and aligned.
        unsafe { &*(view[offset..offset + 4].as_ptr() as *const AtomicU32) }
    }

    /// Claims `[start, start + batch_size)`, returning `start`.
    fn claim_batch(&self, batch_size: u32) -> u32 {
        self.atomic(Self::BATCH).fetch_add(batch_size, Ordering::SeqCst)
    }

    /// Claims the next result slot, returning its index.
    fn claim_slot(&self) -> u32 {
        self.atomic(Self::SLOT).fetch_add(1, Ordering::SeqCst)
    }

    fn committed(&self) -> u32 {
        self.atomic(Self::SLOT).load(Ordering::SeqCst)
    }

    fn set_overflow(&self) {
        self.atomic(Self::OVERFLOW).store(1, Ordering::SeqCst);
    }

    fn overflow(&self) -> bool {
        self.atomic(Self::OVERFLOW).load(Ordering::SeqCst) != 0
    }

    fn set_cancel(&self) {
        self.atomic(Self::CANCEL).store(1, Ordering::SeqCst);
    }

    fn cancelled(&self) -> bool {
        self.atomic(Self::CANCEL).load(Ordering::SeqCst) != 0
    }

    fn free(self) -> Result<()> {
        self.block.free()
    }
}

/// One worker's dispatch message (spec.md §6): offsets and sizes only, no
/// pointers. Each worker reconstructs its own views from `heap`.
struct WorkerContext {
    heap: Heap,
    table_addr: usize,
    table_size: usize,
    control_addr: usize,
    result_addr: usize,
    result_size: usize,
    predicate: Arc<CompiledPredicate>,
    writers: Arc<Vec<ProjectionWriter>>,
    row_size: u32,
    row_batch_size: u32,
}

/// The per-worker loop from spec.md §4.5: claim a batch, evaluate the
/// predicate row by row, project matches into a claimed result slot.
fn run_worker(ctx: WorkerContext) -> Result<()> {
    let table_block = MemoryBlock::at(ctx.heap.clone(), ctx.table_addr, ctx.table_size)?;
    let table = Table::bind(table_block)?;
    let control = ControlBlock::at(ctx.heap.clone(), ctx.control_addr, ControlBlock::SIZE)?;
    let result_block = MemoryBlock::at(ctx.heap, ctx.result_addr, ctx.result_size)?;

    let row_count = table.row_count();
    let mut row = table.row();

    loop {
        if control.cancelled() {
            break;
        }
        let start = control.claim_batch(ctx.row_batch_size);
        if start >= row_count {
            break;
        }
        let end = (start + ctx.row_batch_size).min(row_count);

        for index in start..end {
            row.set_index(index);
            if ctx.predicate.test(&row)? {
                let slot = control.claim_slot();
                let slot_offset = slot as usize * ctx.row_size as usize;
                if slot_offset + ctx.row_size as usize > result_block.size() {
                    control.set_overflow();
                    continue;
                }
                let view = result_block.view_mut();
                for writer in ctx.writers.iter() {
                    writer.write(&row, view, slot_offset)?;
                }
            }
        }

        if control.cancelled() {
            break;
        }
    }
    Ok(())
}

/// The result of a completed filter run (spec.md §4.6).
pub struct FilterResult {
    pub count: u32,
    pub row_size: u32,
    pub block: MemoryBlock,
    pub truncated: bool,
}

/// A dispatched-but-not-yet-joined filter run. `cancel` sets the shared
/// cancel flag; every worker observes it at its next batch boundary
/// (spec.md §5).
pub struct RunningFilter {
    control: Option<ControlBlock>,
    result_block: Option<MemoryBlock>,
    handles: Vec<thread::JoinHandle<Result<()>>>,
    row_size: u32,
}

impl RunningFilter {
    /// Requests cancellation. Workers finish their current row, not their
    /// current batch position, before checking this at the top of the loop.
    pub fn cancel(&self) {
        log::debug!("filter run cancelled");
        self.control.as_ref().expect("control freed only in join/drop").set_cancel();
    }

    /// Blocks until every worker has joined (spec.md §5's only blocking
    /// point), then assembles the result. `join` acts as the
    /// release/acquire barrier spec.md §5 requires before reading the
    /// final counters.
    pub fn join(mut self) -> Result<FilterResult> {
        let control = self.control.take().expect("join called once");
        let mut first_err = None;
        for handle in self.handles.drain(..) {
            let outcome = handle
                .join()
                .unwrap_or_else(|_| Err(KradataError::InvalidHandle("worker thread panicked".into())));
            if let Err(e) = outcome {
                log::error!("filter worker failed: {e}");
                control.set_cancel();
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }

        let result_block = self.result_block.take().expect("join called once");
        if let Some(err) = first_err {
            result_block.free().ok();
            control.free().ok();
            return Err(err);
        }
        if control.cancelled() {
            result_block.free().ok();
            control.free().ok();
            return Err(KradataError::Cancelled);
        }

        // `committed()` counts every matching row a worker claimed a slot
        // for, even ones that landed past `result_block`'s capacity and
        // skipped their write (the overflow branch in `run_worker`). Cap it
        // at the number of slots that actually fit, so `count` reflects
        // populated slots as spec.md §8 invariant 3 requires.
        let capacity = (result_block.size() / self.row_size as usize) as u32;
        let count = control.committed().min(capacity);
        let truncated = control.overflow();
        if truncated {
            log::warn!("filter result truncated at {count} rows");
        }
        control.free().ok();
        Ok(FilterResult { count, row_size: self.row_size, block: result_block, truncated })
    }
}

impl Drop for RunningFilter {
    /// If a `RunningFilter` is dropped without `join`, its control and
    /// result blocks would otherwise leak. There is no well-defined result
    /// to hand back in that case, so we just reclaim the heap space.
    fn drop(&mut self) {
        if let Some(block) = self.result_block.take() {
            block.free().ok();
        }
        if let Some(control) = self.control.take() {
            control.free().ok();
        }
    }
}

/// The coordinator: compiles a rule tree against a bound [`Table`],
/// allocates the control and result regions, and dispatches/joins a pool
/// of workers (spec.md §4.6).
pub struct Filter<'t> {
    table: &'t Table,
    config: FilterConfig,
}

impl<'t> Filter<'t> {
    pub fn new(table: &'t Table, config: FilterConfig) -> Filter<'t> {
        Filter { table, config }
    }

    /// Compiles `rules`, dispatches the worker pool, and returns a handle
    /// the caller may `cancel` before `join`ing.
    pub fn spawn(&self, rules: &RuleTree, projection: &[ResultItem]) -> Result<RunningFilter> {
        let predicate = Arc::new(rule::compile(self.table, rules)?);
        let (writers, row_size) = compile_projection(self.table, projection)?;
        if row_size == 0 {
            return Err(KradataError::RuleError("result projection is empty".into()));
        }
        let writers = Arc::new(writers);

        let heap = self.table.block().heap().clone();
        let row_count = self.table.row_count();
        let result_bytes = self
            .config
            .max_result_bytes
            .unwrap_or(row_count as usize * row_size as usize);

        let control_block = heap.allocate(ControlBlock::SIZE)?;
        control_block.view_mut().fill(0);
        let control_addr = control_block.offset();
        let control = ControlBlock { block: control_block };

        let result_block = heap.allocate(result_bytes)?;
        result_block.view_mut().fill(0);

        let worker_count = self.config.worker_count.max(1);
        log::debug!(
            "dispatching {worker_count} workers over {row_count} rows, batch {}, row size {row_size}",
            self.config.row_batch_size
        );

        let table_addr = self.table.block().offset();
        let table_size = self.table.block().size();
        let result_addr = result_block.offset();
        let result_size = result_block.size();
        let row_batch_size = self.config.row_batch_size;

        let handles = (0..worker_count)
            .map(|_| {
                let ctx = WorkerContext {
                    heap: heap.clone(),
                    table_addr,
                    table_size,
                    control_addr,
                    result_addr,
                    result_size,
                    predicate: predicate.clone(),
                    writers: writers.clone(),
                    row_size,
                    row_batch_size,
                };
                thread::spawn(move || run_worker(ctx))
            })
            .collect();

        Ok(RunningFilter {
            control: Some(control),
            result_block: Some(result_block),
            handles,
            row_size,
        })
    }

    /// Convenience for callers with no need for external cancellation:
    /// spawn and immediately join.
    pub fn run(&self, rules: &RuleTree, projection: &[ResultItem]) -> Result<FilterResult> {
        self.spawn(rules, projection)?.join()
    }
}
