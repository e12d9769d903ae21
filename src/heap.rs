//! A single shared byte region with a free-list sub-allocator.
//!
//! `Heap` is the one mutable buffer every worker reads and writes through.
//! It is reconstructed, not copied, across worker boundaries: a `Heap`
//! handle is just an `Arc` clone, and a `MemoryBlock` is an (offset, size)
//! window that any holder of a `Heap` clone can turn back into a byte view
//! via [`MemoryBlock::at`].

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{KradataError, Result};

/// Every allocation is aligned to the widest primitive in the type
/// registry (an `f32`/`u32`/`i32` is 4 bytes; 8 covers all of them with
/// headroom and matches spec.md's stated alignment).
const ALIGN: usize = 8;

fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) / align * align
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Extent {
    offset: usize,
    size: usize,
}

struct HeapInner {
    buffer: UnsafeCell<Vec<u8>>,
    capacity: usize,
    free: Mutex<Vec<Extent>>,
    /// offset -> reserved size, for blocks produced by `allocate`. Only
    /// entries here may be `free`d; a block reconstructed from a bare
    /// address via `MemoryBlock::at` is a read/write view, not an owner.
    live: Mutex<HashMap<usize, usize>>,
}

// SAFETY: all mutation of `buffer` goes through offsets handed out by the
// free-list allocator (disjoint by construction) or through `MemoryBlock`
// windows the caller promises not to alias mutably (spec.md 4.1: "mutual
// exclusion on overlapping writes is the caller's responsibility").
unsafe impl Send for HeapInner {}
unsafe impl Sync for HeapInner {}

/// A contiguous shared byte buffer of fixed capacity, sub-allocated into
/// [`MemoryBlock`]s. Cheap to clone: clones share the same backing bytes.
#[derive(Clone)]
pub struct Heap {
    inner: Arc<HeapInner>,
}

impl Heap {
    /// Creates a new heap of `capacity` bytes, zero-initialized.
    pub fn new(capacity: usize) -> Self {
        Heap {
            inner: Arc::new(HeapInner {
                buffer: UnsafeCell::new(vec![0u8; capacity]),
                capacity,
                free: Mutex::new(vec![Extent { offset: 0, size: capacity }]),
                live: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    fn raw_ptr(&self) -> *mut u8 {
        // SAFETY: the Vec never reallocates after construction (fixed
        // capacity, never pushed to), so this pointer stays valid for the
        // lifetime of `inner`.
        unsafe { (*self.inner.buffer.get()).as_mut_ptr() }
    }

    /// Allocates a block of exactly `size` bytes, first-fit, splitting the
    /// free extent it lands in. The block's start offset is 8-byte aligned.
    pub fn allocate(&self, size: usize) -> Result<MemoryBlock> {
        let reserved = align_up(size, ALIGN);
        let mut free = self.inner.free.lock().unwrap();
        let slot = free.iter().position(|e| e.size >= reserved).ok_or_else(|| {
            log::warn!(
                "heap exhausted: cannot allocate {size} bytes ({reserved} reserved) from a heap of {} bytes",
                self.inner.capacity
            );
            KradataError::ResourceExhausted(format!(
                "cannot allocate {size} bytes ({reserved} reserved) from a heap of {} bytes",
                self.inner.capacity
            ))
        })?;

        let extent = free[slot];
        if extent.size == reserved {
            free.remove(slot);
        } else {
            free[slot] = Extent {
                offset: extent.offset + reserved,
                size: extent.size - reserved,
            };
        }
        drop(free);

        self.inner.live.lock().unwrap().insert(extent.offset, reserved);
        Ok(MemoryBlock {
            heap: self.clone(),
            offset: extent.offset,
            size,
        })
    }

    /// Returns `(offset, reserved_size)` to the free list, coalescing with
    /// adjacent free extents.
    fn release(&self, offset: usize, size: usize) {
        let mut free = self.inner.free.lock().unwrap();
        let pos = free.partition_point(|e| e.offset < offset);
        free.insert(pos, Extent { offset, size });

        if pos + 1 < free.len() && free[pos].offset + free[pos].size == free[pos + 1].offset {
            free[pos].size += free[pos + 1].size;
            free.remove(pos + 1);
        }
        if pos > 0 && free[pos - 1].offset + free[pos - 1].size == free[pos].offset {
            free[pos - 1].size += free[pos].size;
            free.remove(pos);
        }
    }

    fn free_block(&self, offset: usize, expected_size: usize) -> Result<()> {
        let reserved = {
            let mut live = self.inner.live.lock().unwrap();
            live.remove(&offset).ok_or_else(|| {
                KradataError::InvalidHandle(format!(
                    "double free or unknown block at offset {offset}"
                ))
            })?
        };
        debug_assert!(reserved >= expected_size);
        self.release(offset, reserved);
        Ok(())
    }
}

/// A typed window `(heap, offset, size)` into a [`Heap`]. Produced either by
/// [`Heap::allocate`] (an owning block, freeable) or by [`MemoryBlock::at`]
/// (a reconstructed view, e.g. a worker rebuilding the table/result region
/// from the addresses in its dispatch message, not freeable).
pub struct MemoryBlock {
    heap: Heap,
    offset: usize,
    size: usize,
}

impl MemoryBlock {
    /// Reconstructs a block from a bare `(offset, size)`, as a worker does
    /// on receiving its dispatch message. Bounds-checked against the
    /// heap's capacity only; this is a view, not a claim of ownership.
    pub fn at(heap: Heap, offset: usize, size: usize) -> Result<MemoryBlock> {
        if offset.checked_add(size).map_or(true, |end| end > heap.capacity()) {
            return Err(KradataError::InvalidHandle(format!(
                "block [{offset}, {offset}+{size}) exceeds heap capacity {}",
                heap.capacity()
            )));
        }
        Ok(MemoryBlock { heap, offset, size })
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// A read-only view over this block's bytes.
    pub fn view(&self) -> &[u8] {
        let ptr = self.heap.raw_ptr();
        // SAFETY: offset+size was bounds-checked at construction time, and
        // the backing Vec never reallocates.
        unsafe { std::slice::from_raw_parts(ptr.add(self.offset), self.size) }
    }

    /// A mutable view over this block's bytes.
    ///
    /// # Safety invariant
    /// Callers sharing the same underlying heap must not hold two mutable
    /// (or a mutable and a readable) views over overlapping byte ranges at
    /// the same time. The filter executor upholds this by construction:
    /// every writer's target offset is assigned by an atomic fetch-add over
    /// a fixed row size, so distinct result slots never overlap, and the
    /// table region is never written to during a run.
    #[allow(clippy::mut_from_ref)]
    pub fn view_mut(&self) -> &mut [u8] {
        let ptr = self.heap.raw_ptr();
        unsafe { std::slice::from_raw_parts_mut(ptr.add(self.offset), self.size) }
    }

    /// Releases this block back to the heap. Fails with `InvalidHandle` if
    /// this block was never allocated (only reconstructed) or was already
    /// freed.
    pub fn free(self) -> Result<()> {
        self.heap.free_block(self.offset, self.size)
    }
}
