// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel arena: one contiguous byte region serving every task
//! allocation.
//!
//! Blocks are placed bump-pointer fashion, each preceded by a [`BlockHeader`]
//! written directly into the backing memory, with no gaps between blocks in
//! `[0, heap_used)`. Freeing marks a block not-in-use without moving
//! anything; space comes back when [`Arena::compact`] slides the surviving
//! blocks forward.
//!
//! Allocations are named by [`MemHandle`], not by pointer. The arena keeps a
//! small table from handle index to block offset; compaction rewrites the
//! table as it moves blocks, so handles stay valid across it. Access to a
//! block's bytes goes through [`Arena::deref`]/[`Arena::deref_mut`], whose
//! borrows cannot outlive the next kernel operation -- which is exactly the
//! window in which an offset is guaranteed stable.

use abi::{Generation, MemHandle, MAX_MEM_HANDLES};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Bytes of bookkeeping preceding every block payload.
pub const HEADER_SIZE: usize = core::mem::size_of::<BlockHeader>();

/// Per-block header, resident in the arena immediately before the payload.
#[derive(
    Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[repr(C)]
pub struct BlockHeader {
    /// Payload size in bytes; always a multiple of 4.
    pub size: u32,
    /// Task id owning the block, or `KERNEL_OWNER` for kernel allocations.
    pub owner: i32,
    /// Nonzero while the block is live.
    pub in_use: u32,
    /// Handle table index for this block, or -1 once freed. Compaction uses
    /// this to retarget the handle when the block moves.
    pub handle: i32,
}

impl BlockHeader {
    pub fn is_in_use(&self) -> bool {
        self.in_use != 0
    }

    fn total_len(&self) -> Option<usize> {
        HEADER_SIZE.checked_add(self.size as usize)
    }
}

/// Why an allocation could not be placed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AllocError {
    /// Zero-byte allocations are not a thing.
    ZeroSize,
    /// Not enough room past `heap_used`; compaction may help.
    NoSpace,
    /// The handle table is fully occupied; only freeing helps.
    NoHandles,
}

/// Error returned when a handle doesn't name a live block: it was never
/// issued, was already freed, or belongs to a previous incarnation of its
/// table slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BadHandle;

/// Compaction walked a cursor past the end of the region, which means the
/// header chain is damaged. The caller must treat this as fatal.
#[derive(Copy, Clone, Debug)]
pub struct HeapCorruption;

/// What a successful free released.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlockInfo {
    pub size: usize,
    pub owner: i32,
}

/// What a compaction pass accomplished.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CompactStats {
    pub moved_blocks: usize,
    pub freed_bytes: usize,
}

#[derive(Copy, Clone, Debug, Default)]
struct HandleSlot {
    offset: usize,
    generation: Generation,
    live: bool,
}

/// The arena itself, over borrowed backing memory.
///
/// Borrowing the backing slice (rather than owning an array) lets a board
/// put the heap wherever its memory map wants it, and lets tests use a
/// local buffer.
pub struct Arena<'h> {
    heap: &'h mut [u8],
    heap_used: usize,
    slots: [HandleSlot; MAX_MEM_HANDLES],
}

impl<'h> Arena<'h> {
    pub fn new(heap: &'h mut [u8]) -> Self {
        Self {
            heap,
            heap_used: 0,
            slots: [HandleSlot::default(); MAX_MEM_HANDLES],
        }
    }

    /// Total capacity of the backing region.
    pub fn capacity(&self) -> usize {
        self.heap.len()
    }

    /// Bytes consumed by the block prefix, live or not.
    pub fn heap_used(&self) -> usize {
        self.heap_used
    }

    /// Bytes that can still be placed without compacting.
    pub fn available(&self) -> usize {
        self.heap.len() - self.heap_used
    }

    /// Attempts to place a block of `n` payload bytes (rounded up to a
    /// multiple of 4) owned by `owner`. Never compacts; the caller decides
    /// whether a `NoSpace` failure is worth a compaction pass.
    pub fn try_alloc(
        &mut self,
        n: usize,
        owner: i32,
    ) -> Result<MemHandle, AllocError> {
        if n == 0 {
            return Err(AllocError::ZeroSize);
        }
        let size = n.checked_add(3).ok_or(AllocError::NoSpace)? & !3;
        let total = HEADER_SIZE + size;
        if self.heap_used + total > self.heap.len() {
            return Err(AllocError::NoSpace);
        }

        let index = self
            .slots
            .iter()
            .position(|s| !s.live)
            .ok_or(AllocError::NoHandles)?;
        let generation = self.slots[index].generation.next();
        self.slots[index] = HandleSlot {
            offset: self.heap_used,
            generation,
            live: true,
        };

        let header = BlockHeader {
            size: size as u32,
            owner,
            in_use: 1,
            handle: index as i32,
        };
        self.write_header(self.heap_used, &header);
        self.heap_used += total;

        Ok(MemHandle::for_index_and_gen(index, generation))
    }

    /// Marks the block named by `handle` as free. The bytes stay where they
    /// are until the next compaction; only the accounting changes.
    pub fn free(&mut self, handle: MemHandle) -> Result<BlockInfo, BadHandle> {
        let index = self.slot_for(handle).ok_or(BadHandle)?;
        let offset = self.slots[index].offset;
        let mut header = self.read_header(offset).ok_or(BadHandle)?;
        if !header.is_in_use() {
            return Err(BadHandle);
        }

        let info = BlockInfo {
            size: header.size as usize,
            owner: header.owner,
        };
        header.in_use = 0;
        header.handle = -1;
        self.write_header(offset, &header);
        self.slots[index].live = false;
        Ok(info)
    }

    /// Scoped read access to a live block's payload.
    pub fn deref(&self, handle: MemHandle) -> Option<&[u8]> {
        let index = self.slot_for(handle)?;
        let offset = self.slots[index].offset;
        let header = self.read_header(offset)?;
        let start = offset + HEADER_SIZE;
        self.heap.get(start..start + header.size as usize)
    }

    /// Scoped write access to a live block's payload.
    pub fn deref_mut(&mut self, handle: MemHandle) -> Option<&mut [u8]> {
        let index = self.slot_for(handle)?;
        let offset = self.slots[index].offset;
        let header = self.read_header(offset)?;
        let start = offset + HEADER_SIZE;
        self.heap.get_mut(start..start + header.size as usize)
    }

    /// Slides every live block toward the front of the region, preserving
    /// their relative order, and gives the reclaimed bytes back to
    /// `available()`. Handles to moved blocks are retargeted and stay valid.
    pub fn compact(&mut self) -> Result<CompactStats, HeapCorruption> {
        let mut read = 0;
        let mut write = 0;
        let mut moved_blocks = 0;

        while read < self.heap_used {
            let header = self.read_header(read).ok_or(HeapCorruption)?;
            let total = header.total_len().ok_or(HeapCorruption)?;
            let next = read.checked_add(total).ok_or(HeapCorruption)?;
            if next > self.heap.len() || write > self.heap.len() {
                return Err(HeapCorruption);
            }

            if header.is_in_use() {
                if write != read {
                    self.heap.copy_within(read..next, write);
                    moved_blocks += 1;
                    if header.handle >= 0 {
                        if let Some(slot) =
                            self.slots.get_mut(header.handle as usize)
                        {
                            slot.offset = write;
                        }
                    }
                }
                write += total;
            }
            read = next;
        }

        let freed_bytes = self.heap_used - write;
        self.heap_used = write;
        Ok(CompactStats {
            moved_blocks,
            freed_bytes,
        })
    }

    /// Frees every live block owned by `owner`, returning the sum of their
    /// payload sizes. Used when a task dies.
    pub fn release_owned(&mut self, owner: i32) -> usize {
        let mut freed = 0;
        let mut offset = 0;
        while offset < self.heap_used {
            let Some(mut header) = self.read_header(offset) else {
                break;
            };
            let Some(total) = header.total_len() else {
                break;
            };
            if header.is_in_use() && header.owner == owner {
                freed += header.size as usize;
                if header.handle >= 0 {
                    if let Some(slot) =
                        self.slots.get_mut(header.handle as usize)
                    {
                        slot.live = false;
                    }
                }
                header.in_use = 0;
                header.handle = -1;
                self.write_header(offset, &header);
            }
            offset += total;
        }
        freed
    }

    /// Walks the block prefix in address order, yielding each header and its
    /// offset. Diagnostics and invariant checks build on this.
    pub fn blocks(&self) -> impl Iterator<Item = (usize, BlockHeader)> + '_ {
        let mut offset = 0;
        core::iter::from_fn(move || {
            if offset >= self.heap_used {
                return None;
            }
            let header = self.read_header(offset)?;
            let here = offset;
            offset = offset.checked_add(header.total_len()?)?;
            Some((here, header))
        })
    }

    fn slot_for(&self, handle: MemHandle) -> Option<usize> {
        let index = handle.index();
        let slot = self.slots.get(index)?;
        if slot.live && slot.generation == handle.generation() {
            Some(index)
        } else {
            None
        }
    }

    fn read_header(&self, offset: usize) -> Option<BlockHeader> {
        let bytes = self.heap.get(offset..)?;
        BlockHeader::read_from_prefix(bytes).ok().map(|(h, _)| h)
    }

    fn write_header(&mut self, offset: usize, header: &BlockHeader) {
        if let Some(bytes) = self.heap.get_mut(offset..) {
            let _ = header.write_to_prefix(bytes);
        }
    }

    /// Test support: damage a header in place to exercise the corruption
    /// detection paths.
    #[cfg(test)]
    pub(crate) fn test_overwrite_header(
        &mut self,
        offset: usize,
        header: &BlockHeader,
    ) {
        self.write_header(offset, header);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_rounds_up_and_advances_contiguously() {
        let mut backing = [0; 256];
        let mut arena = Arena::new(&mut backing);

        let a = arena.try_alloc(5, 1).expect("alloc of 5 should fit");
        assert_eq!(arena.deref(a).map(|b| b.len()), Some(8));
        assert_eq!(arena.heap_used(), HEADER_SIZE + 8);

        let b = arena.try_alloc(4, 1).expect("alloc of 4 should fit");
        assert_eq!(arena.deref(b).map(|b| b.len()), Some(4));
        assert_eq!(arena.heap_used(), 2 * HEADER_SIZE + 12);
        assert_eq!(arena.available(), 256 - arena.heap_used());
    }

    #[test]
    fn zero_byte_allocs_are_rejected() {
        let mut backing = [0; 64];
        let mut arena = Arena::new(&mut backing);
        assert_eq!(arena.try_alloc(0, 1), Err(AllocError::ZeroSize));
    }

    #[test]
    fn exhaustion_reports_no_space() {
        let mut backing = [0; 64];
        let mut arena = Arena::new(&mut backing);
        arena
            .try_alloc(64 - HEADER_SIZE, 1)
            .expect("exactly-fitting alloc should succeed");
        assert_eq!(arena.try_alloc(4, 1), Err(AllocError::NoSpace));
    }

    #[test]
    fn free_then_stale_handle_misses() {
        let mut backing = [0; 128];
        let mut arena = Arena::new(&mut backing);
        let h = arena.try_alloc(16, 2).expect("alloc should fit");

        let info = arena.free(h).expect("first free should succeed");
        assert_eq!(info.size, 16);
        assert_eq!(info.owner, 2);

        // Double free and post-free access both miss cleanly.
        assert_eq!(arena.free(h), Err(BadHandle));
        assert!(arena.deref(h).is_none());

        // Freeing does not give back space until compaction.
        assert_eq!(arena.heap_used(), HEADER_SIZE + 16);
    }

    #[test]
    fn reused_slot_gets_a_new_generation() {
        let mut backing = [0; 128];
        let mut arena = Arena::new(&mut backing);
        let h1 = arena.try_alloc(8, 1).expect("alloc should fit");
        arena.free(h1).expect("free should succeed");

        let h2 = arena.try_alloc(8, 1).expect("realloc should fit");
        assert_eq!(h1.index(), h2.index(), "slot should be reused");
        assert_ne!(h1, h2, "stale handle must not alias the new block");
        assert!(arena.deref(h1).is_none());
        assert!(arena.deref(h2).is_some());
    }

    #[test]
    fn compaction_slides_survivors_and_keeps_order() {
        let mut backing = [0; 256];
        let mut arena = Arena::new(&mut backing);

        let a = arena.try_alloc(16, 1).expect("a should fit");
        let b = arena.try_alloc(32, 1).expect("b should fit");
        let c = arena.try_alloc(16, 1).expect("c should fit");
        arena.deref_mut(a).expect("a is live").fill(0xAA);
        arena.deref_mut(c).expect("c is live").fill(0xCC);

        arena.free(b).expect("free of b should succeed");
        let used_before = arena.heap_used();

        let stats = arena.compact().expect("compaction should succeed");
        assert_eq!(stats.moved_blocks, 1, "only c needed to move");
        assert_eq!(stats.freed_bytes, HEADER_SIZE + 32);
        assert_eq!(arena.heap_used(), used_before - (HEADER_SIZE + 32));

        // A stays at the front; C follows immediately, same sizes.
        let blocks: Vec<_> = arena.blocks().collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].0, 0);
        assert_eq!(blocks[0].1.size, 16);
        assert_eq!(blocks[1].0, HEADER_SIZE + 16);
        assert_eq!(blocks[1].1.size, 16);

        // Handles survive the move with contents intact.
        assert!(arena.deref(a).expect("a survives").iter().all(|&x| x == 0xAA));
        assert!(arena.deref(c).expect("c survives").iter().all(|&x| x == 0xCC));
    }

    #[test]
    fn compaction_of_fully_live_heap_is_a_no_op() {
        let mut backing = [0; 128];
        let mut arena = Arena::new(&mut backing);
        arena.try_alloc(8, 1).expect("alloc should fit");
        arena.try_alloc(8, 1).expect("alloc should fit");
        let used = arena.heap_used();

        let stats = arena.compact().expect("compaction should succeed");
        assert_eq!(
            stats,
            CompactStats {
                moved_blocks: 0,
                freed_bytes: 0
            }
        );
        assert_eq!(arena.heap_used(), used);
    }

    #[test]
    fn release_owned_sweeps_only_that_owner() {
        let mut backing = [0; 256];
        let mut arena = Arena::new(&mut backing);
        let a = arena.try_alloc(16, 3).expect("should fit");
        let b = arena.try_alloc(16, 4).expect("should fit");
        let c = arena.try_alloc(16, 3).expect("should fit");

        assert_eq!(arena.release_owned(3), 32);
        assert!(arena.deref(a).is_none());
        assert!(arena.deref(c).is_none());
        assert!(arena.deref(b).is_some(), "other owner's block untouched");

        // After compaction only the survivor remains.
        arena.compact().expect("compaction should succeed");
        assert_eq!(arena.blocks().count(), 1);
        assert_eq!(arena.heap_used(), HEADER_SIZE + 16);
    }

    #[test]
    fn corrupted_header_chain_is_detected() {
        let mut backing = [0; 128];
        let mut arena = Arena::new(&mut backing);
        let _ = arena.try_alloc(16, 1).expect("alloc should fit");

        // Vandalize the size field so the chain runs off the end.
        let huge = BlockHeader {
            size: u32::MAX - 64,
            owner: 1,
            in_use: 1,
            handle: 0,
        };
        arena.write_header(0, &huge);
        assert!(arena.compact().is_err());
    }
}
