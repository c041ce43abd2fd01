//! TLSF Allocator
//!
//! A two-level segregated-fit allocator over an abstract byte range.
//! Backs buffer sub-allocation: O(1) allocate and free with bounded
//! fragmentation, which matters because sub-allocations are created and
//! destroyed continuously while a frame is being built.
//!
//! The allocator manages offsets only; it never touches the memory it
//! describes.

/// Minimum block size in bytes. Requests are rounded up to this.
const MIN_BLOCK_SIZE: u64 = 16;

/// log2 of the number of second-level subdivisions per first-level class.
const SL_SHIFT: u32 = 4;
const SL_COUNT: usize = 1 << SL_SHIFT;

/// Number of first-level classes; supports ranges up to 2^40 bytes.
const FL_COUNT: usize = 40;

const NONE: u32 = u32::MAX;

fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// (first level, second level) bucket of a block of `size` bytes, rounding
/// down: every block in the bucket is at least as large as the bucket base.
fn mapping_insert(size: u64) -> (usize, usize) {
    let fl = 63 - size.leading_zeros() as usize;
    if fl < SL_SHIFT as usize {
        return (0, size as usize >> 1);
    }
    let sl = ((size >> (fl as u32 - SL_SHIFT)) & (SL_COUNT as u64 - 1)) as usize;
    (fl - SL_SHIFT as usize + 1, sl)
}

/// Bucket to start searching from for a request of `size` bytes, rounding
/// up so every block found is guaranteed to fit.
fn mapping_search(size: u64) -> (usize, usize) {
    let fl = 63 - size.leading_zeros() as usize;
    if fl < SL_SHIFT as usize {
        return mapping_insert(size);
    }
    let rounded = size + (1u64 << (fl as u32 - SL_SHIFT)) - 1;
    mapping_insert(rounded)
}

#[derive(Clone, Copy)]
struct Block {
    offset: u64,
    size: u64,
    is_free: bool,
    prev_phys: u32,
    next_phys: u32,
    prev_free: u32,
    next_free: u32,
}

/// An allocation handed out by [`TlsfAllocator`].
///
/// Holds the block index; return it via [`TlsfAllocator::free`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlsfBlock {
    index: u32,
    offset: u64,
    size: u64,
}

impl TlsfBlock {
    /// Byte offset of the allocation inside the managed range.
    #[inline]
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Usable size of the allocation in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Two-level segregated-fit allocator.
pub struct TlsfAllocator {
    blocks: Vec<Block>,
    free_block_indices: Vec<u32>,
    free_lists: [[u32; SL_COUNT]; FL_COUNT],
    fl_bitmap: u64,
    sl_bitmaps: [u32; FL_COUNT],
    total_size: u64,
    free_bytes: u64,
}

impl TlsfAllocator {
    /// Creates an allocator managing `[0, size_in_bytes)`.
    #[must_use]
    pub fn new(size_in_bytes: u64) -> Self {
        let mut allocator = Self {
            blocks: Vec::with_capacity(32),
            free_block_indices: Vec::new(),
            free_lists: [[NONE; SL_COUNT]; FL_COUNT],
            fl_bitmap: 0,
            sl_bitmaps: [0; FL_COUNT],
            total_size: size_in_bytes,
            free_bytes: size_in_bytes,
        };

        if size_in_bytes >= MIN_BLOCK_SIZE {
            let initial = allocator.new_block(Block {
                offset: 0,
                size: size_in_bytes,
                is_free: true,
                prev_phys: NONE,
                next_phys: NONE,
                prev_free: NONE,
                next_free: NONE,
            });
            allocator.push_free(initial);
        }

        allocator
    }

    /// Total managed size in bytes.
    #[inline]
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bytes not currently allocated.
    #[inline]
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.free_bytes
    }

    /// Allocates `size` bytes at the given power-of-two alignment.
    ///
    /// Returns `None` when no free block can satisfy the request.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<TlsfBlock> {
        debug_assert!(alignment.is_power_of_two());
        let size = align_up(size.max(MIN_BLOCK_SIZE), MIN_BLOCK_SIZE);

        // Every block offset is a multiple of MIN_BLOCK_SIZE, so only
        // coarser alignments need padding. Searching for the padded size
        // guarantees that the block we find can hold the request at the
        // required alignment.
        let padded = if alignment <= MIN_BLOCK_SIZE {
            size
        } else {
            size + alignment - 1
        };
        let index = self.find_free_block(padded)?;
        self.remove_free(index);

        let (offset, block_size) = (self.blocks[index as usize].offset, self.blocks[index as usize].size);
        let aligned_offset = align_up(offset, alignment);
        let head_pad = aligned_offset - offset;
        debug_assert!(head_pad + size <= block_size);

        // Split off the alignment padding in front.
        let index = if head_pad >= MIN_BLOCK_SIZE {
            let tail = self.split(index, head_pad);
            let pad = index;
            self.blocks[pad as usize].is_free = true;
            self.push_free(pad);
            tail
        } else if head_pad > 0 {
            // Too small to stand alone; fold it into the allocation.
            index
        } else {
            index
        };

        // Split off the tail beyond the requested size.
        let used = (aligned_offset - self.blocks[index as usize].offset) + size;
        if self.blocks[index as usize].size - used >= MIN_BLOCK_SIZE {
            let tail = self.split(index, used);
            self.blocks[tail as usize].is_free = true;
            self.push_free(tail);
        }

        let block = &mut self.blocks[index as usize];
        block.is_free = false;
        self.free_bytes -= block.size;

        Some(TlsfBlock {
            index,
            offset: aligned_offset,
            size,
        })
    }

    /// Returns an allocation to the free pool, coalescing with physical
    /// neighbours.
    pub fn free(&mut self, allocation: TlsfBlock) {
        let mut index = allocation.index;
        debug_assert!(!self.blocks[index as usize].is_free, "double free");

        self.free_bytes += self.blocks[index as usize].size;
        self.blocks[index as usize].is_free = true;

        // Merge with the previous physical block.
        let prev = self.blocks[index as usize].prev_phys;
        if prev != NONE && self.blocks[prev as usize].is_free {
            self.remove_free(prev);
            self.merge_into(prev, index);
            index = prev;
        }

        // Merge with the next physical block.
        let next = self.blocks[index as usize].next_phys;
        if next != NONE && self.blocks[next as usize].is_free {
            self.remove_free(next);
            self.merge_into(index, next);
        }

        self.push_free(index);
    }

    // ── Internals ──────────────────────────────────────────────────────────

    fn new_block(&mut self, block: Block) -> u32 {
        if let Some(reused) = self.free_block_indices.pop() {
            self.blocks[reused as usize] = block;
            reused
        } else {
            self.blocks.push(block);
            (self.blocks.len() - 1) as u32
        }
    }

    /// Splits `index` so that it keeps `head_size` bytes; returns the new
    /// trailing block.
    fn split(&mut self, index: u32, head_size: u64) -> u32 {
        let (offset, size, next_phys) = {
            let block = &self.blocks[index as usize];
            (block.offset, block.size, block.next_phys)
        };
        debug_assert!(head_size < size);

        let tail = self.new_block(Block {
            offset: offset + head_size,
            size: size - head_size,
            is_free: false,
            prev_phys: index,
            next_phys,
            prev_free: NONE,
            next_free: NONE,
        });

        if next_phys != NONE {
            self.blocks[next_phys as usize].prev_phys = tail;
        }
        let head = &mut self.blocks[index as usize];
        head.size = head_size;
        head.next_phys = tail;

        tail
    }

    /// Merges physical neighbour `second` into `first` and retires it.
    fn merge_into(&mut self, first: u32, second: u32) {
        let (second_size, second_next) = {
            let block = &self.blocks[second as usize];
            (block.size, block.next_phys)
        };

        if second_next != NONE {
            self.blocks[second_next as usize].prev_phys = first;
        }
        let block = &mut self.blocks[first as usize];
        block.size += second_size;
        block.next_phys = second_next;

        self.free_block_indices.push(second);
    }

    fn push_free(&mut self, index: u32) {
        let size = self.blocks[index as usize].size;
        let (fl, sl) = mapping_insert(size);

        let head = self.free_lists[fl][sl];
        self.blocks[index as usize].prev_free = NONE;
        self.blocks[index as usize].next_free = head;
        if head != NONE {
            self.blocks[head as usize].prev_free = index;
        }
        self.free_lists[fl][sl] = index;
        self.fl_bitmap |= 1 << fl;
        self.sl_bitmaps[fl] |= 1 << sl;
    }

    fn remove_free(&mut self, index: u32) {
        let size = self.blocks[index as usize].size;
        let (fl, sl) = mapping_insert(size);

        let (prev, next) = {
            let block = &self.blocks[index as usize];
            (block.prev_free, block.next_free)
        };

        if prev != NONE {
            self.blocks[prev as usize].next_free = next;
        } else {
            self.free_lists[fl][sl] = next;
        }
        if next != NONE {
            self.blocks[next as usize].prev_free = prev;
        }

        if self.free_lists[fl][sl] == NONE {
            self.sl_bitmaps[fl] &= !(1 << sl);
            if self.sl_bitmaps[fl] == 0 {
                self.fl_bitmap &= !(1 << fl);
            }
        }

        let block = &mut self.blocks[index as usize];
        block.prev_free = NONE;
        block.next_free = NONE;
    }

    fn find_free_block(&self, size: u64) -> Option<u32> {
        let (fl, sl) = mapping_search(size);
        if fl >= FL_COUNT {
            return None;
        }

        // Same first level, same-or-larger second level.
        let sl_mask = self.sl_bitmaps[fl] & (!0u32 << sl);
        if sl_mask != 0 {
            let sl = sl_mask.trailing_zeros() as usize;
            return Some(self.free_lists[fl][sl]);
        }

        // Any strictly larger first level.
        let fl_mask = self.fl_bitmap & (!0u64 << (fl + 1));
        if fl_mask == 0 {
            return None;
        }
        let fl = fl_mask.trailing_zeros() as usize;
        let sl = self.sl_bitmaps[fl].trailing_zeros() as usize;
        Some(self.free_lists[fl][sl])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_free_roundtrip() {
        let mut tlsf = TlsfAllocator::new(64 * 1024);
        assert_eq!(tlsf.free_bytes(), 64 * 1024);

        let a = tlsf.allocate(1000, 256).unwrap();
        assert_eq!(a.offset() % 256, 0);
        let b = tlsf.allocate(4096, 4096).unwrap();
        assert_eq!(b.offset() % 4096, 0);
        assert!(a.offset() + 1000 <= b.offset() || b.offset() + 4096 <= a.offset());

        tlsf.free(a);
        tlsf.free(b);
        assert_eq!(tlsf.free_bytes(), 64 * 1024);

        // After full coalescing, one max-size allocation must succeed.
        let whole = tlsf.allocate(64 * 1024, 16).unwrap();
        assert_eq!(whole.offset(), 0);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let mut tlsf = TlsfAllocator::new(4096);
        let a = tlsf.allocate(4096, 16).unwrap();
        assert!(tlsf.allocate(16, 16).is_none());
        tlsf.free(a);
        assert!(tlsf.allocate(16, 16).is_some());
    }

    #[test]
    fn test_many_small_allocations() {
        let mut tlsf = TlsfAllocator::new(1 << 20);
        let mut live = Vec::new();
        for i in 0..512 {
            let block = tlsf.allocate(64 + (i % 7) * 32, 64).unwrap();
            assert_eq!(block.offset() % 64, 0);
            live.push(block);
        }
        // Free every other allocation, then refill.
        for block in live.iter().step_by(2) {
            tlsf.free(*block);
        }
        for _ in 0..128 {
            assert!(tlsf.allocate(64, 64).is_some());
        }
    }
}
