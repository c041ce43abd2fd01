//! Buddy Allocator
//!
//! Binary-buddy allocator used for carving placed-resource regions out of
//! GPU heaps. Every block is a power-of-two multiple of the minimum block
//! size, so offsets automatically satisfy the 64 KiB placed-resource
//! alignment and freed neighbours coalesce in O(log n).

use rustc_hash::FxHashSet;

/// Minimum block size: the D3D12 placed-resource placement alignment.
pub const MIN_BLOCK_SIZE: u64 = 64 * 1024;

/// An allocation handed out by [`BuddyAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuddyBlock {
    offset: u64,
    order: u32,
}

impl BuddyBlock {
    /// Byte offset inside the managed range.
    #[inline]
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Usable block size in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        MIN_BLOCK_SIZE << self.order
    }
}

/// Binary-buddy allocator over `[0, size)`.
///
/// `size` is rounded down to a power-of-two multiple of
/// [`MIN_BLOCK_SIZE`]; heaps are created at power-of-two sizes so nothing
/// is lost in practice.
pub struct BuddyAllocator {
    /// Free block offsets, indexed by order.
    free_lists: Vec<FxHashSet<u64>>,
    max_order: u32,
    free_bytes: u64,
}

impl BuddyAllocator {
    #[must_use]
    pub fn new(size_in_bytes: u64) -> Self {
        let usable = size_in_bytes
            .next_power_of_two()
            .min(prev_power_of_two(size_in_bytes.max(MIN_BLOCK_SIZE)))
            .max(MIN_BLOCK_SIZE);
        let max_order = (usable / MIN_BLOCK_SIZE).ilog2();

        let mut free_lists: Vec<FxHashSet<u64>> =
            (0..=max_order).map(|_| FxHashSet::default()).collect();
        free_lists[max_order as usize].insert(0);

        Self {
            free_lists,
            max_order,
            free_bytes: usable,
        }
    }

    /// Bytes not currently allocated.
    #[inline]
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.free_bytes
    }

    /// Total managed bytes.
    #[inline]
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        MIN_BLOCK_SIZE << self.max_order
    }

    fn order_for_size(size: u64) -> u32 {
        let blocks = size.div_ceil(MIN_BLOCK_SIZE).next_power_of_two();
        blocks.ilog2()
    }

    /// Allocates a block of at least `size` bytes.
    pub fn allocate(&mut self, size: u64) -> Option<BuddyBlock> {
        let order = Self::order_for_size(size.max(1));
        if order > self.max_order {
            return None;
        }

        // Find the smallest populated order that can serve the request.
        let mut source = order;
        while source <= self.max_order && self.free_lists[source as usize].is_empty() {
            source += 1;
        }
        if source > self.max_order {
            return None;
        }

        let offset = *self.free_lists[source as usize].iter().next().unwrap();
        self.free_lists[source as usize].remove(&offset);

        // Split down to the requested order, returning the upper halves.
        let mut current = source;
        while current > order {
            current -= 1;
            let buddy = offset + (MIN_BLOCK_SIZE << current);
            self.free_lists[current as usize].insert(buddy);
        }

        self.free_bytes -= MIN_BLOCK_SIZE << order;
        Some(BuddyBlock { offset, order })
    }

    /// Returns a block, coalescing with its buddy chain.
    pub fn free(&mut self, block: BuddyBlock) {
        let mut offset = block.offset;
        let mut order = block.order;
        self.free_bytes += MIN_BLOCK_SIZE << order;

        while order < self.max_order {
            let buddy = offset ^ (MIN_BLOCK_SIZE << order);
            if !self.free_lists[order as usize].remove(&buddy) {
                break;
            }
            offset = offset.min(buddy);
            order += 1;
        }

        self.free_lists[order as usize].insert(offset);
    }
}

fn prev_power_of_two(value: u64) -> u64 {
    debug_assert!(value > 0);
    1 << value.ilog2()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_and_coalesce() {
        let mut buddy = BuddyAllocator::new(1 << 20); // 16 min blocks
        let total = buddy.total_bytes();

        let a = buddy.allocate(MIN_BLOCK_SIZE).unwrap();
        let b = buddy.allocate(MIN_BLOCK_SIZE).unwrap();
        assert_ne!(a.offset(), b.offset());
        assert_eq!(a.offset() % MIN_BLOCK_SIZE, 0);

        buddy.free(a);
        buddy.free(b);
        assert_eq!(buddy.free_bytes(), total);

        // Full coalescing: the whole range is allocatable again.
        let whole = buddy.allocate(total).unwrap();
        assert_eq!(whole.offset(), 0);
        buddy.free(whole);
    }

    #[test]
    fn test_oversized_request_fails() {
        let mut buddy = BuddyAllocator::new(1 << 20);
        assert!(buddy.allocate((1 << 20) + 1).is_none());
    }

    #[test]
    fn test_non_power_of_two_rounds_down() {
        let buddy = BuddyAllocator::new((1 << 20) + 12345);
        assert_eq!(buddy.total_bytes(), 1 << 20);
    }
}
