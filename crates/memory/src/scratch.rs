use std::slice;

use log::trace;

use crate::{Address, PoolId, Slice};

pub const DEFAULT_SCRATCH_CAPACITY: usize = 64 * 1024;

const ALIGNMENT: usize = 16;

/// A region handed out by a [`ScratchArena`]. Valid until the arena is reset.
#[derive(Debug, Clone, Copy)]
pub struct ScratchBuffer {
    slice: Slice<u8>,
}

impl ScratchBuffer {
    pub fn slice(&self) -> Slice<u8> {
        self.slice
    }

    pub fn len(&self) -> usize {
        self.slice.count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.slice.count() == 0
    }
}

/// Bump allocator for per-call temporary data.
///
/// Allocations come out of one fixed block. A request that does not fit in
/// what is left of the block gets its own heap allocation, which lives until
/// the next [`ScratchArena::reset`].
#[derive(Debug)]
pub struct ScratchArena {
    block: Box<[u8]>,
    head: usize,
    overflow: Vec<Box<[u8]>>,
}

impl Default for ScratchArena {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SCRATCH_CAPACITY)
    }
}

impl ScratchArena {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            block: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            overflow: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.block.len()
    }

    pub fn used(&self) -> usize {
        self.head
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow.len()
    }

    pub fn alloc(&mut self, size: usize) -> ScratchBuffer {
        let start = (self.head + ALIGNMENT - 1) & !(ALIGNMENT - 1);

        let ptr = if start + size <= self.block.len() {
            self.head = start + size;
            self.block[start..].as_mut_ptr()
        } else {
            trace!("Scratch request of {} bytes spilled to the heap", size);
            let mut spill = vec![0u8; size].into_boxed_slice();
            let ptr = spill.as_mut_ptr();
            self.overflow.push(spill);
            ptr
        };

        ScratchBuffer {
            slice: unsafe { Slice::new(Address::from_ptr(ptr as *const u8), size as u64, PoolId::SCRATCH) },
        }
    }

    /// Copies `data` into a fresh scratch allocation.
    pub fn alloc_copy(&mut self, data: &[u8]) -> ScratchBuffer {
        let buffer = self.alloc(data.len());
        self.get_mut(&buffer).copy_from_slice(data);
        buffer
    }

    pub fn get(&self, buffer: &ScratchBuffer) -> &[u8] {
        if buffer.is_empty() {
            return &[];
        }

        // Buffers only ever point into `block` or `overflow`, both owned by self.
        unsafe { slice::from_raw_parts(buffer.slice.base().as_ptr::<u8>(), buffer.len()) }
    }

    pub fn get_mut(&mut self, buffer: &ScratchBuffer) -> &mut [u8] {
        if buffer.is_empty() {
            return &mut [];
        }

        unsafe {
            slice::from_raw_parts_mut(buffer.slice.base().as_ptr::<u8>() as *mut u8, buffer.len())
        }
    }

    pub fn reset(&mut self) {
        self.head = 0;
        self.overflow.clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::{ScratchArena, PoolId};

    #[test]
    fn scratch_allocations_are_bumped_and_aligned() {
        let mut arena = ScratchArena::with_capacity(256);
        let a = arena.alloc(3);
        let b = arena.alloc(8);

        assert_eq!(b.slice().base().as_u64() - a.slice().base().as_u64(), 16);
        assert_eq!(arena.used(), 24);
        assert_eq!(a.slice().pool(), PoolId::SCRATCH);
    }

    #[test]
    fn oversized_requests_fall_back_to_the_heap() {
        let mut arena = ScratchArena::with_capacity(64);
        let small = arena.alloc(32);
        let big = arena.alloc_copy(&[7u8; 128]);

        assert_eq!(arena.overflow_count(), 1);
        assert_eq!(arena.get(&big), &[7u8; 128][..]);
        assert_eq!(small.len(), 32);
    }

    #[test]
    fn reset_rewinds_the_arena() {
        let mut arena = ScratchArena::with_capacity(64);
        arena.alloc(48);
        arena.alloc(48);
        arena.reset();

        assert_eq!(arena.used(), 0);
        assert_eq!(arena.overflow_count(), 0);
    }
}
