// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bucket allocator: a growable arena of fixed-size blocks.
//!
//! Memory is one initial block followed by a chain of equally sized buckets.
//! Appending never moves bytes that were already handed out, so every address
//! returned by [`BucketAllocator::emplace_back`] stays valid until
//! [`BucketAllocator::deallocate`].

use std::alloc::{self, Layout};
use std::ptr::NonNull;

struct Block {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl Block {
    fn new(bytes: usize, align: usize) -> Self {
        let layout = match Layout::from_size_align(bytes, align) {
            Ok(layout) => layout,
            Err(_) => panic!("invalid block layout: {bytes} bytes aligned to {align}"),
        };
        // SAFETY: `bytes` is non-zero (checked by `allocate`).
        let raw = unsafe { alloc::alloc(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        Self { ptr, layout }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        // SAFETY: `ptr` was allocated with exactly this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// Stable-address byte arena
pub struct BucketAllocator {
    initial: Option<Block>,
    buckets: Vec<Block>,
    initial_capacity: usize,
    bucket_capacity: usize,
    align: usize,
    size: usize,
}

// SAFETY: the allocator exclusively owns its blocks; access to the bytes is
// governed by the caller holding `&` or `&mut` to the allocator.
unsafe impl Send for BucketAllocator {}
unsafe impl Sync for BucketAllocator {}

impl BucketAllocator {
    /// Create an unallocated arena
    pub const fn new() -> Self {
        Self {
            initial: None,
            buckets: Vec::new(),
            initial_capacity: 0,
            bucket_capacity: 0,
            align: 1,
            size: 0,
        }
    }

    /// Configure block sizes (in bytes) and allocate the initial block.
    ///
    /// # Panics
    /// If already allocated, if either capacity is zero, or if a capacity is
    /// not a multiple of the element stride.
    pub fn allocate(&mut self, initial_capacity: usize, bucket_capacity: usize, element: Layout) {
        assert!(
            !self.is_allocated(),
            "BucketAllocator::allocate called twice without deallocate"
        );
        assert!(
            initial_capacity > 0 && bucket_capacity > 0,
            "bucket capacities must be non-zero"
        );
        let stride = stride_of(element);
        assert!(
            initial_capacity % stride == 0 && bucket_capacity % stride == 0,
            "bucket capacities must be multiples of the element stride ({stride})"
        );

        self.align = element.align();
        self.initial_capacity = initial_capacity;
        self.bucket_capacity = bucket_capacity;
        self.initial = Some(Block::new(initial_capacity, self.align));
        self.size = 0;
    }

    /// Append `byte_count` bytes and return their address.
    ///
    /// A request never straddles two blocks: if it does not fit in the tail of
    /// the current block, the tail is skipped and a fresh bucket is used.
    ///
    /// # Panics
    /// If the arena is unallocated or `byte_count > bucket_capacity`.
    pub fn emplace_back(&mut self, byte_count: usize) -> NonNull<u8> {
        assert!(self.is_allocated(), "emplace_back on unallocated arena");
        assert!(
            byte_count <= self.bucket_capacity,
            "request of {byte_count} bytes exceeds bucket capacity {}",
            self.bucket_capacity
        );

        let (block, offset) = self.locate(self.size);
        let block_capacity = if block == 0 {
            self.initial_capacity
        } else {
            self.bucket_capacity
        };
        if offset + byte_count > block_capacity {
            self.size += block_capacity - offset;
        }

        let start = self.size;
        self.size += byte_count;
        self.reserve_through(self.size);

        // SAFETY: `start` is below `size` and the covering block now exists.
        unsafe { self.get_unchecked(start) }
    }

    /// Checked byte lookup
    pub fn get(&self, index: usize) -> Option<NonNull<u8>> {
        if index >= self.size {
            return None;
        }
        // SAFETY: bounds checked above.
        Some(unsafe { self.get_unchecked(index) })
    }

    /// Address of byte `index`.
    ///
    /// # Safety
    /// `index` must be below [`size`](Self::size).
    pub unsafe fn get_unchecked(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.size, "byte index {index} out of bounds");
        let (block, offset) = self.locate(index);
        let base = if block == 0 {
            self.initial.as_ref().map(|b| b.ptr)
        } else {
            self.buckets.get(block - 1).map(|b| b.ptr)
        };
        match base {
            // SAFETY: `offset` is inside the block per `locate`.
            Some(ptr) => NonNull::new_unchecked(ptr.as_ptr().add(offset)),
            None => unreachable_block(index),
        }
    }

    /// Logical bytes appended so far
    pub fn size(&self) -> usize {
        self.size
    }

    /// Total bytes currently backed by blocks
    pub fn capacity(&self) -> usize {
        if self.is_allocated() {
            self.initial_capacity + self.buckets.len() * self.bucket_capacity
        } else {
            0
        }
    }

    /// Number of buckets chained after the initial block
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Whether `allocate` has been called
    pub fn is_allocated(&self) -> bool {
        self.initial.is_some()
    }

    /// Release every block. Contents are not dropped.
    pub fn deallocate(&mut self) {
        self.buckets.clear();
        self.initial = None;
        self.size = 0;
        self.initial_capacity = 0;
        self.bucket_capacity = 0;
    }

    /// (block number, offset); block 0 is the initial block
    fn locate(&self, index: usize) -> (usize, usize) {
        if index < self.initial_capacity {
            (0, index)
        } else {
            let rest = index - self.initial_capacity;
            (1 + rest / self.bucket_capacity, rest % self.bucket_capacity)
        }
    }

    fn reserve_through(&mut self, end: usize) {
        while self.capacity() < end {
            self.buckets
                .push(Block::new(self.bucket_capacity, self.align));
        }
    }
}

impl Default for BucketAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BucketAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketAllocator")
            .field("size", &self.size)
            .field("initial_capacity", &self.initial_capacity)
            .field("bucket_capacity", &self.bucket_capacity)
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

/// Byte distance between consecutive elements of `layout`
pub fn stride_of(layout: Layout) -> usize {
    layout.pad_to_align().size().max(layout.align())
}

#[cold]
fn unreachable_block(index: usize) -> ! {
    panic!("byte index {index} resolves to an unallocated block")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u64_arena(initial: usize, bucket: usize) -> BucketAllocator {
        let mut arena = BucketAllocator::new();
        arena.allocate(initial * 8, bucket * 8, Layout::new::<u64>());
        arena
    }

    #[test]
    fn test_emplace_grows_buckets() {
        let mut arena = u64_arena(4, 2);
        for _ in 0..4 {
            arena.emplace_back(8);
        }
        assert_eq!(arena.bucket_count(), 0);

        arena.emplace_back(8);
        assert_eq!(arena.bucket_count(), 1);
        arena.emplace_back(8);
        arena.emplace_back(8);
        assert_eq!(arena.bucket_count(), 2);
        assert_eq!(arena.size(), 7 * 8);
        assert_eq!(arena.capacity(), 8 * 8);
    }

    #[test]
    fn test_addresses_are_stable() {
        let mut arena = u64_arena(2, 2);
        let first = arena.emplace_back(8);
        let second = arena.emplace_back(8);
        for _ in 0..100 {
            arena.emplace_back(8);
        }
        assert_eq!(arena.get(0), Some(first));
        assert_eq!(arena.get(8), Some(second));
    }

    #[test]
    fn test_alignment_is_respected() {
        #[repr(align(64))]
        struct Wide([u8; 64]);

        let mut arena = BucketAllocator::new();
        arena.allocate(128, 64, Layout::new::<Wide>());
        for _ in 0..5 {
            let ptr = arena.emplace_back(64);
            assert_eq!(ptr.as_ptr() as usize % 64, 0);
        }
    }

    #[test]
    fn test_get_out_of_range() {
        let mut arena = u64_arena(2, 2);
        arena.emplace_back(8);
        assert!(arena.get(7).is_some());
        assert!(arena.get(8).is_none());
    }

    #[test]
    fn test_request_never_straddles() {
        let mut arena = BucketAllocator::new();
        arena.allocate(12, 8, Layout::new::<u32>());
        arena.emplace_back(8);
        let ptr = arena.emplace_back(8);
        // 4 bytes of the initial block are skipped
        assert_eq!(arena.get(12), Some(ptr));
        assert_eq!(arena.size(), 20);
    }

    #[test]
    fn test_reallocate_after_deallocate() {
        let mut arena = u64_arena(2, 2);
        arena.emplace_back(8);
        arena.deallocate();
        assert_eq!(arena.size(), 0);
        arena.allocate(16, 16, Layout::new::<u64>());
        assert!(arena.is_allocated());
    }

    #[test]
    #[should_panic(expected = "exceeds bucket capacity")]
    fn test_oversized_request_panics() {
        let mut arena = u64_arena(4, 2);
        arena.emplace_back(24);
    }

    #[test]
    #[should_panic(expected = "allocate called twice")]
    fn test_double_allocate_panics() {
        let mut arena = u64_arena(2, 2);
        arena.allocate(16, 16, Layout::new::<u64>());
    }
}
