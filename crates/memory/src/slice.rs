use std::mem;
use std::slice;
use std::marker::PhantomData;

use crate::{Address, PoolId};

/// A typed view over `count` elements starting at `base` inside `pool`.
///
/// Slices are cheap descriptors; they never own the memory they describe.
#[derive(Debug, PartialEq, Eq)]
pub struct Slice<T> {
    base: Address,
    count: u64,
    pool: PoolId,
    _marker: PhantomData<*const T>,
}

impl<T> Clone for Slice<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Slice<T> {}

// A slice is only an address and a length.
unsafe impl<T> Send for Slice<T> {}
unsafe impl<T> Sync for Slice<T> {}

impl<T> Slice<T> {
    /// # Safety
    /// `base` must point at `count` readable elements of `T` in `pool` for as
    /// long as the slice is used to read memory.
    pub unsafe fn new(base: Address, count: u64, pool: PoolId) -> Self {
        Self { base, count, pool, _marker: PhantomData }
    }

    /// A slice over application memory.
    ///
    /// # Safety
    /// See [`Slice::new`].
    pub unsafe fn from_app_ptr(ptr: *const T, count: u64) -> Self {
        Self::new(Address::from_ptr(ptr), count, PoolId::APPLICATION)
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn pool(&self) -> PoolId {
        self.pool
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0 || self.base.is_null()
    }

    pub fn byte_size(&self) -> u64 {
        self.count * mem::size_of::<T>() as u64
    }

    pub fn is_application(&self) -> bool {
        self.pool.is_application()
    }

    /// Narrows the slice to `[start, start + count)` elements.
    pub fn sub(&self, start: u64, count: u64) -> Self {
        debug_assert!(start + count <= self.count, "sub-slice out of range");
        Self {
            base: self.base.offset(start * mem::size_of::<T>() as u64),
            count,
            pool: self.pool,
            _marker: PhantomData,
        }
    }

    /// # Safety
    /// The memory described by the slice must still be live and readable.
    pub unsafe fn bytes(&self) -> &[u8] {
        if self.is_empty() {
            return &[];
        }

        slice::from_raw_parts(self.base.as_ptr::<u8>(), self.byte_size() as usize)
    }

    /// # Safety
    /// The memory described by the slice must still be live and readable.
    pub unsafe fn as_slice(&self) -> &[T] {
        if self.is_empty() {
            return &[];
        }

        slice::from_raw_parts(self.base.as_ptr::<T>(), self.count as usize)
    }

    /// Mutable view for out-parameters the driver fills in.
    ///
    /// # Safety
    /// The memory must be live, writable and not borrowed elsewhere while the
    /// returned slice is alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [T] {
        if self.is_empty() {
            return &mut [];
        }

        slice::from_raw_parts_mut(self.base.as_ptr::<T>() as *mut T, self.count as usize)
    }
}
