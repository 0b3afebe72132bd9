//! Addresses, pools and slices as the spy sees the traced application's memory.

mod address;
mod slice;
mod scratch;

pub use address::{Address, PoolId};
pub use slice::Slice;
pub use scratch::{ScratchArena, ScratchBuffer, DEFAULT_SCRATCH_CAPACITY};
