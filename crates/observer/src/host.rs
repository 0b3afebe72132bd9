use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use spyglass_encoder::{Encoder, TypeTable};
use spyglass_memory::PoolId;

use crate::ResourceStore;

/// Index of a traced graphics API. Bit `n` of the connection header's API
/// mask enables the API with index `n`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApiIndex(pub u8);

impl ApiIndex {
    pub const GLES: ApiIndex = ApiIndex(0);
    pub const VULKAN: ApiIndex = ApiIndex(1);

    pub fn mask_bit(&self) -> u32 {
        1 << self.0
    }

    pub fn name(&self) -> &'static str {
        match *self {
            Self::GLES => "gles",
            Self::VULKAN => "vulkan",
            _ => "unknown",
        }
    }
}

impl fmt::Debug for ApiIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Api({})", self.name())
    }
}

/// What a [`crate::CallObserver`] needs from the spy that owns it.
pub trait ObserverHost: Sync {
    fn encoder(&self) -> &dyn Encoder;

    fn resources(&self) -> &ResourceStore;

    fn types(&self) -> &TypeTable;

    /// A fresh pool for memory the spy synthesises, unique across APIs.
    fn allocate_pool(&self) -> PoolId;

    /// Whether a call to `api` issued right now should be observed.
    fn should_trace(&self, api: ApiIndex) -> bool;

    fn on_pre_start_of_frame(&self, _api: ApiIndex) {}

    fn on_post_end_of_frame(&self, _api: ApiIndex) {}

    /// Counts a draw call. Returns true when the framebuffer should be observed.
    fn on_draw(&self, _api: ApiIndex) -> bool {
        false
    }

    /// Whether the frame that is ending should have its framebuffer observed.
    fn should_observe_frame(&self, _api: ApiIndex) -> bool {
        false
    }

    fn record_error_state(&self) -> bool {
        false
    }

    /// Whether writes to mapped host-coherent memory are observed at submit.
    fn track_coherent_memory(&self) -> bool {
        true
    }
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Small stable id of the calling thread.
pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use crate::{current_thread_id, ApiIndex};

    #[test]
    fn api_indices_map_to_mask_bits() {
        assert_eq!(ApiIndex::GLES.mask_bit(), 1);
        assert_eq!(ApiIndex::VULKAN.mask_bit(), 2);
    }

    #[test]
    fn threads_get_distinct_ids() {
        let here = current_thread_id();
        let there = thread::spawn(current_thread_id).join().unwrap();

        assert_eq!(here, current_thread_id());
        assert_ne!(here, there);
    }
}
