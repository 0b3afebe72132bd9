//! The Vulkan half of the spy: shadow objects keyed by driver handle, the
//! command recorder and replayer, sparse binding coverage and
//! mid-execution capture of buffer and image contents.

mod handles;
mod sparse;
pub mod formats;
mod state;
mod driver;
mod commands;
mod spy;
mod recording;
mod objects;
mod present;
mod staging;
mod mec;

#[cfg(any(test, feature = "fake"))]
pub mod fake;

pub use handles::{HandleMap, HandleRef};
pub use sparse::{SparseBinding, SparseBindings};
pub use state::{
    Attachment, Buffer, CommandBuffer, CommandPool, Descriptor, DescriptorSet, Device, DeviceMemory, Framebuffer,
    Image, ImageView, Mapping, MemoryBinding, Pipeline, PipelineLayout, Queue, RecordingState, RenderPass, Swapchain,
};
pub use driver::VkDriver;
pub use commands::{
    BufferBarrier, CommandKind, CommandReference, ImageTransition, ObjectRef, Recorded, RecordedCommand,
    RecordedObject,
};
pub use recording::{ReplayError, ReplayReport};
pub use spy::{VulkanSpy, DEFAULT_STAGING_CHUNK_SIZE};
pub use mec::MecError;
