use ash::vk;
use spyglass_memory::PoolId;

use crate::{HandleRef, Recorded, SparseBindings};

pub struct Device {
    pub handle: vk::Device,
    pub physical_device: vk::PhysicalDevice,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queues: Vec<vk::Queue>,
}

impl Device {
    pub fn memory_type_flags(&self, index: u32) -> vk::MemoryPropertyFlags {
        if index < self.memory_properties.memory_type_count {
            self.memory_properties.memory_types[index as usize].property_flags
        } else {
            vk::MemoryPropertyFlags::empty()
        }
    }

    /// First memory type allowed by `type_bits` that has all of `required`.
    pub fn find_memory_type(&self, type_bits: u32, required: vk::MemoryPropertyFlags) -> Option<u32> {
        (0..self.memory_properties.memory_type_count)
            .find(|index| type_bits & (1 << index) != 0 && self.memory_type_flags(*index).contains(required))
    }
}

pub struct Queue {
    pub handle: vk::Queue,
    pub device: vk::Device,
    pub family: u32,
    pub index: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Mapping {
    pub offset: u64,
    pub size: u64,
    pub pointer: u64,
}

pub struct DeviceMemory {
    pub handle: vk::DeviceMemory,
    pub device: vk::Device,
    pub size: u64,
    pub memory_type: u32,
    pub property_flags: vk::MemoryPropertyFlags,
    /// The trace pool holding this allocation's contents.
    pub pool: PoolId,
    pub mapping: Option<Mapping>,
}

impl DeviceMemory {
    pub fn is_host_coherent(&self) -> bool {
        self.property_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryBinding {
    pub memory: HandleRef<vk::DeviceMemory>,
    pub offset: u64,
}

pub struct Buffer {
    pub handle: vk::Buffer,
    pub device: vk::Device,
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub flags: vk::BufferCreateFlags,
    pub binding: Option<MemoryBinding>,
    pub sparse: SparseBindings,
}

impl Buffer {
    pub fn is_sparse(&self) -> bool {
        self.flags.contains(vk::BufferCreateFlags::SPARSE_BINDING)
    }
}

pub struct Image {
    pub handle: vk::Image,
    pub device: vk::Device,
    pub flags: vk::ImageCreateFlags,
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub swapchain: Option<vk::SwapchainKHR>,
    pub binding: Option<MemoryBinding>,
    pub sparse: SparseBindings,
    /// Size of the image's memory requirements, the range opaque sparse
    /// bindings must cover.
    pub memory_size: u64,
    // Indexed by `layer * mip_levels + level`.
    layouts: Vec<vk::ImageLayout>,
}

impl Image {
    pub fn new(handle: vk::Image, device: vk::Device, info: &vk::ImageCreateInfo) -> Self {
        let mip_levels = info.mip_levels.max(1);
        let array_layers = info.array_layers.max(1);

        Self {
            handle,
            device,
            flags: info.flags,
            image_type: info.image_type,
            format: info.format,
            extent: info.extent,
            mip_levels,
            array_layers,
            samples: info.samples,
            tiling: info.tiling,
            usage: info.usage,
            swapchain: None,
            binding: None,
            sparse: SparseBindings::new(),
            memory_size: 0,
            layouts: vec![info.initial_layout; (mip_levels * array_layers) as usize],
        }
    }

    pub fn is_sparse(&self) -> bool {
        self.flags.contains(vk::ImageCreateFlags::SPARSE_BINDING)
    }

    pub fn layout(&self, layer: u32, level: u32) -> vk::ImageLayout {
        self.layouts
            .get((layer * self.mip_levels + level) as usize)
            .copied()
            .unwrap_or(vk::ImageLayout::UNDEFINED)
    }

    /// Moves the subresources in `range` to `layout`.
    pub fn set_layout(&mut self, range: &vk::ImageSubresourceRange, layout: vk::ImageLayout) {
        let levels = resolve_count(range.base_mip_level, range.level_count, self.mip_levels);
        let layers = resolve_count(range.base_array_layer, range.layer_count, self.array_layers);

        for layer in range.base_array_layer..range.base_array_layer + layers {
            for level in range.base_mip_level..range.base_mip_level + levels {
                if let Some(slot) = self.layouts.get_mut((layer * self.mip_levels + level) as usize) {
                    *slot = layout;
                }
            }
        }
    }

    pub fn full_range(&self, aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: self.array_layers,
        }
    }
}

fn resolve_count(base: u32, count: u32, total: u32) -> u32 {
    if count == vk::REMAINING_MIP_LEVELS || count == vk::REMAINING_ARRAY_LAYERS {
        total.saturating_sub(base)
    } else {
        count.min(total.saturating_sub(base))
    }
}

pub struct ImageView {
    pub handle: vk::ImageView,
    pub device: vk::Device,
    pub image: HandleRef<vk::Image>,
    pub format: vk::Format,
    pub range: vk::ImageSubresourceRange,
}

pub struct CommandPool {
    pub handle: vk::CommandPool,
    pub device: vk::Device,
    pub family: u32,
    pub flags: vk::CommandPoolCreateFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Initial,
    Recording,
    Executable,
    Invalid,
}

pub struct CommandBuffer {
    pub handle: vk::CommandBuffer,
    pub device: vk::Device,
    pub pool: vk::CommandPool,
    pub level: vk::CommandBufferLevel,
    pub state: RecordingState,
    pub usage: vk::CommandBufferUsageFlags,
    pub commands: Vec<Recorded>,
}

impl CommandBuffer {
    pub fn new(handle: vk::CommandBuffer, device: vk::Device, pool: vk::CommandPool, level: vk::CommandBufferLevel) -> Self {
        Self {
            handle,
            device,
            pool,
            level,
            state: RecordingState::Initial,
            usage: vk::CommandBufferUsageFlags::empty(),
            commands: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.state = RecordingState::Initial;
        self.commands.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    Image {
        sampler: vk::Sampler,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
    Buffer {
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
    },
    TexelBuffer(vk::BufferView),
}

pub struct DescriptorSet {
    pub handle: vk::DescriptorSet,
    pub device: vk::Device,
    pub pool: vk::DescriptorPool,
    pub layout: vk::DescriptorSetLayout,
    /// Written descriptors keyed by `(binding, array element)`.
    pub descriptors: std::collections::BTreeMap<(u32, u32), (vk::DescriptorType, Descriptor)>,
}

pub struct PipelineLayout {
    pub handle: vk::PipelineLayout,
    pub device: vk::Device,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
}

pub struct Pipeline {
    pub handle: vk::Pipeline,
    pub device: vk::Device,
    pub bind_point: vk::PipelineBindPoint,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
}

#[derive(Debug, Clone, Copy)]
pub struct Attachment {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

pub struct RenderPass {
    pub handle: vk::RenderPass,
    pub device: vk::Device,
    pub attachments: Vec<Attachment>,
}

pub struct Framebuffer {
    pub handle: vk::Framebuffer,
    pub device: vk::Device,
    pub render_pass: vk::RenderPass,
    pub attachments: Vec<HandleRef<vk::ImageView>>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub device: vk::Device,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub array_layers: u32,
    pub usage: vk::ImageUsageFlags,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

#[cfg(test)]
mod tests {
    use ash::vk::{self, Handle};

    use crate::Image;

    #[test]
    fn layouts_are_tracked_per_subresource() {
        let info = vk::ImageCreateInfo::builder()
            .format(vk::Format::R8G8B8A8_UNORM)
            .extent(vk::Extent3D { width: 4, height: 4, depth: 1 })
            .mip_levels(3)
            .array_layers(2)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .build();
        let mut image = Image::new(vk::Image::from_raw(1), vk::Device::from_raw(2), &info);

        image.set_layout(&vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 1,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 1,
            layer_count: 1,
        }, vk::ImageLayout::TRANSFER_DST_OPTIMAL);

        assert_eq!(image.layout(0, 1), vk::ImageLayout::UNDEFINED);
        assert_eq!(image.layout(1, 0), vk::ImageLayout::UNDEFINED);
        assert_eq!(image.layout(1, 1), vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(image.layout(1, 2), vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    }
}
