use std::ffi::c_void;

use ash::prelude::VkResult;
use ash::vk;

/// The real Vulkan driver, as the spy forwards to it.
///
/// Methods mirror the device-level entry points of `ash::Device` and
/// `ash::extensions::khr::Swapchain`. The interceptor implements this over
/// the loaded driver's function pointers; tests implement it in memory.
pub trait VkDriver: Send + Sync {
    fn get_physical_device_memory_properties(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties;

    fn create_device(&self, physical_device: vk::PhysicalDevice, info: &vk::DeviceCreateInfo) -> VkResult<vk::Device>;
    fn destroy_device(&self, device: vk::Device);
    fn get_device_queue(&self, device: vk::Device, family: u32, index: u32) -> vk::Queue;
    fn device_wait_idle(&self, device: vk::Device) -> VkResult<()>;

    fn allocate_memory(&self, device: vk::Device, info: &vk::MemoryAllocateInfo) -> VkResult<vk::DeviceMemory>;
    fn free_memory(&self, device: vk::Device, memory: vk::DeviceMemory);
    fn map_memory(&self, device: vk::Device, memory: vk::DeviceMemory, offset: u64, size: u64) -> VkResult<*mut c_void>;
    fn unmap_memory(&self, device: vk::Device, memory: vk::DeviceMemory);
    fn flush_mapped_memory_ranges(&self, device: vk::Device, ranges: &[vk::MappedMemoryRange]) -> VkResult<()>;
    fn invalidate_mapped_memory_ranges(&self, device: vk::Device, ranges: &[vk::MappedMemoryRange]) -> VkResult<()>;

    fn create_buffer(&self, device: vk::Device, info: &vk::BufferCreateInfo) -> VkResult<vk::Buffer>;
    fn destroy_buffer(&self, device: vk::Device, buffer: vk::Buffer);
    fn get_buffer_memory_requirements(&self, device: vk::Device, buffer: vk::Buffer) -> vk::MemoryRequirements;
    fn bind_buffer_memory(&self, device: vk::Device, buffer: vk::Buffer, memory: vk::DeviceMemory, offset: u64) -> VkResult<()>;

    fn create_image(&self, device: vk::Device, info: &vk::ImageCreateInfo) -> VkResult<vk::Image>;
    fn destroy_image(&self, device: vk::Device, image: vk::Image);
    fn get_image_memory_requirements(&self, device: vk::Device, image: vk::Image) -> vk::MemoryRequirements;
    fn bind_image_memory(&self, device: vk::Device, image: vk::Image, memory: vk::DeviceMemory, offset: u64) -> VkResult<()>;

    fn create_image_view(&self, device: vk::Device, info: &vk::ImageViewCreateInfo) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, device: vk::Device, view: vk::ImageView);

    fn queue_bind_sparse(&self, queue: vk::Queue, infos: &[vk::BindSparseInfo], fence: vk::Fence) -> VkResult<()>;

    fn create_render_pass(&self, device: vk::Device, info: &vk::RenderPassCreateInfo) -> VkResult<vk::RenderPass>;
    fn destroy_render_pass(&self, device: vk::Device, render_pass: vk::RenderPass);
    fn create_framebuffer(&self, device: vk::Device, info: &vk::FramebufferCreateInfo) -> VkResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, device: vk::Device, framebuffer: vk::Framebuffer);

    fn create_pipeline_layout(&self, device: vk::Device, info: &vk::PipelineLayoutCreateInfo) -> VkResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, device: vk::Device, layout: vk::PipelineLayout);
    fn create_graphics_pipelines(
        &self,
        device: vk::Device,
        cache: vk::PipelineCache,
        infos: &[vk::GraphicsPipelineCreateInfo],
    ) -> VkResult<Vec<vk::Pipeline>>;
    fn create_compute_pipelines(
        &self,
        device: vk::Device,
        cache: vk::PipelineCache,
        infos: &[vk::ComputePipelineCreateInfo],
    ) -> VkResult<Vec<vk::Pipeline>>;
    fn destroy_pipeline(&self, device: vk::Device, pipeline: vk::Pipeline);

    fn allocate_descriptor_sets(&self, device: vk::Device, info: &vk::DescriptorSetAllocateInfo) -> VkResult<Vec<vk::DescriptorSet>>;
    fn free_descriptor_sets(&self, device: vk::Device, pool: vk::DescriptorPool, sets: &[vk::DescriptorSet]) -> VkResult<()>;
    fn update_descriptor_sets(&self, device: vk::Device, writes: &[vk::WriteDescriptorSet]);

    fn create_command_pool(&self, device: vk::Device, info: &vk::CommandPoolCreateInfo) -> VkResult<vk::CommandPool>;
    fn destroy_command_pool(&self, device: vk::Device, pool: vk::CommandPool);
    fn reset_command_pool(&self, device: vk::Device, pool: vk::CommandPool, flags: vk::CommandPoolResetFlags) -> VkResult<()>;
    fn allocate_command_buffers(&self, device: vk::Device, info: &vk::CommandBufferAllocateInfo) -> VkResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, device: vk::Device, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer, info: &vk::CommandBufferBeginInfo) -> VkResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer, flags: vk::CommandBufferResetFlags) -> VkResult<()>;

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, info: &vk::RenderPassBeginInfo, contents: vk::SubpassContents);
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);
    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline);
    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    );
    fn cmd_bind_vertex_buffers(&self, command_buffer: vk::CommandBuffer, first_binding: u32, buffers: &[vk::Buffer], offsets: &[u64]);
    fn cmd_bind_index_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer, offset: u64, index_type: vk::IndexType);
    fn cmd_set_viewport(&self, command_buffer: vk::CommandBuffer, first: u32, viewports: &[vk::Viewport]);
    fn cmd_set_scissor(&self, command_buffer: vk::CommandBuffer, first: u32, scissors: &[vk::Rect2D]);
    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    fn cmd_draw(&self, command_buffer: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn cmd_dispatch(&self, command_buffer: vk::CommandBuffer, x: u32, y: u32, z: u32);
    fn cmd_copy_buffer(&self, command_buffer: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]);
    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );
    fn cmd_copy_image_to_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    );
    fn cmd_update_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer, offset: u64, data: &[u8]);
    fn cmd_fill_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer, offset: u64, size: u64, data: u32);
    fn cmd_clear_color_image(
        &self,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    );
    #[allow(clippy::too_many_arguments)]
    fn cmd_pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        dependency: vk::DependencyFlags,
        memory: &[vk::MemoryBarrier],
        buffers: &[vk::BufferMemoryBarrier],
        images: &[vk::ImageMemoryBarrier],
    );
    fn cmd_execute_commands(&self, command_buffer: vk::CommandBuffer, secondaries: &[vk::CommandBuffer]);

    fn queue_submit(&self, queue: vk::Queue, submits: &[vk::SubmitInfo], fence: vk::Fence) -> VkResult<()>;
    fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()>;

    fn create_swapchain(&self, device: vk::Device, info: &vk::SwapchainCreateInfoKHR) -> VkResult<vk::SwapchainKHR>;
    fn destroy_swapchain(&self, device: vk::Device, swapchain: vk::SwapchainKHR);
    fn get_swapchain_images(&self, device: vk::Device, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn queue_present(&self, queue: vk::Queue, info: &vk::PresentInfoKHR) -> VkResult<bool>;
}
