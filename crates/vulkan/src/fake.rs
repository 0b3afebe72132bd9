//! A small software stand-in for a Vulkan driver.
//!
//! Memory is real host memory. Transfer commands, fills, updates and image
//! barriers execute at submit; everything else is only counted.

use std::ffi::c_void;
use std::sync::Mutex;
use std::collections::HashMap;

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::formats;
use crate::VkDriver;

/// Memory type 0 is device local, type 1 host visible and coherent.
pub const HOST_VISIBLE_TYPE: u32 = 1;

#[derive(Default)]
struct FakeBuffer {
    size: u64,
    binding: Option<(u64, u64)>,
    // (resource offset, size, memory, memory offset)
    sparse: Vec<(u64, u64, u64, u64)>,
}

struct FakeImage {
    format: vk::Format,
    extent: vk::Extent3D,
    layout: vk::ImageLayout,
    texels: HashMap<(u32, u32, u32), Vec<u8>>,
}

enum FakeCommand {
    CopyBuffer(u64, u64, Vec<vk::BufferCopy>),
    CopyImageToBuffer(u64, vk::ImageLayout, u64, Vec<vk::BufferImageCopy>),
    UpdateBuffer(u64, u64, Vec<u8>),
    FillBuffer(u64, u64, u64, u32),
    Barrier(Vec<(u64, vk::ImageLayout, vk::ImageLayout)>),
    Execute(Vec<u64>),
}

#[derive(Default)]
struct State {
    next_handle: u64,
    memories: HashMap<u64, Vec<u8>>,
    buffers: HashMap<u64, FakeBuffer>,
    images: HashMap<u64, FakeImage>,
    recordings: HashMap<u64, Vec<FakeCommand>>,
    swapchains: HashMap<u64, (vk::Format, vk::Extent2D, Vec<u64>)>,
    calls: Vec<&'static str>,
    layout_mismatches: usize,
}

impl State {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        0x1000 + self.next_handle
    }

    /// Where byte `offset` of `buffer` lives, as `(memory, offset)`.
    fn locate(&self, buffer: u64, offset: u64) -> Option<(u64, usize)> {
        let b = self.buffers.get(&buffer)?;
        if let Some((memory, base)) = b.binding {
            return Some((memory, (base + offset) as usize));
        }
        b.sparse.iter()
            .find(|(start, size, _, _)| offset >= *start && offset < start + size)
            .map(|(start, _, memory, memory_offset)| (*memory, (memory_offset + offset - start) as usize))
    }

    fn read(&self, buffer: u64, offset: u64, size: u64) -> Vec<u8> {
        (offset..offset + size)
            .map(|at| {
                self.locate(buffer, at)
                    .and_then(|(memory, at)| self.memories.get(&memory)?.get(at).copied())
                    .unwrap_or(0)
            })
            .collect()
    }

    fn write(&mut self, buffer: u64, offset: u64, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            let Some((memory, at)) = self.locate(buffer, offset + i as u64) else {
                continue;
            };
            if let Some(slot) = self.memories.get_mut(&memory).and_then(|m| m.get_mut(at)) {
                *slot = *byte;
            }
        }
    }

    fn execute(&mut self, command_buffer: u64) {
        let Some(commands) = self.recordings.remove(&command_buffer) else {
            return;
        };

        for command in &commands {
            match command {
                FakeCommand::CopyBuffer(src, dst, regions) => {
                    for region in regions {
                        let data = self.read(*src, region.src_offset, region.size);
                        self.write(*dst, region.dst_offset, &data);
                    }
                },
                FakeCommand::CopyImageToBuffer(src, layout, dst, regions) => {
                    if self.images.get(src).map(|i| i.layout) != Some(*layout) {
                        self.layout_mismatches += 1;
                    }
                    for region in regions {
                        let data = self.image_rows(*src, region);
                        self.write(*dst, region.buffer_offset, &data);
                    }
                },
                FakeCommand::UpdateBuffer(buffer, offset, data) => self.write(*buffer, *offset, data),
                FakeCommand::FillBuffer(buffer, offset, size, value) => {
                    let data: Vec<u8> = value.to_le_bytes().iter().copied().cycle().take(*size as usize).collect();
                    self.write(*buffer, *offset, &data);
                },
                FakeCommand::Barrier(transitions) => {
                    for (image, old, new) in transitions {
                        if let Some(image) = self.images.get_mut(image) {
                            if *old != vk::ImageLayout::UNDEFINED && image.layout != *old {
                                self.layout_mismatches += 1;
                            }
                            image.layout = *new;
                        }
                    }
                },
                FakeCommand::Execute(secondaries) => {
                    for secondary in secondaries {
                        self.execute(*secondary);
                    }
                },
            }
        }

        self.recordings.insert(command_buffer, commands);
    }

    /// The rows of one image subresource a copy region covers.
    fn image_rows(&self, image: u64, region: &vk::BufferImageCopy) -> Vec<u8> {
        let Some(image) = self.images.get(&image) else {
            return Vec::new();
        };
        let subresource = region.image_subresource;
        let Some(block) = formats::block_info(image.format, subresource.aspect_mask) else {
            return Vec::new();
        };

        let extent = formats::mip_extent(image.extent, subresource.mip_level);
        let pitch = formats::row_pitch(block, extent.width) as usize;
        let slice_rows = formats::block_rows(block, extent.height) as usize;
        let first = slice_rows * region.image_offset.z as usize + region.image_offset.y as usize / block.height as usize;
        let rows = formats::block_rows(block, region.image_extent.height) as usize;

        let texels = image.texels(subresource.aspect_mask, subresource.base_array_layer, subresource.mip_level);
        let mut data = vec![0u8; rows * pitch];
        let start = (first * pitch).min(texels.len());
        let end = (start + rows * pitch).min(texels.len());
        data[..end - start].copy_from_slice(&texels[start..end]);
        data
    }
}

impl FakeImage {
    fn texels(&self, aspect: vk::ImageAspectFlags, layer: u32, level: u32) -> Vec<u8> {
        self.texels.get(&(aspect.as_raw(), layer, level)).cloned().unwrap_or_default()
    }
}

pub struct FakeVk {
    state: Mutex<State>,
}

impl Default for FakeVk {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeVk {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()) }
    }

    fn call(&self, name: &'static str) -> std::sync::MutexGuard<'_, State> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(name);
        state
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| **c == name).count()
    }

    pub fn layout_mismatches(&self) -> usize {
        self.state.lock().unwrap().layout_mismatches
    }

    pub fn image_layout(&self, image: vk::Image) -> Option<vk::ImageLayout> {
        self.state.lock().unwrap().images.get(&image.as_raw()).map(|i| i.layout)
    }

    /// Sets the tightly packed contents of one image subresource.
    pub fn fill_image(&self, image: vk::Image, aspect: vk::ImageAspectFlags, layer: u32, level: u32, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        if let Some(image) = state.images.get_mut(&image.as_raw()) {
            image.texels.insert((aspect.as_raw(), layer, level), data.to_vec());
        }
    }

    pub fn memory_contents(&self, memory: vk::DeviceMemory) -> Vec<u8> {
        self.state.lock().unwrap().memories.get(&memory.as_raw()).cloned().unwrap_or_default()
    }

    fn record(&self, command_buffer: vk::CommandBuffer, name: &'static str, command: Option<FakeCommand>) {
        let mut state = self.call(name);
        if let Some(command) = command {
            state.recordings.entry(command_buffer.as_raw()).or_default().push(command);
        }
    }
}

impl VkDriver for FakeVk {
    fn get_physical_device_memory_properties(&self, _: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            memory_heap_count: 1,
            ..Default::default()
        };
        properties.memory_types[0] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            heap_index: 0,
        };
        properties.memory_types[HOST_VISIBLE_TYPE as usize] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            heap_index: 0,
        };
        properties.memory_heaps[0] = vk::MemoryHeap { size: 1 << 30, flags: vk::MemoryHeapFlags::DEVICE_LOCAL };
        properties
    }

    fn create_device(&self, _: vk::PhysicalDevice, _: &vk::DeviceCreateInfo) -> VkResult<vk::Device> {
        let mut state = self.call("vkCreateDevice");
        Ok(vk::Device::from_raw(state.handle()))
    }

    fn destroy_device(&self, _: vk::Device) {
        self.call("vkDestroyDevice");
    }

    fn get_device_queue(&self, device: vk::Device, family: u32, index: u32) -> vk::Queue {
        self.call("vkGetDeviceQueue");
        vk::Queue::from_raw(device.as_raw() * 0x100 + family as u64 * 0x10 + index as u64 + 1)
    }

    fn device_wait_idle(&self, _: vk::Device) -> VkResult<()> {
        self.call("vkDeviceWaitIdle");
        Ok(())
    }

    fn allocate_memory(&self, _: vk::Device, info: &vk::MemoryAllocateInfo) -> VkResult<vk::DeviceMemory> {
        let mut state = self.call("vkAllocateMemory");
        let handle = state.handle();
        state.memories.insert(handle, vec![0; info.allocation_size as usize]);
        Ok(vk::DeviceMemory::from_raw(handle))
    }

    fn free_memory(&self, _: vk::Device, memory: vk::DeviceMemory) {
        self.call("vkFreeMemory").memories.remove(&memory.as_raw());
    }

    fn map_memory(&self, _: vk::Device, memory: vk::DeviceMemory, offset: u64, _: u64) -> VkResult<*mut c_void> {
        let mut state = self.call("vkMapMemory");
        let contents = state.memories.get_mut(&memory.as_raw()).ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        // The allocation is never resized, so the pointer stays valid.
        Ok(unsafe { contents.as_mut_ptr().add(offset as usize) } as *mut c_void)
    }

    fn unmap_memory(&self, _: vk::Device, _: vk::DeviceMemory) {
        self.call("vkUnmapMemory");
    }

    fn flush_mapped_memory_ranges(&self, _: vk::Device, _: &[vk::MappedMemoryRange]) -> VkResult<()> {
        self.call("vkFlushMappedMemoryRanges");
        Ok(())
    }

    fn invalidate_mapped_memory_ranges(&self, _: vk::Device, _: &[vk::MappedMemoryRange]) -> VkResult<()> {
        self.call("vkInvalidateMappedMemoryRanges");
        Ok(())
    }

    fn create_buffer(&self, _: vk::Device, info: &vk::BufferCreateInfo) -> VkResult<vk::Buffer> {
        let mut state = self.call("vkCreateBuffer");
        let handle = state.handle();
        state.buffers.insert(handle, FakeBuffer { size: info.size, ..Default::default() });
        Ok(vk::Buffer::from_raw(handle))
    }

    fn destroy_buffer(&self, _: vk::Device, buffer: vk::Buffer) {
        self.call("vkDestroyBuffer").buffers.remove(&buffer.as_raw());
    }

    fn get_buffer_memory_requirements(&self, _: vk::Device, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let state = self.call("vkGetBufferMemoryRequirements");
        vk::MemoryRequirements {
            size: state.buffers.get(&buffer.as_raw()).map(|b| b.size).unwrap_or(0),
            alignment: 1,
            memory_type_bits: 0b11,
        }
    }

    fn bind_buffer_memory(&self, _: vk::Device, buffer: vk::Buffer, memory: vk::DeviceMemory, offset: u64) -> VkResult<()> {
        let mut state = self.call("vkBindBufferMemory");
        let buffer = state.buffers.get_mut(&buffer.as_raw()).ok_or(vk::Result::ERROR_UNKNOWN)?;
        buffer.binding = Some((memory.as_raw(), offset));
        Ok(())
    }

    fn create_image(&self, _: vk::Device, info: &vk::ImageCreateInfo) -> VkResult<vk::Image> {
        let mut state = self.call("vkCreateImage");
        let handle = state.handle();
        state.images.insert(handle, FakeImage {
            format: info.format,
            extent: info.extent,
            layout: info.initial_layout,
            texels: HashMap::new(),
        });
        Ok(vk::Image::from_raw(handle))
    }

    fn destroy_image(&self, _: vk::Device, image: vk::Image) {
        self.call("vkDestroyImage").images.remove(&image.as_raw());
    }

    fn get_image_memory_requirements(&self, _: vk::Device, _: vk::Image) -> vk::MemoryRequirements {
        self.call("vkGetImageMemoryRequirements");
        vk::MemoryRequirements { size: 1024, alignment: 1, memory_type_bits: 0b11 }
    }

    fn bind_image_memory(&self, _: vk::Device, _: vk::Image, _: vk::DeviceMemory, _: u64) -> VkResult<()> {
        self.call("vkBindImageMemory");
        Ok(())
    }

    fn create_image_view(&self, _: vk::Device, _: &vk::ImageViewCreateInfo) -> VkResult<vk::ImageView> {
        let mut state = self.call("vkCreateImageView");
        Ok(vk::ImageView::from_raw(state.handle()))
    }

    fn destroy_image_view(&self, _: vk::Device, _: vk::ImageView) {
        self.call("vkDestroyImageView");
    }

    fn queue_bind_sparse(&self, _: vk::Queue, infos: &[vk::BindSparseInfo], _: vk::Fence) -> VkResult<()> {
        let mut state = self.call("vkQueueBindSparse");
        for info in infos {
            let binds = unsafe { std::slice::from_raw_parts(info.p_buffer_binds, info.buffer_bind_count as usize) };
            for bind in binds {
                let ranges = unsafe { std::slice::from_raw_parts(bind.p_binds, bind.bind_count as usize) };
                if let Some(buffer) = state.buffers.get_mut(&bind.buffer.as_raw()) {
                    for range in ranges {
                        buffer.sparse.push((range.resource_offset, range.size, range.memory.as_raw(), range.memory_offset));
                    }
                }
            }
        }
        Ok(())
    }

    fn create_render_pass(&self, _: vk::Device, _: &vk::RenderPassCreateInfo) -> VkResult<vk::RenderPass> {
        let mut state = self.call("vkCreateRenderPass");
        Ok(vk::RenderPass::from_raw(state.handle()))
    }

    fn destroy_render_pass(&self, _: vk::Device, _: vk::RenderPass) {
        self.call("vkDestroyRenderPass");
    }

    fn create_framebuffer(&self, _: vk::Device, _: &vk::FramebufferCreateInfo) -> VkResult<vk::Framebuffer> {
        let mut state = self.call("vkCreateFramebuffer");
        Ok(vk::Framebuffer::from_raw(state.handle()))
    }

    fn destroy_framebuffer(&self, _: vk::Device, _: vk::Framebuffer) {
        self.call("vkDestroyFramebuffer");
    }

    fn create_graphics_pipelines(
        &self,
        _: vk::Device,
        _: vk::PipelineCache,
        infos: &[vk::GraphicsPipelineCreateInfo],
    ) -> VkResult<Vec<vk::Pipeline>> {
        let mut state = self.call("vkCreateGraphicsPipelines");
        Ok(infos.iter().map(|_| vk::Pipeline::from_raw(state.handle())).collect())
    }

    fn create_compute_pipelines(
        &self,
        _: vk::Device,
        _: vk::PipelineCache,
        infos: &[vk::ComputePipelineCreateInfo],
    ) -> VkResult<Vec<vk::Pipeline>> {
        let mut state = self.call("vkCreateComputePipelines");
        Ok(infos.iter().map(|_| vk::Pipeline::from_raw(state.handle())).collect())
    }

    fn destroy_pipeline(&self, _: vk::Device, _: vk::Pipeline) {
        self.call("vkDestroyPipeline");
    }

    fn create_pipeline_layout(&self, _: vk::Device, _: &vk::PipelineLayoutCreateInfo) -> VkResult<vk::PipelineLayout> {
        let mut state = self.call("vkCreatePipelineLayout");
        Ok(vk::PipelineLayout::from_raw(state.handle()))
    }

    fn destroy_pipeline_layout(&self, _: vk::Device, _: vk::PipelineLayout) {
        self.call("vkDestroyPipelineLayout");
    }

    fn allocate_descriptor_sets(&self, _: vk::Device, info: &vk::DescriptorSetAllocateInfo) -> VkResult<Vec<vk::DescriptorSet>> {
        let mut state = self.call("vkAllocateDescriptorSets");
        Ok((0..info.descriptor_set_count).map(|_| vk::DescriptorSet::from_raw(state.handle())).collect())
    }

    fn free_descriptor_sets(&self, _: vk::Device, _: vk::DescriptorPool, _: &[vk::DescriptorSet]) -> VkResult<()> {
        self.call("vkFreeDescriptorSets");
        Ok(())
    }

    fn update_descriptor_sets(&self, _: vk::Device, _: &[vk::WriteDescriptorSet]) {
        self.call("vkUpdateDescriptorSets");
    }

    fn create_command_pool(&self, _: vk::Device, _: &vk::CommandPoolCreateInfo) -> VkResult<vk::CommandPool> {
        let mut state = self.call("vkCreateCommandPool");
        Ok(vk::CommandPool::from_raw(state.handle()))
    }

    fn destroy_command_pool(&self, _: vk::Device, _: vk::CommandPool) {
        self.call("vkDestroyCommandPool");
    }

    fn reset_command_pool(&self, _: vk::Device, _: vk::CommandPool, _: vk::CommandPoolResetFlags) -> VkResult<()> {
        self.call("vkResetCommandPool");
        Ok(())
    }

    fn allocate_command_buffers(&self, _: vk::Device, info: &vk::CommandBufferAllocateInfo) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut state = self.call("vkAllocateCommandBuffers");
        Ok((0..info.command_buffer_count).map(|_| vk::CommandBuffer::from_raw(state.handle())).collect())
    }

    fn free_command_buffers(&self, _: vk::Device, _: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.call("vkFreeCommandBuffers");
        for buffer in buffers {
            state.recordings.remove(&buffer.as_raw());
        }
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer, _: &vk::CommandBufferBeginInfo) -> VkResult<()> {
        self.call("vkBeginCommandBuffer").recordings.insert(command_buffer.as_raw(), Vec::new());
        Ok(())
    }

    fn end_command_buffer(&self, _: vk::CommandBuffer) -> VkResult<()> {
        self.call("vkEndCommandBuffer");
        Ok(())
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer, _: vk::CommandBufferResetFlags) -> VkResult<()> {
        self.call("vkResetCommandBuffer").recordings.remove(&command_buffer.as_raw());
        Ok(())
    }

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, _: &vk::RenderPassBeginInfo, _: vk::SubpassContents) {
        self.record(command_buffer, "vkCmdBeginRenderPass", None);
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.record(command_buffer, "vkCmdEndRenderPass", None);
    }

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, _: vk::PipelineBindPoint, _: vk::Pipeline) {
        self.record(command_buffer, "vkCmdBindPipeline", None);
    }

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        _: vk::PipelineBindPoint,
        _: vk::PipelineLayout,
        _: u32,
        _: &[vk::DescriptorSet],
        _: &[u32],
    ) {
        self.record(command_buffer, "vkCmdBindDescriptorSets", None);
    }

    fn cmd_bind_vertex_buffers(&self, command_buffer: vk::CommandBuffer, _: u32, _: &[vk::Buffer], _: &[u64]) {
        self.record(command_buffer, "vkCmdBindVertexBuffers", None);
    }

    fn cmd_bind_index_buffer(&self, command_buffer: vk::CommandBuffer, _: vk::Buffer, _: u64, _: vk::IndexType) {
        self.record(command_buffer, "vkCmdBindIndexBuffer", None);
    }

    fn cmd_set_viewport(&self, command_buffer: vk::CommandBuffer, _: u32, _: &[vk::Viewport]) {
        self.record(command_buffer, "vkCmdSetViewport", None);
    }

    fn cmd_set_scissor(&self, command_buffer: vk::CommandBuffer, _: u32, _: &[vk::Rect2D]) {
        self.record(command_buffer, "vkCmdSetScissor", None);
    }

    fn cmd_push_constants(&self, command_buffer: vk::CommandBuffer, _: vk::PipelineLayout, _: vk::ShaderStageFlags, _: u32, _: &[u8]) {
        self.record(command_buffer, "vkCmdPushConstants", None);
    }

    fn cmd_draw(&self, command_buffer: vk::CommandBuffer, _: u32, _: u32, _: u32, _: u32) {
        self.record(command_buffer, "vkCmdDraw", None);
    }

    fn cmd_draw_indexed(&self, command_buffer: vk::CommandBuffer, _: u32, _: u32, _: u32, _: i32, _: u32) {
        self.record(command_buffer, "vkCmdDrawIndexed", None);
    }

    fn cmd_dispatch(&self, command_buffer: vk::CommandBuffer, _: u32, _: u32, _: u32) {
        self.record(command_buffer, "vkCmdDispatch", None);
    }

    fn cmd_copy_buffer(&self, command_buffer: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        let command = FakeCommand::CopyBuffer(src.as_raw(), dst.as_raw(), regions.to_vec());
        self.record(command_buffer, "vkCmdCopyBuffer", Some(command));
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        _: vk::Buffer,
        _: vk::Image,
        _: vk::ImageLayout,
        _: &[vk::BufferImageCopy],
    ) {
        self.record(command_buffer, "vkCmdCopyBufferToImage", None);
    }

    fn cmd_copy_image_to_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        let command = FakeCommand::CopyImageToBuffer(src.as_raw(), layout, dst.as_raw(), regions.to_vec());
        self.record(command_buffer, "vkCmdCopyImageToBuffer", Some(command));
    }

    fn cmd_update_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer, offset: u64, data: &[u8]) {
        let command = FakeCommand::UpdateBuffer(buffer.as_raw(), offset, data.to_vec());
        self.record(command_buffer, "vkCmdUpdateBuffer", Some(command));
    }

    fn cmd_fill_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer, offset: u64, size: u64, data: u32) {
        let command = FakeCommand::FillBuffer(buffer.as_raw(), offset, size, data);
        self.record(command_buffer, "vkCmdFillBuffer", Some(command));
    }

    fn cmd_clear_color_image(
        &self,
        command_buffer: vk::CommandBuffer,
        _: vk::Image,
        _: vk::ImageLayout,
        _: &vk::ClearColorValue,
        _: &[vk::ImageSubresourceRange],
    ) {
        self.record(command_buffer, "vkCmdClearColorImage", None);
    }

    fn cmd_pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        _: vk::PipelineStageFlags,
        _: vk::PipelineStageFlags,
        _: vk::DependencyFlags,
        _: &[vk::MemoryBarrier],
        _: &[vk::BufferMemoryBarrier],
        images: &[vk::ImageMemoryBarrier],
    ) {
        let transitions = images.iter().map(|b| (b.image.as_raw(), b.old_layout, b.new_layout)).collect();
        self.record(command_buffer, "vkCmdPipelineBarrier", Some(FakeCommand::Barrier(transitions)));
    }

    fn cmd_execute_commands(&self, command_buffer: vk::CommandBuffer, secondaries: &[vk::CommandBuffer]) {
        let command = FakeCommand::Execute(secondaries.iter().map(|s| s.as_raw()).collect());
        self.record(command_buffer, "vkCmdExecuteCommands", Some(command));
    }

    fn queue_submit(&self, _: vk::Queue, submits: &[vk::SubmitInfo], _: vk::Fence) -> VkResult<()> {
        let mut state = self.call("vkQueueSubmit");
        for submit in submits {
            let buffers = unsafe { std::slice::from_raw_parts(submit.p_command_buffers, submit.command_buffer_count as usize) };
            for buffer in buffers {
                state.execute(buffer.as_raw());
            }
        }
        Ok(())
    }

    fn queue_wait_idle(&self, _: vk::Queue) -> VkResult<()> {
        self.call("vkQueueWaitIdle");
        Ok(())
    }

    fn create_swapchain(&self, _: vk::Device, info: &vk::SwapchainCreateInfoKHR) -> VkResult<vk::SwapchainKHR> {
        let mut state = self.call("vkCreateSwapchainKHR");
        let handle = state.handle();
        state.swapchains.insert(handle, (info.image_format, info.image_extent, Vec::new()));
        Ok(vk::SwapchainKHR::from_raw(handle))
    }

    fn destroy_swapchain(&self, _: vk::Device, swapchain: vk::SwapchainKHR) {
        self.call("vkDestroySwapchainKHR").swapchains.remove(&swapchain.as_raw());
    }

    fn get_swapchain_images(&self, _: vk::Device, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let mut state = self.call("vkGetSwapchainImagesKHR");
        let (format, extent, images) = state.swapchains.get(&swapchain.as_raw())
            .cloned()
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        if !images.is_empty() {
            return Ok(images.into_iter().map(vk::Image::from_raw).collect());
        }

        let images: Vec<u64> = (0..2).map(|_| state.handle()).collect();
        for image in &images {
            state.images.insert(*image, FakeImage {
                format,
                extent: vk::Extent3D { width: extent.width, height: extent.height, depth: 1 },
                layout: vk::ImageLayout::UNDEFINED,
                texels: HashMap::new(),
            });
        }
        if let Some(chain) = state.swapchains.get_mut(&swapchain.as_raw()) {
            chain.2 = images.clone();
        }
        Ok(images.into_iter().map(vk::Image::from_raw).collect())
    }

    fn queue_present(&self, _: vk::Queue, _: &vk::PresentInfoKHR) -> VkResult<bool> {
        self.call("vkQueuePresentKHR");
        Ok(false)
    }
}
