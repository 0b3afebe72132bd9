//! Reading device-local contents back to the host through host-visible
//! staging buffers, one bounded chunk at a time.

use std::slice;

use ash::vk::{self, Handle};
use log::{trace, warn};

use crate::formats::{self, BlockInfo};
use crate::{Device, Image, MecError, Queue, VkDriver};

pub(crate) struct Staging<'a> {
    vk: &'a dyn VkDriver,
    device: vk::Device,
    queue: vk::Queue,
    pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    memory_type: u32,
    chunk_size: u64,
}

impl<'a> Staging<'a> {
    pub fn new(vk: &'a dyn VkDriver, device: &Device, queue: &Queue, chunk_size: u64) -> Result<Self, MecError> {
        let memory_type = device
            .find_memory_type(!0, vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT)
            .ok_or(MecError::NoHostVisibleMemory)?;

        let info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue.family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = vk.create_command_pool(device.handle, &info)?;

        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = match vk.allocate_command_buffers(device.handle, &info) {
            Ok(buffers) if !buffers.is_empty() => buffers[0],
            Ok(_) => {
                vk.destroy_command_pool(device.handle, pool);
                return Err(MecError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
            },
            Err(e) => {
                vk.destroy_command_pool(device.handle, pool);
                return Err(e.into());
            },
        };

        Ok(Self {
            vk,
            device: device.handle,
            queue: queue.handle,
            pool,
            command_buffer,
            memory_type,
            chunk_size: chunk_size.max(1),
        })
    }

    /// Runs `record` into a one-shot command buffer that copies `size` bytes
    /// into a fresh staging buffer, and returns the staged bytes.
    fn stage(&self, size: u64, record: impl FnOnce(vk::CommandBuffer, vk::Buffer)) -> Result<Vec<u8>, MecError> {
        let vk = self.vk;
        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(vk::BufferUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = vk.create_buffer(self.device, &info)?;

        let requirements = vk.get_buffer_memory_requirements(self.device, buffer);
        if requirements.memory_type_bits & (1 << self.memory_type) == 0 {
            vk.destroy_buffer(self.device, buffer);
            return Err(MecError::NoHostVisibleMemory);
        }

        let info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size.max(size))
            .memory_type_index(self.memory_type);
        let memory = match vk.allocate_memory(self.device, &info) {
            Ok(memory) => memory,
            Err(e) => {
                vk.destroy_buffer(self.device, buffer);
                return Err(e.into());
            },
        };

        let result = self.copy_through(buffer, memory, size, record);

        vk.destroy_buffer(self.device, buffer);
        vk.free_memory(self.device, memory);
        result
    }

    fn copy_through(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        size: u64,
        record: impl FnOnce(vk::CommandBuffer, vk::Buffer),
    ) -> Result<Vec<u8>, MecError> {
        let vk = self.vk;
        vk.bind_buffer_memory(self.device, buffer, memory, 0)?;

        vk.reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())?;
        let begin = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        vk.begin_command_buffer(self.command_buffer, &begin)?;

        record(self.command_buffer, buffer);

        // Make the transfer visible to the host read below.
        let barrier = vk::BufferMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::HOST_READ)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE)
            .build();
        vk.cmd_pipeline_barrier(
            self.command_buffer,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::HOST,
            vk::DependencyFlags::empty(),
            &[],
            &[barrier],
            &[],
        );
        vk.end_command_buffer(self.command_buffer)?;

        let command_buffers = [self.command_buffer];
        let submit = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
        vk.queue_submit(self.queue, &[submit], vk::Fence::null())?;
        vk.queue_wait_idle(self.queue)?;

        let pointer = vk.map_memory(self.device, memory, 0, vk::WHOLE_SIZE)?;
        let range = vk::MappedMemoryRange::builder().memory(memory).offset(0).size(vk::WHOLE_SIZE).build();
        if let Err(e) = vk.invalidate_mapped_memory_ranges(self.device, &[range]) {
            vk.unmap_memory(self.device, memory);
            return Err(e.into());
        }

        // The mapping covers at least `size` bytes until the unmap below.
        let data = unsafe { slice::from_raw_parts(pointer as *const u8, size as usize) }.to_vec();
        vk.unmap_memory(self.device, memory);
        Ok(data)
    }

    /// Copies `[offset, offset + size)` of `buffer` to the host.
    pub fn read_buffer(&self, buffer: vk::Buffer, offset: u64, size: u64) -> Result<Vec<u8>, MecError> {
        let mut data = Vec::with_capacity(size as usize);

        let mut done = 0;
        while done < size {
            let chunk = (size - done).min(self.chunk_size);
            let src_offset = offset + done;
            trace!("Staging {} bytes of buffer {:#x} at {}", chunk, buffer.as_raw(), src_offset);

            let bytes = self.stage(chunk, |command_buffer, staging| {
                let barrier = vk::BufferMemoryBarrier::builder()
                    .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
                    .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(buffer)
                    .offset(src_offset)
                    .size(chunk)
                    .build();
                self.vk.cmd_pipeline_barrier(
                    command_buffer,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[barrier],
                    &[],
                );

                let region = vk::BufferCopy { src_offset, dst_offset: 0, size: chunk };
                self.vk.cmd_copy_buffer(command_buffer, buffer, staging, &[region]);
            })?;

            data.extend_from_slice(&bytes);
            done += chunk;
        }
        Ok(data)
    }

    /// Copies one aspect of one subresource of `image` to the host, tightly
    /// packed, leaving the image in the layout it was found in.
    pub fn read_image(&self, image: &Image, aspect: vk::ImageAspectFlags, layer: u32, level: u32) -> Result<Vec<u8>, MecError> {
        let block = formats::block_info(image.format, aspect).ok_or(MecError::Unsupported("image format"))?;
        let layout = image.layout(layer, level);
        if layout == vk::ImageLayout::UNDEFINED {
            return Err(MecError::Unsupported("image in undefined layout"));
        }

        let extent = formats::mip_extent(image.extent, level);
        let pitch = formats::row_pitch(block, extent.width);
        let rows = formats::block_rows(block, extent.height);
        let rows_per_chunk = (self.chunk_size / pitch.max(1)).clamp(1, rows.max(1) as u64) as u32;

        let mut data = Vec::with_capacity(formats::copy_size(block, extent) as usize);
        for z in 0..extent.depth {
            let mut row = 0;
            while row < rows {
                let count = rows_per_chunk.min(rows - row);
                let bytes = self.read_rows(image, aspect, layer, level, layout, block, extent, z, row, count)?;
                data.extend_from_slice(&bytes);
                row += count;
            }
        }
        Ok(data)
    }

    #[allow(clippy::too_many_arguments)]
    fn read_rows(
        &self,
        image: &Image,
        aspect: vk::ImageAspectFlags,
        layer: u32,
        level: u32,
        layout: vk::ImageLayout,
        block: BlockInfo,
        extent: vk::Extent3D,
        z: u32,
        row: u32,
        count: u32,
    ) -> Result<Vec<u8>, MecError> {
        let y = row * block.height;
        let height = (count * block.height).min(extent.height - y);
        let size = formats::row_pitch(block, extent.width) * count as u64;

        let range = vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: level,
            level_count: 1,
            base_array_layer: layer,
            layer_count: 1,
        };
        let transition = |old: vk::ImageLayout, new: vk::ImageLayout, src: vk::AccessFlags, dst: vk::AccessFlags| {
            vk::ImageMemoryBarrier::builder()
                .src_access_mask(src)
                .dst_access_mask(dst)
                .old_layout(old)
                .new_layout(new)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image.handle)
                .subresource_range(range)
                .build()
        };

        self.stage(size, |command_buffer, staging| {
            let vk = self.vk;
            vk.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[transition(layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::AccessFlags::MEMORY_WRITE, vk::AccessFlags::TRANSFER_READ)],
            );

            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: aspect,
                    mip_level: level,
                    base_array_layer: layer,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D { x: 0, y: y as i32, z: z as i32 },
                image_extent: vk::Extent3D { width: extent.width, height, depth: 1 },
            };
            vk.cmd_copy_image_to_buffer(command_buffer, image.handle, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, staging, &[region]);

            vk.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[transition(vk::ImageLayout::TRANSFER_SRC_OPTIMAL, layout, vk::AccessFlags::TRANSFER_READ, vk::AccessFlags::MEMORY_READ)],
            );
        })
    }
}

impl Drop for Staging<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.vk.queue_wait_idle(self.queue) {
            warn!("Queue {:#x} did not idle after staging: {:?}", self.queue.as_raw(), e);
        }
        // Destroying the pool frees its command buffer.
        self.vk.destroy_command_pool(self.device, self.pool);
    }
}
