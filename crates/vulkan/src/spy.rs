use std::ffi::c_void;
use std::{mem, slice};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use log::{debug, trace, warn};
use spyglass_encoder::Value;
use spyglass_memory::Address;
use spyglass_observer::CallObserver;

use crate::state::{Buffer, Device, DeviceMemory, Image, ImageView, Mapping, MemoryBinding, Queue};
use crate::{
    CommandBuffer, CommandPool, DescriptorSet, Framebuffer, HandleMap, Pipeline, PipelineLayout, RenderPass,
    SparseBindings, Swapchain, VkDriver,
};

/// Largest staging buffer a mid-execution capture allocates at once.
pub const DEFAULT_STAGING_CHUNK_SIZE: u64 = 16 << 20;

/// Shadow state of every Vulkan object the application owns.
///
/// Objects are keyed by their driver handle. Destroying an object erases its
/// entry before the handler returns, so a handle the driver hands out again
/// never resolves to the old object.
pub struct VulkanSpy {
    pub(crate) devices: HandleMap<vk::Device, Device>,
    pub(crate) queues: HandleMap<vk::Queue, Queue>,
    pub(crate) memories: HandleMap<vk::DeviceMemory, DeviceMemory>,
    pub(crate) buffers: HandleMap<vk::Buffer, Buffer>,
    pub(crate) images: HandleMap<vk::Image, Image>,
    pub(crate) image_views: HandleMap<vk::ImageView, ImageView>,
    pub(crate) command_pools: HandleMap<vk::CommandPool, CommandPool>,
    pub(crate) command_buffers: HandleMap<vk::CommandBuffer, CommandBuffer>,
    pub(crate) descriptor_sets: HandleMap<vk::DescriptorSet, DescriptorSet>,
    pub(crate) pipeline_layouts: HandleMap<vk::PipelineLayout, PipelineLayout>,
    pub(crate) pipelines: HandleMap<vk::Pipeline, Pipeline>,
    pub(crate) render_passes: HandleMap<vk::RenderPass, RenderPass>,
    pub(crate) framebuffers: HandleMap<vk::Framebuffer, Framebuffer>,
    pub(crate) swapchains: HandleMap<vk::SwapchainKHR, Swapchain>,
    pub(crate) staging_chunk_size: u64,
}

impl Default for VulkanSpy {
    fn default() -> Self {
        Self {
            devices: HandleMap::new(),
            queues: HandleMap::new(),
            memories: HandleMap::new(),
            buffers: HandleMap::new(),
            images: HandleMap::new(),
            image_views: HandleMap::new(),
            command_pools: HandleMap::new(),
            command_buffers: HandleMap::new(),
            descriptor_sets: HandleMap::new(),
            pipeline_layouts: HandleMap::new(),
            pipelines: HandleMap::new(),
            render_passes: HandleMap::new(),
            framebuffers: HandleMap::new(),
            swapchains: HandleMap::new(),
            staging_chunk_size: DEFAULT_STAGING_CHUNK_SIZE,
        }
    }
}

/// Records `count` values at `pointer` as read by the call.
///
/// # Safety
/// `pointer` must be null or valid for `count` reads until the observer's
/// next `observe_pending`.
pub(crate) unsafe fn read_array<T>(o: &mut CallObserver, pointer: *const T, count: u32) {
    if !pointer.is_null() && count > 0 {
        o.read(Address::from_ptr(pointer), (mem::size_of::<T>() * count as usize) as u64);
    }
}

/// Records `values` as read by the call.
pub(crate) fn read_values<T>(o: &mut CallObserver, values: &[T]) {
    // The borrow outlives the handler, which flushes before returning.
    unsafe { read_array(o, values.as_ptr(), values.len() as u32) }
}

pub(crate) fn read_value<T>(o: &mut CallObserver, value: &T) {
    read_values(o, slice::from_ref(value))
}

/// `count` values at `pointer`, empty for a null pointer.
///
/// # Safety
/// `pointer` must be null or valid for `count` reads for `'a`.
pub(crate) unsafe fn array<'a, T>(pointer: *const T, count: u32) -> &'a [T] {
    if pointer.is_null() || count == 0 {
        &[]
    } else {
        slice::from_raw_parts(pointer, count as usize)
    }
}

pub(crate) fn result_value<T>(result: &VkResult<T>) -> Value {
    let code = match result {
        Ok(_) => vk::Result::SUCCESS,
        Err(e) => *e,
    };
    Value::I32(code.as_raw())
}

/// Encodes the result of a call that creates `H`, with the handle on success.
pub(crate) fn encode_created<H: Handle + Copy>(o: &mut CallObserver, result: &VkResult<H>) {
    let value = match result {
        Ok(handle) => Value::Array(vec![result_value(result), Value::Handle(handle.as_raw())]),
        Err(_) => result_value(result),
    };
    o.encode_return(value);
}

pub(crate) fn encode_created_all<H: Handle + Copy>(o: &mut CallObserver, result: &VkResult<Vec<H>>) {
    let value = match result {
        Ok(handles) => Value::Array(vec![
            result_value(result),
            Value::Array(handles.iter().map(|h| Value::Handle(h.as_raw())).collect()),
        ]),
        Err(_) => result_value(result),
    };
    o.encode_return(value);
}

pub(crate) fn handle<H: Handle>(handle: H) -> Value {
    Value::Handle(handle.as_raw())
}

pub(crate) fn pointer<T>(value: &T) -> Value {
    Value::Pointer(value as *const T as u64)
}

impl VulkanSpy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the size of each staging copy made during mid-execution capture.
    pub fn set_staging_chunk_size(&mut self, size: u64) {
        self.staging_chunk_size = size.max(1);
    }

    pub fn device(&self, handle: vk::Device) -> Option<&Device> {
        self.devices.get(handle)
    }

    pub fn memory(&self, handle: vk::DeviceMemory) -> Option<&DeviceMemory> {
        self.memories.get(handle)
    }

    pub fn buffer(&self, handle: vk::Buffer) -> Option<&Buffer> {
        self.buffers.get(handle)
    }

    pub fn image(&self, handle: vk::Image) -> Option<&Image> {
        self.images.get(handle)
    }

    pub fn command_buffer(&self, handle: vk::CommandBuffer) -> Option<&CommandBuffer> {
        self.command_buffers.get(handle)
    }

    pub fn object_count(&self) -> usize {
        self.devices.len()
            + self.queues.len()
            + self.memories.len()
            + self.buffers.len()
            + self.images.len()
            + self.image_views.len()
            + self.command_pools.len()
            + self.command_buffers.len()
            + self.descriptor_sets.len()
            + self.pipeline_layouts.len()
            + self.pipelines.len()
            + self.render_passes.len()
            + self.framebuffers.len()
            + self.swapchains.len()
    }

    /// # Safety
    /// Every pointer inside `info` must be valid for its count.
    pub unsafe fn create_device(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        physical_device: vk::PhysicalDevice,
        info: &vk::DeviceCreateInfo,
    ) -> VkResult<vk::Device> {
        o.command(vec![handle(physical_device), pointer(info)]);
        read_value(o, info);
        read_array(o, info.p_queue_create_infos, info.queue_create_info_count);
        o.observe_pending();

        let result = vk.create_device(physical_device, info);
        o.resume();
        encode_created(o, &result);

        if let Ok(device) = result {
            let memory_properties = vk.get_physical_device_memory_properties(physical_device);
            self.devices.insert(device, Device {
                handle: device,
                physical_device,
                memory_properties,
                queues: Vec::new(),
            });
            debug!("Device {:#x} created", device.as_raw());
        }
        result
    }

    pub fn destroy_device(&mut self, o: &mut CallObserver, vk: &dyn VkDriver, device: vk::Device) {
        o.command(vec![handle(device)]);
        vk.destroy_device(device);
        o.resume();

        self.forget_device(device);
    }

    /// Drops the device and every object created from it.
    fn forget_device(&mut self, device: vk::Device) {
        let mut dropped = self.queues.remove_where(|q| q.device == device).len();
        dropped += self.memories.remove_where(|m| m.device == device).len();
        dropped += self.buffers.remove_where(|b| b.device == device).len();
        dropped += self.images.remove_where(|i| i.device == device).len();
        dropped += self.image_views.remove_where(|v| v.device == device).len();
        dropped += self.command_buffers.remove_where(|c| c.device == device).len();
        dropped += self.command_pools.remove_where(|p| p.device == device).len();
        dropped += self.descriptor_sets.remove_where(|s| s.device == device).len();
        dropped += self.pipelines.remove_where(|p| p.device == device).len();
        dropped += self.pipeline_layouts.remove_where(|l| l.device == device).len();
        dropped += self.framebuffers.remove_where(|f| f.device == device).len();
        dropped += self.render_passes.remove_where(|r| r.device == device).len();
        dropped += self.swapchains.remove_where(|s| s.device == device).len();

        if self.devices.remove(device).is_some() {
            debug!("Device {:#x} destroyed with {} child objects", device.as_raw(), dropped);
        }
    }

    pub fn get_device_queue(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        family: u32,
        index: u32,
    ) -> vk::Queue {
        o.command(vec![handle(device), Value::U32(family), Value::U32(index)]);
        let queue = vk.get_device_queue(device, family, index);
        o.resume();
        o.encode_return(handle(queue));

        if queue == vk::Queue::null() || self.queues.contains(queue) {
            return queue;
        }

        self.queues.insert(queue, Queue { handle: queue, device, family, index });
        if let Some(d) = self.devices.get_mut(device) {
            d.queues.push(queue);
        }
        queue
    }

    pub fn allocate_memory(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        info: &vk::MemoryAllocateInfo,
    ) -> VkResult<vk::DeviceMemory> {
        o.command(vec![handle(device), pointer(info)]);
        read_value(o, info);
        o.observe_pending();

        let result = vk.allocate_memory(device, info);
        o.resume();
        encode_created(o, &result);

        if let Ok(memory) = result {
            let property_flags = match self.devices.get(device) {
                Some(d) => d.memory_type_flags(info.memory_type_index),
                None => {
                    warn!("Memory {:#x} allocated from unknown device {:#x}", memory.as_raw(), device.as_raw());
                    vk::MemoryPropertyFlags::empty()
                },
            };

            let pool = o.allocate_pool();
            trace!("Memory {:#x} ({} bytes) backs pool {:?}", memory.as_raw(), info.allocation_size, pool);
            self.memories.insert(memory, DeviceMemory {
                handle: memory,
                device,
                size: info.allocation_size,
                memory_type: info.memory_type_index,
                property_flags,
                pool,
                mapping: None,
            });
        }
        result
    }

    pub fn free_memory(&mut self, o: &mut CallObserver, vk: &dyn VkDriver, device: vk::Device, memory: vk::DeviceMemory) {
        o.command(vec![handle(device), handle(memory)]);
        // Freeing unmaps; whatever was written through the mapping is final.
        self.observe_mapping(o, memory, None);
        vk.free_memory(device, memory);
        o.resume();

        if self.memories.remove(memory).is_some() {
            for (_, buffer) in self.buffers.iter_mut() {
                buffer.sparse.unbind_memory(memory);
            }
            for (_, image) in self.images.iter_mut() {
                image.sparse.unbind_memory(memory);
            }
        }
    }

    pub fn map_memory(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        memory: vk::DeviceMemory,
        offset: u64,
        size: u64,
    ) -> VkResult<*mut c_void> {
        o.command(vec![handle(device), handle(memory), Value::U64(offset), Value::U64(size)]);
        let result = vk.map_memory(device, memory, offset, size);
        o.resume();
        o.encode_return(match &result {
            Ok(p) => Value::Array(vec![result_value(&result), Value::Pointer(*p as u64)]),
            Err(_) => result_value(&result),
        });

        if let (Ok(p), Some(m)) = (&result, self.memories.get_mut(memory)) {
            let size = if size == vk::WHOLE_SIZE { m.size.saturating_sub(offset) } else { size };
            m.mapping = Some(Mapping { offset, size, pointer: *p as u64 });
        }
        result
    }

    pub fn unmap_memory(&mut self, o: &mut CallObserver, vk: &dyn VkDriver, device: vk::Device, memory: vk::DeviceMemory) {
        o.command(vec![handle(device), handle(memory)]);
        self.observe_mapping(o, memory, None);
        vk.unmap_memory(device, memory);
        o.resume();

        if let Some(m) = self.memories.get_mut(memory) {
            m.mapping = None;
        }
    }

    pub fn flush_mapped_memory_ranges(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        ranges: &[vk::MappedMemoryRange],
    ) -> VkResult<()> {
        o.command(vec![handle(device), Value::U32(ranges.len() as u32)]);
        read_values(o, ranges);
        o.observe_pending();
        for range in ranges {
            self.observe_mapping(o, range.memory, Some((range.offset, range.size)));
        }

        let result = vk.flush_mapped_memory_ranges(device, ranges);
        o.resume();
        o.encode_return(result_value(&result));
        result
    }

    /// Observes the mapped part of `memory` that overlaps `range` (the whole
    /// mapping for `None`) as the contents of the memory's pool.
    pub(crate) fn observe_mapping(&self, o: &mut CallObserver, memory: vk::DeviceMemory, range: Option<(u64, u64)>) {
        if !o.is_tracing() {
            return;
        }
        let Some(m) = self.memories.get(memory) else {
            return;
        };
        let Some(mapping) = m.mapping else {
            return;
        };

        let mapping_end = mapping.offset + mapping.size;
        let (start, end) = match range {
            None => (mapping.offset, mapping_end),
            Some((offset, size)) => {
                let end = if size == vk::WHOLE_SIZE { mapping_end } else { offset.saturating_add(size) };
                (offset.max(mapping.offset), end.min(mapping_end))
            },
        };
        if start >= end {
            return;
        }

        // The mapping stays valid until the unmap or free this precedes.
        let data = unsafe {
            slice::from_raw_parts((mapping.pointer + (start - mapping.offset)) as usize as *const u8, (end - start) as usize)
        };
        o.observe_bytes(m.pool, Address::from(start), data);
    }

    /// Observes every mapped host-coherent allocation. Writes to those need
    /// no flush, so a submit is the last point they can be seen.
    pub(crate) fn observe_coherent_mappings(&self, o: &mut CallObserver) {
        let coherent: Vec<vk::DeviceMemory> = self.memories.iter()
            .filter(|(_, m)| m.mapping.is_some() && m.is_host_coherent())
            .map(|(handle, _)| handle)
            .collect();

        for memory in coherent {
            self.observe_mapping(o, memory, None);
        }
    }

    pub fn create_buffer(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        info: &vk::BufferCreateInfo,
    ) -> VkResult<vk::Buffer> {
        o.command(vec![handle(device), pointer(info)]);
        read_value(o, info);
        o.observe_pending();

        let result = vk.create_buffer(device, info);
        o.resume();
        encode_created(o, &result);

        if let Ok(buffer) = result {
            self.buffers.insert(buffer, Buffer {
                handle: buffer,
                device,
                size: info.size,
                usage: info.usage,
                flags: info.flags,
                binding: None,
                sparse: SparseBindings::new(),
            });
        }
        result
    }

    pub fn destroy_buffer(&mut self, o: &mut CallObserver, vk: &dyn VkDriver, device: vk::Device, buffer: vk::Buffer) {
        o.command(vec![handle(device), handle(buffer)]);
        vk.destroy_buffer(device, buffer);
        o.resume();

        self.buffers.remove(buffer);
    }

    pub fn bind_buffer_memory(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: u64,
    ) -> VkResult<()> {
        o.command(vec![handle(device), handle(buffer), handle(memory), Value::U64(offset)]);
        let result = vk.bind_buffer_memory(device, buffer, memory, offset);
        o.resume();
        o.encode_return(result_value(&result));

        if result.is_ok() {
            let binding = self.memories.reference(memory).map(|memory| MemoryBinding { memory, offset });
            match self.buffers.get_mut(buffer) {
                Some(b) => b.binding = binding,
                None => warn!("Memory bound to unknown buffer {:#x}", buffer.as_raw()),
            }
        }
        result
    }

    pub fn create_image(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        info: &vk::ImageCreateInfo,
    ) -> VkResult<vk::Image> {
        o.command(vec![handle(device), pointer(info)]);
        read_value(o, info);
        o.observe_pending();

        let result = vk.create_image(device, info);
        o.resume();
        encode_created(o, &result);

        if let Ok(image) = result {
            let mut shadow = Image::new(image, device, info);
            shadow.memory_size = vk.get_image_memory_requirements(device, image).size;
            self.images.insert(image, shadow);
        }
        result
    }

    pub fn destroy_image(&mut self, o: &mut CallObserver, vk: &dyn VkDriver, device: vk::Device, image: vk::Image) {
        o.command(vec![handle(device), handle(image)]);
        vk.destroy_image(device, image);
        o.resume();

        self.images.remove(image);
    }

    pub fn bind_image_memory(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: u64,
    ) -> VkResult<()> {
        o.command(vec![handle(device), handle(image), handle(memory), Value::U64(offset)]);
        let result = vk.bind_image_memory(device, image, memory, offset);
        o.resume();
        o.encode_return(result_value(&result));

        if result.is_ok() {
            let binding = self.memories.reference(memory).map(|memory| MemoryBinding { memory, offset });
            match self.images.get_mut(image) {
                Some(i) => i.binding = binding,
                None => warn!("Memory bound to unknown image {:#x}", image.as_raw()),
            }
        }
        result
    }

    pub fn create_image_view(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        info: &vk::ImageViewCreateInfo,
    ) -> VkResult<vk::ImageView> {
        o.command(vec![handle(device), pointer(info)]);
        read_value(o, info);
        o.observe_pending();

        let result = vk.create_image_view(device, info);
        o.resume();
        encode_created(o, &result);

        if let Ok(view) = result {
            match self.images.reference(info.image) {
                Some(image) => {
                    self.image_views.insert(view, ImageView {
                        handle: view,
                        device,
                        image,
                        format: info.format,
                        range: info.subresource_range,
                    });
                },
                None => warn!("View {:#x} of unknown image {:#x}", view.as_raw(), info.image.as_raw()),
            }
        }
        result
    }

    pub fn destroy_image_view(&mut self, o: &mut CallObserver, vk: &dyn VkDriver, device: vk::Device, view: vk::ImageView) {
        o.command(vec![handle(device), handle(view)]);
        vk.destroy_image_view(device, view);
        o.resume();

        self.image_views.remove(view);
    }

    /// # Safety
    /// Every pointer inside `infos` must be valid for its count.
    pub unsafe fn queue_bind_sparse(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        queue: vk::Queue,
        infos: &[vk::BindSparseInfo],
        fence: vk::Fence,
    ) -> VkResult<()> {
        o.command(vec![handle(queue), Value::U32(infos.len() as u32), handle(fence)]);
        read_values(o, infos);
        for info in infos {
            read_array(o, info.p_buffer_binds, info.buffer_bind_count);
            read_array(o, info.p_image_opaque_binds, info.image_opaque_bind_count);
        }
        o.observe_pending();

        let result = vk.queue_bind_sparse(queue, infos, fence);
        o.resume();
        o.encode_return(result_value(&result));

        if result.is_ok() {
            for info in infos {
                self.apply_sparse_binds(info);
            }
        }
        result
    }

    unsafe fn apply_sparse_binds(&mut self, info: &vk::BindSparseInfo) {
        for bind in array(info.p_buffer_binds, info.buffer_bind_count) {
            let Some(buffer) = self.buffers.get_mut(bind.buffer) else {
                warn!("Sparse bind to unknown buffer {:#x}", bind.buffer.as_raw());
                continue;
            };
            for range in array(bind.p_binds, bind.bind_count) {
                buffer.sparse.bind(range.resource_offset, range.size, range.memory, range.memory_offset);
            }
        }

        for bind in array(info.p_image_opaque_binds, info.image_opaque_bind_count) {
            let Some(image) = self.images.get_mut(bind.image) else {
                warn!("Sparse bind to unknown image {:#x}", bind.image.as_raw());
                continue;
            };
            for range in array(bind.p_binds, bind.bind_count) {
                if range.flags.contains(vk::SparseMemoryBindFlags::METADATA) {
                    // Metadata lives outside the image's opaque range.
                    continue;
                }
                image.sparse.bind(range.resource_offset, range.size, range.memory, range.memory_offset);
            }
        }

        if info.image_bind_count > 0 {
            debug!("{} sparse image region binds are not tracked", info.image_bind_count);
        }
    }
}
