//! Reconstruction of Vulkan object contents when capture starts late.
//!
//! Buffer and image contents are copied into host-visible staging buffers
//! on one of the owning device's queues and emitted as observations of the
//! pools backing them. Recorded command buffers are re-emitted through the
//! replayer.

use std::slice;

use ash::vk::{self, Handle};
use log::{debug, info, warn};
use thiserror::Error;
use spyglass_encoder::{Command, InitialState, Message, Value};
use spyglass_memory::Address;
use spyglass_observer::{ApiIndex, CallObserver};

use crate::formats;
use crate::spy::handle;
use crate::staging::Staging;
use crate::{Buffer, Descriptor, Image, RecordingState, VkDriver, VulkanSpy};

#[derive(Debug, Error)]
pub enum MecError {
    #[error("Vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),
    #[error("device has no host-visible coherent memory type")]
    NoHostVisibleMemory,
    #[error("no queue to stage contents on")]
    NoQueue,
    #[error("{0} is not supported")]
    Unsupported(&'static str),
    #[error("sparse resource is only partially bound")]
    PartiallyBound,
    #[error("resource has no memory bound")]
    Unbound,
}

fn initial_state(kind: &str, handle: u64, fields: Vec<(&str, Value)>) -> Message {
    Message::InitialState(InitialState {
        api: ApiIndex::VULKAN.0,
        kind: kind.to_string(),
        handle,
        fields: fields.into_iter().map(|(name, value)| (name.to_string(), value)).collect(),
    })
}

/// Emits `data` as the contents of a fresh spy pool and returns the pool.
fn emit_contents(o: &mut CallObserver, data: &[u8]) -> u32 {
    let pool = o.allocate_pool();
    o.observe_bytes(pool, Address::NULL, data);
    pool.0
}

impl VulkanSpy {
    /// Emits the state of every live object as initial-state records.
    ///
    /// Contents that cannot be read back are logged and left out; nothing
    /// here fails the capture.
    pub fn capture_state(&mut self, o: &mut CallObserver, vk: &dyn VkDriver) {
        info!(
            "Capturing Vulkan state: {} devices, {} buffers, {} images, {} command buffers",
            self.devices.len(), self.buffers.len(), self.images.len(), self.command_buffers.len()
        );
        o.enter(Message::Extra { name: "mid_execution_capture".to_string(), value: Value::Str("vulkan".to_string()) });

        self.emit_devices(o);
        self.emit_memories(o);

        for device in self.devices.handles() {
            let staging = match self.staging_for(vk, device) {
                Ok(staging) => Some(staging),
                Err(e) => {
                    warn!("Contents of device {:#x} not captured: {}", device.as_raw(), e);
                    None
                },
            };

            for (_, buffer) in self.buffers.iter().filter(|(_, b)| b.device == device) {
                self.capture_buffer(o, staging.as_ref(), buffer);
            }
            for (_, image) in self.images.iter().filter(|(_, i)| i.device == device) {
                self.capture_image(o, staging.as_ref(), image);
            }
        }

        self.emit_objects(o);
        self.emit_command_buffers(o);

        o.exit();
    }

    fn staging_for<'a>(&self, vk: &'a dyn VkDriver, device: vk::Device) -> Result<Staging<'a>, MecError> {
        let shadow = self.devices.get(device).ok_or(MecError::NoQueue)?;
        let queue = shadow.queues.iter()
            .filter_map(|q| self.queues.get(*q))
            .next()
            .ok_or(MecError::NoQueue)?;
        Staging::new(vk, shadow, queue, self.staging_chunk_size)
    }

    fn emit_devices(&self, o: &mut CallObserver) {
        for (device, shadow) in self.devices.iter() {
            o.encode(initial_state("Device", device.as_raw(), vec![
                ("physical_device", handle(shadow.physical_device)),
                ("queues", Value::Array(shadow.queues.iter().map(|q| handle(*q)).collect())),
            ]));
        }
        for (queue, shadow) in self.queues.iter() {
            o.encode(initial_state("Queue", queue.as_raw(), vec![
                ("device", handle(shadow.device)),
                ("family", Value::U32(shadow.family)),
                ("index", Value::U32(shadow.index)),
            ]));
        }
    }

    fn emit_memories(&self, o: &mut CallObserver) {
        for (memory, shadow) in self.memories.iter() {
            let mut fields = vec![
                ("device", handle(shadow.device)),
                ("size", Value::U64(shadow.size)),
                ("memory_type", Value::U32(shadow.memory_type)),
                ("property_flags", Value::U32(shadow.property_flags.as_raw())),
                ("pool", Value::U32(shadow.pool.0)),
            ];
            if let Some(mapping) = shadow.mapping {
                fields.extend([
                    ("mapped_offset", Value::U64(mapping.offset)),
                    ("mapped_size", Value::U64(mapping.size)),
                    ("mapped_pointer", Value::Pointer(mapping.pointer)),
                ]);
            }
            o.encode(initial_state("DeviceMemory", memory.as_raw(), fields));

            // Coherent mappings can be read directly.
            if let (Some(mapping), true) = (shadow.mapping, shadow.is_host_coherent()) {
                let data = unsafe { slice::from_raw_parts(mapping.pointer as usize as *const u8, mapping.size as usize) };
                o.observe_bytes(shadow.pool, Address::from(mapping.offset), data);
            }
        }
    }

    fn capture_buffer(&self, o: &mut CallObserver, staging: Option<&Staging>, buffer: &Buffer) {
        let binding = buffer.binding.filter(|b| self.memories.is_live(&b.memory));
        let mut fields = vec![
            ("device", handle(buffer.device)),
            ("size", Value::U64(buffer.size)),
            ("usage", Value::U32(buffer.usage.as_raw())),
            ("flags", Value::U32(buffer.flags.as_raw())),
        ];
        if let Some(binding) = binding {
            fields.extend([("memory", Value::Handle(binding.memory.raw())), ("offset", Value::U64(binding.offset))]);
        }
        if buffer.is_sparse() {
            let bindings = buffer.sparse.iter()
                .map(|(offset, b)| Value::Array(vec![
                    Value::U64(offset),
                    Value::U64(b.size),
                    handle(b.memory),
                    Value::U64(b.memory_offset),
                ]))
                .collect();
            fields.push(("sparse_bindings", Value::Array(bindings)));
        }
        o.encode(initial_state("Buffer", buffer.handle.as_raw(), fields));

        let Some(staging) = staging else {
            return;
        };
        if let Err(e) = self.capture_buffer_contents(o, staging, buffer) {
            warn!("Buffer {:#x} contents not captured: {}", buffer.handle.as_raw(), e);
        }
    }

    fn capture_buffer_contents(&self, o: &mut CallObserver, staging: &Staging, buffer: &Buffer) -> Result<(), MecError> {
        if buffer.size == 0 {
            return Ok(());
        }

        if buffer.is_sparse() {
            if !buffer.sparse.is_fully_bound(0, buffer.size) {
                return Err(MecError::PartiallyBound);
            }

            for (offset, binding) in buffer.sparse.iter() {
                if offset >= buffer.size {
                    break;
                }
                let Some(memory) = self.memories.get(binding.memory) else {
                    return Err(MecError::Unbound);
                };
                let size = binding.size.min(buffer.size - offset);
                let data = staging.read_buffer(buffer.handle, offset, size)?;
                o.observe_bytes(memory.pool, Address::from(binding.memory_offset), &data);
            }
            return Ok(());
        }

        let binding = buffer.binding.ok_or(MecError::Unbound)?;
        let memory = self.memories.resolve(&binding.memory).ok_or(MecError::Unbound)?;

        let data = staging.read_buffer(buffer.handle, 0, buffer.size)?;
        o.observe_bytes(memory.pool, Address::from(binding.offset), &data);
        debug!("Buffer {:#x} captured, {} bytes", buffer.handle.as_raw(), data.len());
        Ok(())
    }

    fn capture_image(&self, o: &mut CallObserver, staging: Option<&Staging>, image: &Image) {
        o.encode(initial_state("Image", image.handle.as_raw(), vec![
            ("device", handle(image.device)),
            ("flags", Value::U32(image.flags.as_raw())),
            ("image_type", Value::I32(image.image_type.as_raw())),
            ("format", Value::I32(image.format.as_raw())),
            ("extent", Value::Array(vec![
                Value::U32(image.extent.width),
                Value::U32(image.extent.height),
                Value::U32(image.extent.depth),
            ])),
            ("mip_levels", Value::U32(image.mip_levels)),
            ("array_layers", Value::U32(image.array_layers)),
            ("samples", Value::U32(image.samples.as_raw())),
            ("tiling", Value::I32(image.tiling.as_raw())),
            ("usage", Value::U32(image.usage.as_raw())),
            ("swapchain", Value::Handle(image.swapchain.map(|s| s.as_raw()).unwrap_or(0))),
        ]));

        let Some(staging) = staging else {
            return;
        };
        if let Err(e) = self.check_image_readable(image) {
            warn!("Image {:#x} contents not captured: {}", image.handle.as_raw(), e);
            return;
        }

        for aspect in formats::split_aspects(formats::aspects(image.format)) {
            for layer in 0..image.array_layers {
                for level in 0..image.mip_levels {
                    self.capture_level(o, staging, image, aspect, layer, level);
                }
            }
        }
    }

    fn check_image_readable(&self, image: &Image) -> Result<(), MecError> {
        if image.samples != vk::SampleCountFlags::TYPE_1 {
            return Err(MecError::Unsupported("multisampled image"));
        }
        if image.is_sparse() {
            if !image.sparse.is_fully_bound(0, image.memory_size) {
                return Err(MecError::PartiallyBound);
            }
            return Ok(());
        }
        if image.swapchain.is_some() {
            return Ok(());
        }

        match image.binding {
            Some(binding) if self.memories.is_live(&binding.memory) => Ok(()),
            _ => Err(MecError::Unbound),
        }
    }

    fn capture_level(
        &self,
        o: &mut CallObserver,
        staging: &Staging,
        image: &Image,
        aspect: vk::ImageAspectFlags,
        layer: u32,
        level: u32,
    ) {
        let layout = image.layout(layer, level);
        let extent = formats::mip_extent(image.extent, level);
        let mut fields = vec![
            ("image", Value::Handle(image.handle.as_raw())),
            ("aspect", Value::U32(aspect.as_raw())),
            ("layer", Value::U32(layer)),
            ("level", Value::U32(level)),
            ("layout", Value::I32(layout.as_raw())),
            ("extent", Value::Array(vec![Value::U32(extent.width), Value::U32(extent.height), Value::U32(extent.depth)])),
        ];

        // Undefined contents need not be captured.
        if layout != vk::ImageLayout::UNDEFINED {
            match staging.read_image(image, aspect, layer, level) {
                Ok(mut data) => {
                    if formats::is_x8_d24(image.format, aspect) {
                        data = formats::strip_x8_d24(&data);
                    }
                    let pool = emit_contents(o, &data);
                    fields.push(("pool", Value::U32(pool)));
                },
                Err(e) => warn!(
                    "Image {:#x} layer {} level {} not captured: {}",
                    image.handle.as_raw(), layer, level, e
                ),
            }
        }

        o.encode(initial_state("ImageLevel", image.handle.as_raw(), fields));
    }

    fn emit_objects(&self, o: &mut CallObserver) {
        for (view, shadow) in self.image_views.iter() {
            o.encode(initial_state("ImageView", view.as_raw(), vec![
                ("device", handle(shadow.device)),
                ("image", Value::Handle(shadow.image.raw())),
                ("live", Value::Bool(self.images.is_live(&shadow.image))),
                ("format", Value::I32(shadow.format.as_raw())),
                ("aspect", Value::U32(shadow.range.aspect_mask.as_raw())),
                ("base_level", Value::U32(shadow.range.base_mip_level)),
                ("level_count", Value::U32(shadow.range.level_count)),
                ("base_layer", Value::U32(shadow.range.base_array_layer)),
                ("layer_count", Value::U32(shadow.range.layer_count)),
            ]));
        }

        for (render_pass, shadow) in self.render_passes.iter() {
            let attachments = shadow.attachments.iter()
                .map(|a| Value::Array(vec![
                    Value::I32(a.format.as_raw()),
                    Value::U32(a.samples.as_raw()),
                    Value::I32(a.initial_layout.as_raw()),
                    Value::I32(a.final_layout.as_raw()),
                ]))
                .collect();
            o.encode(initial_state("RenderPass", render_pass.as_raw(), vec![
                ("device", handle(shadow.device)),
                ("attachments", Value::Array(attachments)),
            ]));
        }

        for (framebuffer, shadow) in self.framebuffers.iter() {
            o.encode(initial_state("Framebuffer", framebuffer.as_raw(), vec![
                ("device", handle(shadow.device)),
                ("render_pass", handle(shadow.render_pass)),
                ("attachments", Value::Array(shadow.attachments.iter().map(|v| Value::Handle(v.raw())).collect())),
                ("width", Value::U32(shadow.width)),
                ("height", Value::U32(shadow.height)),
                ("layers", Value::U32(shadow.layers)),
            ]));
        }

        for (layout, shadow) in self.pipeline_layouts.iter() {
            o.encode(initial_state("PipelineLayout", layout.as_raw(), vec![
                ("device", handle(shadow.device)),
                ("set_layouts", Value::Array(shadow.set_layouts.iter().map(|l| handle(*l)).collect())),
            ]));
        }

        for (pipeline, shadow) in self.pipelines.iter() {
            o.encode(initial_state("Pipeline", pipeline.as_raw(), vec![
                ("device", handle(shadow.device)),
                ("bind_point", Value::I32(shadow.bind_point.as_raw())),
                ("layout", handle(shadow.layout)),
                ("render_pass", handle(shadow.render_pass)),
            ]));
        }

        for (set, shadow) in self.descriptor_sets.iter() {
            let descriptors = shadow.descriptors.iter()
                .map(|((binding, element), (ty, descriptor))| {
                    let target = match descriptor {
                        Descriptor::Image { sampler, view, layout } => {
                            vec![handle(*sampler), handle(*view), Value::I32(layout.as_raw())]
                        },
                        Descriptor::Buffer { buffer, offset, range } => {
                            vec![handle(*buffer), Value::U64(*offset), Value::U64(*range)]
                        },
                        Descriptor::TexelBuffer(view) => vec![handle(*view)],
                    };
                    let mut entry = vec![Value::U32(*binding), Value::U32(*element), Value::I32(ty.as_raw())];
                    entry.extend(target);
                    Value::Array(entry)
                })
                .collect();
            o.encode(initial_state("DescriptorSet", set.as_raw(), vec![
                ("device", handle(shadow.device)),
                ("pool", handle(shadow.pool)),
                ("layout", handle(shadow.layout)),
                ("descriptors", Value::Array(descriptors)),
            ]));
        }

        for (pool, shadow) in self.command_pools.iter() {
            o.encode(initial_state("CommandPool", pool.as_raw(), vec![
                ("device", handle(shadow.device)),
                ("family", Value::U32(shadow.family)),
                ("flags", Value::U32(shadow.flags.as_raw())),
            ]));
        }
    }

    /// Re-emits every executable command buffer's valid commands under an
    /// initial-state group for the command buffer.
    fn emit_command_buffers(&self, o: &mut CallObserver) {
        for (command_buffer, shadow) in self.command_buffers.iter() {
            if shadow.state != RecordingState::Executable {
                continue;
            }

            o.enter(initial_state("CommandBuffer", command_buffer.as_raw(), vec![
                ("device", handle(shadow.device)),
                ("pool", handle(shadow.pool)),
                ("level", Value::I32(shadow.level.as_raw())),
                ("usage", Value::U32(shadow.usage.as_raw())),
            ]));

            let thread = o.thread();
            let mut commands = Vec::new();
            let report = self.replay(command_buffer, |command| {
                commands.push(Message::Command(Command {
                    api: ApiIndex::VULKAN.0,
                    name: command.kind().name().to_string(),
                    thread,
                    args: command.args(command_buffer),
                }));
            });
            for command in commands {
                o.encode(command);
            }

            match report {
                Ok(report) if report.skipped > 0 => warn!(
                    "Command buffer {:#x}: {} commands re-emitted, {} skipped",
                    command_buffer.as_raw(), report.replayed, report.skipped
                ),
                Ok(report) => debug!("Command buffer {:#x}: {} commands re-emitted", command_buffer.as_raw(), report.replayed),
                Err(e) => warn!("Command buffer {:#x} not re-emitted: {}", command_buffer.as_raw(), e),
            }

            o.exit();
        }
    }
}
