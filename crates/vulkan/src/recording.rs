//! Command pools and buffers, the `vkCmd*` recorder and the replayer that
//! re-validates recorded commands against live shadow state.

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use log::{debug, warn};
use thiserror::Error;
use spyglass_encoder::Value;
use spyglass_memory::Address;
use spyglass_observer::CallObserver;

use crate::spy::{array, encode_created, encode_created_all, handle, pointer, read_array, read_value, read_values, result_value};
use crate::{
    BufferBarrier, CommandBuffer, CommandKind, CommandPool, CommandReference, ImageTransition, ObjectRef, Recorded,
    RecordedCommand, RecordedObject, RecordingState, VkDriver, VulkanSpy,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("{kind:?} refers to destroyed {object} {handle:#x}")]
    Stale {
        kind: CommandKind,
        object: &'static str,
        handle: u64,
    },
    #[error("secondary command buffer {0:#x} is not executable")]
    NotExecutable(u64),
    #[error("unknown command buffer {0:#x}")]
    UnknownCommandBuffer(u64),
}

/// Outcome of replaying one command buffer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    pub replayed: usize,
    pub skipped: usize,
}

/// Application memory read by a command, as `(base, size)`.
fn span<T>(values: &[T]) -> (Address, u64) {
    (Address::from_ptr(values.as_ptr()), std::mem::size_of_val(values) as u64)
}

impl VulkanSpy {
    pub fn create_command_pool(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        info: &vk::CommandPoolCreateInfo,
    ) -> VkResult<vk::CommandPool> {
        o.command(vec![handle(device), pointer(info)]);
        read_value(o, info);
        o.observe_pending();

        let result = vk.create_command_pool(device, info);
        o.resume();
        encode_created(o, &result);

        if let Ok(pool) = result {
            self.command_pools.insert(pool, CommandPool {
                handle: pool,
                device,
                family: info.queue_family_index,
                flags: info.flags,
            });
        }
        result
    }

    pub fn destroy_command_pool(&mut self, o: &mut CallObserver, vk: &dyn VkDriver, device: vk::Device, pool: vk::CommandPool) {
        o.command(vec![handle(device), handle(pool)]);
        vk.destroy_command_pool(device, pool);
        o.resume();

        let freed = self.command_buffers.remove_where(|c| c.pool == pool);
        if self.command_pools.remove(pool).is_some() {
            debug!("Command pool {:#x} destroyed with {} command buffers", pool.as_raw(), freed.len());
        }
    }

    pub fn reset_command_pool(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        pool: vk::CommandPool,
        flags: vk::CommandPoolResetFlags,
    ) -> VkResult<()> {
        o.command(vec![handle(device), handle(pool), Value::U32(flags.as_raw())]);
        let result = vk.reset_command_pool(device, pool, flags);
        o.resume();
        o.encode_return(result_value(&result));

        if result.is_ok() {
            for (_, command_buffer) in self.command_buffers.iter_mut().filter(|(_, c)| c.pool == pool) {
                command_buffer.reset();
            }
        }
        result
    }

    pub fn allocate_command_buffers(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        info: &vk::CommandBufferAllocateInfo,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        o.command(vec![handle(device), pointer(info)]);
        read_value(o, info);
        o.observe_pending();

        let result = vk.allocate_command_buffers(device, info);
        o.resume();
        encode_created_all(o, &result);

        if let Ok(command_buffers) = &result {
            for command_buffer in command_buffers {
                self.command_buffers.insert(
                    *command_buffer,
                    CommandBuffer::new(*command_buffer, device, info.command_pool, info.level),
                );
            }
        }
        result
    }

    pub fn free_command_buffers(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        pool: vk::CommandPool,
        command_buffers: &[vk::CommandBuffer],
    ) {
        o.command(vec![handle(device), handle(pool), Value::U32(command_buffers.len() as u32)]);
        read_values(o, command_buffers);
        o.observe_pending();

        vk.free_command_buffers(device, pool, command_buffers);
        o.resume();

        for command_buffer in command_buffers {
            self.command_buffers.remove(*command_buffer);
        }
    }

    pub fn begin_command_buffer(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo,
    ) -> VkResult<()> {
        o.command(vec![handle(command_buffer), pointer(info)]);
        read_value(o, info);
        o.observe_pending();

        let result = vk.begin_command_buffer(command_buffer, info);
        o.resume();
        o.encode_return(result_value(&result));

        if result.is_ok() {
            match self.command_buffers.get_mut(command_buffer) {
                Some(c) => {
                    // Beginning implicitly resets.
                    c.reset();
                    c.state = RecordingState::Recording;
                    c.usage = info.flags;
                },
                None => warn!("Unknown command buffer {:#x} begun", command_buffer.as_raw()),
            }
        }
        result
    }

    pub fn end_command_buffer(&mut self, o: &mut CallObserver, vk: &dyn VkDriver, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        o.command(vec![handle(command_buffer)]);
        let result = vk.end_command_buffer(command_buffer);
        o.resume();
        o.encode_return(result_value(&result));

        if let Some(c) = self.command_buffers.get_mut(command_buffer) {
            c.state = if result.is_ok() { RecordingState::Executable } else { RecordingState::Invalid };
        }
        result
    }

    pub fn reset_command_buffer(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferResetFlags,
    ) -> VkResult<()> {
        o.command(vec![handle(command_buffer), Value::U32(flags.as_raw())]);
        let result = vk.reset_command_buffer(command_buffer, flags);
        o.resume();
        o.encode_return(result_value(&result));

        if result.is_ok() {
            if let Some(c) = self.command_buffers.get_mut(command_buffer) {
                c.reset();
            }
        }
        result
    }

    /// Forwards a `vkCmd*` call and appends it to the command buffer's
    /// recording. `reads` are the application arrays the call takes.
    fn record(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        command: RecordedCommand,
        reads: &[(Address, u64)],
    ) -> Option<CommandReference> {
        o.command(command.args(command_buffer));
        for (base, size) in reads {
            // The arrays are borrowed for the duration of this call.
            unsafe { o.read(*base, *size) };
        }
        o.observe_pending();

        command.issue(vk, command_buffer);
        o.resume();

        let kind = command.kind();
        let objects = command.objects()
            .into_iter()
            .map(|object| RecordedObject { object, generation: self.generation(object) })
            .collect();
        let Some(recording) = self.command_buffers.get_mut(command_buffer) else {
            warn!("{} recorded into unknown command buffer {:#x}", kind.name(), command_buffer.as_raw());
            return None;
        };
        if recording.state != RecordingState::Recording {
            warn!(
                "{} recorded into command buffer {:#x} in state {:?}",
                kind.name(), command_buffer.as_raw(), recording.state
            );
        }

        recording.commands.push(Recorded { command, objects });
        Some(CommandReference {
            command_buffer,
            index: recording.commands.len() as u32 - 1,
            kind,
        })
    }

    /// The recorded command `reference` names, if its command buffer still
    /// holds it.
    pub fn command(&self, reference: &CommandReference) -> Option<&RecordedCommand> {
        self.recorded(reference).map(|r| &r.command)
    }

    pub fn recorded(&self, reference: &CommandReference) -> Option<&Recorded> {
        self.command_buffers
            .get(reference.command_buffer)?
            .commands
            .get(reference.index as usize)
            .filter(|r| r.command.kind() == reference.kind)
    }

    /// The generation of the shadow object currently tracked for `object`.
    fn generation(&self, object: ObjectRef) -> Option<u64> {
        match object {
            ObjectRef::Buffer(h) => self.buffers.reference(h).map(|r| r.generation()),
            ObjectRef::Image(h) => self.images.reference(h).map(|r| r.generation()),
            ObjectRef::Pipeline(h) => self.pipelines.reference(h).map(|r| r.generation()),
            ObjectRef::DescriptorSet(h) => self.descriptor_sets.reference(h).map(|r| r.generation()),
            ObjectRef::PipelineLayout(h) => self.pipeline_layouts.reference(h).map(|r| r.generation()),
            ObjectRef::RenderPass(h) => self.render_passes.reference(h).map(|r| r.generation()),
            ObjectRef::Framebuffer(h) => self.framebuffers.reference(h).map(|r| r.generation()),
            ObjectRef::CommandBuffer(h) => self.command_buffers.reference(h).map(|r| r.generation()),
        }
    }

    /// # Safety
    /// The clear values in `info` must be valid for their count.
    pub unsafe fn cmd_begin_render_pass(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo,
        contents: vk::SubpassContents,
    ) -> Option<CommandReference> {
        let clear_values = array(info.p_clear_values, info.clear_value_count);
        let command = RecordedCommand::BeginRenderPass {
            render_pass: info.render_pass,
            framebuffer: info.framebuffer,
            render_area: info.render_area,
            clear_values: clear_values.iter().map(|v| v.color.uint32).collect(),
            contents,
        };
        self.record(o, vk, command_buffer, command, &[span(std::slice::from_ref(info)), span(clear_values)])
    }

    pub fn cmd_end_render_pass(&mut self, o: &mut CallObserver, vk: &dyn VkDriver, command_buffer: vk::CommandBuffer) -> Option<CommandReference> {
        self.record(o, vk, command_buffer, RecordedCommand::EndRenderPass, &[])
    }

    pub fn cmd_bind_pipeline(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) -> Option<CommandReference> {
        self.record(o, vk, command_buffer, RecordedCommand::BindPipeline { bind_point, pipeline }, &[])
    }

    #[allow(clippy::too_many_arguments)]
    pub fn cmd_bind_descriptor_sets(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) -> Option<CommandReference> {
        let command = RecordedCommand::BindDescriptorSets {
            bind_point,
            layout,
            first_set,
            sets: sets.to_vec(),
            dynamic_offsets: dynamic_offsets.to_vec(),
        };
        self.record(o, vk, command_buffer, command, &[span(sets), span(dynamic_offsets)])
    }

    pub fn cmd_bind_vertex_buffers(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[u64],
    ) -> Option<CommandReference> {
        let command = RecordedCommand::BindVertexBuffers {
            first_binding,
            buffers: buffers.to_vec(),
            offsets: offsets.to_vec(),
        };
        self.record(o, vk, command_buffer, command, &[span(buffers), span(offsets)])
    }

    pub fn cmd_bind_index_buffer(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: u64,
        index_type: vk::IndexType,
    ) -> Option<CommandReference> {
        self.record(o, vk, command_buffer, RecordedCommand::BindIndexBuffer { buffer, offset, index_type }, &[])
    }

    pub fn cmd_set_viewport(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        first: u32,
        viewports: &[vk::Viewport],
    ) -> Option<CommandReference> {
        let command = RecordedCommand::SetViewport { first, viewports: viewports.to_vec() };
        self.record(o, vk, command_buffer, command, &[span(viewports)])
    }

    pub fn cmd_set_scissor(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        first: u32,
        scissors: &[vk::Rect2D],
    ) -> Option<CommandReference> {
        let command = RecordedCommand::SetScissor { first, scissors: scissors.to_vec() };
        self.record(o, vk, command_buffer, command, &[span(scissors)])
    }

    pub fn cmd_push_constants(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) -> Option<CommandReference> {
        let command = RecordedCommand::PushConstants { layout, stages, offset, data: data.to_vec() };
        self.record(o, vk, command_buffer, command, &[span(data)])
    }

    pub fn cmd_draw(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Option<CommandReference> {
        let command = RecordedCommand::Draw { vertex_count, instance_count, first_vertex, first_instance };
        self.record(o, vk, command_buffer, command, &[])
    }

    #[allow(clippy::too_many_arguments)]
    pub fn cmd_draw_indexed(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Option<CommandReference> {
        let command = RecordedCommand::DrawIndexed { index_count, instance_count, first_index, vertex_offset, first_instance };
        self.record(o, vk, command_buffer, command, &[])
    }

    pub fn cmd_dispatch(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        x: u32,
        y: u32,
        z: u32,
    ) -> Option<CommandReference> {
        self.record(o, vk, command_buffer, RecordedCommand::Dispatch { x, y, z }, &[])
    }

    pub fn cmd_copy_buffer(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) -> Option<CommandReference> {
        let command = RecordedCommand::CopyBuffer { src, dst, regions: regions.to_vec() };
        self.record(o, vk, command_buffer, command, &[span(regions)])
    }

    pub fn cmd_copy_buffer_to_image(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) -> Option<CommandReference> {
        let command = RecordedCommand::CopyBufferToImage { src, dst, layout, regions: regions.to_vec() };
        self.record(o, vk, command_buffer, command, &[span(regions)])
    }

    pub fn cmd_copy_image_to_buffer(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) -> Option<CommandReference> {
        let command = RecordedCommand::CopyImageToBuffer { src, layout, dst, regions: regions.to_vec() };
        self.record(o, vk, command_buffer, command, &[span(regions)])
    }

    pub fn cmd_update_buffer(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: u64,
        data: &[u8],
    ) -> Option<CommandReference> {
        let command = RecordedCommand::UpdateBuffer { buffer, offset, data: data.to_vec() };
        self.record(o, vk, command_buffer, command, &[span(data)])
    }

    pub fn cmd_fill_buffer(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: u64,
        size: u64,
        data: u32,
    ) -> Option<CommandReference> {
        self.record(o, vk, command_buffer, RecordedCommand::FillBuffer { buffer, offset, size, data }, &[])
    }

    pub fn cmd_clear_color_image(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    ) -> Option<CommandReference> {
        let command = RecordedCommand::ClearColorImage {
            image,
            layout,
            color: unsafe { color.uint32 },
            ranges: ranges.to_vec(),
        };
        self.record(o, vk, command_buffer, command, &[span(std::slice::from_ref(color)), span(ranges)])
    }

    #[allow(clippy::too_many_arguments)]
    pub fn cmd_pipeline_barrier(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        dependency: vk::DependencyFlags,
        memory: &[vk::MemoryBarrier],
        buffers: &[vk::BufferMemoryBarrier],
        images: &[vk::ImageMemoryBarrier],
    ) -> Option<CommandReference> {
        let command = RecordedCommand::PipelineBarrier {
            src_stage,
            dst_stage,
            dependency,
            memory: memory.iter().map(|m| (m.src_access_mask, m.dst_access_mask)).collect(),
            buffers: buffers.iter().map(BufferBarrier::from).collect(),
            images: images.iter().map(ImageTransition::from).collect(),
        };
        self.record(o, vk, command_buffer, command, &[span(memory), span(buffers), span(images)])
    }

    pub fn cmd_execute_commands(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        command_buffer: vk::CommandBuffer,
        secondaries: &[vk::CommandBuffer],
    ) -> Option<CommandReference> {
        let command = RecordedCommand::ExecuteCommands { command_buffers: secondaries.to_vec() };
        self.record(o, vk, command_buffer, command, &[span(secondaries)])
    }

    /// # Safety
    /// Every pointer inside `submits` must be valid for its count.
    pub unsafe fn queue_submit(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> VkResult<()> {
        o.command(vec![handle(queue), Value::U32(submits.len() as u32), handle(fence)]);
        read_values(o, submits);
        for submit in submits {
            read_array(o, submit.p_command_buffers, submit.command_buffer_count);
        }
        o.observe_pending();
        if o.track_coherent_memory() {
            self.observe_coherent_mappings(o);
        }

        let result = vk.queue_submit(queue, submits, fence);
        o.resume();
        o.encode_return(result_value(&result));

        if result.is_ok() {
            for submit in submits {
                for command_buffer in array(submit.p_command_buffers, submit.command_buffer_count) {
                    self.apply_submitted(*command_buffer, 0);
                    self.retire(*command_buffer);
                }
            }
        }
        result
    }

    pub fn queue_wait_idle(&mut self, o: &mut CallObserver, vk: &dyn VkDriver, queue: vk::Queue) -> VkResult<()> {
        o.command(vec![handle(queue)]);
        let result = vk.queue_wait_idle(queue);
        o.resume();
        o.encode_return(result_value(&result));
        result
    }

    pub fn device_wait_idle(&mut self, o: &mut CallObserver, vk: &dyn VkDriver, device: vk::Device) -> VkResult<()> {
        o.command(vec![handle(device)]);
        let result = vk.device_wait_idle(device);
        o.resume();
        o.encode_return(result_value(&result));
        result
    }

    /// One-time-submit command buffers become invalid once submitted.
    fn retire(&mut self, command_buffer: vk::CommandBuffer) {
        if let Some(c) = self.command_buffers.get_mut(command_buffer) {
            if c.usage.contains(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT) {
                c.state = RecordingState::Invalid;
            }
        }
    }

    /// Applies the image layout changes a submitted command buffer makes.
    fn apply_submitted(&mut self, command_buffer: vk::CommandBuffer, depth: u32) {
        let Some(commands) = self.command_buffers
            .get(command_buffer)
            .map(|c| c.commands.iter().map(|r| r.command.clone()).collect::<Vec<_>>())
        else {
            warn!("Unknown command buffer {:#x} submitted", command_buffer.as_raw());
            return;
        };

        let mut render_pass = None;
        for command in &commands {
            match command {
                RecordedCommand::PipelineBarrier { images, .. } => {
                    for transition in images {
                        if let Some(image) = self.images.get_mut(transition.image) {
                            image.set_layout(&transition.range, transition.new_layout);
                        }
                    }
                },
                RecordedCommand::BeginRenderPass { render_pass: pass, framebuffer, .. } => {
                    render_pass = Some((*pass, *framebuffer));
                },
                RecordedCommand::EndRenderPass => {
                    if let Some((pass, framebuffer)) = render_pass.take() {
                        self.apply_final_layouts(pass, framebuffer);
                    }
                },
                // Secondaries cannot execute further command buffers.
                RecordedCommand::ExecuteCommands { command_buffers } if depth == 0 => {
                    for secondary in command_buffers {
                        self.apply_submitted(*secondary, depth + 1);
                    }
                },
                _ => {},
            }
        }
    }

    fn apply_final_layouts(&mut self, render_pass: vk::RenderPass, framebuffer: vk::Framebuffer) {
        let (Some(pass), Some(framebuffer)) = (self.render_passes.get(render_pass), self.framebuffers.get(framebuffer)) else {
            return;
        };

        let transitions: Vec<_> = pass.attachments.iter()
            .zip(&framebuffer.attachments)
            .filter_map(|(attachment, view)| {
                let view = self.image_views.resolve(view)?;
                Some((view.image, view.range, attachment.final_layout))
            })
            .collect();

        for (image, range, layout) in transitions {
            match self.images.resolve_mut(&image) {
                Some(shadow) => shadow.set_layout(&range, layout),
                None => debug!("Attachment image {:?} no longer exists", image),
            }
        }
    }

    /// Checks that every object `recorded` refers to is still the object it
    /// saw when it was recorded. A handle the driver has since reused for a
    /// new object counts as destroyed.
    pub fn check_command(&self, recorded: &Recorded) -> Result<(), ReplayError> {
        let kind = recorded.command.kind();
        for RecordedObject { object, generation } in &recorded.objects {
            let live = generation.is_some() && self.generation(*object) == *generation;
            if !live {
                return Err(ReplayError::Stale { kind, object: object.type_name(), handle: object.raw() });
            }

            if let ObjectRef::CommandBuffer(h) = object {
                if self.command_buffers.get(*h).map(|c| c.state) != Some(RecordingState::Executable) {
                    return Err(ReplayError::NotExecutable(h.as_raw()));
                }
            }
        }
        Ok(())
    }

    /// Hands every still-valid command of `command_buffer` to `sink`, in
    /// recording order. Commands referring to destroyed objects are skipped
    /// and logged; the rest of the command buffer is still replayed. A
    /// skipped `vkCmdBeginRenderPass` takes everything up to its
    /// `vkCmdEndRenderPass` with it.
    pub fn replay(
        &self,
        command_buffer: vk::CommandBuffer,
        mut sink: impl FnMut(&RecordedCommand),
    ) -> Result<ReplayReport, ReplayError> {
        let recording = self.command_buffers
            .get(command_buffer)
            .ok_or(ReplayError::UnknownCommandBuffer(command_buffer.as_raw()))?;

        let mut report = ReplayReport::default();
        let mut in_skipped_pass = false;
        for (index, recorded) in recording.commands.iter().enumerate() {
            let kind = recorded.command.kind();
            if in_skipped_pass {
                report.skipped += 1;
                in_skipped_pass = kind != CommandKind::EndRenderPass;
                continue;
            }

            match self.check_command(recorded) {
                Ok(()) => {
                    sink(&recorded.command);
                    report.replayed += 1;
                },
                Err(e) => {
                    warn!("Skipping command {} of {:#x}: {}", index, command_buffer.as_raw(), e);
                    report.skipped += 1;
                    in_skipped_pass = kind == CommandKind::BeginRenderPass;
                },
            }
        }
        Ok(report)
    }

    /// Re-records the valid commands of `source` into `target`.
    pub fn reissue(
        &self,
        vk: &dyn VkDriver,
        source: vk::CommandBuffer,
        target: vk::CommandBuffer,
    ) -> Result<ReplayReport, ReplayError> {
        self.replay(source, |command| command.issue(vk, target))
    }
}
