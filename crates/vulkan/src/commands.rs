//! Commands recorded into command buffers, kept so that they can be applied
//! to shadow state at submit time and re-emitted by a mid-execution capture.

use ash::vk::{self, Handle};
use spyglass_encoder::Value;

use crate::VkDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    BeginRenderPass,
    EndRenderPass,
    BindPipeline,
    BindDescriptorSets,
    BindVertexBuffers,
    BindIndexBuffer,
    SetViewport,
    SetScissor,
    PushConstants,
    Draw,
    DrawIndexed,
    Dispatch,
    CopyBuffer,
    CopyBufferToImage,
    CopyImageToBuffer,
    UpdateBuffer,
    FillBuffer,
    ClearColorImage,
    PipelineBarrier,
    ExecuteCommands,
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BeginRenderPass => "vkCmdBeginRenderPass",
            Self::EndRenderPass => "vkCmdEndRenderPass",
            Self::BindPipeline => "vkCmdBindPipeline",
            Self::BindDescriptorSets => "vkCmdBindDescriptorSets",
            Self::BindVertexBuffers => "vkCmdBindVertexBuffers",
            Self::BindIndexBuffer => "vkCmdBindIndexBuffer",
            Self::SetViewport => "vkCmdSetViewport",
            Self::SetScissor => "vkCmdSetScissor",
            Self::PushConstants => "vkCmdPushConstants",
            Self::Draw => "vkCmdDraw",
            Self::DrawIndexed => "vkCmdDrawIndexed",
            Self::Dispatch => "vkCmdDispatch",
            Self::CopyBuffer => "vkCmdCopyBuffer",
            Self::CopyBufferToImage => "vkCmdCopyBufferToImage",
            Self::CopyImageToBuffer => "vkCmdCopyImageToBuffer",
            Self::UpdateBuffer => "vkCmdUpdateBuffer",
            Self::FillBuffer => "vkCmdFillBuffer",
            Self::ClearColorImage => "vkCmdClearColorImage",
            Self::PipelineBarrier => "vkCmdPipelineBarrier",
            Self::ExecuteCommands => "vkCmdExecuteCommands",
        }
    }
}

/// Names one recorded command: its kind and its position in the command
/// buffer that recorded it. Valid until that command buffer is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandReference {
    pub command_buffer: vk::CommandBuffer,
    pub index: u32,
    pub kind: CommandKind,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageTransition {
    pub image: vk::Image,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_family: u32,
    pub dst_family: u32,
    pub range: vk::ImageSubresourceRange,
}

impl ImageTransition {
    fn to_vk(self) -> vk::ImageMemoryBarrier {
        vk::ImageMemoryBarrier::builder()
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_queue_family_index(self.src_family)
            .dst_queue_family_index(self.dst_family)
            .image(self.image)
            .subresource_range(self.range)
            .build()
    }
}

impl From<&vk::ImageMemoryBarrier> for ImageTransition {
    fn from(barrier: &vk::ImageMemoryBarrier) -> Self {
        Self {
            image: barrier.image,
            src_access: barrier.src_access_mask,
            dst_access: barrier.dst_access_mask,
            old_layout: barrier.old_layout,
            new_layout: barrier.new_layout,
            src_family: barrier.src_queue_family_index,
            dst_family: barrier.dst_queue_family_index,
            range: barrier.subresource_range,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BufferBarrier {
    pub buffer: vk::Buffer,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_family: u32,
    pub dst_family: u32,
    pub offset: u64,
    pub size: u64,
}

impl BufferBarrier {
    fn to_vk(self) -> vk::BufferMemoryBarrier {
        vk::BufferMemoryBarrier::builder()
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .src_queue_family_index(self.src_family)
            .dst_queue_family_index(self.dst_family)
            .buffer(self.buffer)
            .offset(self.offset)
            .size(self.size)
            .build()
    }
}

impl From<&vk::BufferMemoryBarrier> for BufferBarrier {
    fn from(barrier: &vk::BufferMemoryBarrier) -> Self {
        Self {
            buffer: barrier.buffer,
            src_access: barrier.src_access_mask,
            dst_access: barrier.dst_access_mask,
            src_family: barrier.src_queue_family_index,
            dst_family: barrier.dst_queue_family_index,
            offset: barrier.offset,
            size: barrier.size,
        }
    }
}

/// A recorded `vkCmd*` call with its arguments copied out of application
/// memory.
///
/// Clear values are kept as their raw 32-bit words.
#[derive(Debug, Clone)]
pub enum RecordedCommand {
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: Vec<[u32; 4]>,
        contents: vk::SubpassContents,
    },
    EndRenderPass,
    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindDescriptorSets {
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
        dynamic_offsets: Vec<u32>,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<vk::Buffer>,
        offsets: Vec<u64>,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        offset: u64,
        index_type: vk::IndexType,
    },
    SetViewport {
        first: u32,
        viewports: Vec<vk::Viewport>,
    },
    SetScissor {
        first: u32,
        scissors: Vec<vk::Rect2D>,
    },
    PushConstants {
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        regions: Vec<vk::BufferImageCopy>,
    },
    CopyImageToBuffer {
        src: vk::Image,
        layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: Vec<vk::BufferImageCopy>,
    },
    UpdateBuffer {
        buffer: vk::Buffer,
        offset: u64,
        data: Vec<u8>,
    },
    FillBuffer {
        buffer: vk::Buffer,
        offset: u64,
        size: u64,
        data: u32,
    },
    ClearColorImage {
        image: vk::Image,
        layout: vk::ImageLayout,
        color: [u32; 4],
        ranges: Vec<vk::ImageSubresourceRange>,
    },
    PipelineBarrier {
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        dependency: vk::DependencyFlags,
        memory: Vec<(vk::AccessFlags, vk::AccessFlags)>,
        buffers: Vec<BufferBarrier>,
        images: Vec<ImageTransition>,
    },
    ExecuteCommands {
        command_buffers: Vec<vk::CommandBuffer>,
    },
}

/// An object a recorded command refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRef {
    Buffer(vk::Buffer),
    Image(vk::Image),
    Pipeline(vk::Pipeline),
    DescriptorSet(vk::DescriptorSet),
    PipelineLayout(vk::PipelineLayout),
    RenderPass(vk::RenderPass),
    Framebuffer(vk::Framebuffer),
    CommandBuffer(vk::CommandBuffer),
}

impl ObjectRef {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Image(_) => "image",
            Self::Pipeline(_) => "pipeline",
            Self::DescriptorSet(_) => "descriptor set",
            Self::PipelineLayout(_) => "pipeline layout",
            Self::RenderPass(_) => "render pass",
            Self::Framebuffer(_) => "framebuffer",
            Self::CommandBuffer(_) => "command buffer",
        }
    }

    pub fn raw(&self) -> u64 {
        match *self {
            Self::Buffer(h) => h.as_raw(),
            Self::Image(h) => h.as_raw(),
            Self::Pipeline(h) => h.as_raw(),
            Self::DescriptorSet(h) => h.as_raw(),
            Self::PipelineLayout(h) => h.as_raw(),
            Self::RenderPass(h) => h.as_raw(),
            Self::Framebuffer(h) => h.as_raw(),
            Self::CommandBuffer(h) => h.as_raw(),
        }
    }
}

/// An object as a command saw it when it was recorded. `generation` is the
/// shadow generation of the object at the time, `None` if it was unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedObject {
    pub object: ObjectRef,
    pub generation: Option<u64>,
}

/// A command as kept in a command buffer's recording.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub command: RecordedCommand,
    pub objects: Vec<RecordedObject>,
}

fn handles<H: Handle + Copy>(handles: &[H]) -> Value {
    Value::Array(handles.iter().map(|h| Value::Handle(h.as_raw())).collect())
}

fn clear_value(raw: [u32; 4]) -> vk::ClearValue {
    vk::ClearValue { color: vk::ClearColorValue { uint32: raw } }
}

impl RecordedCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::BeginRenderPass { .. } => CommandKind::BeginRenderPass,
            Self::EndRenderPass => CommandKind::EndRenderPass,
            Self::BindPipeline { .. } => CommandKind::BindPipeline,
            Self::BindDescriptorSets { .. } => CommandKind::BindDescriptorSets,
            Self::BindVertexBuffers { .. } => CommandKind::BindVertexBuffers,
            Self::BindIndexBuffer { .. } => CommandKind::BindIndexBuffer,
            Self::SetViewport { .. } => CommandKind::SetViewport,
            Self::SetScissor { .. } => CommandKind::SetScissor,
            Self::PushConstants { .. } => CommandKind::PushConstants,
            Self::Draw { .. } => CommandKind::Draw,
            Self::DrawIndexed { .. } => CommandKind::DrawIndexed,
            Self::Dispatch { .. } => CommandKind::Dispatch,
            Self::CopyBuffer { .. } => CommandKind::CopyBuffer,
            Self::CopyBufferToImage { .. } => CommandKind::CopyBufferToImage,
            Self::CopyImageToBuffer { .. } => CommandKind::CopyImageToBuffer,
            Self::UpdateBuffer { .. } => CommandKind::UpdateBuffer,
            Self::FillBuffer { .. } => CommandKind::FillBuffer,
            Self::ClearColorImage { .. } => CommandKind::ClearColorImage,
            Self::PipelineBarrier { .. } => CommandKind::PipelineBarrier,
            Self::ExecuteCommands { .. } => CommandKind::ExecuteCommands,
        }
    }

    /// Every object the command refers to.
    pub fn objects(&self) -> Vec<ObjectRef> {
        match self {
            Self::BeginRenderPass { render_pass, framebuffer, .. } => {
                vec![ObjectRef::RenderPass(*render_pass), ObjectRef::Framebuffer(*framebuffer)]
            },
            Self::BindPipeline { pipeline, .. } => vec![ObjectRef::Pipeline(*pipeline)],
            Self::BindDescriptorSets { layout, sets, .. } => std::iter::once(ObjectRef::PipelineLayout(*layout))
                .chain(sets.iter().map(|s| ObjectRef::DescriptorSet(*s)))
                .collect(),
            Self::PushConstants { layout, .. } => vec![ObjectRef::PipelineLayout(*layout)],
            Self::BindVertexBuffers { buffers, .. } => buffers.iter().map(|b| ObjectRef::Buffer(*b)).collect(),
            Self::BindIndexBuffer { buffer, .. }
            | Self::UpdateBuffer { buffer, .. }
            | Self::FillBuffer { buffer, .. } => vec![ObjectRef::Buffer(*buffer)],
            Self::CopyBuffer { src, dst, .. } => vec![ObjectRef::Buffer(*src), ObjectRef::Buffer(*dst)],
            Self::CopyBufferToImage { src, dst, .. } => vec![ObjectRef::Buffer(*src), ObjectRef::Image(*dst)],
            Self::CopyImageToBuffer { src, dst, .. } => vec![ObjectRef::Image(*src), ObjectRef::Buffer(*dst)],
            Self::ClearColorImage { image, .. } => vec![ObjectRef::Image(*image)],
            Self::PipelineBarrier { buffers, images, .. } => buffers.iter()
                .map(|b| ObjectRef::Buffer(b.buffer))
                .chain(images.iter().map(|i| ObjectRef::Image(i.image)))
                .collect(),
            Self::ExecuteCommands { command_buffers } => {
                command_buffers.iter().map(|c| ObjectRef::CommandBuffer(*c)).collect()
            },
            Self::EndRenderPass
            | Self::SetViewport { .. }
            | Self::SetScissor { .. }
            | Self::Draw { .. }
            | Self::DrawIndexed { .. }
            | Self::Dispatch { .. } => Vec::new(),
        }
    }

    /// The command's arguments as trace values, starting with the command
    /// buffer.
    pub fn args(&self, command_buffer: vk::CommandBuffer) -> Vec<Value> {
        let mut args = vec![Value::Handle(command_buffer.as_raw())];
        match self {
            Self::BeginRenderPass { render_pass, framebuffer, render_area, clear_values, contents } => args.extend([
                Value::Handle(render_pass.as_raw()),
                Value::Handle(framebuffer.as_raw()),
                Value::Array(vec![
                    Value::I32(render_area.offset.x),
                    Value::I32(render_area.offset.y),
                    Value::U32(render_area.extent.width),
                    Value::U32(render_area.extent.height),
                ]),
                Value::Array(clear_values.iter()
                    .map(|v| Value::Array(v.iter().map(|w| Value::U32(*w)).collect()))
                    .collect()),
                Value::I32(contents.as_raw()),
            ]),
            Self::EndRenderPass => {},
            Self::BindPipeline { bind_point, pipeline } => {
                args.extend([Value::I32(bind_point.as_raw()), Value::Handle(pipeline.as_raw())]);
            },
            Self::BindDescriptorSets { bind_point, layout, first_set, sets, dynamic_offsets } => args.extend([
                Value::I32(bind_point.as_raw()),
                Value::Handle(layout.as_raw()),
                Value::U32(*first_set),
                handles(sets),
                Value::Array(dynamic_offsets.iter().map(|o| Value::U32(*o)).collect()),
            ]),
            Self::BindVertexBuffers { first_binding, buffers, offsets } => args.extend([
                Value::U32(*first_binding),
                handles(buffers),
                Value::Array(offsets.iter().map(|o| Value::U64(*o)).collect()),
            ]),
            Self::BindIndexBuffer { buffer, offset, index_type } => args.extend([
                Value::Handle(buffer.as_raw()),
                Value::U64(*offset),
                Value::I32(index_type.as_raw()),
            ]),
            Self::SetViewport { first, viewports } => args.extend([
                Value::U32(*first),
                Value::Array(viewports.iter()
                    .map(|v| Value::Array(
                        [v.x, v.y, v.width, v.height, v.min_depth, v.max_depth].into_iter().map(Value::F32).collect(),
                    ))
                    .collect()),
            ]),
            Self::SetScissor { first, scissors } => args.extend([
                Value::U32(*first),
                Value::Array(scissors.iter()
                    .map(|s| Value::Array(vec![
                        Value::I32(s.offset.x),
                        Value::I32(s.offset.y),
                        Value::U32(s.extent.width),
                        Value::U32(s.extent.height),
                    ]))
                    .collect()),
            ]),
            Self::PushConstants { layout, stages, offset, data } => args.extend([
                Value::Handle(layout.as_raw()),
                Value::U32(stages.as_raw()),
                Value::U32(*offset),
                Value::Bytes(data.clone()),
            ]),
            Self::Draw { vertex_count, instance_count, first_vertex, first_instance } => args.extend([
                Value::U32(*vertex_count),
                Value::U32(*instance_count),
                Value::U32(*first_vertex),
                Value::U32(*first_instance),
            ]),
            Self::DrawIndexed { index_count, instance_count, first_index, vertex_offset, first_instance } => args.extend([
                Value::U32(*index_count),
                Value::U32(*instance_count),
                Value::U32(*first_index),
                Value::I32(*vertex_offset),
                Value::U32(*first_instance),
            ]),
            Self::Dispatch { x, y, z } => args.extend([Value::U32(*x), Value::U32(*y), Value::U32(*z)]),
            Self::CopyBuffer { src, dst, regions } => args.extend([
                Value::Handle(src.as_raw()),
                Value::Handle(dst.as_raw()),
                Value::Array(regions.iter()
                    .map(|r| Value::Array(vec![Value::U64(r.src_offset), Value::U64(r.dst_offset), Value::U64(r.size)]))
                    .collect()),
            ]),
            Self::CopyBufferToImage { src, dst, layout, regions } => args.extend([
                Value::Handle(src.as_raw()),
                Value::Handle(dst.as_raw()),
                Value::I32(layout.as_raw()),
                image_copies(regions),
            ]),
            Self::CopyImageToBuffer { src, layout, dst, regions } => args.extend([
                Value::Handle(src.as_raw()),
                Value::I32(layout.as_raw()),
                Value::Handle(dst.as_raw()),
                image_copies(regions),
            ]),
            Self::UpdateBuffer { buffer, offset, data } => args.extend([
                Value::Handle(buffer.as_raw()),
                Value::U64(*offset),
                Value::Bytes(data.clone()),
            ]),
            Self::FillBuffer { buffer, offset, size, data } => args.extend([
                Value::Handle(buffer.as_raw()),
                Value::U64(*offset),
                Value::U64(*size),
                Value::U32(*data),
            ]),
            Self::ClearColorImage { image, layout, color, ranges } => args.extend([
                Value::Handle(image.as_raw()),
                Value::I32(layout.as_raw()),
                Value::Array(color.iter().map(|w| Value::U32(*w)).collect()),
                Value::Array(ranges.iter().map(range_value).collect()),
            ]),
            Self::PipelineBarrier { src_stage, dst_stage, dependency, memory, buffers, images } => args.extend([
                Value::U32(src_stage.as_raw()),
                Value::U32(dst_stage.as_raw()),
                Value::U32(dependency.as_raw()),
                Value::U32(memory.len() as u32),
                Value::Array(buffers.iter()
                    .map(|b| Value::Array(vec![Value::Handle(b.buffer.as_raw()), Value::U64(b.offset), Value::U64(b.size)]))
                    .collect()),
                Value::Array(images.iter()
                    .map(|i| Value::Array(vec![
                        Value::Handle(i.image.as_raw()),
                        Value::I32(i.old_layout.as_raw()),
                        Value::I32(i.new_layout.as_raw()),
                        range_value(&i.range),
                    ]))
                    .collect()),
            ]),
            Self::ExecuteCommands { command_buffers } => args.push(handles(command_buffers)),
        }
        args
    }

    /// Records the command into `command_buffer` through the driver.
    pub fn issue(&self, vk: &dyn VkDriver, command_buffer: vk::CommandBuffer) {
        match self {
            Self::BeginRenderPass { render_pass, framebuffer, render_area, clear_values, contents } => {
                let clear_values: Vec<vk::ClearValue> = clear_values.iter().map(|v| clear_value(*v)).collect();
                let info = vk::RenderPassBeginInfo::builder()
                    .render_pass(*render_pass)
                    .framebuffer(*framebuffer)
                    .render_area(*render_area)
                    .clear_values(&clear_values);
                vk.cmd_begin_render_pass(command_buffer, &info, *contents);
            },
            Self::EndRenderPass => vk.cmd_end_render_pass(command_buffer),
            Self::BindPipeline { bind_point, pipeline } => vk.cmd_bind_pipeline(command_buffer, *bind_point, *pipeline),
            Self::BindDescriptorSets { bind_point, layout, first_set, sets, dynamic_offsets } => {
                vk.cmd_bind_descriptor_sets(command_buffer, *bind_point, *layout, *first_set, sets, dynamic_offsets);
            },
            Self::BindVertexBuffers { first_binding, buffers, offsets } => {
                vk.cmd_bind_vertex_buffers(command_buffer, *first_binding, buffers, offsets);
            },
            Self::BindIndexBuffer { buffer, offset, index_type } => {
                vk.cmd_bind_index_buffer(command_buffer, *buffer, *offset, *index_type);
            },
            Self::SetViewport { first, viewports } => vk.cmd_set_viewport(command_buffer, *first, viewports),
            Self::SetScissor { first, scissors } => vk.cmd_set_scissor(command_buffer, *first, scissors),
            Self::PushConstants { layout, stages, offset, data } => {
                vk.cmd_push_constants(command_buffer, *layout, *stages, *offset, data);
            },
            Self::Draw { vertex_count, instance_count, first_vertex, first_instance } => {
                vk.cmd_draw(command_buffer, *vertex_count, *instance_count, *first_vertex, *first_instance);
            },
            Self::DrawIndexed { index_count, instance_count, first_index, vertex_offset, first_instance } => {
                vk.cmd_draw_indexed(command_buffer, *index_count, *instance_count, *first_index, *vertex_offset, *first_instance);
            },
            Self::Dispatch { x, y, z } => vk.cmd_dispatch(command_buffer, *x, *y, *z),
            Self::CopyBuffer { src, dst, regions } => vk.cmd_copy_buffer(command_buffer, *src, *dst, regions),
            Self::CopyBufferToImage { src, dst, layout, regions } => {
                vk.cmd_copy_buffer_to_image(command_buffer, *src, *dst, *layout, regions);
            },
            Self::CopyImageToBuffer { src, layout, dst, regions } => {
                vk.cmd_copy_image_to_buffer(command_buffer, *src, *layout, *dst, regions);
            },
            Self::UpdateBuffer { buffer, offset, data } => vk.cmd_update_buffer(command_buffer, *buffer, *offset, data),
            Self::FillBuffer { buffer, offset, size, data } => {
                vk.cmd_fill_buffer(command_buffer, *buffer, *offset, *size, *data);
            },
            Self::ClearColorImage { image, layout, color, ranges } => {
                let color = vk::ClearColorValue { uint32: *color };
                vk.cmd_clear_color_image(command_buffer, *image, *layout, &color, ranges);
            },
            Self::PipelineBarrier { src_stage, dst_stage, dependency, memory, buffers, images } => {
                let memory: Vec<vk::MemoryBarrier> = memory.iter()
                    .map(|(src, dst)| vk::MemoryBarrier::builder().src_access_mask(*src).dst_access_mask(*dst).build())
                    .collect();
                let buffers: Vec<vk::BufferMemoryBarrier> = buffers.iter().map(|b| b.to_vk()).collect();
                let images: Vec<vk::ImageMemoryBarrier> = images.iter().map(|i| i.to_vk()).collect();
                vk.cmd_pipeline_barrier(command_buffer, *src_stage, *dst_stage, *dependency, &memory, &buffers, &images);
            },
            Self::ExecuteCommands { command_buffers } => vk.cmd_execute_commands(command_buffer, command_buffers),
        }
    }
}

fn range_value(range: &vk::ImageSubresourceRange) -> Value {
    Value::Array(vec![
        Value::U32(range.aspect_mask.as_raw()),
        Value::U32(range.base_mip_level),
        Value::U32(range.level_count),
        Value::U32(range.base_array_layer),
        Value::U32(range.layer_count),
    ])
}

fn image_copies(regions: &[vk::BufferImageCopy]) -> Value {
    Value::Array(regions.iter()
        .map(|r| Value::Array(vec![
            Value::U64(r.buffer_offset),
            Value::U32(r.buffer_row_length),
            Value::U32(r.buffer_image_height),
            Value::U32(r.image_subresource.aspect_mask.as_raw()),
            Value::U32(r.image_subresource.mip_level),
            Value::U32(r.image_subresource.base_array_layer),
            Value::U32(r.image_subresource.layer_count),
            Value::I32(r.image_offset.x),
            Value::I32(r.image_offset.y),
            Value::I32(r.image_offset.z),
            Value::U32(r.image_extent.width),
            Value::U32(r.image_extent.height),
            Value::U32(r.image_extent.depth),
        ]))
        .collect())
}

#[cfg(test)]
mod tests {
    use ash::vk::{self, Handle};
    use spyglass_encoder::Value;

    use crate::{CommandKind, ObjectRef, RecordedCommand};

    #[test]
    fn copies_refer_to_both_buffers() {
        let command = RecordedCommand::CopyBuffer {
            src: vk::Buffer::from_raw(1),
            dst: vk::Buffer::from_raw(2),
            regions: vec![vk::BufferCopy { src_offset: 0, dst_offset: 4, size: 8 }],
        };

        assert_eq!(command.kind(), CommandKind::CopyBuffer);
        assert_eq!(command.kind().name(), "vkCmdCopyBuffer");
        assert_eq!(command.objects(), vec![
            ObjectRef::Buffer(vk::Buffer::from_raw(1)),
            ObjectRef::Buffer(vk::Buffer::from_raw(2)),
        ]);
    }

    #[test]
    fn descriptor_binds_refer_to_their_layout() {
        let command = RecordedCommand::BindDescriptorSets {
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            layout: vk::PipelineLayout::from_raw(5),
            first_set: 0,
            sets: vec![vk::DescriptorSet::from_raw(6)],
            dynamic_offsets: Vec::new(),
        };
        let push = RecordedCommand::PushConstants {
            layout: vk::PipelineLayout::from_raw(5),
            stages: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            data: vec![0; 4],
        };

        assert_eq!(command.objects(), vec![
            ObjectRef::PipelineLayout(vk::PipelineLayout::from_raw(5)),
            ObjectRef::DescriptorSet(vk::DescriptorSet::from_raw(6)),
        ]);
        assert_eq!(push.objects(), vec![ObjectRef::PipelineLayout(vk::PipelineLayout::from_raw(5))]);
        assert_eq!(push.objects()[0].type_name(), "pipeline layout");
    }

    #[test]
    fn arguments_start_with_the_command_buffer() {
        let command = RecordedCommand::Draw { vertex_count: 3, instance_count: 1, first_vertex: 0, first_instance: 0 };
        let args = command.args(vk::CommandBuffer::from_raw(0x40));

        assert_eq!(args[0], Value::Handle(0x40));
        assert_eq!(args[1..], [Value::U32(3), Value::U32(1), Value::U32(0), Value::U32(0)]);
        assert!(command.objects().is_empty());
    }
}
