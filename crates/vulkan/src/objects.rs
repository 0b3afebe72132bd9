use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use log::warn;
use spyglass_encoder::Value;
use spyglass_observer::CallObserver;

use crate::spy::{array, encode_created, encode_created_all, handle, pointer, read_array, read_value, read_values, result_value};
use crate::{Attachment, Descriptor, DescriptorSet, Framebuffer, Pipeline, PipelineLayout, RenderPass, VkDriver, VulkanSpy};

impl VulkanSpy {
    /// # Safety
    /// Every pointer inside `info` must be valid for its count.
    pub unsafe fn create_render_pass(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        info: &vk::RenderPassCreateInfo,
    ) -> VkResult<vk::RenderPass> {
        o.command(vec![handle(device), pointer(info)]);
        read_value(o, info);
        read_array(o, info.p_attachments, info.attachment_count);
        read_array(o, info.p_subpasses, info.subpass_count);
        read_array(o, info.p_dependencies, info.dependency_count);
        o.observe_pending();

        let result = vk.create_render_pass(device, info);
        o.resume();
        encode_created(o, &result);

        if let Ok(render_pass) = result {
            let attachments = array(info.p_attachments, info.attachment_count)
                .iter()
                .map(|a| Attachment {
                    format: a.format,
                    samples: a.samples,
                    initial_layout: a.initial_layout,
                    final_layout: a.final_layout,
                })
                .collect();
            self.render_passes.insert(render_pass, RenderPass { handle: render_pass, device, attachments });
        }
        result
    }

    pub fn destroy_render_pass(&mut self, o: &mut CallObserver, vk: &dyn VkDriver, device: vk::Device, render_pass: vk::RenderPass) {
        o.command(vec![handle(device), handle(render_pass)]);
        vk.destroy_render_pass(device, render_pass);
        o.resume();

        self.render_passes.remove(render_pass);
    }

    /// # Safety
    /// The attachment array inside `info` must be valid for its count.
    pub unsafe fn create_framebuffer(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        info: &vk::FramebufferCreateInfo,
    ) -> VkResult<vk::Framebuffer> {
        o.command(vec![handle(device), pointer(info)]);
        read_value(o, info);
        read_array(o, info.p_attachments, info.attachment_count);
        o.observe_pending();

        let result = vk.create_framebuffer(device, info);
        o.resume();
        encode_created(o, &result);

        if let Ok(framebuffer) = result {
            let attachments = array(info.p_attachments, info.attachment_count)
                .iter()
                .filter_map(|view| {
                    let reference = self.image_views.reference(*view);
                    if reference.is_none() {
                        warn!("Framebuffer {:#x} attaches unknown view {:#x}", framebuffer.as_raw(), view.as_raw());
                    }
                    reference
                })
                .collect();

            self.framebuffers.insert(framebuffer, Framebuffer {
                handle: framebuffer,
                device,
                render_pass: info.render_pass,
                attachments,
                width: info.width,
                height: info.height,
                layers: info.layers,
            });
        }
        result
    }

    pub fn destroy_framebuffer(&mut self, o: &mut CallObserver, vk: &dyn VkDriver, device: vk::Device, framebuffer: vk::Framebuffer) {
        o.command(vec![handle(device), handle(framebuffer)]);
        vk.destroy_framebuffer(device, framebuffer);
        o.resume();

        self.framebuffers.remove(framebuffer);
    }

    /// # Safety
    /// The set layout and push constant arrays inside `info` must be valid
    /// for their counts.
    pub unsafe fn create_pipeline_layout(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        info: &vk::PipelineLayoutCreateInfo,
    ) -> VkResult<vk::PipelineLayout> {
        o.command(vec![handle(device), pointer(info)]);
        read_value(o, info);
        read_array(o, info.p_set_layouts, info.set_layout_count);
        read_array(o, info.p_push_constant_ranges, info.push_constant_range_count);
        o.observe_pending();

        let result = vk.create_pipeline_layout(device, info);
        o.resume();
        encode_created(o, &result);

        if let Ok(layout) = result {
            self.pipeline_layouts.insert(layout, PipelineLayout {
                handle: layout,
                device,
                set_layouts: array(info.p_set_layouts, info.set_layout_count).to_vec(),
            });
        }
        result
    }

    pub fn destroy_pipeline_layout(&mut self, o: &mut CallObserver, vk: &dyn VkDriver, device: vk::Device, layout: vk::PipelineLayout) {
        o.command(vec![handle(device), handle(layout)]);
        vk.destroy_pipeline_layout(device, layout);
        o.resume();

        self.pipeline_layouts.remove(layout);
    }

    pub fn create_graphics_pipelines(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        cache: vk::PipelineCache,
        infos: &[vk::GraphicsPipelineCreateInfo],
    ) -> VkResult<Vec<vk::Pipeline>> {
        o.command(vec![handle(device), handle(cache), Value::U32(infos.len() as u32)]);
        read_values(o, infos);
        o.observe_pending();

        let result = vk.create_graphics_pipelines(device, cache, infos);
        o.resume();
        encode_created_all(o, &result);

        if let Ok(pipelines) = &result {
            for (pipeline, info) in pipelines.iter().zip(infos) {
                self.pipelines.insert(*pipeline, Pipeline {
                    handle: *pipeline,
                    device,
                    bind_point: vk::PipelineBindPoint::GRAPHICS,
                    layout: info.layout,
                    render_pass: info.render_pass,
                });
            }
        }
        result
    }

    pub fn create_compute_pipelines(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        cache: vk::PipelineCache,
        infos: &[vk::ComputePipelineCreateInfo],
    ) -> VkResult<Vec<vk::Pipeline>> {
        o.command(vec![handle(device), handle(cache), Value::U32(infos.len() as u32)]);
        read_values(o, infos);
        o.observe_pending();

        let result = vk.create_compute_pipelines(device, cache, infos);
        o.resume();
        encode_created_all(o, &result);

        if let Ok(pipelines) = &result {
            for (pipeline, info) in pipelines.iter().zip(infos) {
                self.pipelines.insert(*pipeline, Pipeline {
                    handle: *pipeline,
                    device,
                    bind_point: vk::PipelineBindPoint::COMPUTE,
                    layout: info.layout,
                    render_pass: vk::RenderPass::null(),
                });
            }
        }
        result
    }

    pub fn destroy_pipeline(&mut self, o: &mut CallObserver, vk: &dyn VkDriver, device: vk::Device, pipeline: vk::Pipeline) {
        o.command(vec![handle(device), handle(pipeline)]);
        vk.destroy_pipeline(device, pipeline);
        o.resume();

        self.pipelines.remove(pipeline);
    }

    /// # Safety
    /// The layout array inside `info` must be valid for its count.
    pub unsafe fn allocate_descriptor_sets(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        info: &vk::DescriptorSetAllocateInfo,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        o.command(vec![handle(device), pointer(info)]);
        read_value(o, info);
        read_array(o, info.p_set_layouts, info.descriptor_set_count);
        o.observe_pending();

        let result = vk.allocate_descriptor_sets(device, info);
        o.resume();
        encode_created_all(o, &result);

        if let Ok(sets) = &result {
            let layouts = array(info.p_set_layouts, info.descriptor_set_count);
            for (set, layout) in sets.iter().zip(layouts) {
                self.descriptor_sets.insert(*set, DescriptorSet {
                    handle: *set,
                    device,
                    pool: info.descriptor_pool,
                    layout: *layout,
                    descriptors: Default::default(),
                });
            }
        }
        result
    }

    pub fn free_descriptor_sets(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> VkResult<()> {
        o.command(vec![handle(device), handle(pool), Value::U32(sets.len() as u32)]);
        read_values(o, sets);
        o.observe_pending();

        let result = vk.free_descriptor_sets(device, pool, sets);
        o.resume();
        o.encode_return(result_value(&result));

        if result.is_ok() {
            for set in sets {
                self.descriptor_sets.remove(*set);
            }
        }
        result
    }

    /// # Safety
    /// The info arrays inside `writes` must be valid for their counts.
    pub unsafe fn update_descriptor_sets(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        writes: &[vk::WriteDescriptorSet],
    ) {
        o.command(vec![handle(device), Value::U32(writes.len() as u32)]);
        read_values(o, writes);
        for write in writes {
            read_array(o, write.p_image_info, write.descriptor_count);
            read_array(o, write.p_buffer_info, write.descriptor_count);
            read_array(o, write.p_texel_buffer_view, write.descriptor_count);
        }
        o.observe_pending();

        vk.update_descriptor_sets(device, writes);
        o.resume();

        for write in writes {
            self.apply_descriptor_write(write);
        }
    }

    unsafe fn apply_descriptor_write(&mut self, write: &vk::WriteDescriptorSet) {
        let Some(set) = self.descriptor_sets.get_mut(write.dst_set) else {
            warn!("Write to unknown descriptor set {:#x}", write.dst_set.as_raw());
            return;
        };

        let images = array(write.p_image_info, write.descriptor_count);
        let buffers = array(write.p_buffer_info, write.descriptor_count);
        let texel_buffers = array(write.p_texel_buffer_view, write.descriptor_count);

        for i in 0..write.descriptor_count as usize {
            let descriptor = match write.descriptor_type {
                vk::DescriptorType::SAMPLER
                | vk::DescriptorType::COMBINED_IMAGE_SAMPLER
                | vk::DescriptorType::SAMPLED_IMAGE
                | vk::DescriptorType::STORAGE_IMAGE
                | vk::DescriptorType::INPUT_ATTACHMENT => images.get(i).map(|info| Descriptor::Image {
                    sampler: info.sampler,
                    view: info.image_view,
                    layout: info.image_layout,
                }),
                vk::DescriptorType::UNIFORM_BUFFER
                | vk::DescriptorType::STORAGE_BUFFER
                | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
                | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => buffers.get(i).map(|info| Descriptor::Buffer {
                    buffer: info.buffer,
                    offset: info.offset,
                    range: info.range,
                }),
                vk::DescriptorType::UNIFORM_TEXEL_BUFFER | vk::DescriptorType::STORAGE_TEXEL_BUFFER => {
                    texel_buffers.get(i).map(|view| Descriptor::TexelBuffer(*view))
                },
                other => {
                    warn!("Descriptor type {:?} is not tracked", other);
                    return;
                },
            };

            if let Some(descriptor) = descriptor {
                let element = write.dst_array_element + i as u32;
                set.descriptors.insert((write.dst_binding, element), (write.descriptor_type, descriptor));
            }
        }
    }
}
