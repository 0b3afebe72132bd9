use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use log::{debug, warn};
use spyglass_core::{flip_rows, framebuffer_observation};
use spyglass_encoder::{Message, Value};
use spyglass_observer::CallObserver;

use crate::formats;
use crate::spy::{array, encode_created, handle, pointer, read_array, read_value, result_value};
use crate::staging::Staging;
use crate::{Image, MecError, Swapchain, VkDriver, VulkanSpy};

impl VulkanSpy {
    pub fn create_swapchain(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        info: &vk::SwapchainCreateInfoKHR,
    ) -> VkResult<vk::SwapchainKHR> {
        o.command(vec![handle(device), pointer(info)]);
        read_value(o, info);
        o.observe_pending();

        let result = vk.create_swapchain(device, info);
        o.resume();
        encode_created(o, &result);

        if let Ok(swapchain) = result {
            self.swapchains.insert(swapchain, Swapchain {
                handle: swapchain,
                device,
                images: Vec::new(),
                format: info.image_format,
                extent: info.image_extent,
                array_layers: info.image_array_layers.max(1),
                usage: info.image_usage,
                pre_transform: info.pre_transform,
            });
        }
        result
    }

    pub fn destroy_swapchain(&mut self, o: &mut CallObserver, vk: &dyn VkDriver, device: vk::Device, swapchain: vk::SwapchainKHR) {
        o.command(vec![handle(device), handle(swapchain)]);
        vk.destroy_swapchain(device, swapchain);
        o.resume();

        // Presentable images go with their swapchain.
        self.images.remove_where(|i| i.swapchain == Some(swapchain));
        self.swapchains.remove(swapchain);
    }

    pub fn get_swapchain_images(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        device: vk::Device,
        swapchain: vk::SwapchainKHR,
    ) -> VkResult<Vec<vk::Image>> {
        o.command(vec![handle(device), handle(swapchain)]);
        let result = vk.get_swapchain_images(device, swapchain);
        o.resume();
        o.encode_return(match &result {
            Ok(images) => Value::Array(vec![
                result_value(&result),
                Value::Array(images.iter().map(|i| handle(*i)).collect()),
            ]),
            Err(_) => result_value(&result),
        });

        let Ok(images) = &result else {
            return result;
        };
        let Some(chain) = self.swapchains.get_mut(swapchain) else {
            warn!("Images of unknown swapchain {:#x}", swapchain.as_raw());
            return result;
        };

        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(chain.format)
            .extent(vk::Extent3D { width: chain.extent.width, height: chain.extent.height, depth: 1 })
            .mip_levels(1)
            .array_layers(chain.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(chain.usage)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .build();
        chain.images = images.clone();

        for image in images {
            if self.images.contains(*image) {
                continue;
            }
            let mut shadow = Image::new(*image, device, &info);
            shadow.swapchain = Some(swapchain);
            self.images.insert(*image, shadow);
        }
        result
    }

    /// Frame delimiter. The presented image is observed before the present
    /// hands it to the compositor.
    ///
    /// # Safety
    /// Every pointer inside `info` must be valid for its count.
    pub unsafe fn queue_present(
        &mut self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        queue: vk::Queue,
        info: &vk::PresentInfoKHR,
    ) -> VkResult<bool> {
        o.command(vec![handle(queue), pointer(info)]);
        read_value(o, info);
        read_array(o, info.p_swapchains, info.swapchain_count);
        read_array(o, info.p_image_indices, info.swapchain_count);
        o.observe_pending();

        let swapchains = array(info.p_swapchains, info.swapchain_count);
        let indices = array(info.p_image_indices, info.swapchain_count);
        if o.should_observe_frame() {
            if let (Some(swapchain), Some(index)) = (swapchains.first(), indices.first()) {
                if let Err(e) = self.observe_presented(o, vk, queue, *swapchain, *index) {
                    warn!("Presented image not observed: {}", e);
                }
            }
        }

        let result = vk.queue_present(queue, info);
        o.resume();
        o.encode_return(match &result {
            Ok(suboptimal) => Value::Array(vec![result_value(&result), Value::Bool(*suboptimal)]),
            Err(_) => result_value(&result),
        });

        o.on_post_end_of_frame();
        o.on_pre_start_of_frame();
        result
    }

    /// Reads back swapchain image `index` and emits a downsampled RGBA copy.
    ///
    /// Swapchain images are stored top row first, as observations are.
    /// A surface pre-transform of horizontal mirror plus 180 degree rotation
    /// stores them bottom row first, so those rows are flipped.
    fn observe_presented(
        &self,
        o: &mut CallObserver,
        vk: &dyn VkDriver,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        index: u32,
    ) -> Result<(), MecError> {
        let chain = self.swapchains.get(swapchain).ok_or(MecError::Unsupported("unknown swapchain"))?;
        let image = chain.images.get(index as usize)
            .and_then(|i| self.images.get(*i))
            .ok_or(MecError::Unsupported("unknown swapchain image"))?;
        let queue = self.queues.get(queue).ok_or(MecError::NoQueue)?;
        let device = self.devices.get(chain.device).ok_or(MecError::NoQueue)?;

        let bgra = matches!(chain.format, vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB);
        let rgba = matches!(chain.format, vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB);
        if !bgra && !rgba {
            return Err(MecError::Unsupported("swapchain format"));
        }

        let staging = Staging::new(vk, device, queue, self.staging_chunk_size)?;
        let mut data = staging.read_image(image, vk::ImageAspectFlags::COLOR, 0, 0)?;
        drop(staging);

        if bgra {
            formats::bgra_to_rgba(&mut data);
        }
        let (width, height) = (chain.extent.width, chain.extent.height);
        if chain.pre_transform.contains(vk::SurfaceTransformFlagsKHR::HORIZONTAL_MIRROR_ROTATE_180) {
            flip_rows(&mut data, width as usize * 4, height as usize);
        }

        debug!("Observed swapchain {:#x} image {}", swapchain.as_raw(), index);
        o.encode(Message::FramebufferObservation(framebuffer_observation(&data, width, height)));
        Ok(())
    }
}
