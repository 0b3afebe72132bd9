use std::sync::Arc;
use std::collections::HashMap;

use log::{debug, trace, warn};
use spyglass_core::{flip_rows, framebuffer_observation};
use spyglass_encoder::{Message, Value};
use spyglass_memory::Slice;
use spyglass_observer::CallObserver;

use crate::gl::*;
use crate::state::{Attachment, Context, EglImageInfo, ShareGroup, ShareGroupId};
use crate::GlDriver;

/// Shadow state of every EGL context and GL object the application owns.
///
/// Handlers update it whether or not the call is traced, so a capture that
/// starts late still knows every live object.
#[derive(Debug, Default)]
pub struct GlesSpy {
    pub(crate) contexts: HashMap<EglContext, Context>,
    pub(crate) share_groups: HashMap<ShareGroupId, ShareGroup>,
    next_share_group: ShareGroupId,
    // Context current on each thread.
    pub(crate) current: HashMap<u64, EglContext>,
    pub(crate) images: HashMap<EglImage, Arc<EglImageInfo>>,
}

impl GlesSpy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(&self, handle: EglContext) -> Option<&Context> {
        self.contexts.get(&handle)
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    pub fn share_group(&self, id: ShareGroupId) -> Option<&ShareGroup> {
        self.share_groups.get(&id)
    }

    pub fn current_context(&self, thread: u64) -> Option<&Context> {
        self.current.get(&thread).and_then(|c| self.contexts.get(c))
    }

    pub(crate) fn current_context_mut(&mut self, thread: u64) -> Option<&mut Context> {
        let handle = *self.current.get(&thread)?;
        self.contexts.get_mut(&handle)
    }

    /// The calling thread's context together with its share group.
    pub(crate) fn current_mut(&mut self, thread: u64) -> Option<(&mut Context, &mut ShareGroup)> {
        let handle = *self.current.get(&thread)?;
        let context = self.contexts.get_mut(&handle)?;
        let group = self.share_groups.get_mut(&context.share_group)?;
        Some((context, group))
    }

    pub(crate) fn current_group(&self, thread: u64) -> Option<&ShareGroup> {
        let context = self.current_context(thread)?;
        self.share_groups.get(&context.share_group)
    }

    /// Consumes the driver error after a forwarded call when error state is
    /// recorded, and keeps it for the application's next `glGetError` on the
    /// same context.
    pub(crate) fn record_error(&mut self, o: &mut CallObserver, gl: &dyn GlDriver) {
        if !o.is_tracing() || !o.record_error_state() {
            return;
        }

        let error = gl.get_error();
        if error == GL_NO_ERROR {
            return;
        }

        trace!("{} raised GL error {:#x}", o.command_name(), error);
        o.encode(Message::Extra { name: "gl_error".to_string(), value: Value::U32(error) });

        if let Some(context) = self.current_context_mut(o.thread()) {
            // GL keeps the first error until it is read.
            if context.pending_error.is_none() {
                context.pending_error = Some(error);
            }
        }
    }

    pub fn get_error(&mut self, o: &mut CallObserver, gl: &dyn GlDriver) -> GLenum {
        o.command(Vec::new());

        let pending = self.current_context_mut(o.thread()).and_then(|c| c.pending_error.take());
        let error = match pending {
            Some(error) => error,
            None => gl.get_error(),
        };

        o.resume();
        o.encode_return(Value::U32(error));
        error
    }

    pub fn create_context(
        &mut self,
        o: &mut CallObserver,
        gl: &dyn GlDriver,
        display: EglDisplay,
        config: EglConfig,
        share: EglContext,
        attributes: Slice<EGLint>,
    ) -> EglContext {
        o.command(vec![
            Value::Handle(display),
            Value::Handle(config),
            Value::Handle(share),
            Value::Pointer(attributes.base().as_u64()),
        ]);
        o.read_slice(&attributes);
        o.observe_pending();

        let handle = gl.egl_create_context(display, config, share, unsafe { attributes.as_slice() });
        o.resume();
        o.encode_return(Value::Handle(handle));

        if handle != EGL_NO_CONTEXT {
            self.track_context(handle, display, config, share);
        }
        handle
    }

    pub(crate) fn track_context(&mut self, handle: EglContext, display: EglDisplay, config: EglConfig, share: EglContext) {
        let group = match self.contexts.get(&share) {
            Some(shared) if share != EGL_NO_CONTEXT => shared.share_group,
            _ => {
                if share != EGL_NO_CONTEXT {
                    warn!("Context {:#x} shares with unknown context {:#x}", handle, share);
                }
                self.next_share_group += 1;
                self.next_share_group
            },
        };

        self.share_groups.entry(group).or_default().contexts += 1;
        self.contexts.insert(handle, Context::new(handle, display, config, group));
        debug!("Context {:#x} created in share group {}", handle, group);
    }

    pub fn destroy_context(
        &mut self,
        o: &mut CallObserver,
        gl: &dyn GlDriver,
        display: EglDisplay,
        context: EglContext,
    ) -> bool {
        o.command(vec![Value::Handle(display), Value::Handle(context)]);
        let destroyed = gl.egl_destroy_context(display, context);
        o.resume();
        o.encode_return(Value::Bool(destroyed));

        if destroyed {
            self.untrack_context(context);
        }
        destroyed
    }

    pub(crate) fn untrack_context(&mut self, handle: EglContext) {
        let Some(context) = self.contexts.get_mut(&handle) else {
            return;
        };

        // EGL defers destruction until the context is no longer current.
        if context.current_on.is_some() {
            context.destroyed = true;
            return;
        }

        let group = context.share_group;
        self.contexts.remove(&handle);

        let empty = match self.share_groups.get_mut(&group) {
            Some(g) => {
                g.contexts -= 1;
                g.contexts == 0
            },
            None => false,
        };
        if empty {
            debug!("Share group {} released", group);
            self.share_groups.remove(&group);
        }
    }

    pub fn make_current(
        &mut self,
        o: &mut CallObserver,
        gl: &dyn GlDriver,
        display: EglDisplay,
        draw: EglSurface,
        read: EglSurface,
        context: EglContext,
    ) -> bool {
        o.command(vec![
            Value::Handle(display),
            Value::Handle(draw),
            Value::Handle(read),
            Value::Handle(context),
        ]);
        let made = gl.egl_make_current(display, draw, read, context);
        o.resume();
        o.encode_return(Value::Bool(made));

        if made {
            self.set_current(o.thread(), context, draw);
        }
        made
    }

    pub(crate) fn set_current(&mut self, thread: u64, handle: EglContext, draw: EglSurface) {
        if let Some(previous) = self.current.remove(&thread) {
            let release = match self.contexts.get_mut(&previous) {
                Some(c) => {
                    c.current_on = None;
                    c.destroyed
                },
                None => false,
            };
            if release {
                self.untrack_context(previous);
            }
        }

        if handle == EGL_NO_CONTEXT {
            return;
        }

        match self.contexts.get_mut(&handle) {
            Some(c) => {
                c.current_on = Some(thread);
                c.draw_surface = draw;
                self.current.insert(thread, handle);
            },
            None => warn!("Unknown context {:#x} made current", handle),
        }
    }

    /// Frame delimiter. The framebuffer is observed before the swap
    /// invalidates it.
    pub fn swap_buffers(
        &mut self,
        o: &mut CallObserver,
        gl: &dyn GlDriver,
        display: EglDisplay,
        surface: EglSurface,
    ) -> bool {
        o.command(vec![Value::Handle(display), Value::Handle(surface)]);
        if o.should_observe_frame() {
            self.observe_framebuffer(o, gl);
        }

        let swapped = gl.egl_swap_buffers(display, surface);
        o.resume();
        o.encode_return(Value::Bool(swapped));

        o.on_post_end_of_frame();
        o.on_pre_start_of_frame();
        swapped
    }

    pub fn create_image(
        &mut self,
        o: &mut CallObserver,
        gl: &dyn GlDriver,
        display: EglDisplay,
        context: EglContext,
        target: EGLenum,
        buffer: u64,
        attributes: Slice<EGLint>,
    ) -> EglImage {
        o.command(vec![
            Value::Handle(display),
            Value::Handle(context),
            Value::U32(target),
            Value::U64(buffer),
            Value::Pointer(attributes.base().as_u64()),
        ]);
        o.read_slice(&attributes);
        o.observe_pending();

        let attributes = unsafe { attributes.as_slice() };
        let image = gl.egl_create_image(display, context, target, buffer, attributes);
        o.resume();
        o.encode_return(Value::Handle(image));

        if image == EGL_NO_IMAGE {
            return image;
        }

        let mut info = EglImageInfo {
            handle: image,
            target,
            width: attribute(attributes, EGL_WIDTH).unwrap_or(0),
            height: attribute(attributes, EGL_HEIGHT).unwrap_or(0),
            internal_format: GL_RGBA8,
            source_texture: None,
        };

        if target == EGL_GL_TEXTURE_2D {
            let name = buffer as GLuint;
            let level = self.contexts.get(&context)
                .and_then(|c| self.share_groups.get(&c.share_group))
                .and_then(|g| g.textures.get(&name))
                .and_then(|t| t.level(GL_TEXTURE_2D, 0));

            if let Some(level) = level {
                info.width = level.width;
                info.height = level.height;
                info.internal_format = level.internal_format;
            }
            info.source_texture = Some(name);
        }

        self.images.insert(image, Arc::new(info));
        image
    }

    pub fn destroy_image(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, display: EglDisplay, image: EglImage) -> bool {
        o.command(vec![Value::Handle(display), Value::Handle(image)]);
        let destroyed = gl.egl_destroy_image(display, image);
        o.resume();
        o.encode_return(Value::Bool(destroyed));

        if destroyed {
            // Textures created from the image keep their own reference.
            self.images.remove(&image);
        }
        destroyed
    }

    /// Width and height of what the current context draws into.
    pub(crate) fn draw_target_size(&self, thread: u64, gl: &dyn GlDriver) -> Option<(i32, i32)> {
        let context = self.current_context(thread)?;
        let group = self.share_groups.get(&context.share_group)?;

        let framebuffer = context.bindings.draw_framebuffer;
        if framebuffer == 0 {
            let width = gl.egl_query_surface(context.display, context.draw_surface, EGL_WIDTH)?;
            let height = gl.egl_query_surface(context.display, context.draw_surface, EGL_HEIGHT)?;
            return Some((width, height));
        }

        match context.framebuffers.get(&framebuffer)?.attachments.get(&GL_COLOR_ATTACHMENT0)? {
            Attachment::Texture { name, face, level } => {
                let level = group.textures.get(name)?.level(*face, *level)?;
                Some((level.width, level.height))
            },
            Attachment::Renderbuffer(name) => {
                let renderbuffer = group.renderbuffers.get(name)?;
                Some((renderbuffer.width, renderbuffer.height))
            },
        }
    }

    /// Reads back the current draw target and emits a downsampled copy.
    pub(crate) fn observe_framebuffer(&mut self, o: &mut CallObserver, gl: &dyn GlDriver) {
        let Some((width, height)) = self.draw_target_size(o.thread(), gl) else {
            debug!("No draw target to observe");
            return;
        };
        if width <= 0 || height <= 0 {
            return;
        }

        let Some(context) = self.current_context_mut(o.thread()) else {
            return;
        };
        let (read, draw) = (context.bindings.read_framebuffer, context.bindings.draw_framebuffer);

        // An error the application has not read yet must survive our own
        // error check below.
        let prior = gl.get_error();
        if prior != GL_NO_ERROR && context.pending_error.is_none() {
            context.pending_error = Some(prior);
        }

        if read != draw {
            gl.bind_framebuffer(GL_READ_FRAMEBUFFER, draw);
        }
        let pack_alignment = gl.get_integer(GL_PACK_ALIGNMENT);
        gl.pixel_store_i(GL_PACK_ALIGNMENT, 1);

        let mut data = vec![0u8; width as usize * height as usize * 4];
        gl.read_pixels(0, 0, width, height, GL_RGBA, GL_UNSIGNED_BYTE, &mut data);

        gl.pixel_store_i(GL_PACK_ALIGNMENT, pack_alignment);
        if read != draw {
            gl.bind_framebuffer(GL_READ_FRAMEBUFFER, read);
        }

        let error = gl.get_error();
        if error != GL_NO_ERROR {
            warn!("Framebuffer read back failed with GL error {:#x}", error);
            return;
        }

        // GL rows run bottom to top.
        flip_rows(&mut data, width as usize * 4, height as usize);
        o.encode(Message::FramebufferObservation(framebuffer_observation(&data, width as u32, height as u32)));
    }
}

/// Value of `name` in an `EGL_NONE` terminated attribute list.
fn attribute(attributes: &[EGLint], name: EGLint) -> Option<EGLint> {
    attributes
        .chunks_exact(2)
        .take_while(|pair| pair[0] != EGL_NONE)
        .find(|pair| pair[0] == name)
        .map(|pair| pair[1])
}
