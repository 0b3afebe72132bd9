use log::warn;
use spyglass_encoder::Value;
use spyglass_memory::{Address, PoolId, Slice};
use spyglass_observer::CallObserver;

use crate::formats;
use crate::gl::*;
use crate::state::{Level, Texture};
use crate::{GlDriver, GlesSpy};

/// The texture target a `glTexImage2D` target argument belongs to.
pub fn texture_target(image_target: GLenum) -> GLenum {
    if (GL_TEXTURE_CUBE_MAP_POSITIVE_X..=GL_TEXTURE_CUBE_MAP_NEGATIVE_Z).contains(&image_target) {
        GL_TEXTURE_CUBE_MAP
    } else {
        image_target
    }
}

impl GlesSpy {
    pub fn gen_textures(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, names: Slice<GLuint>) {
        o.command(vec![Value::I32(names.count() as i32), Value::Pointer(names.base().as_u64())]);

        gl.gen_textures(unsafe { names.as_mut_slice() });
        o.resume();
        o.write_slice(&names);
        o.observe_pending();
        self.record_error(o, gl);

        if let Some((_, group)) = self.current_mut(o.thread()) {
            for &name in unsafe { names.as_slice() } {
                group.textures.insert(name, Texture::new(name));
            }
        }
    }

    pub fn delete_textures(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, names: Slice<GLuint>) {
        o.command(vec![Value::I32(names.count() as i32), Value::Pointer(names.base().as_u64())]);
        o.read_slice(&names);
        o.observe_pending();

        let names = unsafe { names.as_slice() };
        gl.delete_textures(names);
        o.resume();
        self.record_error(o, gl);

        if let Some((context, group)) = self.current_mut(o.thread()) {
            for name in names.iter().filter(|n| **n != 0) {
                group.textures.remove(name);
                context.bindings.textures.retain(|_, bound| *bound != *name);
            }
        }
    }

    pub fn active_texture(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, unit: GLenum) {
        o.command(vec![Value::U32(unit)]);
        gl.active_texture(unit);
        o.resume();
        self.record_error(o, gl);

        if let Some(context) = self.current_context_mut(o.thread()) {
            context.bindings.active_texture = unit;
        }
    }

    pub fn bind_texture(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, target: GLenum, name: GLuint) {
        o.command(vec![Value::U32(target), Value::U32(name)]);
        gl.bind_texture(target, name);
        o.resume();
        self.record_error(o, gl);

        if let Some((context, group)) = self.current_mut(o.thread()) {
            if name != 0 {
                // Binding an unused name creates the texture.
                let texture = group.textures.entry(name).or_insert_with(|| Texture::new(name));
                if texture.target == 0 {
                    texture.target = target;
                }
            }
            let unit = context.bindings.active_texture;
            context.bindings.textures.insert((unit, target), name);
        }
    }

    pub fn pixel_store(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, name: GLenum, value: GLint) {
        o.command(vec![Value::U32(name), Value::I32(value)]);
        gl.pixel_store_i(name, value);
        o.resume();
        self.record_error(o, gl);

        if name == GL_UNPACK_ALIGNMENT {
            if let Some(context) = self.current_context_mut(o.thread()) {
                context.unpack_alignment = value;
            }
        }
    }

    /// Texture bound to `image_target` on the current context, if any.
    fn bound_texture_mut(&mut self, thread: u64, image_target: GLenum) -> Option<&mut Texture> {
        let (context, group) = self.current_mut(thread)?;
        let name = context.bindings.texture(texture_target(image_target));
        group.textures.get_mut(&name)
    }

    /// Size of an upload from client memory, or `None` when the pointer is
    /// an offset into a bound pixel unpack buffer.
    fn client_upload_size(&self, thread: u64, width: GLsizei, height: GLsizei, format: GLenum, ty: GLenum) -> Option<u64> {
        let context = self.current_context(thread)?;
        if context.bindings.buffer(GL_PIXEL_UNPACK_BUFFER) != 0 {
            return None;
        }

        match formats::image_size(width, height, format, ty, context.unpack_alignment) {
            Some(size) => Some(size),
            None => {
                warn!("Cannot size {}x{} upload of format {:#x} type {:#x}", width, height, format, ty);
                None
            },
        }
    }

    /// # Safety
    /// `pixels` must be null, an offset into the bound unpack buffer, or
    /// point at an image of the described size.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn tex_image_2d(
        &mut self,
        o: &mut CallObserver,
        gl: &dyn GlDriver,
        target: GLenum,
        level: GLint,
        internal_format: GLint,
        width: GLsizei,
        height: GLsizei,
        border: GLint,
        format: GLenum,
        ty: GLenum,
        pixels: Address,
    ) {
        o.command(vec![
            Value::U32(target),
            Value::I32(level),
            Value::I32(internal_format),
            Value::I32(width),
            Value::I32(height),
            Value::I32(border),
            Value::U32(format),
            Value::U32(ty),
            Value::Pointer(pixels.as_u64()),
        ]);

        let size = self.client_upload_size(o.thread(), width, height, format, ty);
        let pixels = Slice::new(pixels, size.unwrap_or(0), PoolId::APPLICATION);
        if size.is_some() {
            o.read_slice(&pixels);
        }
        o.observe_pending();

        gl.tex_image_2d(target, level, internal_format, width, height, border, format, ty, pixels);
        o.resume();
        self.record_error(o, gl);

        if let Some(texture) = self.bound_texture_mut(o.thread(), target) {
            texture.levels.insert((target, level), Level {
                width,
                height,
                internal_format: internal_format as GLenum,
                format,
                ty,
            });
        }
    }

    /// # Safety
    /// As [`GlesSpy::tex_image_2d`].
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn tex_sub_image_2d(
        &mut self,
        o: &mut CallObserver,
        gl: &dyn GlDriver,
        target: GLenum,
        level: GLint,
        x: GLint,
        y: GLint,
        width: GLsizei,
        height: GLsizei,
        format: GLenum,
        ty: GLenum,
        pixels: Address,
    ) {
        o.command(vec![
            Value::U32(target),
            Value::I32(level),
            Value::I32(x),
            Value::I32(y),
            Value::I32(width),
            Value::I32(height),
            Value::U32(format),
            Value::U32(ty),
            Value::Pointer(pixels.as_u64()),
        ]);

        let size = self.client_upload_size(o.thread(), width, height, format, ty);
        let pixels = Slice::new(pixels, size.unwrap_or(0), PoolId::APPLICATION);
        if size.is_some() {
            o.read_slice(&pixels);
        }
        o.observe_pending();

        gl.tex_sub_image_2d(target, level, x, y, width, height, format, ty, pixels);
        o.resume();
        self.record_error(o, gl);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn compressed_tex_image_2d(
        &mut self,
        o: &mut CallObserver,
        gl: &dyn GlDriver,
        target: GLenum,
        level: GLint,
        internal_format: GLenum,
        width: GLsizei,
        height: GLsizei,
        border: GLint,
        data: Slice<u8>,
    ) {
        o.command(vec![
            Value::U32(target),
            Value::I32(level),
            Value::U32(internal_format),
            Value::I32(width),
            Value::I32(height),
            Value::I32(border),
            Value::I32(data.count() as i32),
            Value::Pointer(data.base().as_u64()),
        ]);

        let unpack_buffer = self.current_context(o.thread())
            .map(|c| c.bindings.buffer(GL_PIXEL_UNPACK_BUFFER) != 0)
            .unwrap_or(false);
        if !unpack_buffer {
            o.read_slice(&data);
        }
        o.observe_pending();

        gl.compressed_tex_image_2d(target, level, internal_format, width, height, border, data);
        o.resume();
        self.record_error(o, gl);

        if let Some(texture) = self.bound_texture_mut(o.thread(), target) {
            texture.levels.insert((target, level), Level {
                width,
                height,
                internal_format,
                format: 0,
                ty: 0,
            });
        }
    }

    pub fn tex_storage_2d(
        &mut self,
        o: &mut CallObserver,
        gl: &dyn GlDriver,
        target: GLenum,
        levels: GLsizei,
        internal_format: GLenum,
        width: GLsizei,
        height: GLsizei,
    ) {
        o.command(vec![
            Value::U32(target),
            Value::I32(levels),
            Value::U32(internal_format),
            Value::I32(width),
            Value::I32(height),
        ]);
        gl.tex_storage_2d(target, levels, internal_format, width, height);
        o.resume();
        self.record_error(o, gl);

        let (format, ty) = formats::sized_transfer_format(internal_format).unwrap_or((0, 0));
        let Some(texture) = self.bound_texture_mut(o.thread(), target) else {
            return;
        };

        let faces: Vec<GLenum> = if target == GL_TEXTURE_CUBE_MAP {
            (GL_TEXTURE_CUBE_MAP_POSITIVE_X..=GL_TEXTURE_CUBE_MAP_NEGATIVE_Z).collect()
        } else {
            vec![target]
        };

        for level in 0..levels.max(0) {
            for face in &faces {
                texture.levels.insert((*face, level), Level {
                    width: (width >> level).max(1),
                    height: (height >> level).max(1),
                    internal_format,
                    format,
                    ty,
                });
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn tex_storage_2d_multisample(
        &mut self,
        o: &mut CallObserver,
        gl: &dyn GlDriver,
        target: GLenum,
        samples: GLsizei,
        internal_format: GLenum,
        width: GLsizei,
        height: GLsizei,
        fixed_locations: bool,
    ) {
        o.command(vec![
            Value::U32(target),
            Value::I32(samples),
            Value::U32(internal_format),
            Value::I32(width),
            Value::I32(height),
            Value::Bool(fixed_locations),
        ]);
        gl.tex_storage_2d_multisample(target, samples, internal_format, width, height, fixed_locations);
        o.resume();
        self.record_error(o, gl);

        if let Some(texture) = self.bound_texture_mut(o.thread(), target) {
            texture.samples = samples;
            texture.levels.insert((target, 0), Level { width, height, internal_format, format: 0, ty: 0 });
        }
    }

    pub fn egl_image_target_texture_2d(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, target: GLenum, image: EglImage) {
        o.command(vec![Value::U32(target), Value::Handle(image)]);
        gl.egl_image_target_texture_2d(target, image);
        o.resume();
        self.record_error(o, gl);

        let Some(info) = self.images.get(&image).cloned() else {
            warn!("Texture bound to unknown EGL image {:#x}", image);
            return;
        };

        if let Some(texture) = self.bound_texture_mut(o.thread(), target) {
            texture.levels.clear();
            texture.levels.insert((target, 0), Level {
                width: info.width,
                height: info.height,
                internal_format: info.internal_format,
                format: 0,
                ty: 0,
            });
            texture.egl_image = Some(info);
        }
    }
}
