use std::ffi::c_void;

use spyglass_memory::Slice;

use crate::gl::*;

/// The real EGL and GLES entry points the spy forwards to.
///
/// Application data is passed as [`Slice`]s so a pointer that is really an
/// offset into a bound pixel or buffer object reaches the driver unchanged;
/// implementations pass every argument straight through. Every method
/// runs on the calling thread against that thread's current context.
pub trait GlDriver: Send + Sync {
    fn egl_get_current_display(&self) -> EglDisplay;
    fn egl_get_current_context(&self) -> EglContext;
    fn egl_get_current_surface(&self, which: EGLint) -> EglSurface;
    fn egl_create_context(
        &self,
        display: EglDisplay,
        config: EglConfig,
        share: EglContext,
        attributes: &[EGLint],
    ) -> EglContext;
    fn egl_destroy_context(&self, display: EglDisplay, context: EglContext) -> bool;
    fn egl_make_current(
        &self,
        display: EglDisplay,
        draw: EglSurface,
        read: EglSurface,
        context: EglContext,
    ) -> bool;
    fn egl_swap_buffers(&self, display: EglDisplay, surface: EglSurface) -> bool;
    fn egl_query_surface(&self, display: EglDisplay, surface: EglSurface, attribute: EGLint) -> Option<EGLint>;
    fn egl_create_image(
        &self,
        display: EglDisplay,
        context: EglContext,
        target: EGLenum,
        buffer: u64,
        attributes: &[EGLint],
    ) -> EglImage;
    fn egl_destroy_image(&self, display: EglDisplay, image: EglImage) -> bool;

    fn get_error(&self) -> GLenum;
    fn get_integer(&self, name: GLenum) -> GLint;

    fn gen_textures(&self, names: &mut [GLuint]);
    fn delete_textures(&self, names: &[GLuint]);
    fn bind_texture(&self, target: GLenum, texture: GLuint);
    fn active_texture(&self, unit: GLenum);
    fn tex_parameter_i(&self, target: GLenum, name: GLenum, value: GLint);
    #[allow(clippy::too_many_arguments)]
    fn tex_image_2d(
        &self,
        target: GLenum,
        level: GLint,
        internal_format: GLint,
        width: GLsizei,
        height: GLsizei,
        border: GLint,
        format: GLenum,
        ty: GLenum,
        pixels: Slice<u8>,
    );
    #[allow(clippy::too_many_arguments)]
    fn tex_sub_image_2d(
        &self,
        target: GLenum,
        level: GLint,
        x: GLint,
        y: GLint,
        width: GLsizei,
        height: GLsizei,
        format: GLenum,
        ty: GLenum,
        pixels: Slice<u8>,
    );
    #[allow(clippy::too_many_arguments)]
    fn compressed_tex_image_2d(
        &self,
        target: GLenum,
        level: GLint,
        internal_format: GLenum,
        width: GLsizei,
        height: GLsizei,
        border: GLint,
        data: Slice<u8>,
    );
    fn tex_storage_2d(&self, target: GLenum, levels: GLsizei, internal_format: GLenum, width: GLsizei, height: GLsizei);
    fn tex_storage_2d_multisample(
        &self,
        target: GLenum,
        samples: GLsizei,
        internal_format: GLenum,
        width: GLsizei,
        height: GLsizei,
        fixed_locations: bool,
    );
    fn egl_image_target_texture_2d(&self, target: GLenum, image: EglImage);

    fn gen_buffers(&self, names: &mut [GLuint]);
    fn delete_buffers(&self, names: &[GLuint]);
    fn bind_buffer(&self, target: GLenum, buffer: GLuint);
    fn buffer_data(&self, target: GLenum, size: GLsizeiptr, data: Slice<u8>, usage: GLenum);
    fn buffer_sub_data(&self, target: GLenum, offset: GLintptr, data: Slice<u8>);
    fn map_buffer_range(&self, target: GLenum, offset: GLintptr, length: GLsizeiptr, access: GLbitfield) -> *mut c_void;
    fn unmap_buffer(&self, target: GLenum) -> bool;

    fn gen_renderbuffers(&self, names: &mut [GLuint]);
    fn delete_renderbuffers(&self, names: &[GLuint]);
    fn bind_renderbuffer(&self, target: GLenum, renderbuffer: GLuint);
    fn renderbuffer_storage_multisample(
        &self,
        target: GLenum,
        samples: GLsizei,
        internal_format: GLenum,
        width: GLsizei,
        height: GLsizei,
    );

    fn gen_framebuffers(&self, names: &mut [GLuint]);
    fn delete_framebuffers(&self, names: &[GLuint]);
    fn bind_framebuffer(&self, target: GLenum, framebuffer: GLuint);
    fn framebuffer_texture_2d(&self, target: GLenum, attachment: GLenum, tex_target: GLenum, texture: GLuint, level: GLint);
    fn framebuffer_renderbuffer(&self, target: GLenum, attachment: GLenum, rb_target: GLenum, renderbuffer: GLuint);
    fn check_framebuffer_status(&self, target: GLenum) -> GLenum;

    fn pixel_store_i(&self, name: GLenum, value: GLint);
    #[allow(clippy::too_many_arguments)]
    fn read_pixels(
        &self,
        x: GLint,
        y: GLint,
        width: GLsizei,
        height: GLsizei,
        format: GLenum,
        ty: GLenum,
        out: &mut [u8],
    );
    fn viewport(&self, x: GLint, y: GLint, width: GLsizei, height: GLsizei);

    fn draw_arrays(&self, mode: GLenum, first: GLint, count: GLsizei);
    /// `indices` is a byte offset into the bound element buffer, or a client
    /// address when none is bound.
    fn draw_elements(&self, mode: GLenum, count: GLsizei, ty: GLenum, indices: usize);

    fn create_shader(&self, ty: GLenum) -> GLuint;
    fn shader_source(&self, shader: GLuint, source: &str);
    fn compile_shader(&self, shader: GLuint);
    fn get_shader_i(&self, shader: GLuint, name: GLenum) -> GLint;
    fn delete_shader(&self, shader: GLuint);
    fn create_program(&self) -> GLuint;
    fn attach_shader(&self, program: GLuint, shader: GLuint);
    fn bind_attrib_location(&self, program: GLuint, index: GLuint, name: &str);
    fn link_program(&self, program: GLuint);
    fn get_program_i(&self, program: GLuint, name: GLenum) -> GLint;
    fn use_program(&self, program: GLuint);
    fn delete_program(&self, program: GLuint);
    fn get_uniform_location(&self, program: GLuint, name: &str) -> GLint;
    fn uniform_1i(&self, location: GLint, value: GLint);
    fn enable_vertex_attrib_array(&self, index: GLuint);
    fn vertex_attrib_pointer(&self, index: GLuint, size: GLint, ty: GLenum, normalized: bool, stride: GLsizei, pointer: usize);
}
