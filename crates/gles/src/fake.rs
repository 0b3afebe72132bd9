//! A small software stand-in for an EGL/GLES driver.

use std::ffi::c_void;
use std::sync::Mutex;
use std::thread::{self, ThreadId};
use std::collections::HashMap;

use spyglass_memory::Slice;

use crate::formats;
use crate::gl::*;
use crate::GlDriver;

/// Pixel value the default framebuffer of every surface reads back as.
pub const SURFACE_PIXEL: [u8; 4] = [10, 20, 30, 255];
/// What the fake "decodes" every compressed texel to.
pub const DECODED_TEXEL: [u8; 4] = [1, 2, 3, 255];
/// What the fake depth resample shader writes for every texel.
pub const ENCODED_DEPTH: [u8; 4] = [0x12, 0x34, 0x56, 0xff];

#[derive(Default)]
struct FakeContext {
    error: GLenum,
    textures: HashMap<GLenum, GLuint>,
    buffers: HashMap<GLenum, GLuint>,
    draw_framebuffer: GLuint,
    read_framebuffer: GLuint,
    renderbuffer: GLuint,
    program: GLuint,
}

#[derive(Default)]
struct FakeTexture {
    levels: HashMap<(GLenum, GLint), (i32, i32, GLenum, Vec<u8>)>,
}

#[derive(Default)]
struct State {
    next_handle: u64,
    next_name: GLuint,
    contexts: HashMap<EglContext, FakeContext>,
    current: HashMap<ThreadId, (EglContext, EglSurface)>,
    surfaces: HashMap<EglSurface, (i32, i32)>,
    textures: HashMap<GLuint, FakeTexture>,
    buffers: HashMap<GLuint, Vec<u8>>,
    renderbuffers: HashMap<GLuint, (GLenum, i32, i32)>,
    framebuffers: HashMap<GLuint, HashMap<GLenum, (bool, GLuint, GLenum, GLint)>>,
    shaders: HashMap<GLuint, String>,
    programs: HashMap<GLuint, Vec<GLuint>>,
    calls: Vec<&'static str>,
}

impl State {
    fn context(&mut self) -> Option<&mut FakeContext> {
        let (context, _) = *self.current.get(&thread::current().id())?;
        self.contexts.get_mut(&context)
    }

    fn raise(&mut self, error: GLenum) {
        if let Some(context) = self.context() {
            if context.error == GL_NO_ERROR {
                context.error = error;
            }
        }
    }

    fn name(&mut self) -> GLuint {
        self.next_name += 1;
        self.next_name
    }

    fn bound_texture(&mut self, target: GLenum) -> GLuint {
        let target = crate::texture_target(target);
        self.context().and_then(|c| c.textures.get(&target).copied()).unwrap_or(0)
    }

    fn bound_buffer(&mut self, target: GLenum) -> GLuint {
        self.context().and_then(|c| c.buffers.get(&target).copied()).unwrap_or(0)
    }

    fn level_mut(&mut self, target: GLenum, level: GLint) -> Option<&mut (i32, i32, GLenum, Vec<u8>)> {
        let name = self.bound_texture(target);
        self.textures.get_mut(&name)?.levels.get_mut(&(target, level))
    }

    /// Contents of the color attachment the current context reads from.
    fn read_source(&mut self) -> Option<(i32, i32, Vec<u8>)> {
        let (_, surface) = *self.current.get(&thread::current().id())?;
        let framebuffer = self.context()?.read_framebuffer;

        if framebuffer == 0 {
            let (width, height) = *self.surfaces.get(&surface)?;
            return Some((width, height, SURFACE_PIXEL.repeat((width * height) as usize)));
        }

        let (is_texture, name, face, level) = *self.framebuffers.get(&framebuffer)?.get(&GL_COLOR_ATTACHMENT0)?;
        if is_texture {
            let (width, height, _, data) = self.textures.get(&name)?.levels.get(&(face, level))?;
            Some((*width, *height, data.clone()))
        } else {
            let (_, width, height) = *self.renderbuffers.get(&name)?;
            Some((width, height, vec![0x7f; (width * height * 4) as usize]))
        }
    }
}

#[derive(Default)]
pub struct FakeGl {
    state: Mutex<State>,
}

impl FakeGl {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn log(&self, call: &'static str) -> std::sync::MutexGuard<'_, State> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }

    pub fn add_surface(&self, width: i32, height: i32) -> EglSurface {
        let mut state = self.state();
        state.next_handle += 1;
        let surface = 0x5000 + state.next_handle;
        state.surfaces.insert(surface, (width, height));
        surface
    }

    /// Raises `error` on the calling thread's context, as a failing call would.
    pub fn raise(&self, error: GLenum) {
        self.state().raise(error);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == call).count()
    }

    pub fn texture_data(&self, name: GLuint, face: GLenum, level: GLint) -> Option<Vec<u8>> {
        self.state().textures.get(&name)?.levels.get(&(face, level)).map(|l| l.3.clone())
    }
}

impl GlDriver for FakeGl {
    fn egl_get_current_display(&self) -> EglDisplay {
        let state = self.state();
        if state.current.contains_key(&thread::current().id()) { 1 } else { 0 }
    }

    fn egl_get_current_context(&self) -> EglContext {
        self.state().current.get(&thread::current().id()).map(|c| c.0).unwrap_or(EGL_NO_CONTEXT)
    }

    fn egl_get_current_surface(&self, _which: EGLint) -> EglSurface {
        self.state().current.get(&thread::current().id()).map(|c| c.1).unwrap_or(EGL_NO_SURFACE)
    }

    fn egl_create_context(&self, _display: EglDisplay, _config: EglConfig, share: EglContext, _attributes: &[EGLint]) -> EglContext {
        let mut state = self.log("eglCreateContext");
        if share != EGL_NO_CONTEXT && !state.contexts.contains_key(&share) {
            return EGL_NO_CONTEXT;
        }
        state.next_handle += 1;
        let context = 0xC000 + state.next_handle;
        state.contexts.insert(context, FakeContext::default());
        context
    }

    fn egl_destroy_context(&self, _display: EglDisplay, context: EglContext) -> bool {
        self.log("eglDestroyContext").contexts.remove(&context).is_some()
    }

    fn egl_make_current(&self, _display: EglDisplay, draw: EglSurface, _read: EglSurface, context: EglContext) -> bool {
        let mut state = self.log("eglMakeCurrent");
        let thread = thread::current().id();
        if context == EGL_NO_CONTEXT {
            state.current.remove(&thread);
            return true;
        }
        if !state.contexts.contains_key(&context) {
            return false;
        }
        state.current.insert(thread, (context, draw));
        true
    }

    fn egl_swap_buffers(&self, _display: EglDisplay, surface: EglSurface) -> bool {
        self.log("eglSwapBuffers").surfaces.contains_key(&surface)
    }

    fn egl_query_surface(&self, _display: EglDisplay, surface: EglSurface, attribute: EGLint) -> Option<EGLint> {
        let (width, height) = *self.state().surfaces.get(&surface)?;
        match attribute {
            EGL_WIDTH => Some(width),
            EGL_HEIGHT => Some(height),
            _ => None,
        }
    }

    fn egl_create_image(&self, _display: EglDisplay, _context: EglContext, _target: EGLenum, _buffer: u64, _attributes: &[EGLint]) -> EglImage {
        let mut state = self.log("eglCreateImageKHR");
        state.next_handle += 1;
        0x1000 + state.next_handle
    }

    fn egl_destroy_image(&self, _display: EglDisplay, _image: EglImage) -> bool {
        self.log("eglDestroyImageKHR");
        true
    }

    fn get_error(&self) -> GLenum {
        let mut state = self.log("glGetError");
        match state.context() {
            Some(context) => std::mem::replace(&mut context.error, GL_NO_ERROR),
            None => GL_NO_ERROR,
        }
    }

    fn get_integer(&self, name: GLenum) -> GLint {
        match name {
            GL_PACK_ALIGNMENT | GL_UNPACK_ALIGNMENT => 4,
            _ => 0,
        }
    }

    fn gen_textures(&self, names: &mut [GLuint]) {
        let mut state = self.log("glGenTextures");
        for name in names.iter_mut() {
            *name = state.name();
            state.textures.insert(*name, FakeTexture::default());
        }
    }

    fn delete_textures(&self, names: &[GLuint]) {
        let mut state = self.log("glDeleteTextures");
        for name in names {
            state.textures.remove(name);
        }
    }

    fn bind_texture(&self, target: GLenum, texture: GLuint) {
        let mut state = self.log("glBindTexture");
        if !matches!(target, GL_TEXTURE_2D | GL_TEXTURE_CUBE_MAP | GL_TEXTURE_EXTERNAL_OES | GL_TEXTURE_2D_MULTISAMPLE) {
            state.raise(GL_INVALID_ENUM);
            return;
        }
        state.textures.entry(texture).or_default();
        if let Some(context) = state.context() {
            context.textures.insert(target, texture);
        }
    }

    fn active_texture(&self, _unit: GLenum) {
        self.log("glActiveTexture");
    }

    fn tex_parameter_i(&self, _target: GLenum, _name: GLenum, _value: GLint) {
        self.log("glTexParameteri");
    }

    fn tex_image_2d(
        &self,
        target: GLenum,
        level: GLint,
        internal_format: GLint,
        width: GLsizei,
        height: GLsizei,
        _border: GLint,
        format: GLenum,
        ty: GLenum,
        pixels: Slice<u8>,
    ) {
        let mut state = self.log("glTexImage2D");
        let size = formats::image_size(width, height, format, ty, 1).unwrap_or(0) as usize;
        let data = if pixels.is_empty() { vec![0; size] } else { unsafe { pixels.bytes() }.to_vec() };

        let name = state.bound_texture(target);
        match state.textures.get_mut(&name) {
            Some(texture) => {
                texture.levels.insert((target, level), (width, height, internal_format as GLenum, data));
            },
            None => state.raise(GL_INVALID_OPERATION),
        }
    }

    fn tex_sub_image_2d(
        &self,
        target: GLenum,
        level: GLint,
        _x: GLint,
        _y: GLint,
        _width: GLsizei,
        _height: GLsizei,
        _format: GLenum,
        _ty: GLenum,
        _pixels: Slice<u8>,
    ) {
        let mut state = self.log("glTexSubImage2D");
        if state.level_mut(target, level).is_none() {
            state.raise(GL_INVALID_OPERATION);
        }
    }

    fn compressed_tex_image_2d(
        &self,
        target: GLenum,
        level: GLint,
        internal_format: GLenum,
        width: GLsizei,
        height: GLsizei,
        _border: GLint,
        data: Slice<u8>,
    ) {
        let mut state = self.log("glCompressedTexImage2D");
        let data = unsafe { data.bytes() }.to_vec();
        let name = state.bound_texture(target);
        if let Some(texture) = state.textures.get_mut(&name) {
            texture.levels.insert((target, level), (width, height, internal_format, data));
        }
    }

    fn tex_storage_2d(&self, target: GLenum, levels: GLsizei, internal_format: GLenum, width: GLsizei, height: GLsizei) {
        let mut state = self.log("glTexStorage2D");
        let name = state.bound_texture(target);
        if let Some(texture) = state.textures.get_mut(&name) {
            for level in 0..levels {
                let (w, h) = ((width >> level).max(1), (height >> level).max(1));
                texture.levels.insert((target, level), (w, h, internal_format, vec![0; (w * h * 4) as usize]));
            }
        }
    }

    fn tex_storage_2d_multisample(&self, target: GLenum, _samples: GLsizei, internal_format: GLenum, width: GLsizei, height: GLsizei, _fixed: bool) {
        let mut state = self.log("glTexStorage2DMultisample");
        let name = state.bound_texture(target);
        if let Some(texture) = state.textures.get_mut(&name) {
            texture.levels.insert((target, 0), (width, height, internal_format, Vec::new()));
        }
    }

    fn egl_image_target_texture_2d(&self, _target: GLenum, _image: EglImage) {
        self.log("glEGLImageTargetTexture2DOES");
    }

    fn gen_buffers(&self, names: &mut [GLuint]) {
        let mut state = self.log("glGenBuffers");
        for name in names.iter_mut() {
            *name = state.name();
            state.buffers.insert(*name, Vec::new());
        }
    }

    fn delete_buffers(&self, names: &[GLuint]) {
        let mut state = self.log("glDeleteBuffers");
        for name in names {
            state.buffers.remove(name);
        }
    }

    fn bind_buffer(&self, target: GLenum, buffer: GLuint) {
        let mut state = self.log("glBindBuffer");
        state.buffers.entry(buffer).or_default();
        if let Some(context) = state.context() {
            context.buffers.insert(target, buffer);
        }
    }

    fn buffer_data(&self, target: GLenum, size: GLsizeiptr, data: Slice<u8>, _usage: GLenum) {
        let mut state = self.log("glBufferData");
        let contents = if data.is_empty() { vec![0; size as usize] } else { unsafe { data.bytes() }.to_vec() };
        let name = state.bound_buffer(target);
        state.buffers.insert(name, contents);
    }

    fn buffer_sub_data(&self, target: GLenum, offset: GLintptr, data: Slice<u8>) {
        let mut state = self.log("glBufferSubData");
        let name = state.bound_buffer(target);
        let bytes = unsafe { data.bytes() };
        if let Some(buffer) = state.buffers.get_mut(&name) {
            buffer[offset as usize..offset as usize + bytes.len()].copy_from_slice(bytes);
        }
    }

    fn map_buffer_range(&self, target: GLenum, offset: GLintptr, length: GLsizeiptr, _access: GLbitfield) -> *mut c_void {
        let mut state = self.log("glMapBufferRange");
        let name = state.bound_buffer(target);
        match state.buffers.get_mut(&name) {
            Some(buffer) if (offset + length) as usize <= buffer.len() => {
                buffer[offset as usize..].as_mut_ptr() as *mut c_void
            },
            _ => {
                state.raise(GL_INVALID_VALUE);
                std::ptr::null_mut()
            },
        }
    }

    fn unmap_buffer(&self, _target: GLenum) -> bool {
        self.log("glUnmapBuffer");
        true
    }

    fn gen_renderbuffers(&self, names: &mut [GLuint]) {
        let mut state = self.log("glGenRenderbuffers");
        for name in names.iter_mut() {
            *name = state.name();
        }
    }

    fn delete_renderbuffers(&self, names: &[GLuint]) {
        let mut state = self.log("glDeleteRenderbuffers");
        for name in names {
            state.renderbuffers.remove(name);
        }
    }

    fn bind_renderbuffer(&self, _target: GLenum, renderbuffer: GLuint) {
        let mut state = self.log("glBindRenderbuffer");
        state.renderbuffers.entry(renderbuffer).or_insert((0, 0, 0));
        if let Some(context) = state.context() {
            context.renderbuffer = renderbuffer;
        }
    }

    fn renderbuffer_storage_multisample(&self, _target: GLenum, _samples: GLsizei, internal_format: GLenum, width: GLsizei, height: GLsizei) {
        let mut state = self.log("glRenderbufferStorageMultisample");
        let name = state.context().map(|c| c.renderbuffer).unwrap_or(0);
        state.renderbuffers.insert(name, (internal_format, width, height));
    }

    fn gen_framebuffers(&self, names: &mut [GLuint]) {
        let mut state = self.log("glGenFramebuffers");
        for name in names.iter_mut() {
            *name = state.name();
            state.framebuffers.insert(*name, HashMap::new());
        }
    }

    fn delete_framebuffers(&self, names: &[GLuint]) {
        let mut state = self.log("glDeleteFramebuffers");
        for name in names {
            state.framebuffers.remove(name);
        }
    }

    fn bind_framebuffer(&self, target: GLenum, framebuffer: GLuint) {
        let mut state = self.log("glBindFramebuffer");
        if framebuffer != 0 {
            state.framebuffers.entry(framebuffer).or_default();
        }
        if let Some(context) = state.context() {
            if target != GL_READ_FRAMEBUFFER {
                context.draw_framebuffer = framebuffer;
            }
            if target != GL_DRAW_FRAMEBUFFER {
                context.read_framebuffer = framebuffer;
            }
        }
    }

    fn framebuffer_texture_2d(&self, target: GLenum, attachment: GLenum, tex_target: GLenum, texture: GLuint, level: GLint) {
        let mut state = self.log("glFramebufferTexture2D");
        let Some(context) = state.context() else { return };
        let framebuffer = if target == GL_READ_FRAMEBUFFER { context.read_framebuffer } else { context.draw_framebuffer };
        if let Some(attachments) = state.framebuffers.get_mut(&framebuffer) {
            if texture == 0 {
                attachments.remove(&attachment);
            } else {
                attachments.insert(attachment, (true, texture, tex_target, level));
            }
        }
    }

    fn framebuffer_renderbuffer(&self, target: GLenum, attachment: GLenum, _rb_target: GLenum, renderbuffer: GLuint) {
        let mut state = self.log("glFramebufferRenderbuffer");
        let Some(context) = state.context() else { return };
        let framebuffer = if target == GL_READ_FRAMEBUFFER { context.read_framebuffer } else { context.draw_framebuffer };
        if let Some(attachments) = state.framebuffers.get_mut(&framebuffer) {
            attachments.insert(attachment, (false, renderbuffer, GL_RENDERBUFFER, 0));
        }
    }

    fn check_framebuffer_status(&self, _target: GLenum) -> GLenum {
        let mut state = self.log("glCheckFramebufferStatus");
        match state.read_source() {
            Some(_) => GL_FRAMEBUFFER_COMPLETE,
            None => 0x8CD6,
        }
    }

    fn pixel_store_i(&self, _name: GLenum, _value: GLint) {
        self.log("glPixelStorei");
    }

    fn read_pixels(&self, _x: GLint, _y: GLint, width: GLsizei, height: GLsizei, format: GLenum, ty: GLenum, out: &mut [u8]) {
        let mut state = self.log("glReadPixels");
        if format != GL_RGBA || ty != GL_UNSIGNED_BYTE {
            state.raise(GL_INVALID_OPERATION);
            return;
        }
        match state.read_source() {
            Some((w, h, data)) if w == width && h == height && data.len() == out.len() => out.copy_from_slice(&data),
            _ => state.raise(GL_INVALID_OPERATION),
        }
    }

    fn viewport(&self, _x: GLint, _y: GLint, _width: GLsizei, _height: GLsizei) {
        self.log("glViewport");
    }

    /// Draws with the current program fill the draw framebuffer's color
    /// texture with what the resample shader would produce.
    fn draw_arrays(&self, _mode: GLenum, _first: GLint, _count: GLsizei) {
        let mut state = self.log("glDrawArrays");
        let Some(context) = state.context() else { return };
        let (program, framebuffer) = (context.program, context.draw_framebuffer);
        if program == 0 || framebuffer == 0 {
            return;
        }

        let depth = state.programs.get(&program)
            .map(|shaders| shaders.iter().any(|s| state.shaders.get(s).map(|src| src.contains("16777215")).unwrap_or(false)))
            .unwrap_or(false);
        let texel = if depth { ENCODED_DEPTH } else { DECODED_TEXEL };

        let attachment = state.framebuffers.get(&framebuffer).and_then(|a| a.get(&GL_COLOR_ATTACHMENT0)).copied();
        if let Some((true, name, face, level)) = attachment {
            if let Some(level) = state.textures.get_mut(&name).and_then(|t| t.levels.get_mut(&(face, level))) {
                level.3 = texel.repeat((level.0 * level.1) as usize);
            }
        }
    }

    fn draw_elements(&self, _mode: GLenum, _count: GLsizei, _ty: GLenum, _indices: usize) {
        self.log("glDrawElements");
    }

    fn create_shader(&self, _ty: GLenum) -> GLuint {
        let mut state = self.log("glCreateShader");
        let name = state.name();
        state.shaders.insert(name, String::new());
        name
    }

    fn shader_source(&self, shader: GLuint, source: &str) {
        self.log("glShaderSource").shaders.insert(shader, source.to_string());
    }

    fn compile_shader(&self, _shader: GLuint) {
        self.log("glCompileShader");
    }

    fn get_shader_i(&self, shader: GLuint, _name: GLenum) -> GLint {
        self.state().shaders.contains_key(&shader) as GLint
    }

    fn delete_shader(&self, _shader: GLuint) {
        // Attached shaders stay alive until their program goes.
        self.log("glDeleteShader");
    }

    fn create_program(&self) -> GLuint {
        let mut state = self.log("glCreateProgram");
        let name = state.name();
        state.programs.insert(name, Vec::new());
        name
    }

    fn attach_shader(&self, program: GLuint, shader: GLuint) {
        if let Some(shaders) = self.log("glAttachShader").programs.get_mut(&program) {
            shaders.push(shader);
        }
    }

    fn bind_attrib_location(&self, _program: GLuint, _index: GLuint, _name: &str) {
        self.log("glBindAttribLocation");
    }

    fn link_program(&self, _program: GLuint) {
        self.log("glLinkProgram");
    }

    fn get_program_i(&self, program: GLuint, _name: GLenum) -> GLint {
        self.state().programs.contains_key(&program) as GLint
    }

    fn use_program(&self, program: GLuint) {
        if let Some(context) = self.log("glUseProgram").context() {
            context.program = program;
        }
    }

    fn delete_program(&self, program: GLuint) {
        self.log("glDeleteProgram").programs.remove(&program);
    }

    fn get_uniform_location(&self, _program: GLuint, _name: &str) -> GLint {
        0
    }

    fn uniform_1i(&self, _location: GLint, _value: GLint) {
        self.log("glUniform1i");
    }

    fn enable_vertex_attrib_array(&self, _index: GLuint) {
        self.log("glEnableVertexAttribArray");
    }

    fn vertex_attrib_pointer(&self, _index: GLuint, _size: GLint, _ty: GLenum, _normalized: bool, _stride: GLsizei, _pointer: usize) {
        self.log("glVertexAttribPointer");
    }
}
