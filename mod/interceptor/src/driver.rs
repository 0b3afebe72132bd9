use std::ffi::{c_char, c_void, CStr, CString};
use std::{mem, ptr};

use log::{debug, warn};
use spyglass::gles::gl::*;
use spyglass::gles::GlDriver;
use spyglass::memory::Slice;

use crate::error::InterceptError;
use crate::settings::Settings;

pub type Ptr = *mut c_void;
pub type ConstPtr = *const c_void;
pub type EGLBoolean = u32;

pub fn handle(pointer: Ptr) -> u64 {
    pointer as usize as u64
}

pub fn pointer(handle: u64) -> Ptr {
    handle as usize as Ptr
}

pub struct Library {
    name: String,
    handle: Ptr,
}

impl Library {
    fn open(name: &str) -> Result<Self, InterceptError> {
        let path = CString::new(name).map_err(|e| InterceptError::Open {
            library: name.to_string(),
            reason: e.to_string(),
        })?;

        let handle = unsafe { libc::dlopen(path.as_ptr(), libc::RTLD_NOW) };
        if handle.is_null() {
            return Err(InterceptError::Open { library: name.to_string(), reason: dlerror() });
        }

        debug!("Loaded {}", name);
        Ok(Self { name: name.to_string(), handle })
    }

    fn symbol(&self, symbol: &CStr) -> Ptr {
        unsafe { libc::dlsym(self.handle, symbol.as_ptr()) }
    }
}

fn dlerror() -> String {
    let message = unsafe { libc::dlerror() };
    if message.is_null() {
        return "unknown error".to_string();
    }
    unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
}

type GetProcAddress = unsafe extern "C" fn(*const c_char) -> Ptr;

/// The driver libraries the real entry points are looked up in.
pub struct Libraries {
    pub egl: Library,
    pub gles: Library,
    get_proc_address: Option<GetProcAddress>,
}

impl Libraries {
    pub fn open(settings: &Settings) -> Result<Self, InterceptError> {
        let egl = Library::open(&settings.egl_library)?;
        let gles = Library::open(&settings.gles_library)?;

        let get_proc_address = CString::new("eglGetProcAddress")
            .ok()
            .map(|name| egl.symbol(&name))
            .filter(|address| !address.is_null())
            .map(|address| unsafe { mem::transmute::<Ptr, GetProcAddress>(address) });

        Ok(Self { egl, gles, get_proc_address })
    }

    /// Looks `symbol` up in `library`, then through `eglGetProcAddress` for
    /// extension entry points.
    fn resolve(&self, library: &Library, symbol: &'static str) -> Result<Ptr, InterceptError> {
        let missing = || InterceptError::Missing { symbol, library: library.name.clone() };
        let name = CString::new(symbol).map_err(|_| missing())?;

        let mut address = library.symbol(&name);
        if address.is_null() {
            if let Some(get_proc_address) = self.get_proc_address {
                address = unsafe { get_proc_address(name.as_ptr()) };
            }
        }

        if address.is_null() {
            return Err(missing());
        }
        Ok(address)
    }
}

macro_rules! entry_points {
    ($($field:ident: $library:ident $symbol:literal fn($($arg:ty),*) $(-> $ret:ty)?;)*) => {
        /// Addresses of the real EGL and GLES entry points. Detoured entries
        /// point at their trampolines once the detours exist.
        #[derive(Clone, Copy)]
        pub struct GlProcs {
            $(pub $field: unsafe extern "C" fn($($arg),*) $(-> $ret)?,)*
        }

        impl GlProcs {
            pub fn load(libraries: &Libraries) -> Result<Self, InterceptError> {
                Ok(Self {
                    $($field: unsafe {
                        mem::transmute::<Ptr, unsafe extern "C" fn($($arg),*) $(-> $ret)?>(
                            libraries.resolve(&libraries.$library, $symbol)?
                        )
                    },)*
                })
            }
        }
    };
}

entry_points! {
    egl_get_current_display: egl "eglGetCurrentDisplay" fn() -> Ptr;
    egl_get_current_context: egl "eglGetCurrentContext" fn() -> Ptr;
    egl_get_current_surface: egl "eglGetCurrentSurface" fn(EGLint) -> Ptr;
    egl_create_context: egl "eglCreateContext" fn(Ptr, Ptr, Ptr, *const EGLint) -> Ptr;
    egl_destroy_context: egl "eglDestroyContext" fn(Ptr, Ptr) -> EGLBoolean;
    egl_make_current: egl "eglMakeCurrent" fn(Ptr, Ptr, Ptr, Ptr) -> EGLBoolean;
    egl_swap_buffers: egl "eglSwapBuffers" fn(Ptr, Ptr) -> EGLBoolean;
    egl_query_surface: egl "eglQuerySurface" fn(Ptr, Ptr, EGLint, *mut EGLint) -> EGLBoolean;
    egl_create_image: egl "eglCreateImageKHR" fn(Ptr, Ptr, EGLenum, Ptr, *const EGLint) -> Ptr;
    egl_destroy_image: egl "eglDestroyImageKHR" fn(Ptr, Ptr) -> EGLBoolean;

    get_error: gles "glGetError" fn() -> GLenum;
    get_integer: gles "glGetIntegerv" fn(GLenum, *mut GLint);

    gen_textures: gles "glGenTextures" fn(GLsizei, *mut GLuint);
    delete_textures: gles "glDeleteTextures" fn(GLsizei, *const GLuint);
    bind_texture: gles "glBindTexture" fn(GLenum, GLuint);
    active_texture: gles "glActiveTexture" fn(GLenum);
    tex_parameter_i: gles "glTexParameteri" fn(GLenum, GLenum, GLint);
    tex_image_2d: gles "glTexImage2D" fn(GLenum, GLint, GLint, GLsizei, GLsizei, GLint, GLenum, GLenum, ConstPtr);
    tex_sub_image_2d: gles "glTexSubImage2D" fn(GLenum, GLint, GLint, GLint, GLsizei, GLsizei, GLenum, GLenum, ConstPtr);
    compressed_tex_image_2d: gles "glCompressedTexImage2D" fn(GLenum, GLint, GLenum, GLsizei, GLsizei, GLint, GLsizei, ConstPtr);
    tex_storage_2d: gles "glTexStorage2D" fn(GLenum, GLsizei, GLenum, GLsizei, GLsizei);
    tex_storage_2d_multisample: gles "glTexStorage2DMultisample" fn(GLenum, GLsizei, GLenum, GLsizei, GLsizei, GLboolean);
    egl_image_target_texture_2d: gles "glEGLImageTargetTexture2DOES" fn(GLenum, Ptr);

    gen_buffers: gles "glGenBuffers" fn(GLsizei, *mut GLuint);
    delete_buffers: gles "glDeleteBuffers" fn(GLsizei, *const GLuint);
    bind_buffer: gles "glBindBuffer" fn(GLenum, GLuint);
    buffer_data: gles "glBufferData" fn(GLenum, GLsizeiptr, ConstPtr, GLenum);
    buffer_sub_data: gles "glBufferSubData" fn(GLenum, GLintptr, GLsizeiptr, ConstPtr);
    map_buffer_range: gles "glMapBufferRange" fn(GLenum, GLintptr, GLsizeiptr, GLbitfield) -> Ptr;
    unmap_buffer: gles "glUnmapBuffer" fn(GLenum) -> GLboolean;

    gen_renderbuffers: gles "glGenRenderbuffers" fn(GLsizei, *mut GLuint);
    delete_renderbuffers: gles "glDeleteRenderbuffers" fn(GLsizei, *const GLuint);
    bind_renderbuffer: gles "glBindRenderbuffer" fn(GLenum, GLuint);
    renderbuffer_storage: gles "glRenderbufferStorage" fn(GLenum, GLenum, GLsizei, GLsizei);
    renderbuffer_storage_multisample: gles "glRenderbufferStorageMultisample" fn(GLenum, GLsizei, GLenum, GLsizei, GLsizei);

    gen_framebuffers: gles "glGenFramebuffers" fn(GLsizei, *mut GLuint);
    delete_framebuffers: gles "glDeleteFramebuffers" fn(GLsizei, *const GLuint);
    bind_framebuffer: gles "glBindFramebuffer" fn(GLenum, GLuint);
    framebuffer_texture_2d: gles "glFramebufferTexture2D" fn(GLenum, GLenum, GLenum, GLuint, GLint);
    framebuffer_renderbuffer: gles "glFramebufferRenderbuffer" fn(GLenum, GLenum, GLenum, GLuint);
    check_framebuffer_status: gles "glCheckFramebufferStatus" fn(GLenum) -> GLenum;

    pixel_store_i: gles "glPixelStorei" fn(GLenum, GLint);
    read_pixels: gles "glReadPixels" fn(GLint, GLint, GLsizei, GLsizei, GLenum, GLenum, Ptr);
    viewport: gles "glViewport" fn(GLint, GLint, GLsizei, GLsizei);

    draw_arrays: gles "glDrawArrays" fn(GLenum, GLint, GLsizei);
    draw_elements: gles "glDrawElements" fn(GLenum, GLsizei, GLenum, ConstPtr);

    create_shader: gles "glCreateShader" fn(GLenum) -> GLuint;
    shader_source: gles "glShaderSource" fn(GLuint, GLsizei, *const *const c_char, *const GLint);
    compile_shader: gles "glCompileShader" fn(GLuint);
    get_shader_i: gles "glGetShaderiv" fn(GLuint, GLenum, *mut GLint);
    delete_shader: gles "glDeleteShader" fn(GLuint);
    create_program: gles "glCreateProgram" fn() -> GLuint;
    attach_shader: gles "glAttachShader" fn(GLuint, GLuint);
    bind_attrib_location: gles "glBindAttribLocation" fn(GLuint, GLuint, *const c_char);
    link_program: gles "glLinkProgram" fn(GLuint);
    get_program_i: gles "glGetProgramiv" fn(GLuint, GLenum, *mut GLint);
    use_program: gles "glUseProgram" fn(GLuint);
    delete_program: gles "glDeleteProgram" fn(GLuint);
    get_uniform_location: gles "glGetUniformLocation" fn(GLuint, *const c_char) -> GLint;
    uniform_1i: gles "glUniform1i" fn(GLint, GLint);
    enable_vertex_attrib_array: gles "glEnableVertexAttribArray" fn(GLuint);
    vertex_attrib_pointer: gles "glVertexAttribPointer" fn(GLuint, GLint, GLenum, GLboolean, GLsizei, ConstPtr);
}

fn egl_ok(value: EGLBoolean) -> bool {
    value != 0
}

fn attribute_pointer(attributes: &[EGLint]) -> *const EGLint {
    if attributes.is_empty() {
        ptr::null()
    } else {
        attributes.as_ptr()
    }
}

fn c_name(name: &str) -> Option<CString> {
    match CString::new(name) {
        Ok(name) => Some(name),
        Err(_) => {
            warn!("GL name {:?} contains a NUL byte", name);
            None
        },
    }
}

/// Calls the real driver through the trampolines, so the spy's own GL work
/// is never intercepted.
pub struct RealGl {
    procs: &'static GlProcs,
}

impl RealGl {
    pub fn new(procs: &'static GlProcs) -> Self {
        Self { procs }
    }
}

impl GlDriver for RealGl {
    fn egl_get_current_display(&self) -> EglDisplay {
        handle(unsafe { (self.procs.egl_get_current_display)() })
    }

    fn egl_get_current_context(&self) -> EglContext {
        handle(unsafe { (self.procs.egl_get_current_context)() })
    }

    fn egl_get_current_surface(&self, which: EGLint) -> EglSurface {
        handle(unsafe { (self.procs.egl_get_current_surface)(which) })
    }

    fn egl_create_context(&self, display: EglDisplay, config: EglConfig, share: EglContext, attributes: &[EGLint]) -> EglContext {
        handle(unsafe {
            (self.procs.egl_create_context)(pointer(display), pointer(config), pointer(share), attribute_pointer(attributes))
        })
    }

    fn egl_destroy_context(&self, display: EglDisplay, context: EglContext) -> bool {
        egl_ok(unsafe { (self.procs.egl_destroy_context)(pointer(display), pointer(context)) })
    }

    fn egl_make_current(&self, display: EglDisplay, draw: EglSurface, read: EglSurface, context: EglContext) -> bool {
        egl_ok(unsafe {
            (self.procs.egl_make_current)(pointer(display), pointer(draw), pointer(read), pointer(context))
        })
    }

    fn egl_swap_buffers(&self, display: EglDisplay, surface: EglSurface) -> bool {
        egl_ok(unsafe { (self.procs.egl_swap_buffers)(pointer(display), pointer(surface)) })
    }

    fn egl_query_surface(&self, display: EglDisplay, surface: EglSurface, attribute: EGLint) -> Option<EGLint> {
        let mut value = 0;
        let ok = unsafe { (self.procs.egl_query_surface)(pointer(display), pointer(surface), attribute, &mut value) };
        egl_ok(ok).then_some(value)
    }

    fn egl_create_image(
        &self,
        display: EglDisplay,
        context: EglContext,
        target: EGLenum,
        buffer: u64,
        attributes: &[EGLint],
    ) -> EglImage {
        handle(unsafe {
            (self.procs.egl_create_image)(
                pointer(display),
                pointer(context),
                target,
                pointer(buffer),
                attribute_pointer(attributes),
            )
        })
    }

    fn egl_destroy_image(&self, display: EglDisplay, image: EglImage) -> bool {
        egl_ok(unsafe { (self.procs.egl_destroy_image)(pointer(display), pointer(image)) })
    }

    fn get_error(&self) -> GLenum {
        unsafe { (self.procs.get_error)() }
    }

    fn get_integer(&self, name: GLenum) -> GLint {
        let mut value = 0;
        unsafe { (self.procs.get_integer)(name, &mut value) };
        value
    }

    fn gen_textures(&self, names: &mut [GLuint]) {
        unsafe { (self.procs.gen_textures)(names.len() as GLsizei, names.as_mut_ptr()) }
    }

    fn delete_textures(&self, names: &[GLuint]) {
        unsafe { (self.procs.delete_textures)(names.len() as GLsizei, names.as_ptr()) }
    }

    fn bind_texture(&self, target: GLenum, texture: GLuint) {
        unsafe { (self.procs.bind_texture)(target, texture) }
    }

    fn active_texture(&self, unit: GLenum) {
        unsafe { (self.procs.active_texture)(unit) }
    }

    fn tex_parameter_i(&self, target: GLenum, name: GLenum, value: GLint) {
        unsafe { (self.procs.tex_parameter_i)(target, name, value) }
    }

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
    ) {
        unsafe {
            (self.procs.tex_image_2d)(
                target, level, internal_format, width, height, border, format, ty,
                pixels.base().as_ptr(),
            )
        }
    }

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
    ) {
        unsafe {
            (self.procs.tex_sub_image_2d)(target, level, x, y, width, height, format, ty, pixels.base().as_ptr())
        }
    }

    fn compressed_tex_image_2d(
        &self,
        target: GLenum,
        level: GLint,
        internal_format: GLenum,
        width: GLsizei,
        height: GLsizei,
        border: GLint,
        data: Slice<u8>,
    ) {
        unsafe {
            (self.procs.compressed_tex_image_2d)(
                target, level, internal_format, width, height, border,
                data.count() as GLsizei,
                data.base().as_ptr(),
            )
        }
    }

    fn tex_storage_2d(&self, target: GLenum, levels: GLsizei, internal_format: GLenum, width: GLsizei, height: GLsizei) {
        unsafe { (self.procs.tex_storage_2d)(target, levels, internal_format, width, height) }
    }

    fn tex_storage_2d_multisample(
        &self,
        target: GLenum,
        samples: GLsizei,
        internal_format: GLenum,
        width: GLsizei,
        height: GLsizei,
        fixed_locations: bool,
    ) {
        unsafe {
            (self.procs.tex_storage_2d_multisample)(
                target, samples, internal_format, width, height, fixed_locations as GLboolean,
            )
        }
    }

    fn egl_image_target_texture_2d(&self, target: GLenum, image: EglImage) {
        unsafe { (self.procs.egl_image_target_texture_2d)(target, pointer(image)) }
    }

    fn gen_buffers(&self, names: &mut [GLuint]) {
        unsafe { (self.procs.gen_buffers)(names.len() as GLsizei, names.as_mut_ptr()) }
    }

    fn delete_buffers(&self, names: &[GLuint]) {
        unsafe { (self.procs.delete_buffers)(names.len() as GLsizei, names.as_ptr()) }
    }

    fn bind_buffer(&self, target: GLenum, buffer: GLuint) {
        unsafe { (self.procs.bind_buffer)(target, buffer) }
    }

    fn buffer_data(&self, target: GLenum, size: GLsizeiptr, data: Slice<u8>, usage: GLenum) {
        unsafe { (self.procs.buffer_data)(target, size, data.base().as_ptr(), usage) }
    }

    fn buffer_sub_data(&self, target: GLenum, offset: GLintptr, data: Slice<u8>) {
        unsafe { (self.procs.buffer_sub_data)(target, offset, data.count() as GLsizeiptr, data.base().as_ptr()) }
    }

    fn map_buffer_range(&self, target: GLenum, offset: GLintptr, length: GLsizeiptr, access: GLbitfield) -> *mut c_void {
        unsafe { (self.procs.map_buffer_range)(target, offset, length, access) }
    }

    fn unmap_buffer(&self, target: GLenum) -> bool {
        unsafe { (self.procs.unmap_buffer)(target) != 0 }
    }

    fn gen_renderbuffers(&self, names: &mut [GLuint]) {
        unsafe { (self.procs.gen_renderbuffers)(names.len() as GLsizei, names.as_mut_ptr()) }
    }

    fn delete_renderbuffers(&self, names: &[GLuint]) {
        unsafe { (self.procs.delete_renderbuffers)(names.len() as GLsizei, names.as_ptr()) }
    }

    fn bind_renderbuffer(&self, target: GLenum, renderbuffer: GLuint) {
        unsafe { (self.procs.bind_renderbuffer)(target, renderbuffer) }
    }

    fn renderbuffer_storage_multisample(
        &self,
        target: GLenum,
        samples: GLsizei,
        internal_format: GLenum,
        width: GLsizei,
        height: GLsizei,
    ) {
        unsafe {
            if samples == 0 {
                (self.procs.renderbuffer_storage)(target, internal_format, width, height)
            } else {
                (self.procs.renderbuffer_storage_multisample)(target, samples, internal_format, width, height)
            }
        }
    }

    fn gen_framebuffers(&self, names: &mut [GLuint]) {
        unsafe { (self.procs.gen_framebuffers)(names.len() as GLsizei, names.as_mut_ptr()) }
    }

    fn delete_framebuffers(&self, names: &[GLuint]) {
        unsafe { (self.procs.delete_framebuffers)(names.len() as GLsizei, names.as_ptr()) }
    }

    fn bind_framebuffer(&self, target: GLenum, framebuffer: GLuint) {
        unsafe { (self.procs.bind_framebuffer)(target, framebuffer) }
    }

    fn framebuffer_texture_2d(&self, target: GLenum, attachment: GLenum, tex_target: GLenum, texture: GLuint, level: GLint) {
        unsafe { (self.procs.framebuffer_texture_2d)(target, attachment, tex_target, texture, level) }
    }

    fn framebuffer_renderbuffer(&self, target: GLenum, attachment: GLenum, rb_target: GLenum, renderbuffer: GLuint) {
        unsafe { (self.procs.framebuffer_renderbuffer)(target, attachment, rb_target, renderbuffer) }
    }

    fn check_framebuffer_status(&self, target: GLenum) -> GLenum {
        unsafe { (self.procs.check_framebuffer_status)(target) }
    }

    fn pixel_store_i(&self, name: GLenum, value: GLint) {
        unsafe { (self.procs.pixel_store_i)(name, value) }
    }

    fn read_pixels(
        &self,
        x: GLint,
        y: GLint,
        width: GLsizei,
        height: GLsizei,
        format: GLenum,
        ty: GLenum,
        out: &mut [u8],
    ) {
        unsafe { (self.procs.read_pixels)(x, y, width, height, format, ty, out.as_mut_ptr() as Ptr) }
    }

    fn viewport(&self, x: GLint, y: GLint, width: GLsizei, height: GLsizei) {
        unsafe { (self.procs.viewport)(x, y, width, height) }
    }

    fn draw_arrays(&self, mode: GLenum, first: GLint, count: GLsizei) {
        unsafe { (self.procs.draw_arrays)(mode, first, count) }
    }

    fn draw_elements(&self, mode: GLenum, count: GLsizei, ty: GLenum, indices: usize) {
        unsafe { (self.procs.draw_elements)(mode, count, ty, indices as ConstPtr) }
    }

    fn create_shader(&self, ty: GLenum) -> GLuint {
        unsafe { (self.procs.create_shader)(ty) }
    }

    fn shader_source(&self, shader: GLuint, source: &str) {
        let text = source.as_ptr() as *const c_char;
        let length = source.len() as GLint;
        unsafe { (self.procs.shader_source)(shader, 1, &text, &length) }
    }

    fn compile_shader(&self, shader: GLuint) {
        unsafe { (self.procs.compile_shader)(shader) }
    }

    fn get_shader_i(&self, shader: GLuint, name: GLenum) -> GLint {
        let mut value = 0;
        unsafe { (self.procs.get_shader_i)(shader, name, &mut value) };
        value
    }

    fn delete_shader(&self, shader: GLuint) {
        unsafe { (self.procs.delete_shader)(shader) }
    }

    fn create_program(&self) -> GLuint {
        unsafe { (self.procs.create_program)() }
    }

    fn attach_shader(&self, program: GLuint, shader: GLuint) {
        unsafe { (self.procs.attach_shader)(program, shader) }
    }

    fn bind_attrib_location(&self, program: GLuint, index: GLuint, name: &str) {
        if let Some(name) = c_name(name) {
            unsafe { (self.procs.bind_attrib_location)(program, index, name.as_ptr()) }
        }
    }

    fn link_program(&self, program: GLuint) {
        unsafe { (self.procs.link_program)(program) }
    }

    fn get_program_i(&self, program: GLuint, name: GLenum) -> GLint {
        let mut value = 0;
        unsafe { (self.procs.get_program_i)(program, name, &mut value) };
        value
    }

    fn use_program(&self, program: GLuint) {
        unsafe { (self.procs.use_program)(program) }
    }

    fn delete_program(&self, program: GLuint) {
        unsafe { (self.procs.delete_program)(program) }
    }

    fn get_uniform_location(&self, program: GLuint, name: &str) -> GLint {
        match c_name(name) {
            Some(name) => unsafe { (self.procs.get_uniform_location)(program, name.as_ptr()) },
            None => -1,
        }
    }

    fn uniform_1i(&self, location: GLint, value: GLint) {
        unsafe { (self.procs.uniform_1i)(location, value) }
    }

    fn enable_vertex_attrib_array(&self, index: GLuint) {
        unsafe { (self.procs.enable_vertex_attrib_array)(index) }
    }

    fn vertex_attrib_pointer(&self, index: GLuint, size: GLint, ty: GLenum, normalized: bool, stride: GLsizei, pointer: usize) {
        unsafe {
            (self.procs.vertex_attrib_pointer)(index, size, ty, normalized as GLboolean, stride, pointer as ConstPtr)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::driver::*;

    #[test]
    fn handles_survive_the_trip_through_a_pointer() {
        assert_eq!(handle(pointer(0xdead_0000)), 0xdead_0000);
        assert!(pointer(0).is_null());
    }

    #[test]
    fn empty_attribute_lists_reach_the_driver_as_null() {
        assert!(attribute_pointer(&[]).is_null());
        assert!(!attribute_pointer(&[EGL_NONE]).is_null());
    }

    #[test]
    fn names_with_nul_bytes_are_refused() {
        assert!(c_name("a_position").is_some());
        assert!(c_name("a\0b").is_none());
    }

    #[test]
    fn missing_libraries_are_reported() {
        let result = Library::open("libspyglass-does-not-exist.so");

        assert!(matches!(result, Err(InterceptError::Open { .. })));
    }
}
