use std::cell::Cell;
use std::mem;

use paste::paste;
use retour::RawDetour;
use spyglass::gles::gl::*;
use spyglass::memory::{Address, Slice};

use crate::driver::{handle, pointer, ConstPtr, EGLBoolean, GlProcs, Ptr};
use crate::error::InterceptError;
use crate::procs;

thread_local! {
    static INSIDE_SPY: Cell<bool> = const { Cell::new(false) };
}

/// Runs `spied` unless this thread is already inside the spy, in which case
/// the driver is calling one of its own entry points and `forward` runs.
fn guarded<R>(spied: impl FnOnce() -> Option<R>, forward: impl FnOnce() -> R) -> R {
    if INSIDE_SPY.with(|inside| inside.replace(true)) {
        return forward();
    }

    let result = spied();
    INSIDE_SPY.with(|inside| inside.set(false));
    result.unwrap_or_else(forward)
}

fn count(n: GLsizei) -> u64 {
    n.max(0) as u64
}

fn byte_count(n: GLsizeiptr) -> u64 {
    n.max(0) as u64
}

fn egl_bool(value: bool) -> EGLBoolean {
    value as EGLBoolean
}

/// The attribute list up to and including its `EGL_NONE` terminator.
///
/// # Safety
/// `attributes` must be null or a terminated EGL attribute list.
pub unsafe fn attribute_list(attributes: *const EGLint) -> Slice<EGLint> {
    if attributes.is_null() {
        return Slice::from_app_ptr(attributes, 0);
    }

    let mut length = 0;
    while *attributes.add(length) != EGL_NONE {
        length += 2;
    }
    Slice::from_app_ptr(attributes, length as u64 + 1)
}

macro_rules! detours {
    ($($field:ident $symbol:literal: fn($($arg:ident: $ty:ty),*) $(-> $ret:ty)? = |$spy:ident, $o:ident, $gl:ident| $body:expr;)*) => {
        paste! {
            $(
                unsafe extern "C" fn [<detour_ $field>]($($arg: $ty),*) $(-> $ret)? {
                    let procs = procs();
                    guarded(
                        || spyglass::get().and_then(|spy| {
                            spy.gles($symbol, |$spy, $o, $gl| $body)
                        }),
                        || (procs.$field)($($arg),*),
                    )
                }
            )*

            /// Creates a detour for every intercepted entry point and points
            /// `procs` at the trampolines. The detours start disabled.
            pub fn create(procs: &mut GlProcs) -> Result<Vec<(&'static str, RawDetour)>, InterceptError> {
                let mut detours = Vec::new();
                $(
                    let detour = unsafe {
                        RawDetour::new(procs.$field as *const (), [<detour_ $field>] as *const ())
                    }.map_err(|source| InterceptError::Hook { symbol: $symbol, source })?;

                    procs.$field = unsafe { mem::transmute(detour.trampoline() as *const ()) };
                    detours.push(($symbol, detour));
                )*
                Ok(detours)
            }
        }
    };
}

detours! {
    egl_create_context "eglCreateContext": fn(display: Ptr, config: Ptr, share: Ptr, attributes: *const EGLint) -> Ptr =
        |spy, o, gl| pointer(spy.create_context(
            o, gl, handle(display), handle(config), handle(share), attribute_list(attributes),
        ));
    egl_destroy_context "eglDestroyContext": fn(display: Ptr, context: Ptr) -> EGLBoolean =
        |spy, o, gl| egl_bool(spy.destroy_context(o, gl, handle(display), handle(context)));
    egl_make_current "eglMakeCurrent": fn(display: Ptr, draw: Ptr, read: Ptr, context: Ptr) -> EGLBoolean =
        |spy, o, gl| egl_bool(spy.make_current(o, gl, handle(display), handle(draw), handle(read), handle(context)));
    egl_swap_buffers "eglSwapBuffers": fn(display: Ptr, surface: Ptr) -> EGLBoolean =
        |spy, o, gl| egl_bool(spy.swap_buffers(o, gl, handle(display), handle(surface)));
    egl_create_image "eglCreateImageKHR": fn(display: Ptr, context: Ptr, target: EGLenum, buffer: Ptr, attributes: *const EGLint) -> Ptr =
        |spy, o, gl| pointer(spy.create_image(
            o, gl, handle(display), handle(context), target, handle(buffer), attribute_list(attributes),
        ));
    egl_destroy_image "eglDestroyImageKHR": fn(display: Ptr, image: Ptr) -> EGLBoolean =
        |spy, o, gl| egl_bool(spy.destroy_image(o, gl, handle(display), handle(image)));

    get_error "glGetError": fn() -> GLenum = |spy, o, gl| spy.get_error(o, gl);

    gen_textures "glGenTextures": fn(n: GLsizei, names: *mut GLuint) =
        |spy, o, gl| spy.gen_textures(o, gl, Slice::from_app_ptr(names as *const GLuint, count(n)));
    delete_textures "glDeleteTextures": fn(n: GLsizei, names: *const GLuint) =
        |spy, o, gl| spy.delete_textures(o, gl, Slice::from_app_ptr(names, count(n)));
    bind_texture "glBindTexture": fn(target: GLenum, texture: GLuint) = |spy, o, gl| spy.bind_texture(o, gl, target, texture);
    active_texture "glActiveTexture": fn(unit: GLenum) = |spy, o, gl| spy.active_texture(o, gl, unit);
    pixel_store_i "glPixelStorei": fn(name: GLenum, value: GLint) = |spy, o, gl| spy.pixel_store(o, gl, name, value);
    tex_image_2d "glTexImage2D": fn(
        target: GLenum, level: GLint, internal_format: GLint, width: GLsizei, height: GLsizei,
        border: GLint, format: GLenum, ty: GLenum, pixels: ConstPtr
    ) = |spy, o, gl| spy.tex_image_2d(
        o, gl, target, level, internal_format, width, height, border, format, ty, Address::from_ptr(pixels),
    );
    tex_sub_image_2d "glTexSubImage2D": fn(
        target: GLenum, level: GLint, x: GLint, y: GLint, width: GLsizei, height: GLsizei,
        format: GLenum, ty: GLenum, pixels: ConstPtr
    ) = |spy, o, gl| spy.tex_sub_image_2d(
        o, gl, target, level, x, y, width, height, format, ty, Address::from_ptr(pixels),
    );
    compressed_tex_image_2d "glCompressedTexImage2D": fn(
        target: GLenum, level: GLint, internal_format: GLenum, width: GLsizei, height: GLsizei,
        border: GLint, size: GLsizei, data: ConstPtr
    ) = |spy, o, gl| spy.compressed_tex_image_2d(
        o, gl, target, level, internal_format, width, height, border,
        Slice::from_app_ptr(data as *const u8, count(size)),
    );
    tex_storage_2d "glTexStorage2D": fn(target: GLenum, levels: GLsizei, internal_format: GLenum, width: GLsizei, height: GLsizei) =
        |spy, o, gl| spy.tex_storage_2d(o, gl, target, levels, internal_format, width, height);
    tex_storage_2d_multisample "glTexStorage2DMultisample": fn(
        target: GLenum, samples: GLsizei, internal_format: GLenum, width: GLsizei, height: GLsizei,
        fixed_locations: GLboolean
    ) = |spy, o, gl| spy.tex_storage_2d_multisample(
        o, gl, target, samples, internal_format, width, height, fixed_locations != 0,
    );
    egl_image_target_texture_2d "glEGLImageTargetTexture2DOES": fn(target: GLenum, image: Ptr) =
        |spy, o, gl| spy.egl_image_target_texture_2d(o, gl, target, handle(image));

    gen_buffers "glGenBuffers": fn(n: GLsizei, names: *mut GLuint) =
        |spy, o, gl| spy.gen_buffers(o, gl, Slice::from_app_ptr(names as *const GLuint, count(n)));
    delete_buffers "glDeleteBuffers": fn(n: GLsizei, names: *const GLuint) =
        |spy, o, gl| spy.delete_buffers(o, gl, Slice::from_app_ptr(names, count(n)));
    bind_buffer "glBindBuffer": fn(target: GLenum, buffer: GLuint) = |spy, o, gl| spy.bind_buffer(o, gl, target, buffer);
    buffer_data "glBufferData": fn(target: GLenum, size: GLsizeiptr, data: ConstPtr, usage: GLenum) =
        |spy, o, gl| spy.buffer_data(o, gl, target, size, Slice::from_app_ptr(data as *const u8, byte_count(size)), usage);
    buffer_sub_data "glBufferSubData": fn(target: GLenum, offset: GLintptr, size: GLsizeiptr, data: ConstPtr) =
        |spy, o, gl| spy.buffer_sub_data(o, gl, target, offset, Slice::from_app_ptr(data as *const u8, byte_count(size)));
    map_buffer_range "glMapBufferRange": fn(target: GLenum, offset: GLintptr, length: GLsizeiptr, access: GLbitfield) -> Ptr =
        |spy, o, gl| spy.map_buffer_range(o, gl, target, offset, length, access);
    unmap_buffer "glUnmapBuffer": fn(target: GLenum) -> GLboolean = |spy, o, gl| spy.unmap_buffer(o, gl, target) as GLboolean;

    gen_renderbuffers "glGenRenderbuffers": fn(n: GLsizei, names: *mut GLuint) =
        |spy, o, gl| spy.gen_renderbuffers(o, gl, Slice::from_app_ptr(names as *const GLuint, count(n)));
    delete_renderbuffers "glDeleteRenderbuffers": fn(n: GLsizei, names: *const GLuint) =
        |spy, o, gl| spy.delete_renderbuffers(o, gl, Slice::from_app_ptr(names, count(n)));
    bind_renderbuffer "glBindRenderbuffer": fn(target: GLenum, renderbuffer: GLuint) =
        |spy, o, gl| spy.bind_renderbuffer(o, gl, target, renderbuffer);
    renderbuffer_storage "glRenderbufferStorage": fn(target: GLenum, internal_format: GLenum, width: GLsizei, height: GLsizei) =
        |spy, o, gl| spy.renderbuffer_storage(o, gl, target, 0, internal_format, width, height);
    renderbuffer_storage_multisample "glRenderbufferStorageMultisample": fn(
        target: GLenum, samples: GLsizei, internal_format: GLenum, width: GLsizei, height: GLsizei
    ) = |spy, o, gl| spy.renderbuffer_storage(o, gl, target, samples, internal_format, width, height);

    gen_framebuffers "glGenFramebuffers": fn(n: GLsizei, names: *mut GLuint) =
        |spy, o, gl| spy.gen_framebuffers(o, gl, Slice::from_app_ptr(names as *const GLuint, count(n)));
    delete_framebuffers "glDeleteFramebuffers": fn(n: GLsizei, names: *const GLuint) =
        |spy, o, gl| spy.delete_framebuffers(o, gl, Slice::from_app_ptr(names, count(n)));
    bind_framebuffer "glBindFramebuffer": fn(target: GLenum, framebuffer: GLuint) =
        |spy, o, gl| spy.bind_framebuffer(o, gl, target, framebuffer);
    framebuffer_texture_2d "glFramebufferTexture2D": fn(target: GLenum, attachment: GLenum, tex_target: GLenum, texture: GLuint, level: GLint) =
        |spy, o, gl| spy.framebuffer_texture_2d(o, gl, target, attachment, tex_target, texture, level);
    framebuffer_renderbuffer "glFramebufferRenderbuffer": fn(target: GLenum, attachment: GLenum, rb_target: GLenum, renderbuffer: GLuint) =
        |spy, o, gl| spy.framebuffer_renderbuffer(o, gl, target, attachment, rb_target, renderbuffer);

    create_shader "glCreateShader": fn(ty: GLenum) -> GLuint = |spy, o, gl| spy.create_shader(o, gl, ty);
    delete_shader "glDeleteShader": fn(shader: GLuint) = |spy, o, gl| spy.delete_shader(o, gl, shader);
    create_program "glCreateProgram": fn() -> GLuint = |spy, o, gl| spy.create_program(o, gl);
    delete_program "glDeleteProgram": fn(program: GLuint) = |spy, o, gl| spy.delete_program(o, gl, program);

    draw_arrays "glDrawArrays": fn(mode: GLenum, first: GLint, count: GLsizei) =
        |spy, o, gl| spy.draw_arrays(o, gl, mode, first, count);
    draw_elements "glDrawElements": fn(mode: GLenum, count: GLsizei, ty: GLenum, indices: ConstPtr) =
        |spy, o, gl| spy.draw_elements(o, gl, mode, count, ty, indices as usize);
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use spyglass::gles::gl::*;

    use crate::detours::*;

    #[test]
    fn attribute_lists_include_their_terminator() {
        let attributes = [EGL_CONTEXT_CLIENT_VERSION, 3, EGL_WIDTH, 64, EGL_NONE];
        let list = unsafe { attribute_list(attributes.as_ptr()) };

        assert_eq!(list.count(), 5);
        assert_eq!(unsafe { attribute_list(std::ptr::null()) }.count(), 0);
    }

    #[test]
    fn reentrant_calls_go_straight_to_the_driver() {
        let forwarded = Cell::new(0);

        let outer = guarded(
            || Some(guarded(|| Some("spied"), || { forwarded.set(forwarded.get() + 1); "forwarded" })),
            || "forwarded",
        );

        assert_eq!(outer, "forwarded");
        assert_eq!(forwarded.get(), 1);
        assert_eq!(guarded(|| Some("spied"), || "forwarded"), "spied");
    }

    #[test]
    fn calls_without_a_spy_are_forwarded() {
        assert_eq!(guarded(|| None, || 7), 7);
    }
}
