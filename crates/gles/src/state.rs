//! Shadow copies of the driver objects the application created.

use std::sync::Arc;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::gl::*;

pub type ShareGroupId = u32;

/// An EGL image. Textures created from it hold a reference, so the image's
/// description outlives `eglDestroyImage` for as long as a texture uses it.
#[derive(Debug, PartialEq, Eq)]
pub struct EglImageInfo {
    pub handle: EglImage,
    pub target: EGLenum,
    pub width: i32,
    pub height: i32,
    pub internal_format: GLenum,
    /// Texture the image was created from, for `EGL_GL_TEXTURE_2D` images.
    pub source_texture: Option<GLuint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    pub width: i32,
    pub height: i32,
    pub internal_format: GLenum,
    /// Client format and type of the last full upload, when uncompressed.
    pub format: GLenum,
    pub ty: GLenum,
}

impl Level {
    pub fn is_compressed(&self) -> bool {
        crate::formats::is_compressed(self.internal_format)
    }

    pub fn is_depth(&self) -> bool {
        crate::formats::is_depth(self.internal_format)
    }
}

#[derive(Debug, Clone)]
pub struct Texture {
    pub name: GLuint,
    /// Zero until the texture is first bound.
    pub target: GLenum,
    /// Keyed on (face target, level); face is the texture target for
    /// non-cube textures.
    pub levels: BTreeMap<(GLenum, GLint), Level>,
    pub samples: i32,
    pub egl_image: Option<Arc<EglImageInfo>>,
}

impl Texture {
    pub fn new(name: GLuint) -> Self {
        Self { name, target: 0, levels: BTreeMap::new(), samples: 0, egl_image: None }
    }

    pub fn level(&self, face: GLenum, level: GLint) -> Option<&Level> {
        self.levels.get(&(face, level))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub offset: i64,
    pub length: i64,
    pub access: GLbitfield,
    pub pointer: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Buffer {
    pub name: GLuint,
    pub size: i64,
    pub usage: GLenum,
    pub mapping: Option<Mapping>,
}

impl Buffer {
    pub fn new(name: GLuint) -> Self {
        Self { name, ..Default::default() }
    }

    pub fn is_partially_mapped(&self) -> bool {
        match self.mapping {
            Some(m) => m.offset != 0 || m.length != self.size,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Renderbuffer {
    pub name: GLuint,
    pub internal_format: GLenum,
    pub width: i32,
    pub height: i32,
    pub samples: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    Texture { name: GLuint, face: GLenum, level: GLint },
    Renderbuffer(GLuint),
}

#[derive(Debug, Clone, Default)]
pub struct Framebuffer {
    pub name: GLuint,
    pub attachments: BTreeMap<GLenum, Attachment>,
}

/// Objects shared between contexts created with a common share context.
#[derive(Debug, Default)]
pub struct ShareGroup {
    pub textures: BTreeMap<GLuint, Texture>,
    pub buffers: BTreeMap<GLuint, Buffer>,
    pub renderbuffers: BTreeMap<GLuint, Renderbuffer>,
    pub programs: BTreeSet<GLuint>,
    pub shaders: BTreeSet<GLuint>,
    pub contexts: u32,
}

#[derive(Debug, Default, Clone)]
pub struct Bindings {
    pub active_texture: GLenum,
    /// Texture bound per (unit, target).
    pub textures: HashMap<(GLenum, GLenum), GLuint>,
    pub array_buffer: GLuint,
    pub element_array_buffer: GLuint,
    pub other_buffers: HashMap<GLenum, GLuint>,
    pub renderbuffer: GLuint,
    pub draw_framebuffer: GLuint,
    pub read_framebuffer: GLuint,
}

impl Bindings {
    pub fn texture(&self, target: GLenum) -> GLuint {
        let unit = if self.active_texture == 0 { GL_TEXTURE0 } else { self.active_texture };
        self.textures.get(&(unit, target)).copied().unwrap_or(0)
    }

    pub fn buffer(&self, target: GLenum) -> GLuint {
        match target {
            GL_ARRAY_BUFFER => self.array_buffer,
            GL_ELEMENT_ARRAY_BUFFER => self.element_array_buffer,
            other => self.other_buffers.get(&other).copied().unwrap_or(0),
        }
    }
}

#[derive(Debug)]
pub struct Context {
    pub handle: EglContext,
    pub display: EglDisplay,
    pub config: EglConfig,
    pub share_group: ShareGroupId,
    pub bindings: Bindings,
    pub framebuffers: BTreeMap<GLuint, Framebuffer>,
    pub unpack_alignment: i32,
    pub draw_surface: EglSurface,
    /// Error the spy consumed from the driver that the application has not
    /// yet retrieved with `glGetError`.
    pub pending_error: Option<GLenum>,
    pub destroyed: bool,
    /// Threads this context is current on; at most one by EGL rules.
    pub current_on: Option<u64>,
}

impl Context {
    pub fn new(handle: EglContext, display: EglDisplay, config: EglConfig, share_group: ShareGroupId) -> Self {
        Self {
            handle,
            display,
            config,
            share_group,
            bindings: Bindings { active_texture: GL_TEXTURE0, ..Default::default() },
            framebuffers: BTreeMap::new(),
            unpack_alignment: 4,
            draw_surface: EGL_NO_SURFACE,
            pending_error: None,
            destroyed: false,
            current_on: None,
        }
    }
}
