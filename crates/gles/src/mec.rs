//! Reconstruction of GLES object contents when capture starts late.
//!
//! GL has no call that dumps an arbitrary object to memory, so every object
//! is read back through a private context that shares the application's
//! objects: color levels are attached to a scratch framebuffer and read with
//! `glReadPixels`; compressed, depth and external textures are first drawn
//! into an RGBA8 texture with a full screen quad.

use std::collections::HashMap;

use log::{debug, info, warn};
use thiserror::Error;
use spyglass_encoder::{InitialState, Message, Value};
use spyglass_memory::{Address, PoolId, Slice};
use spyglass_observer::CallObserver;

use crate::formats;
use crate::gl::*;
use crate::state::{Attachment, Buffer, Level, Renderbuffer, Texture};
use crate::{GlDriver, GlesSpy};

#[derive(Debug, Error)]
pub enum MecError {
    #[error("could not create a context sharing with {0:#x}")]
    ContextCreation(EglContext),
    #[error("could not make the capture context current")]
    MakeCurrent,
    #[error("framebuffer incomplete ({0:#x})")]
    IncompleteFramebuffer(GLenum),
    #[error("GL error {0:#x}")]
    Gl(GLenum),
    #[error("resample shader failed to build")]
    Shader,
    #[error("{0} is not supported")]
    Unsupported(&'static str),
}

const VERTEX_SHADER: &str = "#version 300 es
in vec2 a_position;
out vec2 v_uv;
void main() {
    v_uv = a_position * 0.5 + 0.5;
    gl_Position = vec4(a_position, 0.0, 1.0);
}
";

const COLOR_SHADER: &str = "#version 300 es
precision highp float;
uniform sampler2D u_texture;
uniform int u_level;
in vec2 v_uv;
out vec4 color;
void main() {
    color = textureLod(u_texture, v_uv, float(u_level));
}
";

// Spreads 24 bits of depth over red (high), green and blue (low).
const DEPTH_SHADER: &str = "#version 300 es
precision highp float;
uniform highp sampler2D u_texture;
uniform int u_level;
in vec2 v_uv;
out vec4 color;
void main() {
    float d = textureLod(u_texture, v_uv, float(u_level)).r * 16777215.0;
    float hi = floor(d / 65536.0);
    float mid = floor((d - hi * 65536.0) / 256.0);
    float lo = d - hi * 65536.0 - mid * 256.0;
    color = vec4(hi, mid, lo, 255.0) / 255.0;
}
";

const EXTERNAL_SHADER: &str = "#version 300 es
#extension GL_OES_EGL_image_external_essl3 : require
precision highp float;
uniform samplerExternalOES u_texture;
uniform int u_level;
in vec2 v_uv;
out vec4 color;
void main() {
    color = texture(u_texture, v_uv);
}
";

static QUAD: [f32; 8] = [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Resample {
    Color,
    Depth,
    External,
}

impl Resample {
    fn fragment_shader(&self) -> &'static str {
        match self {
            Resample::Color => COLOR_SHADER,
            Resample::Depth => DEPTH_SHADER,
            Resample::External => EXTERNAL_SHADER,
        }
    }
}

/// Scratch objects living in the capture context.
struct Readback<'a> {
    gl: &'a dyn GlDriver,
    framebuffer: GLuint,
    programs: HashMap<Resample, GLuint>,
}

impl<'a> Readback<'a> {
    fn new(gl: &'a dyn GlDriver) -> Self {
        let mut framebuffer = [0];
        gl.gen_framebuffers(&mut framebuffer);
        gl.bind_framebuffer(GL_FRAMEBUFFER, framebuffer[0]);
        gl.pixel_store_i(GL_PACK_ALIGNMENT, 1);

        Self { gl, framebuffer: framebuffer[0], programs: HashMap::new() }
    }

    fn check(&self) -> Result<(), MecError> {
        match self.gl.get_error() {
            GL_NO_ERROR => Ok(()),
            error => Err(MecError::Gl(error)),
        }
    }

    fn attach(&self, attachment: Attachment) -> Result<(), MecError> {
        match attachment {
            Attachment::Texture { name, face, level } => {
                self.gl.framebuffer_texture_2d(GL_FRAMEBUFFER, GL_COLOR_ATTACHMENT0, face, name, level)
            },
            Attachment::Renderbuffer(name) => {
                self.gl.framebuffer_renderbuffer(GL_FRAMEBUFFER, GL_COLOR_ATTACHMENT0, GL_RENDERBUFFER, name)
            },
        }

        match self.gl.check_framebuffer_status(GL_FRAMEBUFFER) {
            GL_FRAMEBUFFER_COMPLETE => Ok(()),
            status => Err(MecError::IncompleteFramebuffer(status)),
        }
    }

    fn detach(&self) {
        self.gl.framebuffer_texture_2d(GL_FRAMEBUFFER, GL_COLOR_ATTACHMENT0, GL_TEXTURE_2D, 0, 0);
    }

    fn read(&self, attachment: Attachment, width: i32, height: i32, format: GLenum, ty: GLenum) -> Result<Vec<u8>, MecError> {
        self.attach(attachment)?;

        let size = formats::image_size(width, height, format, ty, 1)
            .ok_or(MecError::Unsupported("read back format"))?;
        let mut data = vec![0u8; size as usize];
        self.gl.read_pixels(0, 0, width, height, format, ty, &mut data);

        self.detach();
        self.check()?;
        Ok(data)
    }

    fn program(&mut self, kind: Resample) -> Result<GLuint, MecError> {
        if let Some(program) = self.programs.get(&kind) {
            return Ok(*program);
        }

        let gl = self.gl;
        let vertex = compile(gl, GL_VERTEX_SHADER, VERTEX_SHADER)?;
        let fragment = match compile(gl, GL_FRAGMENT_SHADER, kind.fragment_shader()) {
            Ok(shader) => shader,
            Err(e) => {
                gl.delete_shader(vertex);
                return Err(e);
            },
        };

        let program = gl.create_program();
        gl.attach_shader(program, vertex);
        gl.attach_shader(program, fragment);
        gl.bind_attrib_location(program, 0, "a_position");
        gl.link_program(program);
        gl.delete_shader(vertex);
        gl.delete_shader(fragment);

        if gl.get_program_i(program, GL_LINK_STATUS) == 0 {
            gl.delete_program(program);
            return Err(MecError::Shader);
        }

        self.programs.insert(kind, program);
        Ok(program)
    }

    /// Draws `level` of `source` into an RGBA8 texture and reads that back.
    fn resample(&mut self, kind: Resample, source: &Texture, level: GLint, width: i32, height: i32) -> Result<Vec<u8>, MecError> {
        let program = self.program(kind)?;
        let gl = self.gl;

        let mut target = [0];
        gl.gen_textures(&mut target);
        gl.active_texture(GL_TEXTURE0);
        gl.bind_texture(GL_TEXTURE_2D, target[0]);
        let empty = unsafe { Slice::new(Address::NULL, 0, PoolId::SCRATCH) };
        gl.tex_image_2d(GL_TEXTURE_2D, 0, GL_RGBA8 as GLint, width, height, 0, GL_RGBA, GL_UNSIGNED_BYTE, empty);

        let drawn = self.attach(Attachment::Texture { name: target[0], face: GL_TEXTURE_2D, level: 0 })
            .and_then(|_| {
                gl.viewport(0, 0, width, height);
                gl.use_program(program);
                gl.bind_texture(source.target, source.name);
                gl.uniform_1i(gl.get_uniform_location(program, "u_texture"), 0);
                gl.uniform_1i(gl.get_uniform_location(program, "u_level"), level);
                gl.enable_vertex_attrib_array(0);
                gl.vertex_attrib_pointer(0, 2, GL_FLOAT, false, 0, QUAD.as_ptr() as usize);
                gl.draw_arrays(GL_TRIANGLE_STRIP, 0, 4);
                self.check()
            });

        let data = drawn.and_then(|_| {
            self.read(Attachment::Texture { name: target[0], face: GL_TEXTURE_2D, level: 0 }, width, height, GL_RGBA, GL_UNSIGNED_BYTE)
        });

        gl.bind_texture(GL_TEXTURE_2D, 0);
        gl.delete_textures(&target);
        data
    }
}

impl Drop for Readback<'_> {
    fn drop(&mut self) {
        for program in self.programs.values() {
            self.gl.delete_program(*program);
        }
        self.gl.bind_framebuffer(GL_FRAMEBUFFER, 0);
        self.gl.delete_framebuffers(&[self.framebuffer]);
    }
}

fn compile(gl: &dyn GlDriver, ty: GLenum, source: &str) -> Result<GLuint, MecError> {
    let shader = gl.create_shader(ty);
    gl.shader_source(shader, source);
    gl.compile_shader(shader);

    if gl.get_shader_i(shader, GL_COMPILE_STATUS) == 0 {
        gl.delete_shader(shader);
        return Err(MecError::Shader);
    }
    Ok(shader)
}

/// Objects of one share group, copied out so the spy can be borrowed mutably
/// while they are read back.
struct GroupSnapshot {
    id: u32,
    context: EglContext,
    display: EglDisplay,
    config: EglConfig,
    textures: Vec<Texture>,
    buffers: Vec<Buffer>,
    renderbuffers: Vec<Renderbuffer>,
    programs: Vec<GLuint>,
    shaders: Vec<GLuint>,
}

/// Contents of one texture level and the format they are in.
struct LevelRead {
    data: Vec<u8>,
    format: GLenum,
    ty: GLenum,
    resampled: bool,
}

impl GlesSpy {
    /// Emits the state of every live object as initial-state records.
    ///
    /// Objects that cannot be read back are described without contents and
    /// logged; nothing here fails the capture.
    pub fn capture_state(&mut self, o: &mut CallObserver, gl: &dyn GlDriver) {
        info!("Capturing GLES state: {} contexts, {} share groups", self.contexts.len(), self.share_groups.len());
        o.enter(Message::Extra { name: "mid_execution_capture".to_string(), value: Value::Str("gles".to_string()) });

        self.emit_contexts(o);

        let mut groups: Vec<GroupSnapshot> = self.share_groups.iter()
            .filter_map(|(id, group)| {
                let context = self.contexts.values()
                    .filter(|c| c.share_group == *id && !c.destroyed)
                    .min_by_key(|c| c.handle)?;

                Some(GroupSnapshot {
                    id: *id,
                    context: context.handle,
                    display: context.display,
                    config: context.config,
                    textures: group.textures.values().cloned().collect(),
                    buffers: group.buffers.values().cloned().collect(),
                    renderbuffers: group.renderbuffers.values().cloned().collect(),
                    programs: group.programs.iter().copied().collect(),
                    shaders: group.shaders.iter().copied().collect(),
                })
            })
            .collect();
        groups.sort_by_key(|g| g.id);

        for group in groups {
            if let Err(e) = self.capture_group(o, gl, &group) {
                warn!("Share group {} contents not captured: {}", group.id, e);
            }
        }

        o.exit();
    }

    fn emit_contexts(&self, o: &mut CallObserver) {
        let mut contexts: Vec<_> = self.contexts.values().collect();
        contexts.sort_by_key(|c| c.handle);

        for context in contexts {
            o.encode(initial_state("Context", context.handle, vec![
                ("display", Value::Handle(context.display)),
                ("config", Value::Handle(context.config)),
                ("share_group", Value::U32(context.share_group)),
                ("draw_framebuffer", Value::U32(context.bindings.draw_framebuffer)),
                ("read_framebuffer", Value::U32(context.bindings.read_framebuffer)),
                ("current", Value::Bool(context.current_on.is_some())),
            ]));

            for framebuffer in context.framebuffers.values() {
                let attachments = framebuffer.attachments.iter()
                    .map(|(point, attachment)| {
                        let (kind, name, level) = match attachment {
                            Attachment::Texture { name, face, level } => (*face, *name, *level),
                            Attachment::Renderbuffer(name) => (GL_RENDERBUFFER, *name, 0),
                        };
                        Value::Array(vec![Value::U32(*point), Value::U32(kind), Value::U32(name), Value::I32(level)])
                    })
                    .collect();

                o.encode(initial_state("Framebuffer", framebuffer.name as u64, vec![
                    ("context", Value::Handle(context.handle)),
                    ("attachments", Value::Array(attachments)),
                ]));
            }
        }

        let mut images: Vec<_> = self.images.values().collect();
        images.sort_by_key(|i| i.handle);
        for image in images {
            o.encode(initial_state("EglImage", image.handle, vec![
                ("target", Value::U32(image.target)),
                ("width", Value::I32(image.width)),
                ("height", Value::I32(image.height)),
                ("internal_format", Value::U32(image.internal_format)),
                ("source_texture", Value::U32(image.source_texture.unwrap_or(0))),
            ]));
        }
    }

    fn capture_group(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, group: &GroupSnapshot) -> Result<(), MecError> {
        debug!("Capturing share group {} through context {:#x}", group.id, group.context);

        let temporary = gl.egl_create_context(
            group.display,
            group.config,
            group.context,
            &[EGL_CONTEXT_CLIENT_VERSION, 3, EGL_NONE],
        );
        if temporary == EGL_NO_CONTEXT {
            return Err(MecError::ContextCreation(group.context));
        }

        let previous = (
            gl.egl_get_current_display(),
            gl.egl_get_current_surface(EGL_DRAW),
            gl.egl_get_current_surface(EGL_READ),
            gl.egl_get_current_context(),
        );

        if !gl.egl_make_current(group.display, EGL_NO_SURFACE, EGL_NO_SURFACE, temporary) {
            gl.egl_destroy_context(group.display, temporary);
            return Err(MecError::MakeCurrent);
        }

        {
            let mut readback = Readback::new(gl);
            for buffer in &group.buffers {
                self.capture_buffer(o, gl, buffer);
            }
            for renderbuffer in &group.renderbuffers {
                self.capture_renderbuffer(o, &readback, renderbuffer);
            }
            for texture in &group.textures {
                self.capture_texture(o, &mut readback, texture);
            }
        }

        for program in &group.programs {
            o.encode(initial_state("Program", *program as u64, vec![("share_group", Value::U32(group.id))]));
        }
        for shader in &group.shaders {
            o.encode(initial_state("Shader", *shader as u64, vec![("share_group", Value::U32(group.id))]));
        }

        let (display, draw, read, context) = previous;
        if context != EGL_NO_CONTEXT {
            gl.egl_make_current(display, draw, read, context);
        } else {
            gl.egl_make_current(group.display, EGL_NO_SURFACE, EGL_NO_SURFACE, EGL_NO_CONTEXT);
        }
        gl.egl_destroy_context(group.display, temporary);
        Ok(())
    }

    fn capture_buffer(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, buffer: &Buffer) {
        let mut fields = vec![
            ("size", Value::I64(buffer.size)),
            ("usage", Value::U32(buffer.usage)),
            ("mapped", Value::Bool(buffer.mapping.is_some())),
        ];

        match read_buffer(gl, buffer) {
            Ok(Some(data)) => {
                let pool = emit_contents(o, &data);
                fields.push(("pool", Value::U32(pool)));
            },
            Ok(None) => {},
            Err(e) => warn!("Buffer {} contents not captured: {}", buffer.name, e),
        }

        o.encode(initial_state("Buffer", buffer.name as u64, fields));
    }

    fn capture_renderbuffer(&mut self, o: &mut CallObserver, readback: &Readback, renderbuffer: &Renderbuffer) {
        let mut fields = vec![
            ("internal_format", Value::U32(renderbuffer.internal_format)),
            ("width", Value::I32(renderbuffer.width)),
            ("height", Value::I32(renderbuffer.height)),
            ("samples", Value::I32(renderbuffer.samples)),
        ];

        let data = if renderbuffer.width <= 0 || renderbuffer.height <= 0 {
            Ok(None)
        } else if renderbuffer.samples > 1 {
            Err(MecError::Unsupported("multisampled renderbuffer"))
        } else if formats::is_depth(renderbuffer.internal_format) || formats::is_stencil_only(renderbuffer.internal_format) {
            Err(MecError::Unsupported("depth or stencil renderbuffer"))
        } else {
            let (format, ty) = formats::read_format(renderbuffer.internal_format);
            readback
                .read(Attachment::Renderbuffer(renderbuffer.name), renderbuffer.width, renderbuffer.height, format, ty)
                .map(|data| Some((data, format, ty)))
        };

        match data {
            Ok(Some((data, format, ty))) => {
                let pool = emit_contents(o, &data);
                fields.extend([("format", Value::U32(format)), ("type", Value::U32(ty)), ("pool", Value::U32(pool))]);
            },
            Ok(None) => {},
            Err(e) => warn!("Renderbuffer {} contents not captured: {}", renderbuffer.name, e),
        }

        o.encode(initial_state("Renderbuffer", renderbuffer.name as u64, fields));
    }

    fn capture_texture(&mut self, o: &mut CallObserver, readback: &mut Readback, texture: &Texture) {
        let mut fields = vec![
            ("target", Value::U32(texture.target)),
            ("samples", Value::I32(texture.samples)),
        ];
        if let Some(image) = &texture.egl_image {
            fields.push(("egl_image", Value::Handle(image.handle)));
        }
        o.encode(initial_state("Texture", texture.name as u64, fields));

        if texture.samples > 1 {
            warn!("Texture {} is multisampled, contents not captured", texture.name);
            return;
        }

        for ((face, level), info) in &texture.levels {
            let read = read_level(readback, texture, *face, *level, info);
            let mut fields = vec![
                ("texture", Value::U32(texture.name)),
                ("face", Value::U32(*face)),
                ("level", Value::I32(*level)),
                ("width", Value::I32(info.width)),
                ("height", Value::I32(info.height)),
                ("internal_format", Value::U32(info.internal_format)),
            ];

            match read {
                Ok(read) => {
                    let pool = emit_contents(o, &read.data);
                    fields.extend([
                        ("format", Value::U32(read.format)),
                        ("type", Value::U32(read.ty)),
                        ("resampled", Value::Bool(read.resampled)),
                        ("pool", Value::U32(pool)),
                    ]);
                    debug!("Texture {} level {} captured, {} bytes", texture.name, level, read.data.len());
                },
                Err(e) => warn!("Texture {} level {} not captured: {}", texture.name, level, e),
            }

            o.encode(initial_state("TextureLevel", texture.name as u64, fields));
        }
    }
}

/// Emits `data` as the contents of a fresh spy pool and returns the pool.
fn emit_contents(o: &mut CallObserver, data: &[u8]) -> u32 {
    let pool = o.allocate_pool();
    o.observe_bytes(pool, Address::NULL, data);
    pool.0
}

fn read_buffer(gl: &dyn GlDriver, buffer: &Buffer) -> Result<Option<Vec<u8>>, MecError> {
    if buffer.size <= 0 {
        return Ok(None);
    }

    if let Some(mapping) = buffer.mapping {
        if buffer.is_partially_mapped() {
            return Err(MecError::Unsupported("partially mapped buffer"));
        }
        if mapping.access & GL_MAP_READ_BIT == 0 {
            return Err(MecError::Unsupported("buffer mapped without read access"));
        }

        // The whole buffer is mapped readable; copy it from the mapping.
        let data = unsafe { std::slice::from_raw_parts(mapping.pointer as usize as *const u8, buffer.size as usize) };
        return Ok(Some(data.to_vec()));
    }

    gl.bind_buffer(GL_COPY_READ_BUFFER, buffer.name);
    let pointer = gl.map_buffer_range(GL_COPY_READ_BUFFER, 0, buffer.size as isize, GL_MAP_READ_BIT);
    if pointer.is_null() {
        gl.bind_buffer(GL_COPY_READ_BUFFER, 0);
        return Err(MecError::Gl(gl.get_error()));
    }

    let data = unsafe { std::slice::from_raw_parts(pointer as *const u8, buffer.size as usize) }.to_vec();
    gl.unmap_buffer(GL_COPY_READ_BUFFER);
    gl.bind_buffer(GL_COPY_READ_BUFFER, 0);
    Ok(Some(data))
}

fn read_level(readback: &mut Readback, texture: &Texture, face: GLenum, level: GLint, info: &Level) -> Result<LevelRead, MecError> {
    if info.width <= 0 || info.height <= 0 {
        return Err(MecError::Unsupported("empty level"));
    }

    let resample = if texture.target == GL_TEXTURE_EXTERNAL_OES || texture.egl_image.is_some() {
        Some(Resample::External)
    } else if info.is_depth() {
        Some(Resample::Depth)
    } else if info.is_compressed() {
        Some(Resample::Color)
    } else {
        None
    };

    let (data, format, ty) = match resample {
        Some(_) if texture.target == GL_TEXTURE_CUBE_MAP => {
            return Err(MecError::Unsupported("resampling cube map faces"));
        },
        Some(Resample::External) if level != 0 => {
            return Err(MecError::Unsupported("mipmapped external texture"));
        },
        Some(kind) => {
            let data = readback.resample(kind, texture, level, info.width, info.height)?;
            match kind {
                // Packed little-endian 24-bit values, three bytes a texel.
                Resample::Depth => (formats::unpack_encoded_depth24(&data), GL_DEPTH_COMPONENT24, GL_UNSIGNED_BYTE),
                _ => (data, GL_RGBA, GL_UNSIGNED_BYTE),
            }
        },
        None => {
            let (format, ty) = formats::read_format(info.internal_format);
            let data = readback.read(Attachment::Texture { name: texture.name, face, level }, info.width, info.height, format, ty)?;
            (data, format, ty)
        },
    };

    Ok(LevelRead {
        data,
        format,
        ty,
        resampled: resample.is_some(),
    })
}

fn initial_state(kind: &str, handle: u64, fields: Vec<(&str, Value)>) -> Message {
    Message::InitialState(InitialState {
        api: spyglass_observer::ApiIndex::GLES.0,
        kind: kind.to_string(),
        handle,
        fields: fields.into_iter().map(|(name, value)| (name.to_string(), value)).collect(),
    })
}
