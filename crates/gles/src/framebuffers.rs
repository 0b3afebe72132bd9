use spyglass_encoder::Value;
use spyglass_memory::Slice;
use spyglass_observer::CallObserver;

use crate::gl::*;
use crate::state::{Attachment, Framebuffer, Renderbuffer};
use crate::{GlDriver, GlesSpy};

impl GlesSpy {
    pub fn gen_renderbuffers(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, names: Slice<GLuint>) {
        o.command(vec![Value::I32(names.count() as i32), Value::Pointer(names.base().as_u64())]);

        gl.gen_renderbuffers(unsafe { names.as_mut_slice() });
        o.resume();
        o.write_slice(&names);
        o.observe_pending();
        self.record_error(o, gl);

        if let Some((_, group)) = self.current_mut(o.thread()) {
            for &name in unsafe { names.as_slice() } {
                group.renderbuffers.insert(name, Renderbuffer { name, ..Default::default() });
            }
        }
    }

    pub fn delete_renderbuffers(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, names: Slice<GLuint>) {
        o.command(vec![Value::I32(names.count() as i32), Value::Pointer(names.base().as_u64())]);
        o.read_slice(&names);
        o.observe_pending();

        let names = unsafe { names.as_slice() };
        gl.delete_renderbuffers(names);
        o.resume();
        self.record_error(o, gl);

        if let Some((context, group)) = self.current_mut(o.thread()) {
            for &name in names.iter().filter(|n| **n != 0) {
                group.renderbuffers.remove(&name);
                if context.bindings.renderbuffer == name {
                    context.bindings.renderbuffer = 0;
                }
                for framebuffer in context.framebuffers.values_mut() {
                    framebuffer.attachments.retain(|_, a| *a != Attachment::Renderbuffer(name));
                }
            }
        }
    }

    pub fn bind_renderbuffer(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, target: GLenum, name: GLuint) {
        o.command(vec![Value::U32(target), Value::U32(name)]);
        gl.bind_renderbuffer(target, name);
        o.resume();
        self.record_error(o, gl);

        if let Some((context, group)) = self.current_mut(o.thread()) {
            if name != 0 {
                group.renderbuffers.entry(name).or_insert_with(|| Renderbuffer { name, ..Default::default() });
            }
            context.bindings.renderbuffer = name;
        }
    }

    /// `glRenderbufferStorage` is this call with zero samples.
    pub fn renderbuffer_storage(
        &mut self,
        o: &mut CallObserver,
        gl: &dyn GlDriver,
        target: GLenum,
        samples: GLsizei,
        internal_format: GLenum,
        width: GLsizei,
        height: GLsizei,
    ) {
        o.command(vec![
            Value::U32(target),
            Value::I32(samples),
            Value::U32(internal_format),
            Value::I32(width),
            Value::I32(height),
        ]);
        gl.renderbuffer_storage_multisample(target, samples, internal_format, width, height);
        o.resume();
        self.record_error(o, gl);

        if let Some((context, group)) = self.current_mut(o.thread()) {
            let name = context.bindings.renderbuffer;
            if let Some(renderbuffer) = group.renderbuffers.get_mut(&name) {
                renderbuffer.internal_format = internal_format;
                renderbuffer.width = width;
                renderbuffer.height = height;
                renderbuffer.samples = samples;
            }
        }
    }

    pub fn gen_framebuffers(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, names: Slice<GLuint>) {
        o.command(vec![Value::I32(names.count() as i32), Value::Pointer(names.base().as_u64())]);

        gl.gen_framebuffers(unsafe { names.as_mut_slice() });
        o.resume();
        o.write_slice(&names);
        o.observe_pending();
        self.record_error(o, gl);

        // Framebuffers are container objects and never shared.
        if let Some(context) = self.current_context_mut(o.thread()) {
            for &name in unsafe { names.as_slice() } {
                context.framebuffers.insert(name, Framebuffer { name, ..Default::default() });
            }
        }
    }

    pub fn delete_framebuffers(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, names: Slice<GLuint>) {
        o.command(vec![Value::I32(names.count() as i32), Value::Pointer(names.base().as_u64())]);
        o.read_slice(&names);
        o.observe_pending();

        let names = unsafe { names.as_slice() };
        gl.delete_framebuffers(names);
        o.resume();
        self.record_error(o, gl);

        if let Some(context) = self.current_context_mut(o.thread()) {
            for &name in names.iter().filter(|n| **n != 0) {
                context.framebuffers.remove(&name);
                if context.bindings.draw_framebuffer == name {
                    context.bindings.draw_framebuffer = 0;
                }
                if context.bindings.read_framebuffer == name {
                    context.bindings.read_framebuffer = 0;
                }
            }
        }
    }

    pub fn bind_framebuffer(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, target: GLenum, name: GLuint) {
        o.command(vec![Value::U32(target), Value::U32(name)]);
        gl.bind_framebuffer(target, name);
        o.resume();
        self.record_error(o, gl);

        if let Some(context) = self.current_context_mut(o.thread()) {
            if name != 0 {
                context.framebuffers.entry(name).or_insert_with(|| Framebuffer { name, ..Default::default() });
            }
            match target {
                GL_DRAW_FRAMEBUFFER => context.bindings.draw_framebuffer = name,
                GL_READ_FRAMEBUFFER => context.bindings.read_framebuffer = name,
                _ => {
                    context.bindings.draw_framebuffer = name;
                    context.bindings.read_framebuffer = name;
                },
            }
        }
    }

    fn bound_framebuffer_mut(&mut self, thread: u64, target: GLenum) -> Option<&mut Framebuffer> {
        let context = self.current_context_mut(thread)?;
        let name = match target {
            GL_READ_FRAMEBUFFER => context.bindings.read_framebuffer,
            _ => context.bindings.draw_framebuffer,
        };
        context.framebuffers.get_mut(&name)
    }

    pub fn framebuffer_texture_2d(
        &mut self,
        o: &mut CallObserver,
        gl: &dyn GlDriver,
        target: GLenum,
        attachment: GLenum,
        tex_target: GLenum,
        texture: GLuint,
        level: GLint,
    ) {
        o.command(vec![
            Value::U32(target),
            Value::U32(attachment),
            Value::U32(tex_target),
            Value::U32(texture),
            Value::I32(level),
        ]);
        gl.framebuffer_texture_2d(target, attachment, tex_target, texture, level);
        o.resume();
        self.record_error(o, gl);

        if let Some(framebuffer) = self.bound_framebuffer_mut(o.thread(), target) {
            set_attachment(
                framebuffer,
                attachment,
                (texture != 0).then_some(Attachment::Texture { name: texture, face: tex_target, level }),
            );
        }
    }

    pub fn framebuffer_renderbuffer(
        &mut self,
        o: &mut CallObserver,
        gl: &dyn GlDriver,
        target: GLenum,
        attachment: GLenum,
        rb_target: GLenum,
        renderbuffer: GLuint,
    ) {
        o.command(vec![
            Value::U32(target),
            Value::U32(attachment),
            Value::U32(rb_target),
            Value::U32(renderbuffer),
        ]);
        gl.framebuffer_renderbuffer(target, attachment, rb_target, renderbuffer);
        o.resume();
        self.record_error(o, gl);

        if let Some(framebuffer) = self.bound_framebuffer_mut(o.thread(), target) {
            set_attachment(framebuffer, attachment, (renderbuffer != 0).then_some(Attachment::Renderbuffer(renderbuffer)));
        }
    }

    pub fn create_program(&mut self, o: &mut CallObserver, gl: &dyn GlDriver) -> GLuint {
        o.command(Vec::new());
        let program = gl.create_program();
        o.resume();
        o.encode_return(Value::U32(program));
        self.record_error(o, gl);

        if let Some((_, group)) = self.current_mut(o.thread()) {
            group.programs.insert(program);
        }
        program
    }

    pub fn delete_program(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, program: GLuint) {
        o.command(vec![Value::U32(program)]);
        gl.delete_program(program);
        o.resume();
        self.record_error(o, gl);

        if let Some((_, group)) = self.current_mut(o.thread()) {
            group.programs.remove(&program);
        }
    }

    pub fn create_shader(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, ty: GLenum) -> GLuint {
        o.command(vec![Value::U32(ty)]);
        let shader = gl.create_shader(ty);
        o.resume();
        o.encode_return(Value::U32(shader));
        self.record_error(o, gl);

        if let Some((_, group)) = self.current_mut(o.thread()) {
            group.shaders.insert(shader);
        }
        shader
    }

    pub fn delete_shader(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, shader: GLuint) {
        o.command(vec![Value::U32(shader)]);
        gl.delete_shader(shader);
        o.resume();
        self.record_error(o, gl);

        if let Some((_, group)) = self.current_mut(o.thread()) {
            group.shaders.remove(&shader);
        }
    }
}

/// `GL_DEPTH_STENCIL_ATTACHMENT` sets both the depth and stencil points.
fn set_attachment(framebuffer: &mut Framebuffer, point: GLenum, attachment: Option<Attachment>) {
    let points = if point == GL_DEPTH_STENCIL_ATTACHMENT {
        vec![GL_DEPTH_ATTACHMENT, GL_STENCIL_ATTACHMENT]
    } else {
        vec![point]
    };

    for point in points {
        match attachment {
            Some(a) => {
                framebuffer.attachments.insert(point, a);
            },
            None => {
                framebuffer.attachments.remove(&point);
            },
        }
    }
}
