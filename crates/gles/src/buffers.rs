use std::ffi::c_void;

use log::warn;
use spyglass_encoder::Value;
use spyglass_memory::{Address, Slice};
use spyglass_observer::CallObserver;

use crate::gl::*;
use crate::state::{Buffer, Mapping};
use crate::{GlDriver, GlesSpy};

impl GlesSpy {
    pub fn gen_buffers(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, names: Slice<GLuint>) {
        o.command(vec![Value::I32(names.count() as i32), Value::Pointer(names.base().as_u64())]);

        gl.gen_buffers(unsafe { names.as_mut_slice() });
        o.resume();
        o.write_slice(&names);
        o.observe_pending();
        self.record_error(o, gl);

        if let Some((_, group)) = self.current_mut(o.thread()) {
            for &name in unsafe { names.as_slice() } {
                group.buffers.insert(name, Buffer::new(name));
            }
        }
    }

    pub fn delete_buffers(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, names: Slice<GLuint>) {
        o.command(vec![Value::I32(names.count() as i32), Value::Pointer(names.base().as_u64())]);
        o.read_slice(&names);
        o.observe_pending();

        let names = unsafe { names.as_slice() };
        gl.delete_buffers(names);
        o.resume();
        self.record_error(o, gl);

        if let Some((context, group)) = self.current_mut(o.thread()) {
            let bindings = &mut context.bindings;
            for &name in names.iter().filter(|n| **n != 0) {
                group.buffers.remove(&name);
                if bindings.array_buffer == name {
                    bindings.array_buffer = 0;
                }
                if bindings.element_array_buffer == name {
                    bindings.element_array_buffer = 0;
                }
                bindings.other_buffers.retain(|_, bound| *bound != name);
            }
        }
    }

    pub fn bind_buffer(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, target: GLenum, name: GLuint) {
        o.command(vec![Value::U32(target), Value::U32(name)]);
        gl.bind_buffer(target, name);
        o.resume();
        self.record_error(o, gl);

        if let Some((context, group)) = self.current_mut(o.thread()) {
            if name != 0 {
                group.buffers.entry(name).or_insert_with(|| Buffer::new(name));
            }
            match target {
                GL_ARRAY_BUFFER => context.bindings.array_buffer = name,
                GL_ELEMENT_ARRAY_BUFFER => context.bindings.element_array_buffer = name,
                other => {
                    context.bindings.other_buffers.insert(other, name);
                },
            }
        }
    }

    fn bound_buffer_mut(&mut self, thread: u64, target: GLenum) -> Option<&mut Buffer> {
        let (context, group) = self.current_mut(thread)?;
        let name = context.bindings.buffer(target);
        group.buffers.get_mut(&name)
    }

    pub fn buffer_data(
        &mut self,
        o: &mut CallObserver,
        gl: &dyn GlDriver,
        target: GLenum,
        size: GLsizeiptr,
        data: Slice<u8>,
        usage: GLenum,
    ) {
        o.command(vec![
            Value::U32(target),
            Value::I64(size as i64),
            Value::Pointer(data.base().as_u64()),
            Value::U32(usage),
        ]);
        o.read_slice(&data);
        o.observe_pending();

        gl.buffer_data(target, size, data, usage);
        o.resume();
        self.record_error(o, gl);

        if let Some(buffer) = self.bound_buffer_mut(o.thread(), target) {
            buffer.size = size as i64;
            buffer.usage = usage;
            buffer.mapping = None;
        }
    }

    pub fn buffer_sub_data(
        &mut self,
        o: &mut CallObserver,
        gl: &dyn GlDriver,
        target: GLenum,
        offset: GLintptr,
        data: Slice<u8>,
    ) {
        o.command(vec![
            Value::U32(target),
            Value::I64(offset as i64),
            Value::I64(data.count() as i64),
            Value::Pointer(data.base().as_u64()),
        ]);
        o.read_slice(&data);
        o.observe_pending();

        gl.buffer_sub_data(target, offset, data);
        o.resume();
        self.record_error(o, gl);
    }

    pub fn map_buffer_range(
        &mut self,
        o: &mut CallObserver,
        gl: &dyn GlDriver,
        target: GLenum,
        offset: GLintptr,
        length: GLsizeiptr,
        access: GLbitfield,
    ) -> *mut c_void {
        o.command(vec![
            Value::U32(target),
            Value::I64(offset as i64),
            Value::I64(length as i64),
            Value::U32(access),
        ]);

        let pointer = gl.map_buffer_range(target, offset, length, access);
        o.resume();
        o.encode_return(Value::Pointer(pointer as u64));

        if !pointer.is_null() && access & GL_MAP_READ_BIT != 0 {
            // The driver filled the mapping with the buffer's contents.
            unsafe { o.write(Address::from_ptr(pointer as *const u8), length as u64) };
        }
        o.observe_pending();
        self.record_error(o, gl);

        if pointer.is_null() {
            return pointer;
        }

        if let Some(buffer) = self.bound_buffer_mut(o.thread(), target) {
            buffer.mapping = Some(Mapping {
                offset: offset as i64,
                length: length as i64,
                access,
                pointer: pointer as u64,
            });
        }
        pointer
    }

    pub fn unmap_buffer(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, target: GLenum) -> bool {
        o.command(vec![Value::U32(target)]);

        let mapping = self.bound_buffer_mut(o.thread(), target).and_then(|b| b.mapping.take());
        match mapping {
            Some(m) if m.access & GL_MAP_WRITE_BIT != 0 => {
                // What the application wrote is only reachable until the unmap.
                unsafe { o.read(Address::from(m.pointer), m.length as u64) };
                o.observe_pending();
            },
            Some(_) => {},
            None => warn!("glUnmapBuffer on a buffer the spy has not seen mapped"),
        }

        let unmapped = gl.unmap_buffer(target);
        o.resume();
        o.encode_return(Value::Bool(unmapped));
        self.record_error(o, gl);
        unmapped
    }
}
