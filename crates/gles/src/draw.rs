use log::warn;
use spyglass_encoder::Value;
use spyglass_memory::Address;
use spyglass_observer::CallObserver;

use crate::gl::*;
use crate::{GlDriver, GlesSpy};

fn index_size(ty: GLenum) -> Option<u64> {
    match ty {
        GL_UNSIGNED_BYTE => Some(1),
        GL_UNSIGNED_SHORT => Some(2),
        GL_UNSIGNED_INT => Some(4),
        _ => None,
    }
}

impl GlesSpy {
    pub fn draw_arrays(&mut self, o: &mut CallObserver, gl: &dyn GlDriver, mode: GLenum, first: GLint, count: GLsizei) {
        o.command(vec![Value::U32(mode), Value::I32(first), Value::I32(count)]);
        gl.draw_arrays(mode, first, count);
        o.resume();
        self.record_error(o, gl);
        self.after_draw(o, gl);
    }

    /// # Safety
    /// Without a bound element array buffer `indices` must point at `count`
    /// indices of type `ty`.
    pub unsafe fn draw_elements(
        &mut self,
        o: &mut CallObserver,
        gl: &dyn GlDriver,
        mode: GLenum,
        count: GLsizei,
        ty: GLenum,
        indices: usize,
    ) {
        o.command(vec![Value::U32(mode), Value::I32(count), Value::U32(ty), Value::Pointer(indices as u64)]);

        let element_buffer = self.current_context(o.thread())
            .map(|c| c.bindings.element_array_buffer)
            .unwrap_or(0);
        if element_buffer == 0 {
            match index_size(ty) {
                Some(size) => o.read(Address::from(indices), size * count.max(0) as u64),
                None => warn!("glDrawElements with unknown index type {:#x}", ty),
            }
        }
        o.observe_pending();

        gl.draw_elements(mode, count, ty, indices);
        o.resume();
        self.record_error(o, gl);
        self.after_draw(o, gl);
    }

    fn after_draw(&mut self, o: &mut CallObserver, gl: &dyn GlDriver) {
        if o.on_draw() {
            self.observe_framebuffer(o, gl);
        }
    }
}
