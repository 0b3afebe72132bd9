//! The GLES half of the spy: EGL context tracking, shadow GL objects, the
//! entry point handlers and mid-execution capture of GL object contents.

pub mod gl;
pub mod formats;
mod driver;
mod state;
mod spy;
mod textures;
mod buffers;
mod framebuffers;
mod draw;
mod mec;

#[cfg(test)]
mod fake;
#[cfg(test)]
mod tests;

pub use driver::GlDriver;
pub use spy::GlesSpy;
pub use mec::MecError;
pub use textures::texture_target;
pub use state::{
    Attachment, Bindings, Buffer, Context, EglImageInfo, Framebuffer, Level, Mapping, Renderbuffer,
    ShareGroup, ShareGroupId, Texture,
};
