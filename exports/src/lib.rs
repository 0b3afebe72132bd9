//! Everything an interceptor library needs: the [`Spy`] coordinator and the
//! crates it is built from.

pub use spyglass_dll as dll;
pub use spyglass_logging as logging;
pub use spyglass_memory as memory;
pub use spyglass_encoder as encoder;
pub use spyglass_connection as connection;
pub use spyglass_observer as observer;
pub use spyglass_gles as gles;
pub use spyglass_vulkan as vulkan;

mod spy;

pub use spyglass_core::{ApiMask, CaptureState, ConnectionHeader, CoreSpy, Flags};
pub use spyglass_observer::{ApiIndex, CallObserver};
pub use spy::{get, install, Locking, Shadow, Spy, SpyBuilder};
