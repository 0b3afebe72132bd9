//! Per-call observation: what one intercepted call read, wrote and emitted.

mod host;
mod resources;
mod observer;

pub use host::{ObserverHost, ApiIndex, current_thread_id};
pub use resources::ResourceStore;
pub use observer::CallObserver;
