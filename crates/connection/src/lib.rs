//! The connection between the spy and the capture tool.

mod stream;
mod reader;
mod header;
mod watcher;

pub use stream::{ConnectionStream, MemoryConnection, MemoryPeer};
pub use reader::StreamReader;
pub use header::{ConnectionHeader, HeaderError, Flags, ApiMask, CURRENT_VERSION, MAGIC};
pub use watcher::{spawn_start_watcher, START_MID_EXECUTION_CAPTURE};
