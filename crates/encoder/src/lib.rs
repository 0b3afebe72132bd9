//! The trace stream: message model, sinks and the framed on-disk reader.

mod message;
mod stream;
mod memory;
mod types;

pub use message::*;
pub use stream::{StreamEncoder, TraceReader, EncodeError, DecodeError};
pub use memory::MemoryEncoder;
pub use types::TypeTable;

/// Identifier of a record that other records may be nested under.
pub type GroupId = u64;

/// Sink for trace records.
///
/// Every record gets an id from one counter shared by all callers, assigned at
/// the moment the record is accepted, which makes the id a total order over
/// the stream even when calls from several threads interleave.
pub trait Encoder: Send + Sync {
    /// Emits a leaf record under `parent`.
    fn object(&self, parent: Option<GroupId>, message: Message);

    /// Emits a record that later records may nest under.
    fn group(&self, parent: Option<GroupId>, message: Message) -> GroupId;

    fn flush(&self) {}
}
