use std::io;
use std::sync::Mutex;
use std::io::{Read, Write};

use log::{error, trace};
use thiserror::Error;

use crate::{Encoder, GroupId, Message, Record};

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("could not serialize record: {0}")]
    Serialize(#[from] bincode::Error),
    #[error("could not write record: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("could not deserialize record: {0}")]
    Deserialize(#[from] bincode::Error),
    #[error("could not read record: {0}")]
    Io(#[from] io::Error),
    #[error("record of {0} bytes is larger than the stream allows")]
    Oversized(u64),
}

const MAX_RECORD_SIZE: u64 = 1 << 32;

struct StreamState<W> {
    writer: W,
    next_id: GroupId,
    failed: bool,
}

/// Writes records as `u64` little-endian length followed by the bincode payload.
///
/// The first write error is logged and latches the encoder: everything after
/// it is dropped, the traced application keeps running.
pub struct StreamEncoder<W: Write + Send> {
    state: Mutex<StreamState<W>>,
}

impl<W: Write + Send> StreamEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            state: Mutex::new(StreamState {
                writer,
                next_id: 1,
                failed: false,
            }),
        }
    }

    pub fn has_failed(&self) -> bool {
        self.state.lock().map(|s| s.failed).unwrap_or(true)
    }

    pub fn into_inner(self) -> W {
        match self.state.into_inner() {
            Ok(state) => state.writer,
            Err(poisoned) => poisoned.into_inner().writer,
        }
    }

    fn emit(&self, parent: Option<GroupId>, message: Message, group: bool) -> GroupId {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        let id = state.next_id;
        state.next_id += 1;

        if state.failed {
            return id;
        }

        let record = Record { id, parent, group, message };
        if let Err(e) = write_record(&mut state.writer, &record) {
            error!("Trace stream failed, dropping further records: {}", e);
            state.failed = true;
        }

        id
    }
}

pub(crate) fn write_record<W: Write>(writer: &mut W, record: &Record) -> Result<(), EncodeError> {
    let encoded = bincode::serialize(record)?;
    writer.write_all(&(encoded.len() as u64).to_le_bytes())?;
    writer.write_all(&encoded)?;
    Ok(())
}

impl<W: Write + Send> Encoder for StreamEncoder<W> {
    fn object(&self, parent: Option<GroupId>, message: Message) {
        self.emit(parent, message, false);
    }

    fn group(&self, parent: Option<GroupId>, message: Message) -> GroupId {
        self.emit(parent, message, true)
    }

    fn flush(&self) {
        if let Ok(mut state) = self.state.lock() {
            if let Err(e) = state.writer.flush() {
                error!("Could not flush trace stream: {}", e);
                state.failed = true;
            }
        }
    }
}

/// Reads back the framing written by [`StreamEncoder`].
pub struct TraceReader<R: Read> {
    reader: R,
    offset: u64,
}

impl<R: Read> TraceReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, offset: 0 }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn read_record(&mut self) -> Result<Option<Record>, DecodeError> {
        let mut size_buffer = [0u8; 8];
        match self.reader.read_exact(&mut size_buffer) {
            Ok(()) => {},
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let size = u64::from_le_bytes(size_buffer);
        if size > MAX_RECORD_SIZE {
            return Err(DecodeError::Oversized(size));
        }

        let mut buffer = vec![0u8; size as usize];
        self.reader.read_exact(&mut buffer)?;
        self.offset += 8 + size;

        let record: Record = bincode::deserialize(&buffer[..])?;
        trace!("Read {} record #{}", record.message.kind(), record.id);
        Ok(Some(record))
    }
}

impl<R: Read> Iterator for TraceReader<R> {
    type Item = Result<Record, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use crate::{Encoder, StreamEncoder, TraceReader, Message, Value, Command};

    struct BrokenWriter;

    impl io::Write for BrokenWriter {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn records_nest_under_their_groups() {
        let encoder = StreamEncoder::new(Vec::new());
        let group = encoder.group(None, Message::Command(Command {
            api: 1,
            name: "glDrawArrays".to_string(),
            thread: 7,
            args: vec![Value::U32(4), Value::I32(0), Value::I32(3)],
        }));
        encoder.object(Some(group), Message::Return(Value::Null));

        let bytes = encoder.into_inner();
        let records = TraceReader::new(&bytes[..])
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert_eq!(records.len(), 2);
        assert!(records[0].group);
        assert_eq!(records[1].parent, Some(records[0].id));
        assert!(records[1].id > records[0].id);
    }

    #[test]
    fn a_failed_stream_latches_instead_of_panicking() {
        let encoder = StreamEncoder::new(BrokenWriter);
        encoder.object(None, Message::Return(Value::Null));
        let id = encoder.group(None, Message::Return(Value::Null));

        assert!(encoder.has_failed());
        assert_eq!(id, 2);
    }

    #[test]
    fn truncated_streams_report_an_error() {
        let encoder = StreamEncoder::new(Vec::new());
        encoder.object(None, Message::Extra { name: "x".to_string(), value: Value::U64(1) });
        let mut bytes = encoder.into_inner();
        bytes.truncate(bytes.len() - 1);

        let mut reader = TraceReader::new(&bytes[..]);
        assert!(reader.read_record().is_err());
    }
}
