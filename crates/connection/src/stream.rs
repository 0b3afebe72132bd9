use std::io;
use std::net;
use std::sync::{Arc, Condvar, Mutex};
use std::io::{Read, Write};
use std::collections::VecDeque;
#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// Byte stream to the capture tool.
pub trait ConnectionStream: Read + Write + Send {
    /// A second handle reading from the same stream, for a background reader.
    fn try_clone_reader(&self) -> io::Result<Box<dyn Read + Send>>;

    /// Shuts the connection down in both directions.
    fn close(&mut self);
}

impl ConnectionStream for net::TcpStream {
    fn try_clone_reader(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn close(&mut self) {
        let _ = self.flush();
        let _ = self.shutdown(net::Shutdown::Both);
    }
}

#[cfg(unix)]
impl ConnectionStream for UnixStream {
    fn try_clone_reader(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn close(&mut self) {
        let _ = self.flush();
        let _ = self.shutdown(net::Shutdown::Both);
    }
}

#[derive(Default)]
struct Pipe {
    bytes: Mutex<PipeState>,
    ready: Condvar,
}

#[derive(Default)]
struct PipeState {
    queue: VecDeque<u8>,
    closed: bool,
}

impl Pipe {
    fn push(&self, data: &[u8]) {
        let mut state = self.bytes.lock().unwrap_or_else(|p| p.into_inner());
        state.queue.extend(data);
        self.ready.notify_all();
    }

    fn close(&self) {
        let mut state = self.bytes.lock().unwrap_or_else(|p| p.into_inner());
        state.closed = true;
        self.ready.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.bytes.lock().map(|s| s.closed).unwrap_or(true)
    }

    fn pull(&self, out: &mut [u8]) -> usize {
        let mut state = self.bytes.lock().unwrap_or_else(|p| p.into_inner());
        while state.queue.is_empty() && !state.closed {
            state = self.ready.wait(state).unwrap_or_else(|p| p.into_inner());
        }

        let count = out.len().min(state.queue.len());
        for (slot, byte) in out.iter_mut().zip(state.queue.drain(..count)) {
            *slot = byte;
        }
        count
    }

    fn contents(&self) -> Vec<u8> {
        let state = self.bytes.lock().unwrap_or_else(|p| p.into_inner());
        state.queue.iter().copied().collect()
    }
}

struct PipeReader(Arc<Pipe>);

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.0.pull(buf))
    }
}

/// In-process connection, the spy's end.
pub struct MemoryConnection {
    incoming: Arc<Pipe>,
    outgoing: Arc<Pipe>,
}

/// The capture tool's end of a [`MemoryConnection`].
#[derive(Clone)]
pub struct MemoryPeer {
    incoming: Arc<Pipe>,
    outgoing: Arc<Pipe>,
}

impl MemoryConnection {
    pub fn pair() -> (MemoryConnection, MemoryPeer) {
        let to_spy = Arc::new(Pipe::default());
        let to_tool = Arc::new(Pipe::default());

        (
            MemoryConnection { incoming: to_spy.clone(), outgoing: to_tool.clone() },
            MemoryPeer { incoming: to_tool, outgoing: to_spy },
        )
    }
}

impl MemoryPeer {
    pub fn send(&self, data: &[u8]) {
        self.outgoing.push(data);
    }

    /// Everything the spy has written so far.
    pub fn received(&self) -> Vec<u8> {
        self.incoming.contents()
    }

    pub fn is_closed(&self) -> bool {
        self.incoming.is_closed()
    }

    pub fn hang_up(&self) {
        self.outgoing.close();
    }
}

impl Read for MemoryConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.incoming.pull(buf))
    }
}

impl Write for MemoryConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.outgoing.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"));
        }

        self.outgoing.push(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ConnectionStream for MemoryConnection {
    fn try_clone_reader(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(PipeReader(self.incoming.clone())))
    }

    fn close(&mut self) {
        self.outgoing.close();
        self.incoming.close();
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use crate::{ConnectionStream, MemoryConnection};

    #[test]
    fn we_can_talk_over_a_memory_connection() {
        let (mut spy, tool) = MemoryConnection::pair();
        tool.send(&[1, 2, 3]);
        spy.write_all(&[9, 8]).unwrap();

        let mut buffer = [0u8; 3];
        spy.read_exact(&mut buffer).unwrap();

        assert_eq!(buffer, [1, 2, 3]);
        assert_eq!(tool.received(), vec![9, 8]);
    }

    #[test]
    fn closed_connections_reject_writes_and_end_reads() {
        let (mut spy, tool) = MemoryConnection::pair();
        spy.close();

        assert!(tool.is_closed());
        assert!(spy.write_all(&[1]).is_err());
        let mut buffer = [0u8; 4];
        assert_eq!(spy.read(&mut buffer).unwrap(), 0);
    }
}
