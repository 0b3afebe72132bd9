use std::io;
use std::sync::{Arc, Mutex};
use std::io::Write;

use log::debug;
use spyglass_connection::ConnectionStream;

/// Write half of the connection, shared between the trace encoder and the
/// spy, which closes it when the capture ends.
#[derive(Clone, Default)]
pub struct SharedConnection {
    inner: Arc<Mutex<Option<Box<dyn ConnectionStream>>>>,
}

impl SharedConnection {
    pub fn new(stream: Box<dyn ConnectionStream>) -> Self {
        Self { inner: Arc::new(Mutex::new(Some(stream))) }
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    pub fn close(&self) {
        let mut stream = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(mut stream) = stream.take() {
            debug!("Closing the connection");
            stream.close();
        }
    }
}

impl Write for SharedConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut stream = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match stream.as_mut() {
            Some(stream) => stream.write(buf),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "connection closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut stream = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match stream.as_mut() {
            Some(stream) => stream.flush(),
            None => Ok(()),
        }
    }
}
