use std::io::Read;
use std::thread;

use log::{debug, info, warn};

use crate::StreamReader;

/// Sent by the capture tool to end an indefinitely deferred start.
pub const START_MID_EXECUTION_CAPTURE: u32 = 0xDEAD_BEEF;

/// Spawns the thread that blocks on the connection until the start sentinel
/// arrives, then runs `on_start` once.
pub fn spawn_start_watcher<F>(reader: Box<dyn Read + Send>, on_start: F) -> thread::JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name("spyglass-start-watcher".to_string())
        .spawn(move || {
            let mut reader = StreamReader::new(reader);
            loop {
                match reader.read_u32() {
                    Ok(START_MID_EXECUTION_CAPTURE) => {
                        info!("Received start capture request");
                        on_start();
                        return;
                    },
                    Ok(other) => debug!("Ignoring unexpected value {:#x} on the connection", other),
                    Err(e) => {
                        warn!("Connection ended before capture was started: {}", e);
                        return;
                    },
                }
            }
        })
        .unwrap_or_else(|e| {
            // Without the watcher the capture never starts, which is the
            // suspended behaviour anyway.
            warn!("Could not spawn the start watcher: {}", e);
            thread::spawn(|| {})
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::{spawn_start_watcher, ConnectionStream, MemoryConnection, START_MID_EXECUTION_CAPTURE};

    #[test]
    fn the_watcher_fires_on_the_sentinel() {
        let (spy, tool) = MemoryConnection::pair();
        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();

        let handle = spawn_start_watcher(spy.try_clone_reader().unwrap(), move || {
            flag.store(true, Ordering::SeqCst);
        });

        tool.send(&0x1234u32.to_le_bytes());
        tool.send(&START_MID_EXECUTION_CAPTURE.to_le_bytes());
        handle.join().unwrap();

        assert!(started.load(Ordering::SeqCst));
    }

    #[test]
    fn the_watcher_gives_up_when_the_tool_hangs_up() {
        let (spy, tool) = MemoryConnection::pair();
        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();

        let handle = spawn_start_watcher(spy.try_clone_reader().unwrap(), move || {
            flag.store(true, Ordering::SeqCst);
        });

        tool.hang_up();
        handle.join().unwrap();

        assert!(!started.load(Ordering::SeqCst));
    }
}
