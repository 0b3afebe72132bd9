use std::io;
use std::thread;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use log::{debug, info, warn};
use spyglass_connection::{
    spawn_start_watcher, ApiMask, ConnectionHeader, ConnectionStream, Flags, StreamReader,
};
use spyglass_encoder::{Abi, CaptureHeader, DeviceInfo, Encoder, Message, StreamEncoder, TypeTable};
use spyglass_memory::PoolId;
use spyglass_observer::{ApiIndex, ObserverHost, ResourceStore};

use crate::{CaptureState, CaptureWindow, FrameTransition, SharedConnection};

/// Assembles a [`CoreSpy`].
#[derive(Default)]
pub struct CoreSpyBuilder {
    connection: Option<Box<dyn ConnectionStream>>,
    header: Option<ConnectionHeader>,
    encoder: Option<Arc<dyn Encoder>>,
    apis: Option<ApiMask>,
}

impl CoreSpyBuilder {
    /// The connection to the capture tool. The header is read from it unless
    /// one is given with [`CoreSpyBuilder::header`].
    pub fn connection(mut self, connection: Box<dyn ConnectionStream>) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn header(mut self, header: ConnectionHeader) -> Self {
        self.header = Some(header);
        self
    }

    /// Overrides the encoder that would otherwise write to the connection.
    pub fn encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// APIs this build of the spy can intercept at all.
    pub fn available_apis(mut self, apis: ApiMask) -> Self {
        self.apis = Some(apis);
        self
    }

    pub fn build(mut self) -> CoreSpy {
        let header = match (self.header.take(), self.connection.as_mut()) {
            (Some(header), _) => header,
            (None, Some(connection)) => read_header(&mut **connection),
            (None, None) => {
                warn!("No connection to a capture tool, using default settings");
                ConnectionHeader::default()
            },
        };

        let watcher_reader = match (&self.connection, header.is_deferred()) {
            (Some(connection), true) => match connection.try_clone_reader() {
                Ok(reader) => Some(reader),
                Err(e) => {
                    warn!("Deferred start requested but the connection cannot be read: {}", e);
                    None
                },
            },
            _ => None,
        };

        let connection = self.connection.map(SharedConnection::new).unwrap_or_default();
        let encoder: Arc<dyn Encoder> = match self.encoder {
            Some(encoder) => encoder,
            None if header.flags.contains(Flags::NO_BUFFER) => {
                Arc::new(StreamEncoder::new(connection.clone()))
            },
            None => Arc::new(StreamEncoder::new(io::BufWriter::new(connection.clone()))),
        };

        let apis = header.apis & self.apis.unwrap_or(ApiMask::all());
        let window = Arc::new(CaptureWindow::new(
            header.start_frame,
            header.num_frames,
            header.is_deferred(),
        ));

        let watcher = watcher_reader.map(|reader| {
            let window = window.clone();
            spawn_start_watcher(reader, move || {
                window.request_start();
            })
        });

        info!(
            "Spy created: apis {:?}, flags {:?}, start frame {}, {} frames",
            apis, header.flags, header.start_frame, header.num_frames
        );

        let spy = CoreSpy {
            header,
            apis,
            connection,
            encoder,
            resources: ResourceStore::new(),
            types: TypeTable::default(),
            window,
            watcher: Mutex::new(watcher),
            draws: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            mec_requested: AtomicBool::new(false),
            header_sent: AtomicBool::new(false),
            pools: AtomicU32::new(0),
        };

        if spy.window.is_active() {
            spy.send_capture_header();
        }

        spy
    }
}

fn read_header(connection: &mut dyn ConnectionStream) -> ConnectionHeader {
    match ConnectionHeader::read(&mut StreamReader::new(connection)) {
        Ok(header) => header,
        Err(e) => {
            warn!("Could not read the connection header, using defaults: {}", e);
            ConnectionHeader::default()
        },
    }
}

/// The API-independent spy: capture window, counters and trace output.
pub struct CoreSpy {
    header: ConnectionHeader,
    apis: ApiMask,
    connection: SharedConnection,
    encoder: Arc<dyn Encoder>,
    resources: ResourceStore,
    types: TypeTable,
    window: Arc<CaptureWindow>,
    watcher: Mutex<Option<thread::JoinHandle<()>>>,
    draws: AtomicU64,
    frames: AtomicU64,
    mec_requested: AtomicBool,
    header_sent: AtomicBool,
    pools: AtomicU32,
}

impl CoreSpy {
    pub fn builder() -> CoreSpyBuilder {
        CoreSpyBuilder::default()
    }

    pub fn header(&self) -> &ConnectionHeader {
        &self.header
    }

    pub fn flags(&self) -> Flags {
        self.header.flags
    }

    pub fn apis(&self) -> ApiMask {
        self.apis
    }

    pub fn is_api_enabled(&self, api: ApiIndex) -> bool {
        self.apis.bits() & api.mask_bit() != 0
    }

    pub fn state(&self) -> CaptureState {
        self.window.state()
    }

    pub fn is_suspended(&self) -> bool {
        self.window.is_suspended()
    }

    pub fn window(&self) -> &CaptureWindow {
        &self.window
    }

    pub fn connection(&self) -> &SharedConnection {
        &self.connection
    }

    /// Frame boundaries seen since the spy was created.
    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    /// Ends an indefinite suspension, as the start sentinel would.
    pub fn request_start(&self) -> bool {
        self.window.request_start()
    }

    /// Returns true exactly once after the capture window opened on a frame
    /// boundary, when the application's existing state must be captured.
    pub fn take_mec_request(&self) -> bool {
        self.mec_requested.swap(false, Ordering::SeqCst)
    }

    /// Counts a frame boundary that must not be filtered by
    /// `IGNORE_FRAME_BOUNDARY_DELIMITERS`.
    pub fn frame_delimiter(&self, api: ApiIndex) {
        let frame = self.frames.fetch_add(1, Ordering::SeqCst);
        debug!("{:?} frame {} ended", api, frame);

        match self.window.frame_boundary() {
            FrameTransition::None => {},
            FrameTransition::Started => {
                self.send_capture_header();
                self.mec_requested.store(true, Ordering::SeqCst);
            },
            FrameTransition::Ended => self.end_capture(),
        }
    }

    fn send_capture_header(&self) {
        if self.header_sent.swap(true, Ordering::SeqCst) {
            return;
        }

        let device = DeviceInfo {
            name: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
            os: std::env::consts::OS.to_string(),
            cpu_count: thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1),
        };

        self.encoder.object(None, Message::Header(CaptureHeader {
            version: self.header.version,
            device,
            abi: Abi::current(),
            flags: self.header.flags.bits(),
            start_frame: self.header.start_frame,
        }));
    }

    fn end_capture(&self) {
        info!("Capture finished after {} frames", self.window.captured_frames());
        self.encoder.flush();
        self.connection.close();
    }

    /// Stops tracing for good, e.g. at process exit.
    pub fn shutdown(&self) {
        self.window.end();
        self.end_capture();

        let watcher = self.watcher.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(watcher) = watcher {
            // The watcher returns once the closed connection ends its read.
            let _ = watcher.join();
        }
    }
}

impl ObserverHost for CoreSpy {
    fn encoder(&self) -> &dyn Encoder {
        self.encoder.as_ref()
    }

    fn resources(&self) -> &ResourceStore {
        &self.resources
    }

    fn types(&self) -> &TypeTable {
        &self.types
    }

    fn allocate_pool(&self) -> PoolId {
        // Pool 0 is the application's memory.
        PoolId(self.pools.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn should_trace(&self, api: ApiIndex) -> bool {
        self.is_api_enabled(api) && self.window.is_active()
    }

    fn on_pre_start_of_frame(&self, _api: ApiIndex) {
        self.draws.store(0, Ordering::SeqCst);
    }

    fn on_post_end_of_frame(&self, api: ApiIndex) {
        if self.header.flags.contains(Flags::IGNORE_FRAME_BOUNDARY_DELIMITERS) {
            return;
        }

        self.frame_delimiter(api);
    }

    fn on_draw(&self, api: ApiIndex) -> bool {
        let frequency = self.header.observe_draw_frequency as u64;
        if frequency == 0 || !self.should_trace(api) {
            return false;
        }

        let draw = self.draws.fetch_add(1, Ordering::SeqCst) + 1;
        draw % frequency == 0
    }

    fn should_observe_frame(&self, api: ApiIndex) -> bool {
        let frequency = self.header.observe_frame_frequency as u64;
        if frequency == 0 || !self.should_trace(api) {
            return false;
        }

        (self.window.captured_frames() + 1) % frequency == 0
    }

    fn record_error_state(&self) -> bool {
        self.header.flags.contains(Flags::RECORD_ERROR_STATE)
    }

    fn track_coherent_memory(&self) -> bool {
        !self.header.flags.contains(Flags::DISABLE_COHERENT_MEMORY_TRACKER)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use spyglass_connection::{ApiMask, ConnectionHeader, Flags, MemoryConnection, START_MID_EXECUTION_CAPTURE};
    use spyglass_encoder::{MemoryEncoder, Message, TraceReader};
    use spyglass_observer::{ApiIndex, ObserverHost};

    use crate::{CaptureState, CoreSpy};

    fn spy_with(header: ConnectionHeader) -> (CoreSpy, Arc<MemoryEncoder>) {
        let encoder = Arc::new(MemoryEncoder::new());
        let spy = CoreSpy::builder()
            .header(header)
            .encoder(encoder.clone())
            .build();
        (spy, encoder)
    }

    #[test]
    fn the_header_is_read_from_the_connection() {
        let (spy_end, tool) = MemoryConnection::pair();
        let mut bytes = Vec::new();
        ConnectionHeader { start_frame: 2, apis: ApiMask::VULKAN, ..Default::default() }
            .write(&mut bytes)
            .unwrap();
        tool.send(&bytes);

        let spy = CoreSpy::builder().connection(Box::new(spy_end)).build();

        assert_eq!(spy.header().start_frame, 2);
        assert_eq!(spy.state(), CaptureState::Suspended(2));
        assert!(spy.is_api_enabled(ApiIndex::VULKAN));
        assert!(!spy.is_api_enabled(ApiIndex::GLES));
    }

    #[test]
    fn a_malformed_header_falls_back_to_defaults() {
        let (spy_end, tool) = MemoryConnection::pair();
        tool.send(b"nope");
        tool.hang_up();

        let spy = CoreSpy::builder().connection(Box::new(spy_end)).build();

        assert_eq!(spy.header(), &ConnectionHeader::default());
        assert_eq!(spy.state(), CaptureState::Active);
    }

    #[test]
    fn suspended_spies_count_down_to_one_mec_request() {
        let (spy, encoder) = spy_with(ConnectionHeader { start_frame: 3, ..Default::default() });

        for _ in 0..2 {
            spy.on_post_end_of_frame(ApiIndex::GLES);
            assert!(!spy.should_trace(ApiIndex::GLES));
            assert!(!spy.take_mec_request());
        }

        spy.on_post_end_of_frame(ApiIndex::GLES);
        assert!(spy.should_trace(ApiIndex::GLES));
        assert!(spy.take_mec_request());
        assert!(!spy.take_mec_request());
        assert!(matches!(encoder.messages()[0], Message::Header(_)));
    }

    #[test]
    fn immediate_capture_needs_no_mec() {
        let (spy, encoder) = spy_with(ConnectionHeader::default());

        assert!(spy.should_trace(ApiIndex::GLES));
        assert!(!spy.take_mec_request());
        assert_eq!(encoder.len(), 1);
    }

    #[test]
    fn frame_budget_closes_the_connection() {
        let (spy_end, tool) = MemoryConnection::pair();
        let mut bytes = Vec::new();
        ConnectionHeader { num_frames: 1, apis: ApiMask::GLES, flags: Flags::NO_BUFFER, ..Default::default() }
            .write(&mut bytes)
            .unwrap();
        tool.send(&bytes);

        let spy = CoreSpy::builder().connection(Box::new(spy_end)).build();
        assert!(spy.should_trace(ApiIndex::GLES));
        assert!(!spy.should_trace(ApiIndex::VULKAN));

        spy.on_post_end_of_frame(ApiIndex::GLES);

        assert_eq!(spy.state(), CaptureState::Complete);
        assert!(tool.is_closed());
        assert!(!spy.connection().is_open());
        assert!(!spy.should_trace(ApiIndex::GLES));

        let records = TraceReader::new(&tool.received()[..])
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert!(matches!(records[0].message, Message::Header(_)));
    }

    #[test]
    fn ignored_delimiters_do_not_count_frames() {
        let (spy, _) = spy_with(ConnectionHeader {
            start_frame: 1,
            flags: Flags::IGNORE_FRAME_BOUNDARY_DELIMITERS,
            ..Default::default()
        });

        spy.on_post_end_of_frame(ApiIndex::GLES);
        assert!(spy.is_suspended());

        spy.frame_delimiter(ApiIndex::GLES);
        assert!(!spy.is_suspended());
    }

    #[test]
    fn draw_observations_follow_the_frequency() {
        let (spy, _) = spy_with(ConnectionHeader { observe_draw_frequency: 3, ..Default::default() });

        let observed: Vec<bool> = (0..6).map(|_| spy.on_draw(ApiIndex::GLES)).collect();
        assert_eq!(observed, vec![false, false, true, false, false, true]);

        spy.on_pre_start_of_frame(ApiIndex::GLES);
        assert!(!spy.on_draw(ApiIndex::GLES));
    }

    #[test]
    fn frame_observations_follow_the_frequency() {
        let (spy, _) = spy_with(ConnectionHeader { observe_frame_frequency: 2, ..Default::default() });

        assert!(!spy.should_observe_frame(ApiIndex::GLES));
        spy.on_post_end_of_frame(ApiIndex::GLES);
        assert!(spy.should_observe_frame(ApiIndex::GLES));
    }

    #[test]
    fn the_start_sentinel_ends_a_deferred_suspension() {
        let (spy_end, tool) = MemoryConnection::pair();
        let mut bytes = Vec::new();
        ConnectionHeader { flags: Flags::DEFER_START, ..Default::default() }
            .write(&mut bytes)
            .unwrap();
        tool.send(&bytes);

        let spy = CoreSpy::builder().connection(Box::new(spy_end)).build();
        assert_eq!(spy.state(), CaptureState::SuspendedIndefinitely);

        tool.send(&START_MID_EXECUTION_CAPTURE.to_le_bytes());
        let watcher = spy.watcher.lock().unwrap().take().unwrap();
        watcher.join().unwrap();

        assert_eq!(spy.state(), CaptureState::Suspended(1));
        spy.on_post_end_of_frame(ApiIndex::GLES);
        assert!(spy.take_mec_request());
    }
}
