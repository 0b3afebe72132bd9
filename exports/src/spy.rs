use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use log::{info, warn};
use spyglass_connection::ConnectionStream;
use spyglass_core::{ApiMask, ConnectionHeader, CoreSpy, CoreSpyBuilder};
use spyglass_encoder::Encoder;
use spyglass_gles::{GlDriver, GlesSpy};
use spyglass_observer::{ApiIndex, CallObserver};
use spyglass_vulkan::{VkDriver, VulkanSpy};

static SPY: OnceLock<Spy> = OnceLock::new();

/// Builds the process-wide spy. Later calls return the first one.
pub fn install(builder: SpyBuilder) -> &'static Spy {
    let mut installed = false;
    let spy = SPY.get_or_init(|| {
        installed = true;
        builder.build()
    });

    if !installed {
        warn!("Spy already installed, keeping the existing one");
    }
    spy
}

pub fn get() -> Option<&'static Spy> {
    SPY.get()
}

/// How a call interacts with the shadow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locking {
    /// Holds the shadow lock for the whole call. Every call that reads or
    /// updates shadow state must be serialized.
    Serialized,
    /// Runs without the lock and without shadow state.
    Concurrent,
}

/// Shadow state of every intercepted API.
#[derive(Default)]
pub struct Shadow {
    pub gles: GlesSpy,
    pub vulkan: VulkanSpy,
}

#[derive(Default)]
pub struct SpyBuilder {
    core: CoreSpyBuilder,
    gl: Option<Box<dyn GlDriver>>,
    vk: Option<Box<dyn VkDriver>>,
}

impl SpyBuilder {
    pub fn connection(mut self, connection: Box<dyn ConnectionStream>) -> Self {
        self.core = self.core.connection(connection);
        self
    }

    pub fn header(mut self, header: ConnectionHeader) -> Self {
        self.core = self.core.header(header);
        self
    }

    pub fn encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
        self.core = self.core.encoder(encoder);
        self
    }

    pub fn gles_driver(mut self, driver: Box<dyn GlDriver>) -> Self {
        self.gl = Some(driver);
        self
    }

    pub fn vulkan_driver(mut self, driver: Box<dyn VkDriver>) -> Self {
        self.vk = Some(driver);
        self
    }

    pub fn build(self) -> Spy {
        let mut apis = ApiMask::empty();
        apis.set(ApiMask::GLES, self.gl.is_some());
        apis.set(ApiMask::VULKAN, self.vk.is_some());

        Spy {
            core: self.core.available_apis(apis).build(),
            shadow: Mutex::new(Shadow::default()),
            gl: self.gl,
            vk: self.vk,
        }
    }
}

/// Routes intercepted calls through a [`CallObserver`] and the shadow state,
/// and captures existing state once the capture window opens.
pub struct Spy {
    core: CoreSpy,
    shadow: Mutex<Shadow>,
    gl: Option<Box<dyn GlDriver>>,
    vk: Option<Box<dyn VkDriver>>,
}

impl Spy {
    pub fn builder() -> SpyBuilder {
        SpyBuilder::default()
    }

    pub fn core(&self) -> &CoreSpy {
        &self.core
    }

    /// Runs `handler` for one intercepted call. Serialized calls see the
    /// shadow state; concurrent ones get `None`.
    pub fn call<R>(
        &self,
        api: ApiIndex,
        name: &'static str,
        locking: Locking,
        handler: impl FnOnce(&mut CallObserver, Option<&mut Shadow>) -> R,
    ) -> R {
        match locking {
            Locking::Serialized => self.serialized(api, name, |o, shadow| handler(o, Some(shadow))),
            Locking::Concurrent => {
                let mut observer = CallObserver::new(&self.core, api, name);
                handler(&mut observer, None)
            },
        }
    }

    /// A serialized GLES call. `None` when no GL driver was loaded.
    pub fn gles<R>(
        &self,
        name: &'static str,
        handler: impl FnOnce(&mut GlesSpy, &mut CallObserver, &dyn GlDriver) -> R,
    ) -> Option<R> {
        let gl = self.gl.as_deref()?;
        Some(self.serialized(ApiIndex::GLES, name, |o, shadow| handler(&mut shadow.gles, o, gl)))
    }

    /// A serialized Vulkan call. `None` when no Vulkan driver was loaded.
    pub fn vulkan<R>(
        &self,
        name: &'static str,
        handler: impl FnOnce(&mut VulkanSpy, &mut CallObserver, &dyn VkDriver) -> R,
    ) -> Option<R> {
        let vk = self.vk.as_deref()?;
        Some(self.serialized(ApiIndex::VULKAN, name, |o, shadow| handler(&mut shadow.vulkan, o, vk)))
    }

    pub fn shutdown(&self) {
        info!("Shutting down the spy");
        self.core.shutdown();
    }

    fn lock(&self) -> MutexGuard<'_, Shadow> {
        // A panicking handler leaves the shadow usable.
        self.shadow.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn serialized<R>(
        &self,
        api: ApiIndex,
        name: &'static str,
        handler: impl FnOnce(&mut CallObserver, &mut Shadow) -> R,
    ) -> R {
        let mut shadow = self.lock();
        let result = {
            let mut observer = CallObserver::new(&self.core, api, name);
            handler(&mut observer, &mut shadow)
        };

        if self.core.take_mec_request() {
            self.capture_state(&mut shadow);
        }
        result
    }

    fn capture_state(&self, shadow: &mut Shadow) {
        if let Some(gl) = self.gl.as_deref().filter(|_| self.core.is_api_enabled(ApiIndex::GLES)) {
            let mut observer = CallObserver::new(&self.core, ApiIndex::GLES, "mid_execution_capture");
            shadow.gles.capture_state(&mut observer, gl);
        }
        if let Some(vk) = self.vk.as_deref().filter(|_| self.core.is_api_enabled(ApiIndex::VULKAN)) {
            let mut observer = CallObserver::new(&self.core, ApiIndex::VULKAN, "mid_execution_capture");
            shadow.vulkan.capture_state(&mut observer, vk);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ash::vk::{self, Handle};
    use spyglass_core::{CaptureState, ConnectionHeader};
    use spyglass_encoder::{MemoryEncoder, Message};
    use spyglass_observer::ApiIndex;
    use spyglass_vulkan::fake::FakeVk;

    use crate::spy::*;

    fn vulkan_spy(header: ConnectionHeader) -> (Spy, Arc<MemoryEncoder>) {
        let encoder = Arc::new(MemoryEncoder::new());
        let spy = Spy::builder()
            .header(header)
            .encoder(encoder.clone())
            .vulkan_driver(Box::new(FakeVk::new()))
            .build();
        (spy, encoder)
    }

    fn create_device(spy: &Spy) -> vk::Device {
        let info = vk::DeviceCreateInfo::builder().build();
        spy.vulkan("vkCreateDevice", |vulkan, o, vk| unsafe {
            vulkan.create_device(o, vk, vk::PhysicalDevice::from_raw(0x77), &info)
        })
        .unwrap()
        .unwrap()
    }

    fn device_states(encoder: &MemoryEncoder) -> usize {
        encoder.messages().iter()
            .filter(|m| matches!(m, Message::InitialState(s) if s.kind == "Device"))
            .count()
    }

    #[test]
    fn only_apis_with_a_driver_are_traced() {
        let (spy, _) = vulkan_spy(ConnectionHeader::default());

        assert!(spy.core().is_api_enabled(ApiIndex::VULKAN));
        assert!(!spy.core().is_api_enabled(ApiIndex::GLES));
        assert!(spy.gles("glFlush", |_, _, _| ()).is_none());
    }

    #[test]
    fn existing_state_is_captured_once_when_the_window_opens() {
        let (spy, encoder) = vulkan_spy(ConnectionHeader { start_frame: 1, ..Default::default() });
        let device = create_device(&spy);
        assert_eq!(spy.core().state(), CaptureState::Suspended(1));
        assert_eq!(device_states(&encoder), 0);

        spy.core().frame_delimiter(ApiIndex::VULKAN);
        spy.vulkan("vkDeviceWaitIdle", |_, _, vk| vk.device_wait_idle(device)).unwrap().unwrap();

        assert_eq!(device_states(&encoder), 1);
        assert!(encoder.messages().iter().any(|m| matches!(m, Message::Extra { name, .. } if name == "mid_execution_capture")));

        spy.vulkan("vkDeviceWaitIdle", |_, _, vk| vk.device_wait_idle(device)).unwrap().unwrap();
        assert_eq!(device_states(&encoder), 1);
    }

    #[test]
    fn concurrent_calls_see_no_shadow_state() {
        let (spy, _) = vulkan_spy(ConnectionHeader::default());
        create_device(&spy);

        let saw_shadow = spy.call(ApiIndex::VULKAN, "vkCmdDraw", Locking::Concurrent, |_, shadow| shadow.is_some());
        assert!(!saw_shadow);

        let devices = spy.call(ApiIndex::VULKAN, "vkQueueWaitIdle", Locking::Serialized, |_, shadow| {
            shadow.map(|s| s.vulkan.object_count())
        });
        assert!(devices.unwrap() > 0);
    }

    #[test]
    fn installing_twice_keeps_the_first_spy() {
        let first = install(Spy::builder().header(ConnectionHeader { start_frame: 5, ..Default::default() }));
        let second = install(Spy::builder());

        assert!(std::ptr::eq(first, second));
        assert_eq!(get().unwrap().core().header().start_frame, 5);
    }
}
