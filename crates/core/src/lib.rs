//! API-independent half of the spy: the capture window, frame counting and
//! the connection to the capture tool.

mod window;
mod shared;
mod spy;
mod image;

pub use window::{CaptureWindow, CaptureState, FrameTransition};
pub use shared::SharedConnection;
pub use spy::{CoreSpy, CoreSpyBuilder};
pub use image::{downsample_rgba8, flip_rows, framebuffer_observation, MAX_OBSERVATION_SIZE};

pub use spyglass_connection::{ApiMask, ConnectionHeader, Flags};
pub use spyglass_observer::{ApiIndex, CallObserver, ObserverHost};
