use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use log::{debug, info};

const SUSPEND_INDEFINITELY: i64 = -1;

/// Where the capture currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Waiting for this many more frame boundaries.
    Suspended(u32),
    /// Waiting for the start sentinel.
    SuspendedIndefinitely,
    Active,
    /// The frame budget ran out; nothing is traced again.
    Complete,
}

/// What a frame boundary did to the capture window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTransition {
    None,
    Started,
    Ended,
}

/// The capture window state machine.
///
/// Shared between intercepting threads, the start watcher thread and the
/// frame hooks, so it is all atomics.
#[derive(Debug)]
pub struct CaptureWindow {
    suspend_frames: AtomicI64,
    // Frames still to capture once active; zero means no limit.
    remaining_frames: AtomicI64,
    captured_frames: AtomicU64,
    complete: AtomicBool,
}

impl CaptureWindow {
    pub fn new(start_frame: u32, num_frames: u32, deferred: bool) -> Self {
        let suspend_frames = if deferred { SUSPEND_INDEFINITELY } else { start_frame as i64 };

        Self {
            suspend_frames: AtomicI64::new(suspend_frames),
            remaining_frames: AtomicI64::new(num_frames as i64),
            captured_frames: AtomicU64::new(0),
            complete: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> CaptureState {
        if self.complete.load(Ordering::SeqCst) {
            return CaptureState::Complete;
        }

        match self.suspend_frames.load(Ordering::SeqCst) {
            0 => CaptureState::Active,
            n if n < 0 => CaptureState::SuspendedIndefinitely,
            n => CaptureState::Suspended(u32::try_from(n).unwrap_or(u32::MAX)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == CaptureState::Active
    }

    pub fn is_suspended(&self) -> bool {
        !self.is_active()
    }

    /// Frames completed while active.
    pub fn captured_frames(&self) -> u64 {
        self.captured_frames.load(Ordering::SeqCst)
    }

    /// Ends an indefinite suspension; capture starts at the next frame boundary.
    pub fn request_start(&self) -> bool {
        let started = self.suspend_frames
            .compare_exchange(SUSPEND_INDEFINITELY, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();

        if started {
            info!("Capture will start at the next frame boundary");
        }
        started
    }

    /// Advances the window by one frame boundary.
    pub fn frame_boundary(&self) -> FrameTransition {
        if self.complete.load(Ordering::SeqCst) {
            return FrameTransition::None;
        }

        // Each boundary takes exactly one frame off a positive count.
        let suspended = self.suspend_frames
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| if n > 0 { Some(n - 1) } else { None });
        match suspended {
            Ok(previous) => {
                let left = previous - 1;
                debug!("Frame boundary while suspended, {} to go", left);
                return if left == 0 {
                    info!("Capture started");
                    FrameTransition::Started
                } else {
                    FrameTransition::None
                };
            },
            Err(n) if n < 0 => return FrameTransition::None,
            Err(_) => {},
        }

        self.captured_frames.fetch_add(1, Ordering::SeqCst);
        let remaining = self.remaining_frames
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| if n > 0 { Some(n - 1) } else { None });
        if remaining == Ok(1) {
            info!("Captured the requested {} frames", self.captured_frames());
            self.complete.store(true, Ordering::SeqCst);
            return FrameTransition::Ended;
        }

        FrameTransition::None
    }

    /// Ends the capture for good, e.g. when the connection is lost.
    pub fn end(&self) {
        self.complete.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use crate::{CaptureState, CaptureWindow, FrameTransition};

    #[test]
    fn capture_starts_at_the_requested_frame() {
        let window = CaptureWindow::new(3, 0, false);

        assert_eq!(window.state(), CaptureState::Suspended(3));
        assert_eq!(window.frame_boundary(), FrameTransition::None);
        assert_eq!(window.frame_boundary(), FrameTransition::None);
        assert!(window.is_suspended());
        assert_eq!(window.frame_boundary(), FrameTransition::Started);
        assert!(window.is_active());
        assert_eq!(window.frame_boundary(), FrameTransition::None);
    }

    #[test]
    fn start_frame_zero_is_active_immediately() {
        let window = CaptureWindow::new(0, 0, false);

        assert!(window.is_active());
    }

    #[test]
    fn the_frame_budget_ends_the_capture_for_good() {
        let window = CaptureWindow::new(0, 2, false);

        assert_eq!(window.frame_boundary(), FrameTransition::None);
        assert_eq!(window.frame_boundary(), FrameTransition::Ended);
        assert_eq!(window.state(), CaptureState::Complete);
        assert_eq!(window.frame_boundary(), FrameTransition::None);
        assert!(!window.request_start());
        assert_eq!(window.state(), CaptureState::Complete);
    }

    #[test]
    fn deferred_capture_waits_for_the_request() {
        let window = CaptureWindow::new(5, 0, true);

        for _ in 0..10 {
            assert_eq!(window.frame_boundary(), FrameTransition::None);
        }
        assert_eq!(window.state(), CaptureState::SuspendedIndefinitely);

        assert!(window.request_start());
        assert!(!window.request_start());
        assert_eq!(window.frame_boundary(), FrameTransition::Started);
        assert!(window.is_active());
    }

    #[test]
    fn racing_frame_boundaries_start_the_capture_once() {
        for _ in 0..200 {
            let window = CaptureWindow::new(1, 1, false);
            let barrier = Barrier::new(2);

            let transitions: Vec<FrameTransition> = thread::scope(|scope| {
                let threads: Vec<_> = (0..2)
                    .map(|_| scope.spawn(|| {
                        barrier.wait();
                        window.frame_boundary()
                    }))
                    .collect();
                threads.into_iter().map(|t| t.join().unwrap()).collect()
            });

            let started = transitions.iter().filter(|t| **t == FrameTransition::Started).count();
            assert_eq!(started, 1, "{:?}", transitions);
            assert_ne!(window.state(), CaptureState::SuspendedIndefinitely);
        }
    }

    #[test]
    fn the_largest_start_frame_counts_down_without_wrapping() {
        let window = CaptureWindow::new(u32::MAX, 0, false);

        assert_eq!(window.state(), CaptureState::Suspended(u32::MAX));
        assert_eq!(window.frame_boundary(), FrameTransition::None);
        assert_eq!(window.state(), CaptureState::Suspended(u32::MAX - 1));
    }
}
