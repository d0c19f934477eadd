use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use arc_swap::ArcSwapOption;

/// Single-slot handoff between the HTTP handler and the render loop.
///
/// Holds at most one frame. A new `put` replaces whatever is there, rendered
/// or not, so a slow renderer simply skips frames. Neither side ever blocks.
#[derive(Default)]
pub struct FrameSlot {
    frame: ArcSwapOption<Vec<u8>>,
    dirty: AtomicBool,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, frame: Vec<u8>) {
        // frame first, so a reader that sees the flag also sees this frame or a newer one
        self.frame.store(Some(Arc::new(frame)));
        self.dirty.store(true, Ordering::Release);
    }

    /// Returns the latest frame if it has not been taken yet, clearing the flag.
    pub fn take(&self) -> Option<Arc<Vec<u8>>> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            self.frame.load_full()
        } else {
            None
        }
    }

    pub fn latest(&self) -> Option<Arc<Vec<u8>>> {
        self.frame.load_full()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}
