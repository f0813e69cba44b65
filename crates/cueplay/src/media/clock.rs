use std::sync::atomic::{AtomicI64, Ordering};

/// Shared playback position in microseconds.
///
/// Written by exactly one stream at a time (audio when it governs, otherwise
/// video) with `Release`, read by the presenter and the renderer with `Acquire`.
#[derive(Debug, Default)]
pub struct MediaClock {
    position_us: AtomicI64,
}

impl MediaClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> i64 {
        self.position_us.load(Ordering::Acquire)
    }

    pub fn set(&self, position_us: i64) {
        self.position_us.store(position_us, Ordering::Release);
    }
}
