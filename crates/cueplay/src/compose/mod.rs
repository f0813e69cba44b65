//! Frame producers and the layers that turn them into renderer-sized images.

pub mod cache;
pub mod crossfade;
pub mod scale;
pub mod still;

use std::sync::Arc;

use image::RgbaImage;

use crate::media::{MediaError, Size};

pub use cache::ScaledFrameCache;
pub use crossfade::CrossfadeCompositor;
pub use still::{SolidColor, StillImage};

/// Anything that can hand out its current frame without blocking.
///
/// Optional capabilities are discovered through the `as_*` accessors rather
/// than by downcasting.
pub trait FrameProducer: Send + Sync {
    /// Current frame at the producer's native size.
    fn produce(&self) -> Arc<RgbaImage>;

    fn as_startable(&self) -> Option<&dyn Startable> {
        None
    }

    fn as_pauseable(&self) -> Option<&dyn Pauseable> {
        None
    }

    fn as_scaled(&self) -> Option<&dyn Scaled> {
        None
    }
}

/// Producers with a start/stop lifecycle.
pub trait Startable {
    fn start(&self) -> Result<(), MediaError>;
    fn stop(&self);
}

pub trait Pauseable {
    fn set_paused(&self, paused: bool);
    fn is_paused(&self) -> bool;
}

/// Producers that render directly at a requested size.
pub trait Scaled {
    fn render_scaled(&self, size: Size) -> Arc<RgbaImage>;
}

/// Render `producer` at `size`, letterboxing when it has no scaled path.
pub fn render_at(producer: &dyn FrameProducer, size: Size) -> Arc<RgbaImage> {
    if let Some(scaled) = producer.as_scaled() {
        return scaled.render_scaled(size);
    }
    scale::fit(producer.produce(), size)
}
