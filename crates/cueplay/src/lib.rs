//! Synchronized audio/video media playback.
//!
//! [`media::Media`] decodes a file on background threads and keeps audio and
//! video in lock-step; [`compose`] turns any frame producer into
//! renderer-sized images, cached off the render thread and crossfaded when
//! the source changes.

pub mod audio;
pub mod compose;
pub mod events;
pub mod media;
pub mod registry;
pub mod settings;

pub use compose::{CrossfadeCompositor, FrameProducer, ScaledFrameCache};
pub use events::MediaEvent;
pub use media::{Media, MediaError, SeekError, SessionState, Size};
pub use registry::DeviceRegistry;
pub use settings::PlayerConfig;
