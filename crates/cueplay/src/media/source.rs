use std::path::Path;

use super::types::{Frame, MediaInfo};
use super::MediaError;

/// Container/codec boundary: yields decoded frames in decode order.
///
/// Implementations are driven from the decode pump thread, and from the
/// caller's thread during `seek`; the session serializes those calls.
pub trait FrameSource: Send {
    /// Open `path` and report stream metadata. Errors are `MediaError::Open`.
    fn open(&mut self, path: &Path) -> Result<MediaInfo, MediaError>;

    /// Metadata from the last successful `open`.
    fn info(&self) -> Option<&MediaInfo>;

    /// Next decoded frame, `Frame::EndOfStream` once exhausted.
    ///
    /// `MediaError::Decode` marks a single bad frame; any other error is fatal.
    fn next_frame(&mut self) -> Result<Frame, MediaError>;

    /// Reposition so the next frames start at `timestamp_us`.
    fn seek(&mut self, timestamp_us: i64) -> Result<(), MediaError>;

    fn close(&mut self);
}
