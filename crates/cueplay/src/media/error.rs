use thiserror::Error;

/// Errors surfaced by frame sources, audio devices and playback sessions.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The file could not be opened or is not supported. The session never starts.
    #[error("failed to open media: {0}")]
    Open(String),

    /// A single frame failed to decode. Recovered by skipping the frame.
    #[error("frame decode failed: {0}")]
    Decode(String),

    /// The audio output could not be opened. Playback continues video-only.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error(transparent)]
    Seek(#[from] SeekError),

    /// Unrecoverable source failure; the session ends.
    #[error("media source failed: {0}")]
    Source(String),

    /// The session was already closed; a new `Media` is required.
    #[error("media session is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Whether the decode pump may skip this error and keep pulling.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MediaError::Decode(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SeekError {
    #[error("seek target {target_us}us outside media duration {duration_us}us")]
    OutOfRange { target_us: i64, duration_us: i64 },

    #[error("source failed to reposition: {0}")]
    Reposition(String),

    #[error("buffers did not refill within {0}ms after seek")]
    Timeout(u64),

    #[error("session is not playing")]
    NotPlaying,
}
