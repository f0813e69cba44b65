use std::sync::Arc;

use image::RgbaImage;

use crate::audio::{AudioFormat, SampleFormat};

/// A decoded video frame ready for presentation.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: Arc<RgbaImage>,
    /// Presentation time in microseconds from stream start.
    pub timestamp_us: i64,
}

/// A chunk of decoded, interleaved audio samples in the stream's byte layout.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub data: Vec<u8>,
    pub timestamp_us: i64,
}

/// One unit pulled from a frame source.
#[derive(Debug, Clone)]
pub enum Frame {
    Video(VideoFrame),
    Audio(AudioChunk),
    EndOfStream,
}

/// Which of the two session queues a query refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoStreamInfo {
    pub width: u32,
    pub height: u32,
    /// Bits per second; negative marks a stream not waited on while buffering.
    pub bitrate: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioStreamInfo {
    pub channels: u16,
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    /// Bits per second; negative marks a stream that must not drive the clock.
    pub bitrate: i64,
}

impl AudioStreamInfo {
    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            sample_format: self.sample_format,
        }
    }
}

/// Read-only metadata reported by a frame source after `open`.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    /// Total duration in microseconds; 0 when unknown.
    pub duration_us: i64,
    pub frame_rate: f64,
    pub video: Option<VideoStreamInfo>,
    pub audio: Option<AudioStreamInfo>,
}

impl MediaInfo {
    /// Nominal spacing between video frames.
    pub fn interframe_us(&self) -> i64 {
        let fps = if self.frame_rate > 0.0 { self.frame_rate } else { 30.0 };
        (1_000_000.0 / fps).round() as i64
    }

    /// Whether the audio stream is allowed to govern the clock.
    pub fn audio_drives_clock(&self) -> bool {
        self.audio.as_ref().is_some_and(|a| a.bitrate >= 0)
    }

    /// Minimum queue occupancy before consumers may start.
    pub fn min_fill(&self, kind: StreamKind) -> usize {
        let present = match kind {
            StreamKind::Video => self.video.as_ref().is_some_and(|v| v.bitrate >= 0),
            StreamKind::Audio => self.audio_drives_clock(),
        };
        usize::from(present)
    }
}

/// Externally visible state of a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Buffering,
    Playing,
    Paused,
    SeekPending,
    Draining,
    Ended,
}

/// Target output size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}
