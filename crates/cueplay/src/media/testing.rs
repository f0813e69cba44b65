//! Deterministic source and device doubles for session tests.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use image::{Rgba, RgbaImage};

use super::source::FrameSource;
use super::types::{AudioChunk, AudioStreamInfo, Frame, MediaInfo, VideoFrame, VideoStreamInfo};
use super::MediaError;
use crate::audio::{AudioDevice, AudioFormat, AudioOutput, SampleFormat};

pub(crate) const FPS: i64 = 30;

pub(crate) fn test_info(duration_us: i64, with_audio: bool) -> MediaInfo {
    MediaInfo {
        duration_us,
        frame_rate: FPS as f64,
        video: Some(VideoStreamInfo {
            width: 4,
            height: 4,
            bitrate: 1_000,
        }),
        audio: with_audio.then(|| AudioStreamInfo {
            channels: 2,
            sample_rate: 48_000,
            sample_format: SampleFormat::S16Le,
            bitrate: 1_536_000,
        }),
    }
}

pub(crate) fn timestamp_of(index: u64) -> i64 {
    index as i64 * 1_000_000 / FPS
}

/// First frame index whose timestamp is at or after `timestamp_us`.
pub(crate) fn index_at(timestamp_us: i64) -> u64 {
    ((timestamp_us.max(0) * FPS + 999_999) / 1_000_000) as u64
}

/// 4x4 frame whose first two channels encode its index.
pub(crate) fn frame_image(index: u64) -> RgbaImage {
    RgbaImage::from_pixel(4, 4, Rgba([(index % 256) as u8, (index / 256 % 256) as u8, 0, 255]))
}

pub(crate) fn frame_index(image: &RgbaImage) -> Option<u64> {
    if image.dimensions() != (4, 4) {
        return None;
    }
    let p = image.get_pixel(0, 0).0;
    Some(u64::from(p[0]) + u64::from(p[1]) * 256)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Corruption {
    None,
    AfterSeek,
    Always,
}

/// 30 fps source emitting one audio chunk ahead of each video frame.
pub(crate) struct SyntheticSource {
    info: MediaInfo,
    total_frames: u64,
    with_audio: bool,
    next_index: u64,
    audio_sent: bool,
    decode_error_at: Option<u64>,
    fatal_error_at: Option<u64>,
    fail_open: bool,
    fail_seek: bool,
    /// Which frames fail to decode.
    corrupt: Corruption,
    seeked: bool,
    pub closed: Arc<AtomicBool>,
}

impl SyntheticSource {
    pub fn new(total_frames: u64, with_audio: bool) -> Self {
        Self {
            info: test_info(timestamp_of(total_frames), with_audio),
            total_frames,
            with_audio,
            next_index: 0,
            audio_sent: false,
            decode_error_at: None,
            fatal_error_at: None,
            fail_open: false,
            fail_seek: false,
            corrupt: Corruption::None,
            seeked: false,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn media_info(&self) -> &MediaInfo {
        &self.info
    }

    pub fn with_decode_error_at(mut self, index: u64) -> Self {
        self.decode_error_at = Some(index);
        self
    }

    pub fn with_fatal_error_at(mut self, index: u64) -> Self {
        self.fatal_error_at = Some(index);
        self
    }

    pub fn with_failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn with_failing_seek(mut self) -> Self {
        self.fail_seek = true;
        self
    }

    /// Only decode errors once the source has been repositioned.
    pub fn corrupt_after_seek(mut self) -> Self {
        self.corrupt = Corruption::AfterSeek;
        self
    }

    /// Nothing ever decodes.
    pub fn always_corrupt(mut self) -> Self {
        self.corrupt = Corruption::Always;
        self
    }

    fn audio_chunk(&self, index: u64) -> AudioChunk {
        let bytes = self.info.audio.as_ref().map_or(0, |a| a.format().bytes_per_second()) / FPS as usize;
        AudioChunk {
            data: vec![0; bytes],
            timestamp_us: timestamp_of(index),
        }
    }

    fn advance(&mut self) {
        self.next_index += 1;
        self.audio_sent = false;
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self, _path: &Path) -> Result<MediaInfo, MediaError> {
        if self.fail_open {
            return Err(MediaError::Open("synthetic open failure".into()));
        }
        Ok(self.info.clone())
    }

    fn info(&self) -> Option<&MediaInfo> {
        Some(&self.info)
    }

    fn next_frame(&mut self) -> Result<Frame, MediaError> {
        if self.fatal_error_at == Some(self.next_index) {
            return Err(MediaError::Source("synthetic fatal error".into()));
        }
        if self.next_index >= self.total_frames {
            return Ok(Frame::EndOfStream);
        }
        match self.corrupt {
            Corruption::Always => return Err(MediaError::Decode("synthetic garbage".into())),
            Corruption::AfterSeek if self.seeked => {
                return Err(MediaError::Decode("synthetic garbage after seek".into()));
            }
            _ => {}
        }
        if self.with_audio && !self.audio_sent {
            self.audio_sent = true;
            return Ok(Frame::Audio(self.audio_chunk(self.next_index)));
        }
        let index = self.next_index;
        self.advance();
        if self.decode_error_at == Some(index) {
            return Err(MediaError::Decode(format!("synthetic corrupt frame {index}")));
        }
        Ok(Frame::Video(VideoFrame {
            image: Arc::new(frame_image(index)),
            timestamp_us: timestamp_of(index),
        }))
    }

    fn seek(&mut self, timestamp_us: i64) -> Result<(), MediaError> {
        if self.fail_seek {
            return Err(MediaError::Source("synthetic seek failure".into()));
        }
        self.next_index = index_at(timestamp_us);
        self.audio_sent = false;
        self.seeked = true;
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Audio output whose devices block for the real playback time of each write.
#[derive(Clone, Default)]
pub(crate) struct RecordingOutput {
    pub writes: Arc<AtomicUsize>,
    pub flushes: Arc<AtomicUsize>,
    pub closed: Arc<AtomicBool>,
    pub unavailable: bool,
}

impl RecordingOutput {
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }
}

impl AudioOutput for RecordingOutput {
    fn open(&self, format: &AudioFormat) -> Result<Box<dyn AudioDevice>, MediaError> {
        if self.unavailable {
            return Err(MediaError::DeviceUnavailable("no test device".into()));
        }
        Ok(Box::new(RecordingDevice {
            format: *format,
            writes: self.writes.clone(),
            flushes: self.flushes.clone(),
            closed: self.closed.clone(),
        }))
    }
}

struct RecordingDevice {
    format: AudioFormat,
    writes: Arc<AtomicUsize>,
    flushes: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl AudioDevice for RecordingDevice {
    fn write(&mut self, bytes: &[u8]) -> Result<(), MediaError> {
        let micros = self.format.duration_us(bytes.len()).max(0) as u64;
        std::thread::sleep(Duration::from_micros(micros));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn drain(&mut self) {}

    fn flush(&mut self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
