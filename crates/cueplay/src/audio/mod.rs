pub mod output;

pub use output::CpalOutput;

use serde::{Deserialize, Serialize};

use crate::media::MediaError;

/// Byte layout of interleaved PCM samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    S16Le,
    F32Le,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16Le => 2,
            SampleFormat::F32Le => 4,
        }
    }

    /// Convert raw bytes to normalized f32 samples. A trailing partial sample is ignored.
    pub fn decode_f32(self, bytes: &[u8]) -> Vec<f32> {
        match self {
            SampleFormat::U8 => bytes
                .iter()
                .map(|&b| (f32::from(b) - 128.0) / 128.0)
                .collect(),
            SampleFormat::S16Le => bytes
                .chunks_exact(2)
                .map(|c| f32::from(i16::from_le_bytes([c[0], c[1]])) / 32768.0)
                .collect(),
            SampleFormat::F32Le => bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * self.sample_format.bytes_per_sample()
    }

    /// Playback duration of `len` bytes in this layout, in microseconds.
    pub fn duration_us(&self, len: usize) -> i64 {
        let bps = self.bytes_per_second();
        if bps == 0 {
            return 0;
        }
        (len as u128 * 1_000_000 / bps as u128) as i64
    }
}

/// An open audio output line.
///
/// `write` blocks until the device has accepted all bytes, which is what
/// paces the audio sink in real time.
pub trait AudioDevice: Send {
    fn write(&mut self, bytes: &[u8]) -> Result<(), MediaError>;
    /// Block until queued samples have been played (bounded).
    fn drain(&mut self);
    /// Discard samples accepted but not yet played.
    fn flush(&mut self) {}
    fn close(&mut self);
}

/// Factory for audio output lines.
pub trait AudioOutput: Send + Sync {
    fn open(&self, format: &AudioFormat) -> Result<Box<dyn AudioDevice>, MediaError>;
}

/// Output that never opens, forcing video-only playback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAudio;

impl AudioOutput for NoAudio {
    fn open(&self, _format: &AudioFormat) -> Result<Box<dyn AudioDevice>, MediaError> {
        Err(MediaError::DeviceUnavailable("audio output disabled".into()))
    }
}
