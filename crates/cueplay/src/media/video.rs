//! Streaming frame source backed by ffmpeg subprocesses (feature-gated behind `video`).
//!
//! - `ffprobe` reports stream metadata synchronously at open time
//! - one `ffmpeg` child per stream decodes to raw RGBA / s16le on stdout
//! - frames are interleaved by timestamp, seeking restarts both children with `-ss`

use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, OnceLock};

use image::RgbaImage;
use serde_json::Value;

use super::source::FrameSource;
use super::types::{AudioChunk, AudioStreamInfo, Frame, MediaInfo, VideoFrame, VideoStreamInfo};
use super::MediaError;
use crate::audio::SampleFormat;

/// Check if ffmpeg/ffprobe are available on the system. Cached per process.
pub fn ffmpeg_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        Command::new("ffprobe")
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    })
}

/// Probe stream metadata using ffprobe.
pub fn probe(path: &Path) -> Result<MediaInfo, MediaError> {
    let output = Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_streams", "-show_format"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .map_err(|e| MediaError::Open(format!("ffprobe failed to execute: {e}")))?;

    if !output.status.success() {
        return Err(MediaError::Open(format!(
            "ffprobe rejected {}",
            path.display()
        )));
    }

    let json: Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| MediaError::Open(format!("failed to parse ffprobe JSON: {e}")))?;
    parse_probe(&json)
}

fn parse_probe(json: &Value) -> Result<MediaInfo, MediaError> {
    let streams = json["streams"]
        .as_array()
        .ok_or_else(|| MediaError::Open("no streams in ffprobe output".into()))?;
    let find = |kind: &str| streams.iter().find(|s| s["codec_type"].as_str() == Some(kind));

    let video_stream = find("video");
    let video = video_stream
        .map(|s| -> Result<VideoStreamInfo, MediaError> {
            Ok(VideoStreamInfo {
                width: field_u32(s, "width")?,
                height: field_u32(s, "height")?,
                bitrate: parse_bitrate(&s["bit_rate"]),
            })
        })
        .transpose()?;

    let audio = find("audio")
        .map(|s| -> Result<AudioStreamInfo, MediaError> {
            Ok(AudioStreamInfo {
                channels: field_u32(s, "channels")?.clamp(1, u32::from(u16::MAX)) as u16,
                sample_rate: field_u32(s, "sample_rate")?,
                // ffmpeg is asked to resample into this layout.
                sample_format: SampleFormat::S16Le,
                bitrate: parse_bitrate(&s["bit_rate"]),
            })
        })
        .transpose()?;

    if video.is_none() && audio.is_none() {
        return Err(MediaError::Open("no audio or video stream found".into()));
    }

    let frame_rate = video_stream
        .and_then(|s| s["r_frame_rate"].as_str())
        .map_or(30.0, parse_frame_rate);

    let duration_secs = json["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .or_else(|| {
            video_stream
                .and_then(|s| s["duration"].as_str())
                .and_then(|s| s.parse::<f64>().ok())
        })
        .unwrap_or(0.0);

    Ok(MediaInfo {
        duration_us: (duration_secs * 1_000_000.0).round() as i64,
        frame_rate,
        video,
        audio,
    })
}

/// Integer stream field, reported by ffprobe either as a number or a string.
fn field_u32(stream: &Value, key: &str) -> Result<u32, MediaError> {
    let value = &stream[key];
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .map(|v| v.min(u64::from(u32::MAX)) as u32)
        .ok_or_else(|| MediaError::Open(format!("missing stream field `{key}`")))
}

/// Unreported bitrates count as 0, which still marks the stream as present.
fn parse_bitrate(value: &Value) -> i64 {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .or_else(|| value.as_i64())
        .unwrap_or(0)
}

fn parse_frame_rate(rate: &str) -> f64 {
    if let Some((num, den)) = rate.split_once('/') {
        let n: f64 = num.parse().unwrap_or(30.0);
        let d: f64 = den.parse().unwrap_or(1.0);
        if d > 0.0 && n > 0.0 { n / d } else { 30.0 }
    } else {
        rate.parse().ok().filter(|r: &f64| *r > 0.0).unwrap_or(30.0)
    }
}

/// Read until `buf` is full or the pipe closes. Returns the bytes read.
fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// One ffmpeg child streaming a single decoded stream.
struct StreamDecoder {
    child: Child,
    stdout: ChildStdout,
    /// Stream position the child was started at.
    base_us: i64,
    /// Frames (video) or bytes (audio) read so far.
    consumed: u64,
    done: bool,
}

impl StreamDecoder {
    fn spawn(mut command: Command) -> Result<Self, MediaError> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| MediaError::Source(format!("failed to spawn ffmpeg: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::Source("ffmpeg: no stdout pipe".into()))?;
        Ok(Self {
            child,
            stdout,
            base_us: 0,
            consumed: 0,
            done: false,
        })
    }

    fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for StreamDecoder {
    fn drop(&mut self) {
        self.kill();
    }
}

/// `FrameSource` decoding any file ffmpeg understands.
#[derive(Default)]
pub struct FfmpegSource {
    path: Option<PathBuf>,
    info: Option<MediaInfo>,
    video: Option<StreamDecoder>,
    audio: Option<StreamDecoder>,
    audio_chunk_bytes: usize,
}

impl FfmpegSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn base_command(path: &Path, start_us: i64) -> Command {
        let mut command = Command::new("ffmpeg");
        command.args(["-v", "quiet", "-nostdin"]);
        if start_us > 0 {
            command.args(["-ss", &format!("{:.6}", start_us as f64 / 1_000_000.0)]);
        }
        command.arg("-i").arg(path);
        command
    }

    fn spawn_decoders(&mut self, start_us: i64) -> Result<(), MediaError> {
        let (Some(path), Some(info)) = (self.path.as_deref(), self.info.as_ref()) else {
            return Err(MediaError::Source("source is not open".into()));
        };

        // Old children die on drop before the replacements start.
        self.video = None;
        self.audio = None;

        if info.video.is_some() {
            let mut command = Self::base_command(path, start_us);
            command.args([
                "-map", "0:v:0",
                "-r", &format!("{}", info.frame_rate),
                "-f", "rawvideo",
                "-pix_fmt", "rgba",
                "pipe:1",
            ]);
            let mut decoder = StreamDecoder::spawn(command)?;
            decoder.base_us = start_us;
            self.video = Some(decoder);
        }

        if let Some(audio) = &info.audio {
            let mut command = Self::base_command(path, start_us);
            command.args([
                "-map", "0:a:0",
                "-f", "s16le",
                "-acodec", "pcm_s16le",
                "-ac", &audio.channels.to_string(),
                "-ar", &audio.sample_rate.to_string(),
                "pipe:1",
            ]);
            let mut decoder = StreamDecoder::spawn(command)?;
            decoder.base_us = start_us;
            self.audio = Some(decoder);
        }

        log::debug!("ffmpeg decoders started at {start_us}us");
        Ok(())
    }

    fn next_video_us(&self, info: &MediaInfo) -> Option<i64> {
        let decoder = self.video.as_ref().filter(|d| !d.done)?;
        Some(decoder.base_us + decoder.consumed as i64 * info.interframe_us())
    }

    fn next_audio_us(&self, info: &MediaInfo) -> Option<i64> {
        let decoder = self.audio.as_ref().filter(|d| !d.done)?;
        let format = info.audio.as_ref()?.format();
        Some(decoder.base_us + format.duration_us(decoder.consumed as usize))
    }

    fn read_video(&mut self, info: &MediaInfo, timestamp_us: i64) -> Result<Option<Frame>, MediaError> {
        let Some((video, decoder)) = info.video.as_ref().zip(self.video.as_mut()) else {
            return Ok(None);
        };
        let mut buf = vec![0u8; video.width as usize * video.height as usize * 4];
        match decoder.stdout.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                decoder.done = true;
                return Ok(None);
            }
            Err(e) => return Err(MediaError::Source(format!("video pipe failed: {e}"))),
        }
        decoder.consumed += 1;
        let image = RgbaImage::from_raw(video.width, video.height, buf)
            .ok_or_else(|| MediaError::Decode("short video frame".into()))?;
        Ok(Some(Frame::Video(VideoFrame {
            image: Arc::new(image),
            timestamp_us,
        })))
    }

    fn read_audio(&mut self, timestamp_us: i64) -> Result<Option<Frame>, MediaError> {
        let chunk_bytes = self.audio_chunk_bytes;
        let Some(decoder) = self.audio.as_mut() else {
            return Ok(None);
        };
        let mut data = vec![0u8; chunk_bytes];
        let n = read_up_to(&mut decoder.stdout, &mut data)
            .map_err(|e| MediaError::Source(format!("audio pipe failed: {e}")))?;
        if n < chunk_bytes {
            decoder.done = true;
        }
        if n == 0 {
            return Ok(None);
        }
        data.truncate(n);
        decoder.consumed += n as u64;
        Ok(Some(Frame::Audio(AudioChunk { data, timestamp_us })))
    }
}

impl FrameSource for FfmpegSource {
    fn open(&mut self, path: &Path) -> Result<MediaInfo, MediaError> {
        if !ffmpeg_available() {
            return Err(MediaError::Open("ffmpeg/ffprobe not found on PATH".into()));
        }
        let info = probe(path)?;

        // One audio chunk per video frame, aligned to whole sample frames.
        self.audio_chunk_bytes = info.audio.as_ref().map_or(0, |audio| {
            let format = audio.format();
            let align = format.channels as usize * format.sample_format.bytes_per_sample();
            let per_frame = format.bytes_per_second() as f64 / info.frame_rate.max(1.0);
            ((per_frame as usize / align).max(1)) * align
        });

        log::info!(
            "Opened {}: {:?} video, {:?} audio, {:.2} fps, {:.1}s",
            path.display(),
            info.video.as_ref().map(|v| (v.width, v.height)),
            info.audio.as_ref().map(|a| (a.channels, a.sample_rate)),
            info.frame_rate,
            info.duration_us as f64 / 1_000_000.0,
        );

        self.path = Some(path.to_path_buf());
        self.info = Some(info.clone());
        self.spawn_decoders(0)?;
        Ok(info)
    }

    fn info(&self) -> Option<&MediaInfo> {
        self.info.as_ref()
    }

    fn next_frame(&mut self) -> Result<Frame, MediaError> {
        let info = self
            .info
            .clone()
            .ok_or_else(|| MediaError::Source("source is not open".into()))?;

        loop {
            let video_us = self.next_video_us(&info);
            let audio_us = self.next_audio_us(&info);
            let frame = match (video_us, audio_us) {
                (None, None) => return Ok(Frame::EndOfStream),
                (Some(v), Some(a)) if v < a => self.read_video(&info, v)?,
                (Some(v), None) => self.read_video(&info, v)?,
                (_, Some(a)) => self.read_audio(a)?,
            };
            // `None` means that stream just ended; pick again.
            if let Some(frame) = frame {
                return Ok(frame);
            }
        }
    }

    fn seek(&mut self, timestamp_us: i64) -> Result<(), MediaError> {
        self.spawn_decoders(timestamp_us.max(0))
    }

    fn close(&mut self) {
        self.video = None;
        self.audio = None;
    }
}
