use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};
use parking_lot::Mutex;

use super::{FrameProducer, Pauseable, Startable};
use crate::media::MediaError;

enum Frames {
    Static(Arc<RgbaImage>),
    /// Pre-decoded GIF frames with per-frame delays in milliseconds.
    Animated {
        frames: Vec<Arc<RgbaImage>>,
        delays_ms: Vec<u32>,
        total_ms: u64,
    },
}

struct Playhead {
    started: Instant,
    paused_at: Option<Instant>,
}

impl Playhead {
    fn elapsed(&self, now: Instant) -> Duration {
        self.paused_at.unwrap_or(now).saturating_duration_since(self.started)
    }
}

/// A still image or looping animated GIF as a frame producer.
pub struct StillImage {
    frames: Frames,
    playhead: Mutex<Playhead>,
}

impl StillImage {
    /// Load an image or animated GIF from a file path.
    pub fn load(path: &Path) -> Result<Self, MediaError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        if ext == "gif" {
            let (frames, delays_ms) = load_gif(path)?;
            if frames.len() > 1 {
                return Ok(Self::animated(frames, delays_ms));
            }
            if let Some(first) = frames.into_iter().next() {
                return Ok(Self::from_image(first));
            }
            return Err(MediaError::Open("GIF has no frames".into()));
        }

        let img = image::open(path).map_err(|e| MediaError::Open(format!("failed to open image: {e}")))?;
        Ok(Self::from_image(img.to_rgba8()))
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self::with_frames(Frames::Static(Arc::new(image)))
    }

    /// Animation looping over `frames`, each shown for its delay (minimum 20ms).
    pub fn animated(frames: Vec<RgbaImage>, delays_ms: Vec<u32>) -> Self {
        let delays_ms: Vec<u32> = (0..frames.len())
            .map(|i| delays_ms.get(i).copied().unwrap_or(100).max(20))
            .collect();
        let total_ms = delays_ms.iter().map(|&d| u64::from(d)).sum();
        Self::with_frames(Frames::Animated {
            frames: frames.into_iter().map(Arc::new).collect(),
            delays_ms,
            total_ms,
        })
    }

    fn with_frames(frames: Frames) -> Self {
        Self {
            frames,
            playhead: Mutex::new(Playhead {
                started: Instant::now(),
                paused_at: None,
            }),
        }
    }

    pub fn frame_count(&self) -> usize {
        match &self.frames {
            Frames::Static(_) => 1,
            Frames::Animated { frames, .. } => frames.len(),
        }
    }

    pub fn is_animated(&self) -> bool {
        matches!(self.frames, Frames::Animated { .. })
    }

    /// Frame shown `elapsed` after the animation started.
    pub fn frame_at(&self, elapsed: Duration) -> Arc<RgbaImage> {
        match &self.frames {
            Frames::Static(image) => image.clone(),
            Frames::Animated {
                frames,
                delays_ms,
                total_ms,
            } => {
                let mut t = elapsed.as_millis() as u64 % (*total_ms).max(1);
                for (frame, &delay) in frames.iter().zip(delays_ms) {
                    if t < u64::from(delay) {
                        return frame.clone();
                    }
                    t -= u64::from(delay);
                }
                frames[frames.len() - 1].clone()
            }
        }
    }
}

impl FrameProducer for StillImage {
    fn produce(&self) -> Arc<RgbaImage> {
        let elapsed = self.playhead.lock().elapsed(Instant::now());
        self.frame_at(elapsed)
    }

    fn as_startable(&self) -> Option<&dyn Startable> {
        self.is_animated().then_some(self as &dyn Startable)
    }

    fn as_pauseable(&self) -> Option<&dyn Pauseable> {
        self.is_animated().then_some(self as &dyn Pauseable)
    }
}

impl Startable for StillImage {
    /// Restart the animation from its first frame.
    fn start(&self) -> Result<(), MediaError> {
        let mut playhead = self.playhead.lock();
        playhead.started = Instant::now();
        playhead.paused_at = None;
        Ok(())
    }

    fn stop(&self) {
        self.set_paused(true);
    }
}

impl Pauseable for StillImage {
    fn set_paused(&self, paused: bool) {
        let mut playhead = self.playhead.lock();
        let now = Instant::now();
        match (paused, playhead.paused_at) {
            (true, None) => playhead.paused_at = Some(now),
            (false, Some(at)) => {
                // Shift the start so the animation resumes where it froze.
                playhead.started += now.saturating_duration_since(at);
                playhead.paused_at = None;
            }
            _ => {}
        }
    }

    fn is_paused(&self) -> bool {
        self.playhead.lock().paused_at.is_some()
    }
}

/// Decode every GIF frame, compositing partial updates onto a full canvas.
fn load_gif(path: &Path) -> Result<(Vec<RgbaImage>, Vec<u32>), MediaError> {
    let file = File::open(path)?;
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::RGBA);
    let mut reader = options
        .read_info(file)
        .map_err(|e| MediaError::Open(format!("failed to decode GIF: {e}")))?;

    let width = u32::from(reader.width());
    let height = u32::from(reader.height());
    let mut canvas = RgbaImage::new(width, height);
    let mut frames = Vec::new();
    let mut delays_ms = Vec::new();

    while let Some(frame) = reader
        .read_next_frame()
        .map_err(|e| MediaError::Decode(format!("GIF frame error: {e}")))?
    {
        // GIF delays are in centiseconds.
        delays_ms.push(u32::from(frame.delay) * 10);

        let (fx, fy) = (u32::from(frame.left), u32::from(frame.top));
        let fw = u32::from(frame.width);
        for (i, px) in frame.buffer.chunks_exact(4).enumerate() {
            let x = fx + i as u32 % fw.max(1);
            let y = fy + i as u32 / fw.max(1);
            if x < width && y < height && px[3] > 0 {
                canvas.put_pixel(x, y, Rgba([px[0], px[1], px[2], px[3]]));
            }
        }
        frames.push(canvas.clone());
    }

    log::info!("Loaded GIF: {width}x{height}, {} frames", frames.len());
    Ok((frames, delays_ms))
}

/// Uniform color at a fixed size.
pub struct SolidColor {
    image: Arc<RgbaImage>,
}

impl SolidColor {
    pub fn new(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self {
            image: Arc::new(RgbaImage::from_pixel(width.max(1), height.max(1), Rgba(rgba))),
        }
    }

    pub fn black() -> Self {
        Self::new(1, 1, [0, 0, 0, 255])
    }
}

impl FrameProducer for SolidColor {
    fn produce(&self) -> Arc<RgbaImage> {
        self.image.clone()
    }
}
