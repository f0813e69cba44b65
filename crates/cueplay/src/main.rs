use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, Sender};

use cueplay::audio::{AudioOutput, CpalOutput, NoAudio};
use cueplay::compose::{FrameProducer, ScaledFrameCache, StillImage};
use cueplay::media::StreamKind;
use cueplay::{CrossfadeCompositor, DeviceRegistry, Media, PlayerConfig, SessionState, Size};

const RENDER_SIZE: Size = Size::new(1280, 720);
const FRAME_INTERVAL: Duration = Duration::from_millis(33);
const REPORT_INTERVAL: Duration = Duration::from_secs(1);
const STILL_HOLD: Duration = Duration::from_secs(5);

const USAGE: &str = "usage: cueplay [--fade-ms MS] [--hold-secs S] [--mute] [--config PATH] FILE...";

#[derive(Debug, Default)]
struct Args {
    files: Vec<PathBuf>,
    fade_ms: Option<u64>,
    hold: Option<Duration>,
    mute: bool,
    config: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fade-ms" => {
                let value = args.next().context("--fade-ms needs a value")?;
                parsed.fade_ms = Some(value.parse().with_context(|| format!("bad --fade-ms {value}"))?);
            }
            "--hold-secs" => {
                let value = args.next().context("--hold-secs needs a value")?;
                let secs: f64 = value.parse().with_context(|| format!("bad --hold-secs {value}"))?;
                parsed.hold = Some(Duration::from_secs_f64(secs.max(0.0)));
            }
            "--mute" => parsed.mute = true,
            "--config" => parsed.config = Some(args.next().context("--config needs a path")?.into()),
            "-h" | "--help" => bail!(USAGE),
            flag if flag.starts_with("--") => bail!("unknown option {flag}\n{USAGE}"),
            file => parsed.files.push(file.into()),
        }
    }
    if parsed.files.is_empty() {
        bail!(USAGE);
    }
    Ok(parsed)
}

fn is_still(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "gif" | "webp")
}

/// Headless cue player: a render loop pulling composited frames while cues
/// advance on completion or after a hold time.
struct Player {
    files: Vec<PathBuf>,
    hold: Option<Duration>,
    config: PlayerConfig,
    output: Arc<dyn AudioOutput>,
    registry: DeviceRegistry<usize, Media>,
    compositor: CrossfadeCompositor,
    done_tx: Sender<usize>,
    done_rx: Receiver<usize>,
    current: usize,
    cue_started: Instant,
    /// Media faded out from, released once the fade completes.
    releasing: Vec<usize>,
}

impl Player {
    fn new(args: Args, config: PlayerConfig) -> Self {
        let output: Arc<dyn AudioOutput> = if args.mute {
            Arc::new(NoAudio)
        } else {
            Arc::new(CpalOutput)
        };
        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        Self {
            files: args.files,
            hold: args.hold,
            compositor: CrossfadeCompositor::new(&config),
            config,
            output,
            registry: DeviceRegistry::new(),
            done_tx,
            done_rx,
            current: 0,
            cue_started: Instant::now(),
            releasing: Vec::new(),
        }
    }

    /// Fade to cue `index`. Returns false if it could not be started.
    fn cue(&mut self, index: usize) -> Result<bool> {
        let path = self.files[index].clone();
        let producer: Arc<dyn FrameProducer> = if is_still(&path) {
            Arc::new(StillImage::load(&path).with_context(|| format!("loading {}", path.display()))?)
        } else {
            let media = self.registry.get_or_create(&index, || {
                Ok::<_, anyhow::Error>(Media::open(&path, self.output.clone(), &self.config))
            })?;
            let done = self.done_tx.clone();
            media.on_complete(move || {
                let _ = done.send(index);
            });
            media
        };

        if self.registry.get(&self.current).is_some() && self.current != index {
            self.releasing.push(self.current);
        }
        self.compositor
            .set_source(Arc::new(ScaledFrameCache::new(producer, &self.config)));
        self.current = index;
        self.cue_started = Instant::now();

        let started = self
            .registry
            .get(&index)
            .is_none_or(|media| media.state() != SessionState::Stopped);
        log::info!("Cue {}/{}: {}", index + 1, self.files.len(), path.display());
        Ok(started)
    }

    fn hold_for_current(&self) -> Option<Duration> {
        if is_still(&self.files[self.current]) {
            Some(self.hold.unwrap_or(STILL_HOLD))
        } else {
            self.hold
        }
    }

    fn cue_finished(&self) -> bool {
        let completed = self.done_rx.try_iter().any(|index| index == self.current);
        let held = self
            .hold_for_current()
            .is_some_and(|hold| self.cue_started.elapsed() >= hold);
        let ended = self
            .registry
            .get(&self.current)
            .is_some_and(|media| media.state() == SessionState::Ended);
        completed || held || ended
    }

    fn report(&self) {
        let Some(media) = self.registry.get(&self.current) else {
            return;
        };
        let duration = media.info().map_or(0, |info| info.duration_us);
        log::info!(
            "{:?} {:.1}s / {:.1}s  video {}%  audio {}%  presented {}  skipped {}",
            media.state(),
            media.playback_position() as f64 / 1_000_000.0,
            duration as f64 / 1_000_000.0,
            media.buffer_fill_percent(StreamKind::Video),
            media.buffer_fill_percent(StreamKind::Audio),
            media.frames_presented(),
            media.decode_errors(),
        );
    }

    fn run(&mut self) -> Result<()> {
        let mut started = self.cue(0)?;
        let mut last_report = Instant::now();

        loop {
            let tick = Instant::now();
            let frame = self.compositor.current_image(RENDER_SIZE);
            debug_assert_eq!(frame.dimensions(), (RENDER_SIZE.width, RENDER_SIZE.height));

            if !started || self.cue_finished() {
                let next = self.current + 1;
                if next >= self.files.len() {
                    break;
                }
                started = self.cue(next)?;
            }

            if !self.compositor.is_fading() {
                for index in self.releasing.drain(..) {
                    self.registry.remove(&index);
                }
            }

            if last_report.elapsed() >= REPORT_INTERVAL {
                self.report();
                last_report = Instant::now();
            }

            std::thread::sleep(FRAME_INTERVAL.saturating_sub(tick.elapsed()));
        }

        log::info!("Playlist finished");
        Ok(())
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.compositor.clear();
        self.registry.close_all();
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    let mut config = match &args.config {
        Some(path) => PlayerConfig::load_from(path)?,
        None => PlayerConfig::load(),
    };
    if let Some(fade_ms) = args.fade_ms {
        config.fade_duration_ms = fade_ms;
    }
    if !cueplay::media::video::ffmpeg_available() && args.files.iter().any(|f| !is_still(f)) {
        log::warn!("ffmpeg/ffprobe not found on PATH; video cues will fail to open");
    }

    Player::new(args, config).run()
}
