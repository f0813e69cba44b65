//! Synchronized audio/video playback of a single media file.
//!
//! A started [`Media`] runs three threads: a decode pump filling two bounded
//! queues, an audio sink writing to the output device, and a video presenter
//! publishing frames paced against the shared clock. The renderer only ever
//! reads the published frame.

mod audio_sink;
pub mod clock;
pub mod error;
mod presenter;
mod pump;
pub mod queue;
mod seek;
mod session;
pub mod source;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;
#[cfg(feature = "video")]
pub mod video;

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use image::RgbaImage;
use parking_lot::Mutex;

pub use clock::MediaClock;
pub use error::{MediaError, SeekError};
pub use presenter::pacing_delay;
pub use queue::{BoundedFrameQueue, DEFAULT_CAPACITY};
pub use source::FrameSource;
pub use types::{
    AudioChunk, AudioStreamInfo, Frame, MediaInfo, SessionState, Size, StreamKind, VideoFrame,
    VideoStreamInfo,
};

use crate::audio::{AudioDevice, AudioOutput};
use crate::compose::scale::{fit, placeholder};
use crate::compose::{FrameProducer, Pauseable, Scaled, Startable};
use crate::events::{EventBus, MediaEvent};
use crate::registry::Closeable;
use crate::settings::PlayerConfig;
use pump::SharedSource;
use session::{CompletionCallback, Session, spawn_session_thread};

enum Lifecycle {
    Idle,
    Running(Vec<JoinHandle<()>>),
    Closed,
}

/// One playable file and, once started, its playback session.
///
/// A `Media` plays once: after `close` a new instance is required.
pub struct Media {
    path: PathBuf,
    config: PlayerConfig,
    source: SharedSource,
    output: Arc<dyn AudioOutput>,
    events: Arc<EventBus>,
    session: OnceLock<Arc<Session>>,
    pending_completion: Mutex<Option<CompletionCallback>>,
    lifecycle: Mutex<Lifecycle>,
    seek_lock: Mutex<()>,
}

impl Media {
    pub fn new(
        path: impl Into<PathBuf>,
        source: Box<dyn FrameSource>,
        output: Arc<dyn AudioOutput>,
        config: &PlayerConfig,
    ) -> Self {
        Self {
            path: path.into(),
            config: config.clone(),
            source: Arc::new(Mutex::new(source)),
            output,
            events: Arc::new(EventBus::new()),
            session: OnceLock::new(),
            pending_completion: Mutex::new(None),
            lifecycle: Mutex::new(Lifecycle::Idle),
            seek_lock: Mutex::new(()),
        }
    }

    /// Media decoded by ffmpeg subprocesses.
    #[cfg(feature = "video")]
    pub fn open(
        path: impl Into<PathBuf>,
        output: Arc<dyn AudioOutput>,
        config: &PlayerConfig,
    ) -> Self {
        Self::new(path, Box::new(video::FfmpegSource::new()), output, config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn session(&self) -> Option<&Arc<Session>> {
        self.session.get()
    }

    /// Open the source and audio device, buffer, then start playback.
    ///
    /// An unavailable audio device degrades to video-only playback. Starting
    /// an already started `Media` is a no-op; starting a closed one fails.
    pub fn start(&self) -> Result<(), MediaError> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Idle => {}
            Lifecycle::Running(_) => return Ok(()),
            Lifecycle::Closed => return Err(MediaError::Closed),
        }

        let info = self.source.lock().open(&self.path)?;
        let session = Arc::new(Session::new(
            info,
            self.config.clone(),
            self.events.clone(),
            self.pending_completion.lock().take(),
        ));

        let device = match &session.info.audio {
            Some(audio) => match self.output.open(&audio.format()) {
                Ok(device) => {
                    session.set_audio_enabled(true);
                    Some(device)
                }
                Err(e) => {
                    log::warn!("{e}; playing {} without audio", self.path.display());
                    None
                }
            },
            None => None,
        };

        if self.session.set(session.clone()).is_err() {
            return Err(MediaError::Closed);
        }

        let mut threads = Vec::with_capacity(3);
        if let Err(e) = self.spawn_threads(&session, device, &mut threads) {
            session.cancel();
            for thread in threads {
                let _ = thread.join();
            }
            *lifecycle = Lifecycle::Closed;
            return Err(e);
        }

        log::info!("Playing {}", self.path.display());
        *lifecycle = Lifecycle::Running(threads);
        Ok(())
    }

    fn spawn_threads(
        &self,
        session: &Arc<Session>,
        device: Option<Box<dyn AudioDevice>>,
        threads: &mut Vec<JoinHandle<()>>,
    ) -> Result<(), MediaError> {
        let source = self.source.clone();
        threads.push(spawn_session_thread("cueplay-decode", session.clone(), move |s| {
            pump::run(s, &source)
        })?);

        if !session.wait_for_fill(self.config.start_timeout()) && !session.is_cancelled() {
            log::warn!(
                "Buffering {} timed out after {}ms, starting anyway",
                self.path.display(),
                self.config.start_timeout_ms
            );
        }
        session.begin_playback();

        if let Some(device) = device {
            threads.push(spawn_session_thread(
                "cueplay-audio-sink",
                session.clone(),
                move |s| audio_sink::run(s, device),
            )?);
        }
        if session.info.video.is_some() {
            threads.push(spawn_session_thread(
                "cueplay-presenter",
                session.clone(),
                presenter::run,
            )?);
        }
        Ok(())
    }

    /// Stop every session thread, then release the source. Idempotent.
    pub fn close(&self) {
        let mut lifecycle = self.lifecycle.lock();
        let previous = std::mem::replace(&mut *lifecycle, Lifecycle::Closed);
        if matches!(previous, Lifecycle::Closed) {
            return;
        }
        if let Some(session) = self.session() {
            session.cancel();
        }
        if let Lifecycle::Running(threads) = previous {
            let caller = std::thread::current().id();
            for thread in threads {
                // Closed from a completion callback: that session thread exits on its own.
                if thread.thread().id() == caller {
                    continue;
                }
                if thread.join().is_err() {
                    log::warn!("Session thread for {} panicked", self.path.display());
                }
            }
        }
        self.source.lock().close();
        log::debug!("Closed {}", self.path.display());
    }

    pub fn state(&self) -> SessionState {
        self.session().map_or(SessionState::Stopped, |s| s.state())
    }

    /// Stream metadata, available once started.
    pub fn info(&self) -> Option<MediaInfo> {
        self.session().map(|s| s.info.clone())
    }

    /// Register the one-shot callback run when playback drains to the end.
    ///
    /// It runs on a session thread, so it must not block for long; closing
    /// this `Media` from it is allowed.
    pub fn on_complete(&self, callback: impl FnOnce() + Send + 'static) {
        match self.session() {
            Some(session) => session.set_completion(Box::new(callback)),
            None => *self.pending_completion.lock() = Some(Box::new(callback)),
        }
    }

    pub fn subscribe(&self) -> Receiver<MediaEvent> {
        self.events.subscribe()
    }

    /// Most recently published frame at its native size.
    pub fn current_frame(&self) -> Arc<RgbaImage> {
        self.session().map_or_else(placeholder, |s| s.current())
    }

    /// Most recently published frame letterboxed to `size`; black before the
    /// first frame and after a failure.
    pub fn current_image(&self, size: Size) -> Arc<RgbaImage> {
        fit(self.current_frame(), size)
    }

    /// Clock position in microseconds.
    pub fn playback_position(&self) -> i64 {
        self.session().map_or(0, |s| s.clock.position())
    }

    pub fn buffer_fill_percent(&self, kind: StreamKind) -> u8 {
        self.session().map_or(0, |s| match kind {
            StreamKind::Video => s.video.fill_percent(),
            StreamKind::Audio => s.audio.fill_percent(),
        })
    }

    /// Returns once no consumer can present, write or advance the clock.
    pub fn set_paused(&self, paused: bool) {
        if let Some(session) = self.session()
            && session.set_paused(paused)
        {
            log::debug!("{} {}", if paused { "Paused" } else { "Resumed" }, self.path.display());
        }
    }

    /// Flip the pause state, returning the new one.
    pub fn toggle_paused(&self) -> bool {
        self.session().is_some_and(|s| s.toggle_paused())
    }

    pub fn is_paused(&self) -> bool {
        self.session().is_some_and(|s| s.is_paused())
    }

    /// Whether audio is being written to a device (false after a device failure).
    pub fn has_audio_output(&self) -> bool {
        self.session().is_some_and(|s| s.audio_enabled())
    }

    pub fn frames_presented(&self) -> u64 {
        self.session().map_or(0, |s| s.frames_presented())
    }

    pub fn decode_errors(&self) -> u64 {
        self.session().map_or(0, |s| s.decode_errors())
    }
}

impl Drop for Media {
    fn drop(&mut self) {
        self.close();
    }
}

impl FrameProducer for Media {
    fn produce(&self) -> Arc<RgbaImage> {
        self.current_frame()
    }

    fn as_startable(&self) -> Option<&dyn Startable> {
        Some(self)
    }

    fn as_pauseable(&self) -> Option<&dyn Pauseable> {
        Some(self)
    }

    fn as_scaled(&self) -> Option<&dyn Scaled> {
        Some(self)
    }
}

impl Startable for Media {
    fn start(&self) -> Result<(), MediaError> {
        Media::start(self)
    }

    fn stop(&self) {
        self.close();
    }
}

impl Pauseable for Media {
    fn set_paused(&self, paused: bool) {
        Media::set_paused(self, paused);
    }

    fn is_paused(&self) -> bool {
        Media::is_paused(self)
    }
}

impl Scaled for Media {
    fn render_scaled(&self, size: Size) -> Arc<RgbaImage> {
        self.current_image(size)
    }
}

impl Closeable for Media {
    fn close(&self) {
        Media::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use crate::compose::scale::is_placeholder;
    use testing::{RecordingOutput, SyntheticSource, frame_index, index_at, timestamp_of};

    fn media(source: SyntheticSource, output: &RecordingOutput) -> Media {
        media_with(source, output, &PlayerConfig::default())
    }

    fn media_with(source: SyntheticSource, output: &RecordingOutput, config: &PlayerConfig) -> Media {
        Media::new("synthetic.mp4", Box::new(source), Arc::new(output.clone()), config)
    }

    fn wait_until(what: &str, mut ready: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !ready() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn pause_freezes_presentation_and_clock() {
        let media = media(SyntheticSource::new(300, true), &RecordingOutput::default());
        media.start().unwrap();
        wait_until("first frames", || media.frames_presented() >= 3);

        media.set_paused(true);
        assert_eq!(media.state(), SessionState::Paused);
        let presented = media.frames_presented();
        let position = media.playback_position();
        let frame = media.current_frame();

        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(media.frames_presented(), presented);
        assert_eq!(media.playback_position(), position);
        assert!(Arc::ptr_eq(&media.current_frame(), &frame));

        media.set_paused(false);
        wait_until("resumed presentation", || media.frames_presented() > presented);
        assert!(media.playback_position() >= position);
    }

    #[test]
    fn seek_lands_on_target_without_stale_frames() {
        let media = media(SyntheticSource::new(300, true), &RecordingOutput::default());
        media.start().unwrap();
        wait_until("first frames", || media.frames_presented() >= 3);

        let target = 5_000_000;
        media.seek_to(target).unwrap();
        assert_eq!(media.playback_position(), target);
        assert_eq!(frame_index(&media.current_frame()), Some(index_at(target)));

        let interframe = 1_000_000 / testing::FPS;
        for _ in 0..10 {
            std::thread::sleep(Duration::from_millis(20));
            let shown = frame_index(&media.current_frame()).unwrap();
            assert!(shown >= index_at(target), "stale frame {shown} after seek");
            assert!(media.playback_position() >= target - interframe);
        }
    }

    #[test]
    fn seek_while_paused_stays_paused() {
        let media = media(SyntheticSource::new(300, true), &RecordingOutput::default());
        media.start().unwrap();
        media.set_paused(true);

        media.seek_to(2_000_000).unwrap();
        assert!(media.is_paused());
        assert_eq!(frame_index(&media.current_frame()), Some(index_at(2_000_000)));
        let presented = media.frames_presented();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(media.frames_presented(), presented);
        assert_eq!(media.playback_position(), 2_000_000);
    }

    #[test]
    fn drains_to_end_and_completes_once() {
        let output = RecordingOutput::default();
        let media = media(SyntheticSource::new(12, true), &output);
        let completions = Arc::new(AtomicUsize::new(0));
        let counter = completions.clone();
        media.on_complete(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let events = media.subscribe();

        media.start().unwrap();
        wait_until("end of playback", || media.state() == SessionState::Ended);

        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(media.frames_presented(), 12);
        assert_eq!(output.writes.load(Ordering::SeqCst), 12);
        assert_eq!(media.playback_position(), timestamp_of(11));
        let completed = events
            .try_iter()
            .filter(|e| *e == MediaEvent::Completed)
            .count();
        assert_eq!(completed, 1);
    }

    #[test]
    fn unavailable_device_plays_video_only() {
        let output = RecordingOutput::unavailable();
        let media = media(SyntheticSource::new(10, true), &output);
        media.start().unwrap();
        assert!(!media.has_audio_output());

        wait_until("end of playback", || media.state() == SessionState::Ended);
        assert_eq!(media.frames_presented(), 10);
        assert_eq!(output.writes.load(Ordering::SeqCst), 0);
        assert_eq!(media.buffer_fill_percent(StreamKind::Audio), 0);
        assert_eq!(media.playback_position(), timestamp_of(9));
    }

    #[test]
    fn fatal_source_error_blanks_output() {
        let media = media(
            SyntheticSource::new(120, false).with_fatal_error_at(20),
            &RecordingOutput::default(),
        );
        let events = media.subscribe();
        media.start().unwrap();

        wait_until("failure", || media.state() == SessionState::Ended);
        assert!(is_placeholder(&media.current_frame()));
        let image = media.current_image(Size::new(8, 6));
        assert_eq!(image.dimensions(), (8, 6));
        assert!(image.pixels().all(|p| p.0 == [0, 0, 0, 255]));
        assert!(events.try_iter().any(|e| matches!(e, MediaEvent::Failed(_))));
    }

    #[test]
    fn skipped_decode_errors_are_counted() {
        let media = media(
            SyntheticSource::new(10, false).with_decode_error_at(4),
            &RecordingOutput::default(),
        );
        media.start().unwrap();
        wait_until("end of playback", || media.state() == SessionState::Ended);
        assert_eq!(media.decode_errors(), 1);
        assert_eq!(media.frames_presented(), 9);
    }

    #[test]
    fn seek_rejects_out_of_range_targets() {
        let media = media(SyntheticSource::new(30, false), &RecordingOutput::default());
        assert!(matches!(
            media.seek_to(0),
            Err(MediaError::Seek(SeekError::NotPlaying))
        ));

        media.start().unwrap();
        let duration = media.info().unwrap().duration_us;
        for target in [-1, duration, duration + 1] {
            assert!(matches!(
                media.seek_to(target),
                Err(MediaError::Seek(SeekError::OutOfRange { .. }))
            ));
        }
    }

    #[test]
    fn failed_reposition_restores_state() {
        let media = media(
            SyntheticSource::new(300, true).with_failing_seek(),
            &RecordingOutput::default(),
        );
        media.start().unwrap();
        media.set_paused(true);

        let result = media.seek_to(1_000_000);
        assert!(matches!(result, Err(MediaError::Seek(SeekError::Reposition(_)))));
        assert_eq!(media.state(), SessionState::Paused);
        assert_eq!(media.buffer_fill_percent(StreamKind::Video), 0);
        assert_eq!(media.buffer_fill_percent(StreamKind::Audio), 0);
    }

    #[test]
    fn seek_timeout_still_repositions() {
        let config = PlayerConfig {
            seek_timeout_ms: 100,
            ..PlayerConfig::default()
        };
        let media = media_with(
            SyntheticSource::new(300, false).corrupt_after_seek(),
            &RecordingOutput::default(),
            &config,
        );
        media.start().unwrap();
        wait_until("first frames", || media.frames_presented() >= 1);

        let started = Instant::now();
        let result = media.seek_to(3_000_000);
        assert!(matches!(result, Err(MediaError::Seek(SeekError::Timeout(100)))));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(media.state(), SessionState::Playing);
        assert_eq!(media.playback_position(), 3_000_000);
        assert!(media.decode_errors() > 0);
    }

    #[test]
    fn start_gives_up_buffering_after_timeout() {
        let config = PlayerConfig {
            start_timeout_ms: 100,
            ..PlayerConfig::default()
        };
        let media = media_with(
            SyntheticSource::new(300, false).always_corrupt(),
            &RecordingOutput::default(),
            &config,
        );
        let started = Instant::now();
        media.start().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(media.state(), SessionState::Playing);
        assert_eq!(media.frames_presented(), 0);
        assert!(is_placeholder(&media.current_frame()));
    }

    #[test]
    fn completion_callback_may_close_its_media() {
        let media = Arc::new(media(SyntheticSource::new(6, false), &RecordingOutput::default()));
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let weak = Arc::downgrade(&media);
        media.on_complete(move || {
            if let Some(media) = weak.upgrade() {
                media.close();
            }
            let _ = done_tx.send(());
        });

        media.start().unwrap();
        done_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("completion callback never returned");
        assert_eq!(media.state(), SessionState::Stopped);
        media.close();
    }

    #[test]
    fn open_failure_never_starts() {
        let media = media(
            SyntheticSource::new(30, false).with_failing_open(),
            &RecordingOutput::default(),
        );
        assert!(matches!(media.start(), Err(MediaError::Open(_))));
        assert_eq!(media.state(), SessionState::Stopped);
    }

    #[test]
    fn close_releases_everything_and_is_final() {
        let output = RecordingOutput::default();
        let source = SyntheticSource::new(300, true);
        let source_closed = source.closed.clone();
        let media = media(source, &output);
        media.start().unwrap();

        media.close();
        assert_eq!(media.state(), SessionState::Stopped);
        assert!(source_closed.load(Ordering::SeqCst));
        assert!(output.closed.load(Ordering::SeqCst));
        assert!(matches!(media.start(), Err(MediaError::Closed)));
        media.close();
    }

    #[test]
    fn capabilities_reach_the_session() {
        let media = media(SyntheticSource::new(300, false), &RecordingOutput::default());
        let producer: &dyn FrameProducer = &media;
        producer.as_startable().unwrap().start().unwrap();
        producer.as_pauseable().unwrap().set_paused(true);
        assert!(media.is_paused());
        assert!(!media.toggle_paused());
        let scaled = producer.as_scaled().unwrap().render_scaled(Size::new(16, 9));
        assert_eq!(scaled.dimensions(), (16, 9));
        producer.as_startable().unwrap().stop();
        assert_eq!(media.state(), SessionState::Stopped);
    }
}
