//! Shared state of one playback session: the two queues, the clock, the
//! published frame and the play/pause/seek control block every session
//! thread synchronizes on.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use image::RgbaImage;
use parking_lot::{Condvar, Mutex, RwLock};

use super::clock::MediaClock;
use super::queue::BoundedFrameQueue;
use super::types::{AudioChunk, MediaInfo, SessionState, StreamKind, VideoFrame};
use super::MediaError;
use crate::compose::scale::placeholder;
use crate::events::{EventBus, MediaEvent};
use crate::settings::PlayerConfig;

pub(crate) type CompletionCallback = Box<dyn FnOnce() + Send>;

/// Timeout for a single blocking dequeue before a consumer re-checks the session.
pub(crate) const POP_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Buffering,
    Running,
    SeekPending,
    Draining,
    Ended,
    Closed,
}

struct Control {
    phase: Phase,
    paused: bool,
    /// The pump has seen end of stream since the last seek.
    eos: bool,
    video_drained: bool,
    audio_drained: bool,
    reported: SessionState,
}

impl Control {
    fn state(&self) -> SessionState {
        match self.phase {
            Phase::Buffering => SessionState::Buffering,
            Phase::SeekPending => SessionState::SeekPending,
            Phase::Running if self.paused => SessionState::Paused,
            Phase::Running => SessionState::Playing,
            Phase::Draining if self.paused => SessionState::Paused,
            Phase::Draining => SessionState::Draining,
            Phase::Ended => SessionState::Ended,
            Phase::Closed => SessionState::Stopped,
        }
    }

    fn consumable(&self) -> bool {
        matches!(self.phase, Phase::Running | Phase::Draining) && !self.paused
    }

    fn pumpable(&self) -> bool {
        match self.phase {
            Phase::Buffering | Phase::SeekPending => true,
            Phase::Running => !self.paused,
            Phase::Draining | Phase::Ended | Phase::Closed => false,
        }
    }

    fn finished(&self) -> bool {
        matches!(self.phase, Phase::Ended | Phase::Closed)
    }
}

/// Outcome of trying to commit a dequeued frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Commit {
    Done,
    /// Paused or seeking; hold the frame and retry.
    NotNow,
    /// The queue was flushed after this frame was taken; drop it.
    Stale,
    Exit,
}

/// Queue generations sampled together, before a frame is pulled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Generations {
    pub video: u64,
    pub audio: u64,
}

/// Pause state captured at the start of a seek.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SeekSnapshot {
    pub was_paused: bool,
}

pub(crate) struct Session {
    pub info: MediaInfo,
    pub config: PlayerConfig,
    pub video: BoundedFrameQueue<VideoFrame>,
    pub audio: BoundedFrameQueue<AudioChunk>,
    pub clock: MediaClock,
    pub events: Arc<EventBus>,
    control: Mutex<Control>,
    changed: Condvar,
    current: RwLock<Arc<RgbaImage>>,
    cancelled: AtomicBool,
    audio_enabled: AtomicBool,
    completed: AtomicBool,
    on_complete: Mutex<Option<CompletionCallback>>,
    frames_presented: AtomicU64,
    decode_errors: AtomicU64,
}

impl Session {
    pub fn new(
        info: MediaInfo,
        config: PlayerConfig,
        events: Arc<EventBus>,
        on_complete: Option<CompletionCallback>,
    ) -> Self {
        Self {
            video: BoundedFrameQueue::new(config.queue_capacity),
            audio: BoundedFrameQueue::new(config.queue_capacity),
            info,
            config,
            clock: MediaClock::new(),
            events,
            control: Mutex::new(Control {
                phase: Phase::Buffering,
                paused: false,
                eos: false,
                video_drained: false,
                audio_drained: false,
                reported: SessionState::Buffering,
            }),
            changed: Condvar::new(),
            current: RwLock::new(placeholder()),
            cancelled: AtomicBool::new(false),
            audio_enabled: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            on_complete: Mutex::new(on_complete),
            frames_presented: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        }
    }

    /// Mutate the control block, wake every waiter and report a state change.
    fn update<R>(&self, f: impl FnOnce(&mut Control) -> R) -> R {
        let mut control = self.control.lock();
        let result = f(&mut control);
        let state = control.state();
        let changed = state != control.reported;
        control.reported = state;
        drop(control);
        self.changed.notify_all();
        if changed {
            log::debug!("Session state -> {state:?}");
            self.events.emit(MediaEvent::StateChanged(state));
        }
        result
    }

    pub fn state(&self) -> SessionState {
        self.control.lock().state()
    }

    pub fn phase(&self) -> Phase {
        self.control.lock().phase
    }

    pub fn is_paused(&self) -> bool {
        self.control.lock().paused
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled.load(Ordering::Acquire)
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.audio_enabled.store(enabled, Ordering::Release);
    }

    /// Whether the audio sink is the clock's writer.
    pub fn audio_governs(&self) -> bool {
        self.audio_enabled() && self.info.audio_drives_clock()
    }

    pub fn min_fill(&self, kind: StreamKind) -> usize {
        match kind {
            StreamKind::Video => self.info.min_fill(StreamKind::Video),
            StreamKind::Audio if self.audio_enabled() => self.info.min_fill(StreamKind::Audio),
            StreamKind::Audio => 0,
        }
    }

    pub fn queue_len(&self, kind: StreamKind) -> usize {
        match kind {
            StreamKind::Video => self.video.len(),
            StreamKind::Audio => self.audio.len(),
        }
    }

    pub fn generations(&self) -> Generations {
        Generations {
            video: self.video.generation(),
            audio: self.audio.generation(),
        }
    }

    fn fill_met(&self) -> bool {
        self.queue_len(StreamKind::Video) >= self.min_fill(StreamKind::Video)
            && self.queue_len(StreamKind::Audio) >= self.min_fill(StreamKind::Audio)
    }

    // Published frame

    pub fn current(&self) -> Arc<RgbaImage> {
        self.current.read().clone()
    }

    pub fn publish(&self, image: Arc<RgbaImage>) {
        *self.current.write() = image;
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented.load(Ordering::Relaxed)
    }

    pub fn note_presented(&self) {
        self.frames_presented.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    pub fn note_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    // Gates

    fn wait_for(&self, ready: impl Fn(&Control) -> bool) -> bool {
        let poll = self.config.pause_poll();
        let mut control = self.control.lock();
        loop {
            if self.is_cancelled() || control.finished() {
                return false;
            }
            if ready(&control) {
                return true;
            }
            self.changed.wait_for(&mut control, poll);
        }
    }

    /// Block while the pump should not pull. `false` means exit.
    pub fn wait_pumpable(&self) -> bool {
        self.wait_for(Control::pumpable)
    }

    /// Block while consumers should not consume (paused, seeking). `false` means exit.
    pub fn wait_consumable(&self) -> bool {
        self.wait_for(Control::consumable)
    }

    /// Run `apply` iff the frame's generation is current and the session is
    /// consuming, atomically with respect to pause and seek.
    pub fn commit(&self, kind: StreamKind, generation: u64, apply: impl FnOnce()) -> Commit {
        let control = self.control.lock();
        if self.is_cancelled() || control.finished() {
            return Commit::Exit;
        }
        let current = match kind {
            StreamKind::Video => self.video.is_current(generation),
            StreamKind::Audio => self.audio.is_current(generation),
        };
        if !current {
            return Commit::Stale;
        }
        if !control.consumable() {
            return Commit::NotNow;
        }
        apply();
        Commit::Done
    }

    /// Sleep until `deadline` unless the session is cancelled or finishes.
    pub fn sleep_until(&self, deadline: Instant) {
        let mut control = self.control.lock();
        while !self.is_cancelled() && !control.finished() && Instant::now() < deadline {
            self.changed.wait_until(&mut control, deadline);
        }
    }

    /// Wait (bounded) for both queues to reach their minimum fill.
    ///
    /// Returns `true` once filled or once end of stream makes further filling
    /// impossible; `false` on timeout or cancellation.
    pub fn wait_for_fill(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let poll = self.config.pause_poll();
        loop {
            if self.fill_met() {
                return true;
            }
            {
                let control = self.control.lock();
                if self.is_cancelled() || control.finished() {
                    return false;
                }
                if control.eos {
                    return true;
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = (deadline - now).min(poll);
            let video_min = self.min_fill(StreamKind::Video);
            if self.video.len() < video_min {
                self.video.wait_for_len(video_min, slice);
            } else {
                self.audio.wait_for_len(self.min_fill(StreamKind::Audio), slice);
            }
        }
    }

    // Transitions

    /// Leave `Buffering` once consumers are about to start.
    pub fn begin_playback(&self) {
        self.update(|c| {
            if c.phase == Phase::Buffering {
                c.phase = Phase::Running;
            }
        });
    }

    pub fn set_paused(&self, paused: bool) -> bool {
        self.update(|c| {
            let changed = c.paused != paused;
            c.paused = paused;
            changed
        })
    }

    pub fn toggle_paused(&self) -> bool {
        self.update(|c| {
            c.paused = !c.paused;
            c.paused
        })
    }

    /// The source reported end of stream after being read at `sampled`.
    ///
    /// Ignored, returning `false`, when a seek flushed the queues since then:
    /// the source has been repositioned and that end is no longer ahead.
    pub fn begin_draining(&self, sampled: Generations) -> bool {
        let accepted = self.update(|c| {
            if self.generations() != sampled {
                return false;
            }
            c.eos = true;
            if matches!(c.phase, Phase::Buffering | Phase::Running) {
                c.phase = Phase::Draining;
            }
            true
        });
        if accepted {
            log::info!("End of stream reached, draining queues");
        }
        accepted
    }

    /// A consumer found its queue empty. Ends the session once every active
    /// consumer has drained after end of stream.
    pub fn mark_drained(&self, kind: StreamKind) {
        let audio_active = self.audio_enabled();
        let has_video = self.info.video.is_some();
        let ended = self.update(|c| {
            if c.phase != Phase::Draining || c.paused {
                return false;
            }
            match kind {
                StreamKind::Video => c.video_drained = true,
                StreamKind::Audio => c.audio_drained = true,
            }
            let video_done = c.video_drained || !has_video;
            let audio_done = c.audio_drained || !audio_active;
            if video_done && audio_done {
                c.phase = Phase::Ended;
                true
            } else {
                false
            }
        });
        if ended {
            self.complete();
        }
    }

    /// Replace the completion callback. Has no effect once completion fired.
    pub fn set_completion(&self, callback: CompletionCallback) {
        if !self.completed.load(Ordering::Acquire) {
            *self.on_complete.lock() = Some(callback);
        }
    }

    fn complete(&self) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("Playback complete");
        self.events.emit(MediaEvent::Completed);
        let callback = self.on_complete.lock().take();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Fatal failure: blank the output, end the session and release waiters.
    pub fn fail(&self, error: &MediaError) {
        log::error!("Playback failed: {error}");
        self.publish(placeholder());
        self.update(|c| {
            if c.phase != Phase::Closed {
                c.phase = Phase::Ended;
            }
        });
        self.video.close();
        self.audio.close();
        self.events.emit(MediaEvent::Failed(error.to_string()));
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.update(|c| c.phase = Phase::Closed);
        self.video.close();
        self.audio.close();
    }

    /// Steps 1-2 of a seek: require a live session, remember and force pause.
    pub fn begin_seek(&self) -> Option<SeekSnapshot> {
        self.update(|c| {
            if !matches!(c.phase, Phase::Running | Phase::Draining) {
                return None;
            }
            let snapshot = SeekSnapshot {
                was_paused: c.paused,
            };
            c.paused = true;
            Some(snapshot)
        })
    }

    /// Let the pump refill past the pause gate.
    pub fn enter_seek_pending(&self) {
        self.update(|c| {
            if c.finished() {
                return;
            }
            c.phase = Phase::SeekPending;
            c.eos = false;
            c.video_drained = false;
            c.audio_drained = false;
        });
    }

    /// Restore the pause state captured by `begin_seek`.
    pub fn finish_seek(&self, snapshot: SeekSnapshot) {
        self.update(|c| {
            if c.finished() {
                return;
            }
            if c.phase == Phase::SeekPending {
                c.phase = if c.eos { Phase::Draining } else { Phase::Running };
            }
            c.paused = snapshot.was_paused;
        });
    }
}

/// Extract a readable message from a panic payload.
fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

/// Spawn a named session thread. A panic inside `body` blanks the published
/// frame and ends only that thread.
pub(crate) fn spawn_session_thread(
    name: &str,
    session: Arc<Session>,
    body: impl FnOnce(&Session) + Send + 'static,
) -> std::io::Result<JoinHandle<()>> {
    let thread_name = name.to_string();
    std::thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            log::debug!("{thread_name} started");
            if let Err(e) = std::panic::catch_unwind(AssertUnwindSafe(|| body(&session))) {
                let msg = panic_message(&e);
                log::error!("{thread_name} thread panicked: {msg}");
                session.publish(placeholder());
                session
                    .events
                    .emit(MediaEvent::Failed(format!("{thread_name} panicked: {msg}")));
            }
            log::debug!("{thread_name} exited");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::testing::test_info;
    use std::sync::atomic::AtomicUsize;

    fn session() -> Arc<Session> {
        Arc::new(Session::new(
            test_info(1_000_000, false),
            PlayerConfig::default(),
            Arc::new(EventBus::new()),
            None,
        ))
    }

    #[test]
    fn derived_states_follow_phase_and_pause() {
        let s = session();
        assert_eq!(s.state(), SessionState::Buffering);
        s.begin_playback();
        assert_eq!(s.state(), SessionState::Playing);
        s.set_paused(true);
        assert_eq!(s.state(), SessionState::Paused);
        s.set_paused(false);
        assert!(s.begin_draining(s.generations()));
        assert_eq!(s.state(), SessionState::Draining);
        s.cancel();
        assert_eq!(s.state(), SessionState::Stopped);
    }

    #[test]
    fn state_changes_are_published() {
        let s = session();
        let rx = s.events.subscribe();
        s.begin_playback();
        s.set_paused(true);
        s.set_paused(true);
        assert_eq!(rx.try_recv().unwrap(), MediaEvent::StateChanged(SessionState::Playing));
        assert_eq!(rx.try_recv().unwrap(), MediaEvent::StateChanged(SessionState::Paused));
        assert!(rx.try_recv().is_err(), "repeated pause must not re-emit");
    }

    #[test]
    fn commit_respects_pause_and_generation() {
        let s = session();
        s.begin_playback();
        let generation = s.video.generation();

        let mut applied = 0;
        assert_eq!(s.commit(StreamKind::Video, generation, || applied += 1), Commit::Done);
        s.set_paused(true);
        assert_eq!(s.commit(StreamKind::Video, generation, || applied += 1), Commit::NotNow);
        s.set_paused(false);
        s.video.clear();
        assert_eq!(s.commit(StreamKind::Video, generation, || applied += 1), Commit::Stale);
        assert_eq!(applied, 1);
    }

    #[test]
    fn completion_fires_once_after_all_consumers_drain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let s = Session::new(
            test_info(1_000_000, true),
            PlayerConfig::default(),
            Arc::new(EventBus::new()),
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        s.set_audio_enabled(true);
        s.begin_playback();
        s.begin_draining(s.generations());

        s.mark_drained(StreamKind::Video);
        assert_eq!(s.state(), SessionState::Draining);
        s.mark_drained(StreamKind::Audio);
        assert_eq!(s.state(), SessionState::Ended);
        s.mark_drained(StreamKind::Audio);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fail_publishes_placeholder_and_ends() {
        let s = session();
        s.publish(Arc::new(RgbaImage::new(2, 2)));
        s.begin_playback();
        s.fail(&MediaError::Source("broken pipe".into()));
        assert_eq!(s.state(), SessionState::Ended);
        assert!(crate::compose::scale::is_placeholder(&s.current()));
        assert!(!s.wait_consumable());
    }

    #[test]
    fn seek_restores_prior_pause_state() {
        let s = session();
        s.begin_playback();
        let snap = s.begin_seek().unwrap();
        assert!(s.is_paused());
        s.enter_seek_pending();
        assert_eq!(s.state(), SessionState::SeekPending);
        s.finish_seek(snap);
        assert_eq!(s.state(), SessionState::Playing);
    }

    #[test]
    fn end_of_stream_from_before_a_flush_is_ignored() {
        let s = session();
        s.begin_playback();
        let sampled = s.generations();
        let snap = s.begin_seek().unwrap();
        s.video.clear();
        s.audio.clear();
        s.enter_seek_pending();

        assert!(!s.begin_draining(sampled));
        assert!(!s.wait_for_fill(Duration::from_millis(20)), "stale end must not satisfy the fill wait");
        s.finish_seek(snap);
        assert_eq!(s.state(), SessionState::Playing);

        assert!(s.begin_draining(s.generations()));
        assert_eq!(s.state(), SessionState::Draining);
    }

    #[test]
    fn seek_rejected_before_playback() {
        assert!(session().begin_seek().is_none());
    }

    #[test]
    fn panicking_thread_blanks_output() {
        let s = session();
        s.publish(Arc::new(RgbaImage::new(3, 3)));
        let handle = spawn_session_thread("cueplay-test", s.clone(), |_| panic!("boom")).unwrap();
        handle.join().unwrap();
        assert!(crate::compose::scale::is_placeholder(&s.current()));
    }
}
