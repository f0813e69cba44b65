use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbaImage;
use parking_lot::Mutex;

use super::scale::{blank, blend};
use super::{FrameProducer, render_at};
use crate::media::Size;
use crate::settings::{FadeCurve, PlayerConfig};

type Producer = Arc<dyn FrameProducer>;

struct FadeState {
    active: Option<Producer>,
    /// Source fading in over `active`; `None` means pass-through.
    incoming: Option<Producer>,
    fade_start: Instant,
}

/// Switches between frame producers with a timed crossfade.
pub struct CrossfadeCompositor {
    state: Mutex<FadeState>,
    fade_duration: Duration,
    curve: FadeCurve,
}

fn start(producer: &Producer) {
    if let Some(startable) = producer.as_startable()
        && let Err(e) = startable.start()
    {
        log::error!("Failed to start source: {e}");
    }
}

fn stop(producer: &Producer) {
    if let Some(startable) = producer.as_startable() {
        startable.stop();
    }
}

impl CrossfadeCompositor {
    pub fn new(config: &PlayerConfig) -> Self {
        Self::with_fade(config.fade_duration(), config.fade_curve)
    }

    pub fn with_fade(fade_duration: Duration, curve: FadeCurve) -> Self {
        Self {
            state: Mutex::new(FadeState {
                active: None,
                incoming: None,
                fade_start: Instant::now(),
            }),
            fade_duration,
            curve,
        }
    }

    /// Fade from the current source to `source`.
    ///
    /// A fade still in flight is cut short: its incoming source becomes the
    /// one faded out from.
    pub fn set_source(&self, source: Producer) {
        self.set_source_at(source, Instant::now());
    }

    pub fn set_source_at(&self, source: Producer, now: Instant) {
        start(&source);
        let outgoing = {
            let mut state = self.state.lock();
            if let Some(promoted) = state.incoming.take() {
                state.active = Some(promoted);
            }
            if state.active.is_some() {
                state.incoming = Some(source);
                state.fade_start = now;
            } else {
                state.active = Some(source);
            }
            state.active.clone().filter(|_| state.incoming.is_some())
        };
        if let Some(outgoing) = outgoing {
            stop(&outgoing);
        }
    }

    /// Switch to `source` immediately, cancelling any fade.
    pub fn set_source_no_fade(&self, source: Producer) {
        start(&source);
        let (previous, in_flight) = {
            let mut state = self.state.lock();
            (state.active.replace(source), state.incoming.take())
        };
        // An in-flight fade already stopped `previous`.
        match in_flight {
            Some(incoming) => stop(&incoming),
            None => {
                if let Some(previous) = previous {
                    stop(&previous);
                }
            }
        }
    }

    /// Stop and drop every source.
    pub fn clear(&self) {
        let (active, incoming) = {
            let mut state = self.state.lock();
            (state.active.take(), state.incoming.take())
        };
        match incoming {
            Some(incoming) => stop(&incoming),
            None => {
                if let Some(active) = active {
                    stop(&active);
                }
            }
        }
    }

    pub fn is_fading(&self) -> bool {
        self.state.lock().incoming.is_some()
    }

    /// The source currently shown, or faded out from during a fade.
    pub fn active(&self) -> Option<Producer> {
        self.state.lock().active.clone()
    }

    /// Pause or resume the sources on screen.
    pub fn set_paused(&self, paused: bool) {
        let sources = {
            let state = self.state.lock();
            [state.active.clone(), state.incoming.clone()]
        };
        for source in sources.iter().flatten() {
            if let Some(pauseable) = source.as_pauseable() {
                pauseable.set_paused(paused);
            }
        }
    }

    pub fn current_image(&self, size: Size) -> Arc<RgbaImage> {
        self.current_image_at(size, Instant::now())
    }

    /// Composite at `now`, promoting the incoming source once its fade is complete.
    pub fn current_image_at(&self, size: Size, now: Instant) -> Arc<RgbaImage> {
        let (active, incoming, progress) = {
            let mut state = self.state.lock();
            let mut progress = 1.0;
            if state.incoming.is_some() {
                let elapsed = now.saturating_duration_since(state.fade_start);
                if !self.fade_duration.is_zero() {
                    progress = elapsed.as_secs_f32() / self.fade_duration.as_secs_f32();
                }
                if progress >= 1.0 {
                    state.active = state.incoming.take();
                    log::debug!("Crossfade complete");
                }
            }
            (state.active.clone(), state.incoming.clone(), progress)
        };

        let Some(active) = active else {
            return Arc::new(blank(size));
        };
        let base = render_at(&*active, size);
        match incoming {
            Some(incoming) => {
                let top = render_at(&*incoming, size);
                Arc::new(blend(&base, &top, self.curve.apply(progress)))
            }
            None => base,
        }
    }
}
