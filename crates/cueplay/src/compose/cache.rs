use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use image::RgbaImage;
use parking_lot::{Condvar, Mutex, RwLock};

use super::scale::blank;
use super::{FrameProducer, Pauseable, Scaled, Startable, render_at};
use crate::media::Size;
use crate::settings::PlayerConfig;

struct WorkerState {
    running: bool,
    shutdown: bool,
    last_request: Instant,
    target: Size,
}

struct Shared {
    producer: Arc<dyn FrameProducer>,
    image: RwLock<Option<Arc<RgbaImage>>>,
    state: Mutex<WorkerState>,
    wake: Condvar,
    idle_timeout: Duration,
    cycle: Duration,
}

/// Pull-compute-cache adapter: a background worker renders the wrapped
/// producer at the last requested size so `get` never blocks on decoding
/// or scaling.
///
/// The worker starts on the first `get`, stops after `idle_timeout` without
/// one and is restarted by the next.
pub struct ScaledFrameCache {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ScaledFrameCache {
    pub fn new(producer: Arc<dyn FrameProducer>, config: &PlayerConfig) -> Self {
        Self::with_timing(producer, config.cache_idle_timeout(), config.cache_cycle())
    }

    pub fn with_timing(
        producer: Arc<dyn FrameProducer>,
        idle_timeout: Duration,
        cycle: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                producer,
                image: RwLock::new(None),
                state: Mutex::new(WorkerState {
                    running: false,
                    shutdown: false,
                    last_request: Instant::now(),
                    target: Size::default(),
                }),
                wake: Condvar::new(),
                idle_timeout,
                cycle,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn producer(&self) -> &Arc<dyn FrameProducer> {
        &self.shared.producer
    }

    /// Last computed image, or a blank frame of `size` before the first one.
    pub fn get(&self, size: Size) -> Arc<RgbaImage> {
        let spawn = {
            let mut state = self.shared.state.lock();
            state.last_request = Instant::now();
            state.target = size;
            !std::mem::replace(&mut state.running, true)
        };
        if spawn {
            self.spawn_worker();
        }
        self.shared
            .image
            .read()
            .clone()
            .unwrap_or_else(|| Arc::new(blank(size)))
    }

    pub fn is_worker_running(&self) -> bool {
        self.shared.state.lock().running
    }

    fn spawn_worker(&self) {
        let mut worker = self.worker.lock();
        // The previous worker has already marked itself stopped.
        if let Some(previous) = worker.take() {
            let _ = previous.join();
        }
        let shared = self.shared.clone();
        match std::thread::Builder::new()
            .name("cueplay-frame-cache".into())
            .spawn(move || run(&shared))
        {
            Ok(handle) => *worker = Some(handle),
            Err(e) => {
                log::error!("Failed to spawn frame cache worker: {e}");
                self.shared.state.lock().running = false;
            }
        }
    }
}

fn run(shared: &Shared) {
    log::debug!("Frame cache worker started");
    loop {
        let target = {
            let mut state = shared.state.lock();
            if state.shutdown || state.last_request.elapsed() >= shared.idle_timeout {
                state.running = false;
                break;
            }
            state.target
        };

        if !target.is_empty() {
            let frame = render_at(&*shared.producer, target);
            *shared.image.write() = Some(frame);
        }

        let mut state = shared.state.lock();
        if !state.shutdown {
            shared.wake.wait_for(&mut state, shared.cycle);
        }
    }
    log::debug!("Frame cache worker idle, exiting");
}

impl Drop for ScaledFrameCache {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl FrameProducer for ScaledFrameCache {
    fn produce(&self) -> Arc<RgbaImage> {
        self.shared.producer.produce()
    }

    fn as_startable(&self) -> Option<&dyn Startable> {
        self.shared.producer.as_startable()
    }

    fn as_pauseable(&self) -> Option<&dyn Pauseable> {
        self.shared.producer.as_pauseable()
    }

    fn as_scaled(&self) -> Option<&dyn Scaled> {
        Some(self)
    }
}

impl Scaled for ScaledFrameCache {
    fn render_scaled(&self, size: Size) -> Arc<RgbaImage> {
        self.get(size)
    }
}
