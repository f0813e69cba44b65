use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::{AudioDevice, AudioFormat, AudioOutput};
use crate::media::MediaError;

/// How much audio the ring holds ahead of the device, in milliseconds.
const RING_MS: usize = 250;
const WRITE_RETRY: Duration = Duration::from_millis(2);
const DRAIN_LIMIT: Duration = Duration::from_secs(2);
const OPEN_TIMEOUT: Duration = Duration::from_secs(3);
const NO_FLUSH: usize = usize::MAX;

/// Single-producer single-consumer sample ring between the sink thread and the
/// cpal callback. Samples are stored as f32 bits so no unsafe is needed.
pub struct SampleRing {
    data: Box<[AtomicU32]>,
    mask: usize,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
    /// Write position to skip the reader to on its next pop.
    flush_to: AtomicUsize,
}

impl SampleRing {
    /// Capacity is rounded up to a power of two.
    pub fn new(min_capacity: usize) -> Self {
        let capacity = min_capacity.max(2).next_power_of_two();
        Self {
            data: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            mask: capacity - 1,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            flush_to: AtomicUsize::new(NO_FLUSH),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    pub fn available(&self) -> usize {
        let wp = self.write_pos.load(Ordering::Acquire);
        let rp = self.read_pos.load(Ordering::Acquire);
        wp.wrapping_sub(rp)
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.available()
    }

    /// Push as many samples as fit. Returns the number written.
    pub fn push(&self, samples: &[f32]) -> usize {
        let wp = self.write_pos.load(Ordering::Relaxed);
        let n = samples.len().min(self.free());
        for (i, &s) in samples[..n].iter().enumerate() {
            self.data[(wp.wrapping_add(i)) & self.mask].store(s.to_bits(), Ordering::Relaxed);
        }
        self.write_pos.store(wp.wrapping_add(n), Ordering::Release);
        n
    }

    /// Drop everything pushed so far. The reader applies it on its next pop,
    /// so samples pushed after this call are kept.
    pub fn discard_queued(&self) {
        let wp = self.write_pos.load(Ordering::Relaxed);
        self.flush_to.store(wp, Ordering::Release);
    }

    /// Read available samples into `dst`. Returns the number read.
    pub fn pop_into(&self, dst: &mut [f32]) -> usize {
        let mut rp = self.read_pos.load(Ordering::Relaxed);
        let flush_to = self.flush_to.swap(NO_FLUSH, Ordering::Acquire);
        if flush_to != NO_FLUSH && flush_to.wrapping_sub(rp) <= self.available() {
            rp = flush_to;
            self.read_pos.store(rp, Ordering::Release);
        }
        let n = dst.len().min(self.available());
        for (i, slot) in dst[..n].iter_mut().enumerate() {
            *slot = f32::from_bits(self.data[(rp.wrapping_add(i)) & self.mask].load(Ordering::Relaxed));
        }
        self.read_pos.store(rp.wrapping_add(n), Ordering::Release);
        n
    }
}

/// Default system output via cpal.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalOutput;

impl AudioOutput for CpalOutput {
    fn open(&self, format: &AudioFormat) -> Result<Box<dyn AudioDevice>, MediaError> {
        CpalDevice::open(*format).map(|d| Box::new(d) as Box<dyn AudioDevice>)
    }
}

/// An output line backed by a cpal stream living on its own thread.
///
/// The stream is built and dropped on that thread, so the handle stays `Send`
/// on every backend.
pub struct CpalDevice {
    ring: Arc<SampleRing>,
    format: AudioFormat,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalDevice {
    pub fn open(format: AudioFormat) -> Result<Self, MediaError> {
        let samples_per_sec = format.sample_rate as usize * format.channels as usize;
        let ring = Arc::new(SampleRing::new(samples_per_sec * RING_MS / 1000));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<String, String>>(1);

        let thread_ring = ring.clone();
        let thread_shutdown = shutdown.clone();
        let handle = std::thread::Builder::new()
            .name("cueplay-audio-out".into())
            .spawn(move || match build_stream(&format, thread_ring) {
                Ok((stream, name)) => {
                    let _ = ready_tx.send(Ok(name));
                    while !thread_shutdown.load(Ordering::Relaxed) {
                        std::thread::sleep(Duration::from_millis(20));
                    }
                    drop(stream);
                    log::info!("Audio output stopped");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                }
            })
            .map_err(|e| MediaError::DeviceUnavailable(format!("failed to spawn audio thread: {e}")))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(name)) => {
                log::info!(
                    "Audio output opened on {name}: {}Hz, {}ch, {:?}",
                    format.sample_rate,
                    format.channels,
                    format.sample_format
                );
                Ok(Self {
                    ring,
                    format,
                    shutdown,
                    thread: Some(handle),
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(MediaError::DeviceUnavailable(e))
            }
            Err(_) => {
                shutdown.store(true, Ordering::Relaxed);
                Err(MediaError::DeviceUnavailable("audio output did not start in time".into()))
            }
        }
    }

    fn is_alive(&self) -> bool {
        !self.shutdown.load(Ordering::Relaxed)
            && self.thread.as_ref().is_some_and(|h| !h.is_finished())
    }
}

fn build_stream(format: &AudioFormat, ring: Arc<SampleRing>) -> Result<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow::anyhow!("No audio output device found"))?;
    let name = device
        .description()
        .map(|d| d.name().to_string())
        .unwrap_or_else(|_| "Unknown".into());

    let config = cpal::StreamConfig {
        channels: format.channels,
        sample_rate: format.sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let n = ring.pop_into(data);
            // Underrun (paused or starved): play silence.
            data[n..].fill(0.0);
        },
        |err| {
            log::error!("Audio output stream error: {err}");
        },
        None,
    )?;
    stream.play()?;
    Ok((stream, name))
}

impl AudioDevice for CpalDevice {
    fn write(&mut self, bytes: &[u8]) -> Result<(), MediaError> {
        let samples = self.format.sample_format.decode_f32(bytes);
        let mut offset = 0;
        while offset < samples.len() {
            if !self.is_alive() {
                return Err(MediaError::DeviceUnavailable("audio output stopped".into()));
            }
            offset += self.ring.push(&samples[offset..]);
            if offset < samples.len() {
                std::thread::sleep(WRITE_RETRY);
            }
        }
        Ok(())
    }

    fn drain(&mut self) {
        let deadline = Instant::now() + DRAIN_LIMIT;
        while self.ring.available() > 0 && self.is_alive() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn flush(&mut self) {
        self.ring.discard_queued();
    }

    fn close(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.close();
    }
}
