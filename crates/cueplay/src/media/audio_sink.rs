use super::queue::{Popped, QueueClosed};
use super::session::{Commit, POP_TIMEOUT, Phase, Session};
use super::types::{AudioChunk, StreamKind};
use crate::audio::AudioDevice;

/// Audio sink loop. Device writes block in real time, so this thread is
/// what advances the clock when audio governs it.
///
/// The clock trails by one chunk: before a chunk is written, the clock moves
/// to the timestamp of the chunk written just before it.
///
/// The device backlog is flushed when playback pauses and when a seek moves
/// to a new generation.
pub(crate) fn run(session: &Session, mut device: Box<dyn AudioDevice>) {
    // (generation, timestamp) of the last chunk handed to the device.
    let mut written: Option<(u64, i64)> = None;
    let mut pending: Option<Popped<AudioChunk>> = None;
    let mut silenced = false;

    loop {
        if written.is_some() && !silenced && session.is_paused() {
            device.flush();
            silenced = true;
        }
        if !session.wait_consumable() {
            break;
        }

        let popped = match pending.take() {
            Some(popped) => popped,
            None => match session.audio.pop_timeout(POP_TIMEOUT) {
                Ok(Some(popped)) => popped,
                Ok(None) => {
                    if session.phase() == Phase::Draining && !finish(session, &mut *device, written) {
                        break;
                    }
                    continue;
                }
                Err(QueueClosed) => break,
            },
        };

        // A chunk from a newer generation follows a seek; the seek already set the clock.
        let previous = written
            .filter(|(generation, _)| *generation == popped.generation)
            .map(|(_, ts)| ts);
        let governs = session.audio_governs();
        let outcome = session.commit(StreamKind::Audio, popped.generation, || {
            if let (true, Some(ts)) = (governs, previous) {
                session.clock.set(ts);
            }
        });
        match outcome {
            Commit::Done => {}
            Commit::NotNow => {
                pending = Some(popped);
                continue;
            }
            Commit::Stale => {
                if written.take().is_some() {
                    device.flush();
                }
                continue;
            }
            Commit::Exit => break,
        }

        if written.is_some_and(|(generation, _)| generation != popped.generation) {
            device.flush();
        }
        if let Err(e) = device.write(&popped.item.data) {
            log::error!("Audio device failed, continuing video-only: {e}");
            session.set_audio_enabled(false);
            session.audio.clear();
            break;
        }
        written = Some((popped.generation, popped.item.timestamp_us));
        silenced = false;
    }

    device.close();
}

/// Queue empty after end of stream: settle the clock on the final chunk,
/// let the device play out and report this consumer drained.
///
/// Returns `false` when the session is exiting.
fn finish(session: &Session, device: &mut dyn AudioDevice, written: Option<(u64, i64)>) -> bool {
    if let Some((generation, ts)) = written {
        let governs = session.audio_governs();
        let outcome = session.commit(StreamKind::Audio, generation, || {
            if governs {
                session.clock.set(ts);
            }
        });
        match outcome {
            Commit::Exit => return false,
            Commit::NotNow => return true,
            Commit::Done | Commit::Stale => {}
        }
    }
    device.drain();
    session.mark_drained(StreamKind::Audio);
    true
}
