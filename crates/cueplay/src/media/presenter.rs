use std::time::{Duration, Instant};

use super::queue::{Popped, QueueClosed};
use super::session::{Commit, POP_TIMEOUT, Session};
use super::types::{StreamKind, VideoFrame};
use crate::settings::SyncTuning;

/// Delay between the previous presentation and the next one.
///
/// `delta_us` is the frame timestamp minus the audio clock, or `None` when no
/// audio stream governs the clock (pure frame-rate pacing). Video ahead by
/// more than one interval is slowed in proportion to the offset; video behind
/// the clock waits only a fixed fraction of the interval.
pub fn pacing_delay(interframe_us: i64, delta_us: Option<i64>, tuning: &SyncTuning) -> Duration {
    let interframe = interframe_us.max(0) as f64;
    let micros = match delta_us {
        Some(delta) if delta > interframe_us => interframe + delta as f64 * tuning.ahead_factor,
        Some(delta) if delta < 0 => interframe * tuning.behind_factor,
        Some(_) | None => interframe,
    };
    Duration::from_micros(micros.max(0.0) as u64)
}

/// Video presenter loop: publish each dequeued frame immediately, then pace
/// against the clock until the next one is due.
pub(crate) fn run(session: &Session) {
    let interframe = session.info.interframe_us();
    let tuning = session.config.sync;
    let mut last_presented = Instant::now();
    let mut pending: Option<Popped<VideoFrame>> = None;

    log::debug!("Video presenter pacing at {interframe}us per frame");

    loop {
        if !session.wait_consumable() {
            break;
        }

        let popped = match pending.take() {
            Some(popped) => popped,
            None => match session.video.pop_timeout(POP_TIMEOUT) {
                Ok(Some(popped)) => popped,
                Ok(None) => {
                    session.mark_drained(StreamKind::Video);
                    continue;
                }
                Err(QueueClosed) => break,
            },
        };

        // Re-read each frame: a failed audio device hands the clock to video.
        let audio_governs = session.audio_governs();
        let frame = &popped.item;
        let outcome = session.commit(StreamKind::Video, popped.generation, || {
            session.publish(frame.image.clone());
            session.note_presented();
            if !audio_governs {
                session.clock.set(frame.timestamp_us);
            }
        });
        match outcome {
            Commit::Done => {}
            Commit::NotNow => {
                pending = Some(popped);
                continue;
            }
            Commit::Stale => continue,
            Commit::Exit => break,
        }

        let delta = audio_governs.then(|| frame.timestamp_us - session.clock.position());
        let target = last_presented + pacing_delay(interframe, delta, &tuning);
        if target > Instant::now() {
            session.sleep_until(target);
        }
        last_presented = Instant::now();
    }
}
