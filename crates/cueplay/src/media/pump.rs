use std::sync::Arc;

use parking_lot::Mutex;

use super::queue::PushError;
use super::session::Session;
use super::source::FrameSource;
use super::types::Frame;

pub(crate) type SharedSource = Arc<Mutex<Box<dyn FrameSource>>>;

/// Decode loop: pull frames from the source and route them into the session
/// queues until cancelled, failed or the session ends.
///
/// Generations are sampled under the source lock so a seek, which clears the
/// queues while holding the same lock, can never be overtaken by a frame or
/// an end of stream read before it.
pub(crate) fn run(session: &Session, source: &SharedSource) {
    let mut pulled: u64 = 0;

    loop {
        if !session.wait_pumpable() {
            break;
        }

        let (frame, sampled) = {
            let mut source = source.lock();
            let sampled = session.generations();
            (source.next_frame(), sampled)
        };

        let pushed = match frame {
            Ok(Frame::Video(frame)) => session.video.push(frame, sampled.video),
            Ok(Frame::Audio(chunk)) => {
                if session.audio_enabled() {
                    session.audio.push(chunk, sampled.audio)
                } else {
                    Ok(())
                }
            }
            Ok(Frame::EndOfStream) => {
                if session.begin_draining(sampled) {
                    log::debug!("Decode pump reached end of stream after {pulled} frames");
                } else {
                    log::debug!("Ignoring end of stream read before a seek");
                }
                continue;
            }
            Err(e) if e.is_recoverable() => {
                session.note_decode_error();
                log::warn!("Skipping undecodable frame: {e}");
                continue;
            }
            Err(e) => {
                session.fail(&e);
                break;
            }
        };

        match pushed {
            Ok(()) => pulled += 1,
            Err(PushError::Stale) => log::trace!("Dropped frame decoded before seek"),
            Err(PushError::Closed) => break,
        }
    }
}
