use super::{Media, MediaError, SeekError};

impl Media {
    /// Move playback to `target_us`, keeping the pause state the session had.
    ///
    /// Flushes both queues, repositions the source, waits (bounded) for the
    /// queues to refill and publishes the first frame at the new position
    /// before consumers resume. Frames decoded before the flush never reach
    /// the screen or the speakers.
    pub fn seek_to(&self, target_us: i64) -> Result<(), MediaError> {
        let _serial = self.seek_lock.lock();
        let session = self.session().ok_or(SeekError::NotPlaying)?;

        let duration_us = session.info.duration_us;
        if target_us < 0 || (duration_us > 0 && target_us >= duration_us) {
            return Err(SeekError::OutOfRange {
                target_us,
                duration_us,
            }
            .into());
        }

        let snapshot = session.begin_seek().ok_or(SeekError::NotPlaying)?;
        log::debug!("Seeking to {target_us}us");

        let repositioned = {
            // Holding the source lock keeps the pump from sampling a
            // pre-flush generation for a post-seek frame.
            let mut source = self.source.lock();
            let result = source.seek(target_us);
            session.video.clear();
            session.audio.clear();
            result
        };
        if let Err(e) = repositioned {
            log::warn!("Seek to {target_us}us failed: {e}");
            session.finish_seek(snapshot);
            return Err(SeekError::Reposition(e.to_string()).into());
        }

        session.enter_seek_pending();
        let filled = session.wait_for_fill(self.config.seek_timeout());
        if session.is_cancelled() {
            return Err(MediaError::Closed);
        }

        if let Some(image) = session.video.peek_map(|frame| frame.image.clone()) {
            session.publish(image);
        }
        session.clock.set(target_us);
        session.finish_seek(snapshot);

        if filled {
            Ok(())
        } else {
            let waited = self.config.seek_timeout_ms;
            log::warn!("Buffers did not refill within {waited}ms after seek");
            Err(SeekError::Timeout(waited).into())
        }
    }
}
