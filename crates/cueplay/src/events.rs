use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::media::SessionState;

/// Notifications published by a playback session.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    StateChanged(SessionState),
    /// Both queues drained after end of stream. Sent exactly once.
    Completed,
    /// Fatal failure; the renderer now receives a blank frame.
    Failed(String),
}

const SUBSCRIBER_BACKLOG: usize = 64;

/// Fan-out of session events to any number of subscribers, owned by the
/// session that emits them.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<MediaEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<MediaEvent> {
        let (tx, rx) = crossbeam_channel::bounded(SUBSCRIBER_BACKLOG);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Non-blocking send; a subscriber that stopped reading misses events,
    /// one that dropped its receiver is removed.
    pub fn emit(&self, event: MediaEvent) {
        self.subscribers
            .lock()
            .retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) | Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
