use tokio::sync::broadcast;

use crate::model::BookingNotice;

const CHANNEL_CAPACITY: usize = 1024;

/// Broadcast hub for booking notices. Publishing never waits on subscribers.
pub struct NotifyHub {
    sender: broadcast::Sender<BookingNotice>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookingNotice> {
        self.sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn publish(&self, notice: BookingNotice) {
        if self.sender.send(notice).is_err() {
            tracing::trace!("booking notice dropped: no subscribers");
        }
    }
}
