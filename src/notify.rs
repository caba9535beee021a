use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 1024;

/// Broadcast hub for committed events. Subscribers see every event in
/// commit order; a slow subscriber lags rather than blocking commits.
pub struct NotifyHub {
    sender: broadcast::Sender<Event>,
}

impl NotifyHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish a committed event. No-op if nobody is listening.
    pub fn publish(&self, event: &Event) {
        if self.sender.receiver_count() > 0 {
            let _ = self.sender.send(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}
