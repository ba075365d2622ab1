use super::{BadgeSink, BadgeState};
use tokio::sync::watch;

/// Keeps the latest badge for readers such as the HTTP API.
pub struct WatchBadgeSink {
    tx: watch::Sender<Option<BadgeState>>,
}

impl WatchBadgeSink {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<BadgeState>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Option<BadgeState> {
        *self.tx.borrow()
    }
}

impl Default for WatchBadgeSink {
    fn default() -> Self {
        Self::new()
    }
}

impl BadgeSink for WatchBadgeSink {
    fn publish(&self, state: BadgeState) {
        self.tx.send_replace(Some(state));
    }
}
