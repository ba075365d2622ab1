use super::{BadgeSink, BadgeState};
use std::sync::Mutex;
use tracing::{debug, info};

/// Logs badge transitions.
#[derive(Default)]
pub struct ConsoleBadgeSink {
    last: Mutex<Option<BadgeState>>,
}

impl ConsoleBadgeSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BadgeSink for ConsoleBadgeSink {
    fn publish(&self, state: BadgeState) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if *last == Some(state) {
            debug!(badge = state.text(), "Badge unchanged");
            return;
        }
        info!(badge = state.text(), color = state.color(), "Badge is now {:?}", state);
        *last = Some(state);
    }
}
