pub mod console_sink;
pub mod types;
pub mod watch_sink;

pub use self::console_sink::ConsoleBadgeSink;
pub use self::types::{BadgeSink, BadgeState};
pub use self::watch_sink::WatchBadgeSink;

use crate::engine::VisitLedger;
use crate::model::TrackedSite;
use chrono::NaiveDate;
use std::sync::Arc;

/// Badge for `today`, recomputed from scratch.
pub fn badge_for(sites: &[TrackedSite], ledger: &VisitLedger, today: NaiveDate) -> BadgeState {
    if ledger.any_visited_on(sites, today) {
        BadgeState::Visited
    } else {
        BadgeState::Clean
    }
}

/// Fans a badge state out to every sink.
#[derive(Clone, Default)]
pub struct BadgePublisher {
    sinks: Vec<Arc<dyn BadgeSink>>,
}

impl BadgePublisher {
    pub fn new(sinks: Vec<Arc<dyn BadgeSink>>) -> Self {
        Self { sinks }
    }

    pub fn publish(&self, state: BadgeState) {
        for sink in &self.sinks {
            sink.publish(state);
        }
    }
}
