//! Persistent key-value storage.
//!
//! Values are JSON documents addressed by top-level keys. Each `set` call is
//! applied at once from the caller's perspective; there are no cross-call
//! transactions. Every successful `set` is announced on the change feed.

pub mod memory;
pub mod repository;
pub mod sqlite;

pub use self::memory::MemoryStore;
pub use self::repository::{Batch, Repository, Snapshot};
pub use self::sqlite::SqliteStore;

use crate::error::StoreError;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

pub type StoreMap = Map<String, Value>;

/// Logical keys of the persisted state.
pub mod keys {
    pub const TRACKED_SITES: &str = "trackedSites";
    pub const VISITS_BY_SITE_ID: &str = "visitsBySiteId";
    pub const LAST_VISIT_AT_BY_SITE_ID: &str = "lastVisitAtBySiteId";
    pub const ALLOW_UNTIL_BY_SITE_ID: &str = "allowUntilBySiteId";
    pub const MOTIVATIONS: &str = "motivations";
    pub const JOURNAL: &str = "logs";

    pub const ALL: [&str; 6] = [
        TRACKED_SITES,
        VISITS_BY_SITE_ID,
        LAST_VISIT_AT_BY_SITE_ID,
        ALLOW_UNTIL_BY_SITE_ID,
        MOTIVATIONS,
        JOURNAL,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageArea {
    Local,
}

/// Notification that a `set` call changed some keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageChange {
    pub keys: Vec<String>,
    pub area: StorageArea,
}

impl StorageChange {
    pub fn touches(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }
}

#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the stored values for `keys`; absent keys are simply missing.
    async fn get(&self, keys: &[&str]) -> Result<StoreMap, StoreError>;

    /// Writes all `items` at once and announces the change.
    async fn set(&self, items: StoreMap) -> Result<(), StoreError>;

    /// Subscribes to the change feed.
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

pub(crate) const CHANGE_FEED_CAPACITY: usize = 64;

pub(crate) fn announce(feed: &broadcast::Sender<StorageChange>, items: &StoreMap) {
    if items.is_empty() {
        return;
    }
    // No subscribers is fine
    let _ = feed.send(StorageChange {
        keys: items.keys().cloned().collect(),
        area: StorageArea::Local,
    });
}
