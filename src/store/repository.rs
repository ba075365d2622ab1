//! Typed access to the persisted keys.
//!
//! Reads never fail on malformed data: a key with the wrong shape is treated
//! as absent, and individual bad entries inside a well-shaped key are dropped
//! with a warning. Only store I/O failures surface as errors.

use super::{keys, KeyValueStore, StoreMap};
use crate::clock::{day_key, parse_day_key};
use crate::engine::ledger::VisitLedger;
use crate::engine::state::Allowances;
use crate::error::StoreError;
use crate::model::{JournalEntry, TrackedSite};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn KeyValueStore>,
}

/// A set of key writes applied in one `set` call.
#[derive(Debug, Default)]
pub struct Batch(StoreMap);

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sites(mut self, sites: &[TrackedSite]) -> Self {
        self.put(keys::TRACKED_SITES, sites);
        self
    }

    pub fn visits(mut self, ledger: &VisitLedger) -> Self {
        self.0
            .insert(keys::VISITS_BY_SITE_ID.to_string(), encode_visits(ledger));
        self
    }

    pub fn last_visits(mut self, ledger: &VisitLedger) -> Self {
        self.put(keys::LAST_VISIT_AT_BY_SITE_ID, &ledger.last_visit_at);
        self
    }

    pub fn allowances(mut self, allowances: &Allowances) -> Self {
        self.put(keys::ALLOW_UNTIL_BY_SITE_ID, allowances);
        self
    }

    pub fn motivations(mut self, motivations: &[String]) -> Self {
        self.put(keys::MOTIVATIONS, motivations);
        self
    }

    pub fn journal(mut self, entries: &[JournalEntry]) -> Self {
        self.put(keys::JOURNAL, entries);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    fn put<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(v) => {
                self.0.insert(key.to_string(), v);
            }
            Err(e) => warn!(key = %key, "Failed to encode value: {}", e),
        }
    }
}

/// Export/import document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracked_sites: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visits_by_site_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motivations: Option<Value>,
}

impl Repository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub async fn commit(&self, batch: Batch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.store.set(batch.0).await
    }

    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut values = self.store.get(&[key]).await?;
        Ok(values.remove(key))
    }

    pub async fn tracked_sites(&self) -> Result<Vec<TrackedSite>, StoreError> {
        Ok(decode_sites(self.read(keys::TRACKED_SITES).await?.as_ref()).unwrap_or_default())
    }

    pub async fn ledger(&self) -> Result<VisitLedger, StoreError> {
        let values = self
            .store
            .get(&[keys::VISITS_BY_SITE_ID, keys::LAST_VISIT_AT_BY_SITE_ID])
            .await?;
        Ok(VisitLedger {
            visits: decode_visits(values.get(keys::VISITS_BY_SITE_ID)).unwrap_or_default(),
            last_visit_at: decode_millis_map(values.get(keys::LAST_VISIT_AT_BY_SITE_ID))
                .unwrap_or_default(),
        })
    }

    pub async fn allowances(&self) -> Result<Allowances, StoreError> {
        let map = decode_millis_map(self.read(keys::ALLOW_UNTIL_BY_SITE_ID).await?.as_ref())
            .unwrap_or_default();
        Ok(map.into_iter().collect())
    }

    pub async fn motivations(&self) -> Result<Vec<String>, StoreError> {
        Ok(decode_strings(self.read(keys::MOTIVATIONS).await?.as_ref()).unwrap_or_default())
    }

    pub async fn journal(&self) -> Result<Vec<JournalEntry>, StoreError> {
        Ok(decode_journal(self.read(keys::JOURNAL).await?.as_ref()).unwrap_or_default())
    }

    /// Reinitialises missing or malformed keys. Returns whether anything was written.
    pub async fn ensure_initial_data(&self, seed: &[TrackedSite]) -> Result<bool, StoreError> {
        let values = self
            .store
            .get(&[
                keys::TRACKED_SITES,
                keys::VISITS_BY_SITE_ID,
                keys::MOTIVATIONS,
                keys::ALLOW_UNTIL_BY_SITE_ID,
                keys::LAST_VISIT_AT_BY_SITE_ID,
            ])
            .await?;

        let mut batch = Batch::new();
        if !values.get(keys::TRACKED_SITES).is_some_and(Value::is_array) {
            batch = batch.sites(seed);
        }
        if !values.get(keys::VISITS_BY_SITE_ID).is_some_and(Value::is_object) {
            batch = batch.visits(&VisitLedger::default());
        }
        if !values.get(keys::MOTIVATIONS).is_some_and(Value::is_array) {
            batch = batch.motivations(&[]);
        }
        if !values.get(keys::ALLOW_UNTIL_BY_SITE_ID).is_some_and(Value::is_object) {
            batch = batch.allowances(&Allowances::default());
        }
        if !values.get(keys::LAST_VISIT_AT_BY_SITE_ID).is_some_and(Value::is_object) {
            batch = batch.last_visits(&VisitLedger::default());
        }

        if batch.is_empty() {
            return Ok(false);
        }
        info!(keys = ?batch.keys(), "Initializing persisted state");
        self.commit(batch).await?;
        Ok(true)
    }

    pub async fn export(&self) -> Result<Snapshot, StoreError> {
        let sites = self.tracked_sites().await?;
        let ledger = self.ledger().await?;
        let motivations = self.motivations().await?;
        Ok(Snapshot {
            tracked_sites: Some(serde_json::to_value(sites)?),
            visits_by_site_id: Some(encode_visits(&ledger)),
            motivations: Some(serde_json::to_value(motivations)?),
        })
    }

    /// Writes the well-formed parts of `snapshot`. Returns the keys written.
    pub async fn import(&self, snapshot: &Snapshot) -> Result<Vec<String>, StoreError> {
        let mut batch = Batch::new();
        if let Some(sites) = decode_sites(snapshot.tracked_sites.as_ref()) {
            batch = batch.sites(&sites);
        }
        if let Some(visits) = decode_visits(snapshot.visits_by_site_id.as_ref()) {
            batch = batch.visits(&VisitLedger {
                visits,
                last_visit_at: BTreeMap::new(),
            });
        }
        if let Some(motivations) = decode_strings(snapshot.motivations.as_ref()) {
            batch = batch.motivations(&motivations);
        }
        let written = batch.keys();
        self.commit(batch).await?;
        Ok(written)
    }
}

fn encode_visits(ledger: &VisitLedger) -> Value {
    let map: Map<String, Value> = ledger
        .visits
        .iter()
        .map(|(id, days)| {
            let days: Vec<Value> = days.iter().map(|d| Value::String(day_key(*d))).collect();
            (id.clone(), Value::Array(days))
        })
        .collect();
    Value::Object(map)
}

fn decode_sites(value: Option<&Value>) -> Option<Vec<TrackedSite>> {
    let items = value?.as_array()?;
    let sites = items
        .iter()
        .filter_map(|item| match serde_json::from_value::<TrackedSite>(item.clone()) {
            Ok(site) => Some(site),
            Err(e) => {
                warn!("Dropping malformed tracked site: {}", e);
                None
            }
        })
        .collect();
    Some(sites)
}

fn decode_visits(value: Option<&Value>) -> Option<BTreeMap<String, BTreeSet<chrono::NaiveDate>>> {
    let object = value?.as_object()?;
    let mut visits = BTreeMap::new();
    for (id, days) in object {
        let Some(days) = days.as_array() else {
            warn!(site = %id, "Ignoring malformed visit list");
            continue;
        };
        let parsed: BTreeSet<_> = days
            .iter()
            .filter_map(|d| d.as_str().and_then(parse_day_key))
            .collect();
        if parsed.len() < days.len() {
            warn!(site = %id, dropped = days.len() - parsed.len(), "Ignoring malformed day keys");
        }
        visits.insert(id.clone(), parsed);
    }
    Some(visits)
}

fn decode_millis_map(value: Option<&Value>) -> Option<BTreeMap<String, i64>> {
    let object = value?.as_object()?;
    Some(
        object
            .iter()
            .filter_map(|(id, v)| {
                v.as_i64()
                    .or_else(|| v.as_f64().map(|f| f as i64))
                    .map(|ms| (id.clone(), ms))
            })
            .collect(),
    )
}

fn decode_strings(value: Option<&Value>) -> Option<Vec<String>> {
    let items = value?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
    )
}

fn decode_journal(value: Option<&Value>) -> Option<Vec<JournalEntry>> {
    let items = value?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect(),
    )
}
