use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const ALARM_PREFIX: &str = "allow-expire-";

/// Temporary allowances: site id -> expiry in epoch milliseconds.
///
/// An entry whose expiry is at or before `now` grants nothing, whether or not
/// it has been physically removed yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Allowances(BTreeMap<String, i64>);

impl Allowances {
    pub fn is_allowed(&self, site_id: &str, now_ms: i64) -> bool {
        self.0.get(site_id).is_some_and(|&expiry| expiry > now_ms)
    }

    pub fn expiry(&self, site_id: &str) -> Option<i64> {
        self.0.get(site_id).copied()
    }

    pub fn grant(&mut self, site_id: &str, expiry_ms: i64) {
        self.0.insert(site_id.to_string(), expiry_ms);
    }

    /// Removes the entry only if it has expired. Returns whether it did.
    pub fn clear_if_expired(&mut self, site_id: &str, now_ms: i64) -> bool {
        match self.0.get(site_id) {
            Some(&expiry) if expiry <= now_ms => {
                self.0.remove(site_id);
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, site_id: &str) -> bool {
        self.0.remove(site_id).is_some()
    }

    /// Drops every expired entry, returning the affected site ids.
    pub fn prune_expired(&mut self, now_ms: i64) -> Vec<String> {
        let expired: Vec<String> = self
            .0
            .iter()
            .filter(|&(_, &expiry)| expiry <= now_ms)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.0.remove(id);
        }
        expired
    }

    /// Entries still granting an allowance at `now_ms`.
    pub fn live(&self, now_ms: i64) -> impl Iterator<Item = (&str, i64)> {
        self.0
            .iter()
            .filter(move |&(_, &expiry)| expiry > now_ms)
            .map(|(id, &expiry)| (id.as_str(), expiry))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, i64)> for Allowances {
    fn from_iter<T: IntoIterator<Item = (String, i64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Name of the one-shot alarm that expires a site's allowance.
pub fn alarm_name(site_id: &str) -> String {
    format!("{ALARM_PREFIX}{site_id}")
}

/// Site id encoded in an expiry alarm name, if the alarm is one of ours.
pub fn site_from_alarm(name: &str) -> Option<&str> {
    name.strip_prefix(ALARM_PREFIX).filter(|id| !id.is_empty())
}

/// When the expiry alarm should fire: never sooner than `min_delay_ms` from now.
pub fn alarm_fire_at(now_ms: i64, expiry_ms: i64, min_delay_ms: i64) -> i64 {
    expiry_ms.max(now_ms + min_delay_ms)
}
