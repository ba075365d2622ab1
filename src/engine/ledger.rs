use crate::model::TrackedSite;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

/// Per-site visit days plus the instant of the latest match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitLedger {
    pub visits: BTreeMap<String, BTreeSet<NaiveDate>>,
    /// Epoch milliseconds of the most recent matching navigation.
    pub last_visit_at: BTreeMap<String, i64>,
}

/// What a single navigation changed in the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordOutcome {
    pub matched: Vec<String>,
    /// Sites that gained today's day-key.
    pub newly_recorded: Vec<String>,
}

impl RecordOutcome {
    pub fn day_set_changed(&self) -> bool {
        !self.newly_recorded.is_empty()
    }

    pub fn anything_changed(&self) -> bool {
        !self.matched.is_empty()
    }
}

impl VisitLedger {
    /// Records a visit on `today` for each matched site. The last-visit
    /// instant always advances, the day set gains at most one entry.
    pub fn record<I, S>(&mut self, site_ids: I, today: NaiveDate, at_ms: i64) -> RecordOutcome
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut outcome = RecordOutcome::default();
        for id in site_ids {
            let id = id.as_ref();
            if self.visits.entry(id.to_string()).or_default().insert(today) {
                outcome.newly_recorded.push(id.to_string());
            }
            self.last_visit_at.insert(id.to_string(), at_ms);
            outcome.matched.push(id.to_string());
        }
        outcome
    }

    pub fn days(&self, site_id: &str) -> Option<&BTreeSet<NaiveDate>> {
        self.visits.get(site_id)
    }

    pub fn visited_on(&self, site_id: &str, day: NaiveDate) -> bool {
        self.visits
            .get(site_id)
            .is_some_and(|days| days.contains(&day))
    }

    /// True if any of `sites` has a visit recorded on `day`.
    pub fn any_visited_on(&self, sites: &[TrackedSite], day: NaiveDate) -> bool {
        sites.iter().any(|site| self.visited_on(&site.id, day))
    }

    /// Most recent visit day across `sites`.
    pub fn latest_day(&self, sites: &[TrackedSite]) -> Option<NaiveDate> {
        sites
            .iter()
            .filter_map(|site| self.visits.get(&site.id))
            .filter_map(|days| days.last().copied())
            .max()
    }

    /// Clears the day set of one site. Returns whether anything was removed.
    pub fn reset_site(&mut self, site_id: &str) -> bool {
        self.visits.remove(site_id).is_some()
    }

    pub fn reset_all(&mut self) {
        self.visits.clear();
    }

    /// Drops every trace of a site, day set and last-visit instant alike.
    pub fn purge(&mut self, site_id: &str) -> bool {
        let a = self.visits.remove(site_id).is_some();
        let b = self.last_visit_at.remove(site_id).is_some();
        a || b
    }
}
