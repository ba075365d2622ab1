//! Clean-streak arithmetic.
//!
//! All day counting is done on local calendar dates, never on elapsed hours,
//! so a DST shift never adds or loses a day.

use super::ledger::VisitLedger;
use crate::model::TrackedSite;
use chrono::{Local, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Tunables for the never-visited branch of the streak formula.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakPolicy {
    /// Extra days credited to a site that has never been visited.
    /// Zero keeps the plain "creation day counts as day 1" rule.
    #[serde(default)]
    pub never_visited_bonus_days: u32,
}

/// Whole local calendar days from `from` to `to`.
pub fn whole_days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

fn floor_one(days: i64) -> u32 {
    u32::try_from(days.max(1)).unwrap_or(u32::MAX)
}

/// Current clean streak of one site, in days.
///
/// - visited today: 0
/// - never visited: days since creation, counting the creation day as day 1
/// - otherwise: whole days since the most recent visit day, floored at 1
pub fn current_streak(
    site: &TrackedSite,
    visits: Option<&BTreeSet<NaiveDate>>,
    today: NaiveDate,
    policy: &StreakPolicy,
) -> u32 {
    let Some(days) = visits.filter(|days| !days.is_empty()) else {
        return floor_one(whole_days_between(site.created_day(), today) + 1)
            .saturating_add(policy.never_visited_bonus_days);
    };
    if days.contains(&today) {
        return 0;
    }
    days.last()
        .map_or(0, |last| floor_one(whole_days_between(*last, today)))
}

/// Minimum streak across sites, ignoring sites created today. Zero when no
/// site is eligible.
pub fn overall_streak(
    sites: &[TrackedSite],
    ledger: &VisitLedger,
    today: NaiveDate,
    policy: &StreakPolicy,
) -> u32 {
    sites
        .iter()
        .filter(|site| site.created_day() != today)
        .map(|site| current_streak(site, ledger.days(&site.id), today, policy))
        .min()
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DayStatus {
    Today,
    Clean,
    Visited,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub status: DayStatus,
}

/// One entry per day from the earliest site creation day through today.
pub fn calendar(sites: &[TrackedSite], ledger: &VisitLedger, today: NaiveDate) -> Vec<CalendarDay> {
    let start = sites
        .iter()
        .map(TrackedSite::created_day)
        .min()
        .unwrap_or(today)
        .min(today);

    start
        .iter_days()
        .take_while(|day| *day <= today)
        .map(|date| {
            let status = if date == today {
                DayStatus::Today
            } else if ledger.any_visited_on(sites, date) {
                DayStatus::Visited
            } else {
                DayStatus::Clean
            };
            CalendarDay { date, status }
        })
        .collect()
}

/// The instant the current clean stretch started, in epoch milliseconds.
///
/// Prefers the precise last-visit instant, then local midnight of the most
/// recent visit day, then the earliest tracking start, then `now_ms`.
pub fn clean_since_ms(sites: &[TrackedSite], ledger: &VisitLedger, now_ms: i64) -> i64 {
    let precise = sites
        .iter()
        .filter_map(|site| ledger.last_visit_at.get(&site.id).copied())
        .max();
    if let Some(ms) = precise {
        return ms;
    }

    let midnight = ledger
        .latest_day(sites)
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|dt| dt.timestamp_millis());
    if let Some(ms) = midnight {
        return ms;
    }

    sites
        .iter()
        .map(|site| site.created_at.timestamp_millis())
        .min()
        .unwrap_or(now_ms)
}
