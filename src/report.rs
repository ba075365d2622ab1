//! Read-side summary of the persisted state.

use crate::badge::{badge_for, BadgeState};
use crate::clock::Clock;
use crate::engine::state::Allowances;
use crate::engine::streak::{calendar, clean_since_ms, current_streak, overall_streak, CalendarDay};
use crate::engine::{StreakPolicy, VisitLedger};
use crate::error::StoreError;
use crate::model::{BlockMode, TrackedSite};
use crate::store::Repository;
use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteReport {
    pub id: String,
    pub label: String,
    pub pattern: String,
    pub block_mode: BlockMode,
    pub streak: u32,
    pub visited_today: bool,
    pub visit_days: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_visit_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_until: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub today: NaiveDate,
    pub badge: BadgeState,
    pub overall_streak: u32,
    pub clean_since: i64,
    pub clean_for_secs: i64,
    pub sites: Vec<SiteReport>,
    pub calendar: Vec<CalendarDay>,
}

impl StatusReport {
    pub fn build(
        sites: &[TrackedSite],
        ledger: &VisitLedger,
        allowances: &Allowances,
        now_ms: i64,
        today: NaiveDate,
        policy: &StreakPolicy,
    ) -> Self {
        let clean_since = clean_since_ms(sites, ledger, now_ms);
        let site_reports = sites
            .iter()
            .map(|site| SiteReport {
                id: site.id.clone(),
                label: site.label.clone(),
                pattern: site.pattern.clone(),
                block_mode: site.block_mode,
                streak: current_streak(site, ledger.days(&site.id), today, policy),
                visited_today: ledger.visited_on(&site.id, today),
                visit_days: ledger.days(&site.id).map_or(0, |d| d.len()),
                last_visit_at: ledger.last_visit_at.get(&site.id).copied(),
                allowed_until: allowances
                    .expiry(&site.id)
                    .filter(|_| allowances.is_allowed(&site.id, now_ms)),
            })
            .collect();

        Self {
            today,
            badge: badge_for(sites, ledger, today),
            overall_streak: overall_streak(sites, ledger, today, policy),
            clean_since,
            clean_for_secs: ((now_ms - clean_since) / 1000).max(0),
            sites: site_reports,
            calendar: calendar(sites, ledger, today),
        }
    }

    pub async fn load(
        repo: &Repository,
        clock: &dyn Clock,
        policy: &StreakPolicy,
    ) -> Result<Self, StoreError> {
        let sites = repo.tracked_sites().await?;
        let ledger = repo.ledger().await?;
        let allowances = repo.allowances().await?;
        Ok(Self::build(
            &sites,
            &ledger,
            &allowances,
            clock.now_ms(),
            clock.today(),
            policy,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    #[test]
    fn test_report_combines_streaks_and_allowances() {
        let now = Local.with_ymd_and_hms(2024, 6, 10, 15, 0, 0).unwrap();
        let today = now.date_naive();
        let created = Local
            .with_ymd_and_hms(2024, 6, 1, 9, 0, 0)
            .unwrap()
            .with_timezone(&chrono::Utc);

        let sites = vec![
            TrackedSite::new("yt", "YouTube", "youtube.com", created),
            TrackedSite::new("nf", "Netflix", "netflix.com", created),
        ];
        let mut ledger = VisitLedger::default();
        let visit_at = Local.with_ymd_and_hms(2024, 6, 7, 20, 0, 0).unwrap();
        ledger.record(["nf"], visit_at.date_naive(), visit_at.timestamp_millis());

        let now_ms = now.timestamp_millis();
        let allowances: Allowances = [
            ("yt".to_string(), now_ms + 60_000),
            ("nf".to_string(), now_ms - 1),
        ]
        .into_iter()
        .collect();

        let report = StatusReport::build(
            &sites,
            &ledger,
            &allowances,
            now_ms,
            today,
            &StreakPolicy::default(),
        );

        assert_eq!(report.badge, BadgeState::Clean);
        assert_eq!(report.sites[0].streak, 10);
        assert_eq!(report.sites[1].streak, 3);
        assert_eq!(report.overall_streak, 3);
        assert_eq!(report.sites[0].allowed_until, Some(now_ms + 60_000));
        assert_eq!(report.sites[1].allowed_until, None);
        assert_eq!(report.clean_since, visit_at.timestamp_millis());
        assert_eq!(report.clean_for_secs, (now_ms - visit_at.timestamp_millis()) / 1000);
        assert_eq!(report.calendar.len(), 10);
    }
}
