use super::types::{Command, NavigationEvent, NewSite, Reply, SitePatch};
use crate::badge::{badge_for, BadgePublisher, BadgeState};
use crate::clock::{next_local_midnight_ms, Clock};
use crate::config::Config;
use crate::engine::rules::has_filter_operators;
use crate::engine::state::{alarm_fire_at, alarm_name, site_from_alarm};
use crate::engine::{
    regex_error, PatternMatcher, RecordOutcome, RuleSynchronizer, UrlMatcher, VisitLedger,
};
use crate::error::{CommandError, StoreError};
use crate::model::{JournalEntry, TrackedSite};
use crate::scheduler::Scheduler;
use crate::stats::StatsCollector;
use crate::store::{keys, Batch, Repository, StorageChange};
use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info, warn};

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Fires at local midnight so a "visited" badge does not outlive its day.
pub const DAY_ROLLOVER_ALARM: &str = "day-rollover";

/// Reacts to every event source. Each method runs one event to completion.
#[derive(Clone)]
pub struct EventHandler {
    config: Config,
    repo: Repository,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    rules: Arc<RuleSynchronizer>,
    badge: BadgePublisher,
    stats: Arc<StatsCollector>,
}

impl EventHandler {
    pub fn new(
        config: Config,
        repo: Repository,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
        rules: Arc<RuleSynchronizer>,
        badge: BadgePublisher,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            config,
            repo,
            clock,
            scheduler,
            rules,
            badge,
            stats,
        }
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Startup: initialise storage, drop stale allowances, re-arm live ones,
    /// then publish the badge and rebuild the rules.
    pub async fn on_startup(&self) -> Result<(), StoreError> {
        let seed = self
            .config
            .seed_tracked_sites(self.clock.now().with_timezone(&Utc));
        self.repo.ensure_initial_data(&seed).await?;

        let now = self.clock.now_ms();
        let mut allowances = self.repo.allowances().await?;
        let expired = allowances.prune_expired(now);
        if !expired.is_empty() {
            info!(sites = ?expired, "Removing expired allowances");
            self.repo
                .commit(Batch::new().allowances(&allowances))
                .await?;
        }
        for (site_id, expiry) in allowances.live(now) {
            self.arm_expiry(site_id, expiry, now);
        }

        self.refresh_badge().await?;
        self.arm_day_rollover();
        self.rules.rebuild().await?;
        Ok(())
    }

    pub async fn on_navigation(&self, event: &NavigationEvent) -> Result<RecordOutcome, StoreError> {
        self.stats.inc_navigations();
        if !event.is_top_level() {
            self.stats.inc_ignored_subframes();
            return Ok(RecordOutcome::default());
        }
        if event.url.is_empty() {
            return Ok(RecordOutcome::default());
        }

        let sites = self.repo.tracked_sites().await?;
        let matched = PatternMatcher::new(&sites).matching_sites(&event.url);
        if matched.is_empty() {
            return Ok(RecordOutcome::default());
        }
        self.stats.inc_matched();

        let now = self.clock.now();
        let mut ledger = self.repo.ledger().await?;
        let outcome = ledger.record(&matched, now.date_naive(), now.timestamp_millis());

        if outcome.day_set_changed() {
            self.repo
                .commit(Batch::new().visits(&ledger).last_visits(&ledger))
                .await?;
            self.stats
                .add_visits_recorded(outcome.newly_recorded.len() as u64);
            info!(sites = ?outcome.newly_recorded, kind = ?event.kind, "Visit recorded for today");
            self.publish_badge(&sites, &ledger);
        } else {
            self.repo.commit(Batch::new().last_visits(&ledger)).await?;
            debug!(sites = ?outcome.matched, "Already visited today, last visit updated");
        }
        Ok(outcome)
    }

    pub async fn on_storage_change(&self, change: &StorageChange) -> Result<(), StoreError> {
        if change.touches(keys::TRACKED_SITES) || change.touches(keys::ALLOW_UNTIL_BY_SITE_ID) {
            self.rules.rebuild().await?;
        }
        if change.touches(keys::TRACKED_SITES) || change.touches(keys::VISITS_BY_SITE_ID) {
            self.refresh_badge().await?;
        }
        Ok(())
    }

    /// Full rebuild after missed change notifications.
    pub async fn resync(&self) -> Result<(), StoreError> {
        self.rules.rebuild().await?;
        self.refresh_badge().await?;
        Ok(())
    }

    pub async fn on_alarm(&self, name: &str) -> Result<(), StoreError> {
        if name == DAY_ROLLOVER_ALARM {
            let badge = self.refresh_badge().await?;
            debug!(?badge, "New local day");
            self.arm_day_rollover();
            return Ok(());
        }
        let Some(site_id) = site_from_alarm(name) else {
            debug!(alarm = %name, "Ignoring unrelated alarm");
            return Ok(());
        };
        self.stats.inc_alarms();

        let mut allowances = self.repo.allowances().await?;
        if allowances.clear_if_expired(site_id, self.clock.now_ms()) {
            info!(site = %site_id, "Allowance expired");
            self.repo
                .commit(Batch::new().allowances(&allowances))
                .await?;
        }
        self.rules.rebuild().await?;
        Ok(())
    }

    /// Recomputes the badge from persisted state and publishes it.
    pub async fn refresh_badge(&self) -> Result<BadgeState, StoreError> {
        let sites = self.repo.tracked_sites().await?;
        let ledger = self.repo.ledger().await?;
        Ok(self.publish_badge(&sites, &ledger))
    }

    fn publish_badge(&self, sites: &[TrackedSite], ledger: &VisitLedger) -> BadgeState {
        let state = badge_for(sites, ledger, self.clock.today());
        self.badge.publish(state);
        state
    }

    fn arm_day_rollover(&self) {
        let when = next_local_midnight_ms(self.clock.now());
        self.scheduler.schedule_once(DAY_ROLLOVER_ALARM, when);
    }

    fn arm_expiry(&self, site_id: &str, expiry: i64, now: i64) {
        let when = alarm_fire_at(now, expiry, self.config.allowance.min_delay_ms);
        self.scheduler.schedule_once(&alarm_name(site_id), when);
    }

    pub async fn execute(&self, command: Command) -> Result<Reply, CommandError> {
        debug!(command = command.name(), "Executing command");
        match command {
            Command::AllowSiteTemporarily {
                site_id,
                allow_until_ms,
            } => self.allow_site(site_id, allow_until_ms).await,
            Command::AddSite(new_site) => self.add_site(new_site).await,
            Command::UpdateSite { site_id, patch } => self.update_site(&site_id, patch).await,
            Command::DeleteSite { site_id } => self.delete_site(&site_id).await,
            Command::ResetSiteVisits { site_id } => {
                let mut ledger = self.repo.ledger().await?;
                if ledger.reset_site(&site_id) {
                    self.repo.commit(Batch::new().visits(&ledger)).await?;
                    info!(site = %site_id, "Visits reset");
                }
                self.refresh_badge().await?;
                Ok(Reply::Ok)
            }
            Command::ResetAllVisits => {
                let mut ledger = self.repo.ledger().await?;
                ledger.reset_all();
                self.repo.commit(Batch::new().visits(&ledger)).await?;
                info!("All visits reset");
                self.refresh_badge().await?;
                Ok(Reply::Ok)
            }
            Command::ResetEverything => {
                let empty = VisitLedger::default();
                self.repo
                    .commit(
                        Batch::new()
                            .sites(&[])
                            .visits(&empty)
                            .last_visits(&empty)
                            .allowances(&Default::default()),
                    )
                    .await?;
                warn!("All tracked sites and visits removed");
                self.rules.rebuild().await?;
                self.refresh_badge().await?;
                Ok(Reply::Ok)
            }
            Command::AddMotivation(text) => {
                let text = required("text", &text)?;
                let mut motivations = self.repo.motivations().await?;
                motivations.push(text);
                self.repo
                    .commit(Batch::new().motivations(&motivations))
                    .await?;
                Ok(Reply::Ok)
            }
            Command::DeleteMotivation(index) => {
                let mut motivations = self.repo.motivations().await?;
                check_index(index, motivations.len())?;
                motivations.remove(index);
                self.repo
                    .commit(Batch::new().motivations(&motivations))
                    .await?;
                Ok(Reply::Ok)
            }
            Command::AddJournalEntry(text) => {
                let text = required("text", &text)?;
                let mut journal = self.repo.journal().await?;
                journal.insert(
                    0,
                    JournalEntry {
                        ts: self.clock.now_ms(),
                        text,
                    },
                );
                self.repo.commit(Batch::new().journal(&journal)).await?;
                Ok(Reply::Ok)
            }
            Command::DeleteJournalEntry(index) => {
                let mut journal = self.repo.journal().await?;
                check_index(index, journal.len())?;
                journal.remove(index);
                self.repo.commit(Batch::new().journal(&journal)).await?;
                Ok(Reply::Ok)
            }
            Command::Import(snapshot) => {
                let written = self.repo.import(&snapshot).await?;
                info!(keys = ?written, "Snapshot imported");
                if written.iter().any(|k| k == keys::TRACKED_SITES) {
                    self.warn_unusable_patterns().await?;
                    self.rules.rebuild().await?;
                }
                self.refresh_badge().await?;
                Ok(Reply::Imported { keys: written })
            }
        }
    }

    async fn allow_site(&self, site_id: String, allow_until_ms: i64) -> Result<Reply, CommandError> {
        if allow_until_ms <= 0 {
            return Err(CommandError::validation(
                "allowUntil",
                "must be a positive epoch millisecond instant",
            ));
        }
        let sites = self.repo.tracked_sites().await?;
        if !sites.iter().any(|s| s.id == site_id) {
            return Err(CommandError::UnknownSite(site_id));
        }

        let now = self.clock.now_ms();
        let mut allowances = self.repo.allowances().await?;
        allowances.grant(&site_id, allow_until_ms);
        self.repo
            .commit(Batch::new().allowances(&allowances))
            .await?;
        self.arm_expiry(&site_id, allow_until_ms, now);
        self.stats.inc_allowances();
        info!(
            site = %site_id,
            remaining_secs = (allow_until_ms - now) / 1000,
            "Temporary allowance granted"
        );

        self.rules.rebuild().await?;
        Ok(Reply::Allowed {
            site_id,
            allow_until: allow_until_ms,
        })
    }

    async fn add_site(&self, new_site: NewSite) -> Result<Reply, CommandError> {
        let label = required("label", &new_site.label)?;
        let pattern = required("pattern", &new_site.pattern)?;
        if new_site.is_regex {
            if let Some(e) = regex_error(&pattern) {
                return Err(CommandError::validation("pattern", e));
            }
        } else if has_filter_operators(&pattern) {
            return Err(CommandError::validation(
                "pattern",
                "plain patterns may not contain '|', '*' or '^'",
            ));
        }

        let now = self.clock.now();
        let mut site = TrackedSite::new(
            generate_site_id(now.timestamp_millis(), &mut rand::thread_rng()),
            label,
            pattern,
            now.with_timezone(&Utc),
        );
        site.is_regex = new_site.is_regex;

        let mut sites = self.repo.tracked_sites().await?;
        sites.push(site.clone());
        self.repo.commit(Batch::new().sites(&sites)).await?;
        info!(site = %site.id, pattern = %site.pattern, "Site added");
        Ok(Reply::Site { site })
    }

    /// Reports imported sites whose patterns will never match or never be
    /// enforced. Navigation-time matching only logs these at debug.
    async fn warn_unusable_patterns(&self) -> Result<(), StoreError> {
        for site in self.repo.tracked_sites().await? {
            if site.is_regex {
                if let Some(e) = regex_error(&site.pattern) {
                    warn!(site = %site.id, pattern = %site.pattern, "Imported regex is invalid and will never match: {}", e);
                }
            } else if has_filter_operators(&site.pattern) {
                warn!(site = %site.id, pattern = %site.pattern, "Imported pattern contains filter operators and will not be enforced");
            }
        }
        Ok(())
    }

    async fn update_site(&self, site_id: &str, patch: SitePatch) -> Result<Reply, CommandError> {
        let mut sites = self.repo.tracked_sites().await?;
        let site = sites
            .iter_mut()
            .find(|s| s.id == site_id)
            .ok_or_else(|| CommandError::UnknownSite(site_id.to_string()))?;

        if let Some(label) = patch.label {
            site.label = required("label", &label)?;
        }
        if let Some(mode) = patch.block_mode {
            site.block_mode = mode;
        }
        if let Some(target) = patch.redirect_url {
            let target = target.trim();
            site.redirect_url = (!target.is_empty()).then(|| target.to_string());
        }
        let updated = site.clone();

        self.repo.commit(Batch::new().sites(&sites)).await?;
        info!(site = %site_id, mode = ?updated.block_mode, "Site updated");
        self.rules.rebuild().await?;
        Ok(Reply::Site { site: updated })
    }

    async fn delete_site(&self, site_id: &str) -> Result<Reply, CommandError> {
        let mut sites = self.repo.tracked_sites().await?;
        let before = sites.len();
        sites.retain(|s| s.id != site_id);
        if sites.len() == before {
            return Err(CommandError::UnknownSite(site_id.to_string()));
        }

        let mut ledger = self.repo.ledger().await?;
        ledger.purge(site_id);
        let mut allowances = self.repo.allowances().await?;
        allowances.remove(site_id);

        self.repo
            .commit(
                Batch::new()
                    .sites(&sites)
                    .visits(&ledger)
                    .last_visits(&ledger)
                    .allowances(&allowances),
            )
            .await?;
        info!(site = %site_id, "Site deleted");

        self.rules.rebuild().await?;
        self.publish_badge(&sites, &ledger);
        Ok(Reply::Ok)
    }
}

fn required(field: &str, value: &str) -> Result<String, CommandError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CommandError::validation(field, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn check_index(index: usize, len: usize) -> Result<(), CommandError> {
    if index >= len {
        return Err(CommandError::OutOfBounds { index, len });
    }
    Ok(())
}

/// `site_<epoch ms>_<6 base36 chars>`
fn generate_site_id(now_ms: i64, rng: &mut impl Rng) -> String {
    let suffix: String = (0..6)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("site_{now_ms}_{suffix}")
}
