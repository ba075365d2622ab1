use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{self, Duration};
use tracing::info;

#[derive(Debug, Default)]
pub struct StatsCollector {
    navigations: AtomicU64,
    ignored_subframes: AtomicU64,
    matched_navigations: AtomicU64,
    visits_recorded: AtomicU64,

    rule_rebuilds: AtomicU64,
    rule_failures: AtomicU64,

    allowances_granted: AtomicU64,
    alarms_fired: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub navigations: u64,
    pub ignored_subframes: u64,
    pub matched_navigations: u64,
    pub visits_recorded: u64,
    pub rule_rebuilds: u64,
    pub rule_failures: u64,
    pub allowances_granted: u64,
    pub alarms_fired: u64,
}

impl StatsCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Spawns the periodic dump task.
    pub fn spawn_logger(self: &Arc<Self>, log_interval_sec: u64) {
        let stats = self.clone();
        let period = Duration::from_secs(log_interval_sec.max(1));
        tokio::spawn(async move {
            let mut interval = time::interval(period);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                stats.dump_stats();
            }
        });
    }

    pub fn inc_navigations(&self) {
        self.navigations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ignored_subframes(&self) {
        self.ignored_subframes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_matched(&self) {
        self.matched_navigations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_visits_recorded(&self, n: u64) {
        self.visits_recorded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_rule_rebuilds(&self) {
        self.rule_rebuilds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rule_failures(&self) {
        self.rule_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_allowances(&self) {
        self.allowances_granted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_alarms(&self) {
        self.alarms_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            navigations: self.navigations.load(Ordering::Relaxed),
            ignored_subframes: self.ignored_subframes.load(Ordering::Relaxed),
            matched_navigations: self.matched_navigations.load(Ordering::Relaxed),
            visits_recorded: self.visits_recorded.load(Ordering::Relaxed),
            rule_rebuilds: self.rule_rebuilds.load(Ordering::Relaxed),
            rule_failures: self.rule_failures.load(Ordering::Relaxed),
            allowances_granted: self.allowances_granted.load(Ordering::Relaxed),
            alarms_fired: self.alarms_fired.load(Ordering::Relaxed),
        }
    }

    fn dump_stats(&self) {
        let s = self.snapshot();
        let match_pct = if s.navigations > 0 {
            (s.matched_navigations as f64 / s.navigations as f64) * 100.0
        } else {
            0.0
        };

        info!(
            "STATS DUMP: Navigations: {} (subframes ignored: {}), Matched: {} ({:.1}%), NewVisitDays: {}, Rebuilds: {} (failed: {}), Allowances: {}, Alarms: {}",
            s.navigations,
            s.ignored_subframes,
            s.matched_navigations,
            match_pct,
            s.visits_recorded,
            s.rule_rebuilds,
            s.rule_failures,
            s.allowances_granted,
            s.alarms_fired
        );
    }
}
