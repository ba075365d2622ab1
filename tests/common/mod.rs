#![allow(dead_code)]

use chrono::{DateTime, Local, TimeZone, Utc};
use std::sync::Arc;
use streak_guard::badge::{BadgePublisher, BadgeSink, WatchBadgeSink};
use streak_guard::clock::{Clock, ManualClock};
use streak_guard::config::Config;
use streak_guard::engine::rules::Rule;
use streak_guard::engine::{RuleEngine, RuleSynchronizer};
use streak_guard::model::{BlockMode, TrackedSite};
use streak_guard::rule_engine::InMemoryRuleEngine;
use streak_guard::scheduler::ManualScheduler;
use streak_guard::server::EventHandler;
use streak_guard::stats::StatsCollector;
use streak_guard::store::{Batch, MemoryStore, Repository};

pub struct Harness {
    pub config: Config,
    pub repo: Repository,
    pub clock: Arc<ManualClock>,
    pub scheduler: Arc<ManualScheduler>,
    pub engine: Arc<InMemoryRuleEngine>,
    pub badge: Arc<WatchBadgeSink>,
    pub stats: Arc<StatsCollector>,
    pub handler: EventHandler,
}

pub fn local(y: i32, m: u32, d: u32, h: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

impl Harness {
    pub fn new(start: DateTime<Local>) -> Self {
        Self::with_config(Config::default(), start)
    }

    pub fn with_config(config: Config, start: DateTime<Local>) -> Self {
        let repo = Repository::new(Arc::new(MemoryStore::new()));
        let clock = Arc::new(ManualClock::new(start));
        let scheduler = Arc::new(ManualScheduler::new());
        let engine = Arc::new(InMemoryRuleEngine::new(config.enforcement.max_rules));
        let badge = Arc::new(WatchBadgeSink::new());
        let stats = StatsCollector::new();

        let rules = Arc::new(RuleSynchronizer::new(
            repo.clone(),
            engine.clone(),
            clock.clone(),
            stats.clone(),
            config.rule_policy(),
        ));
        let sinks: Vec<Arc<dyn BadgeSink>> = vec![badge.clone()];
        let handler = EventHandler::new(
            config.clone(),
            repo.clone(),
            clock.clone(),
            scheduler.clone(),
            rules,
            BadgePublisher::new(sinks),
            stats.clone(),
        );

        Self {
            config,
            repo,
            clock,
            scheduler,
            engine,
            badge,
            stats,
            handler,
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn site(&self, id: &str, pattern: &str, mode: BlockMode) -> TrackedSite {
        let mut site = TrackedSite::new(id, id, pattern, self.clock.now().with_timezone(&Utc));
        site.block_mode = mode;
        site
    }

    pub async fn save_sites(&self, sites: &[TrackedSite]) {
        self.repo.commit(Batch::new().sites(sites)).await.unwrap();
    }

    pub async fn rules(&self) -> Vec<Rule> {
        self.engine.list_current_rules().await.unwrap()
    }

    /// Fires every alarm due at the current clock time.
    pub async fn fire_due_alarms(&self) -> usize {
        let due = self.scheduler.take_due(self.now_ms());
        for name in &due {
            self.handler.on_alarm(name).await.unwrap();
        }
        due.len()
    }
}
