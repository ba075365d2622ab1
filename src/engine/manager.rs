use super::rules::{synthesize, RulePolicy};
use super::traits::RuleEngine;
use crate::clock::Clock;
use crate::error::StoreError;
use crate::stats::StatsCollector;
use crate::store::Repository;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of one rebuild pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    Applied { removed: usize, added: usize },
    /// The engine rejected the update; its previous rules stay in place.
    Rejected,
}

/// Rebuilds the engine's rule set from persisted state.
pub struct RuleSynchronizer {
    repo: Repository,
    engine: Arc<dyn RuleEngine>,
    clock: Arc<dyn Clock>,
    stats: Arc<StatsCollector>,
    policy: RulePolicy,
}

impl RuleSynchronizer {
    pub fn new(
        repo: Repository,
        engine: Arc<dyn RuleEngine>,
        clock: Arc<dyn Clock>,
        stats: Arc<StatsCollector>,
        policy: RulePolicy,
    ) -> Self {
        Self {
            repo,
            engine,
            clock,
            stats,
            policy,
        }
    }

    /// Reads sites and allowances, then replaces every rule this system owns.
    ///
    /// Engine failures are logged and counted, never returned; only store
    /// failures propagate.
    pub async fn rebuild(&self) -> Result<RebuildOutcome, StoreError> {
        let sites = self.repo.tracked_sites().await?;
        let allowances = self.repo.allowances().await?;

        let existing_ids: Vec<u32> = match self.engine.list_current_rules().await {
            Ok(rules) => rules.iter().map(|r| r.id).collect(),
            Err(e) => {
                warn!("Could not list current rules, removing known ids only: {}", e);
                Vec::new()
            }
        };

        let update = synthesize(
            &sites,
            &allowances,
            &existing_ids,
            self.clock.now_ms(),
            &self.policy,
        );
        let removed = update.remove_rule_ids.len();
        let added = update.add_rules.len();
        debug!(removed, added, "Applying rule update");

        self.stats.inc_rule_rebuilds();
        match self.engine.update_rules(update).await {
            Ok(()) => {
                info!("Rules rebuilt: {} active, {} ids cleared", added, removed);
                Ok(RebuildOutcome::Applied { removed, added })
            }
            Err(e) => {
                self.stats.inc_rule_failures();
                error!("Rule update rejected: {}", e);
                Ok(RebuildOutcome::Rejected)
            }
        }
    }
}
