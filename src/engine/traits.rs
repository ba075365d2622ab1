use super::rules::{Rule, RuleUpdate};
use crate::error::RuleEngineError;

/// The "Hot Path" check run for every navigation.
pub trait UrlMatcher: Send + Sync {
    /// Ids of every tracked site whose pattern matches `url`, in site order.
    fn matching_sites(&self, url: &str) -> Vec<String>;
}

/// The declarative rule engine that enforces block/redirect rules before a
/// navigation proceeds. The synthesizer owns its whole rule set.
#[async_trait::async_trait]
pub trait RuleEngine: Send + Sync {
    async fn list_current_rules(&self) -> Result<Vec<Rule>, RuleEngineError>;

    /// Applies removals first, then additions, as a single atomic change.
    async fn update_rules(&self, update: RuleUpdate) -> Result<(), RuleEngineError>;
}
