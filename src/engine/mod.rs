pub mod ledger;
mod manager;
pub mod matcher;
pub mod rules;
pub mod state;
pub mod streak;
mod traits;

pub use ledger::{RecordOutcome, VisitLedger};
pub use manager::{RebuildOutcome, RuleSynchronizer};
pub use matcher::{regex_error, PatternMatcher};
pub use rules::{Rule, RuleAction, RulePolicy, RuleUpdate};
pub use state::Allowances;
pub use streak::StreakPolicy;
pub use traits::{RuleEngine, UrlMatcher};
