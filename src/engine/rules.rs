//! Enforcement rule synthesis.
//!
//! Rule ids are a pure function of the site id and the rule kind:
//!
//! ```text
//! hash(site_id)      = fold over UTF-16 units: h = h * 31 + unit  (wrapping u32)
//! block id           = hash % RULE_ID_MODULUS + 1                  in [1, 1e9]
//! redirect id        = block id + REDIRECT_ID_OFFSET               in [1e9 + 1, 2e9]
//! ```
//!
//! Both ranges fit in a positive `i32`, and they never overlap, so a block id
//! can never equal a redirect id. Two different site ids can still hash to the
//! same slot; within one synthesis pass the later site probes forward to the
//! next free id of the same kind.

use super::state::Allowances;
use crate::model::{BlockMode, TrackedSite};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;
use url::Url;

pub const RULE_ID_MODULUS: u32 = 1_000_000_000;
pub const REDIRECT_ID_OFFSET: u32 = RULE_ID_MODULUS;

/// Characters the engine's `urlFilter` syntax reads as anchors or wildcards.
const FILTER_OPERATORS: [char; 3] = ['|', '*', '^'];

/// True when a plain pattern would change meaning inside a `urlFilter`.
pub fn has_filter_operators(pattern: &str) -> bool {
    pattern.contains(FILTER_OPERATORS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    Block,
    Redirect,
}

impl RuleKind {
    fn offset(self) -> u32 {
        match self {
            RuleKind::Block => 0,
            RuleKind::Redirect => REDIRECT_ID_OFFSET,
        }
    }
}

pub fn site_hash(site_id: &str) -> u32 {
    site_id
        .encode_utf16()
        .fold(0u32, |h, unit| h.wrapping_mul(31).wrapping_add(u32::from(unit)))
}

/// The preferred rule id for a site and rule kind.
pub fn rule_id(site_id: &str, kind: RuleKind) -> u32 {
    site_hash(site_id) % RULE_ID_MODULUS + 1 + kind.offset()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
    SubFrame,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuleAction {
    Block,
    Redirect {
        #[serde(rename = "redirectUrl")]
        redirect_url: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    pub url_filter: String,
    pub resource_types: Vec<ResourceType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: u32,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

/// One atomic change to the engine's rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    pub remove_rule_ids: Vec<u32>,
    pub add_rules: Vec<Rule>,
}

/// Priorities and fallback target used when building rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulePolicy {
    pub fallback_redirect_url: String,
    pub block_priority: u32,
    pub redirect_priority: u32,
}

impl Default for RulePolicy {
    fn default() -> Self {
        Self {
            fallback_redirect_url: "http://127.0.0.1:8787/blocked".to_string(),
            block_priority: 1,
            redirect_priority: 100,
        }
    }
}

struct IdAllocator {
    taken: FxHashSet<u32>,
}

impl IdAllocator {
    fn new() -> Self {
        Self {
            taken: FxHashSet::default(),
        }
    }

    fn claim(&mut self, site_id: &str, kind: RuleKind) -> u32 {
        let preferred = rule_id(site_id, kind);
        let mut id = preferred;
        while !self.taken.insert(id) {
            let slot = id - kind.offset();
            id = kind.offset() + slot % RULE_ID_MODULUS + 1;
        }
        if id != preferred {
            warn!(site = %site_id, preferred, assigned = id, "Rule id collision, probing");
        }
        id
    }
}

/// The filter the engine should match for a site, or `None` when the site
/// cannot be expressed as an engine rule.
pub fn url_filter_for(site: &TrackedSite) -> Option<String> {
    if site.is_regex {
        return None;
    }
    let pattern = site.pattern.trim();
    if pattern.is_empty() {
        return None;
    }
    if !pattern.is_ascii() {
        warn!(site = %site.id, "Pattern is not ASCII, skipping enforcement rule");
        return None;
    }
    if has_filter_operators(pattern) {
        warn!(site = %site.id, pattern, "Pattern contains filter operators, skipping enforcement rule");
        return None;
    }
    Some(pattern.to_string())
}

/// Custom redirect target if it is a well-formed http(s) URL, else `fallback`.
pub fn redirect_target(site: &TrackedSite, fallback: &str) -> String {
    site.custom_redirect()
        .filter(|target| {
            let lowered = target.to_ascii_lowercase();
            (lowered.starts_with("http://") || lowered.starts_with("https://"))
                && Url::parse(target).is_ok()
        })
        .unwrap_or(fallback)
        .to_string()
}

/// Computes the full replacement of the engine's rule set.
///
/// `existing_ids` are the ids the engine currently holds; all of them are
/// removed along with both potential ids of every site, so rules left behind
/// by earlier runs cannot survive.
pub fn synthesize(
    sites: &[TrackedSite],
    allowances: &Allowances,
    existing_ids: &[u32],
    now_ms: i64,
    policy: &RulePolicy,
) -> RuleUpdate {
    let mut remove: BTreeSet<u32> = existing_ids.iter().copied().collect();
    let mut add_rules = Vec::new();
    let mut ids = IdAllocator::new();

    for site in sites {
        remove.insert(rule_id(&site.id, RuleKind::Block));
        remove.insert(rule_id(&site.id, RuleKind::Redirect));

        let Some(filter) = url_filter_for(site) else {
            continue;
        };
        if allowances.is_allowed(&site.id, now_ms) {
            continue;
        }

        let (kind, priority, action) = match site.block_mode {
            BlockMode::Off => continue,
            BlockMode::Block => (RuleKind::Block, policy.block_priority, RuleAction::Block),
            BlockMode::Redirect => (
                RuleKind::Redirect,
                policy.redirect_priority,
                RuleAction::Redirect {
                    redirect_url: redirect_target(site, &policy.fallback_redirect_url),
                },
            ),
        };

        let id = ids.claim(&site.id, kind);
        remove.insert(id);
        add_rules.push(Rule {
            id,
            priority,
            action,
            condition: RuleCondition {
                url_filter: filter,
                resource_types: vec![ResourceType::MainFrame],
            },
        });
    }

    RuleUpdate {
        remove_rule_ids: remove.into_iter().collect(),
        add_rules,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn site(id: &str, pattern: &str, mode: BlockMode) -> TrackedSite {
        let mut site = TrackedSite::new(id, id, pattern, Utc::now());
        site.block_mode = mode;
        site
    }

    #[test]
    fn test_hash_matches_string_hash_code() {
        assert_eq!(site_hash(""), 0);
        assert_eq!(site_hash("a"), 97);
        assert_eq!(site_hash("yt"), 121 * 31 + 116);
        // Classic hash collision pair
        assert_eq!(site_hash("Aa"), site_hash("BB"));
    }

    #[test]
    fn test_rule_ids_are_positive_and_disjoint() {
        for id in ["", "yt", "nf", "site_1700000000000_abc123", "ユーチューブ"] {
            let block = rule_id(id, RuleKind::Block);
            let redirect = rule_id(id, RuleKind::Redirect);
            assert!(block >= 1 && block <= RULE_ID_MODULUS);
            assert!(redirect > RULE_ID_MODULUS && redirect <= 2 * RULE_ID_MODULUS);
            assert!(redirect <= i32::MAX as u32);
        }
    }

    #[test]
    fn test_block_site_removes_redirect_id() {
        let sites = vec![site("yt", "youtube.com", BlockMode::Block)];
        let update = synthesize(&sites, &Allowances::default(), &[], 0, &RulePolicy::default());

        assert_eq!(update.add_rules.len(), 1);
        let rule = &update.add_rules[0];
        assert_eq!(rule.id, rule_id("yt", RuleKind::Block));
        assert_eq!(rule.action, RuleAction::Block);
        assert_eq!(rule.condition.url_filter, "youtube.com");
        assert_eq!(rule.condition.resource_types, vec![ResourceType::MainFrame]);
        assert!(update.remove_rule_ids.contains(&rule_id("yt", RuleKind::Redirect)));
    }

    #[test]
    fn test_redirect_outranks_block() {
        let mut redirect = site("nf", "netflix.com", BlockMode::Redirect);
        redirect.redirect_url = Some("https://example.org/focus".to_string());
        let sites = vec![site("yt", "youtube.com", BlockMode::Block), redirect];
        let update = synthesize(&sites, &Allowances::default(), &[], 0, &RulePolicy::default());

        let max_block = update
            .add_rules
            .iter()
            .filter(|r| r.action == RuleAction::Block)
            .map(|r| r.priority)
            .max()
            .unwrap();
        let redirect_rule = update
            .add_rules
            .iter()
            .find(|r| matches!(r.action, RuleAction::Redirect { .. }))
            .unwrap();
        assert!(redirect_rule.priority > max_block);
        assert_eq!(
            redirect_rule.action,
            RuleAction::Redirect {
                redirect_url: "https://example.org/focus".to_string()
            }
        );
        assert!(update.remove_rule_ids.contains(&rule_id("nf", RuleKind::Block)));
    }

    #[test]
    fn test_invalid_custom_redirect_falls_back() {
        let policy = RulePolicy::default();
        for target in ["ftp://example.org", "example.org", "https://", "  "] {
            let mut s = site("nf", "netflix.com", BlockMode::Redirect);
            s.redirect_url = Some(target.to_string());
            assert_eq!(redirect_target(&s, &policy.fallback_redirect_url), policy.fallback_redirect_url);
        }
        let mut s = site("nf", "netflix.com", BlockMode::Redirect);
        s.redirect_url = Some(" HTTPS://Example.org ".to_string());
        assert_eq!(redirect_target(&s, "x"), "HTTPS://Example.org");
    }

    #[test]
    fn test_regex_and_off_sites_only_remove() {
        let mut regex_site = site("rx", r"reddit\.com", BlockMode::Block);
        regex_site.is_regex = true;
        let sites = vec![regex_site, site("off", "off.com", BlockMode::Off)];
        let update = synthesize(&sites, &Allowances::default(), &[], 0, &RulePolicy::default());

        assert!(update.add_rules.is_empty());
        for id in ["rx", "off"] {
            assert!(update.remove_rule_ids.contains(&rule_id(id, RuleKind::Block)));
            assert!(update.remove_rule_ids.contains(&rule_id(id, RuleKind::Redirect)));
        }
    }

    #[test]
    fn test_live_allowance_suspends_rule() {
        let sites = vec![site("yt", "youtube.com", BlockMode::Block)];
        let mut allowances = Allowances::default();
        allowances.grant("yt", 10_000);
        let policy = RulePolicy::default();

        let during = synthesize(&sites, &allowances, &[], 9_999, &policy);
        assert!(during.add_rules.is_empty());
        assert!(during.remove_rule_ids.contains(&rule_id("yt", RuleKind::Block)));

        let after = synthesize(&sites, &allowances, &[], 10_000, &policy);
        assert_eq!(after.add_rules.len(), 1);
    }

    #[test]
    fn test_operator_patterns_produce_no_rule() {
        for pattern in ["|", "||reddit.com", "you*tube.com", "youtube.com^"] {
            let sites = vec![site("op", pattern, BlockMode::Block)];
            let update = synthesize(&sites, &Allowances::default(), &[], 0, &RulePolicy::default());

            assert!(update.add_rules.is_empty(), "pattern {pattern:?} produced a rule");
            assert!(update.remove_rule_ids.contains(&rule_id("op", RuleKind::Block)));
            assert!(update.remove_rule_ids.contains(&rule_id("op", RuleKind::Redirect)));
        }
        assert!(!has_filter_operators("youtube.com/shorts"));
    }

    #[test]
    fn test_existing_rules_are_removed() {
        let update = synthesize(&[], &Allowances::default(), &[7, 3, 7], 0, &RulePolicy::default());
        assert_eq!(update.remove_rule_ids, vec![3, 7]);
        assert!(update.add_rules.is_empty());
    }

    #[test]
    fn test_colliding_sites_get_distinct_ids() {
        let sites = vec![
            site("Aa", "a.com", BlockMode::Redirect),
            site("BB", "b.com", BlockMode::Redirect),
        ];
        let update = synthesize(&sites, &Allowances::default(), &[], 0, &RulePolicy::default());

        assert_eq!(update.add_rules.len(), 2);
        let first = update.add_rules[0].id;
        let second = update.add_rules[1].id;
        assert_ne!(first, second);
        assert_eq!(first, rule_id("Aa", RuleKind::Redirect));
        assert_eq!(second, first + 1);
        // Every added id is also queued for removal so the update can be replayed
        assert!(update.remove_rule_ids.contains(&second));
    }
}
