//! In-process declarative rule engine.
//!
//! Holds the active rule set behind an `ArcSwap` so evaluation never waits on
//! an update. Updates are serialized and applied all-or-nothing.

use crate::engine::rules::{ResourceType, Rule, RuleAction, RuleUpdate};
use crate::engine::RuleEngine;
use crate::error::RuleEngineError;
use arc_swap::ArcSwap;
use regex::{Regex, RegexBuilder};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

struct CompiledRule {
    rule: Rule,
    filter: Regex,
}

pub struct InMemoryRuleEngine {
    rules: ArcSwap<Vec<Arc<CompiledRule>>>,
    write_lock: Mutex<()>,
    max_rules: usize,
}

impl InMemoryRuleEngine {
    pub fn new(max_rules: usize) -> Self {
        Self {
            rules: ArcSwap::from_pointee(Vec::new()),
            write_lock: Mutex::new(()),
            max_rules,
        }
    }

    pub fn len(&self) -> usize {
        self.rules.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The rule that would act on a request for `url`, if any.
    ///
    /// The highest priority wins; on equal priority a block beats a redirect.
    pub fn evaluate(&self, url: &str, resource_type: ResourceType) -> Option<Rule> {
        let rules = self.rules.load();
        rules
            .iter()
            .filter(|c| c.rule.condition.resource_types.contains(&resource_type))
            .filter(|c| c.filter.is_match(url))
            .max_by_key(|c| (c.rule.priority, matches!(c.rule.action, RuleAction::Block)))
            .map(|c| c.rule.clone())
    }
}

#[async_trait::async_trait]
impl RuleEngine for InMemoryRuleEngine {
    async fn list_current_rules(&self) -> Result<Vec<Rule>, RuleEngineError> {
        Ok(self.rules.load().iter().map(|c| c.rule.clone()).collect())
    }

    async fn update_rules(&self, update: RuleUpdate) -> Result<(), RuleEngineError> {
        let _guard = self.write_lock.lock().await;
        let current = self.rules.load_full();

        let removed: FxHashSet<u32> = update.remove_rule_ids.iter().copied().collect();
        let mut next: FxHashMap<u32, Arc<CompiledRule>> = current
            .iter()
            .filter(|c| !removed.contains(&c.rule.id))
            .map(|c| (c.rule.id, c.clone()))
            .collect();

        let mut seen = FxHashSet::default();
        for rule in update.add_rules {
            if !seen.insert(rule.id) {
                return Err(RuleEngineError::DuplicateId(rule.id));
            }
            if next.contains_key(&rule.id) {
                return Err(RuleEngineError::IdInUse(rule.id));
            }
            let compiled = compile(rule)?;
            next.insert(compiled.rule.id, Arc::new(compiled));
        }

        if next.len() > self.max_rules {
            return Err(RuleEngineError::TooManyRules {
                count: next.len(),
                max: self.max_rules,
            });
        }

        let mut rules: Vec<Arc<CompiledRule>> = next.into_values().collect();
        rules.sort_by_key(|c| c.rule.id);
        debug!(count = rules.len(), "Rule set swapped");
        self.rules.store(Arc::new(rules));
        Ok(())
    }
}

fn compile(rule: Rule) -> Result<CompiledRule, RuleEngineError> {
    let invalid = |reason: &str| RuleEngineError::InvalidRule {
        id: rule.id,
        reason: reason.to_string(),
    };

    if rule.id == 0 {
        return Err(invalid("id must be at least 1"));
    }
    if rule.priority == 0 {
        return Err(invalid("priority must be at least 1"));
    }
    let filter = &rule.condition.url_filter;
    if filter.is_empty() || !filter.is_ascii() {
        return Err(invalid("urlFilter must be non-empty ASCII"));
    }
    if rule.condition.resource_types.is_empty() {
        return Err(invalid("resourceTypes must not be empty"));
    }
    if let RuleAction::Redirect { redirect_url } = &rule.action {
        let ok = Url::parse(redirect_url)
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false);
        if !ok {
            return Err(invalid("redirectUrl must be an absolute http(s) URL"));
        }
    }

    let filter = filter_to_regex(filter).map_err(|e| invalid(&e.to_string()))?;
    Ok(CompiledRule { rule, filter })
}

/// Translates a urlFilter into a case-insensitive regex.
///
/// `||` anchors at a domain boundary, a leading or trailing `|` anchors at the
/// start or end of the URL, `*` matches anything and `^` matches a separator
/// character or the end of the URL.
fn filter_to_regex(filter: &str) -> Result<Regex, regex::Error> {
    let mut body = filter;
    let mut pattern = String::with_capacity(filter.len() * 2);

    if let Some(rest) = body.strip_prefix("||") {
        pattern.push_str(r"^[a-z][a-z0-9+.\-]*://(?:[^/?#]*\.)?");
        body = rest;
    } else if let Some(rest) = body.strip_prefix('|') {
        pattern.push('^');
        body = rest;
    }

    let anchored_end = body.ends_with('|');
    if anchored_end {
        body = &body[..body.len() - 1];
    }

    for ch in body.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '^' => pattern.push_str(r"(?:[^a-zA-Z0-9_.%\-]|$)"),
            c => pattern.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
        }
    }
    if anchored_end {
        pattern.push('$');
    }

    RegexBuilder::new(&pattern).case_insensitive(true).build()
}
