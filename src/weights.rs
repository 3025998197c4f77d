//! Weight rules: physical location identifier -> integer precedence.
//!
//! Rules are regular expressions matched against a provider's location
//! identifier (never against logical paths). The first matching rule wins;
//! unmatched locations weigh 0. The same table orders the providers of a
//! namespace and the duplicate locations a single provider may report for
//! one logical path.
//!
//! The table is swapped wholesale on reload, so lookups in flight always see
//! either the old or the new rule set.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use serde::Deserialize;

use crate::config::{WeightRuleConfig, WeightsConfig};
use crate::error::{ResolveError, ResolveResult};

/// Weight given to locations no rule matches.
pub const DEFAULT_WEIGHT: i64 = 0;

#[derive(Debug, Clone)]
pub struct WeightRule {
    pattern: Regex,
    weight: i64,
}

impl WeightRule {
    pub fn new(pattern: &str, weight: i64) -> ResolveResult<Self> {
        let pattern = Regex::new(pattern).map_err(|e| ResolveError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { pattern, weight })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn weight(&self) -> i64 {
        self.weight
    }

    pub fn matches(&self, location: &str) -> bool {
        self.pattern.is_match(location)
    }
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rule: Vec<WeightRuleConfig>,
}

#[derive(Debug, Default)]
pub struct WeightRegistry {
    inline: Vec<WeightRule>,
    rules_file: Option<PathBuf>,
    rules: RwLock<Arc<Vec<WeightRule>>>,
}

impl WeightRegistry {
    /// An empty registry: every location weighs [`DEFAULT_WEIGHT`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a fixed rule list and no backing file.
    pub fn with_rules(rules: Vec<WeightRule>) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules.clone())),
            inline: rules,
            rules_file: None,
        }
    }

    /// Build from configuration. Inline rules come first, file rules after.
    ///
    /// A configured rules file that does not exist yet is not an error; it is
    /// picked up on the next [`WeightRegistry::reload`].
    pub fn from_config(config: &WeightsConfig, rules_file: Option<PathBuf>) -> ResolveResult<Self> {
        let inline = config
            .rules
            .iter()
            .map(|rule| WeightRule::new(&rule.pattern, rule.weight))
            .collect::<ResolveResult<Vec<_>>>()?;

        let registry = Self {
            inline,
            rules_file,
            rules: RwLock::new(Arc::new(Vec::new())),
        };
        registry.reload()?;
        Ok(registry)
    }

    pub fn rules_file(&self) -> Option<&Path> {
        self.rules_file.as_deref()
    }

    /// Rebuild the rule table from the inline rules and the rules file.
    ///
    /// On failure the previous table stays in effect. Returns the number of
    /// rules now active.
    pub fn reload(&self) -> ResolveResult<usize> {
        let mut rules = self.inline.clone();
        if let Some(path) = &self.rules_file {
            if path.exists() {
                rules.extend(load_rules_file(path)?);
            } else {
                crate::debug_event!("weights", "rules file missing", "{}", path.display());
            }
        }

        let count = rules.len();
        *self.rules.write() = Arc::new(rules);
        crate::debug_event!("weights", "rules loaded", "{count}");
        Ok(count)
    }

    /// Weight of the first matching rule, if any rule matches.
    pub fn lookup(&self, location: &str) -> Option<i64> {
        let rules = self.rules.read().clone();
        rules
            .iter()
            .find(|rule| rule.matches(location))
            .map(WeightRule::weight)
    }

    pub fn weight_of(&self, location: &str) -> i64 {
        self.lookup(location).unwrap_or(DEFAULT_WEIGHT)
    }

    /// Total order over locations: weight descending, then canonical string
    /// ascending.
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        self.weight_of(b)
            .cmp(&self.weight_of(a))
            .then_with(|| a.cmp(b))
    }

    /// Sort candidate locations for one logical path into precedence order.
    pub fn sort_locations(&self, locations: &mut [String]) {
        let rules = self.rules.read().clone();
        let weight = |location: &str| {
            rules
                .iter()
                .find(|rule| rule.matches(location))
                .map_or(DEFAULT_WEIGHT, WeightRule::weight)
        };
        locations.sort_by(|a, b| weight(b).cmp(&weight(a)).then_with(|| a.cmp(b)));
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }
}

/// Parse a TOML rules file with `[[rule]]` tables.
pub fn load_rules_file(path: &Path) -> ResolveResult<Vec<WeightRule>> {
    let content = std::fs::read_to_string(path).map_err(|e| ResolveError::WeightRules {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let parsed: RulesFile = toml::from_str(&content).map_err(|e| ResolveError::WeightRules {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    parsed
        .rule
        .iter()
        .map(|rule| {
            WeightRule::new(&rule.pattern, rule.weight).map_err(|e| ResolveError::WeightRules {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        })
        .collect()
}
