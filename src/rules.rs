// 🏷️ Categorization Rules - Rules as Data
// User-authored pattern → category mappings, evaluated before the model

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::CategorizerError;

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Whole text equals the pattern
    Exact,
    /// Pattern appears somewhere in the text
    Contains,
    /// Case-insensitive regular expression, searched (not anchored)
    Regex,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Contains => "contains",
            MatchType::Regex => "regex",
        }
    }
}

impl Default for MatchType {
    fn default() -> Self {
        MatchType::Contains
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchType {
    type Err = CategorizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exact" => Ok(MatchType::Exact),
            "contains" => Ok(MatchType::Contains),
            "regex" => Ok(MatchType::Regex),
            other => Err(CategorizerError::InvalidInput(format!(
                "unknown match type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizationRule {
    pub id: i64,

    /// Pattern to match against normalized text
    pub pattern: String,

    #[serde(default)]
    pub match_type: MatchType,

    /// Category assigned on match
    pub category_id: i64,

    /// Priority (higher = evaluated first)
    #[serde(default)]
    pub priority: i32,
}

impl CategorizationRule {
    pub fn new(
        id: i64,
        pattern: impl Into<String>,
        match_type: MatchType,
        category_id: i64,
        priority: i32,
    ) -> Self {
        CategorizationRule {
            id,
            pattern: pattern.into(),
            match_type,
            category_id,
            priority,
        }
    }
}

// ============================================================================
// COMPILED RULE
// ============================================================================

enum Matcher {
    Exact(String),
    Contains(String),
    Regex(Regex),
    /// Regex that failed to compile; never matches
    Invalid,
}

struct CompiledRule {
    rule: CategorizationRule,
    matcher: Matcher,
}

impl CompiledRule {
    fn compile(rule: CategorizationRule) -> Self {
        let pattern = rule.pattern.to_lowercase();
        let matcher = match rule.match_type {
            MatchType::Exact => Matcher::Exact(pattern),
            MatchType::Contains => Matcher::Contains(pattern),
            MatchType::Regex => match RegexBuilder::new(&rule.pattern)
                .case_insensitive(true)
                .build()
            {
                Ok(re) => Matcher::Regex(re),
                Err(e) => {
                    warn!(
                        rule_id = rule.id,
                        pattern = %rule.pattern,
                        error = %e,
                        "skipping rule with malformed regex"
                    );
                    Matcher::Invalid
                }
            },
        };
        CompiledRule { rule, matcher }
    }

    fn matches(&self, text: &str) -> bool {
        match &self.matcher {
            Matcher::Exact(pattern) => text == pattern,
            Matcher::Contains(pattern) => text.contains(pattern.as_str()),
            Matcher::Regex(re) => re.is_match(text),
            Matcher::Invalid => false,
        }
    }
}

// ============================================================================
// RULE ENGINE
// ============================================================================

/// Ordered rule set. Higher priority first; equal priorities keep the order
/// they were supplied in.
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
}

impl RuleEngine {
    /// Create a new empty rule engine
    pub fn new() -> Self {
        RuleEngine { rules: Vec::new() }
    }

    /// Create engine from a list of rules
    pub fn from_rules(rules: Vec<CategorizationRule>) -> Self {
        let mut engine = RuleEngine {
            rules: rules.into_iter().map(CompiledRule::compile).collect(),
        };
        engine.sort();
        engine
    }

    /// Add a single rule after any existing rules of the same priority
    pub fn add_rule(&mut self, rule: CategorizationRule) {
        self.rules.push(CompiledRule::compile(rule));
        self.sort();
    }

    // Stable sort keeps insertion order for ties
    fn sort(&mut self) {
        self.rules
            .sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));
    }

    /// First matching rule for already-normalized text
    pub fn find_match(&self, normalized_text: &str) -> Option<&CategorizationRule> {
        if normalized_text.is_empty() {
            return None;
        }
        self.rules
            .iter()
            .find(|compiled| compiled.matches(normalized_text))
            .map(|compiled| &compiled.rule)
    }

    /// Category of the first matching rule
    pub fn match_category(&self, normalized_text: &str) -> Option<i64> {
        self.find_match(normalized_text).map(|rule| rule.category_id)
    }

    /// Get number of rules loaded
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> impl Iterator<Item = &CategorizationRule> {
        self.rules.iter().map(|compiled| &compiled.rule)
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot match over an ordered rule slice
pub fn match_rules(normalized_text: &str, rules: &[CategorizationRule]) -> Option<i64> {
    RuleEngine::from_rules(rules.to_vec()).match_category(normalized_text)
}

// ============================================================================
// TESTS
// ============================================================================
