// 🏷️ Classification Rules - Rules as Data
// Ordered keyword rules over the message body, first match wins

use crate::error::EtlError;
use crate::normalizer::NormalizedRecord;
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// CATEGORY LABELS
// ============================================================================

/// Fixed label set. `Other` is the reserved fallback and never a rule target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Payment,
    Transfer,
    Deposit,
    Withdrawal,
    Airtime,
    Balance,
    Other,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Payment,
        Category::Transfer,
        Category::Deposit,
        Category::Withdrawal,
        Category::Airtime,
        Category::Balance,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Payment => "Payment",
            Category::Transfer => "Transfer",
            Category::Deposit => "Deposit",
            Category::Withdrawal => "Withdrawal",
            Category::Airtime => "Airtime",
            Category::Balance => "Balance",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown category `{0}`")]
pub struct ParseCategoryError(pub String);

impl FromStr for Category {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| ParseCategoryError(s.to_string()))
    }
}

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    /// Label assigned when any pattern matches
    pub label: Category,

    /// Keywords; `*` splits a pattern into segments that must appear in order
    pub patterns: Vec<String>,
}

impl CategoryRule {
    pub fn new(label: Category, patterns: &[&str]) -> Self {
        CategoryRule {
            label,
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Check if any pattern matches the (already lowercased) text
    pub fn matches(&self, text_lower: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| pattern_matches(&pattern.to_lowercase(), text_lower))
    }
}

/// Every `*`-separated segment must occur in order; the first one at a word start
fn pattern_matches(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').filter(|p| !p.is_empty()).collect();

    let Some((first, rest)) = parts.split_first() else {
        return false;
    };

    let mut current_pos = match find_at_word_start(text, first) {
        Some(pos) => pos + first.len(),
        None => return false,
    };

    for part in rest {
        match text[current_pos..].find(part) {
            Some(pos) => current_pos += pos + part.len(),
            None => return false,
        }
    }

    true
}

fn find_at_word_start(text: &str, needle: &str) -> Option<usize> {
    text.match_indices(needle).map(|(pos, _)| pos).find(|&pos| {
        text[..pos]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric())
    })
}

/// Default rule order. Changing it changes classification outcomes.
pub fn default_rules() -> Vec<CategoryRule> {
    vec![
        CategoryRule::new(Category::Payment, &["received", "payment", "paid"]),
        CategoryRule::new(Category::Transfer, &["transferred", "transfer", "sent"]),
        CategoryRule::new(Category::Withdrawal, &["withdrawn", "withdrawal"]),
        CategoryRule::new(Category::Deposit, &["deposit", "deposited"]),
        CategoryRule::new(Category::Airtime, &["airtime", "bundle"]),
        CategoryRule::new(Category::Balance, &["balance"]),
    ]
}

// ============================================================================
// CATEGORIZED RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorizedRecord {
    #[serde(flatten)]
    pub record: NormalizedRecord,
    pub category: Category,
}

// ============================================================================
// CATEGORIZER
// ============================================================================

#[derive(Debug, Clone)]
pub struct Categorizer {
    rules: Vec<CategoryRule>,
}

impl Categorizer {
    /// Build from an ordered rule list; rule order is kept as given
    pub fn from_rules(rules: Vec<CategoryRule>) -> std::result::Result<Self, EtlError> {
        Self::validate_rules(&rules)?;
        Ok(Categorizer { rules })
    }

    /// Load rules from a JSON array; file order is rule order
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let rules = Self::read_rules_file(path)?;
        Ok(Self::from_rules(rules)?)
    }

    pub fn read_rules_file<P: AsRef<Path>>(path: P) -> Result<Vec<CategoryRule>> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read rules file: {:?}", path.as_ref()))?;

        serde_json::from_str(&content).context("Failed to parse rules JSON")
    }

    pub fn validate_rules(rules: &[CategoryRule]) -> std::result::Result<(), EtlError> {
        for (index, rule) in rules.iter().enumerate() {
            if rule.label == Category::Other {
                return Err(EtlError::Config(format!(
                    "rule {} targets the reserved fallback label Other",
                    index
                )));
            }
            if rule.patterns.iter().all(|p| p.trim_matches('*').trim().is_empty()) {
                return Err(EtlError::Config(format!(
                    "rule {} ({}) has no usable pattern",
                    index, rule.label
                )));
            }
        }
        Ok(())
    }

    /// Label for a message body
    pub fn classify(&self, body: &str) -> Category {
        let body_lower = body.to_lowercase();

        self.rules
            .iter()
            .find(|rule| rule.matches(&body_lower))
            .map(|rule| rule.label)
            .unwrap_or(Category::Other)
    }

    pub fn categorize(&self, record: NormalizedRecord) -> CategorizedRecord {
        let category = self.classify(&record.body);
        CategorizedRecord { record, category }
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }
}

// ============================================================================
// TESTS
// ============================================================================
