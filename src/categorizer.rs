// 🧭 Categorizer - rules first, then the model, then Uncategorized
//
// Decision order, first hit wins:
//   1-3. rules on merchant, description, "merchant description"
//   4-6. model on merchant, description, "merchant description"
//   7.   the "Uncategorized" category, if it exists
//
// Rules whose category no longer exists are dropped when the engine is
// built, and model predictions of deleted categories count as no-match.
// The engine is built on first use and kept for the categorizer's lifetime,
// so rule edits show up in the next categorizer, not the current one.

use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::fmt;
use tracing::debug;

use crate::entities::UNCATEGORIZED;
use crate::error::Result;
use crate::ml::{ModelStore, Prediction, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::normalizer::normalize_opt;
use crate::rules::RuleEngine;
use crate::storage::CategorizationStore;

/// Which layer produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Rule,
    Model,
    Fallback,
    None,
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionSource::Rule => "rule",
            DecisionSource::Model => "model",
            DecisionSource::Fallback => "fallback",
            DecisionSource::None => "none",
        };
        write!(f, "{}", s)
    }
}

/// A decision with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Categorization {
    pub category_id: Option<i64>,
    pub confidence: f64,
    pub source: DecisionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<i64>,
}

impl Categorization {
    fn none() -> Self {
        Categorization {
            category_id: None,
            confidence: 0.0,
            source: DecisionSource::None,
            rule_id: None,
        }
    }
}

/// Normalized merchant, description, and the two joined; empty ones omitted
struct TextVariants {
    texts: Vec<String>,
}

impl TextVariants {
    fn new(merchant: Option<&str>, description: Option<&str>) -> Self {
        let merchant = normalize_opt(merchant);
        let description = normalize_opt(description);

        let combined = match (&merchant, &description) {
            (Some(m), Some(d)) => Some(format!("{} {}", m, d)),
            _ => None,
        };

        let texts = [merchant, description, combined]
            .into_iter()
            .flatten()
            .collect();
        TextVariants { texts }
    }

    fn iter(&self) -> impl Iterator<Item = &str> {
        self.texts.iter().map(String::as_str)
    }

    fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

pub struct Categorizer<'a, S: CategorizationStore + ?Sized> {
    store: &'a S,
    models: &'a ModelStore,
    threshold: f64,
    rules: OnceCell<RuleEngine>,
}

impl<'a, S: CategorizationStore + ?Sized> Categorizer<'a, S> {
    pub fn new(store: &'a S, models: &'a ModelStore) -> Self {
        Categorizer {
            store,
            models,
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            rules: OnceCell::new(),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Rule engine over the rules whose target category still exists
    pub fn rule_engine(&self) -> Result<&RuleEngine> {
        if let Some(engine) = self.rules.get() {
            return Ok(engine);
        }

        let mut live = Vec::new();
        for rule in self.store.list_categorization_rules()? {
            if self.store.get_category_by_id(rule.category_id)?.is_some() {
                live.push(rule);
            } else {
                debug!(
                    "Skipping rule {} ({:?}): category {} no longer exists",
                    rule.id, rule.pattern, rule.category_id
                );
            }
        }
        Ok(self.rules.get_or_init(|| RuleEngine::from_rules(live)))
    }

    pub fn categorize(&self, merchant: Option<&str>, description: Option<&str>) -> Result<Option<i64>> {
        Ok(self.categorize_with_confidence(merchant, description)?.category_id)
    }

    pub fn categorize_with_confidence(
        &self,
        merchant: Option<&str>,
        description: Option<&str>,
    ) -> Result<Categorization> {
        let variants = TextVariants::new(merchant, description);

        if !variants.is_empty() {
            let engine = self.rule_engine()?;
            for text in variants.iter() {
                if let Some(rule) = engine.find_match(text) {
                    return Ok(Categorization {
                        category_id: Some(rule.category_id),
                        confidence: 1.0,
                        source: DecisionSource::Rule,
                        rule_id: Some(rule.id),
                    });
                }
            }

            let prediction = self.predict_variants(&variants, self.threshold)?;
            if let Some(category_id) = prediction.category_id {
                return Ok(Categorization {
                    category_id: Some(category_id),
                    confidence: prediction.confidence,
                    source: DecisionSource::Model,
                    rule_id: None,
                });
            }
        }

        match self.store.get_category_by_name(UNCATEGORIZED)? {
            Some(category) => Ok(Categorization {
                category_id: Some(category.id),
                confidence: 0.0,
                source: DecisionSource::Fallback,
                rule_id: None,
            }),
            None => Ok(Categorization::none()),
        }
    }

    /// Model-only prediction over the same text variants, no rules and no
    /// fallback. No usable text gives `Prediction::none()`.
    pub fn predict(
        &self,
        merchant: Option<&str>,
        description: Option<&str>,
        threshold: Option<f64>,
    ) -> Result<Prediction> {
        let variants = TextVariants::new(merchant, description);
        if variants.is_empty() {
            return Ok(Prediction::none());
        }
        self.predict_variants(&variants, threshold.unwrap_or(self.threshold))
    }

    fn predict_variants(&self, variants: &TextVariants, threshold: f64) -> Result<Prediction> {
        let predictor = self.models.current();
        if !predictor.is_trained() {
            return Ok(Prediction::none());
        }
        for text in variants.iter() {
            let prediction = predictor.predict(text, threshold);
            if let Some(category_id) = prediction.category_id {
                if self.store.get_category_by_id(category_id)?.is_some() {
                    return Ok(prediction);
                }
                debug!("Model predicted deleted category {}", category_id);
            }
        }
        Ok(Prediction::none())
    }
}
