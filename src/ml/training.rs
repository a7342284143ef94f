// 🎓 Training pipeline
//
// assemble_training_data: lexicon + labelled transactions → (text, category)
// fit_model: filter → label mapping → stratified split → TF-IDF → forest →
// held-out evaluation. Nothing here touches disk or the live model.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use super::forest::{ForestParams, RandomForest};
use super::lexicon::Lexicon;
use super::metrics::{accuracy, classification_report, ClassificationReport};
use super::model::{LabelMapping, TrainedModel};
use super::rng::SeededRng;
use super::split::stratified_split;
use super::vectorizer::TfidfVectorizer;
use crate::error::CategorizerError;
use crate::normalizer::normalize;
use crate::storage::CategorizationStore;

/// Hyper-parameters for a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingOptions {
    /// Categories with fewer examples are dropped before splitting
    pub min_samples_per_category: usize,
    pub min_total_samples: usize,
    pub test_fraction: f64,
    pub seed: u64,
    pub max_features: usize,
    pub ngram_range: (usize, usize),
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        TrainingOptions {
            min_samples_per_category: 2,
            min_total_samples: 10,
            test_fraction: 0.2,
            seed: 42,
            max_features: 2000,
            ngram_range: (1, 3),
            n_trees: 200,
            max_depth: 30,
            min_samples_leaf: 1,
        }
    }
}

/// Normalized texts with their category ids, plus the names of those
/// categories at assembly time (for the evaluation report)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingData {
    pub texts: Vec<String>,
    pub labels: Vec<i64>,
    pub category_names: BTreeMap<i64, String>,
}

impl TrainingData {
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Adds one example unless it normalizes to nothing
    pub fn push(&mut self, raw: &str, category_id: i64) {
        let text = normalize(raw);
        if !text.is_empty() {
            self.texts.push(text);
            self.labels.push(category_id);
        }
    }
}

/// Outcome of `ModelStore::train`; failures are values, not errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ClassificationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TrainingResult {
    pub fn succeeded(evaluation: &Evaluation) -> Self {
        TrainingResult {
            success: true,
            accuracy: Some((evaluation.accuracy * 10_000.0).round() / 10_000.0),
            sample_count: Some(evaluation.sample_count),
            category_count: Some(evaluation.category_count),
            report: Some(evaluation.report.clone()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        TrainingResult {
            success: false,
            accuracy: None,
            sample_count: None,
            category_count: None,
            report: None,
            error: Some(error.into()),
        }
    }
}

/// Held-out evaluation of a freshly fitted model
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub accuracy: f64,
    pub sample_count: usize,
    pub category_count: usize,
    pub report: ClassificationReport,
}

/// Collects examples from the lexicon (for categories that exist) and from
/// every categorized, non-deleted transaction. A transaction contributes its
/// merchant and its description as two separate examples.
pub fn assemble_training_data<S: CategorizationStore + ?Sized>(
    store: &S,
    lexicon: &Lexicon,
) -> Result<TrainingData> {
    let mut data = TrainingData::default();

    for (merchant, category_id) in lexicon.resolve(store)? {
        data.push(merchant, category_id);
    }
    let from_lexicon = data.len();

    for txn in store.list_categorized_transactions()? {
        if let Some(merchant) = &txn.merchant {
            data.push(merchant, txn.category_id);
        }
        if let Some(description) = &txn.description {
            data.push(description, txn.category_id);
        }
    }

    let ids: BTreeSet<i64> = data.labels.iter().copied().collect();
    for id in ids {
        if let Some(category) = store.get_category_by_id(id)? {
            data.category_names.insert(id, category.name);
        }
    }

    debug!(
        "Assembled {} training examples ({} from lexicon)",
        data.len(),
        from_lexicon
    );
    Ok(data)
}

/// Fits a vectorizer and forest on `data` and evaluates them on a stratified
/// held-out split. Deterministic for a given `data` and `options.seed`.
pub fn fit_model(
    data: &TrainingData,
    options: &TrainingOptions,
) -> crate::error::Result<(TrainedModel, Evaluation)> {
    if data.len() < options.min_total_samples {
        return Err(CategorizerError::InsufficientData(format!(
            "Need at least {} samples, found {}",
            options.min_total_samples,
            data.len()
        )));
    }

    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for &label in &data.labels {
        *counts.entry(label).or_insert(0) += 1;
    }

    let mut texts = Vec::with_capacity(data.len());
    let mut labels = Vec::with_capacity(data.len());
    for (text, &label) in data.texts.iter().zip(&data.labels) {
        if counts[&label] >= options.min_samples_per_category && !text.trim().is_empty() {
            texts.push(text.clone());
            labels.push(label);
        }
    }

    if texts.len() < options.min_total_samples {
        return Err(CategorizerError::InsufficientData(format!(
            "Only {} samples remain in categories with at least {} examples each",
            texts.len(),
            options.min_samples_per_category
        )));
    }

    let mapping = LabelMapping::from_labels(&labels);
    let y: Vec<usize> = labels
        .iter()
        .map(|id| {
            mapping
                .index_of(*id)
                .ok_or_else(|| CategorizerError::InvalidInput(format!("unmapped label {}", id)))
        })
        .collect::<crate::error::Result<_>>()?;

    let mut rng = SeededRng::new(options.seed);
    let split = stratified_split(&y, options.test_fraction, &mut rng);

    let train_texts: Vec<String> = split.train.iter().map(|&i| texts[i].clone()).collect();
    let train_y: Vec<usize> = split.train.iter().map(|&i| y[i]).collect();
    let test_texts: Vec<String> = split.test.iter().map(|&i| texts[i].clone()).collect();
    let test_y: Vec<usize> = split.test.iter().map(|&i| y[i]).collect();

    let mut vectorizer =
        TfidfVectorizer::new(options.max_features, options.ngram_range, true);
    let x_train = vectorizer.fit_transform(&train_texts);
    let x_test = vectorizer.transform_all(&test_texts);

    let classifier = RandomForest::fit(
        &x_train,
        &train_y,
        mapping.len(),
        vectorizer.n_features(),
        ForestParams {
            n_trees: options.n_trees,
            max_depth: options.max_depth,
            min_samples_leaf: options.min_samples_leaf,
            balanced_class_weight: true,
            seed: options.seed,
        },
    );

    let predicted: Vec<usize> = x_test.iter().map(|row| classifier.predict(row)).collect();
    let report_labels: Vec<(i64, String)> = mapping
        .categories()
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let name = data
                .category_names
                .get(id)
                .cloned()
                .unwrap_or_else(|| format!("Unknown_{}", i));
            (*id, name)
        })
        .collect();

    let evaluation = Evaluation {
        accuracy: accuracy(&test_y, &predicted),
        sample_count: texts.len(),
        category_count: mapping.len(),
        report: classification_report(&test_y, &predicted, &report_labels),
    };

    info!(
        "Fitted model: {} samples, {} categories, {} features, accuracy {:.4}",
        evaluation.sample_count,
        evaluation.category_count,
        vectorizer.n_features(),
        evaluation.accuracy
    );

    Ok((TrainedModel::new(vectorizer, classifier, mapping), evaluation))
}
