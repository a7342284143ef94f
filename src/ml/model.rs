//! Trained model artifacts and the prediction capability.
//!
//! A model is three JSON files in one directory:
//!
//! | file                    | contents                              |
//! |-------------------------|---------------------------------------|
//! | `vectorizer.json`       | TF-IDF vocabulary and IDF weights     |
//! | `classifier.json`       | random forest                         |
//! | `category_mapping.json` | label index → category id             |
//!
//! Each file wraps its artifact as `{"generation": ..., "artifact": ...}`.
//! The generation is a SHA-256 digest over the three artifacts of one
//! training run; files from different runs never load together.
//! All three must be present and consistent for a model to load.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::forest::{argmax, RandomForest};
use super::vectorizer::TfidfVectorizer;
use crate::error::{CategorizerError, Result};
use crate::normalizer::normalize;

pub const VECTORIZER_FILE: &str = "vectorizer.json";
pub const CLASSIFIER_FILE: &str = "classifier.json";
pub const MAPPING_FILE: &str = "category_mapping.json";

/// Default minimum probability for a model prediction to count
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.15;

/// A model's opinion; `category_id == None` always carries confidence 0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub category_id: Option<i64>,
    pub confidence: f64,
}

impl Prediction {
    pub fn none() -> Self {
        Prediction {
            category_id: None,
            confidence: 0.0,
        }
    }

    pub fn is_some(&self) -> bool {
        self.category_id.is_some()
    }
}

/// Anything that can map text to a category with a confidence.
///
/// Implementations normalize `text` themselves and never fail: an absent
/// model, empty text, or a low-confidence result is `Prediction::none()`.
pub trait CategoryPredictor: Send + Sync {
    fn predict(&self, text: &str, threshold: f64) -> Prediction;

    fn is_trained(&self) -> bool;

    /// Category ids the model can output, in label-index order
    fn category_ids(&self) -> Vec<i64>;
}

/// Stand-in used until a model has been trained or loaded
#[derive(Debug, Clone, Copy, Default)]
pub struct NoModel;

impl CategoryPredictor for NoModel {
    fn predict(&self, _text: &str, _threshold: f64) -> Prediction {
        Prediction::none()
    }

    fn is_trained(&self) -> bool {
        false
    }

    fn category_ids(&self) -> Vec<i64> {
        Vec::new()
    }
}

// ============================================================================
// LABEL MAPPING
// ============================================================================

/// Dense label index ↔ category id. Indices follow ascending category id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMapping {
    categories: Vec<i64>,
}

impl LabelMapping {
    pub fn from_labels(labels: &[i64]) -> Self {
        let mut categories = labels.to_vec();
        categories.sort_unstable();
        categories.dedup();
        LabelMapping { categories }
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn index_of(&self, category_id: i64) -> Option<usize> {
        self.categories.binary_search(&category_id).ok()
    }

    pub fn category_at(&self, index: usize) -> Option<i64> {
        self.categories.get(index).copied()
    }

    pub fn categories(&self) -> &[i64] {
        &self.categories
    }
}

// ============================================================================
// TRAINED MODEL
// ============================================================================

#[derive(Debug, Clone)]
pub struct TrainedModel {
    vectorizer: TfidfVectorizer,
    classifier: RandomForest,
    mapping: LabelMapping,
}

fn artifact_paths(dir: &Path) -> [(PathBuf, &'static str); 3] {
    [
        (dir.join(VECTORIZER_FILE), VECTORIZER_FILE),
        (dir.join(CLASSIFIER_FILE), CLASSIFIER_FILE),
        (dir.join(MAPPING_FILE), MAPPING_FILE),
    ]
}

#[derive(Serialize)]
struct StampedRef<'a, T> {
    generation: &'a str,
    artifact: &'a T,
}

#[derive(Deserialize)]
struct Stamped<T> {
    generation: String,
    artifact: T,
}

fn generation_of(bodies: &[Vec<u8>]) -> String {
    let mut hasher = Sha256::new();
    for body in bodies {
        hasher.update((body.len() as u64).to_le_bytes());
        hasher.update(body);
    }
    format!("{:x}", hasher.finalize())
}

fn stamp<T: Serialize>(generation: &str, artifact: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&StampedRef {
        generation,
        artifact,
    })?)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

impl TrainedModel {
    pub fn new(vectorizer: TfidfVectorizer, classifier: RandomForest, mapping: LabelMapping) -> Self {
        TrainedModel {
            vectorizer,
            classifier,
            mapping,
        }
    }

    pub fn mapping(&self) -> &LabelMapping {
        &self.mapping
    }

    pub fn vectorizer(&self) -> &TfidfVectorizer {
        &self.vectorizer
    }

    pub fn classifier(&self) -> &RandomForest {
        &self.classifier
    }

    /// Class probabilities for already-normalized text
    pub fn predict_proba(&self, normalized: &str) -> Vec<f64> {
        self.classifier
            .predict_proba(&self.vectorizer.transform(normalized))
    }

    fn check_consistency(&self) -> Result<()> {
        self.vectorizer
            .validate()
            .map_err(|e| CategorizerError::Persistence(format!("invalid vectorizer: {}", e)))?;
        self.classifier
            .validate()
            .map_err(|e| CategorizerError::Persistence(format!("invalid classifier: {}", e)))?;
        if self.mapping.is_empty() {
            return Err(CategorizerError::Persistence(
                "category mapping is empty".to_string(),
            ));
        }
        if self.classifier.n_classes() != self.mapping.len() {
            return Err(CategorizerError::Persistence(format!(
                "classifier has {} classes but mapping has {}",
                self.classifier.n_classes(),
                self.mapping.len()
            )));
        }
        if self.classifier.n_features() != self.vectorizer.n_features() {
            return Err(CategorizerError::Persistence(format!(
                "classifier expects {} features but vectorizer produces {}",
                self.classifier.n_features(),
                self.vectorizer.n_features()
            )));
        }
        Ok(())
    }

    /// Write all three artifacts into `dir`.
    ///
    /// Everything is serialized and written to `.tmp` siblings first; the
    /// final names are only replaced once every write has succeeded. A
    /// reader that catches the renames half done sees mismatched
    /// generations and gets no model.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;

        let generation = generation_of(&[
            serde_json::to_vec(&self.vectorizer)?,
            serde_json::to_vec(&self.classifier)?,
            serde_json::to_vec(&self.mapping)?,
        ]);
        let blobs = [
            stamp(&generation, &self.vectorizer)?,
            stamp(&generation, &self.classifier)?,
            stamp(&generation, &self.mapping)?,
        ];
        let paths = artifact_paths(dir);

        let written: Result<()> = paths
            .iter()
            .zip(&blobs)
            .try_for_each(|((path, _), blob)| fs::write(tmp_path(path), blob).map_err(Into::into));

        if let Err(e) = written {
            for (path, _) in &paths {
                let _ = fs::remove_file(tmp_path(path));
            }
            return Err(e);
        }

        for (path, name) in &paths {
            fs::rename(tmp_path(path), path).map_err(|e| {
                CategorizerError::Persistence(format!("failed to install {}: {}", name, e))
            })?;
        }

        debug!("Saved model artifacts to {}", dir.display());
        Ok(())
    }

    /// Load a model from `dir`. `Ok(None)` when any artifact is missing;
    /// `Err` when the files exist but cannot be read or do not agree.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let paths = artifact_paths(dir);
        if !paths.iter().all(|(path, _)| path.exists()) {
            return Ok(None);
        }

        let read = |path: &Path, name: &str| -> Result<Vec<u8>> {
            fs::read(path)
                .map_err(|e| CategorizerError::Persistence(format!("failed to read {}: {}", name, e)))
        };

        let vectorizer: Stamped<TfidfVectorizer> =
            serde_json::from_slice(&read(&paths[0].0, paths[0].1)?)?;
        let classifier: Stamped<RandomForest> =
            serde_json::from_slice(&read(&paths[1].0, paths[1].1)?)?;
        let mapping: Stamped<LabelMapping> =
            serde_json::from_slice(&read(&paths[2].0, paths[2].1)?)?;

        if vectorizer.generation != mapping.generation || classifier.generation != mapping.generation
        {
            return Err(CategorizerError::Persistence(format!(
                "artifacts in {} come from different generations",
                dir.display()
            )));
        }

        let model = TrainedModel::new(vectorizer.artifact, classifier.artifact, mapping.artifact);
        model.check_consistency()?;
        Ok(Some(model))
    }

    /// True when all three artifact files exist in `dir`
    pub fn exists(dir: &Path) -> bool {
        artifact_paths(dir).iter().all(|(path, _)| path.exists())
    }
}

impl CategoryPredictor for TrainedModel {
    fn predict(&self, text: &str, threshold: f64) -> Prediction {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return Prediction::none();
        }

        let proba = self.predict_proba(&normalized);
        if proba.is_empty() {
            return Prediction::none();
        }
        let (index, confidence) = argmax(&proba);
        let confidence = confidence.clamp(0.0, 1.0);

        if confidence < threshold {
            return Prediction::none();
        }
        match self.mapping.category_at(index) {
            Some(category_id) => Prediction {
                category_id: Some(category_id),
                confidence,
            },
            None => Prediction::none(),
        }
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn category_ids(&self) -> Vec<i64> {
        self.mapping.categories.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::forest::ForestParams;
    use tempfile::TempDir;

    fn tiny_model() -> TrainedModel {
        model_from(&["starbucks coffee", "peets coffee", "shell gas", "chevron gas"])
    }

    /// Two classes, the first two texts in one and the last two in the other
    fn model_from(texts: &[&str]) -> TrainedModel {
        let texts: Vec<String> = texts
            .iter()
            .map(|s| s.to_string())
            .collect();
        let y = vec![0, 0, 1, 1];
        let mut vectorizer = TfidfVectorizer::new(2000, (1, 3), true);
        let x = vectorizer.fit_transform(&texts);
        let classifier = RandomForest::fit(
            &x,
            &y,
            2,
            vectorizer.n_features(),
            ForestParams {
                n_trees: 20,
                ..ForestParams::default()
            },
        );
        TrainedModel::new(vectorizer, classifier, LabelMapping::from_labels(&[7, 3]))
    }

    #[test]
    fn test_label_mapping_is_sorted() {
        let mapping = LabelMapping::from_labels(&[9, 3, 9, 5]);
        assert_eq!(mapping.categories(), &[3, 5, 9]);
        assert_eq!(mapping.index_of(5), Some(1));
        assert_eq!(mapping.category_at(2), Some(9));
        assert_eq!(mapping.index_of(4), None);
    }

    #[test]
    fn test_no_model_has_no_opinion() {
        assert_eq!(NoModel.predict("starbucks", 0.0), Prediction::none());
        assert!(!NoModel.is_trained());
    }

    #[test]
    fn test_prediction_maps_back_to_category() {
        let model = tiny_model();
        let prediction = model.predict("STARBUCKS COFFEE #1234", 0.15);
        assert_eq!(prediction.category_id, Some(3));
        assert!((0.0..=1.0).contains(&prediction.confidence));
    }

    #[test]
    fn test_empty_text_and_high_threshold() {
        let model = tiny_model();
        assert_eq!(model.predict("#123456789", 0.0), Prediction::none());
        assert_eq!(model.predict("shell gas", 1.01), Prediction::none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let model = tiny_model();
        model.save(dir.path()).unwrap();

        assert!(TrainedModel::exists(dir.path()));
        assert!(!dir.path().join("vectorizer.json.tmp").exists());

        let loaded = TrainedModel::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.mapping(), model.mapping());
        assert_eq!(
            loaded.predict("chevron gas", 0.0),
            model.predict("chevron gas", 0.0)
        );
    }

    #[test]
    fn test_missing_artifact_is_no_model() {
        let dir = TempDir::new().unwrap();
        tiny_model().save(dir.path()).unwrap();
        fs::remove_file(dir.path().join(CLASSIFIER_FILE)).unwrap();
        assert!(TrainedModel::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_artifact_is_an_error() {
        let dir = TempDir::new().unwrap();
        tiny_model().save(dir.path()).unwrap();
        fs::write(dir.path().join(MAPPING_FILE), b"not json").unwrap();
        let err = TrainedModel::load(dir.path()).unwrap_err();
        assert_eq!(err.kind(), "persistence");
    }

    fn rewrite_json(path: &Path, edit: impl FnOnce(&mut serde_json::Value)) {
        let mut value: serde_json::Value = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        edit(&mut value);
        fs::write(path, serde_json::to_vec(&value).unwrap()).unwrap();
    }

    #[test]
    fn test_mixed_generations_are_rejected() {
        let old = TempDir::new().unwrap();
        let new = TempDir::new().unwrap();
        model_from(&["aa one", "aa two", "bb one", "bb two"]).save(old.path()).unwrap();
        model_from(&["zz one", "zz two", "yy one", "yy two"]).save(new.path()).unwrap();

        // Vectorizer from the newer run next to the older classifier and mapping
        fs::copy(new.path().join(VECTORIZER_FILE), old.path().join(VECTORIZER_FILE)).unwrap();

        let err = TrainedModel::load(old.path()).unwrap_err();
        assert_eq!(err.kind(), "persistence");
        assert!(err.to_string().contains("generation"), "{}", err);
        assert!(!crate::ml::ModelStore::new(old.path()).is_trained());

        assert!(TrainedModel::load(new.path()).unwrap().is_some());
    }

    #[test]
    fn test_malformed_trees_are_rejected() {
        let cases: Vec<Box<dyn Fn(&mut serde_json::Value)>> = vec![
            Box::new(|v: &mut serde_json::Value| v["artifact"]["trees"][0]["nodes"] = serde_json::json!([])),
            Box::new(|v: &mut serde_json::Value| {
                v["artifact"]["trees"][0]["nodes"][0] = serde_json::json!({
                    "Split": { "feature": 0, "threshold": 0.0, "left": 0, "right": 0 }
                })
            }),
            Box::new(|v: &mut serde_json::Value| {
                v["artifact"]["trees"][0]["nodes"][0] = serde_json::json!({
                    "Split": { "feature": 0, "threshold": 0.0, "left": 1, "right": 9999 }
                })
            }),
            Box::new(|v: &mut serde_json::Value| {
                v["artifact"]["trees"][0]["nodes"] =
                    serde_json::json!([{ "Leaf": { "distribution": [1.0] } }])
            }),
        ];

        for (i, edit) in cases.iter().enumerate() {
            let dir = TempDir::new().unwrap();
            tiny_model().save(dir.path()).unwrap();
            rewrite_json(&dir.path().join(CLASSIFIER_FILE), |v| edit(v));

            let err = TrainedModel::load(dir.path()).unwrap_err();
            assert_eq!(err.kind(), "persistence", "case {}", i);
            assert!(!crate::ml::ModelStore::new(dir.path()).is_trained(), "case {}", i);
        }
    }

    #[test]
    fn test_out_of_range_vocabulary_is_rejected() {
        let dir = TempDir::new().unwrap();
        tiny_model().save(dir.path()).unwrap();
        rewrite_json(&dir.path().join(VECTORIZER_FILE), |v| {
            let vocabulary = v["artifact"]["vocabulary"].as_object_mut().unwrap();
            let term = vocabulary.keys().next().unwrap().clone();
            vocabulary.insert(term, serde_json::json!(9999));
        });

        let err = TrainedModel::load(dir.path()).unwrap_err();
        assert_eq!(err.kind(), "persistence");
    }
}
