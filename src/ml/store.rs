// 🧠 ModelStore - owner of the live model
//
// Holds the current predictor behind an RwLock<Arc<..>>. Readers clone the
// Arc and predict without holding the lock. Training is serialized by its own
// mutex, persists the new artifacts, and only then swaps the pointer.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{info, warn};

use super::lexicon::Lexicon;
use super::model::{CategoryPredictor, NoModel, Prediction, TrainedModel};
use super::training::{assemble_training_data, fit_model, TrainingData, TrainingOptions, TrainingResult};
use crate::storage::CategorizationStore;

/// What `GET /api/ml/status` and `status` report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatus {
    pub is_trained: bool,
    pub category_count: usize,
    pub category_names: Vec<String>,
    pub categories: Vec<i64>,
}

pub struct ModelStore {
    model_dir: Option<PathBuf>,
    current: RwLock<Option<Arc<dyn CategoryPredictor>>>,
    training: Mutex<()>,
    lexicon: Lexicon,
    options: TrainingOptions,
}

impl ModelStore {
    /// Store backed by `model_dir`; the model is loaded on first use
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        ModelStore {
            model_dir: Some(model_dir.into()),
            current: RwLock::new(None),
            training: Mutex::new(()),
            lexicon: Lexicon::builtin(),
            options: TrainingOptions::default(),
        }
    }

    /// Store without a directory: trained models live in memory only
    pub fn in_memory() -> Self {
        ModelStore {
            model_dir: None,
            current: RwLock::new(Some(Arc::new(NoModel))),
            training: Mutex::new(()),
            lexicon: Lexicon::builtin(),
            options: TrainingOptions::default(),
        }
    }

    /// Store serving a fixed predictor (fakes in tests)
    pub fn from_predictor(predictor: Arc<dyn CategoryPredictor>) -> Self {
        ModelStore {
            current: RwLock::new(Some(predictor)),
            ..ModelStore::in_memory()
        }
    }

    pub fn with_lexicon(mut self, lexicon: Lexicon) -> Self {
        self.lexicon = lexicon;
        self
    }

    pub fn with_options(mut self, options: TrainingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn model_dir(&self) -> Option<&Path> {
        self.model_dir.as_deref()
    }

    pub fn options(&self) -> &TrainingOptions {
        &self.options
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    fn load_from_disk(&self) -> Arc<dyn CategoryPredictor> {
        let Some(dir) = &self.model_dir else {
            return Arc::new(NoModel);
        };
        match TrainedModel::load(dir) {
            Ok(Some(model)) => {
                info!(
                    "Loaded model from {} ({} categories)",
                    dir.display(),
                    model.mapping().len()
                );
                Arc::new(model)
            }
            Ok(None) => Arc::new(NoModel),
            Err(e) => {
                warn!("Ignoring unreadable model in {}: {}", dir.display(), e);
                Arc::new(NoModel)
            }
        }
    }

    /// The predictor in effect right now. Loads from disk on first call.
    pub fn current(&self) -> Arc<dyn CategoryPredictor> {
        if let Some(predictor) = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Arc::clone(predictor);
        }

        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(predictor) => Arc::clone(predictor),
            None => {
                let predictor = self.load_from_disk();
                *slot = Some(Arc::clone(&predictor));
                predictor
            }
        }
    }

    /// Drop the in-memory model so the next `current()` reads the directory again
    pub fn reload(&self) {
        if self.model_dir.is_some() {
            *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
        }
    }

    fn install(&self, predictor: Arc<dyn CategoryPredictor>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(predictor);
    }

    pub fn is_trained(&self) -> bool {
        self.current().is_trained()
    }

    pub fn predict(&self, text: &str, threshold: f64) -> Prediction {
        self.current().predict(text, threshold)
    }

    /// Assemble training data from `store` and train on it
    pub fn train<S: CategorizationStore + ?Sized>(&self, store: &S) -> TrainingResult {
        match assemble_training_data(store, &self.lexicon) {
            Ok(data) => self.train_on(&data),
            Err(e) => {
                warn!("Could not assemble training data: {:#}", e);
                TrainingResult::failed(format!("Failed to read training data: {}", e))
            }
        }
    }

    /// Train on a prepared snapshot. On any failure the previous model, in
    /// memory and on disk, is left as it was.
    pub fn train_on(&self, data: &TrainingData) -> TrainingResult {
        let _guard = self.training.lock().unwrap_or_else(PoisonError::into_inner);

        let (model, evaluation) = match fit_model(data, &self.options) {
            Ok(fitted) => fitted,
            Err(e) => {
                warn!("Training refused: {}", e);
                return TrainingResult::failed(e.to_string());
            }
        };

        if let Some(dir) = &self.model_dir {
            if let Err(e) = model.save(dir) {
                warn!("Training discarded, could not save model: {}", e);
                return TrainingResult::failed(e.to_string());
            }
        }

        self.install(Arc::new(model));
        info!(
            "Model swapped in: {} categories, accuracy {:.4}",
            evaluation.category_count, evaluation.accuracy
        );
        TrainingResult::succeeded(&evaluation)
    }

    /// Status of the current model, with category names resolved via `store`
    pub fn status<S: CategorizationStore + ?Sized>(&self, store: &S) -> anyhow::Result<ModelStatus> {
        let predictor = self.current();
        let categories = predictor.category_ids();
        let mut category_names = Vec::with_capacity(categories.len());
        for id in &categories {
            if let Some(category) = store.get_category_by_id(*id)? {
                category_names.push(category.name);
            }
        }
        Ok(ModelStatus {
            is_trained: predictor.is_trained(),
            category_count: categories.len(),
            category_names,
            categories,
        })
    }
}

impl std::fmt::Debug for ModelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelStore")
            .field("model_dir", &self.model_dir)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
