// Classifier model: training data, TF-IDF + random forest, persistence,
// and the ModelStore that owns the live predictor.

pub mod forest;
pub mod lexicon;
pub mod metrics;
pub mod model;
pub mod rng;
pub mod split;
pub mod store;
pub mod training;
pub mod vectorizer;

pub use lexicon::{Lexicon, LexiconGroup, BUILTIN_LEXICON};
pub use metrics::{ClassMetrics, ClassificationReport};
pub use model::{
    CategoryPredictor, LabelMapping, NoModel, Prediction, TrainedModel,
    DEFAULT_CONFIDENCE_THRESHOLD,
};
pub use store::{ModelStatus, ModelStore};
pub use training::{
    assemble_training_data, fit_model, TrainingData, TrainingOptions, TrainingResult,
};
