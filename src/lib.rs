// Spend Categorizer - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod categorizer;    // Rules → model → Uncategorized decision policy
pub mod config;         // TOML + env configuration
pub mod db;             // SQLite storage, re-categorization, CSV import
pub mod entities;       // Category arena
pub mod error;          // Error taxonomy
pub mod ml;             // TF-IDF + random forest classifier and ModelStore
pub mod normalizer;     // Bank-statement noise stripping
pub mod rules;          // User-authored pattern rules
pub mod storage;        // Storage seam used by the core

#[cfg(feature = "server")]
pub mod web;            // axum HTTP API

// Re-export commonly used types
pub use categorizer::{Categorization, Categorizer, DecisionSource};
pub use config::{load_config, AppConfig};
pub use db::{
    import_transactions, load_csv, open_database, recategorize_transactions,
    seed_default_categories, seed_default_rules, setup_database, InsertOutcome,
    NewTransaction, RecategorizeScope, RecategorizeSummary, SqliteStore, Transaction,
};
pub use entities::{Category, CategoryNode, CategoryTree, UNCATEGORIZED};
pub use error::{CategorizerError, CategoryError};
pub use ml::{
    CategoryPredictor, ModelStatus, ModelStore, NoModel, Prediction, TrainedModel,
    TrainingOptions, TrainingResult,
};
pub use normalizer::normalize;
pub use rules::{match_rules, CategorizationRule, MatchType, RuleEngine};
pub use storage::{CategorizationStore, CategorizedText, InMemoryStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
