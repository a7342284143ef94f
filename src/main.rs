use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use spend_categorizer::db::{self, ImportSummary, RecategorizeScope};
use spend_categorizer::{
    import_transactions, load_config, load_csv, open_database, recategorize_transactions,
    seed_default_categories, seed_default_rules, AppConfig, Categorizer, ModelStore, SqliteStore,
};

#[derive(Parser, Debug)]
#[command(name = "spend-categorizer", version, about = "Categorize bank transactions with rules and a trained model")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and seed default categories and rules
    Init,

    /// Import a CSV of date,amount,description[,merchant,account_name] rows
    Import {
        /// Path to the CSV file
        csv: PathBuf,
    },

    /// Train the classifier from the lexicon and categorized transactions
    Train,

    /// Show the category chosen for a merchant/description
    Categorize {
        #[arg(long)]
        merchant: Option<String>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Re-run categorization over stored transactions
    Recategorize {
        /// Only transactions currently in this category (default: uncategorized ones)
        #[arg(long)]
        category: Option<i64>,
    },

    /// Print database and model status
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("spend_categorizer=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config()?;

    match cli.command {
        Command::Init => run_init(&config),
        Command::Import { csv } => run_import(&config, csv),
        Command::Train => run_train(&config),
        Command::Categorize {
            merchant,
            description,
        } => run_categorize(&config, merchant.as_deref(), description.as_deref()),
        Command::Recategorize { category } => run_recategorize(&config, category),
        Command::Status => run_status(&config),
    }
}

fn model_store(config: &AppConfig) -> ModelStore {
    ModelStore::new(config.model_dir.clone()).with_options(config.training.clone())
}

fn run_init(config: &AppConfig) -> Result<()> {
    println!("🔧 Setting up database...");
    let conn = open_database(&config.database_path)?;
    let categories = seed_default_categories(&conn)?;
    let rules = seed_default_rules(&conn)?;
    println!("✓ Database ready at {}", config.database_path.display());
    println!("✓ Seeded {} categories and {} rules", categories, rules);
    Ok(())
}

fn run_import(config: &AppConfig, csv: PathBuf) -> Result<()> {
    println!("📂 Loading CSV...");
    let rows = load_csv(&csv)?;
    println!("✓ Loaded {} rows from {}", rows.len(), csv.display());

    let conn = open_database(&config.database_path)?;
    let models = model_store(config);
    let store = SqliteStore::new(&conn);
    let categorizer = Categorizer::new(&store, &models).with_threshold(config.confidence_threshold);

    let ImportSummary {
        total_rows,
        inserted,
        duplicates,
    } = import_transactions(&conn, &categorizer, &rows)?;

    println!("💾 {} rows: {} inserted, {} duplicates skipped", total_rows, inserted, duplicates);
    println!("✓ Database contains {} transactions", db::verify_count(&conn)?);
    Ok(())
}

fn run_train(config: &AppConfig) -> Result<()> {
    let conn = open_database(&config.database_path)?;
    let models = model_store(config);
    let store = SqliteStore::new(&conn);

    println!("🧠 Training classifier...");
    let result = models.train(&store);
    if !result.success {
        bail!(
            "Training failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }

    println!(
        "✓ Trained on {} samples across {} categories",
        result.sample_count.unwrap_or_default(),
        result.category_count.unwrap_or_default()
    );
    if let Some(accuracy) = result.accuracy {
        println!("✓ Held-out accuracy: {:.2}%", accuracy * 100.0);
    }
    if let Some(report) = &result.report {
        println!("\n{:<28} {:>9} {:>9} {:>9} {:>8}", "category", "precision", "recall", "f1", "support");
        for class in &report.classes {
            println!(
                "{:<28} {:>9.3} {:>9.3} {:>9.3} {:>8}",
                class.name, class.precision, class.recall, class.f1_score, class.support
            );
        }
    }
    Ok(())
}

fn run_categorize(config: &AppConfig, merchant: Option<&str>, description: Option<&str>) -> Result<()> {
    if merchant.is_none() && description.is_none() {
        bail!("Pass --merchant and/or --description");
    }
    let conn = open_database(&config.database_path)?;
    let models = model_store(config);
    let store = SqliteStore::new(&conn);
    let categorizer = Categorizer::new(&store, &models).with_threshold(config.confidence_threshold);

    let decision = categorizer.categorize_with_confidence(merchant, description)?;
    match decision.category_id {
        Some(id) => {
            let path = db::category_tree(&conn)?.path_string(id);
            println!(
                "{} (id {}) via {} [confidence {:.3}]",
                path, id, decision.source, decision.confidence
            );
        }
        None => println!("No category (database has no Uncategorized category)"),
    }
    Ok(())
}

fn run_recategorize(config: &AppConfig, category: Option<i64>) -> Result<()> {
    let conn = open_database(&config.database_path)?;
    let models = model_store(config);
    let store = SqliteStore::new(&conn);
    let categorizer = Categorizer::new(&store, &models).with_threshold(config.confidence_threshold);

    let scope = match category {
        Some(id) => RecategorizeScope::Category(id),
        None => RecategorizeScope::Uncategorized,
    };
    let summary = recategorize_transactions(&conn, &categorizer, scope)?;
    println!(
        "🔁 Processed {}: {} updated, {} unchanged",
        summary.total_processed, summary.updated, summary.unchanged
    );
    Ok(())
}

fn run_status(config: &AppConfig) -> Result<()> {
    let conn = open_database(&config.database_path)?;
    let models = model_store(config);
    let store = SqliteStore::new(&conn);

    println!("📊 Spend Categorizer v{}", spend_categorizer::VERSION);
    println!("   Database:     {}", config.database_path.display());
    println!("   Transactions: {}", db::verify_count(&conn)?);
    println!("   Categories:   {}", db::list_categories(&conn)?.len());
    println!("   Rules:        {}", db::list_rules(&conn)?.len());

    let status = models.status(&store)?;
    if status.is_trained {
        println!(
            "   Model:        trained, {} categories ({})",
            status.category_count,
            status.category_names.join(", ")
        );
    } else {
        println!("   Model:        not trained (run `spend-categorizer train`)");
    }
    Ok(())
}
