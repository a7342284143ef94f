// Spend Categorizer - Web Server

use anyhow::{Context, Result};
use spend_categorizer::web::{router, AppState};
use spend_categorizer::{load_config, open_database, seed_default_categories, seed_default_rules, ModelStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("spend_categorizer=info,spend_server=info")),
        )
        .init();

    info!("🌐 Spend Categorizer - Web Server");

    let config = load_config()?;

    let conn = open_database(&config.database_path)?;
    let seeded = seed_default_categories(&conn)? + seed_default_rules(&conn)?;
    info!(
        "✓ Database opened: {} ({} defaults seeded)",
        config.database_path.display(),
        seeded
    );

    let models = ModelStore::new(config.model_dir.clone()).with_options(config.training.clone());
    if models.is_trained() {
        info!("✓ Model loaded from {}", config.model_dir.display());
    } else {
        info!("No trained model in {}; rules only until /api/ml/train", config.model_dir.display());
    }

    let addr = config.bind_addr.clone();
    let app = router(AppState::new(conn, models, config));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("🚀 Server running on http://{}", addr);
    info!("   API: http://{}/api/health", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
