// Spend Categorizer - REST API with Axum
//
// Handlers lock the shared SQLite connection, call into the library and wrap
// the result in `ApiResponse`. Training reads its snapshot under the lock and
// then fits the model on a blocking thread without it.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::categorizer::{Categorization, Categorizer};
use crate::config::AppConfig;
use crate::db::{
    self, CategoryUpdate, InsertOutcome, NewTransaction, RecategorizeScope, RecategorizeSummary,
    SqliteStore, Transaction, TransactionFilter,
};
use crate::entities::{Category, CategoryNode};
use crate::error::{CategorizerError, CategoryError};
use crate::ml::{assemble_training_data, ModelStatus, ModelStore, TrainingResult};
use crate::rules::{CategorizationRule, MatchType};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub models: Arc<ModelStore>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(conn: Connection, models: ModelStore, config: AppConfig) -> Self {
        AppState {
            db: Arc::new(Mutex::new(conn)),
            models: Arc::new(models),
            config: Arc::new(config),
        }
    }

    fn lock_db(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// API Response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(category_err) = err.downcast_ref::<CategoryError>() {
            return match category_err {
                CategoryError::NotFound(_) => ApiError::not_found(category_err.to_string()),
                _ => ApiError::bad_request(category_err.to_string()),
            };
        }
        if let Some(core_err) = err.downcast_ref::<CategorizerError>() {
            if matches!(core_err, CategorizerError::InvalidInput(_)) {
                return ApiError::bad_request(core_err.to_string());
            }
        }
        if err.downcast_ref::<rusqlite::Error>().is_some() {
            error!("Database error: {:#}", err);
            return ApiError::internal(err.to_string());
        }
        // Remaining library errors are validation failures (bad dates, names)
        ApiError::bad_request(err.to_string())
    }
}

impl From<CategorizerError> for ApiError {
    fn from(err: CategorizerError) -> Self {
        match err {
            CategorizerError::InvalidInput(_) | CategorizerError::InsufficientData(_) => {
                ApiError::bad_request(err.to_string())
            }
            _ => {
                error!("Categorizer error: {}", err);
                ApiError::internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

// ============================================================================
// Request / response bodies
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct CategoryQuery {
    #[serde(default)]
    pub flat: bool,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CategoryListing {
    Flat(Vec<Category>),
    Nested(Vec<CategoryNode>),
}

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    pub parent_id: Option<i64>,
    pub icon: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub pattern: String,
    #[serde(default)]
    pub match_type: MatchType,
    pub category_id: i64,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Deserialize)]
pub struct SetCategoryRequest {
    pub category_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecategorizeRequest {
    pub category_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CategorizeRequest {
    pub merchant: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CategorizeResponse {
    #[serde(flatten)]
    pub categorization: Categorization,
    pub category_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub merchant: Option<String>,
    pub description: Option<String>,
    pub confidence_threshold: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub deleted: usize,
}

fn category_name(conn: &Connection, id: Option<i64>) -> Result<Option<String>, ApiError> {
    match id {
        Some(id) => Ok(db::get_category(conn, id)?.map(|c| c.name)),
        None => Ok(None),
    }
}

// ============================================================================
// Handlers - health & categories
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/categories - nested roots, `?flat=true`, or `?parent_id=N`
async fn list_categories(
    State(state): State<AppState>,
    Query(query): Query<CategoryQuery>,
) -> ApiResult<CategoryListing> {
    let conn = state.lock_db();
    let tree = db::category_tree(&conn)?;

    if let Some(parent) = query.parent_id {
        if tree.get(parent).is_none() {
            return Err(ApiError::not_found(format!("Category {} not found", parent)));
        }
        let children = tree.children(parent).into_iter().cloned().collect();
        return ok(CategoryListing::Flat(children));
    }
    if query.flat {
        return ok(CategoryListing::Flat(tree.all().to_vec()));
    }
    ok(CategoryListing::Nested(tree.nested()))
}

/// GET /api/categories/hierarchy
async fn category_hierarchy(State(state): State<AppState>) -> ApiResult<Vec<CategoryNode>> {
    let conn = state.lock_db();
    ok(db::category_tree(&conn)?.nested())
}

/// GET /api/categories/:id - the category with its subtree
async fn get_category(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<CategoryNode> {
    let conn = state.lock_db();
    let tree = db::category_tree(&conn)?;
    match tree.subtree(id) {
        Some(node) => ok(node),
        None => Err(ApiError::not_found(format!("Category {} not found", id))),
    }
}

/// GET /api/categories/:id/children
async fn category_children(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<Category>> {
    let conn = state.lock_db();
    let tree = db::category_tree(&conn)?;
    if tree.get(id).is_none() {
        return Err(ApiError::not_found(format!("Category {} not found", id)));
    }
    ok(tree.children(id).into_iter().cloned().collect())
}

/// POST /api/categories
async fn create_category(
    State(state): State<AppState>,
    Json(req): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Category>>), ApiError> {
    let conn = state.lock_db();
    let category = db::create_category(
        &conn,
        &req.name,
        req.parent_id,
        req.icon.as_deref(),
        req.color.as_deref(),
    )?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(category))))
}

/// PUT /api/categories/:id
async fn update_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<CategoryUpdate>,
) -> ApiResult<Category> {
    let conn = state.lock_db();
    ok(db::update_category(&conn, id, &update)?)
}

/// DELETE /api/categories/:id - removes the whole subtree
async fn delete_category(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Deleted> {
    let conn = state.lock_db();
    let deleted = db::delete_category(&conn, id)?;
    ok(Deleted { deleted })
}

// ============================================================================
// Handlers - rules
// ============================================================================

/// GET /api/rules
async fn list_rules(State(state): State<AppState>) -> ApiResult<Vec<CategorizationRule>> {
    let conn = state.lock_db();
    ok(db::list_rules(&conn)?)
}

/// POST /api/rules - create, or update the rule with the same pattern and category
async fn create_rule(
    State(state): State<AppState>,
    Json(req): Json<CreateRuleRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CategorizationRule>>), ApiError> {
    let conn = state.lock_db();
    let rule = db::add_rule(&conn, &req.pattern, req.match_type, req.category_id, req.priority)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(rule))))
}

/// DELETE /api/rules/:id
async fn delete_rule(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Deleted> {
    let conn = state.lock_db();
    if !db::delete_rule(&conn, id)? {
        return Err(ApiError::not_found(format!("Rule {} not found", id)));
    }
    ok(Deleted { deleted: 1 })
}

// ============================================================================
// Handlers - transactions
// ============================================================================

/// GET /api/transactions - `?category_id=N&limit=M`
async fn list_transactions(
    State(state): State<AppState>,
    Query(filter): Query<TransactionFilter>,
) -> ApiResult<Vec<Transaction>> {
    let conn = state.lock_db();
    ok(db::list_transactions(&conn, &filter)?)
}

/// POST /api/transactions - categorized automatically when no category is given
async fn create_transaction(
    State(state): State<AppState>,
    Json(mut req): Json<NewTransaction>,
) -> Result<(StatusCode, Json<ApiResponse<Transaction>>), ApiError> {
    if req.description.trim().is_empty() {
        return Err(ApiError::bad_request("description is required"));
    }
    let conn = state.lock_db();

    if req.category_id.is_none() {
        let store = SqliteStore::new(&conn);
        let categorizer = Categorizer::new(&store, &state.models)
            .with_threshold(state.config.confidence_threshold);
        req.category_id = categorizer.categorize(req.merchant.as_deref(), Some(&req.description))?;
    } else if let Some(id) = req.category_id {
        if db::get_category(&conn, id)?.is_none() {
            return Err(ApiError::bad_request(format!("Category {} does not exist", id)));
        }
    }

    match db::insert_transaction(&conn, &req)? {
        InsertOutcome::Inserted(id) => {
            let tx = db::get_transaction(&conn, id)?
                .ok_or_else(|| ApiError::internal("Inserted transaction vanished"))?;
            Ok((StatusCode::CREATED, Json(ApiResponse::ok(tx))))
        }
        InsertOutcome::Duplicate => Err(ApiError::new(
            StatusCode::CONFLICT,
            "Duplicate transaction",
        )),
    }
}

/// PUT /api/transactions/:id/category
async fn set_transaction_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SetCategoryRequest>,
) -> ApiResult<Transaction> {
    let conn = state.lock_db();
    if let Some(category_id) = req.category_id {
        if db::get_category(&conn, category_id)?.is_none() {
            return Err(ApiError::bad_request(format!(
                "Category {} does not exist",
                category_id
            )));
        }
    }
    if !db::set_transaction_category(&conn, id, req.category_id)? {
        return Err(ApiError::not_found(format!("Transaction {} not found", id)));
    }
    match db::get_transaction(&conn, id)? {
        Some(tx) => ok(tx),
        None => Err(ApiError::not_found(format!("Transaction {} not found", id))),
    }
}

/// DELETE /api/transactions/:id - soft delete
async fn delete_transaction(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Deleted> {
    let conn = state.lock_db();
    if !db::soft_delete_transaction(&conn, id)? {
        return Err(ApiError::not_found(format!("Transaction {} not found", id)));
    }
    ok(Deleted { deleted: 1 })
}

/// POST /api/transactions/recategorize - `{ "category_id": N }` or `{}` for uncategorized
async fn recategorize(
    State(state): State<AppState>,
    body: Option<Json<RecategorizeRequest>>,
) -> ApiResult<RecategorizeSummary> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let scope = match req.category_id {
        Some(id) => RecategorizeScope::Category(id),
        None => RecategorizeScope::Uncategorized,
    };

    // Walks every selected row; keep it off the async workers
    let summary = tokio::task::spawn_blocking(move || {
        let conn = state.lock_db();
        let store = SqliteStore::new(&conn);
        let categorizer = Categorizer::new(&store, &state.models)
            .with_threshold(state.config.confidence_threshold);
        db::recategorize_transactions(&conn, &categorizer, scope)
    })
    .await
    .map_err(|e| ApiError::internal(format!("Recategorize task failed: {}", e)))??;
    ok(summary)
}

/// POST /api/categorize - preview the decision for a merchant/description
async fn categorize(
    State(state): State<AppState>,
    Json(req): Json<CategorizeRequest>,
) -> ApiResult<CategorizeResponse> {
    let conn = state.lock_db();
    let store = SqliteStore::new(&conn);
    let categorizer =
        Categorizer::new(&store, &state.models).with_threshold(state.config.confidence_threshold);
    let categorization =
        categorizer.categorize_with_confidence(req.merchant.as_deref(), req.description.as_deref())?;
    let category_name = category_name(&conn, categorization.category_id)?;
    ok(CategorizeResponse {
        categorization,
        category_name,
    })
}

// ============================================================================
// Handlers - ML
// ============================================================================

/// POST /api/ml/train
async fn train_model(State(state): State<AppState>) -> Result<Response, ApiError> {
    let data = {
        let conn = state.lock_db();
        let store = SqliteStore::new(&conn);
        assemble_training_data(&store, state.models.lexicon())?
    };

    let models = Arc::clone(&state.models);
    let result: TrainingResult = tokio::task::spawn_blocking(move || models.train_on(&data))
        .await
        .map_err(|e| ApiError::internal(format!("Training task failed: {}", e)))?;

    info!("Training finished: success={}", result.success);
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    let body = ApiResponse {
        success: result.success,
        error: result.error.clone(),
        data: Some(result),
    };
    Ok((status, Json(body)).into_response())
}

/// GET /api/ml/status
async fn model_status(State(state): State<AppState>) -> ApiResult<ModelStatus> {
    let conn = state.lock_db();
    let store = SqliteStore::new(&conn);
    ok(state.models.status(&store)?)
}

/// POST /api/ml/predict - model only, no rules and no fallback
async fn predict(
    State(state): State<AppState>,
    Json(req): Json<PredictRequest>,
) -> ApiResult<PredictResponse> {
    let has_text = |t: &Option<String>| t.as_deref().is_some_and(|s| !s.trim().is_empty());
    if !has_text(&req.merchant) && !has_text(&req.description) {
        return Err(ApiError::bad_request("Either merchant or description required"));
    }
    let conn = state.lock_db();
    let store = SqliteStore::new(&conn);
    let categorizer =
        Categorizer::new(&store, &state.models).with_threshold(state.config.confidence_threshold);
    let prediction = categorizer.predict(
        req.merchant.as_deref(),
        req.description.as_deref(),
        req.confidence_threshold,
    )?;
    ok(PredictResponse {
        category_id: prediction.category_id,
        category_name: category_name(&conn, prediction.category_id)?,
        confidence: (prediction.confidence * 10_000.0).round() / 10_000.0,
    })
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/categories", get(list_categories).post(create_category))
        .route("/categories/hierarchy", get(category_hierarchy))
        .route(
            "/categories/:id",
            get(get_category).put(update_category).delete(delete_category),
        )
        .route("/categories/:id/children", get(category_children))
        .route("/rules", get(list_rules).post(create_rule))
        .route("/rules/:id", axum::routing::delete(delete_rule))
        .route(
            "/transactions",
            get(list_transactions).post(create_transaction),
        )
        .route("/transactions/recategorize", post(recategorize))
        .route("/transactions/:id", axum::routing::delete(delete_transaction))
        .route("/transactions/:id/category", put(set_transaction_category))
        .route("/categorize", post(categorize))
        .route("/ml/train", post(train_model))
        .route("/ml/status", get(model_status))
        .route("/ml/predict", post(predict));

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
