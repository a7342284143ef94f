// HTTP API tests, driven through the router without a socket
#![cfg(feature = "server")]

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use rusqlite::Connection;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use spend_categorizer::db;
use spend_categorizer::ml::{Lexicon, LexiconGroup};
use spend_categorizer::web::{router, AppState};
use spend_categorizer::{setup_database, AppConfig, ModelStore, UNCATEGORIZED};

fn seeded_conn() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    setup_database(&conn).unwrap();
    db::seed_default_categories(&conn).unwrap();
    db::seed_default_rules(&conn).unwrap();
    conn
}

fn app_with(models: ModelStore) -> (Router, AppState) {
    let state = AppState::new(seeded_conn(), models, AppConfig::default());
    (router(state.clone()), state)
}

fn app() -> (Router, AppState) {
    app_with(ModelStore::in_memory())
}

fn category_id(state: &AppState, name: &str) -> i64 {
    let conn = state.db.lock().unwrap();
    db::get_category_by_name(&conn, name).unwrap().unwrap().id
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let (app, _) = app();
    let (status, body) = send(&app, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"], "OK");
}

#[tokio::test]
async fn test_category_listings() {
    let (app, state) = app();

    let (status, nested) = send(&app, Method::GET, "/api/categories", None).await;
    assert_eq!(status, StatusCode::OK);
    let roots = nested["data"].as_array().unwrap();
    assert!(roots.iter().any(|c| c["name"] == "Food & Dining"));
    assert!(roots.iter().all(|c| c["children"].is_array()));

    let (_, flat) = send(&app, Method::GET, "/api/categories?flat=true", None).await;
    assert!(flat["data"].as_array().unwrap().len() > roots.len());

    let food = category_id(&state, "Food & Dining");
    let (_, children) = send(
        &app,
        Method::GET,
        &format!("/api/categories?parent_id={}", food),
        None,
    )
    .await;
    let names: Vec<&str> = children["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"Coffee Shops"));

    let (status, _) = send(&app, Method::GET, "/api/categories/99999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_category_crud() {
    let (app, state) = app();
    let shopping = category_id(&state, "Shopping");

    let (status, created) = send(
        &app,
        Method::POST,
        "/api/categories",
        Some(json!({ "name": "Books", "parent_id": shopping, "icon": "book" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let books = created["data"]["id"].as_i64().unwrap();
    assert_eq!(created["data"]["parent_id"], shopping);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/categories",
        Some(json!({ "name": "Books", "parent_id": shopping })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, updated) = send(
        &app,
        Method::PUT,
        &format!("/api/categories/{}", books),
        Some(json!({ "name": "Books & Magazines" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["data"]["name"], "Books & Magazines");

    // A category cannot become its own descendant
    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/api/categories/{}", shopping),
        Some(json!({ "parent_id": books })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, deleted) = send(&app, Method::DELETE, &format!("/api/categories/{}", books), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["data"]["deleted"], 1);

    let (status, _) = send(&app, Method::GET, &format!("/api/categories/{}", books), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rules_and_categorize_preview() {
    let (app, state) = app();
    let hobbies = category_id(&state, "Hobbies");

    let (status, rule) = send(
        &app,
        Method::POST,
        "/api/rules",
        Some(json!({ "pattern": "^michaels", "match_type": "regex", "category_id": hobbies, "priority": 50 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let rule_id = rule["data"]["id"].as_i64().unwrap();

    let (_, preview) = send(
        &app,
        Method::POST,
        "/api/categorize",
        Some(json!({ "merchant": "MICHAELS STORES #4410" })),
    )
    .await;
    assert_eq!(preview["data"]["category_id"], hobbies);
    assert_eq!(preview["data"]["category_name"], "Hobbies");
    assert_eq!(preview["data"]["source"], "rule");
    assert_eq!(preview["data"]["rule_id"], rule_id);

    let (status, _) = send(&app, Method::DELETE, &format!("/api/rules/{}", rule_id), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, Method::DELETE, &format!("/api/rules/{}", rule_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, preview) = send(
        &app,
        Method::POST,
        "/api/categorize",
        Some(json!({ "merchant": "MICHAELS STORES #4410" })),
    )
    .await;
    assert_eq!(preview["data"]["category_name"], UNCATEGORIZED);
    assert_eq!(preview["data"]["source"], "fallback");
}

#[tokio::test]
async fn test_rule_for_missing_category_is_rejected() {
    let (app, _) = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/rules",
        Some(json!({ "pattern": "anything", "category_id": 99999 })),
    )
    .await;
    assert!(status.is_client_error());
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_transaction_lifecycle() {
    let (app, state) = app();
    let coffee = category_id(&state, "Coffee Shops");
    let gas = category_id(&state, "Gas");

    let tx = json!({
        "date": "2024-05-01",
        "amount": -5.25,
        "description": "STARBUCKS #1234 SEATTLE WA",
        "merchant": "STARBUCKS"
    });
    let (status, created) = send(&app, Method::POST, "/api/transactions", Some(tx.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["data"]["category_id"], coffee);
    let id = created["data"]["id"].as_i64().unwrap();

    let (status, _) = send(&app, Method::POST, "/api/transactions", Some(tx)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, moved) = send(
        &app,
        Method::PUT,
        &format!("/api/transactions/{}/category", id),
        Some(json!({ "category_id": gas })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(moved["data"]["category_id"], gas);

    let (_, listed) = send(
        &app,
        Method::GET,
        &format!("/api/transactions?category_id={}", gas),
        None,
    )
    .await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    let (status, _) = send(&app, Method::DELETE, &format!("/api/transactions/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, listed) = send(&app, Method::GET, "/api/transactions", None).await;
    assert!(listed["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_recategorize_endpoint() {
    let (app, state) = app();
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/transactions",
        Some(json!({ "date": "2024-05-02", "amount": -12.0, "description": "ACME WIDGETS" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, summary) = send(&app, Method::POST, "/api/transactions/recategorize", Some(json!({}))).await;
    assert_eq!(summary["data"]["total_processed"], 1);
    assert_eq!(summary["data"]["updated"], 0);

    let hobbies = category_id(&state, "Hobbies");
    send(
        &app,
        Method::POST,
        "/api/rules",
        Some(json!({ "pattern": "acme", "category_id": hobbies })),
    )
    .await;

    let (status, summary) = send(&app, Method::POST, "/api/transactions/recategorize", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["data"]["updated"], 1);
    assert_eq!(summary["data"]["unchanged"], 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_recategorize_by_category_alongside_other_requests() {
    let (app, state) = app();
    let gas = category_id(&state, "Gas");
    let hobbies = category_id(&state, "Hobbies");

    for (date, description) in [("2024-06-01", "ACME WIDGETS"), ("2024-06-02", "CORNER MARKET")] {
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/transactions",
            Some(json!({ "date": date, "amount": -3.0, "description": description, "category_id": gas })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    send(
        &app,
        Method::POST,
        "/api/rules",
        Some(json!({ "pattern": "acme", "category_id": hobbies })),
    )
    .await;

    let (recategorized, health) = tokio::join!(
        send(
            &app,
            Method::POST,
            "/api/transactions/recategorize",
            Some(json!({ "category_id": gas })),
        ),
        send(&app, Method::GET, "/api/health", None),
    );
    assert_eq!(health.0, StatusCode::OK);
    let (status, summary) = recategorized;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["data"]["total_processed"], 2);
    assert_eq!(summary["data"]["updated"], 2);

    let (_, in_hobbies) = send(
        &app,
        Method::GET,
        &format!("/api/transactions?category_id={}", hobbies),
        None,
    )
    .await;
    assert_eq!(in_hobbies["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_ml_endpoints() {
    let dir = TempDir::new().unwrap();
    let lexicon = Lexicon::new(vec![
        LexiconGroup {
            categories: &["Coffee Shops"],
            merchants: &["starbucks", "dunkin donuts", "peets coffee", "dutch bros"],
        },
        LexiconGroup {
            categories: &["Gas"],
            merchants: &["shell oil", "chevron station", "exxon mobil", "valero"],
        },
        LexiconGroup {
            categories: &["Groceries"],
            merchants: &["kroger", "safeway", "trader joes", "whole foods"],
        },
    ]);
    let (app, _) = app_with(ModelStore::new(dir.path()).with_lexicon(lexicon));

    let (_, status) = send(&app, Method::GET, "/api/ml/status", None).await;
    assert_eq!(status["data"]["is_trained"], false);

    let (code, trained) = send(&app, Method::POST, "/api/ml/train", None).await;
    assert_eq!(code, StatusCode::OK, "{}", trained);
    assert_eq!(trained["success"], true);
    assert_eq!(trained["data"]["category_count"], 3);
    assert!(trained["data"]["report"]["classes"].is_array());

    let (_, status) = send(&app, Method::GET, "/api/ml/status", None).await;
    assert_eq!(status["data"]["is_trained"], true);
    assert_eq!(status["data"]["category_count"], 3);

    let (code, prediction) = send(
        &app,
        Method::POST,
        "/api/ml/predict",
        Some(json!({ "merchant": "KROGER #221", "confidence_threshold": 0.0 })),
    )
    .await;
    assert_eq!(code, StatusCode::OK);
    let confidence = prediction["data"]["confidence"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));
    assert!(prediction["data"]["category_id"].is_i64());

    let (code, _) = send(&app, Method::POST, "/api/ml/predict", Some(json!({}))).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_training_without_data_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app_with(ModelStore::new(dir.path()).with_lexicon(Lexicon::empty()));

    let (code, body) = send(&app, Method::POST, "/api/ml/train", None).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());

    let (_, status) = send(&app, Method::GET, "/api/ml/status", None).await;
    assert_eq!(status["data"]["is_trained"], false);
}
