//! Integration tests for web routes.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use discourse_moderation_bot::config::Config;
use discourse_moderation_bot::discourse::{CandidateTopic, Category};
use discourse_moderation_bot::testing::{FakeForum, FakeSummary, RecordingNotifier, ScriptedModel};
use discourse_moderation_bot::web::signature::sign;
use discourse_moderation_bot::web::{create_app, AppState, API_KEY_HEADER, SIGNATURE_HEADER};
use serde_json::{json, Value};
use tower::ServiceExt;

struct TestApp {
    app: Router,
    forum: Arc<FakeForum>,
    notifier: Arc<RecordingNotifier>,
}

/// Model that approves or rejects content and answers similarity prompts.
fn model(appropriate: bool, similarity: &'static str) -> ScriptedModel {
    ScriptedModel::responding(move |prompt| {
        if prompt.contains("appropriate for a public forum") {
            Ok(if appropriate { "YES fine" } else { "NO harassment of another user" }.to_string())
        } else {
            Ok(similarity.to_string())
        }
    })
}

fn create_test_app(model: ScriptedModel) -> TestApp {
    let forum = Arc::new(
        FakeForum::new()
            .with_categories(vec![Category {
                id: 4,
                name: "General".to_string(),
                slug: Some("general".to_string()),
                description: None,
            }])
            .with_recent_topics(vec![CandidateTopic {
                id: 42,
                title: "Bike lanes".to_string(),
                excerpt: Some("More lanes".to_string()),
            }])
            .with_topic(42, "Bike lanes", "<p>More lanes</p>"),
    );
    let notifier = Arc::new(RecordingNotifier::default());

    let state = AppState::new(
        Arc::new(Config::for_testing()),
        forum.clone(),
        Arc::new(model),
        None,
        Arc::new(FakeSummary::new()),
        notifier.clone(),
    );

    TestApp {
        app: create_app(state),
        forum,
        notifier,
    }
}

fn signed_webhook(body: &str) -> Request<Body> {
    let signature = sign(&Config::for_testing().webhook_secret, body.as_bytes());
    Request::builder()
        .method("POST")
        .uri("/api/webhook")
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, format!("sha256={signature}"))
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let TestApp { app, .. } = create_test_app(model(true, "NO | unique | 0"));

    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature() {
    let TestApp { app, forum, .. } = create_test_app(model(true, "NO | unique | 0"));

    let request = Request::builder()
        .method("POST")
        .uri("/api/webhook")
        .header(SIGNATURE_HEADER, "sha256=deadbeef")
        .body(Body::from(r#"{"post": {"id": 1, "raw": "hello"}}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(forum.call_count(), 0);
}

#[tokio::test]
async fn test_webhook_rejects_missing_signature() {
    let TestApp { app, .. } = create_test_app(model(true, "NO | unique | 0"));

    let request = Request::builder()
        .method("POST")
        .uri("/api/webhook")
        .body(Body::from(r#"{"post": {"id": 1, "raw": "hello"}}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_webhook_missing_post_is_unprocessable() {
    let TestApp { app, .. } = create_test_app(model(true, "NO | unique | 0"));

    let response = app
        .oneshot(signed_webhook(r#"{"invalid_field": "test"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_webhook_malformed_json_is_bad_request() {
    let TestApp { app, .. } = create_test_app(model(true, "NO | unique | 0"));

    let response = app.oneshot(signed_webhook("{not json")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_ignores_deleted_post() {
    let TestApp { app, forum, notifier } = create_test_app(model(false, "NO | unique | 0"));

    let body = json!({
        "post": {"id": 1, "topic_id": 10, "raw": "hello", "deleted_at": "2024-01-01T00:00:00Z"}
    });
    let response = app.oneshot(signed_webhook(&body.to_string())).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ignored");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(forum.call_count(), 0);
    assert!(notifier.messages().is_empty());
}

#[tokio::test]
async fn test_webhook_accepts_and_moderates_in_background() {
    let TestApp { app, notifier, .. } = create_test_app(model(false, "NO | unique | 0"));

    let body = json!({
        "post": {"id": 7, "topic_id": 10, "raw": "you are all idiots", "deleted_at": null}
    });
    let response = app.oneshot(signed_webhook(&body.to_string())).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "processing");

    let mut messages = Vec::new();
    for _ in 0..100 {
        messages = notifier.messages();
        if messages
            .iter()
            .any(|m| m.starts_with("Inappropriate post detected"))
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let report = messages
        .iter()
        .find(|m| m.starts_with("Inappropriate post detected"))
        .expect("moderation report");
    assert!(report.contains("Post ID: 7"));
    assert!(report.contains("harassment"));
}

#[tokio::test]
async fn test_webhook_acknowledges_before_slow_model_answers() {
    let slow = model(false, "NO | unique | 0").delayed(Duration::from_secs(30));
    let TestApp { app, notifier, .. } = create_test_app(slow);

    let body = json!({
        "post": {"id": 8, "topic_id": 11, "title": "Tram line", "raw": "extend the tram"}
    });
    let response = tokio::time::timeout(
        Duration::from_secs(2),
        app.oneshot(signed_webhook(&body.to_string())),
    )
    .await
    .expect("webhook must answer without waiting for the model")
    .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "processing");
    assert!(notifier.messages().is_empty());
}

#[tokio::test]
async fn test_categories_require_api_key() {
    let TestApp { app, .. } = create_test_app(model(true, "NO | unique | 0"));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/categories")
                .header(API_KEY_HEADER, "wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/categories")
                .header(API_KEY_HEADER, Config::for_testing().app_api_key)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await[0]["name"], "General");
}

fn create_topic_request(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/topics")
        .header("content-type", "application/json")
        .header(API_KEY_HEADER, Config::for_testing().app_api_key)
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_create_topic_rejects_inappropriate_content() {
    let TestApp { app, forum, .. } = create_test_app(model(false, "NO | unique | 0"));

    let body = json!({"title": "Hello", "content": "rude words", "category_id": 4});
    let response = app.oneshot(create_topic_request(&body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let detail = json_body(response).await["detail"].as_str().unwrap().to_string();
    assert!(detail.starts_with("Inappropriate content"));
    assert!(forum.created_topics().is_empty());
}

#[tokio::test]
async fn test_create_topic_rejects_duplicate() {
    let TestApp { app, forum, notifier } = create_test_app(model(true, "YES | same proposal | 42"));

    let body = json!({"title": "Cycle lanes", "content": "we need lanes", "category_id": 4});
    let response = app.oneshot(create_topic_request(&body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let detail = json_body(response).await["detail"].as_str().unwrap().to_string();
    assert!(detail.contains("Similar topic ID: 42"));
    assert!(forum.created_topics().is_empty());
    assert_eq!(notifier.messages().len(), 1);
}

#[tokio::test]
async fn test_create_topic_success() {
    let TestApp { app, forum, .. } = create_test_app(model(true, "NO | unique | 0"));

    let body = json!({"title": "Tram line", "content": "extend the tram", "category_id": 4});
    let response = app.oneshot(create_topic_request(&body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(json_body(response).await["topic_id"].is_i64());
    assert_eq!(forum.created_topics().len(), 1);
}
