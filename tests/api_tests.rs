//! API integration tests

use axum::body::Body;
use axum::Router;
use passport_assign::assignment::{LifecycleConfig, LogDispatcher};
use passport_assign::schema::{Block, ContentSchema, Field, StaticSchemaProvider};
use passport_assign::{api, store, AppState};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

fn materials_schema() -> ContentSchema {
    ContentSchema::new(
        "textile-v1",
        vec![
            Block::new("identity", 0)
                .with_field(Field::new("gtin", "GTIN"))
                .not_delegable(),
            Block::new("materials", 1)
                .with_field(Field::new("composition", "Composition"))
                .with_field(Field::repeatable(
                    "certificates",
                    "Certificates",
                    ["cert-1", "cert-2"],
                )),
        ],
    )
}

async fn setup_app_with(config: LifecycleConfig) -> (Router, Uuid) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    store::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let passport_id = Uuid::new_v4();
    let schemas = StaticSchemaProvider::new();
    schemas.insert(passport_id, materials_schema());

    let state = AppState::new(pool, Arc::new(schemas), config, Arc::new(LogDispatcher));
    (api::router(state), passport_id)
}

async fn setup_app() -> (Router, Uuid) {
    setup_app_with(LifecycleConfig::default()).await
}

async fn request(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (hyper::StatusCode, Value) {
    let builder = hyper::Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

fn invite_body(mode: &str, units: Value) -> Value {
    json!({
        "role": "Material supplier",
        "email": "Supplier@Example.com",
        "company": "Spinnerei Nord",
        "mode": mode,
        "units": units,
    })
}

fn composition() -> Value {
    json!({"kind": "field", "field_id": "composition", "instance_id": "composition-0"})
}

fn materials() -> Value {
    json!({"kind": "block", "block_id": "materials"})
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = setup_app().await;

    let response = app
        .oneshot(
            hyper::Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), hyper::StatusCode::OK);
}

#[tokio::test]
async fn test_create_invite() {
    let (app, passport_id) = setup_app().await;

    let (status, body) = request(
        &app,
        "POST",
        &format!("/passports/{}/invites", passport_id),
        Some(invite_body("contribute", json!([composition()]))),
    )
    .await;

    assert_eq!(status, hyper::StatusCode::CREATED);
    assert_eq!(body["state"], "saved");
    assert_eq!(body["email"], "supplier@example.com");
    assert_eq!(body["role"], "material_supplier");
    assert!(body["link"].as_str().unwrap().contains("/contribute/"));
    assert!(body.get("token").is_none());
}

#[tokio::test]
async fn test_create_invite_validation_errors() {
    let (app, passport_id) = setup_app().await;
    let uri = format!("/passports/{}/invites", passport_id);

    let mut bad_role = invite_body("contribute", json!([composition()]));
    bad_role["role"] = json!("");
    let mut bad_email = invite_body("contribute", json!([composition()]));
    bad_email["email"] = json!("supplier.example.com");

    let cases = vec![
        bad_role,
        bad_email,
        invite_body("contribute", json!([])),
        invite_body("contribute", json!([materials(), composition()])),
        invite_body("contribute", json!([{"kind": "block", "block_id": "identity"}])),
    ];

    for body in cases {
        let (status, json) = request(&app, "POST", &uri, Some(body)).await;
        assert_eq!(status, hyper::StatusCode::BAD_REQUEST, "{}", json);
        assert_eq!(json["kind"], "validation");
    }
}

#[tokio::test]
async fn test_materials_conflict_over_rest() {
    let (app, passport_id) = setup_app().await;
    let uri = format!("/passports/{}/invites", passport_id);

    let (status, _) = request(
        &app,
        "POST",
        &uri,
        Some(invite_body("contribute", json!([composition()]))),
    )
    .await;
    assert_eq!(status, hyper::StatusCode::CREATED);

    let (status, body) = request(
        &app,
        "POST",
        &uri,
        Some(invite_body("contribute", json!([materials()]))),
    )
    .await;
    assert_eq!(status, hyper::StatusCode::CONFLICT);
    assert_eq!(body["kind"], "conflict");
    assert_eq!(body["units"], json!([composition()]));

    let (status, _) = request(
        &app,
        "POST",
        &uri,
        Some(invite_body(
            "contribute",
            json!([{"kind": "field", "field_id": "certificates", "instance_id": "cert-1"}]),
        )),
    )
    .await;
    assert_eq!(status, hyper::StatusCode::CREATED);

    let (status, body) = request(&app, "GET", &uri, None).await;
    assert_eq!(status, hyper::StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_create_and_notify_immediately() {
    let (app, passport_id) = setup_app().await;

    let mut body = invite_body("review", json!([materials()]));
    body["notify"] = json!(true);
    let (status, body) = request(
        &app,
        "POST",
        &format!("/passports/{}/invites", passport_id),
        Some(body),
    )
    .await;

    assert_eq!(status, hyper::StatusCode::CREATED);
    assert_eq!(body["state"], "notified");
    assert!(body["notified_at"].is_string());
}

#[tokio::test]
async fn test_remove_frees_units() {
    let (app, passport_id) = setup_app().await;
    let uri = format!("/passports/{}/invites", passport_id);

    let (_, created) = request(
        &app,
        "POST",
        &uri,
        Some(invite_body("contribute", json!([materials()]))),
    )
    .await;
    let invite_id = created["id"].as_str().unwrap().to_string();

    let (status, removed) = request(&app, "DELETE", &format!("/invites/{}", invite_id), None).await;
    assert_eq!(status, hyper::StatusCode::OK);
    assert_eq!(removed["state"], "removed");

    // Removing twice is a no-op
    let (status, _) = request(&app, "DELETE", &format!("/invites/{}", invite_id), None).await;
    assert_eq!(status, hyper::StatusCode::OK);

    let (status, _) = request(
        &app,
        "POST",
        &uri,
        Some(invite_body("contribute", json!([composition()]))),
    )
    .await;
    assert_eq!(status, hyper::StatusCode::CREATED);
}

#[tokio::test]
async fn test_unknown_invite_is_not_found() {
    let (app, _) = setup_app().await;
    let (status, body) = request(&app, "GET", &format!("/invites/{}", Uuid::new_v4()), None).await;
    assert_eq!(status, hyper::StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn test_unknown_passport_is_not_found() {
    let (app, _) = setup_app().await;
    let (status, _) = request(
        &app,
        "POST",
        &format!("/passports/{}/invites", Uuid::new_v4()),
        Some(invite_body("contribute", json!([materials()]))),
    )
    .await;
    assert_eq!(status, hyper::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_availability() {
    let (app, passport_id) = setup_app().await;
    request(
        &app,
        "POST",
        &format!("/passports/{}/invites", passport_id),
        Some(invite_body("contribute", json!([composition()]))),
    )
    .await;

    let (status, body) = request(
        &app,
        "GET",
        &format!(
            "/passports/{}/availability?mode=contribute&role=material_supplier",
            passport_id
        ),
        None,
    )
    .await;
    assert_eq!(status, hyper::StatusCode::OK);

    let statuses = body.as_array().unwrap();
    // materials block, composition, two certificates
    assert_eq!(statuses.len(), 4);
    let block = statuses.iter().find(|s| s["unit"] == materials()).unwrap();
    assert_eq!(block["available"], false);
    let composition_status = statuses.iter().find(|s| s["unit"] == composition()).unwrap();
    assert_eq!(composition_status["owner"]["email"], "supplier@example.com");

    let (_, body) = request(
        &app,
        "GET",
        &format!("/passports/{}/availability?mode=review", passport_id),
        None,
    )
    .await;
    assert!(body
        .as_array()
        .unwrap()
        .iter()
        .all(|s| s["available"] == true));

    let (status, _) = request(
        &app,
        "GET",
        &format!("/passports/{}/availability?role=astronaut", passport_id),
        None,
    )
    .await;
    assert_eq!(status, hyper::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_notify_and_send_pending() {
    let (app, passport_id) = setup_app().await;
    let uri = format!("/passports/{}/invites", passport_id);

    let mut ids = Vec::new();
    for _ in 0..3 {
        let (_, body) = request(
            &app,
            "POST",
            &uri,
            Some(invite_body("review", json!([materials()]))),
        )
        .await;
        ids.push(body["id"].as_str().unwrap().to_string());
    }

    let (status, first) = request(&app, "POST", &format!("/invites/{}/notify", ids[0]), None).await;
    assert_eq!(status, hyper::StatusCode::OK);
    assert_eq!(first["state"], "notified");

    // Notifying again keeps the first timestamp
    let (_, again) = request(&app, "POST", &format!("/invites/{}/notify", ids[0]), None).await;
    assert_eq!(again["notified_at"], first["notified_at"]);

    let (status, report) = request(
        &app,
        "POST",
        &format!("/passports/{}/invites/send-pending", passport_id),
        None,
    )
    .await;
    assert_eq!(status, hyper::StatusCode::OK);
    assert_eq!(report["sent"], 2);
    assert_eq!(report["failed"], 0);
}

#[tokio::test]
async fn test_collaborator_flow() {
    let (app, passport_id) = setup_app().await;
    let (_, created) = request(
        &app,
        "POST",
        &format!("/passports/{}/invites", passport_id),
        Some(invite_body("contribute", json!([composition()]))),
    )
    .await;
    let invite_id = created["id"].as_str().unwrap().to_string();
    let link = created["link"].as_str().unwrap();
    let token = link.rsplit('/').next().unwrap().to_string();

    let (status, view) = request(&app, "GET", &format!("/contribute/{}", token), None).await;
    assert_eq!(status, hyper::StatusCode::OK);
    assert_eq!(view["role"], "Material supplier");
    assert_eq!(view["units"], json!([composition()]));
    assert_eq!(view["submitted"], false);

    let submit_uri = format!("/contribute/{}/submit", token);
    let data = json!({"composition": "95% cotton, 5% elastane"});

    let (status, body) = request(
        &app,
        "POST",
        &submit_uri,
        Some(json!({"data": data, "confirmed": false})),
    )
    .await;
    assert_eq!(status, hyper::StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");

    let (status, view) = request(
        &app,
        "POST",
        &submit_uri,
        Some(json!({"data": data, "confirmed": true})),
    )
    .await;
    assert_eq!(status, hyper::StatusCode::OK);
    assert_eq!(view["submitted"], true);

    let (status, body) = request(
        &app,
        "POST",
        &submit_uri,
        Some(json!({"data": data, "confirmed": true})),
    )
    .await;
    assert_eq!(status, hyper::StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "invalid_transition");

    // Submitted data cannot be withdrawn
    let (status, _) = request(&app, "DELETE", &format!("/invites/{}", invite_id), None).await;
    assert_eq!(status, hyper::StatusCode::UNPROCESSABLE_ENTITY);

    let (_, invite) = request(&app, "GET", &format!("/invites/{}", invite_id), None).await;
    assert_eq!(invite["state"], "fulfilled");
    assert_eq!(invite["submission"], data);
}

#[tokio::test]
async fn test_unknown_token_is_not_found() {
    let (app, _) = setup_app().await;
    let (status, _) = request(&app, "GET", "/contribute/does-not-exist", None).await;
    assert_eq!(status, hyper::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_expired_token_is_gone() {
    let (app, passport_id) = setup_app_with(LifecycleConfig {
        invite_ttl: chrono::Duration::seconds(-1),
        ..LifecycleConfig::default()
    })
    .await;
    let (_, created) = request(
        &app,
        "POST",
        &format!("/passports/{}/invites", passport_id),
        Some(invite_body("contribute", json!([composition()]))),
    )
    .await;
    let token = created["link"]
        .as_str()
        .unwrap()
        .rsplit('/')
        .next()
        .unwrap()
        .to_string();

    let (status, body) = request(&app, "GET", &format!("/contribute/{}", token), None).await;
    assert_eq!(status, hyper::StatusCode::GONE);
    assert_eq!(body["kind"], "gone");
}
