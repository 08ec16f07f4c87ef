//! Invitation delivery through a mocked mail relay

use passport_assign::assignment::{
    InviteLifecycle, LifecycleConfig, LifecycleState, NewInvite, WebhookDispatcher,
};
use passport_assign::error::AppError;
use passport_assign::models::{Contact, PartnerRole, ResponsibilityMode, ResponsibilityUnit};
use passport_assign::schema::{Block, ContentSchema, Field, StaticSchemaProvider};
use passport_assign::store::{self, Store};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn setup() -> (InviteLifecycle, Uuid) {
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
    schemas.insert(
        passport_id,
        ContentSchema::new(
            "textile-v1",
            vec![Block::new("materials", 0).with_field(Field::new("composition", "Composition"))],
        ),
    );

    let config = LifecycleConfig {
        public_url: "https://dpp.example.com".to_string(),
        ..LifecycleConfig::default()
    };
    (
        InviteLifecycle::new(Store::new(pool), Arc::new(schemas), config),
        passport_id,
    )
}

fn new_invite(email: &str) -> NewInvite {
    NewInvite {
        role: PartnerRole::MaterialSupplier,
        contact: Contact {
            email: email.to_string(),
            name: Some("Ada".to_string()),
            company: Some("Spinnerei Nord".to_string()),
            message: None,
        },
        mode: ResponsibilityMode::Review,
        units: vec![ResponsibilityUnit::block("materials")],
        idempotency_key: None,
    }
}

#[tokio::test]
async fn test_webhook_delivers_invitation() {
    let mock_server = MockServer::start().await;
    let (lifecycle, passport_id) = setup().await;

    Mock::given(method("POST"))
        .and(path("/invitations"))
        .and(body_partial_json(serde_json::json!({
            "email": "ada@spinnerei.example",
            "company": "Spinnerei Nord",
            "partner_role": "Material supplier",
            "mode": "review",
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dispatcher = WebhookDispatcher::new(format!("{}/invitations", mock_server.uri()));
    let invite = lifecycle
        .create(passport_id, new_invite("ada@spinnerei.example"))
        .await
        .unwrap();

    let notified = lifecycle.notify(invite.id, &dispatcher).await.unwrap();
    assert_eq!(notified.state, LifecycleState::Notified);

    let requests = mock_server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(
        body["link"],
        format!("https://dpp.example.com/contribute/{}", invite.token)
    );
    assert_eq!(body["invite_id"], invite.id.to_string());
}

#[tokio::test]
async fn test_relay_error_keeps_invite_saved() {
    let mock_server = MockServer::start().await;
    let (lifecycle, passport_id) = setup().await;

    Mock::given(method("POST"))
        .and(path("/invitations"))
        .respond_with(ResponseTemplate::new(500).set_body_string("mailbox full"))
        .mount(&mock_server)
        .await;

    let dispatcher = WebhookDispatcher::new(format!("{}/invitations", mock_server.uri()));
    let invite = lifecycle
        .create(passport_id, new_invite("ada@spinnerei.example"))
        .await
        .unwrap();

    match lifecycle.notify(invite.id, &dispatcher).await {
        Err(AppError::Notification(message)) => assert!(message.contains("mailbox full")),
        other => panic!("expected notification error, got {:?}", other),
    }

    let stored = lifecycle.get(invite.id).await.unwrap();
    assert_eq!(stored.state, LifecycleState::Saved);
    assert!(stored.notified_at.is_none());
}

#[tokio::test]
async fn test_send_pending_continues_past_failures() {
    let mock_server = MockServer::start().await;
    let (lifecycle, passport_id) = setup().await;

    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({"email": "bounce@example.com"})))
        .respond_with(ResponseTemplate::new(422))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let dispatcher = WebhookDispatcher::new(mock_server.uri());
    let bounced = lifecycle
        .create(passport_id, new_invite("bounce@example.com"))
        .await
        .unwrap();
    for email in ["a@example.com", "b@example.com"] {
        lifecycle.create(passport_id, new_invite(email)).await.unwrap();
    }

    let report = lifecycle.send_pending(passport_id, &dispatcher).await.unwrap();
    assert_eq!(report.sent, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failed_invites, vec![bounced.id]);

    // A retry only touches what is still pending
    let report = lifecycle.send_pending(passport_id, &dispatcher).await.unwrap();
    assert_eq!((report.sent, report.failed), (0, 1));
}
