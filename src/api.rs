//! REST routes for operators and collaborators

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::assignment::{Invite, LifecycleState, NewInvite, SendReport, UnitStatus};
use crate::error::{AppError, Result};
use crate::models::{Contact, PartnerRole, ResponsibilityMode, ResponsibilityUnit};
use crate::AppState;

/// All routes, websocket wizard included
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/passports/:passport_id/invites",
            get(list_invites).post(create_invite),
        )
        .route(
            "/passports/:passport_id/invites/send-pending",
            post(send_pending),
        )
        .route("/passports/:passport_id/availability", get(availability))
        .route("/passports/:passport_id/wizard", get(crate::websocket::handler))
        .route("/invites/:invite_id", get(get_invite).delete(remove_invite))
        .route("/invites/:invite_id/notify", post(notify_invite))
        .route("/contribute/:token", get(contribution))
        .route("/contribute/:token/submit", post(submit_contribution))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Invite as shown to operators, with its collaborator link
#[derive(Debug, Serialize, Deserialize)]
pub struct InviteResponse {
    #[serde(flatten)]
    pub invite: Invite,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_error: Option<String>,
}

impl InviteResponse {
    fn new(state: &AppState, invite: Invite) -> Self {
        Self {
            link: state.lifecycle.link(&invite),
            invite,
            notification_error: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateInviteRequest {
    pub role: String,
    #[serde(flatten)]
    pub contact: Contact,
    pub mode: ResponsibilityMode,
    pub units: Vec<ResponsibilityUnit>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Send the invitation right away
    #[serde(default)]
    pub notify: bool,
}

async fn list_invites(
    State(state): State<Arc<AppState>>,
    Path(passport_id): Path<Uuid>,
) -> Result<Json<Vec<InviteResponse>>> {
    let invites = state.lifecycle.list(passport_id).await?;
    Ok(Json(
        invites
            .into_iter()
            .map(|invite| InviteResponse::new(&state, invite))
            .collect(),
    ))
}

async fn create_invite(
    State(state): State<Arc<AppState>>,
    Path(passport_id): Path<Uuid>,
    Json(request): Json<CreateInviteRequest>,
) -> Result<impl IntoResponse> {
    let role: PartnerRole = request.role.parse().map_err(AppError::Validation)?;
    let invite = state
        .lifecycle
        .create(
            passport_id,
            NewInvite {
                role,
                contact: request.contact,
                mode: request.mode,
                units: request.units,
                idempotency_key: request.idempotency_key,
            },
        )
        .await?;

    let mut response = InviteResponse::new(&state, invite);
    if request.notify && response.invite.state == LifecycleState::Saved {
        match state
            .lifecycle
            .notify(response.invite.id, state.dispatcher.as_ref())
            .await
        {
            Ok(invite) => response.invite = invite,
            Err(e) => response.notification_error = Some(e.to_string()),
        }
    }

    Ok((StatusCode::CREATED, Json(response)))
}

async fn send_pending(
    State(state): State<Arc<AppState>>,
    Path(passport_id): Path<Uuid>,
) -> Result<Json<SendReport>> {
    let report = state
        .lifecycle
        .send_pending(passport_id, state.dispatcher.as_ref())
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    #[serde(default = "default_mode")]
    pub mode: ResponsibilityMode,
    #[serde(default)]
    pub role: Option<String>,
}

fn default_mode() -> ResponsibilityMode {
    ResponsibilityMode::Contribute
}

async fn availability(
    State(state): State<Arc<AppState>>,
    Path(passport_id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Vec<UnitStatus>>> {
    let role = query
        .role
        .filter(|r| !r.trim().is_empty())
        .map(|r| r.parse::<PartnerRole>())
        .transpose()
        .map_err(AppError::Validation)?;
    let statuses = state
        .lifecycle
        .availability(passport_id, role, query.mode)
        .await?;
    Ok(Json(statuses))
}

async fn get_invite(
    State(state): State<Arc<AppState>>,
    Path(invite_id): Path<Uuid>,
) -> Result<Json<InviteResponse>> {
    let invite = state.lifecycle.get(invite_id).await?;
    Ok(Json(InviteResponse::new(&state, invite)))
}

async fn remove_invite(
    State(state): State<Arc<AppState>>,
    Path(invite_id): Path<Uuid>,
) -> Result<Json<InviteResponse>> {
    let invite = state.lifecycle.remove(invite_id).await?;
    Ok(Json(InviteResponse::new(&state, invite)))
}

async fn notify_invite(
    State(state): State<Arc<AppState>>,
    Path(invite_id): Path<Uuid>,
) -> Result<Json<InviteResponse>> {
    let invite = state
        .lifecycle
        .notify(invite_id, state.dispatcher.as_ref())
        .await?;
    Ok(Json(InviteResponse::new(&state, invite)))
}

/// What a collaborator sees behind their link
#[derive(Debug, Serialize, Deserialize)]
pub struct ContributionView {
    pub invite_id: Uuid,
    pub passport_id: Uuid,
    pub role: String,
    pub mode: ResponsibilityMode,
    pub message: String,
    pub units: Vec<ResponsibilityUnit>,
    pub submitted: bool,
    pub expires_at: DateTime<Utc>,
}

impl From<Invite> for ContributionView {
    fn from(invite: Invite) -> Self {
        Self {
            invite_id: invite.id,
            passport_id: invite.passport_id,
            role: invite.role.label().to_string(),
            mode: invite.mode,
            message: invite.message,
            units: invite.units,
            submitted: invite.state == LifecycleState::Fulfilled,
            expires_at: invite.expires_at,
        }
    }
}

async fn contribution(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<ContributionView>> {
    let invite = state.lifecycle.by_token(&token).await?;
    Ok(Json(invite.into()))
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub data: serde_json::Value,
    /// The collaborator attests that the data is correct
    #[serde(default)]
    pub confirmed: bool,
}

async fn submit_contribution(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<ContributionView>> {
    let invite = state
        .lifecycle
        .submit(&token, request.data, request.confirmed)
        .await?;
    Ok(Json(invite.into()))
}
