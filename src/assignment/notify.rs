//! Notification dispatch for saved invites
//!
//! The engine never sends mail itself. A [`NotificationDispatcher`] is handed
//! the invite and its collaborator link; delivery failures come back as
//! `AppError::Notification` and leave the invite `Saved`.

use futures::future::BoxFuture;
use reqwest::Client;
use serde::Serialize;
use uuid::Uuid;

use super::invite::Invite;
use crate::error::{AppError, Result};

/// Collaborator link for an invite token
pub fn invite_link(public_url: &str, token: &str) -> String {
    format!("{}/contribute/{}", public_url.trim_end_matches('/'), token)
}

/// Delivers invitation messages
pub trait NotificationDispatcher: Send + Sync {
    fn send<'a>(&'a self, invite: &'a Invite, link: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Writes invitations to the log only
#[derive(Debug, Default, Clone)]
pub struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    fn send<'a>(&'a self, invite: &'a Invite, link: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            tracing::info!(
                invite_id = %invite.id,
                email = %invite.email,
                role = invite.role.label(),
                mode = invite.mode.as_str(),
                "Invitation ready: {}",
                link
            );
            Ok(())
        })
    }
}

/// JSON body posted by [`WebhookDispatcher`]
#[derive(Debug, Serialize)]
pub struct InvitationPayload<'a> {
    pub invite_id: Uuid,
    pub passport_id: Uuid,
    pub email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<&'a str>,
    pub partner_role: &'static str,
    pub mode: &'static str,
    pub message: &'a str,
    pub link: &'a str,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl<'a> InvitationPayload<'a> {
    pub fn new(invite: &'a Invite, link: &'a str) -> Self {
        Self {
            invite_id: invite.id,
            passport_id: invite.passport_id,
            email: &invite.email,
            name: invite.name.as_deref(),
            company: invite.company.as_deref(),
            partner_role: invite.role.label(),
            mode: invite.mode.as_str(),
            message: &invite.message,
            link,
            expires_at: invite.expires_at,
        }
    }
}

/// Posts invitations to a mail relay endpoint
pub struct WebhookDispatcher {
    client: Client,
    url: String,
}

impl WebhookDispatcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    async fn post(&self, invite: &Invite, link: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&InvitationPayload::new(invite, link))
            .send()
            .await
            .map_err(|e| AppError::Notification(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Notification(format!(
                "Failed to deliver invitation to {}: {} - {}",
                invite.email, status, text
            )));
        }

        tracing::debug!("Invitation {} delivered to relay", invite.id);
        Ok(())
    }
}

impl NotificationDispatcher for WebhookDispatcher {
    fn send<'a>(&'a self, invite: &'a Invite, link: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.post(invite, link))
    }
}
