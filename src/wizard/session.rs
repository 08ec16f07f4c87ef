//! Wizard session controller
//!
//! Drives one operator's [`WizardState`] against the live lifecycle: every
//! event is applied to a fresh snapshot and commits go through the lifecycle's
//! checked create.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::state::{WizardEvent, WizardStage, WizardState};
use crate::assignment::{Invite, InviteLifecycle, NotificationDispatcher, UnitStatus};
use crate::error::{AppError, Result};
use crate::models::PartnerRole;

/// Role choice as offered to operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleOption {
    pub role: PartnerRole,
    pub label: String,
}

/// What an operator sees for the current state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WizardView {
    pub state: WizardState,
    pub roles: Vec<RoleOption>,
    /// Selectable units, during scope selection and on the summary
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<UnitStatus>,
    /// Invites created in this session
    pub committed: Vec<Invite>,
}

/// Result of a commit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub invite: Invite,
    /// Set when the invite was saved but the notification could not be sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_error: Option<String>,
}

pub struct WizardSession {
    lifecycle: Arc<InviteLifecycle>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    state: WizardState,
}

impl WizardSession {
    pub fn new(
        lifecycle: Arc<InviteLifecycle>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        passport_id: Uuid,
    ) -> Self {
        Self {
            lifecycle,
            dispatcher,
            state: WizardState::new(passport_id),
        }
    }

    pub fn state(&self) -> &WizardState {
        &self.state
    }

    pub fn passport_id(&self) -> Uuid {
        self.state.passport_id
    }

    /// Apply an operator event against the current grants
    pub async fn handle(&mut self, event: WizardEvent) -> Result<()> {
        let snapshot = self.lifecycle.snapshot(self.passport_id()).await?;
        self.state = self.state.apply(event, &snapshot)?;
        tracing::debug!(
            "Wizard for passport {} now at {}",
            self.passport_id(),
            self.state.stage.as_str()
        );
        Ok(())
    }

    /// Create the drafted invite and, when asked, notify the partner.
    /// A retried commit of the same draft returns the same invite.
    pub async fn commit(&mut self, notify: bool) -> Result<CommitOutcome> {
        let draft = self.state.draft()?;
        let passport_id = self.passport_id();

        let invite = match self.lifecycle.create(passport_id, draft).await {
            Ok(invite) => invite,
            Err(AppError::Conflict { message, units }) => {
                let snapshot = self.lifecycle.snapshot(passport_id).await?;
                self.state = self.state.on_conflict(&units, &snapshot);
                return Err(AppError::Conflict { message, units });
            }
            Err(e) => return Err(e),
        };
        self.state = self.state.on_committed(invite.id);

        if !notify {
            return Ok(CommitOutcome {
                invite,
                notification_error: None,
            });
        }

        match self.lifecycle.notify(invite.id, self.dispatcher.as_ref()).await {
            Ok(invite) => Ok(CommitOutcome {
                invite,
                notification_error: None,
            }),
            Err(e) => {
                tracing::warn!("Invite {} saved but not sent: {}", invite.id, e);
                Ok(CommitOutcome {
                    invite,
                    notification_error: Some(e.to_string()),
                })
            }
        }
    }

    /// Current state plus everything needed to render it
    pub async fn view(&self) -> Result<WizardView> {
        let snapshot = self.lifecycle.snapshot(self.passport_id()).await?;

        let units = match (self.state.stage, self.state.role, self.state.mode) {
            (WizardStage::ScopeSelection | WizardStage::Summary, Some(role), Some(mode)) => {
                snapshot.resolver().unit_statuses(Some(role), mode)
            }
            _ => Vec::new(),
        };

        let mut committed = Vec::with_capacity(self.state.committed.len());
        for invite_id in &self.state.committed {
            committed.push(self.lifecycle.get(*invite_id).await?);
        }

        Ok(WizardView {
            state: self.state.clone(),
            roles: PartnerRole::ALL
                .into_iter()
                .map(|role| RoleOption {
                    role,
                    label: role.label().to_string(),
                })
                .collect(),
            units,
            committed,
        })
    }
}
