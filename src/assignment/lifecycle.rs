//! Invite lifecycle
//!
//! The lifecycle owns every write to invites:
//! - creating an invite after validating its units against the schema and the
//!   current grants, inside one store transaction
//! - moving invites through notified, fulfilled and removed
//! - dispatching notifications, one at a time or as a batched pass
//! - collaborator lookup by link token
//! - broadcasting [`AssignmentEvent`]s to live wizard sessions

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::invite::{Invite, LifecycleState, NewInvite, Transition};
use super::notify::{invite_link, NotificationDispatcher};
use super::resolver::{AssignmentIndex, AssignmentResolver, AssignmentSnapshot, ResolverPolicy, UnitStatus};
use crate::error::{AppError, Result};
use crate::models::{is_homogeneous, PartnerRole, ResponsibilityMode};
use crate::schema::SchemaProvider;
use crate::store::Store;

/// Events emitted when grants change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AssignmentEvent {
    InviteCreated { passport_id: Uuid, invite_id: Uuid },
    InviteNotified { passport_id: Uuid, invite_id: Uuid },
    InviteFulfilled { passport_id: Uuid, invite_id: Uuid },
    InviteRemoved { passport_id: Uuid, invite_id: Uuid },
}

impl AssignmentEvent {
    pub fn passport_id(&self) -> Uuid {
        match self {
            AssignmentEvent::InviteCreated { passport_id, .. }
            | AssignmentEvent::InviteNotified { passport_id, .. }
            | AssignmentEvent::InviteFulfilled { passport_id, .. }
            | AssignmentEvent::InviteRemoved { passport_id, .. } => *passport_id,
        }
    }

    pub fn invite_id(&self) -> Uuid {
        match self {
            AssignmentEvent::InviteCreated { invite_id, .. }
            | AssignmentEvent::InviteNotified { invite_id, .. }
            | AssignmentEvent::InviteFulfilled { invite_id, .. }
            | AssignmentEvent::InviteRemoved { invite_id, .. } => *invite_id,
        }
    }
}

/// Lifecycle settings
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub policy: ResolverPolicy,
    /// How long a collaborator link stays valid
    pub invite_ttl: Duration,
    /// Base URL collaborator links are built on
    pub public_url: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            policy: ResolverPolicy::default(),
            invite_ttl: Duration::days(14),
            public_url: "http://localhost:3000".to_string(),
        }
    }
}

/// Outcome of a batched notification pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReport {
    pub sent: usize,
    pub failed: usize,
    /// Invites that stayed `Saved` because dispatch failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_invites: Vec<Uuid>,
}

pub struct InviteLifecycle {
    store: Store,
    schemas: Arc<dyn SchemaProvider>,
    config: LifecycleConfig,
    event_tx: broadcast::Sender<AssignmentEvent>,
}

impl InviteLifecycle {
    pub fn new(store: Store, schemas: Arc<dyn SchemaProvider>, config: LifecycleConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            store,
            schemas,
            config,
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AssignmentEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn link(&self, invite: &Invite) -> String {
        invite_link(&self.config.public_url, &invite.token)
    }

    /// Schema and active grants of a passport, read now
    pub async fn snapshot(&self, passport_id: Uuid) -> Result<AssignmentSnapshot> {
        let schema = self.schemas.get_schema(passport_id).await?;
        let active = self.store.list_active_invites(passport_id).await?;
        Ok(AssignmentSnapshot::new(
            schema,
            AssignmentIndex::from_invites(active),
            self.config.policy,
        ))
    }

    /// Availability of every unit a role could be offered
    pub async fn availability(
        &self,
        passport_id: Uuid,
        role: Option<PartnerRole>,
        mode: ResponsibilityMode,
    ) -> Result<Vec<UnitStatus>> {
        let snapshot = self.snapshot(passport_id).await?;
        Ok(snapshot.resolver().unit_statuses(role, mode))
    }

    /// Validate and persist a new invite as `Saved`. A retry carrying the
    /// same idempotency key returns the invite created the first time.
    pub async fn create(&self, passport_id: Uuid, new: NewInvite) -> Result<Invite> {
        if new.units.is_empty() {
            return Err(AppError::Validation(
                "Select at least one block or field".to_string(),
            ));
        }
        if !is_homogeneous(&new.units) {
            return Err(AppError::Validation(
                "An invite covers either whole blocks or individual fields, not both".to_string(),
            ));
        }
        let contact = new.contact.normalized().map_err(AppError::Validation)?;
        let idempotency_key = new
            .idempotency_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        let schema = self.schemas.get_schema(passport_id).await?;
        for unit in &new.units {
            schema.check_unit(unit, new.role)?;
        }

        let mut invite = Invite::draft(
            passport_id,
            NewInvite {
                contact,
                idempotency_key,
                ..new
            },
            self.config.invite_ttl,
        );
        invite.save().map_err(AppError::Internal)?;

        let units = invite.units.clone();
        let mode = invite.mode;
        let policy = self.config.policy;
        let outcome = self
            .store
            .create_invite_checked(invite, |active| {
                let index = AssignmentIndex::from_invites(active.iter().cloned());
                let resolver = AssignmentResolver::new(&schema, &index, policy);
                let taken = resolver.unavailable_units(&units, mode);
                if taken.is_empty() {
                    Ok(())
                } else {
                    Err(AppError::conflict(taken))
                }
            })
            .await
            .map_err(|e| {
                if let AppError::Conflict { message, .. } = &e {
                    tracing::info!("Invite for passport {} refused: {}", passport_id, message);
                }
                e
            })?;

        let created = outcome.is_created();
        let invite = outcome.into_invite();
        if created {
            tracing::info!(
                "Created {} invite {} for {} on passport {}",
                invite.mode.as_str(),
                invite.id,
                invite.email,
                passport_id
            );
            let _ = self.event_tx.send(AssignmentEvent::InviteCreated {
                passport_id,
                invite_id: invite.id,
            });
        }
        Ok(invite)
    }

    pub async fn get(&self, invite_id: Uuid) -> Result<Invite> {
        self.store.get_invite(invite_id).await
    }

    pub async fn list(&self, passport_id: Uuid) -> Result<Vec<Invite>> {
        self.store.list_invites(passport_id).await
    }

    pub async fn mark_notified(&self, invite_id: Uuid) -> Result<Invite> {
        let (invite, outcome) = self
            .store
            .transition(invite_id, |i| i.mark_notified(Utc::now()))
            .await?;
        if outcome == Transition::Applied {
            let _ = self.event_tx.send(AssignmentEvent::InviteNotified {
                passport_id: invite.passport_id,
                invite_id,
            });
        }
        Ok(invite)
    }

    pub async fn mark_fulfilled(
        &self,
        invite_id: Uuid,
        submission: serde_json::Value,
    ) -> Result<Invite> {
        let (invite, _) = self
            .store
            .transition(invite_id, |i| i.mark_fulfilled(submission, Utc::now()))
            .await?;
        tracing::info!("Invite {} fulfilled", invite_id);
        let _ = self.event_tx.send(AssignmentEvent::InviteFulfilled {
            passport_id: invite.passport_id,
            invite_id,
        });
        Ok(invite)
    }

    /// Withdraw an invite, freeing its units
    pub async fn remove(&self, invite_id: Uuid) -> Result<Invite> {
        let (invite, outcome) = self
            .store
            .transition(invite_id, |i| i.remove(Utc::now()))
            .await?;
        if outcome == Transition::Applied {
            tracing::info!("Invite {} removed", invite_id);
            let _ = self.event_tx.send(AssignmentEvent::InviteRemoved {
                passport_id: invite.passport_id,
                invite_id,
            });
        }
        Ok(invite)
    }

    /// Dispatch the invitation, then mark the invite notified. A dispatch
    /// failure leaves it `Saved` and is returned to the caller.
    pub async fn notify(
        &self,
        invite_id: Uuid,
        dispatcher: &dyn NotificationDispatcher,
    ) -> Result<Invite> {
        let invite = self.store.get_invite(invite_id).await?;
        match invite.state {
            LifecycleState::Saved => {}
            LifecycleState::Notified => return Ok(invite),
            other => {
                return Err(AppError::InvalidTransition(format!(
                    "Cannot notify invite with state: {}",
                    other.as_str()
                )))
            }
        }

        let link = self.link(&invite);
        if let Err(e) = dispatcher.send(&invite, &link).await {
            tracing::warn!("Failed to notify {} for invite {}: {}", invite.email, invite.id, e);
            return Err(e);
        }

        match self.mark_notified(invite_id).await {
            Err(AppError::InvalidTransition(_)) => {
                // Withdrawn while the invitation was in flight; its link no longer resolves
                let current = self.store.get_invite(invite_id).await?;
                tracing::warn!(
                    "Invitation to {} went out after invite {} became {}",
                    invite.email,
                    invite_id,
                    current.state.as_str()
                );
                Err(AppError::InvalidTransition(format!(
                    "Invite was {} while its invitation was being sent",
                    current.state.as_str()
                )))
            }
            other => other,
        }
    }

    /// Notify every `Saved` invite of a passport. Failures are counted and
    /// the pass carries on.
    pub async fn send_pending(
        &self,
        passport_id: Uuid,
        dispatcher: &dyn NotificationDispatcher,
    ) -> Result<SendReport> {
        let pending = self
            .store
            .list_invites_in_state(passport_id, LifecycleState::Saved)
            .await?;

        let mut report = SendReport::default();
        for invite in pending {
            match self.notify(invite.id, dispatcher).await {
                Ok(_) => report.sent += 1,
                Err(e) => {
                    tracing::error!("Error sending invite {} to {}: {}", invite.id, invite.email, e);
                    report.failed += 1;
                    report.failed_invites.push(invite.id);
                }
            }
        }

        tracing::info!(
            "Sent {} pending invites for passport {} ({} failed)",
            report.sent,
            passport_id,
            report.failed
        );
        Ok(report)
    }

    /// Collaborator lookup. Unknown tokens and withdrawn invites are not
    /// found; expired links are gone.
    pub async fn by_token(&self, token: &str) -> Result<Invite> {
        let invite = self
            .store
            .get_invite_by_token(token)
            .await?
            .filter(|i| i.is_active())
            .ok_or_else(|| AppError::NotFound("Invitation not found".to_string()))?;

        if invite.is_expired(Utc::now()) {
            return Err(AppError::Gone("This invitation has expired".to_string()));
        }
        Ok(invite)
    }

    /// Collaborator submission through the link token
    pub async fn submit(
        &self,
        token: &str,
        submission: serde_json::Value,
        confirmed: bool,
    ) -> Result<Invite> {
        if !confirmed {
            return Err(AppError::Validation(
                "Please confirm that the submitted data is correct".to_string(),
            ));
        }
        let invite = self.by_token(token).await?;
        self.mark_fulfilled(invite.id, submission).await
    }
}
