//! Invites and their lifecycle states
//!
//! An invite is the persisted grant of responsibility over a set of units.
//! State changes are expressed as methods on [`Invite`] that either apply,
//! report an idempotent no-op, or refuse with a message.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Contact, PartnerRole, ResponsibilityMode, ResponsibilityUnit};

/// Invitation text used when the operator leaves the message empty
pub const DEFAULT_INVITATION_TEXT: &str = "You have been invited to provide selected information \
for a digital product passport.\nYou will only see the content assigned to you.";

/// Lifecycle state of an invite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Being assembled in the wizard, not persisted
    Draft,
    /// Persisted, partner not yet notified
    Saved,
    /// Notification dispatched
    Notified,
    /// Partner submitted; the grant is historical
    Fulfilled,
    /// Withdrawn by an operator; units are free again
    Removed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Draft => "draft",
            LifecycleState::Saved => "saved",
            LifecycleState::Notified => "notified",
            LifecycleState::Fulfilled => "fulfilled",
            LifecycleState::Removed => "removed",
        }
    }

    /// Counts towards exclusivity
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            LifecycleState::Saved | LifecycleState::Notified | LifecycleState::Fulfilled
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Fulfilled | LifecycleState::Removed)
    }
}

impl std::str::FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(LifecycleState::Draft),
            "saved" => Ok(LifecycleState::Saved),
            "notified" => Ok(LifecycleState::Notified),
            "fulfilled" => Ok(LifecycleState::Fulfilled),
            "removed" => Ok(LifecycleState::Removed),
            _ => Err(format!("Invalid lifecycle state: {}", s)),
        }
    }
}

/// Outcome of a permitted lifecycle call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Unchanged,
}

/// Input for creating an invite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvite {
    pub role: PartnerRole,
    pub contact: Contact,
    pub mode: ResponsibilityMode,
    pub units: Vec<ResponsibilityUnit>,
    /// Makes `create` safe to retry after a timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// A delegation grant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invite {
    pub id: Uuid,
    pub passport_id: Uuid,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    pub message: String,
    pub role: PartnerRole,
    pub mode: ResponsibilityMode,
    pub units: Vec<ResponsibilityUnit>,
    pub state: LifecycleState,
    /// Secret part of the collaborator link
    #[serde(skip_serializing, default)]
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission: Option<serde_json::Value>,
    pub expires_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fulfilled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invite {
    /// Create a draft; units are deduplicated in their given order
    pub fn draft(passport_id: Uuid, new: NewInvite, ttl: Duration) -> Self {
        let now = Utc::now();
        let mut units: Vec<ResponsibilityUnit> = Vec::with_capacity(new.units.len());
        for unit in new.units {
            if !units.contains(&unit) {
                units.push(unit);
            }
        }
        Self {
            id: Uuid::new_v4(),
            passport_id,
            email: new.contact.email,
            name: new.contact.name,
            company: new.contact.company,
            message: new
                .contact
                .message
                .unwrap_or_else(|| DEFAULT_INVITATION_TEXT.to_string()),
            role: new.role,
            mode: new.mode,
            units,
            state: LifecycleState::Draft,
            token: Uuid::new_v4().simple().to_string(),
            idempotency_key: new.idempotency_key,
            submission: None,
            expires_at: now + ttl,
            notified_at: None,
            fulfilled_at: None,
            removed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_block_level(&self) -> bool {
        self.units.first().map(|u| u.is_block()).unwrap_or(false)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Persisting a draft (Draft -> Saved)
    pub fn save(&mut self) -> Result<Transition, String> {
        match self.state {
            LifecycleState::Draft => {
                self.state = LifecycleState::Saved;
                self.updated_at = Utc::now();
                Ok(Transition::Applied)
            }
            LifecycleState::Saved => Ok(Transition::Unchanged),
            other => Err(format!("Cannot save invite with state: {}", other.as_str())),
        }
    }

    /// Saved -> Notified; a repeat call keeps the first timestamp
    pub fn mark_notified(&mut self, at: DateTime<Utc>) -> Result<Transition, String> {
        match self.state {
            LifecycleState::Saved => {
                self.state = LifecycleState::Notified;
                self.notified_at = Some(at);
                self.updated_at = at;
                Ok(Transition::Applied)
            }
            LifecycleState::Notified => Ok(Transition::Unchanged),
            other => Err(format!(
                "Cannot mark invite as notified with state: {}",
                other.as_str()
            )),
        }
    }

    /// Saved | Notified -> Fulfilled with the partner's submission
    pub fn mark_fulfilled(
        &mut self,
        submission: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<Transition, String> {
        match self.state {
            LifecycleState::Saved | LifecycleState::Notified => {
                self.state = LifecycleState::Fulfilled;
                self.submission = Some(submission);
                self.fulfilled_at = Some(at);
                self.updated_at = at;
                Ok(Transition::Applied)
            }
            other => Err(format!(
                "Cannot fulfil invite with state: {}",
                other.as_str()
            )),
        }
    }

    /// Draft | Saved | Notified -> Removed; a repeat call is a no-op
    pub fn remove(&mut self, at: DateTime<Utc>) -> Result<Transition, String> {
        match self.state {
            LifecycleState::Draft | LifecycleState::Saved | LifecycleState::Notified => {
                self.state = LifecycleState::Removed;
                self.removed_at = Some(at);
                self.updated_at = at;
                Ok(Transition::Applied)
            }
            LifecycleState::Removed => Ok(Transition::Unchanged),
            LifecycleState::Fulfilled => {
                Err("Cannot remove an invite whose data was already submitted".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_invite(units: Vec<ResponsibilityUnit>) -> NewInvite {
        NewInvite {
            role: PartnerRole::MaterialSupplier,
            contact: Contact::new("supplier@example.com"),
            mode: ResponsibilityMode::Contribute,
            units,
            idempotency_key: None,
        }
    }

    fn saved_invite() -> Invite {
        let mut invite = Invite::draft(
            Uuid::new_v4(),
            new_invite(vec![ResponsibilityUnit::block("materials")]),
            Duration::days(14),
        );
        invite.save().unwrap();
        invite
    }

    #[test]
    fn test_state_round_trip_str() {
        for state in [
            LifecycleState::Draft,
            LifecycleState::Saved,
            LifecycleState::Notified,
            LifecycleState::Fulfilled,
            LifecycleState::Removed,
        ] {
            assert_eq!(state.as_str().parse::<LifecycleState>().unwrap(), state);
        }
        assert!("pending".parse::<LifecycleState>().is_err());
    }

    #[test]
    fn test_active_states() {
        assert!(!LifecycleState::Draft.is_active());
        assert!(LifecycleState::Saved.is_active());
        assert!(LifecycleState::Notified.is_active());
        assert!(LifecycleState::Fulfilled.is_active());
        assert!(!LifecycleState::Removed.is_active());
    }

    #[test]
    fn test_draft_defaults() {
        let invite = Invite::draft(
            Uuid::new_v4(),
            new_invite(vec![
                ResponsibilityUnit::field("composition", "composition-0"),
                ResponsibilityUnit::field("composition", "composition-0"),
            ]),
            Duration::days(14),
        );

        assert_eq!(invite.state, LifecycleState::Draft);
        assert_eq!(invite.units.len(), 1);
        assert_eq!(invite.message, DEFAULT_INVITATION_TEXT);
        assert!(invite.notified_at.is_none());
        assert!(!invite.is_block_level());
        assert_eq!(invite.token.len(), 32);
        assert!(invite.expires_at > invite.created_at);
    }

    #[test]
    fn test_save_only_from_draft() {
        let mut invite = saved_invite();
        assert_eq!(invite.state, LifecycleState::Saved);
        assert_eq!(invite.save().unwrap(), Transition::Unchanged);

        invite.mark_notified(Utc::now()).unwrap();
        assert!(invite.save().is_err());
    }

    #[test]
    fn test_mark_notified_sets_timestamp_once() {
        let mut invite = saved_invite();
        let first = Utc::now();
        assert_eq!(invite.mark_notified(first).unwrap(), Transition::Applied);
        assert_eq!(invite.notified_at, Some(first));

        let later = first + Duration::minutes(5);
        assert_eq!(invite.mark_notified(later).unwrap(), Transition::Unchanged);
        assert_eq!(invite.notified_at, Some(first));
    }

    #[test]
    fn test_mark_notified_refused_from_draft_and_terminal_states() {
        let mut draft = Invite::draft(
            Uuid::new_v4(),
            new_invite(vec![ResponsibilityUnit::block("materials")]),
            Duration::days(1),
        );
        assert!(draft.mark_notified(Utc::now()).is_err());

        let mut removed = saved_invite();
        removed.remove(Utc::now()).unwrap();
        assert!(removed.mark_notified(Utc::now()).is_err());
        assert!(removed.notified_at.is_none());

        let mut fulfilled = saved_invite();
        fulfilled
            .mark_fulfilled(serde_json::json!({}), Utc::now())
            .unwrap();
        assert!(fulfilled.mark_notified(Utc::now()).is_err());
    }

    #[test]
    fn test_fulfil_from_saved_or_notified() {
        let mut saved = saved_invite();
        saved
            .mark_fulfilled(serde_json::json!({"composition": "100% cotton"}), Utc::now())
            .unwrap();
        assert_eq!(saved.state, LifecycleState::Fulfilled);
        assert_eq!(
            saved.submission,
            Some(serde_json::json!({"composition": "100% cotton"}))
        );

        let mut notified = saved_invite();
        notified.mark_notified(Utc::now()).unwrap();
        notified
            .mark_fulfilled(serde_json::json!(null), Utc::now())
            .unwrap();
        assert_eq!(notified.state, LifecycleState::Fulfilled);
        assert!(notified.notified_at.is_some());
    }

    #[test]
    fn test_fulfilled_is_terminal() {
        let mut invite = saved_invite();
        invite
            .mark_fulfilled(serde_json::json!({}), Utc::now())
            .unwrap();

        assert!(invite
            .mark_fulfilled(serde_json::json!({}), Utc::now())
            .is_err());
        assert!(invite.remove(Utc::now()).is_err());
        assert!(invite.save().is_err());
        assert_eq!(invite.state, LifecycleState::Fulfilled);
    }

    #[test]
    fn test_removed_is_terminal() {
        let mut invite = saved_invite();
        assert_eq!(invite.remove(Utc::now()).unwrap(), Transition::Applied);
        assert_eq!(invite.remove(Utc::now()).unwrap(), Transition::Unchanged);
        assert!(invite
            .mark_fulfilled(serde_json::json!({}), Utc::now())
            .is_err());
        assert!(invite.save().is_err());
        assert_eq!(invite.state, LifecycleState::Removed);
    }

    #[test]
    fn test_expiry() {
        let invite = saved_invite();
        assert!(!invite.is_expired(Utc::now()));
        assert!(invite.is_expired(invite.expires_at + Duration::seconds(1)));
    }

    #[test]
    fn test_token_not_serialized() {
        let invite = saved_invite();
        let json = serde_json::to_value(&invite).unwrap();
        assert!(json.get("token").is_none());
        assert_eq!(json["state"], "saved");
        assert_eq!(json["mode"], "contribute");
    }
}
