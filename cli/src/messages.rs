//! Wizard protocol types as seen by the CLI
//!
//! These mirror the server's websocket messages. Fields the CLI never
//! reads are left out; serde ignores them on the way in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Unit {
    Block { block_id: String },
    Field { field_id: String, instance_id: String },
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Block { block_id } => write!(f, "block:{}", block_id),
            Unit::Field {
                field_id,
                instance_id,
            } => write!(f, "{}/{}", field_id, instance_id),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseUnitError {
    #[error("empty unit")]
    Empty,
    #[error("expected block:<id> or <field>/<instance>, got {0}")]
    Malformed(String),
}

/// `block:materials`, `composition/composition-0` or `field:certificates/cert-1`
impl FromStr for Unit {
    type Err = ParseUnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseUnitError::Empty);
        }
        if let Some(block_id) = s.strip_prefix("block:") {
            if block_id.is_empty() {
                return Err(ParseUnitError::Malformed(s.to_string()));
            }
            return Ok(Unit::Block {
                block_id: block_id.to_string(),
            });
        }
        let field = s.strip_prefix("field:").unwrap_or(s);
        match field.split_once('/') {
            Some((field_id, instance_id)) if !field_id.is_empty() && !instance_id.is_empty() => {
                Ok(Unit::Field {
                    field_id: field_id.to_string(),
                    instance_id: instance_id.to_string(),
                })
            }
            _ => Err(ParseUnitError::Malformed(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WizardState {
    pub passport_id: Uuid,
    pub stage: String,
    pub role: Option<String>,
    pub contact: Option<Contact>,
    pub mode: Option<String>,
    #[serde(default)]
    pub available_modes: Vec<String>,
    #[serde(default)]
    pub selection: Vec<Unit>,
    #[serde(default)]
    pub conflicts: Vec<Unit>,
    pub skipped: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleOption {
    pub role: String,
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Holder {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnitStatus {
    pub unit: Unit,
    pub label: String,
    pub available: bool,
    pub owner: Option<Holder>,
    #[serde(default)]
    pub reviewers: Vec<Holder>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Invite {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub mode: String,
    pub units: Vec<Unit>,
    pub state: String,
    pub notified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WizardView {
    pub state: WizardState,
    pub roles: Vec<RoleOption>,
    #[serde(default)]
    pub units: Vec<UnitStatus>,
    pub committed: Vec<Invite>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentEvent {
    pub event: String,
    pub invite_id: Uuid,
}

/// Messages from client to server
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ChooseRole {
        role: String,
    },
    EnterContact {
        #[serde(flatten)]
        contact: Contact,
    },
    ChooseMode {
        mode: String,
    },
    SelectScope {
        units: Vec<Unit>,
    },
    Back,
    AddAnother,
    Commit {
        notify: bool,
    },
    GetState,
}

/// Messages from server to client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    WizardState {
        view: WizardView,
    },
    Committed {
        invite: Invite,
        #[serde(default)]
        notification_error: Option<String>,
    },
    AssignmentChanged {
        event: AssignmentEvent,
    },
    Error {
        message: String,
        kind: String,
        #[serde(default)]
        units: Vec<Unit>,
    },
}
