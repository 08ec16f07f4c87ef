//! Wizard state machine
//!
//! `RoleSelection -> ContactDetails -> ModeSelection -> ScopeSelection -> Summary`
//!
//! [`WizardState::apply`] takes an operator event and the current assignment
//! snapshot and returns the next state. It never touches the store; commit
//! outcomes are fed back with [`WizardState::on_committed`] and
//! [`WizardState::on_conflict`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assignment::{AssignmentSnapshot, NewInvite};
use crate::error::{AppError, Result};
use crate::models::{is_homogeneous, Contact, PartnerRole, ResponsibilityMode, ResponsibilityUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStage {
    RoleSelection,
    ContactDetails,
    ModeSelection,
    ScopeSelection,
    Summary,
}

impl WizardStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            WizardStage::RoleSelection => "role_selection",
            WizardStage::ContactDetails => "contact_details",
            WizardStage::ModeSelection => "mode_selection",
            WizardStage::ScopeSelection => "scope_selection",
            WizardStage::Summary => "summary",
        }
    }
}

/// Why the wizard jumped straight to the summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No mode has anything left for the chosen role
    RoleExhausted,
    /// The chosen mode ran out of units after it was offered
    ModeUnavailable,
}

/// Operator input
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WizardEvent {
    ChooseRole { role: String },
    EnterContact { contact: Contact },
    ChooseMode { mode: ResponsibilityMode },
    SelectScope { units: Vec<ResponsibilityUnit> },
    Back,
    AddAnother,
}

/// One draft invite in progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WizardState {
    pub passport_id: Uuid,
    pub stage: WizardStage,
    pub role: Option<PartnerRole>,
    pub contact: Option<Contact>,
    pub mode: Option<ResponsibilityMode>,
    /// Modes with at least one unit left for the chosen role
    pub available_modes: Vec<ResponsibilityMode>,
    pub selection: Vec<ResponsibilityUnit>,
    /// Units dropped after a commit conflict, for highlighting
    pub conflicts: Vec<ResponsibilityUnit>,
    pub skipped: Option<SkipReason>,
    /// Sent with every commit attempt of this draft
    pub idempotency_key: String,
    /// Invite created from this draft, once committed
    pub draft_invite: Option<Uuid>,
    /// Invites committed earlier in this session
    pub committed: Vec<Uuid>,
}

impl WizardState {
    pub fn new(passport_id: Uuid) -> Self {
        Self {
            passport_id,
            stage: WizardStage::RoleSelection,
            role: None,
            contact: None,
            mode: None,
            available_modes: Vec::new(),
            selection: Vec::new(),
            conflicts: Vec::new(),
            skipped: None,
            idempotency_key: Uuid::new_v4().to_string(),
            draft_invite: None,
            committed: Vec::new(),
        }
    }

    /// The summary was reached because nothing was left to assign
    pub fn is_exhausted(&self) -> bool {
        self.stage == WizardStage::Summary && self.skipped.is_some()
    }

    pub fn is_committed(&self) -> bool {
        self.draft_invite.is_some()
    }

    /// Next state for an operator event
    pub fn apply(&self, event: WizardEvent, snapshot: &AssignmentSnapshot) -> Result<Self> {
        let resolver = snapshot.resolver();
        let mut next = self.clone();

        match (self.stage, event) {
            (WizardStage::RoleSelection, WizardEvent::ChooseRole { role }) => {
                let role: PartnerRole = role.parse().map_err(AppError::Validation)?;
                next.role = Some(role);
                next.available_modes = ResponsibilityMode::ALL
                    .into_iter()
                    .filter(|mode| resolver.has_any_available_unit_for(role, *mode))
                    .collect();
                if next.available_modes.is_empty() {
                    next.stage = WizardStage::Summary;
                    next.skipped = Some(SkipReason::RoleExhausted);
                } else {
                    next.stage = WizardStage::ContactDetails;
                    next.skipped = None;
                }
            }

            (WizardStage::ContactDetails, WizardEvent::EnterContact { contact }) => {
                next.contact = Some(contact.normalized().map_err(AppError::Validation)?);
                next.stage = WizardStage::ModeSelection;
            }

            (WizardStage::ModeSelection, WizardEvent::ChooseMode { mode }) => {
                let role = self.required_role()?;
                if !self.available_modes.contains(&mode) {
                    return Err(AppError::Validation(format!(
                        "Nothing left to {} for this role",
                        mode.as_str()
                    )));
                }
                next.mode = Some(mode);
                next.selection.clear();
                next.conflicts.clear();
                if resolver.has_any_available_unit_for(role, mode) {
                    next.stage = WizardStage::ScopeSelection;
                    next.skipped = None;
                } else {
                    next.stage = WizardStage::Summary;
                    next.skipped = Some(SkipReason::ModeUnavailable);
                }
            }

            (WizardStage::ScopeSelection, WizardEvent::SelectScope { units }) => {
                let role = self.required_role()?;
                let mode = self.required_mode()?;
                if units.is_empty() {
                    return Err(AppError::Validation(
                        "Select at least one block or field".to_string(),
                    ));
                }
                if !is_homogeneous(&units) {
                    return Err(AppError::Validation(
                        "Select either whole blocks or individual fields, not both".to_string(),
                    ));
                }
                for unit in &units {
                    snapshot.schema.check_unit(unit, role)?;
                }
                let taken = resolver.unavailable_units(&units, mode);
                if !taken.is_empty() {
                    return Err(AppError::conflict(taken));
                }

                next.selection.clear();
                for unit in units {
                    if !next.selection.contains(&unit) {
                        next.selection.push(unit);
                    }
                }
                next.conflicts.clear();
                next.stage = WizardStage::Summary;
            }

            (stage, WizardEvent::Back) => {
                next.stage = match stage {
                    WizardStage::RoleSelection => {
                        return Err(AppError::InvalidTransition(
                            "Already at the first step".to_string(),
                        ))
                    }
                    WizardStage::ContactDetails => WizardStage::RoleSelection,
                    WizardStage::ModeSelection => WizardStage::ContactDetails,
                    WizardStage::ScopeSelection => WizardStage::ModeSelection,
                    WizardStage::Summary => {
                        if self.skipped.is_some() {
                            return Err(AppError::InvalidTransition(
                                "Nothing left to assign; start another invite instead".to_string(),
                            ));
                        }
                        if self.is_committed() {
                            return Err(AppError::InvalidTransition(
                                "This invite was already saved".to_string(),
                            ));
                        }
                        WizardStage::ScopeSelection
                    }
                };
            }

            (WizardStage::Summary, WizardEvent::AddAnother) => {
                let mut fresh = WizardState::new(self.passport_id);
                fresh.committed = self.committed.clone();
                return Ok(fresh);
            }

            (stage, event) => {
                return Err(AppError::InvalidTransition(format!(
                    "{} is not possible during {}",
                    event_name(&event),
                    stage.as_str()
                )))
            }
        }

        Ok(next)
    }

    /// The invite to create from this draft
    pub fn draft(&self) -> Result<NewInvite> {
        if self.stage != WizardStage::Summary {
            return Err(AppError::InvalidTransition(format!(
                "Cannot save during {}",
                self.stage.as_str()
            )));
        }
        if self.skipped.is_some() {
            return Err(AppError::InvalidTransition(
                "Nothing left to assign".to_string(),
            ));
        }
        let contact = self
            .contact
            .clone()
            .ok_or_else(|| AppError::Validation("Contact details are required".to_string()))?;
        if self.selection.is_empty() {
            return Err(AppError::Validation(
                "Select at least one block or field".to_string(),
            ));
        }

        Ok(NewInvite {
            role: self.required_role()?,
            contact,
            mode: self.required_mode()?,
            units: self.selection.clone(),
            idempotency_key: Some(self.idempotency_key.clone()),
        })
    }

    /// Record a successful commit; the wizard stays on the summary
    pub fn on_committed(&self, invite_id: Uuid) -> Self {
        let mut next = self.clone();
        next.draft_invite = Some(invite_id);
        if !next.committed.contains(&invite_id) {
            next.committed.push(invite_id);
        }
        next
    }

    /// Back to scope selection without the units that were taken meanwhile
    pub fn on_conflict(&self, units: &[ResponsibilityUnit], snapshot: &AssignmentSnapshot) -> Self {
        let resolver = snapshot.resolver();
        let mut next = self.clone();
        let mode = self.mode.unwrap_or(ResponsibilityMode::Contribute);

        next.selection
            .retain(|unit| !units.contains(unit) && resolver.is_available(unit, mode));
        next.conflicts = units.to_vec();
        next.stage = WizardStage::ScopeSelection;
        next
    }

    fn required_role(&self) -> Result<PartnerRole> {
        self.role
            .ok_or_else(|| AppError::Validation("Role is required".to_string()))
    }

    fn required_mode(&self) -> Result<ResponsibilityMode> {
        self.mode
            .ok_or_else(|| AppError::Validation("Mode is required".to_string()))
    }
}

fn event_name(event: &WizardEvent) -> &'static str {
    match event {
        WizardEvent::ChooseRole { .. } => "Choosing a role",
        WizardEvent::EnterContact { .. } => "Entering contact details",
        WizardEvent::ChooseMode { .. } => "Choosing a mode",
        WizardEvent::SelectScope { .. } => "Selecting units",
        WizardEvent::Back => "Going back",
        WizardEvent::AddAnother => "Adding another invite",
    }
}
