//! Operator wizard for assembling and committing invites

pub mod session;
pub mod state;

pub use session::{CommitOutcome, RoleOption, WizardSession, WizardView};
pub use state::{SkipReason, WizardEvent, WizardStage, WizardState};
