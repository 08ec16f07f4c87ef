//! Responsibility assignment
//!
//! Invites grant partners either contribution or review rights over blocks or
//! individual field instances of a passport. At most one active contribute
//! grant may cover a unit; review grants are unlimited.

pub mod invite;
pub mod lifecycle;
pub mod notify;
pub mod resolver;

pub use invite::{Invite, LifecycleState, NewInvite, Transition, DEFAULT_INVITATION_TEXT};
pub use lifecycle::{AssignmentEvent, InviteLifecycle, LifecycleConfig, SendReport};
pub use notify::{invite_link, LogDispatcher, NotificationDispatcher, WebhookDispatcher};
pub use resolver::{
    AssignmentIndex, AssignmentResolver, AssignmentSnapshot, Holder, ResolverPolicy, UnitStatus,
};
