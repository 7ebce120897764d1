/// Invitation capability records and their store gateway
pub mod models;
pub mod store;

pub use models::{
    AccessAttempt, Invitation, InvitationConstraints, InvitationSpec, InvitationStatus,
    SecurityViolation, ViolationKind,
};
pub use store::InvitationStore;
