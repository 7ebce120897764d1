/// Waiting room data model
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a queued admission request. Forward-only:
/// `waiting -> admitted` or `waiting -> left`, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitingStatus {
    Waiting,
    Admitted,
    Left,
}

impl WaitingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitingStatus::Waiting => "waiting",
            WaitingStatus::Admitted => "admitted",
            WaitingStatus::Left => "left",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(WaitingStatus::Waiting),
            "admitted" => Some(WaitingStatus::Admitted),
            "left" => Some(WaitingStatus::Left),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, WaitingStatus::Waiting)
    }
}

/// A queued admission request scoped to one invitation.
///
/// `doctor_user_id` is denormalized from the invitation owner so that
/// owner-scoped list queries stay a single indexed lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitingPatient {
    pub id: String,
    pub invitation_id: String,
    pub room_name: String,
    pub doctor_user_id: String,
    pub patient_name: Option<String>,
    pub patient_email: Option<String>,
    pub status: WaitingStatus,
    pub joined_at: DateTime<Utc>,
    pub admitted_at: Option<DateTime<Utc>>,
    pub left_at: Option<DateTime<Utc>>,
}
