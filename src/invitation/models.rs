/// Invitation data model
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an invitation. Monotonic: once terminal, an
/// invitation never returns to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Active,
    Used,
    Expired,
    Revoked,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Active => "active",
            InvitationStatus::Used => "used",
            InvitationStatus::Expired => "expired",
            InvitationStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(InvitationStatus::Active),
            "used" => Some(InvitationStatus::Used),
            "expired" => Some(InvitationStatus::Expired),
            "revoked" => Some(InvitationStatus::Revoked),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvitationStatus::Active)
    }
}

/// Security constraints baked into an invitation at creation.
///
/// Every field is optional: `None` means the constraint is absent and the
/// corresponding check is skipped, which is distinct from "present but
/// empty". Each check's skip rule lives in the validation pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvitationConstraints {
    pub required_email: Option<String>,
    pub country_allowlist: Option<Vec<String>>,
    pub browser_allowlist: Option<Vec<String>>,
    pub ip_allowlist: Option<Vec<String>>,
    /// Allowlist of device fingerprint hashes
    pub device_allowlist: Option<Vec<String>>,
    /// Lock the invitation to the first device that uses it successfully
    pub device_binding_enabled: bool,
}

/// Creation request for an invitation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationSpec {
    pub owner_id: String,
    pub room_name: String,
    #[serde(default)]
    pub constraints: InvitationConstraints,
    /// Requested validity in hours; clamped to [1, 168]
    pub expires_in_hours: i64,
    pub waiting_room_enabled: bool,
    pub max_patients: Option<i64>,
}

/// The central capability object: grants time-limited, constraint-checked
/// entry to one room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub id: String,
    pub owner_id: String,
    pub room_name: String,
    pub status: InvitationStatus,
    pub constraints: InvitationConstraints,
    /// Write-once hash set by the first successful use when device binding
    /// is enabled
    pub bound_device_hash: Option<String>,
    pub max_uses: i64,
    pub current_uses: i64,
    pub waiting_room_enabled: bool,
    pub max_patients: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl Invitation {
    /// Expiry is derived from the clock, never stored as a staleable flag
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn uses_exhausted(&self) -> bool {
        self.current_uses >= self.max_uses
    }
}

/// Typed reason for a failed security check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    WrongEmail,
    WrongCountry,
    WrongBrowser,
    WrongIp,
    WrongDevice,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::WrongEmail => "wrong_email",
            ViolationKind::WrongCountry => "wrong_country",
            ViolationKind::WrongBrowser => "wrong_browser",
            ViolationKind::WrongIp => "wrong_ip",
            ViolationKind::WrongDevice => "wrong_device",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "wrong_email" => Some(ViolationKind::WrongEmail),
            "wrong_country" => Some(ViolationKind::WrongCountry),
            "wrong_browser" => Some(ViolationKind::WrongBrowser),
            "wrong_ip" => Some(ViolationKind::WrongIp),
            "wrong_device" => Some(ViolationKind::WrongDevice),
            _ => None,
        }
    }
}

/// Immutable audit record of one access attempt against an invitation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessAttempt {
    pub invitation_id: String,
    pub occurred_at: DateTime<Utc>,
    pub client_ip: String,
    pub user_agent: String,
    pub succeeded: bool,
}

/// Immutable audit record of one failed security check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityViolation {
    pub invitation_id: String,
    pub occurred_at: DateTime<Utc>,
    pub client_ip: String,
    pub user_agent: String,
    pub kind: ViolationKind,
    pub detail: String,
}
