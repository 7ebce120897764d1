/// Invitation Store Gateway
///
/// CRUD and status transitions over invitation records. Transitions are
/// guarded single-row updates (`WHERE status = 'active'`), so a race between
/// two writers resolves to one winner and one `AlreadyTerminal`.
use crate::error::{AdmissionError, AdmissionResult};
use crate::invitation::models::{
    Invitation, InvitationConstraints, InvitationSpec, InvitationStatus,
};
use crate::security::browser::BrowserFamily;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use validator::ValidateEmail;

/// Requested validity is clamped to this range of hours
const MIN_EXPIRY_HOURS: i64 = 1;
const MAX_EXPIRY_HOURS: i64 = 168;

#[derive(Clone)]
pub struct InvitationStore {
    db: SqlitePool,
}

impl InvitationStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create an invitation. Validates constraint shape and clamps the
    /// requested expiry window.
    pub async fn create(&self, spec: InvitationSpec) -> AdmissionResult<Invitation> {
        validate_constraints(&spec.constraints)?;

        if spec.room_name.trim().is_empty() {
            return Err(AdmissionError::Validation(
                "Room name cannot be empty".to_string(),
            ));
        }

        let hours = spec
            .expires_in_hours
            .clamp(MIN_EXPIRY_HOURS, MAX_EXPIRY_HOURS);
        let now = Utc::now();
        let expires_at = now + Duration::hours(hours);
        let id = Uuid::new_v4().to_string();

        let max_uses = if spec.waiting_room_enabled {
            // Many patients reuse the same link; cap at the patient limit
            // or an effectively unbounded count.
            spec.max_patients.unwrap_or(i64::MAX / 2)
        } else {
            1
        };

        sqlx::query(
            r#"
            INSERT INTO invitation (
                id, owner_id, room_name, status,
                required_email, country_allowlist, browser_allowlist,
                ip_allowlist, device_allowlist, device_binding_enabled,
                max_uses, current_uses, waiting_room_enabled, max_patients,
                created_at, expires_at
            )
            VALUES (?, ?, ?, 'active', ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&spec.owner_id)
        .bind(&spec.room_name)
        .bind(&spec.constraints.required_email)
        .bind(encode_list(&spec.constraints.country_allowlist)?)
        .bind(encode_list(&spec.constraints.browser_allowlist)?)
        .bind(encode_list(&spec.constraints.ip_allowlist)?)
        .bind(encode_list(&spec.constraints.device_allowlist)?)
        .bind(spec.constraints.device_binding_enabled)
        .bind(max_uses)
        .bind(spec.waiting_room_enabled)
        .bind(spec.max_patients)
        .bind(now.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .execute(&self.db)
        .await?;

        Ok(Invitation {
            id,
            owner_id: spec.owner_id,
            room_name: spec.room_name,
            status: InvitationStatus::Active,
            constraints: spec.constraints,
            bound_device_hash: None,
            max_uses,
            current_uses: 0,
            waiting_room_enabled: spec.waiting_room_enabled,
            max_patients: spec.max_patients,
            created_at: now,
            expires_at,
            last_accessed_at: None,
        })
    }

    /// Fetch an invitation by id
    pub async fn get_by_id(&self, id: &str) -> AdmissionResult<Invitation> {
        let row = sqlx::query("SELECT * FROM invitation WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        let row = row.ok_or_else(|| AdmissionError::NotFound("Invitation not found".to_string()))?;
        row_to_invitation(&row)
    }

    /// Most-recently-created active invitation for a room. Used when a
    /// caller has a room name but no invitation id.
    pub async fn find_active_by_room(&self, room: &str) -> AdmissionResult<Option<Invitation>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM invitation
            WHERE room_name = ? AND status = 'active'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(room)
        .fetch_optional(&self.db)
        .await?;

        row.map(|r| row_to_invitation(&r)).transpose()
    }

    /// All invitations created by an owner, newest first
    pub async fn list_by_owner(&self, owner_id: &str) -> AdmissionResult<Vec<Invitation>> {
        let rows = sqlx::query(
            "SELECT * FROM invitation WHERE owner_id = ? ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(row_to_invitation).collect()
    }

    /// All invitation ids for a room, any status. Step one of the two-step
    /// by-room waiting query.
    pub async fn ids_for_room(&self, room: &str) -> AdmissionResult<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM invitation WHERE room_name = ?")
            .bind(room)
            .fetch_all(&self.db)
            .await?;

        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    /// Transition an active invitation to `used` and bump its use counter.
    /// Rejects with AlreadyTerminal if the status is no longer active.
    pub async fn mark_used(&self, id: &str) -> AdmissionResult<()> {
        self.transition(id, InvitationStatus::Used).await
    }

    /// Revoke an active invitation
    pub async fn mark_revoked(&self, id: &str) -> AdmissionResult<()> {
        self.transition(id, InvitationStatus::Revoked).await
    }

    /// Flip an active invitation past its deadline to `expired`
    pub async fn mark_expired(&self, id: &str) -> AdmissionResult<()> {
        self.transition(id, InvitationStatus::Expired).await
    }

    async fn transition(&self, id: &str, to: InvitationStatus) -> AdmissionResult<()> {
        let result = sqlx::query("UPDATE invitation SET status = ? WHERE id = ? AND status = 'active'")
            .bind(to.as_str())
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            // Distinguish missing from already-terminal
            let current = self.get_by_id(id).await?;
            return Err(AdmissionError::AlreadyTerminal(format!(
                "invitation {} is {}",
                id,
                current.status.as_str()
            )));
        }

        Ok(())
    }

    /// Atomically count a successful use without touching status
    pub async fn increment_uses(&self, id: &str) -> AdmissionResult<()> {
        sqlx::query("UPDATE invitation SET current_uses = current_uses + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Bind the invitation to a device hash, write-once. Returns the hash
    /// that is bound after the call (the existing one if already set).
    pub async fn bind_device(&self, id: &str, device_hash: &str) -> AdmissionResult<String> {
        sqlx::query(
            "UPDATE invitation SET bound_device_hash = ? WHERE id = ? AND bound_device_hash IS NULL",
        )
        .bind(device_hash)
        .bind(id)
        .execute(&self.db)
        .await?;

        let row = sqlx::query("SELECT bound_device_hash FROM invitation WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AdmissionError::NotFound("Invitation not found".to_string()))?;

        let bound: Option<String> = row.get("bound_device_hash");
        bound.ok_or_else(|| AdmissionError::Internal("Device binding not persisted".to_string()))
    }

    /// Stamp the last-accessed timestamp
    pub async fn touch_last_accessed(&self, id: &str) -> AdmissionResult<()> {
        sqlx::query("UPDATE invitation SET last_accessed_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Flip every active invitation past its deadline to `expired`.
    /// An optimization for list views; expiry is always also derived at
    /// read time.
    pub async fn mark_expired_sweep(&self) -> AdmissionResult<u64> {
        let result = sqlx::query(
            "UPDATE invitation SET status = 'expired' WHERE status = 'active' AND expires_at < ?",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Reject malformed constraint shapes at creation time
fn validate_constraints(constraints: &InvitationConstraints) -> AdmissionResult<()> {
    if let Some(email) = &constraints.required_email {
        if !email.validate_email() {
            return Err(AdmissionError::Validation(format!(
                "Invalid required email: {}",
                email
            )));
        }
    }

    if let Some(countries) = &constraints.country_allowlist {
        if countries.iter().any(|c| c.trim().is_empty()) {
            return Err(AdmissionError::Validation(
                "Country allowlist entries cannot be empty".to_string(),
            ));
        }
    }

    if let Some(browsers) = &constraints.browser_allowlist {
        for name in browsers {
            if BrowserFamily::parse(name).is_none() {
                return Err(AdmissionError::Validation(format!(
                    "Unknown browser family: {}",
                    name
                )));
            }
        }
    }

    Ok(())
}

fn encode_list(list: &Option<Vec<String>>) -> AdmissionResult<Option<String>> {
    list.as_ref()
        .map(|l| {
            serde_json::to_string(l)
                .map_err(|e| AdmissionError::Internal(format!("Failed to encode list: {}", e)))
        })
        .transpose()
}

fn decode_list(raw: Option<String>) -> AdmissionResult<Option<Vec<String>>> {
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| AdmissionError::Internal(format!("Corrupt allowlist column: {}", e)))
    })
    .transpose()
}

fn parse_timestamp(raw: &str) -> AdmissionResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AdmissionError::Internal(format!("Invalid timestamp: {}", e)))
}

fn row_to_invitation(row: &sqlx::sqlite::SqliteRow) -> AdmissionResult<Invitation> {
    let status_raw: String = row.get("status");
    let status = InvitationStatus::parse(&status_raw)
        .ok_or_else(|| AdmissionError::Internal(format!("Unknown status: {}", status_raw)))?;

    let created_at_raw: String = row.get("created_at");
    let expires_at_raw: String = row.get("expires_at");
    let last_accessed_raw: Option<String> = row.get("last_accessed_at");

    Ok(Invitation {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        room_name: row.get("room_name"),
        status,
        constraints: InvitationConstraints {
            required_email: row.get("required_email"),
            country_allowlist: decode_list(row.get("country_allowlist"))?,
            browser_allowlist: decode_list(row.get("browser_allowlist"))?,
            ip_allowlist: decode_list(row.get("ip_allowlist"))?,
            device_allowlist: decode_list(row.get("device_allowlist"))?,
            device_binding_enabled: row.get("device_binding_enabled"),
        },
        bound_device_hash: row.get("bound_device_hash"),
        max_uses: row.get("max_uses"),
        current_uses: row.get("current_uses"),
        waiting_room_enabled: row.get("waiting_room_enabled"),
        max_patients: row.get("max_patients"),
        created_at: parse_timestamp(&created_at_raw)?,
        expires_at: parse_timestamp(&expires_at_raw)?,
        last_accessed_at: last_accessed_raw.as_deref().map(parse_timestamp).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn spec(room: &str) -> InvitationSpec {
        InvitationSpec {
            owner_id: "doc-1".to_string(),
            room_name: room.to_string(),
            constraints: InvitationConstraints::default(),
            expires_in_hours: 24,
            waiting_room_enabled: false,
            max_patients: None,
        }
    }

    #[tokio::test]
    async fn test_create_clamps_expiry() {
        let store = InvitationStore::new(db::memory_pool().await);

        let mut long = spec("room-a");
        long.expires_in_hours = 9999;
        let inv = store.create(long).await.unwrap();
        assert!(inv.expires_at - inv.created_at <= Duration::hours(168));

        let mut short = spec("room-b");
        short.expires_in_hours = 0;
        let inv = store.create(short).await.unwrap();
        assert!(inv.expires_at - inv.created_at >= Duration::hours(1));
    }

    #[tokio::test]
    async fn test_status_is_monotonic() {
        let store = InvitationStore::new(db::memory_pool().await);
        let inv = store.create(spec("room-a")).await.unwrap();

        store.mark_used(&inv.id).await.unwrap();
        assert_eq!(
            store.get_by_id(&inv.id).await.unwrap().status,
            InvitationStatus::Used
        );

        // Terminal stays terminal
        assert!(matches!(
            store.mark_revoked(&inv.id).await,
            Err(AdmissionError::AlreadyTerminal(_))
        ));
        assert!(matches!(
            store.mark_used(&inv.id).await,
            Err(AdmissionError::AlreadyTerminal(_))
        ));
    }

    #[tokio::test]
    async fn test_find_active_by_room_prefers_newest() {
        let store = InvitationStore::new(db::memory_pool().await);
        let first = store.create(spec("room-a")).await.unwrap();
        store.mark_revoked(&first.id).await.unwrap();
        let second = store.create(spec("room-a")).await.unwrap();

        let found = store.find_active_by_room("room-a").await.unwrap().unwrap();
        assert_eq!(found.id, second.id);
    }

    #[tokio::test]
    async fn test_device_binding_is_write_once() {
        let store = InvitationStore::new(db::memory_pool().await);
        let inv = store.create(spec("room-a")).await.unwrap();

        let bound = store.bind_device(&inv.id, "hash-one").await.unwrap();
        assert_eq!(bound, "hash-one");

        // Second bind keeps the original hash
        let bound = store.bind_device(&inv.id, "hash-two").await.unwrap();
        assert_eq!(bound, "hash-one");
    }

    #[tokio::test]
    async fn test_expiry_sweep_flips_only_overdue_invitations() {
        let store = InvitationStore::new(db::memory_pool().await);
        let overdue = store.create(spec("room-a")).await.unwrap();
        let fresh = store.create(spec("room-b")).await.unwrap();

        sqlx::query("UPDATE invitation SET expires_at = ? WHERE id = ?")
            .bind((Utc::now() - Duration::hours(1)).to_rfc3339())
            .bind(&overdue.id)
            .execute(&store.db)
            .await
            .unwrap();

        assert_eq!(store.mark_expired_sweep().await.unwrap(), 1);
        assert_eq!(
            store.get_by_id(&overdue.id).await.unwrap().status,
            InvitationStatus::Expired
        );
        assert_eq!(
            store.get_by_id(&fresh.id).await.unwrap().status,
            InvitationStatus::Active
        );
    }

    #[tokio::test]
    async fn test_invalid_email_constraint_rejected() {
        let store = InvitationStore::new(db::memory_pool().await);
        let mut bad = spec("room-a");
        bad.constraints.required_email = Some("not-an-email".to_string());

        assert!(matches!(
            store.create(bad).await,
            Err(AdmissionError::Validation(_))
        ));
    }
}
