/// Waiting Room Admission Engine
///
/// Manages the queued-patient lifecycle per invitation. Transitions are
/// guarded single-row updates, so two concurrent admits resolve to one
/// winner and one InvalidStatus, never a double admission.
use crate::error::{AdmissionError, AdmissionResult};
use crate::invitation::{Invitation, InvitationStore};
use crate::token::TokenService;
use crate::waiting_room::models::{WaitingPatient, WaitingStatus};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Capabilities stamped into room-join tokens minted here
const JOIN_CAPABILITIES: &[&str] = &["join"];

/// List scopes, always filtered to `waiting` and ordered FIFO
#[derive(Debug, Clone, Deserialize)]
pub enum WaitingScope {
    ByOwner(String),
    ByInvitation(String),
    ByRoom(String),
}

/// Answer to a visitor's admission poll
#[derive(Debug, Clone)]
pub struct PollResult {
    pub admitted: bool,
    pub status: WaitingStatus,
    pub room_join_token: Option<String>,
}

#[derive(Clone)]
pub struct WaitingRoomEngine {
    db: SqlitePool,
    invitations: InvitationStore,
    tokens: TokenService,
    /// Room-join validity for admitted patients (seconds)
    admitted_join_ttl_secs: i64,
}

impl WaitingRoomEngine {
    pub fn new(
        db: SqlitePool,
        invitations: InvitationStore,
        tokens: TokenService,
        admitted_join_ttl_secs: i64,
    ) -> Self {
        Self {
            db,
            invitations,
            tokens,
            admitted_join_ttl_secs,
        }
    }

    /// Queue a validated visitor on a waiting-room-enabled invitation.
    /// Only callable after the security pipeline has passed.
    pub async fn enqueue(
        &self,
        invitation: &Invitation,
        patient_name: Option<String>,
        patient_email: Option<String>,
    ) -> AdmissionResult<WaitingPatient> {
        if !invitation.waiting_room_enabled {
            return Err(AdmissionError::Validation(
                "Invitation does not use a waiting room".to_string(),
            ));
        }

        if let Some(max_patients) = invitation.max_patients {
            let waiting = self.waiting_count(&invitation.id).await?;
            if waiting >= max_patients {
                return Err(AdmissionError::Validation(
                    "Waiting room is full".to_string(),
                ));
            }
        }

        let patient = WaitingPatient {
            id: Uuid::new_v4().to_string(),
            invitation_id: invitation.id.clone(),
            room_name: invitation.room_name.clone(),
            doctor_user_id: invitation.owner_id.clone(),
            patient_name,
            patient_email,
            status: WaitingStatus::Waiting,
            joined_at: Utc::now(),
            admitted_at: None,
            left_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO waiting_patient
                (id, invitation_id, room_name, doctor_user_id, patient_name,
                 patient_email, status, joined_at)
            VALUES (?, ?, ?, ?, ?, ?, 'waiting', ?)
            "#,
        )
        .bind(&patient.id)
        .bind(&patient.invitation_id)
        .bind(&patient.room_name)
        .bind(&patient.doctor_user_id)
        .bind(&patient.patient_name)
        .bind(&patient.patient_email)
        .bind(patient.joined_at.to_rfc3339())
        .execute(&self.db)
        .await?;

        tracing::info!(
            "Patient {} queued on invitation {} for room {}",
            patient.id,
            patient.invitation_id,
            patient.room_name
        );

        Ok(patient)
    }

    /// Waiting entries in a scope, earliest-queued first
    pub async fn list(&self, scope: WaitingScope) -> AdmissionResult<Vec<WaitingPatient>> {
        let rows = match scope {
            WaitingScope::ByOwner(owner) => {
                sqlx::query(
                    r#"
                    SELECT * FROM waiting_patient
                    WHERE doctor_user_id = ? AND status = 'waiting'
                    ORDER BY joined_at ASC
                    "#,
                )
                .bind(owner)
                .fetch_all(&self.db)
                .await?
            }
            WaitingScope::ByInvitation(invitation_id) => {
                sqlx::query(
                    r#"
                    SELECT * FROM waiting_patient
                    WHERE invitation_id = ? AND status = 'waiting'
                    ORDER BY joined_at ASC
                    "#,
                )
                .bind(invitation_id)
                .fetch_all(&self.db)
                .await?
            }
            WaitingScope::ByRoom(room) => {
                // Two-step query: the store cannot efficiently filter
                // waiting entries on a field held by the invitation
                // collection, so resolve invitation ids first and
                // union-query the entries.
                let ids = self.invitations.ids_for_room(&room).await?;
                let mut rows = Vec::new();
                for invitation_id in ids {
                    let mut chunk = sqlx::query(
                        r#"
                        SELECT * FROM waiting_patient
                        WHERE invitation_id = ? AND status = 'waiting'
                        ORDER BY joined_at ASC
                        "#,
                    )
                    .bind(invitation_id)
                    .fetch_all(&self.db)
                    .await?;
                    rows.append(&mut chunk);
                }
                rows
            }
        };

        let mut patients: Vec<WaitingPatient> = rows
            .iter()
            .map(row_to_patient)
            .collect::<AdmissionResult<_>>()?;
        patients.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        Ok(patients)
    }

    /// Admit a waiting patient into their room. The room name in the
    /// request must match the stored one; a mismatch rejects the call and
    /// leaves the entry waiting.
    pub async fn admit(&self, id: &str, room: &str) -> AdmissionResult<String> {
        let patient = self.get(id).await?;

        if patient.room_name != room {
            return Err(AdmissionError::RoomMismatch);
        }

        let result = sqlx::query(
            r#"
            UPDATE waiting_patient
            SET status = 'admitted', admitted_at = ?
            WHERE id = ? AND status = 'waiting'
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AdmissionError::InvalidStatus(format!(
                "waiting entry {} is {}",
                id,
                patient.status.as_str()
            )));
        }

        tracing::info!("Patient {} admitted to room {}", id, room);

        self.mint_join_token(&patient)
    }

    /// Turn a waiting patient away. Idempotent: rejecting an entry that is
    /// already terminal is a no-op success, since the caller cannot tell a
    /// stale view from a race with another admin tab.
    pub async fn reject(&self, id: &str) -> AdmissionResult<()> {
        let patient = self.get(id).await?;
        if patient.status.is_terminal() {
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE waiting_patient
            SET status = 'left', left_at = ?
            WHERE id = ? AND status = 'waiting'
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.db)
        .await?;

        tracing::info!("Patient {} rejected from waiting room", id);

        Ok(())
    }

    /// The visitor's side of the contract: a stateless, repeatable read of
    /// the most relevant waiting entry for an invitation. Callers poll on
    /// an interval and treat "not yet admitted" as the steady state.
    pub async fn poll_admission(
        &self,
        invitation_id: &str,
        patient_email_hint: Option<&str>,
    ) -> AdmissionResult<PollResult> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM waiting_patient
            WHERE invitation_id = ?
            ORDER BY joined_at DESC
            "#,
        )
        .bind(invitation_id)
        .fetch_all(&self.db)
        .await?;

        let candidates: Vec<WaitingPatient> = rows
            .iter()
            .map(row_to_patient)
            .collect::<AdmissionResult<_>>()?;

        if candidates.is_empty() {
            return Err(AdmissionError::NotFound(
                "No waiting entry for invitation".to_string(),
            ));
        }

        // Prefer an exact email match; otherwise the most recently joined
        let patient = patient_email_hint
            .and_then(|hint| {
                candidates.iter().find(|p| {
                    p.patient_email
                        .as_deref()
                        .is_some_and(|email| email.eq_ignore_ascii_case(hint))
                })
            })
            .unwrap_or(&candidates[0]);

        let room_join_token = if patient.status == WaitingStatus::Admitted {
            Some(self.mint_join_token(patient)?)
        } else {
            None
        };

        Ok(PollResult {
            admitted: patient.status == WaitingStatus::Admitted,
            status: patient.status,
            room_join_token,
        })
    }

    /// Fetch one waiting entry
    pub async fn get(&self, id: &str) -> AdmissionResult<WaitingPatient> {
        let row = sqlx::query("SELECT * FROM waiting_patient WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AdmissionError::NotFound("Waiting entry not found".to_string()))?;

        row_to_patient(&row)
    }

    async fn waiting_count(&self, invitation_id: &str) -> AdmissionResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM waiting_patient WHERE invitation_id = ? AND status = 'waiting'",
        )
        .bind(invitation_id)
        .fetch_one(&self.db)
        .await?;

        Ok(row.get("n"))
    }

    fn mint_join_token(&self, patient: &WaitingPatient) -> AdmissionResult<String> {
        let subject = patient
            .patient_email
            .as_deref()
            .unwrap_or(patient.id.as_str());

        self.tokens.issue_room_join_token(
            subject,
            &patient.room_name,
            JOIN_CAPABILITIES,
            self.admitted_join_ttl_secs,
        )
    }
}

fn parse_timestamp(raw: &str) -> AdmissionResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AdmissionError::Internal(format!("Invalid timestamp: {}", e)))
}

fn row_to_patient(row: &sqlx::sqlite::SqliteRow) -> AdmissionResult<WaitingPatient> {
    let status_raw: String = row.get("status");
    let status = WaitingStatus::parse(&status_raw)
        .ok_or_else(|| AdmissionError::Internal(format!("Unknown status: {}", status_raw)))?;

    let joined_at_raw: String = row.get("joined_at");
    let admitted_at_raw: Option<String> = row.get("admitted_at");
    let left_at_raw: Option<String> = row.get("left_at");

    Ok(WaitingPatient {
        id: row.get("id"),
        invitation_id: row.get("invitation_id"),
        room_name: row.get("room_name"),
        doctor_user_id: row.get("doctor_user_id"),
        patient_name: row.get("patient_name"),
        patient_email: row.get("patient_email"),
        status,
        joined_at: parse_timestamp(&joined_at_raw)?,
        admitted_at: admitted_at_raw.as_deref().map(parse_timestamp).transpose()?,
        left_at: left_at_raw.as_deref().map(parse_timestamp).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::invitation::{InvitationConstraints, InvitationSpec};

    async fn engine() -> (WaitingRoomEngine, InvitationStore) {
        let pool = db::memory_pool().await;
        let invitations = InvitationStore::new(pool.clone());
        let tokens = TokenService::new("a-test-secret-that-is-long-enough!!", "anteroom.test");
        (
            WaitingRoomEngine::new(pool, invitations.clone(), tokens, 7200),
            invitations,
        )
    }

    async fn waiting_invitation(store: &InvitationStore, room: &str) -> Invitation {
        store
            .create(InvitationSpec {
                owner_id: "doc-1".to_string(),
                room_name: room.to_string(),
                constraints: InvitationConstraints::default(),
                expires_in_hours: 24,
                waiting_room_enabled: true,
                max_patients: Some(10),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_requires_waiting_room() {
        let (engine, store) = engine().await;
        let inv = store
            .create(InvitationSpec {
                owner_id: "doc-1".to_string(),
                room_name: "room-a".to_string(),
                constraints: InvitationConstraints::default(),
                expires_in_hours: 24,
                waiting_room_enabled: false,
                max_patients: None,
            })
            .await
            .unwrap();

        assert!(matches!(
            engine.enqueue(&inv, None, None).await,
            Err(AdmissionError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_list_is_fifo() {
        let (engine, store) = engine().await;
        let inv = waiting_invitation(&store, "room-a").await;

        let mut ids = Vec::new();
        for name in ["first", "second", "third"] {
            // Distinct joined_at ordering relies on wall time; a tiny sleep
            // keeps the timestamps strictly increasing on fast machines.
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            let p = engine
                .enqueue(&inv, Some(name.to_string()), None)
                .await
                .unwrap();
            ids.push(p.id);
        }

        let listed = engine
            .list(WaitingScope::ByInvitation(inv.id.clone()))
            .await
            .unwrap();
        assert_eq!(listed.len(), 3);
        let listed_ids: Vec<_> = listed.iter().map(|p| p.id.clone()).collect();
        assert_eq!(listed_ids, ids);
    }

    #[tokio::test]
    async fn test_admit_requires_matching_room() {
        let (engine, store) = engine().await;
        let inv = waiting_invitation(&store, "room-a").await;
        let patient = engine.enqueue(&inv, None, None).await.unwrap();

        assert!(matches!(
            engine.admit(&patient.id, "room-b").await,
            Err(AdmissionError::RoomMismatch)
        ));

        // Mismatch leaves the entry waiting
        assert_eq!(
            engine.get(&patient.id).await.unwrap().status,
            WaitingStatus::Waiting
        );
    }

    #[tokio::test]
    async fn test_admit_is_single_shot() {
        let (engine, store) = engine().await;
        let inv = waiting_invitation(&store, "room-a").await;
        let patient = engine.enqueue(&inv, None, None).await.unwrap();

        let token = engine.admit(&patient.id, "room-a").await.unwrap();
        assert!(!token.is_empty());

        assert!(matches!(
            engine.admit(&patient.id, "room-a").await,
            Err(AdmissionError::InvalidStatus(_))
        ));
    }

    #[tokio::test]
    async fn test_reject_is_idempotent() {
        let (engine, store) = engine().await;
        let inv = waiting_invitation(&store, "room-a").await;
        let patient = engine.enqueue(&inv, None, None).await.unwrap();

        engine.reject(&patient.id).await.unwrap();
        engine.reject(&patient.id).await.unwrap();

        let after = engine.get(&patient.id).await.unwrap();
        assert_eq!(after.status, WaitingStatus::Left);
        assert!(after.left_at.is_some());
    }

    #[tokio::test]
    async fn test_poll_prefers_email_match() {
        let (engine, store) = engine().await;
        let inv = waiting_invitation(&store, "room-a").await;

        let target = engine
            .enqueue(&inv, None, Some("pat@example.com".to_string()))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        engine
            .enqueue(&inv, None, Some("other@example.com".to_string()))
            .await
            .unwrap();

        engine.admit(&target.id, "room-a").await.unwrap();

        let poll = engine
            .poll_admission(&inv.id, Some("PAT@example.com"))
            .await
            .unwrap();
        assert!(poll.admitted);
        assert!(poll.room_join_token.is_some());

        // The other visitor is still waiting
        let poll = engine
            .poll_admission(&inv.id, Some("other@example.com"))
            .await
            .unwrap();
        assert!(!poll.admitted);
        assert!(poll.room_join_token.is_none());
    }

    #[tokio::test]
    async fn test_waiting_room_capacity() {
        let (engine, store) = engine().await;
        let inv = store
            .create(InvitationSpec {
                owner_id: "doc-1".to_string(),
                room_name: "room-a".to_string(),
                constraints: InvitationConstraints::default(),
                expires_in_hours: 24,
                waiting_room_enabled: true,
                max_patients: Some(1),
            })
            .await
            .unwrap();

        engine.enqueue(&inv, None, None).await.unwrap();
        assert!(matches!(
            engine.enqueue(&inv, None, None).await,
            Err(AdmissionError::Validation(_))
        ));
    }
}
