/// Audit trail recorder
///
/// Access attempts and violations are append-only rows keyed by invitation
/// id with a time index. Writes are plain inserts, never read-modify-write,
/// so two attempts racing on the same invitation cannot lose entries.
use crate::error::AdmissionResult;
use crate::invitation::{AccessAttempt, SecurityViolation, ViolationKind};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

#[derive(Clone)]
pub struct AuditRecorder {
    db: SqlitePool,
}

impl AuditRecorder {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Append one access attempt
    pub async fn record_attempt(&self, attempt: &AccessAttempt) -> AdmissionResult<()> {
        sqlx::query(
            r#"
            INSERT INTO access_attempt (invitation_id, occurred_at, client_ip, user_agent, succeeded)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&attempt.invitation_id)
        .bind(attempt.occurred_at.to_rfc3339())
        .bind(&attempt.client_ip)
        .bind(&attempt.user_agent)
        .bind(attempt.succeeded)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Append a batch of violations from one attempt
    pub async fn record_violations(&self, violations: &[SecurityViolation]) -> AdmissionResult<()> {
        for violation in violations {
            sqlx::query(
                r#"
                INSERT INTO security_violation
                    (invitation_id, occurred_at, client_ip, user_agent, kind, detail)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&violation.invitation_id)
            .bind(violation.occurred_at.to_rfc3339())
            .bind(&violation.client_ip)
            .bind(&violation.user_agent)
            .bind(violation.kind.as_str())
            .bind(&violation.detail)
            .execute(&self.db)
            .await?;
        }

        Ok(())
    }

    /// Access attempts for an invitation, oldest first
    pub async fn attempts(&self, invitation_id: &str) -> AdmissionResult<Vec<AccessAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT invitation_id, occurred_at, client_ip, user_agent, succeeded
            FROM access_attempt
            WHERE invitation_id = ?
            ORDER BY occurred_at ASC, id ASC
            "#,
        )
        .bind(invitation_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                let occurred_at_raw: String = row.get("occurred_at");
                Ok(AccessAttempt {
                    invitation_id: row.get("invitation_id"),
                    occurred_at: parse_timestamp(&occurred_at_raw)?,
                    client_ip: row.get("client_ip"),
                    user_agent: row.get("user_agent"),
                    succeeded: row.get("succeeded"),
                })
            })
            .collect()
    }

    /// Violations for an invitation, oldest first
    pub async fn violations(&self, invitation_id: &str) -> AdmissionResult<Vec<SecurityViolation>> {
        let rows = sqlx::query(
            r#"
            SELECT invitation_id, occurred_at, client_ip, user_agent, kind, detail
            FROM security_violation
            WHERE invitation_id = ?
            ORDER BY occurred_at ASC, id ASC
            "#,
        )
        .bind(invitation_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                let occurred_at_raw: String = row.get("occurred_at");
                let kind_raw: String = row.get("kind");
                Ok(SecurityViolation {
                    invitation_id: row.get("invitation_id"),
                    occurred_at: parse_timestamp(&occurred_at_raw)?,
                    client_ip: row.get("client_ip"),
                    user_agent: row.get("user_agent"),
                    kind: ViolationKind::parse(&kind_raw).ok_or_else(|| {
                        crate::error::AdmissionError::Internal(format!(
                            "Unknown violation kind: {}",
                            kind_raw
                        ))
                    })?,
                    detail: row.get("detail"),
                })
            })
            .collect()
    }
}

fn parse_timestamp(raw: &str) -> AdmissionResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::error::AdmissionError::Internal(format!("Invalid timestamp: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn test_appends_are_cumulative() {
        let audit = AuditRecorder::new(db::memory_pool().await);
        let now = Utc::now();

        for succeeded in [false, true] {
            audit
                .record_attempt(&AccessAttempt {
                    invitation_id: "inv-1".to_string(),
                    occurred_at: now,
                    client_ip: "10.0.0.1".to_string(),
                    user_agent: "test".to_string(),
                    succeeded,
                })
                .await
                .unwrap();
        }

        let attempts = audit.attempts("inv-1").await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert!(!attempts[0].succeeded);
        assert!(attempts[1].succeeded);
    }

    #[tokio::test]
    async fn test_violation_round_trip() {
        let audit = AuditRecorder::new(db::memory_pool().await);

        audit
            .record_violations(&[SecurityViolation {
                invitation_id: "inv-1".to_string(),
                occurred_at: Utc::now(),
                client_ip: "10.0.0.1".to_string(),
                user_agent: "test".to_string(),
                kind: ViolationKind::WrongCountry,
                detail: "DE not in allowlist".to_string(),
            }])
            .await
            .unwrap();

        let violations = audit.violations("inv-1").await.unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::WrongCountry);
    }
}
