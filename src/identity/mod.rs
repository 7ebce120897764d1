/// Identity Resolver
///
/// Produces a best-effort canonical patient identity from partial signals.
///
/// Resolution order (first match wins):
/// 1. Declared user id, when present and not the room owner's own id
/// 2. Declared email, when it matches exactly one known identity
/// 3. The invitation's email constraint, via the same lookup
/// 4. Anonymous
///
/// A resolution that comes back anonymous never overwrites a known identity
/// already stored against a room; it only fills an empty slot.
use crate::error::AdmissionResult;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

pub const ANONYMOUS_IDENTITY: &str = "anonymous";

/// Where a resolution came from, kept for debugging and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    DeclaredId,
    EmailLookup,
    InvitationEmail,
    Anonymous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityConfidence {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    pub id: String,
    pub email: Option<String>,
    pub source: IdentitySource,
    pub confidence: IdentityConfidence,
}

impl ResolvedIdentity {
    pub fn is_anonymous(&self) -> bool {
        self.source == IdentitySource::Anonymous
    }

    fn anonymous() -> Self {
        Self {
            id: ANONYMOUS_IDENTITY.to_string(),
            email: None,
            source: IdentitySource::Anonymous,
            confidence: IdentityConfidence::None,
        }
    }
}

/// Partial identity signals for one access attempt
#[derive(Debug, Clone, Default)]
pub struct IdentityCandidate {
    pub declared_user_id: Option<String>,
    pub declared_email: Option<String>,
    pub invitation_email: Option<String>,
    pub owner_id: String,
}

#[derive(Clone)]
pub struct IdentityResolver {
    db: SqlitePool,
}

impl IdentityResolver {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Resolve a candidate through the ordered strategies
    pub async fn resolve(&self, candidate: &IdentityCandidate) -> AdmissionResult<ResolvedIdentity> {
        // A declared id equal to the owner id means the room owner is
        // joining their own room; it must never populate the visitor slot.
        if let Some(declared) = &candidate.declared_user_id {
            if !declared.trim().is_empty() && declared != &candidate.owner_id {
                return Ok(ResolvedIdentity {
                    id: declared.clone(),
                    email: candidate.declared_email.clone(),
                    source: IdentitySource::DeclaredId,
                    confidence: IdentityConfidence::High,
                });
            }
        }

        if let Some(email) = &candidate.declared_email {
            if let Some(id) = self.lookup_by_email(email).await? {
                return Ok(ResolvedIdentity {
                    id,
                    email: Some(email.clone()),
                    source: IdentitySource::EmailLookup,
                    confidence: IdentityConfidence::Medium,
                });
            }
        }

        if let Some(email) = &candidate.invitation_email {
            if let Some(id) = self.lookup_by_email(email).await? {
                return Ok(ResolvedIdentity {
                    id,
                    email: Some(email.clone()),
                    source: IdentitySource::InvitationEmail,
                    confidence: IdentityConfidence::Low,
                });
            }
        }

        // Identity is anonymous, but a declared email is still worth
        // carrying; the email slot fills independently of the id slot.
        let mut anonymous = ResolvedIdentity::anonymous();
        anonymous.email = candidate
            .declared_email
            .clone()
            .or_else(|| candidate.invitation_email.clone());
        Ok(anonymous)
    }

    /// Exact, case-insensitive email match; only a unique hit resolves
    async fn lookup_by_email(&self, email: &str) -> AdmissionResult<Option<String>> {
        let rows = sqlx::query("SELECT id FROM known_identity WHERE email = ? COLLATE NOCASE")
            .bind(email)
            .fetch_all(&self.db)
            .await?;

        if rows.len() == 1 {
            Ok(Some(rows[0].get("id")))
        } else {
            Ok(None)
        }
    }

    /// Register a known identity record (collaborator-facing seed path)
    pub async fn register_known_identity(&self, id: &str, email: &str) -> AdmissionResult<()> {
        sqlx::query("INSERT OR REPLACE INTO known_identity (id, email) VALUES (?, ?)")
            .bind(id)
            .bind(email)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Persist the resolved visitor identity against a room session.
    ///
    /// Non-regression invariant: an anonymous id (or absent email) only
    /// fills an empty slot, never demotes a stored known value. Enforced in
    /// SQL with conditional assignment so concurrent writers cannot
    /// interleave a demotion.
    pub async fn store_room_identity(
        &self,
        room_name: &str,
        resolved: &ResolvedIdentity,
    ) -> AdmissionResult<()> {
        let identity = if resolved.is_anonymous() {
            None
        } else {
            Some(resolved.id.clone())
        };

        sqlx::query(
            r#"
            INSERT INTO room_session (room_name, patient_identity, patient_email, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(room_name) DO UPDATE SET
                patient_identity = COALESCE(room_session.patient_identity, excluded.patient_identity),
                patient_email = COALESCE(room_session.patient_email, excluded.patient_email),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(room_name)
        .bind(identity)
        .bind(&resolved.email)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Stored visitor identity for a room, if any
    pub async fn room_identity(
        &self,
        room_name: &str,
    ) -> AdmissionResult<Option<(Option<String>, Option<String>)>> {
        let row = sqlx::query(
            "SELECT patient_identity, patient_email FROM room_session WHERE room_name = ?",
        )
        .bind(room_name)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|r| (r.get("patient_identity"), r.get("patient_email"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn candidate(owner: &str) -> IdentityCandidate {
        IdentityCandidate {
            owner_id: owner.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_declared_id_wins() {
        let resolver = IdentityResolver::new(db::memory_pool().await);
        let mut c = candidate("doc-1");
        c.declared_user_id = Some("u123".to_string());

        let resolved = resolver.resolve(&c).await.unwrap();
        assert_eq!(resolved.id, "u123");
        assert_eq!(resolved.source, IdentitySource::DeclaredId);
        assert_eq!(resolved.confidence, IdentityConfidence::High);
    }

    #[tokio::test]
    async fn test_owner_id_never_fills_visitor_slot() {
        let resolver = IdentityResolver::new(db::memory_pool().await);
        let mut c = candidate("doc-1");
        c.declared_user_id = Some("doc-1".to_string());

        let resolved = resolver.resolve(&c).await.unwrap();
        assert!(resolved.is_anonymous());
    }

    #[tokio::test]
    async fn test_email_lookup_is_case_insensitive() {
        let resolver = IdentityResolver::new(db::memory_pool().await);
        resolver
            .register_known_identity("u42", "Pat@Example.com")
            .await
            .unwrap();

        let mut c = candidate("doc-1");
        c.declared_email = Some("pat@example.com".to_string());

        let resolved = resolver.resolve(&c).await.unwrap();
        assert_eq!(resolved.id, "u42");
        assert_eq!(resolved.source, IdentitySource::EmailLookup);
    }

    #[tokio::test]
    async fn test_invitation_email_fallback() {
        let resolver = IdentityResolver::new(db::memory_pool().await);
        resolver
            .register_known_identity("u42", "pat@example.com")
            .await
            .unwrap();

        let mut c = candidate("doc-1");
        c.invitation_email = Some("pat@example.com".to_string());

        let resolved = resolver.resolve(&c).await.unwrap();
        assert_eq!(resolved.id, "u42");
        assert_eq!(resolved.source, IdentitySource::InvitationEmail);
        assert_eq!(resolved.confidence, IdentityConfidence::Low);
    }

    #[tokio::test]
    async fn test_anonymous_never_demotes_stored_identity() {
        let resolver = IdentityResolver::new(db::memory_pool().await);

        let known = ResolvedIdentity {
            id: "u123".to_string(),
            email: Some("pat@example.com".to_string()),
            source: IdentitySource::DeclaredId,
            confidence: IdentityConfidence::High,
        };
        resolver.store_room_identity("room-a", &known).await.unwrap();

        let anon = ResolvedIdentity {
            id: ANONYMOUS_IDENTITY.to_string(),
            email: None,
            source: IdentitySource::Anonymous,
            confidence: IdentityConfidence::None,
        };
        resolver.store_room_identity("room-a", &anon).await.unwrap();

        let (identity, email) = resolver.room_identity("room-a").await.unwrap().unwrap();
        assert_eq!(identity.as_deref(), Some("u123"));
        assert_eq!(email.as_deref(), Some("pat@example.com"));
    }

    #[tokio::test]
    async fn test_anonymous_fills_empty_slot() {
        let resolver = IdentityResolver::new(db::memory_pool().await);

        let anon = ResolvedIdentity {
            id: ANONYMOUS_IDENTITY.to_string(),
            email: Some("later@example.com".to_string()),
            source: IdentitySource::Anonymous,
            confidence: IdentityConfidence::None,
        };
        resolver.store_room_identity("room-a", &anon).await.unwrap();

        let (identity, email) = resolver.room_identity("room-a").await.unwrap().unwrap();
        assert_eq!(identity, None);
        assert_eq!(email.as_deref(), Some("later@example.com"));
    }
}
