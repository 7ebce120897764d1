/// Admission orchestration
///
/// Ties the token service, invitation store, identity resolver, security
/// pipeline, waiting room, and audit recorder together into the operations
/// the surrounding system calls. Stateless per request; all durable state
/// lives in the store, and the geolocation lookup happens before any store
/// mutation so its failure degrades instead of blocking.
use crate::error::{AdmissionError, AdmissionResult};
use crate::geo::GeolocationClient;
use crate::identity::{IdentityCandidate, IdentityResolver};
use crate::invitation::{AccessAttempt, Invitation, InvitationSpec, InvitationStatus, InvitationStore};
use crate::metrics;
use crate::security::{AccessContext, SecurityPipeline};
use crate::token::TokenService;
use crate::waiting_room::{WaitingPatient, WaitingRoomEngine};
use crate::{audit::AuditRecorder, config::AuthConfig};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Capabilities stamped into room-join tokens for direct validation
const JOIN_CAPABILITIES: &[&str] = &["join"];

/// Client-supplied facts accompanying a validation request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientContext {
    pub client_ip: String,
    pub user_agent: String,
    pub device_fingerprint: Option<String>,
    pub declared_user_id: Option<String>,
    pub declared_email: Option<String>,
    pub patient_name: Option<String>,
    /// Country already resolved upstream, when the proxy layer did the
    /// lookup itself; otherwise the service consults its own provider
    pub geo_country: Option<String>,
}

/// Result of a successful validation
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AccessGranted {
    /// Non-waiting-room invitation: the caller may join immediately
    DirectJoin { room_join_token: String },
    /// Waiting-room invitation: the caller is queued and should poll
    Queued { waiting_patient: WaitingPatient },
}

/// Response to createInvitation / getInvitationLink
#[derive(Debug, Clone, Serialize)]
pub struct InvitationLink {
    pub invitation_id: String,
    pub invitation_token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone)]
pub struct AdmissionService {
    invitations: InvitationStore,
    waiting_room: WaitingRoomEngine,
    identity: IdentityResolver,
    tokens: TokenService,
    pipeline: SecurityPipeline,
    audit: AuditRecorder,
    geo: GeolocationClient,
    auth_config: AuthConfig,
}

impl AdmissionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        invitations: InvitationStore,
        waiting_room: WaitingRoomEngine,
        identity: IdentityResolver,
        tokens: TokenService,
        audit: AuditRecorder,
        geo: GeolocationClient,
        auth_config: AuthConfig,
    ) -> Self {
        Self {
            invitations,
            waiting_room,
            identity,
            tokens,
            pipeline: SecurityPipeline::new(),
            audit,
            geo,
            auth_config,
        }
    }

    /// Create an invitation and its token
    pub async fn create_invitation(&self, spec: InvitationSpec) -> AdmissionResult<InvitationLink> {
        let invitation = self.invitations.create(spec).await?;
        let token = self.issue_invitation_token(&invitation)?;

        tracing::info!(
            "Invitation {} created for room {} (waiting room: {})",
            invitation.id,
            invitation.room_name,
            invitation.waiting_room_enabled
        );

        Ok(InvitationLink {
            invitation_id: invitation.id,
            invitation_token: token,
            expires_at: invitation.expires_at,
        })
    }

    /// Re-issue the link for an existing invitation, by id or room name
    pub async fn get_invitation_link(&self, room_or_id: &str) -> AdmissionResult<InvitationLink> {
        let invitation = match self.invitations.get_by_id(room_or_id).await {
            Ok(invitation) => invitation,
            Err(AdmissionError::NotFound(_)) => self
                .invitations
                .find_active_by_room(room_or_id)
                .await?
                .ok_or_else(|| AdmissionError::NotFound("Invitation not found".to_string()))?,
            Err(e) => return Err(e),
        };

        let now = Utc::now();
        if invitation.is_expired(now) {
            return Err(AdmissionError::AlreadyTerminal(format!(
                "invitation {} is expired",
                invitation.id
            )));
        }
        if invitation.status != InvitationStatus::Active {
            return Err(AdmissionError::AlreadyTerminal(format!(
                "invitation {} is {}",
                invitation.id,
                invitation.status.as_str()
            )));
        }

        let token = self.issue_invitation_token(&invitation)?;
        Ok(InvitationLink {
            invitation_id: invitation.id,
            invitation_token: token,
            expires_at: invitation.expires_at,
        })
    }

    /// Revoke an active invitation
    pub async fn revoke_invitation(&self, id: &str) -> AdmissionResult<()> {
        self.invitations.mark_revoked(id).await?;
        tracing::info!("Invitation {} revoked", id);
        Ok(())
    }

    /// The core entry path: verify the presented invitation token, run the
    /// security pipeline, and on pass either mint a direct room-join token
    /// or queue the visitor in the waiting room.
    pub async fn validate_invitation_access(
        &self,
        invitation_token: &str,
        client: ClientContext,
    ) -> AdmissionResult<AccessGranted> {
        let claims = self.tokens.verify_invitation_token(invitation_token)?;
        let invitation = self.invitations.get_by_id(&claims.invitation_id).await?;
        let now = Utc::now();

        // Lifecycle gates come before any constraint check. Expiry is
        // derived from the clock regardless of remaining uses.
        if invitation.is_expired(now) {
            // Best-effort flip; a concurrent transition is fine
            let _ = self.invitations.mark_expired(&invitation.id).await;
            metrics::VALIDATIONS_TOTAL.with_label_values(&["denied"]).inc();
            return Err(AdmissionError::AlreadyTerminal(format!(
                "invitation {} is expired",
                invitation.id
            )));
        }

        if invitation.status != InvitationStatus::Active {
            metrics::VALIDATIONS_TOTAL.with_label_values(&["denied"]).inc();
            return Err(AdmissionError::AlreadyTerminal(format!(
                "invitation {} is {}",
                invitation.id,
                invitation.status.as_str()
            )));
        }

        if invitation.uses_exhausted() {
            let _ = self.invitations.mark_used(&invitation.id).await;
            metrics::VALIDATIONS_TOTAL.with_label_values(&["denied"]).inc();
            return Err(AdmissionError::AlreadyTerminal(format!(
                "invitation {} has no uses remaining",
                invitation.id
            )));
        }

        // Geolocation is consulted before any store mutation; an outage
        // degrades to a skipped country check.
        let geo_country = match client.geo_country.clone() {
            Some(country) => Some(country),
            None => self.geo.lookup_country(&client.client_ip).await,
        };
        metrics::GEO_LOOKUPS_TOTAL
            .with_label_values(&[if geo_country.is_some() {
                "resolved"
            } else {
                "unresolved"
            }])
            .inc();

        let access_ctx = AccessContext {
            client_ip: client.client_ip.clone(),
            user_agent: client.user_agent.clone(),
            token_email: claims.email.clone(),
            device_fingerprint: client.device_fingerprint.clone(),
            geo_country,
        };

        let outcome = self.pipeline.validate(&invitation, &access_ctx, now);

        let attempt = AccessAttempt {
            invitation_id: invitation.id.clone(),
            occurred_at: now,
            client_ip: client.client_ip.clone(),
            user_agent: client.user_agent.clone(),
            succeeded: outcome.passed(),
        };

        if !outcome.passed() {
            // Denied attempts are written to the trail before returning,
            // so they are never silently dropped.
            self.audit.record_attempt(&attempt).await?;
            self.audit.record_violations(&outcome.violations).await?;
            self.invitations.touch_last_accessed(&invitation.id).await?;

            for violation in &outcome.violations {
                metrics::VIOLATIONS_TOTAL
                    .with_label_values(&[violation.kind.as_str()])
                    .inc();
            }
            metrics::VALIDATIONS_TOTAL.with_label_values(&["denied"]).inc();

            tracing::warn!(
                "Access denied on invitation {}: {} violation(s) from {}",
                invitation.id,
                outcome.violations.len(),
                client.client_ip
            );

            return Err(AdmissionError::SecurityDenied {
                violations: outcome.violations,
            });
        }

        if let Some(hash) = &outcome.device_hash_to_bind {
            self.invitations.bind_device(&invitation.id, hash).await?;
        }

        self.audit.record_attempt(&attempt).await?;
        self.invitations.touch_last_accessed(&invitation.id).await?;
        self.invitations.increment_uses(&invitation.id).await?;

        let resolved = self
            .identity
            .resolve(&IdentityCandidate {
                declared_user_id: client.declared_user_id.clone(),
                declared_email: client.declared_email.clone().or(claims.email.clone()),
                invitation_email: invitation.constraints.required_email.clone(),
                owner_id: invitation.owner_id.clone(),
            })
            .await?;
        self.identity
            .store_room_identity(&invitation.room_name, &resolved)
            .await?;

        metrics::VALIDATIONS_TOTAL.with_label_values(&["passed"]).inc();

        if invitation.waiting_room_enabled {
            let patient = self
                .waiting_room
                .enqueue(
                    &invitation,
                    client.patient_name,
                    client.declared_email.or(claims.email),
                )
                .await?;
            metrics::WAITING_ROOM_TOTAL.with_label_values(&["enqueued"]).inc();
            return Ok(AccessGranted::Queued {
                waiting_patient: patient,
            });
        }

        // Single-admission invitations burn on success
        self.invitations.mark_used(&invitation.id).await?;

        let room_join_token = self.tokens.issue_room_join_token(
            &resolved.id,
            &invitation.room_name,
            JOIN_CAPABILITIES,
            self.auth_config.direct_join_ttl_secs,
        )?;
        metrics::TOKENS_ISSUED_TOTAL
            .with_label_values(&["room_join"])
            .inc();

        Ok(AccessGranted::DirectJoin { room_join_token })
    }

    fn issue_invitation_token(&self, invitation: &Invitation) -> AdmissionResult<String> {
        let ttl = (invitation.expires_at - Utc::now()).num_seconds().max(0);
        let token = self.tokens.issue_invitation_token(
            &invitation.id,
            &invitation.room_name,
            invitation.constraints.required_email.as_deref(),
            !invitation.waiting_room_enabled,
            ttl,
        )?;
        metrics::TOKENS_ISSUED_TOTAL
            .with_label_values(&["invitation"])
            .inc();
        Ok(token)
    }
}
