/// Invitation endpoints
use crate::{
    admission::{AccessGranted, ClientContext, InvitationLink},
    api,
    auth::OwnerAuthContext,
    context::AppContext,
    error::{AdmissionError, AdmissionResult},
    invitation::{AccessAttempt, Invitation, InvitationConstraints, InvitationSpec, SecurityViolation},
};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// Build invitation routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/invitations", post(create_invitation).get(list_invitations))
        .route("/api/invitations/link", get(invitation_link))
        .route("/api/invitations/validate", post(validate_access))
        .route("/api/invitations/:id/revoke", post(revoke_invitation))
        .route("/api/invitations/:id/history", get(invitation_history))
}

#[derive(Debug, Deserialize)]
struct CreateInvitationRequest {
    room_name: String,
    #[serde(default)]
    constraints: InvitationConstraints,
    #[serde(default = "default_expiry_hours")]
    expires_in_hours: i64,
    #[serde(default)]
    waiting_room_enabled: bool,
    max_patients: Option<i64>,
}

fn default_expiry_hours() -> i64 {
    24
}

/// Create invitation endpoint
async fn create_invitation(
    State(ctx): State<AppContext>,
    auth: OwnerAuthContext,
    Json(req): Json<CreateInvitationRequest>,
) -> AdmissionResult<Json<InvitationLink>> {
    let link = ctx
        .admission
        .create_invitation(InvitationSpec {
            owner_id: auth.owner_id,
            room_name: req.room_name,
            constraints: req.constraints,
            expires_in_hours: req.expires_in_hours,
            waiting_room_enabled: req.waiting_room_enabled,
            max_patients: req.max_patients,
        })
        .await?;

    Ok(Json(link))
}

/// List the authenticated owner's invitations, newest first
async fn list_invitations(
    State(ctx): State<AppContext>,
    auth: OwnerAuthContext,
) -> AdmissionResult<Json<Vec<Invitation>>> {
    let invitations = ctx.invitations.list_by_owner(&auth.owner_id).await?;
    Ok(Json(invitations))
}

#[derive(Debug, Deserialize)]
struct LinkQuery {
    invitation_id: Option<String>,
    room: Option<String>,
}

/// Re-issue an invitation link by invitation id or room name
async fn invitation_link(
    State(ctx): State<AppContext>,
    auth: OwnerAuthContext,
    Query(query): Query<LinkQuery>,
) -> AdmissionResult<Json<InvitationLink>> {
    let key = query
        .invitation_id
        .or(query.room)
        .ok_or_else(|| AdmissionError::Validation("invitation_id or room required".to_string()))?;

    let link = ctx.admission.get_invitation_link(&key).await?;

    // Owners only see their own links
    let invitation = ctx.invitations.get_by_id(&link.invitation_id).await?;
    if invitation.owner_id != auth.owner_id {
        return Err(AdmissionError::NotFound("Invitation not found".to_string()));
    }

    Ok(Json(link))
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    invitation_token: String,
    device_fingerprint: Option<String>,
    declared_user_id: Option<String>,
    declared_email: Option<String>,
    patient_name: Option<String>,
}

/// Validate invitation access: the visitor's entry path
async fn validate_access(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(req): Json<ValidateRequest>,
) -> AdmissionResult<Json<AccessGranted>> {
    let client = ClientContext {
        client_ip: api::client_ip(&headers),
        user_agent: api::user_agent(&headers),
        device_fingerprint: req.device_fingerprint,
        declared_user_id: req.declared_user_id,
        declared_email: req.declared_email,
        patient_name: req.patient_name,
        geo_country: None,
    };

    let granted = ctx
        .admission
        .validate_invitation_access(&req.invitation_token, client)
        .await?;

    Ok(Json(granted))
}

/// Revoke invitation endpoint
async fn revoke_invitation(
    State(ctx): State<AppContext>,
    auth: OwnerAuthContext,
    Path(id): Path<String>,
) -> AdmissionResult<Json<serde_json::Value>> {
    let invitation = ctx.invitations.get_by_id(&id).await?;
    if invitation.owner_id != auth.owner_id {
        return Err(AdmissionError::NotFound("Invitation not found".to_string()));
    }

    ctx.admission.revoke_invitation(&id).await?;
    Ok(Json(serde_json::json!({ "revoked": true })))
}

#[derive(Debug, Serialize)]
struct InvitationHistory {
    attempts: Vec<AccessAttempt>,
    violations: Vec<SecurityViolation>,
}

/// Audit trail for one invitation, oldest entries first
async fn invitation_history(
    State(ctx): State<AppContext>,
    auth: OwnerAuthContext,
    Path(id): Path<String>,
) -> AdmissionResult<Json<InvitationHistory>> {
    let invitation = ctx.invitations.get_by_id(&id).await?;
    if invitation.owner_id != auth.owner_id {
        return Err(AdmissionError::NotFound("Invitation not found".to_string()));
    }

    Ok(Json(InvitationHistory {
        attempts: ctx.audit.attempts(&id).await?,
        violations: ctx.audit.violations(&id).await?,
    }))
}
