/// Waiting room endpoints
use crate::{
    auth::OwnerAuthContext,
    context::AppContext,
    error::{AdmissionError, AdmissionResult},
    metrics,
    waiting_room::{WaitingPatient, WaitingScope},
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

/// Build waiting room routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/waiting-room", get(list_waiting))
        .route("/api/waiting-room/poll", get(poll_admission))
        .route("/api/waiting-room/:id/admit", post(admit_patient))
        .route("/api/waiting-room/:id/reject", post(reject_patient))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    invitation_id: Option<String>,
    room: Option<String>,
}

/// List waiting patients. Defaults to the authenticated owner's scope;
/// invitation and room scopes are narrowed to that owner's entries.
async fn list_waiting(
    State(ctx): State<AppContext>,
    auth: OwnerAuthContext,
    Query(query): Query<ListQuery>,
) -> AdmissionResult<Json<Vec<WaitingPatient>>> {
    let scope = if let Some(invitation_id) = query.invitation_id {
        WaitingScope::ByInvitation(invitation_id)
    } else if let Some(room) = query.room {
        WaitingScope::ByRoom(room)
    } else {
        WaitingScope::ByOwner(auth.owner_id.clone())
    };

    let patients = ctx
        .waiting_room
        .list(scope)
        .await?
        .into_iter()
        .filter(|p| p.doctor_user_id == auth.owner_id)
        .collect();

    Ok(Json(patients))
}

#[derive(Debug, Deserialize)]
struct AdmitRequest {
    room: String,
}

/// Admit a waiting patient into their room
async fn admit_patient(
    State(ctx): State<AppContext>,
    auth: OwnerAuthContext,
    Path(id): Path<String>,
    Json(req): Json<AdmitRequest>,
) -> AdmissionResult<Json<serde_json::Value>> {
    let patient = ctx.waiting_room.get(&id).await?;
    if patient.doctor_user_id != auth.owner_id {
        return Err(AdmissionError::NotFound("Waiting entry not found".to_string()));
    }

    let room_join_token = ctx.waiting_room.admit(&id, &req.room).await?;
    metrics::WAITING_ROOM_TOTAL.with_label_values(&["admitted"]).inc();
    metrics::TOKENS_ISSUED_TOTAL.with_label_values(&["room_join"]).inc();

    Ok(Json(json!({ "room_join_token": room_join_token })))
}

/// Reject a waiting patient. Idempotent.
async fn reject_patient(
    State(ctx): State<AppContext>,
    auth: OwnerAuthContext,
    Path(id): Path<String>,
) -> AdmissionResult<Json<serde_json::Value>> {
    let patient = ctx.waiting_room.get(&id).await?;
    if patient.doctor_user_id != auth.owner_id {
        return Err(AdmissionError::NotFound("Waiting entry not found".to_string()));
    }

    ctx.waiting_room.reject(&id).await?;
    metrics::WAITING_ROOM_TOTAL.with_label_values(&["rejected"]).inc();

    Ok(Json(json!({})))
}

#[derive(Debug, Deserialize)]
struct PollQuery {
    invitation_id: String,
    email: Option<String>,
}

/// The waiting visitor's poll. Repeatable, unauthenticated read; "not yet
/// admitted" is the steady-state answer.
async fn poll_admission(
    State(ctx): State<AppContext>,
    Query(query): Query<PollQuery>,
) -> AdmissionResult<Json<serde_json::Value>> {
    let result = ctx
        .waiting_room
        .poll_admission(&query.invitation_id, query.email.as_deref())
        .await?;

    Ok(Json(json!({
        "admitted": result.admitted,
        "status": result.status.as_str(),
        "room_join_token": result.room_join_token,
    })))
}
