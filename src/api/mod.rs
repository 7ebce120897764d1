/// API routes and handlers
pub mod invitations;
pub mod waiting_room;

use crate::context::AppContext;
use axum::{http::HeaderMap, Router};

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(invitations::routes())
        .merge(waiting_room::routes())
}

/// Client IP as reported by the proxy in front of the service
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// User-agent header, or empty when absent
pub fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
