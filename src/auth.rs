/// Authentication extractors and utilities
use crate::{context::AppContext, error::AdmissionError};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts, http::HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer ").map(|t| t.to_string()))
}

/// Authenticated session-owner context.
///
/// Owner endpoints (create/revoke invitations, list/admit/reject waiting
/// patients) require a bearer JWT carrying `scope: "owner"`; `sub` is the
/// owner id. The surrounding system issues these tokens at login.
#[derive(Debug, Clone)]
pub struct OwnerAuthContext {
    pub owner_id: String,
}

#[async_trait]
impl FromRequestParts<AppContext> for OwnerAuthContext {
    type Rejection = AdmissionError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers).ok_or(AdmissionError::TokenInvalid)?;

        let claims = verify_owner_token(&token, &state.config.authentication.token_secret)?;

        let owner_id = claims
            .get("sub")
            .and_then(|v| v.as_str())
            .ok_or(AdmissionError::TokenInvalid)?
            .to_string();

        Ok(OwnerAuthContext { owner_id })
    }
}

/// Verify an owner JWT: signature, expiry, and owner scope. Failure detail
/// is logged, never surfaced.
pub fn verify_owner_token(
    token: &str,
    secret: &str,
) -> Result<serde_json::Value, AdmissionError> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 30;

    let data = decode::<serde_json::Value>(token, &decoding_key, &validation).map_err(|e| {
        tracing::warn!("Owner token verification failed: {}", e);
        AdmissionError::TokenInvalid
    })?;

    let scope = data.claims.get("scope").and_then(|v| v.as_str());
    if scope != Some("owner") {
        return Err(AdmissionError::TokenInvalid);
    }

    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "a-test-secret-that-is-long-enough!!";

    fn make_token(scope: &str) -> String {
        let claims = json!({
            "sub": "doc-1",
            "scope": scope,
            "iat": Utc::now().timestamp(),
            "exp": Utc::now().timestamp() + 600,
        });
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_owner_scope_accepted() {
        let claims = verify_owner_token(&make_token("owner"), SECRET).unwrap();
        assert_eq!(claims.get("sub").unwrap(), "doc-1");
    }

    #[test]
    fn test_other_scope_rejected() {
        assert!(matches!(
            verify_owner_token(&make_token("patient"), SECRET),
            Err(AdmissionError::TokenInvalid)
        ));
    }

    #[test]
    fn test_bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers).as_deref(), Some("abc.def.ghi"));

        headers.insert("authorization", "Basic dXNlcg==".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), None);
    }
}
