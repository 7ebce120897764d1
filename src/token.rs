/// Signed Token Service
///
/// Issues and verifies the two token kinds the admission core deals in:
/// invitation tokens (prove possession of an invitation, never admission)
/// and room-join tokens (prove admission, scoped to exactly one room).
/// Pure functions over a shared HMAC secret; safe to call from any number
/// of concurrent workers.
use crate::error::{AdmissionError, AdmissionResult};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by an invitation token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvitationClaims {
    pub invitation_id: String,
    pub room_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub one_use: bool,
    pub iat: i64,
    pub exp: i64,
}

/// Claims carried by a room-join token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomJoinClaims {
    /// Resolved identity of the admitted participant
    pub sub: String,
    pub room: String,
    pub capabilities: Vec<String>,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl TokenService {
    pub fn new(secret: &str, issuer: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
        }
    }

    /// Issue an invitation token valid for `ttl_secs`
    pub fn issue_invitation_token(
        &self,
        invitation_id: &str,
        room_name: &str,
        email: Option<&str>,
        one_use: bool,
        ttl_secs: i64,
    ) -> AdmissionResult<String> {
        let now = Utc::now().timestamp();
        let claims = InvitationClaims {
            invitation_id: invitation_id.to_string(),
            room_name: room_name.to_string(),
            email: email.map(|e| e.to_string()),
            one_use,
            iat: now,
            exp: now + ttl_secs,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AdmissionError::Internal(format!("Failed to sign token: {}", e)))
    }

    /// Issue a room-join token scoped to one room, valid for `ttl_secs`
    pub fn issue_room_join_token(
        &self,
        subject: &str,
        room: &str,
        capabilities: &[&str],
        ttl_secs: i64,
    ) -> AdmissionResult<String> {
        let now = Utc::now().timestamp();
        let claims = RoomJoinClaims {
            sub: subject.to_string(),
            room: room.to_string(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + ttl_secs,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AdmissionError::Internal(format!("Failed to sign token: {}", e)))
    }

    /// Verify an invitation token
    pub fn verify_invitation_token(&self, token: &str) -> AdmissionResult<InvitationClaims> {
        self.verify::<InvitationClaims>(token)
    }

    /// Verify a room-join token
    pub fn verify_room_join_token(&self, token: &str) -> AdmissionResult<RoomJoinClaims> {
        self.verify::<RoomJoinClaims>(token)
    }

    /// Shared verification path. Pins the algorithm set to HS256 so a token
    /// signed under a different algorithm is rejected outright, and folds
    /// every failure kind into the single generic TokenInvalid result.
    fn verify<T: serde::de::DeserializeOwned>(&self, token: &str) -> AdmissionResult<T> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Allow some clock skew (30 seconds)
        validation.leeway = 30;

        decode::<T>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::warn!("Token verification failed: {}", e);
                AdmissionError::TokenInvalid
            })
    }
}
