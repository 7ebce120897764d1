/// Security Validation Pipeline
///
/// Evaluates one access attempt against an invitation's constraints. Every
/// check runs regardless of earlier failures so the caller gets the
/// complete violation list in a single pass. The pipeline itself is pure;
/// persistence of the outcome (audit rows, device binding, status
/// transition) belongs to the admission service.
use crate::invitation::{Invitation, SecurityViolation, ViolationKind};
use crate::security::browser::BrowserFamily;
use crate::security::country;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Client-side facts about one access attempt
#[derive(Debug, Clone, Default)]
pub struct AccessContext {
    pub client_ip: String,
    pub user_agent: String,
    /// Email embedded in the presented invitation token
    pub token_email: Option<String>,
    pub device_fingerprint: Option<String>,
    /// Country resolved by the geolocation collaborator, if it answered
    pub geo_country: Option<String>,
}

/// Result of running the pipeline
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub violations: Vec<SecurityViolation>,
    /// Hash to bind on first successful use, when device binding is
    /// enabled and the invitation has no bound hash yet
    pub device_hash_to_bind: Option<String>,
}

impl ValidationOutcome {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Clone, Default)]
pub struct SecurityPipeline;

impl SecurityPipeline {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(
        &self,
        invitation: &Invitation,
        ctx: &AccessContext,
        now: DateTime<Utc>,
    ) -> ValidationOutcome {
        let mut violations = Vec::new();
        let mut record = |kind: ViolationKind, detail: String| {
            violations.push(SecurityViolation {
                invitation_id: invitation.id.clone(),
                occurred_at: now,
                client_ip: ctx.client_ip.clone(),
                user_agent: ctx.user_agent.clone(),
                kind,
                detail,
            });
        };

        // Email: only meaningful when the invitation pins one
        if let Some(required) = &invitation.constraints.required_email {
            if let Some(presented) = &ctx.token_email {
                if !presented.eq_ignore_ascii_case(required) {
                    record(
                        ViolationKind::WrongEmail,
                        format!("token email {} does not match invitation", presented),
                    );
                }
            }
        }

        // Country: fail-open when geolocation did not resolve, fail-closed
        // on an actual mismatch
        if let Some(allowlist) = &invitation.constraints.country_allowlist {
            if let Some(attempt_country) = &ctx.geo_country {
                if !country::allowlist_contains(allowlist, attempt_country) {
                    record(
                        ViolationKind::WrongCountry,
                        format!("{} not in country allowlist", attempt_country),
                    );
                }
            }
        }

        // Browser: classification must appear in the allowlist
        if let Some(allowlist) = &invitation.constraints.browser_allowlist {
            let family = BrowserFamily::classify(&ctx.user_agent);
            let allowed = allowlist
                .iter()
                .filter_map(|name| BrowserFamily::parse(name))
                .any(|f| f == family);
            if !allowed {
                record(
                    ViolationKind::WrongBrowser,
                    format!("{} not in browser allowlist", family.as_str()),
                );
            }
        }

        // IP allowlist: exact string match, only when configured non-empty
        if let Some(allowlist) = &invitation.constraints.ip_allowlist {
            if !allowlist.is_empty() && !allowlist.iter().any(|ip| ip == &ctx.client_ip) {
                record(
                    ViolationKind::WrongIp,
                    format!("{} not in IP allowlist", ctx.client_ip),
                );
            }
        }

        // Device allowlist: raw or hashed presentation both accepted
        if let Some(allowlist) = &invitation.constraints.device_allowlist {
            match &ctx.device_fingerprint {
                Some(fingerprint) if device_in_allowlist(allowlist, fingerprint) => {}
                Some(_) => {
                    record(
                        ViolationKind::WrongDevice,
                        "device fingerprint not in allowlist".to_string(),
                    );
                }
                None => {
                    record(
                        ViolationKind::WrongDevice,
                        "device fingerprint required but not presented".to_string(),
                    );
                }
            }
        }

        // Device binding: first successful use binds, later uses must match
        let mut device_hash_to_bind = None;
        if invitation.constraints.device_binding_enabled {
            let presented_hash = ctx.device_fingerprint.as_deref().map(fingerprint_hash);
            match (&invitation.bound_device_hash, presented_hash) {
                (Some(bound), Some(presented)) => {
                    if bound != &presented {
                        record(
                            ViolationKind::WrongDevice,
                            "device does not match bound device".to_string(),
                        );
                    }
                }
                (Some(_), None) => {
                    record(
                        ViolationKind::WrongDevice,
                        "bound invitation requires a device fingerprint".to_string(),
                    );
                }
                (None, Some(presented)) => {
                    device_hash_to_bind = Some(presented);
                }
                (None, None) => {
                    record(
                        ViolationKind::WrongDevice,
                        "device binding requires a device fingerprint".to_string(),
                    );
                }
            }
        }

        ValidationOutcome {
            violations,
            device_hash_to_bind,
        }
    }
}

/// Canonical device hash. A value that already reads as a SHA-256 hex
/// digest is taken as-is; anything else is hashed.
pub fn fingerprint_hash(fingerprint: &str) -> String {
    if looks_like_sha256(fingerprint) {
        fingerprint.to_ascii_lowercase()
    } else {
        hex::encode(Sha256::digest(fingerprint.as_bytes()))
    }
}

fn looks_like_sha256(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn device_in_allowlist(allowlist: &[String], fingerprint: &str) -> bool {
    let hashed = fingerprint_hash(fingerprint);
    allowlist.iter().any(|entry| {
        entry == fingerprint || entry.eq_ignore_ascii_case(&hashed) || fingerprint_hash(entry) == hashed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invitation::{InvitationConstraints, InvitationStatus};
    use chrono::Duration;

    fn invitation(constraints: InvitationConstraints) -> Invitation {
        let now = Utc::now();
        Invitation {
            id: "inv-1".to_string(),
            owner_id: "doc-1".to_string(),
            room_name: "room-a".to_string(),
            status: InvitationStatus::Active,
            constraints,
            bound_device_hash: None,
            max_uses: 1,
            current_uses: 0,
            waiting_room_enabled: false,
            max_patients: None,
            created_at: now,
            expires_at: now + Duration::hours(24),
            last_accessed_at: None,
        }
    }

    fn context() -> AccessContext {
        AccessContext {
            client_ip: "203.0.113.9".to_string(),
            user_agent: "Mozilla/5.0 Chrome/120.0.0.0 Safari/537.36".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_unconstrained_invitation_passes() {
        let outcome = SecurityPipeline::new().validate(
            &invitation(InvitationConstraints::default()),
            &context(),
            Utc::now(),
        );
        assert!(outcome.passed());
    }

    #[test]
    fn test_all_checks_run_even_after_failure() {
        let inv = invitation(InvitationConstraints {
            required_email: Some("pat@example.com".to_string()),
            country_allowlist: Some(vec!["DE".to_string()]),
            ip_allowlist: Some(vec!["198.51.100.1".to_string()]),
            ..Default::default()
        });

        let mut ctx = context();
        ctx.token_email = Some("intruder@example.com".to_string());
        ctx.geo_country = Some("France".to_string());

        let outcome = SecurityPipeline::new().validate(&inv, &ctx, Utc::now());
        let kinds: Vec<_> = outcome.violations.iter().map(|v| v.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ViolationKind::WrongEmail,
                ViolationKind::WrongCountry,
                ViolationKind::WrongIp
            ]
        );
    }

    #[test]
    fn test_missing_geolocation_skips_country_check() {
        let inv = invitation(InvitationConstraints {
            country_allowlist: Some(vec!["DE".to_string()]),
            ..Default::default()
        });

        let outcome = SecurityPipeline::new().validate(&inv, &context(), Utc::now());
        assert!(outcome.passed());
    }

    #[test]
    fn test_country_name_matches_code_allowlist() {
        let inv = invitation(InvitationConstraints {
            country_allowlist: Some(vec!["DE".to_string()]),
            ..Default::default()
        });

        let mut ctx = context();
        ctx.geo_country = Some("Germany".to_string());

        let outcome = SecurityPipeline::new().validate(&inv, &ctx, Utc::now());
        assert!(outcome.passed());
    }

    #[test]
    fn test_browser_allowlist() {
        let inv = invitation(InvitationConstraints {
            browser_allowlist: Some(vec!["firefox".to_string()]),
            ..Default::default()
        });

        let outcome = SecurityPipeline::new().validate(&inv, &context(), Utc::now());
        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(outcome.violations[0].kind, ViolationKind::WrongBrowser);
    }

    #[test]
    fn test_device_binding_binds_on_first_use() {
        let inv = invitation(InvitationConstraints {
            device_binding_enabled: true,
            ..Default::default()
        });

        let mut ctx = context();
        ctx.device_fingerprint = Some("device-abc".to_string());

        let outcome = SecurityPipeline::new().validate(&inv, &ctx, Utc::now());
        assert!(outcome.passed());
        assert_eq!(
            outcome.device_hash_to_bind.as_deref(),
            Some(fingerprint_hash("device-abc").as_str())
        );
    }

    #[test]
    fn test_device_binding_rejects_other_device() {
        let mut inv = invitation(InvitationConstraints {
            device_binding_enabled: true,
            ..Default::default()
        });
        inv.bound_device_hash = Some(fingerprint_hash("device-abc"));

        let mut ctx = context();
        ctx.device_fingerprint = Some("device-xyz".to_string());

        let outcome = SecurityPipeline::new().validate(&inv, &ctx, Utc::now());
        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(outcome.violations[0].kind, ViolationKind::WrongDevice);
        assert!(outcome.device_hash_to_bind.is_none());
    }

    #[test]
    fn test_device_allowlist_accepts_raw_and_hashed() {
        let inv = invitation(InvitationConstraints {
            device_allowlist: Some(vec![fingerprint_hash("device-abc")]),
            ..Default::default()
        });

        // Raw form
        let mut ctx = context();
        ctx.device_fingerprint = Some("device-abc".to_string());
        assert!(SecurityPipeline::new().validate(&inv, &ctx, Utc::now()).passed());

        // Pre-hashed form
        ctx.device_fingerprint = Some(fingerprint_hash("device-abc"));
        assert!(SecurityPipeline::new().validate(&inv, &ctx, Utc::now()).passed());
    }
}
