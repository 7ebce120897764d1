/// Configuration management for Anteroom
use crate::error::{AdmissionError, AdmissionResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub geolocation: GeolocationConfig,
    pub rate_limit: RateLimitSettings,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub admission_db: PathBuf,
}

/// Authentication and token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret shared by all token kinds
    pub token_secret: String,
    /// Issuer claim stamped into room-join tokens
    pub issuer: String,
    /// Validity of a room-join token minted by direct validation (seconds)
    pub direct_join_ttl_secs: i64,
    /// Validity of a room-join token minted on waiting-room admission (seconds)
    pub admitted_join_ttl_secs: i64,
}

/// Geolocation lookup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeolocationConfig {
    pub enabled: bool,
    /// Provider URL; the client IP is appended as a path segment
    pub provider_url: String,
    pub timeout_secs: u64,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub requests_per_window: i64,
    pub window_secs: i64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AdmissionResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("ANTEROOM_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("ANTEROOM_PORT")
            .unwrap_or_else(|_| "8710".to_string())
            .parse()
            .map_err(|_| AdmissionError::Validation("Invalid port number".to_string()))?;
        let version = env::var("ANTEROOM_VERSION").unwrap_or_else(|_| "0.1.0".to_string());

        let data_directory: PathBuf = env::var("ANTEROOM_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let admission_db = env::var("ANTEROOM_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("admission.sqlite"));

        let token_secret = env::var("ANTEROOM_TOKEN_SECRET")
            .map_err(|_| AdmissionError::Validation("Token secret required".to_string()))?;
        let issuer = env::var("ANTEROOM_TOKEN_ISSUER")
            .unwrap_or_else(|_| format!("anteroom.{}", hostname));
        let direct_join_ttl_secs = env::var("ANTEROOM_DIRECT_JOIN_TTL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .unwrap_or(3600);
        let admitted_join_ttl_secs = env::var("ANTEROOM_ADMITTED_JOIN_TTL_SECS")
            .unwrap_or_else(|_| "7200".to_string())
            .parse()
            .unwrap_or(7200);

        let geo_enabled = env::var("ANTEROOM_GEOLOCATION_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);
        let provider_url = env::var("ANTEROOM_GEOLOCATION_URL")
            .unwrap_or_else(|_| "http://ip-api.com/json".to_string());
        let geo_timeout = env::var("ANTEROOM_GEOLOCATION_TIMEOUT_SECS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .unwrap_or(3);

        let rate_limit_enabled = env::var("ANTEROOM_RATE_LIMITS_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);
        let requests_per_window = env::var("ANTEROOM_RATE_LIMIT_REQUESTS_PER_WINDOW")
            .unwrap_or_else(|_| "120".to_string())
            .parse()
            .unwrap_or(120);
        let window_secs = env::var("ANTEROOM_RATE_LIMIT_WINDOW_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .unwrap_or(60);

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                admission_db,
            },
            authentication: AuthConfig {
                token_secret,
                issuer,
                direct_join_ttl_secs,
                admitted_join_ttl_secs,
            },
            geolocation: GeolocationConfig {
                enabled: geo_enabled,
                provider_url,
                timeout_secs: geo_timeout,
            },
            rate_limit: RateLimitSettings {
                enabled: rate_limit_enabled,
                requests_per_window,
                window_secs,
            },
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> AdmissionResult<()> {
        if self.service.hostname.is_empty() {
            return Err(AdmissionError::Validation(
                "Hostname cannot be empty".to_string(),
            ));
        }

        if self.authentication.token_secret.len() < 32 {
            return Err(AdmissionError::Validation(
                "Token secret must be at least 32 characters".to_string(),
            ));
        }

        if self.authentication.admitted_join_ttl_secs > 7200 {
            return Err(AdmissionError::Validation(
                "Room-join tokens must not outlive two hours".to_string(),
            ));
        }

        Ok(())
    }
}
