/// Best-effort geolocation-by-IP collaborator
///
/// The country check is advisory: a provider outage degrades to "skip the
/// check", so every failure path here resolves to `None` with a warning,
/// never an error. The lookup happens before any store mutation in the
/// validation flow.
use crate::config::GeolocationConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct GeoInfo {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(rename = "countryCode", default)]
    pub country_code: Option<String>,
}

impl GeoInfo {
    /// Preferred country value for matching: the code when present, else
    /// the full name. The matcher treats both as equivalent anyway.
    pub fn country_value(&self) -> Option<String> {
        self.country_code.clone().or_else(|| self.country.clone())
    }
}

#[derive(Clone)]
pub struct GeolocationClient {
    http: reqwest::Client,
    config: GeolocationConfig,
}

impl GeolocationClient {
    pub fn new(config: GeolocationConfig) -> crate::error::AdmissionResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("Anteroom/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                crate::error::AdmissionError::Internal(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { http, config })
    }

    /// Resolve the country for an IP, or `None` when disabled, local, or
    /// the provider did not answer in time
    pub async fn lookup_country(&self, ip: &str) -> Option<String> {
        if !self.config.enabled || is_local(ip) {
            return None;
        }

        let url = format!("{}/{}", self.config.provider_url.trim_end_matches('/'), ip);
        let response = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Geolocation lookup failed for {}: {}", ip, e);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!(
                "Geolocation provider returned {} for {}",
                response.status(),
                ip
            );
            return None;
        }

        match response.json::<GeoInfo>().await {
            Ok(info) => info.country_value(),
            Err(e) => {
                tracing::warn!("Geolocation response unreadable for {}: {}", ip, e);
                None
            }
        }
    }
}

fn is_local(ip: &str) -> bool {
    ip == "127.0.0.1" || ip == "::1" || ip.starts_with("10.") || ip.starts_with("192.168.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_country_value_prefers_code() {
        let info = GeoInfo {
            country: Some("Germany".to_string()),
            country_code: Some("DE".to_string()),
        };
        assert_eq!(info.country_value().as_deref(), Some("DE"));

        let name_only = GeoInfo {
            country: Some("Germany".to_string()),
            country_code: None,
        };
        assert_eq!(name_only.country_value().as_deref(), Some("Germany"));
    }

    #[tokio::test]
    async fn test_disabled_lookup_short_circuits() {
        let client = GeolocationClient::new(GeolocationConfig {
            enabled: false,
            provider_url: "http://ip-api.invalid/json".to_string(),
            timeout_secs: 1,
        })
        .unwrap();

        assert_eq!(client.lookup_country("203.0.113.9").await, None);
    }

    #[tokio::test]
    async fn test_local_addresses_are_skipped() {
        let client = GeolocationClient::new(GeolocationConfig {
            enabled: true,
            provider_url: "http://ip-api.invalid/json".to_string(),
            timeout_secs: 1,
        })
        .unwrap();

        assert_eq!(client.lookup_country("127.0.0.1").await, None);
        assert_eq!(client.lookup_country("192.168.1.20").await, None);
    }
}
