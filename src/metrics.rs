/// Metrics and telemetry for Anteroom
///
/// Prometheus-compatible counters for the admission core: validation
/// outcomes, itemized violations, waiting-room activity, and token
/// issuance.
use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

lazy_static! {
    /// Validation pipeline runs by outcome (passed / denied / error)
    pub static ref VALIDATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "anteroom_validations_total",
        "Total invitation validation attempts",
        &["outcome"]
    )
    .unwrap();

    /// Security violations by kind
    pub static ref VIOLATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "anteroom_violations_total",
        "Total security violations recorded",
        &["kind"]
    )
    .unwrap();

    /// Signed tokens issued by kind (invitation / room_join)
    pub static ref TOKENS_ISSUED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "anteroom_tokens_issued_total",
        "Total signed tokens issued",
        &["kind"]
    )
    .unwrap();

    /// Waiting-room transitions by action (enqueued / admitted / rejected)
    pub static ref WAITING_ROOM_TOTAL: IntCounterVec = register_int_counter_vec!(
        "anteroom_waiting_room_total",
        "Total waiting-room state transitions",
        &["action"]
    )
    .unwrap();

    /// Geolocation lookups by result (resolved / unresolved)
    pub static ref GEO_LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "anteroom_geo_lookups_total",
        "Total geolocation lookups",
        &["result"]
    )
    .unwrap();
}

/// Render all registered metrics in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters() {
        VALIDATIONS_TOTAL.with_label_values(&["passed"]).inc();
        let output = render();
        assert!(output.contains("anteroom_validations_total"));
    }
}
