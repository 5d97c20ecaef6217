//! Canonical storage keys.
//!
//! Everything the engine writes is namespaced under a short prefix so a
//! storage report (or a curious operator) can separate engine state from
//! whatever else the host keeps in the same buckets.

/// Prefix shared by every engine-owned key.
pub const PREFIX: &str = "pt_";

/// Durable: the anonymous visitor id.
pub const VISITOR_ID: &str = "pt_visitor_id";

/// Durable: lifetime visit counter.
pub const VISIT_COUNT: &str = "pt_visit_count";

/// Durable: version marker bumped on every journey persist, watched by
/// other tabs.
pub const JOURNEY_VERSION: &str = "pt_journey_version";

/// Session: the current session record (id, start, last activity).
pub const SESSION: &str = "pt_session";

/// Session: the serialized journey for the active session.
pub const JOURNEY: &str = "pt_journey";

/// Session: cached geolocation result, including negative results.
pub const GEO: &str = "pt_geo";

/// Session: first-touch campaign parameters captured this session.
pub const CAMPAIGN: &str = "pt_campaign";

/// True when the key was written by the engine rather than the host.
pub fn is_engine_key(key: &str) -> bool {
    key.starts_with(PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_keys_share_prefix() {
        for key in [VISITOR_ID, VISIT_COUNT, JOURNEY_VERSION, SESSION, JOURNEY, GEO, CAMPAIGN] {
            assert!(is_engine_key(key), "{key} missing prefix");
        }
        assert!(!is_engine_key("theme"));
    }
}
