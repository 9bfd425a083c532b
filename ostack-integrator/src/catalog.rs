//! Capability catalog - what the integrator can provision.
//!
//! Changing these tables changes which requests are accepted; they are not
//! runtime inputs.

/// Load balancer protocols that can be provisioned.
pub const SUPPORTED_LB_PROTOS: &[&str] = &["udp", "tcp"];

/// Balancing algorithms understood by the provider.
pub const SUPPORTED_LB_ALGS: &[&str] = &["ROUND_ROBIN", "LEAST_CONNECTIONS", "SOURCE_IP"];

/// Protocols a health check may use.
pub const SUPPORTED_LB_HC_PROTOS: &[&str] = &["http", "https", "tcp"];

/// Health check protocols that accept a request path.
pub const PATH_HC_PROTOS: &[&str] = &["http", "https"];

pub fn is_supported_protocol(protocol: &str) -> bool {
    SUPPORTED_LB_PROTOS.contains(&protocol)
}

pub fn is_supported_hc_protocol(protocol: &str) -> bool {
    SUPPORTED_LB_HC_PROTOS.contains(&protocol)
}

pub fn hc_protocol_accepts_path(protocol: &str) -> bool {
    PATH_HC_PROTOS.contains(&protocol)
}

/// Match a free-form algorithm string against the catalog.
///
/// The first catalog entry contained in `requested` wins, so
/// `"ROUND_ROBIN_FOO"` resolves to `ROUND_ROBIN`.
pub fn match_algorithm(requested: &str) -> Option<&'static str> {
    SUPPORTED_LB_ALGS
        .iter()
        .copied()
        .find(|supported| requested.contains(supported))
}

/// Human readable "Must be one of: ..." message for a catalog table.
pub fn one_of(table: &[&str]) -> String {
    format!("Must be one of: {}", table.join(", "))
}
