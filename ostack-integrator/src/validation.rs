//! Validation and normalization of load balancer requests.
//!
//! Every rule is checked; errors are collected per field rather than
//! returned on the first failure, so a requester sees everything it has to fix.

use tracing::error;

use crate::catalog::{self, SUPPORTED_LB_ALGS, SUPPORTED_LB_HC_PROTOS, SUPPORTED_LB_PROTOS};
use crate::config::Config;
use crate::ports::{self, PortMapping};
use crate::request::{ErrorFields, LoadBalancerRequest};

/// Configuration the validator depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationSettings {
    /// Preferred load balancer port (`lb-port`).
    pub lb_port: u16,
    /// Algorithm used when a request does not name one (`lb-method`).
    pub lb_method: String,
}

impl From<&Config> for ValidationSettings {
    fn from(config: &Config) -> Self {
        Self {
            lb_port: config.lb_port,
            lb_method: config.lb_method.clone(),
        }
    }
}

/// Result of validating a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated {
    /// Copy of the request with `port_mapping` collapsed to the resolved pair
    /// (when one was found).
    pub request: LoadBalancerRequest,
    /// Resolved algorithm, if any.
    pub algorithm: Option<String>,
    /// Resolved `(local, remote)` port pair, if any.
    pub ports: Option<(u16, u16)>,
    pub errors: ErrorFields,
}

impl Validated {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Choose the algorithm for a request.
///
/// An absent or empty algorithm falls back to the configured default, which is
/// accepted as-is. Otherwise the first catalog entry contained in the request's
/// algorithm string wins.
pub fn resolve_algorithm(requested: Option<&str>, default: &str) -> Option<String> {
    match requested {
        None | Some("") => Some(default.to_string()),
        Some(requested) => catalog::match_algorithm(requested).map(str::to_string),
    }
}

/// Validate `request`, returning a normalized copy and all field errors.
pub fn validate(request: &LoadBalancerRequest, settings: &ValidationSettings) -> Validated {
    let mut errors = ErrorFields::new();

    if !request.public {
        errors.insert("public".into(), "Only support public loadbalancers".into());
    }

    if !catalog::is_supported_protocol(request.protocol.as_str()) {
        errors.insert("protocol".into(), catalog::one_of(SUPPORTED_LB_PROTOS));
    }

    let algorithm = resolve_algorithm(request.algorithm.as_deref(), &settings.lb_method);
    if algorithm.is_none() {
        errors.insert("algorithm".into(), catalog::one_of(SUPPORTED_LB_ALGS));
    }

    if request.tls_termination {
        errors.insert("tls_termination".into(), "Not yet supported".into());
    }

    for (i, hc) in request.health_checks.iter().enumerate() {
        let protocol = hc.protocol.as_str();
        if !catalog::is_supported_hc_protocol(protocol) {
            errors.insert(
                format!("hc[{}].protocol", i),
                catalog::one_of(SUPPORTED_LB_HC_PROTOS),
            );
        }
        let has_path = hc.path.as_deref().is_some_and(|p| !p.is_empty());
        if has_path && !catalog::hc_protocol_accepts_path(protocol) {
            errors.insert(
                format!("hc[{}].path", i),
                "Only valid with http(s) protocol".into(),
            );
        }
    }

    let resolution = ports::resolve(&request.port_mapping, settings.lb_port);
    let pair = resolution.pair();
    if !request.backends.is_empty() && pair.is_none() {
        errors.insert(
            "port_mapping".into(),
            format!("Invalid port mapping, {}", resolution),
        );
    }

    let mut normalized = request.clone();
    if let Some((local, remote)) = pair {
        normalized.port_mapping = PortMapping::single(local, remote);
    }

    if !errors.is_empty() {
        error!(request = %request.name, ?errors, "Unsupported features in load balancer request");
    }

    Validated {
        request: normalized,
        algorithm,
        ports: pair,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{HealthCheck, Protocol};

    fn settings(lb_port: u16) -> ValidationSettings {
        ValidationSettings {
            lb_port,
            lb_method: "ROUND_ROBIN".to_string(),
        }
    }

    fn make_request() -> LoadBalancerRequest {
        let mut request = LoadBalancerRequest::new("req-1");
        request.algorithm = Some("ROUND_ROBIN".to_string());
        request
    }

    fn single_error(request: &LoadBalancerRequest, lb_port: u16) -> (String, String) {
        let validated = validate(request, &settings(lb_port));
        assert_eq!(validated.errors.len(), 1, "errors: {:?}", validated.errors);
        validated.errors.into_iter().next().unwrap()
    }

    #[test]
    fn test_validate_no_errors() {
        let mut request = make_request();
        request.port_mapping = PortMapping::single(80, 8080);

        let validated = validate(&request, &settings(443));
        assert!(validated.is_valid());
        assert_eq!(validated.algorithm.as_deref(), Some("ROUND_ROBIN"));
        assert_eq!(validated.request.port_mapping, PortMapping::single(80, 8080));
    }

    #[test]
    fn test_validate_public_required() {
        let mut request = make_request();
        request.public = false;
        assert_eq!(
            single_error(&request, 0),
            ("public".into(), "Only support public loadbalancers".into())
        );
    }

    #[test]
    fn test_validate_protocol() {
        let mut request = make_request();
        request.protocol = Protocol::Http;
        assert_eq!(
            single_error(&request, 0),
            ("protocol".into(), "Must be one of: udp, tcp".into())
        );

        request.protocol = Protocol::Udp;
        assert!(validate(&request, &settings(0)).is_valid());
    }

    #[test]
    fn test_validate_algorithm() {
        let mut request = make_request();
        request.algorithm = Some("INVALID".to_string());
        assert_eq!(
            single_error(&request, 0),
            (
                "algorithm".into(),
                "Must be one of: ROUND_ROBIN, LEAST_CONNECTIONS, SOURCE_IP".into()
            )
        );
    }

    #[test]
    fn test_resolve_algorithm() {
        assert_eq!(resolve_algorithm(None, "SOURCE_IP").as_deref(), Some("SOURCE_IP"));
        assert_eq!(resolve_algorithm(Some(""), "SOURCE_IP").as_deref(), Some("SOURCE_IP"));
        assert_eq!(
            resolve_algorithm(Some("ROUND_ROBIN_FOO"), "SOURCE_IP").as_deref(),
            Some("ROUND_ROBIN")
        );
        assert_eq!(resolve_algorithm(Some("BOGUS"), "SOURCE_IP"), None);
        // The configured default is trusted even if it is not in the catalog.
        assert_eq!(resolve_algorithm(None, "CUSTOM").as_deref(), Some("CUSTOM"));
    }

    #[test]
    fn test_validate_tls_termination() {
        let mut request = make_request();
        request.tls_termination = true;
        assert_eq!(
            single_error(&request, 0),
            ("tls_termination".into(), "Not yet supported".into())
        );
    }

    #[test]
    fn test_validate_health_checks() {
        let mut request = make_request();
        request.health_checks = vec![
            HealthCheck {
                protocol: Protocol::Http,
                port: None,
                path: Some("/healthz".to_string()),
            },
            HealthCheck {
                protocol: Protocol::from("ftp"),
                port: None,
                path: Some("/".to_string()),
            },
            HealthCheck {
                protocol: Protocol::Tcp,
                port: Some(6443),
                path: Some(String::new()),
            },
        ];

        let validated = validate(&request, &settings(0));
        let expected: ErrorFields = [
            ("hc[1].path".to_string(), "Only valid with http(s) protocol".to_string()),
            ("hc[1].protocol".to_string(), "Must be one of: http, https, tcp".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(validated.errors, expected);
    }

    #[test]
    fn test_validate_missing_port_mapping_with_backends() {
        let mut request = make_request();
        request.backends = vec!["invalid_ip".to_string()];
        assert_eq!(
            single_error(&request, 0),
            (
                "port_mapping".into(),
                "Invalid port mapping, lb_port=0, remote_port=None".into()
            )
        );
    }

    #[test]
    fn test_validate_missing_port_mapping_without_backends_is_fine() {
        let request = make_request();
        let validated = validate(&request, &settings(443));
        assert!(validated.is_valid());
        assert_eq!(validated.ports, None);
    }

    #[test]
    fn test_validate_collapses_port_mapping() {
        let mut request = make_request();
        request.port_mapping = [(80, 8080), (443, 6443)].into_iter().collect();
        request.backends = vec!["10.0.0.1".to_string()];

        let validated = validate(&request, &settings(443));
        assert!(validated.is_valid());
        assert_eq!(validated.ports, Some((443, 6443)));
        assert_eq!(validated.request.port_mapping, PortMapping::single(443, 6443));
        // The caller's request is untouched.
        assert_eq!(request.port_mapping.len(), 2);
    }

    #[test]
    fn test_validate_collapses_port_mapping_despite_other_errors() {
        let mut request = make_request();
        request.public = false;
        request.port_mapping = [(80, 8080), (8443, 443)].into_iter().collect();

        let validated = validate(&request, &settings(443));
        assert!(!validated.is_valid());
        assert_eq!(validated.request.port_mapping, PortMapping::single(80, 8080));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut request = make_request();
        request.public = false;
        request.protocol = Protocol::Https;
        request.algorithm = Some("BOGUS".to_string());
        request.tls_termination = true;
        request.backends = vec!["10.0.0.1".to_string()];

        let validated = validate(&request, &settings(443));
        let keys: Vec<&str> = validated.errors.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["algorithm", "port_mapping", "protocol", "public", "tls_termination"]
        );
    }
}
