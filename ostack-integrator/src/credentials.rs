//! Cloud credentials and outbound proxy settings.
//!
//! Both are opaque key-value bundles compared structurally; a refresh replaces
//! them wholesale.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Cloud credentials (auth URL, project, domain, region, CA bundle, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialSet(BTreeMap<String, String>);

impl CredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field; empty values are dropped.
    pub fn with(mut self, key: &str, value: Option<&str>) -> Self {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.0.insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Credentials are usable once the endpoint and a principal are known.
    pub fn is_complete(&self) -> bool {
        self.get("auth_url").is_some() && self.get("username").is_some()
    }

    /// Map to the `OS_*` environment understood by the openstack client.
    pub fn to_env(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .map(|(k, v)| {
                let key = match k.as_str() {
                    "region" => "OS_REGION_NAME".to_string(),
                    "endpoint_tls_ca" => "OS_CACERT".to_string(),
                    other => format!("OS_{}", other.to_uppercase()),
                };
                (key, v.clone())
            })
            .collect()
    }
}

impl FromIterator<(String, String)> for CredentialSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().filter(|(_, v)| !v.is_empty()).collect())
    }
}

const PROXY_KEYS: &[&str] = &["HTTP_PROXY", "HTTPS_PROXY", "NO_PROXY"];

/// Outbound proxy settings.
///
/// Each key is stored in both upper- and lower-case form with the same value,
/// which is how clients expect to export them into a process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProxySettings(BTreeMap<String, String>);

impl ProxySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build settings from possibly mixed-case keys.
    ///
    /// Upper-case spellings take precedence over lower-case ones; keys other
    /// than HTTP_PROXY, HTTPS_PROXY and NO_PROXY are ignored.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut canonical: BTreeMap<&'static str, (bool, String)> = BTreeMap::new();
        for (key, value) in pairs {
            let Some(&name) = PROXY_KEYS.iter().find(|k| k.eq_ignore_ascii_case(key)) else {
                continue;
            };
            let upper = key == name;
            match canonical.get(name) {
                Some((true, _)) if !upper => {}
                _ => {
                    canonical.insert(name, (upper, value.to_string()));
                }
            }
        }

        let mut settings = BTreeMap::new();
        for (name, (_, value)) in canonical {
            if value.is_empty() {
                continue;
            }
            settings.insert(name.to_lowercase(), value.clone());
            settings.insert(name.to_string(), value);
        }
        Self(settings)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_settings_normalize_case() {
        let settings = ProxySettings::from_pairs([
            ("http_proxy", "http://proxy.example.com:8080"),
            ("NO_PROXY", "127.0.0.1,localhost,::1"),
        ]);
        assert_eq!(settings.get("HTTP_PROXY"), Some("http://proxy.example.com:8080"));
        assert_eq!(settings.get("http_proxy"), Some("http://proxy.example.com:8080"));
        assert_eq!(settings.get("no_proxy"), Some("127.0.0.1,localhost,::1"));
        assert_eq!(settings.get("HTTPS_PROXY"), None);
    }

    #[test]
    fn test_proxy_settings_equal_regardless_of_input_case() {
        let upper = ProxySettings::from_pairs([("HTTPS_PROXY", "https://p:3128")]);
        let lower = ProxySettings::from_pairs([("https_proxy", "https://p:3128")]);
        assert_eq!(upper, lower);
    }

    #[test]
    fn test_proxy_settings_upper_case_wins() {
        let settings =
            ProxySettings::from_pairs([("http_proxy", "http://lower"), ("HTTP_PROXY", "http://upper")]);
        assert_eq!(settings.get("http_proxy"), Some("http://upper"));
    }

    #[test]
    fn test_credential_set_structural_equality() {
        let a = CredentialSet::new()
            .with("auth_url", Some("https://keystone:5000/v3"))
            .with("region", Some("RegionOne"));
        let b = CredentialSet::new()
            .with("region", Some("RegionOne"))
            .with("auth_url", Some("https://keystone:5000/v3"))
            .with("project_id", Some(""));
        assert_eq!(a, b);
        assert_ne!(a, b.clone().with("region", Some("RegionTwo")));
    }

    #[test]
    fn test_credential_env_names() {
        let creds = CredentialSet::new()
            .with("auth_url", Some("https://keystone:5000/v3"))
            .with("region", Some("RegionOne"));
        let env = creds.to_env();
        assert!(env.contains(&("OS_AUTH_URL".to_string(), "https://keystone:5000/v3".to_string())));
        assert!(env.contains(&("OS_REGION_NAME".to_string(), "RegionOne".to_string())));
    }
}
