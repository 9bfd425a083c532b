//! Integrator configuration.
//!
//! Loaded from a JSON file with kebab-case keys. Options fall into groups so
//! that an edit only invalidates what it affects: the credential group
//! invalidates cached credentials, the proxy group invalidates proxy settings,
//! and any edit forces a full reconciliation pass.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::credentials::{CredentialSet, ProxySettings};
use crate::error::ConfigError;

/// Credential options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CredentialConfig {
    /// Complete credentials as a JSON object; overrides the individual fields.
    pub credentials: Option<serde_json::Value>,
    pub auth_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub domain_name: Option<String>,
    pub domain_id: Option<String>,
    pub project_name: Option<String>,
    pub project_id: Option<String>,
    pub user_domain_name: Option<String>,
    pub user_domain_id: Option<String>,
    pub project_domain_name: Option<String>,
    pub project_domain_id: Option<String>,
    pub region: Option<String>,
    pub endpoint_tls_ca: Option<String>,
}

impl CredentialConfig {
    /// Build the credential bundle.
    ///
    /// A `credentials` blob replaces the individual fields entirely; its keys
    /// are normalized to snake_case.
    pub fn to_credentials(&self) -> Result<CredentialSet, ConfigError> {
        if let Some(blob) = &self.credentials {
            let serde_json::Value::Object(fields) = blob else {
                return Err(ConfigError::InvalidValue {
                    key: "credentials",
                    value: blob.to_string(),
                });
            };
            return Ok(fields
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        serde_json::Value::String(s) => s.clone(),
                        serde_json::Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    (k.replace('-', "_"), value)
                })
                .collect());
        }

        Ok(CredentialSet::new()
            .with("auth_url", self.auth_url.as_deref())
            .with("username", self.username.as_deref())
            .with("password", self.password.as_deref())
            .with("domain_name", self.domain_name.as_deref())
            .with("domain_id", self.domain_id.as_deref())
            .with("project_name", self.project_name.as_deref())
            .with("project_id", self.project_id.as_deref())
            .with("user_domain_name", self.user_domain_name.as_deref())
            .with("user_domain_id", self.user_domain_id.as_deref())
            .with("project_domain_name", self.project_domain_name.as_deref())
            .with("project_domain_id", self.project_domain_id.as_deref())
            .with("region", self.region.as_deref())
            .with("endpoint_tls_ca", self.endpoint_tls_ca.as_deref()))
    }
}

/// Outbound proxy options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProxyConfig {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
    pub web_proxy_enable: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            http_proxy: None,
            https_proxy: None,
            no_proxy: None,
            web_proxy_enable: true,
        }
    }
}

impl ProxyConfig {
    pub fn to_settings(&self) -> ProxySettings {
        if !self.web_proxy_enable {
            return ProxySettings::new();
        }
        let pairs = [
            ("HTTP_PROXY", self.http_proxy.as_deref()),
            ("HTTPS_PROXY", self.https_proxy.as_deref()),
            ("NO_PROXY", self.no_proxy.as_deref()),
        ];
        ProxySettings::from_pairs(pairs.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))))
    }
}

/// A boolean option that may also be given as a string ("yes", "off", ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoolOption {
    Bool(bool),
    Text(String),
}

impl Default for BoolOption {
    fn default() -> Self {
        BoolOption::Bool(false)
    }
}

impl BoolOption {
    /// Interpret the option; `None` if the text is not boolean-like.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            BoolOption::Bool(b) => Some(*b),
            BoolOption::Text(s) => parse_bool(s),
        }
    }
}

/// Boolean-like string parsing: yes/true/t/y/1/on and no/false/f/n/0/off.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "yes" | "true" | "t" | "y" | "1" | "on" => Some(true),
        "no" | "false" | "f" | "n" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn default_lb_port() -> u16 {
    443
}

fn default_lb_method() -> String {
    "ROUND_ROBIN".to_string()
}

fn default_true() -> bool {
    true
}

/// Integrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(flatten)]
    pub credentials: CredentialConfig,

    #[serde(flatten)]
    pub proxy: ProxyConfig,

    /// Preferred load balancer (local) port.
    #[serde(default = "default_lb_port")]
    pub lb_port: u16,

    /// Algorithm used when a request does not name one.
    #[serde(default = "default_lb_method")]
    pub lb_method: String,

    #[serde(default)]
    pub manage_security_groups: BoolOption,

    #[serde(default)]
    pub subnet_id: Option<String>,

    #[serde(default)]
    pub floating_network_id: Option<String>,

    #[serde(default = "default_true")]
    pub lb_enabled: bool,

    #[serde(default)]
    pub internal_lb: bool,

    #[serde(default)]
    pub bs_version: Option<String>,

    #[serde(default)]
    pub trust_device_path: Option<String>,

    #[serde(default)]
    pub ignore_volume_az: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials: CredentialConfig::default(),
            proxy: ProxyConfig::default(),
            lb_port: default_lb_port(),
            lb_method: default_lb_method(),
            manage_security_groups: BoolOption::default(),
            subnet_id: None,
            floating_network_id: None,
            lb_enabled: true,
            internal_lb: false,
            bs_version: None,
            trust_device_path: None,
            ignore_volume_az: None,
        }
    }
}

/// Configuration shared between the run loop and providers.
pub type SharedConfig = Arc<RwLock<Config>>;

/// What changed between two configurations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    pub any: bool,
    pub credentials: bool,
    pub proxy: bool,
}

impl Config {
    pub fn from_json(path: &Path, text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(path, &text)
    }

    pub fn diff(&self, other: &Config) -> ConfigDiff {
        ConfigDiff {
            any: self != other,
            credentials: self.credentials != other.credentials,
            proxy: self.proxy != other.proxy,
        }
    }

    /// Resolved `manage-security-groups`.
    pub fn manage_security_groups(&self) -> Result<bool, ConfigError> {
        self.manage_security_groups
            .as_bool()
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "manage_security_groups",
                value: match &self.manage_security_groups {
                    BoolOption::Text(s) => s.clone(),
                    BoolOption::Bool(b) => b.to_string(),
                },
            })
    }
}

/// Treat `""` and `"null"` as unset.
pub fn or_none(value: Option<&str>) -> Option<String> {
    match value {
        None | Some("") | Some("null") => None,
        Some(v) => Some(v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(text: &str) -> Config {
        Config::from_json(&PathBuf::from("test.json"), text).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse("{}");
        assert_eq!(config, Config::default());
        assert_eq!(config.lb_port, 443);
        assert_eq!(config.lb_method, "ROUND_ROBIN");
        assert!(config.lb_enabled);
        assert!(!config.manage_security_groups().unwrap());
    }

    #[test]
    fn test_kebab_case_keys() {
        let config = parse(
            r#"{"auth-url": "https://keystone:5000/v3", "lb-port": 6443,
                "floating-network-id": "ext", "https-proxy": "http://p:3128"}"#,
        );
        assert_eq!(config.credentials.auth_url.as_deref(), Some("https://keystone:5000/v3"));
        assert_eq!(config.lb_port, 6443);
        assert_eq!(config.floating_network_id.as_deref(), Some("ext"));
        assert_eq!(config.proxy.https_proxy.as_deref(), Some("http://p:3128"));
    }

    #[test]
    fn test_manage_security_groups_values() {
        for (value, expected) in [
            (r#"true"#, Some(true)),
            (r#"false"#, Some(false)),
            (r#""yes""#, Some(true)),
            (r#""off""#, Some(false)),
            (r#""invalid""#, None),
        ] {
            let config = parse(&format!(r#"{{"manage-security-groups": {}}}"#, value));
            assert_eq!(config.manage_security_groups().ok(), expected, "value {}", value);
        }
    }

    #[test]
    fn test_invalid_manage_security_groups_message() {
        let config = parse(r#"{"manage-security-groups": "invalid"}"#);
        let err = config.manage_security_groups().unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"Invalid value for config manage_security_groups="invalid""#
        );
    }

    #[test]
    fn test_diff_groups() {
        let base = parse("{}");
        let creds = parse(r#"{"region": "RegionTwo"}"#);
        let proxy = parse(r#"{"no-proxy": "localhost"}"#);
        let other = parse(r#"{"lb-method": "SOURCE_IP"}"#);

        assert_eq!(base.diff(&base), ConfigDiff::default());
        assert_eq!(
            base.diff(&creds),
            ConfigDiff { any: true, credentials: true, proxy: false }
        );
        assert_eq!(
            base.diff(&proxy),
            ConfigDiff { any: true, credentials: false, proxy: true }
        );
        assert_eq!(
            base.diff(&other),
            ConfigDiff { any: true, credentials: false, proxy: false }
        );
    }

    #[test]
    fn test_credentials_blob_overrides_fields() {
        let config = parse(
            r#"{"username": "ignored",
                "credentials": {"auth-url": "https://k:5000/v3", "username": "admin", "version": 3}}"#,
        );
        let creds = config.credentials.to_credentials().unwrap();
        assert_eq!(creds.get("auth_url"), Some("https://k:5000/v3"));
        assert_eq!(creds.get("username"), Some("admin"));
        assert_eq!(creds.get("version"), Some("3"));
    }

    #[test]
    fn test_proxy_disabled_yields_empty_settings() {
        let config = parse(r#"{"http-proxy": "http://p:3128", "web-proxy-enable": false}"#);
        assert!(config.proxy.to_settings().is_empty());
    }

    #[test]
    fn test_or_none() {
        assert_eq!(or_none(Some("")), None);
        assert_eq!(or_none(Some("null")), None);
        assert_eq!(or_none(None), None);
        assert_eq!(or_none(Some("v3")), Some("v3".to_string()));
    }
}
