//! Configuration for the proxifier controller
//!
//! Loaded from environment variables at startup. A missing root domain is
//! fatal; everything else has a default.

use crate::error::ConfigError;
use std::env;

pub const CLUSTER_ADDRESS_ENV: &str = "CLUSTER_ADDRESS";
pub const ROOT_DNS_DOMAIN_ENV: &str = "ROOT_DNS_DOMAIN";
pub const INSECURE_CLUSTER_ENV: &str = "INSECURE_CLUSTER";
pub const MAX_CONFLICT_RETRIES_ENV: &str = "MAX_CONFLICT_RETRIES";
pub const OVERWRITE_INVALID_CONFIG_ENV: &str = "OVERWRITE_INVALID_CONFIG";

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// API server address (None: in-cluster or kubeconfig discovery)
    pub cluster_address: Option<String>,

    /// Root DNS domain appended to `name.namespace`
    pub root_dns_domain: String,

    /// Accept invalid API server certificates (default: false)
    pub insecure_cluster: bool,

    /// Re-fetch and retry attempts after a conflicting update (default: 0,
    /// a conflicting write abandons the event)
    pub max_conflict_retries: u32,

    /// Replace a malformed proxy annotation with a fresh one (default: true)
    pub overwrite_invalid_config: bool,
}

impl ControllerConfig {
    /// Configuration with defaults for everything but the root domain
    pub fn new(root_dns_domain: impl Into<String>) -> Self {
        Self {
            cluster_address: None,
            root_dns_domain: root_dns_domain.into(),
            insecure_cluster: false,
            max_conflict_retries: 0,
            overwrite_invalid_config: true,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let root_dns_domain =
            var(ROOT_DNS_DOMAIN_ENV).ok_or(ConfigError::MissingRootDomain(ROOT_DNS_DOMAIN_ENV))?;

        let mut config = Self::new(root_dns_domain);
        config.cluster_address = var(CLUSTER_ADDRESS_ENV);

        if let Some(val) = var(INSECURE_CLUSTER_ENV) {
            config.insecure_cluster = parse_bool(INSECURE_CLUSTER_ENV, &val)?;
        }

        if let Some(val) = var(MAX_CONFLICT_RETRIES_ENV) {
            config.max_conflict_retries =
                val.parse().map_err(|_| ConfigError::InvalidValue {
                    name: MAX_CONFLICT_RETRIES_ENV,
                    value: val.clone(),
                })?;
        }

        if let Some(val) = var(OVERWRITE_INVALID_CONFIG_ENV) {
            config.overwrite_invalid_config = parse_bool(OVERWRITE_INVALID_CONFIG_ENV, &val)?;
        }

        Ok(config)
    }

    /// Build the Kubernetes client configuration
    ///
    /// Starts from the inferred configuration (in-cluster or kubeconfig)
    /// and overrides the API server address when one is set.
    pub async fn kube_config(&self) -> Result<kube::Config, ConfigError> {
        let mut config = match &self.cluster_address {
            None => kube::Config::infer()
                .await
                .map_err(|e| ConfigError::Discovery(e.to_string()))?,
            Some(address) => {
                let uri = address.parse::<http::Uri>().map_err(|e| {
                    ConfigError::InvalidClusterAddress {
                        address: address.clone(),
                        reason: e.to_string(),
                    }
                })?;
                match kube::Config::infer().await {
                    Ok(mut inferred) => {
                        inferred.cluster_url = uri;
                        inferred
                    }
                    Err(_) => kube::Config::new(uri),
                }
            }
        };

        if self.insecure_cluster {
            config.accept_invalid_certs = true;
        }

        Ok(config)
    }
}

/// Booleans follow the `"true"` convention: only true/false (any case) parse
fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_root_domain_is_required() {
        let result = ControllerConfig::from_lookup(lookup(&[]));
        assert!(matches!(result, Err(ConfigError::MissingRootDomain(_))));

        // Blank counts as unset
        let result = ControllerConfig::from_lookup(lookup(&[(ROOT_DNS_DOMAIN_ENV, "  ")]));
        assert!(matches!(result, Err(ConfigError::MissingRootDomain(_))));
    }

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::from_lookup(lookup(&[(ROOT_DNS_DOMAIN_ENV, "example.org")]))
            .expect("Should load config");

        assert_eq!(config.root_dns_domain, "example.org");
        assert_eq!(config.cluster_address, None);
        assert!(!config.insecure_cluster, "Insecure transport must be opt-in");
        assert_eq!(
            config.max_conflict_retries, 0,
            "Conflicting writes are not retried unless configured"
        );
        assert!(
            config.overwrite_invalid_config,
            "Malformed annotations are replaced unless strict decoding is configured"
        );
    }

    #[test]
    fn test_unset_variables_match_new() {
        let loaded = ControllerConfig::from_lookup(lookup(&[(ROOT_DNS_DOMAIN_ENV, "example.org")]))
            .expect("Should load config");
        assert_eq!(loaded, ControllerConfig::new("example.org"));
    }

    #[test]
    fn test_all_variables() {
        let config = ControllerConfig::from_lookup(lookup(&[
            (ROOT_DNS_DOMAIN_ENV, "example.org"),
            (CLUSTER_ADDRESS_ENV, "https://10.0.0.1:6443"),
            (INSECURE_CLUSTER_ENV, "true"),
            (MAX_CONFLICT_RETRIES_ENV, "3"),
            (OVERWRITE_INVALID_CONFIG_ENV, "FALSE"),
        ]))
        .expect("Should load config");

        assert_eq!(
            config.cluster_address.as_deref(),
            Some("https://10.0.0.1:6443")
        );
        assert!(config.insecure_cluster);
        assert_eq!(config.max_conflict_retries, 3);
        assert!(!config.overwrite_invalid_config);
    }

    #[test]
    fn test_empty_cluster_address_means_discovery() {
        let config = ControllerConfig::from_lookup(lookup(&[
            (ROOT_DNS_DOMAIN_ENV, "example.org"),
            (CLUSTER_ADDRESS_ENV, ""),
        ]))
        .unwrap();
        assert_eq!(config.cluster_address, None);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let result = ControllerConfig::from_lookup(lookup(&[
            (ROOT_DNS_DOMAIN_ENV, "example.org"),
            (INSECURE_CLUSTER_ENV, "yes"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                name: INSECURE_CLUSTER_ENV,
                ..
            })
        ));

        let result = ControllerConfig::from_lookup(lookup(&[
            (ROOT_DNS_DOMAIN_ENV, "example.org"),
            (MAX_CONFLICT_RETRIES_ENV, "-1"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[tokio::test]
    async fn test_kube_config_with_explicit_address() {
        let mut config = ControllerConfig::new("example.org");
        config.cluster_address = Some("https://10.0.0.1:6443".to_string());
        config.insecure_cluster = true;

        let kube_config = config.kube_config().await.expect("Should build config");

        assert_eq!(kube_config.cluster_url.host(), Some("10.0.0.1"));
        assert_eq!(kube_config.cluster_url.port_u16(), Some(6443));
        assert!(kube_config.accept_invalid_certs);
    }

    #[tokio::test]
    async fn test_kube_config_rejects_bad_address() {
        let mut config = ControllerConfig::new("example.org");
        config.cluster_address = Some("not a uri".to_string());

        let result = config.kube_config().await;
        assert!(matches!(
            result,
            Err(ConfigError::InvalidClusterAddress { .. })
        ));
    }
}
