//! Proxifier Common Types
//!
//! Reverse-proxy routing descriptor stored on LoadBalancer Services, and the
//! codec that moves it in and out of a single annotation value.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Annotation key holding the serialized [`ProxyConfiguration`]
pub const ANNOTATION_KEY: &str = "kubernetesReverseproxy";

/// Listen port assigned to the first host of a fresh configuration
pub const DEFAULT_PORT: i64 = 80;

/// Separator used when building canonical hostnames
const LABEL_SEPARATOR: &str = ".";

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("malformed proxy configuration: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("proxy configuration cannot be encoded: {0}")]
    Unrepresentable(#[source] serde_json::Error),
}

/// One routed host of the reverse proxy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Fully-qualified hostname
    #[serde(default)]
    pub host: String,

    /// Listen port, not range-checked (any JSON integer)
    #[serde(default)]
    pub port: i64,

    /// Route paths, in order
    #[serde(rename = "path", default, deserialize_with = "null_as_default")]
    pub paths: Vec<String>,

    /// Fallback path
    #[serde(rename = "defaultPath", default, deserialize_with = "null_as_default")]
    pub default_path: String,

    /// WebSocket upgrade support
    #[serde(rename = "webSocket", default)]
    pub web_socket: bool,
}

impl Host {
    /// Host with no paths, no default path and WebSocket disabled
    pub fn new(host: impl Into<String>, port: i64) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }
}

/// Reverse-proxy routing descriptor
///
/// `hosts` is ordered; the first entry is the canonical host of the Service
/// and the one published as its load-balancer hostname.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfiguration {
    #[serde(default, deserialize_with = "null_as_default")]
    pub hosts: Vec<Host>,
}

impl ProxyConfiguration {
    /// Parse an annotation value
    pub fn decode(value: &str) -> Result<Self, CodecError> {
        serde_json::from_str(value).map_err(CodecError::Malformed)
    }

    /// Serialize into an annotation value
    pub fn encode(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(CodecError::Unrepresentable)
    }

    /// Read the configuration from a resource's annotations
    ///
    /// A missing annotation map or missing key is an empty configuration.
    /// A present but malformed value is an error.
    pub fn from_annotations(
        annotations: Option<&BTreeMap<String, String>>,
    ) -> Result<Self, CodecError> {
        match annotations.and_then(|annot| annot.get(ANNOTATION_KEY)) {
            Some(value) => Self::decode(value),
            None => Ok(Self::default()),
        }
    }

    /// Encode and store under [`ANNOTATION_KEY`], replacing any previous value
    pub fn write_annotation(
        &self,
        annotations: &mut BTreeMap<String, String>,
    ) -> Result<(), CodecError> {
        let encoded = self.encode()?;
        annotations.insert(ANNOTATION_KEY.to_string(), encoded);
        Ok(())
    }

    /// The canonical host, if any
    pub fn canonical(&self) -> Option<&Host> {
        self.hosts.first()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// Canonical hostname of a Service: `name.namespace.root_domain`
pub fn canonical_hostname(name: &str, namespace: &str, root_domain: &str) -> String {
    [name, namespace, root_domain].join(LABEL_SEPARATOR)
}

/// Accept JSON `null` where a collection or string is expected
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_hostname() {
        assert_eq!(
            canonical_hostname("myservice", "default", "example.org"),
            "myservice.default.example.org"
        );
    }

    #[test]
    fn test_canonical_hostname_is_deterministic() {
        let first = canonical_hostname("api", "prod", "example.org");
        let second = canonical_hostname("api", "prod", "example.org");
        assert_eq!(first, second);
    }

    #[test]
    fn test_host_new_defaults() {
        let host = Host::new("api.prod.example.org", DEFAULT_PORT);

        assert_eq!(host.port, 80);
        assert!(host.paths.is_empty());
        assert_eq!(host.default_path, "");
        assert!(!host.web_socket);
    }

    #[test]
    fn test_encode_uses_annotation_field_names() {
        let config = ProxyConfiguration {
            hosts: vec![Host {
                host: "a.b.c".to_string(),
                port: 8080,
                paths: vec!["/api".to_string()],
                default_path: "/".to_string(),
                web_socket: true,
            }],
        };

        let encoded = config.encode().expect("Should encode");
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();

        let host = &value["hosts"][0];
        assert_eq!(host["host"], "a.b.c");
        assert_eq!(host["port"], 8080);
        assert_eq!(host["path"][0], "/api");
        assert_eq!(host["defaultPath"], "/");
        assert_eq!(host["webSocket"], true);
    }

    #[test]
    fn test_decode_accepts_null_collections() {
        // Writers that serialize empty slices as null
        let config = ProxyConfiguration::decode(
            r#"{"hosts":[{"host":"a.b.c","port":80,"path":null,"defaultPath":"","webSocket":false}]}"#,
        )
        .expect("Should decode null path");
        assert_eq!(config.hosts[0].paths, Vec::<String>::new());

        let empty = ProxyConfiguration::decode(r#"{"hosts":null}"#).expect("Should decode");
        assert!(empty.is_empty());
    }

    #[test]
    fn test_decode_missing_optional_fields() {
        let config =
            ProxyConfiguration::decode(r#"{"hosts":[{"host":"a.b.c","port":80}]}"#).unwrap();
        assert_eq!(config.hosts[0], Host::new("a.b.c", 80));
    }

    #[test]
    fn test_decode_missing_fields_take_zero_values() {
        let config = ProxyConfiguration::decode(r#"{"hosts":[{"port":80},{}]}"#)
            .expect("Should decode hosts without a name or port");

        assert_eq!(config.hosts[0], Host::new("", 80));
        assert_eq!(config.hosts[1], Host::default());
    }

    #[test]
    fn test_from_annotations_absent() {
        assert!(ProxyConfiguration::from_annotations(None)
            .unwrap()
            .is_empty());

        let annotations = BTreeMap::from([("other".to_string(), "x".to_string())]);
        assert!(ProxyConfiguration::from_annotations(Some(&annotations))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_from_annotations_malformed() {
        let annotations = BTreeMap::from([(ANNOTATION_KEY.to_string(), "{not json".to_string())]);
        let result = ProxyConfiguration::from_annotations(Some(&annotations));
        assert!(matches!(result, Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_write_annotation_replaces_value() {
        let mut annotations =
            BTreeMap::from([(ANNOTATION_KEY.to_string(), r#"{"hosts":[]}"#.to_string())]);
        let config = ProxyConfiguration {
            hosts: vec![Host::new("x.y.z", 80)],
        };

        config.write_annotation(&mut annotations).unwrap();

        let stored = ProxyConfiguration::from_annotations(Some(&annotations)).unwrap();
        assert_eq!(stored, config);
        assert_eq!(annotations.len(), 1);
    }
}
