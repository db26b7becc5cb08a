//! Service reconciler
//!
//! Two-phase hostname assignment for LoadBalancer Services without an
//! address:
//! 1. write a proxy configuration annotation whose first host is
//!    `name.namespace.rootDomain`
//! 2. on a later observation, publish that host as the load-balancer
//!    ingress hostname
//!
//! Every decision is derived from the Service as observed, never from
//! memory of earlier passes, so each phase can be replayed safely.

use super::client::{service_identity, ServiceApi};
use crate::apis::metrics::record_service_reconciliation;
use crate::config::ControllerConfig;
use crate::error::ReconcileError;
use common::{canonical_hostname, Host, ProxyConfiguration, ANNOTATION_KEY, DEFAULT_PORT};
use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, Service};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

/// `spec.type` of Services handled by this controller
pub const LOAD_BALANCER_TYPE: &str = "LoadBalancer";

/// Where a Service stands, evaluated in order (first match wins)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceState {
    /// Not a LoadBalancer Service
    NotApplicable,
    /// Already has an ingress IP or hostname
    AlreadyAddressed,
    /// No hosts configured yet; carries the configuration to write
    NeedsConfiguration {
        configuration: ProxyConfiguration,
        hostname: String,
    },
    /// Hosts configured, canonical hostname not yet published
    NeedsStatusSync { hostname: String },
}

/// Result of a successful reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    NotApplicable,
    AlreadyAddressed,
    ConfigurationWritten { hostname: String },
    StatusSynced { hostname: String },
    /// Deleted while a conflicting write was being retried
    Gone,
}

impl ReconcileOutcome {
    /// Short label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::NotApplicable => "not_applicable",
            ReconcileOutcome::AlreadyAddressed => "already_addressed",
            ReconcileOutcome::ConfigurationWritten { .. } => "configuration_written",
            ReconcileOutcome::StatusSynced { .. } => "status_synced",
            ReconcileOutcome::Gone => "gone",
        }
    }
}

pub fn is_load_balancer(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.type_.as_deref())
        == Some(LOAD_BALANCER_TYPE)
}

/// True if any ingress entry carries a non-empty IP or hostname
pub fn has_load_balancer_address(service: &Service) -> bool {
    let non_empty = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.is_empty());

    service
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .is_some_and(|ingress| {
            ingress
                .iter()
                .any(|entry| non_empty(&entry.ip) || non_empty(&entry.hostname))
        })
}

/// Decide the next transition for `service`
///
/// With `overwrite_invalid` set, a malformed annotation is treated as an empty
/// configuration; otherwise it is an error.
pub fn classify(
    service: &Service,
    root_domain: &str,
    overwrite_invalid: bool,
) -> Result<ServiceState, ReconcileError> {
    if !is_load_balancer(service) {
        return Ok(ServiceState::NotApplicable);
    }

    if has_load_balancer_address(service) {
        return Ok(ServiceState::AlreadyAddressed);
    }

    let (namespace, name) = service_identity(service);

    let mut configuration =
        match ProxyConfiguration::from_annotations(service.metadata.annotations.as_ref()) {
            Ok(configuration) => configuration,
            Err(e) if overwrite_invalid => {
                warn!(
                    "Discarding malformed {} annotation on service {}/{}: {}",
                    ANNOTATION_KEY, namespace, name, e
                );
                ProxyConfiguration::default()
            }
            Err(source) => {
                return Err(ReconcileError::InvalidConfiguration {
                    namespace,
                    name,
                    source,
                })
            }
        };

    if let Some(canonical) = configuration.canonical() {
        return Ok(ServiceState::NeedsStatusSync {
            hostname: canonical.host.clone(),
        });
    }

    let hostname = canonical_hostname(&name, &namespace, root_domain);
    configuration
        .hosts
        .push(Host::new(hostname.clone(), DEFAULT_PORT));

    Ok(ServiceState::NeedsConfiguration {
        configuration,
        hostname,
    })
}

/// Service reconciler
pub struct Reconciler<A> {
    api: A,
    root_domain: String,
    max_conflict_retries: u32,
    overwrite_invalid_config: bool,
}

impl<A: ServiceApi> Reconciler<A> {
    /// Reconciler with default retry and decode policies
    pub fn new(api: A, root_domain: impl Into<String>) -> Self {
        Self::from_config(api, &ControllerConfig::new(root_domain))
    }

    pub fn from_config(api: A, config: &ControllerConfig) -> Self {
        Self {
            api,
            root_domain: config.root_dns_domain.clone(),
            max_conflict_retries: config.max_conflict_retries,
            overwrite_invalid_config: config.overwrite_invalid_config,
        }
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn with_overwrite_invalid_config(mut self, overwrite: bool) -> Self {
        self.overwrite_invalid_config = overwrite;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn root_domain(&self) -> &str {
        &self.root_domain
    }

    /// Reconcile a single Service
    ///
    /// Performs at most one write per attempt. A conflicting write is retried
    /// against a freshly fetched copy, up to `max_conflict_retries` times
    /// (none by default).
    pub async fn reconcile(&self, service: Service) -> Result<ReconcileOutcome, ReconcileError> {
        let start = Instant::now();
        let (namespace, name) = service_identity(&service);

        let result = self.reconcile_with_retry(service, &namespace, &name).await;

        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(e) => e.kind(),
        };
        record_service_reconciliation(&name, &namespace, start.elapsed().as_secs_f64(), label);

        result
    }

    async fn reconcile_with_retry(
        &self,
        mut service: Service,
        namespace: &str,
        name: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let mut attempt = 0;

        loop {
            match self.apply(service).await {
                Err(e) if e.is_conflict() && attempt < self.max_conflict_retries => {
                    attempt += 1;
                    warn!(
                        "Conflict updating service {}/{}, re-fetching (retry {}/{})",
                        namespace, name, attempt, self.max_conflict_retries
                    );

                    service = match self.api.get(namespace, name).await {
                        Ok(Some(fresh)) => fresh,
                        Ok(None) => {
                            info!("Service {}/{} no longer exists", namespace, name);
                            return Ok(ReconcileOutcome::Gone);
                        }
                        Err(source) => {
                            return Err(ReconcileError::Persist {
                                namespace: namespace.to_string(),
                                name: name.to_string(),
                                source,
                            })
                        }
                    };
                }
                result => return result,
            }
        }
    }

    /// Classify and perform the matching transition
    async fn apply(&self, mut service: Service) -> Result<ReconcileOutcome, ReconcileError> {
        let (namespace, name) = service_identity(&service);

        match classify(&service, &self.root_domain, self.overwrite_invalid_config)? {
            ServiceState::NotApplicable => {
                debug!(
                    "Skipping service {}/{} as it is not a LoadBalancer",
                    namespace, name
                );
                Ok(ReconcileOutcome::NotApplicable)
            }
            ServiceState::AlreadyAddressed => {
                debug!(
                    "Skipping service {}/{} as it already has a LoadBalancer address",
                    namespace, name
                );
                Ok(ReconcileOutcome::AlreadyAddressed)
            }
            ServiceState::NeedsConfiguration {
                configuration,
                hostname,
            } => {
                info!(
                    "Service {}/{} needs a proxy configuration, assigning {}",
                    namespace, name, hostname
                );

                let annotations = service
                    .metadata
                    .annotations
                    .get_or_insert_with(BTreeMap::new);
                configuration
                    .write_annotation(annotations)
                    .map_err(|source| ReconcileError::Encode {
                        namespace: namespace.clone(),
                        name: name.clone(),
                        source,
                    })?;

                self.api
                    .replace(&service)
                    .await
                    .map_err(|source| ReconcileError::Persist {
                        namespace: namespace.clone(),
                        name: name.clone(),
                        source,
                    })?;

                info!(
                    "Added {} annotation to service {}/{}",
                    ANNOTATION_KEY, namespace, name
                );
                Ok(ReconcileOutcome::ConfigurationWritten { hostname })
            }
            ServiceState::NeedsStatusSync { hostname } => {
                info!(
                    "Updating service {}/{} load-balancer status to {}",
                    namespace, name, hostname
                );

                let status = service.status.get_or_insert_with(Default::default);
                status.load_balancer = Some(LoadBalancerStatus {
                    ingress: Some(vec![LoadBalancerIngress {
                        hostname: Some(hostname.clone()),
                        ..Default::default()
                    }]),
                });

                self.api
                    .replace_status(&service)
                    .await
                    .map_err(|source| ReconcileError::Persist {
                        namespace: namespace.clone(),
                        name: name.clone(),
                        source,
                    })?;

                info!(
                    "Published hostname {} for service {}/{}",
                    hostname, namespace, name
                );
                Ok(ReconcileOutcome::StatusSynced { hostname })
            }
        }
    }
}
